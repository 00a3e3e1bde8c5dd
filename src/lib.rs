pub mod commands;
pub mod config;
pub mod dumper;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod session;
