mod check;
mod read;

pub use check::run_config_check;
pub use read::{read_payload, run_read, ReadEntry, ReadOutput};
