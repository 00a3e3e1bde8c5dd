use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use tcp_rust_dumper::commands;
use tcp_rust_dumper::config::{self, Config};
use tcp_rust_dumper::dumper::{create_dumper, DumperKind};
use tcp_rust_dumper::error::Result;
use tcp_rust_dumper::logging::{self, DumpLog};
use tcp_rust_dumper::metrics::Metrics;
use tcp_rust_dumper::proxy::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "tcp-rust-dumper")]
#[command(about = "TCP proxy that dumps database protocol traffic", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write dump records to stdout instead of the dump log file
    #[arg(long, global = true)]
    stdout: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Relay connections to the remote and dump their traffic (default)
    Proxy {
        /// Address to accept client connections on
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,
        /// Address of the server to relay to
        #[arg(short, long, value_name = "ADDR")]
        remote: Option<String>,
        /// Dumper to use (pg, mysql, hex)
        #[arg(long, value_name = "NAME")]
        dumper: Option<String>,
    },
    /// Dump a file of raw payload bytes and print the results as JSON lines
    Read {
        /// Dumper to use (pg, mysql, hex)
        #[arg(long, value_name = "NAME")]
        dumper: String,
        /// File holding the payload
        file: PathBuf,
    },
    /// Check configuration and resolve the configured dumper
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_from_env_or_file()?,
    };

    let command = args.command.unwrap_or(Command::Proxy {
        listen: None,
        remote: None,
        dumper: None,
    });

    if let Command::Proxy {
        listen,
        remote,
        dumper,
    } = &command
    {
        if let Some(listen) = listen {
            config.proxy.listen_addr = listen.clone();
        }
        if let Some(remote) = remote {
            config.proxy.remote_addr = remote.clone();
        }
        if let Some(dumper) = dumper {
            config.tcpdp.dumper = dumper.clone();
        }
        config::validate(&config)?;
    }
    if args.stdout {
        config.dump_log.stdout = true;
    }

    let _log_guard = logging::init(&config.log, args.debug)?;
    match &args.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Configuration loaded from default locations"),
    }

    match command {
        Command::Check => commands::run_config_check(&config),
        Command::Read { dumper, file } => {
            let kind: DumperKind = dumper.parse()?;
            let outputs = commands::run_read(kind, &config.dumper_options(), &file).await?;
            for output in outputs {
                println!("{}", serde_json::to_string(&output)?);
            }
            Ok(())
        }
        Command::Proxy { .. } => run_proxy(config).await,
    }
}

async fn run_proxy(config: Config) -> Result<()> {
    let kind = config.dumper_kind()?;
    let span = tracing::info_span!("dumper", name = kind.as_str());
    let dumper = create_dumper(kind, &config.dumper_options(), span);
    let sink = Arc::new(DumpLog::from_config(&config.dump_log));
    let metrics = Arc::new(Metrics::new()?);

    info!("Starting TCP Rust Dumper");
    let server = ProxyServer::bind(&config.proxy, dumper, sink, metrics.clone()).await?;
    let connections = server.connections();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("Proxy server error: {}", e);
        }
    });

    shutdown_signal().await;

    info!("Shutting down TCP Rust Dumper");
    let _ = shutdown_tx.send(());

    let shutdown_timeout =
        tokio::time::timeout(tokio::time::Duration::from_secs(30), server_handle).await;
    match shutdown_timeout {
        Ok(_) => info!("Graceful shutdown completed"),
        Err(_) => error!("Shutdown timeout exceeded"),
    }

    if !connections.is_empty() {
        info!("{} connection(s) still open at exit", connections.len());
    }
    info!(
        connections = metrics.connections_total.get(),
        records = metrics.dump_records_total.get(),
        bytes_client_to_remote = metrics.bytes_client_to_remote.get(),
        bytes_remote_to_client = metrics.bytes_remote_to_client.get(),
        "Session summary"
    );

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
