use crate::config::Config;
use crate::dumper::{create_dumper, Direction};
use crate::error::{ConfigError, Result};
use tracing::{error, info, warn, Span};

/// Validates `config` and resolves its dumper without opening any sockets.
pub fn run_config_check(config: &Config) -> Result<()> {
    info!("Checking configuration...");

    crate::config::validate(config)?;
    info!("✓ Configuration is valid");

    let kind = config.dumper_kind()?;
    let dumper = create_dumper(kind, &config.dumper_options(), Span::none());
    info!("Dumper: {}", dumper.name());
    info!(
        "  Dumps remote-to-client traffic: {}",
        dumper.dumps_direction(Direction::RemoteToClient)
    );
    if !config.tcpdp.persistent_keys.is_empty() {
        info!(
            "  Extra persistent keys: {}",
            config.tcpdp.persistent_keys.join(", ")
        );
    }

    info!("Proxy:");
    info!("  Listen: {}", config.proxy.listen_addr);
    info!("  Remote: {}", config.proxy.remote_addr);
    info!("  Buffer size: {} bytes", config.proxy.buffer_size);

    let mut all_ok = true;

    let dump_log = &config.dump_log;
    if !dump_log.enable {
        warn!("Dump log: DISABLED");
    } else if dump_log.stdout {
        info!("Dump log: stdout");
    } else if dump_log.dir.is_dir() {
        info!(
            "Dump log: {}",
            dump_log.dir.join(&dump_log.file_name).display()
        );
    } else {
        error!(
            "✗ Dump log directory does not exist: {}",
            dump_log.dir.display()
        );
        all_ok = false;
    }

    if let Some(dir) = &config.log.dir {
        if !config.log.stdout && !dir.is_dir() {
            error!("✗ Log directory does not exist: {}", dir.display());
            all_ok = false;
        }
    }

    if all_ok {
        info!("✓ All checks passed");
        Ok(())
    } else {
        Err(ConfigError::Validation("One or more checks failed".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_default_config_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.dump_log.dir = dir.path().to_path_buf();

        assert!(run_config_check(&config).is_ok());
    }

    #[test]
    fn test_unknown_dumper_fails() {
        let mut config = Config::default();
        config.tcpdp.dumper = "oracle".to_string();

        assert!(matches!(run_config_check(&config), Err(Error::Dumper(_))));
    }

    #[test]
    fn test_missing_dump_log_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.dump_log.dir = dir.path().join("missing");

        assert!(matches!(
            run_config_check(&config),
            Err(Error::Config(ConfigError::Validation(_)))
        ));

        config.dump_log.stdout = true;
        assert!(run_config_check(&config).is_ok());
    }
}
