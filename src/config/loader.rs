use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::path::Path;

const ENV_PREFIX: &str = "TCPDP_";

pub fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        // Try to load from various config files
        .merge(Toml::file("tcp-rust-dumper.toml"))
        .merge(Json::file("tcp-rust-dumper.json"))
        .merge(Yaml::file("tcp-rust-dumper.yaml"))
        .merge(Yaml::file("tcp-rust-dumper.yml"))
        // Override with environment variables (TCPDP_<SECTION>__<KEY>)
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = apply_env_substitutions(config)?;
    validate(&config)?;

    Ok(config)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into());
        }
    };

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let config = apply_env_substitutions(config)?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Unknown dumpers must be rejected before any capture starts
    config.dumper_kind()?;

    if config.proxy.listen_addr.trim().is_empty() {
        return Err(ConfigError::Validation("Listen address must not be empty".into()).into());
    }
    if config.proxy.remote_addr.trim().is_empty() {
        return Err(ConfigError::Validation("Remote address must not be empty".into()).into());
    }
    if config.proxy.listen_addr == config.proxy.remote_addr {
        return Err(ConfigError::Validation(
            "Listen and remote addresses must be different".into(),
        )
        .into());
    }
    if !has_port(&config.proxy.listen_addr) {
        return Err(ConfigError::Validation(format!(
            "Listen address '{}' must be in host:port form",
            config.proxy.listen_addr
        ))
        .into());
    }
    if !has_port(&config.proxy.remote_addr) {
        return Err(ConfigError::Validation(format!(
            "Remote address '{}' must be in host:port form",
            config.proxy.remote_addr
        ))
        .into());
    }

    if config.proxy.buffer_size == 0 {
        return Err(ConfigError::Validation("Buffer size must be greater than 0".into()).into());
    }

    if config.dump_log.enable && !config.dump_log.stdout && config.dump_log.file_name.is_empty()
    {
        return Err(ConfigError::Validation("Dump log file name must not be empty".into()).into());
    }

    if let Err(e) = config.log.level.parse::<tracing::Level>() {
        return Err(ConfigError::Validation(format!(
            "Invalid log level '{}': {}",
            config.log.level, e
        ))
        .into());
    }

    Ok(())
}

/// Only the shape is checked; host names are resolved when connecting.
fn has_port(addr: &str) -> bool {
    matches!(addr.rsplit_once(':'), Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.proxy.listen_addr = substitute_env_vars(&config.proxy.listen_addr)?;
    config.proxy.remote_addr = substitute_env_vars(&config.proxy.remote_addr)?;

    if let Some(dir) = &config.log.dir {
        let dir = substitute_env_vars(&dir.to_string_lossy())?;
        config.log.dir = Some(dir.into());
    }
    let dump_dir = substitute_env_vars(&config.dump_log.dir.to_string_lossy())?;
    config.dump_log.dir = dump_dir.into();

    Ok(config)
}

/// Expands `${VAR}` and `${VAR:-default}` references.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for cap in re.captures_iter(input) {
        let Some(whole) = cap.get(0) else { continue };
        output.push_str(&input[last..whole.start()]);
        match (std::env::var(&cap[1]), cap.get(2)) {
            (Ok(value), _) => output.push_str(&value),
            (Err(_), Some(default)) => output.push_str(default.as_str()),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{}' not found",
                    &cap[1]
                ))
                .into());
            }
        }
        last = whole.end();
    }
    output.push_str(&input[last..]);

    Ok(output)
}
