mod model;
mod raw;

pub use model::{CommandConfig, Config, ManagerConfig};

/// File names looked up when no configuration path is given.
pub const DEFAULT_FILENAMES: [&str; 2] = ["warden.toml", ".warden.toml"];

/// Error type for configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[cfg(feature = "toml")]
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error(s): {0}")]
    Validation(String),
}

/// Load a configuration from a file path.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration file cannot be read or parsed.
pub fn load_from_path(path: &std::path::Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_auto(&text, path)
}

/// Parse a configuration, picking the format from the file extension.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration string cannot be parsed.
pub fn parse_auto(text: &str, path: &std::path::Path) -> Result<Config, ConfigError> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml")]
        "toml" => parse_toml(text),
        _ => Err(ConfigError::Validation("unknown config extension".into())),
    }
}

/// Parse a configuration from a TOML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the configuration string cannot be parsed.
#[cfg(feature = "toml")]
pub fn parse_toml(config: &str) -> Result<Config, ConfigError> {
    let raw_config = toml::from_str::<raw::RawConfig>(config)?;
    raw_config.try_into()
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use warden_core::ProcessImplementation;

    use super::*;

    #[test]
    fn parse_toml_ok() {
        let txt = r#"
            [manager]
            max_procs = 8
            synchronized = true
            track_groups = true
            environment = { RUST_LOG = "info" }

            [command]
            parallel = true
            continue_on_error = true
            directory = "/tmp"
            tags = ["build"]
            timeout_secs = 30
            implementation = "blocking"
            cmds = [["echo", "a"], ["ls -la"]]
        "#;
        let config = parse_toml(txt).unwrap();

        assert_eq!(config.version, 1);
        assert_eq!(config.manager.max_procs, Some(8));
        assert!(config.manager.synchronized);
        assert!(config.manager.track_groups);
        assert_eq!(config.manager.environment["RUST_LOG"], "info");

        assert!(config.command.parallel);
        assert!(config.command.continue_on_error);
        assert!(!config.command.ignore_error);
        assert_eq!(config.command.cmds, vec![vec!["echo", "a"], vec!["ls -la"]]);
        assert_eq!(config.command.tags, vec!["build"]);
        assert_eq!(config.command.timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.command.implementation,
            ProcessImplementation::Blocking
        );
    }

    #[test]
    fn parse_toml_rejects_unknown_fields() {
        let txt = r#"
            [command]
            cmds = [["true"]]
            retries = 3
        "#;
        assert!(matches!(parse_toml(txt), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn parse_toml_remote_validation() {
        let txt = r#"
            [manager.remote]
            host = ""

            [command]
            cmds = [["uptime"]]
        "#;
        assert!(matches!(parse_toml(txt), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn load_from_path_checks_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[command]\ncmds = [[\"true\"]]").unwrap();
        assert!(load_from_path(file.path()).is_ok());

        let err = parse_auto("", std::path::Path::new("warden.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
