//! Configuration management for the restic exporter.
//!
//! Supports loading configuration from:
//! - An optional configuration file (TOML, YAML, JSON, ...)
//! - Environment variables (`RESTIC_REPOSITORY`, `LISTEN_PORT`, `NO_CHECK`, ...)
//!
//! Environment variables take precedence over the file.

use crate::error::{ExporterError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pattern restic lock ids are matched against when counting locks.
pub const DEFAULT_LOCK_ID_PATTERN: &str = "^[a-z0-9]+$";

/// Main configuration structure for the restic exporter.
///
/// Field names are the lowercase form of the environment variables that set
/// them, e.g. `RESTIC_REPOSITORY` maps to `restic_repository`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Repository location passed to `restic -r`
    #[serde(default)]
    pub restic_repository: String,

    /// Password file passed to `restic -p`
    #[serde(default)]
    pub restic_password_file: String,

    /// Deprecated alias of `restic_repository`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic_repo_url: Option<String>,

    /// Deprecated alias of `restic_password_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restic_repo_password_file: Option<String>,

    /// restic executable to run
    #[serde(default = "default_restic_binary")]
    pub restic_binary: String,

    /// Address to listen on for the metrics endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to listen on for the metrics endpoint
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Seconds between two refreshes of the repository statistics
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Timeout in seconds for a single restic invocation (0 = wait forever)
    #[serde(default)]
    pub command_timeout: u64,

    /// Terminate the process when a refresh fails
    #[serde(default)]
    pub exit_on_error: bool,

    /// Skip `restic check`
    #[serde(default)]
    pub no_check: bool,

    /// Skip `restic stats`
    #[serde(default)]
    pub no_stats: bool,

    /// Skip `restic list locks`
    #[serde(default)]
    pub no_locks: bool,

    /// Expose snapshot paths as a label
    #[serde(default)]
    pub include_paths: bool,

    /// Pass `--insecure-tls` to restic
    #[serde(default)]
    pub insecure_tls: bool,

    /// Regular expression a line of `restic list locks` must match to count as a lock
    #[serde(default = "default_lock_id_pattern")]
    pub lock_id_pattern: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_restic_binary() -> String {
    "restic".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8001
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_lock_id_pattern() -> String {
    DEFAULT_LOCK_ID_PATTERN.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// Returns the settings together with deprecation notices, which the
    /// caller logs once logging is initialized.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use restic_exporter::config::Settings;
    ///
    /// let (settings, _notices) = Settings::load(Some("restic-exporter.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<(Self, Vec<String>)> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(environment());

        Self::from_config(builder.build()?)
    }

    /// Deserialize, resolve deprecated aliases and validate.
    pub fn from_config(config: config::Config) -> Result<(Self, Vec<String>)> {
        let mut settings: Settings = config.try_deserialize()?;
        let notices = settings.resolve_deprecated();
        settings.validate()?;
        Ok((settings, notices))
    }

    /// Fall back to the deprecated variable names when the current ones are unset.
    fn resolve_deprecated(&mut self) -> Vec<String> {
        let mut notices = Vec::new();

        if self.restic_repository.is_empty() {
            if let Some(url) = self.restic_repo_url.take().filter(|v| !v.is_empty()) {
                self.restic_repository = url;
                notices.push(
                    "The environment variable RESTIC_REPO_URL is deprecated, \
                     please use RESTIC_REPOSITORY instead."
                        .to_string(),
                );
            }
        }

        if self.restic_password_file.is_empty() {
            if let Some(file) = self
                .restic_repo_password_file
                .take()
                .filter(|v| !v.is_empty())
            {
                self.restic_password_file = file;
                notices.push(
                    "The environment variable RESTIC_REPO_PASSWORD_FILE is deprecated, \
                     please use RESTIC_PASSWORD_FILE instead."
                        .to_string(),
                );
            }
        }

        notices
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        if self.restic_repository.is_empty() {
            return Err(config_error(
                "The environment variable RESTIC_REPOSITORY is mandatory",
            ));
        }

        if self.restic_password_file.is_empty() {
            return Err(config_error(
                "The environment variable RESTIC_PASSWORD_FILE is mandatory",
            ));
        }

        if self.refresh_interval == 0 {
            return Err(config_error("REFRESH_INTERVAL must be greater than 0"));
        }

        self.lock_pattern()?;
        Ok(())
    }

    /// Compiled lock id pattern.
    pub fn lock_pattern(&self) -> Result<Regex> {
        Regex::new(&self.lock_id_pattern)
            .map_err(|e| config_error(&format!("Invalid LOCK_ID_PATTERN: {}", e)))
    }

    /// `address:port` the HTTP server binds to.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    pub fn refresh_every(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    /// Per-invocation timeout, `None` when disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout > 0).then(|| Duration::from_secs(self.command_timeout))
    }
}

/// Process environment, unprefixed. Empty variables count as unset.
fn environment() -> config::Environment {
    config::Environment::default()
        .try_parsing(true)
        .ignore_empty(true)
}

fn config_error(message: &str) -> ExporterError {
    ExporterError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            restic_repository: String::new(),
            restic_password_file: String::new(),
            restic_repo_url: None,
            restic_repo_password_file: None,
            restic_binary: default_restic_binary(),
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            refresh_interval: default_refresh_interval(),
            command_timeout: 0,
            exit_on_error: false,
            no_check: false,
            no_stats: false,
            no_locks: false,
            include_paths: false,
            insecure_tls: false,
            lock_id_pattern: default_lock_id_pattern(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<(Settings, Vec<String>)> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Settings::from_config(config)
    }

    fn from_env(vars: &[(&str, &str)]) -> Result<(Settings, Vec<String>)> {
        let source = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let config = config::Config::builder()
            .add_source(environment().source(Some(source)))
            .build()?;
        Settings::from_config(config)
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.socket_address(), "0.0.0.0:8001");
        assert_eq!(settings.refresh_every(), Duration::from_secs(60));
        assert_eq!(settings.restic_binary, "restic");
        assert!(settings.command_timeout().is_none());
        assert!(!settings.no_stats);
        assert!(!settings.include_paths);
    }

    #[test]
    fn test_validation_fails_without_repository() {
        let settings = Settings::default();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_minimal_file_loads_with_defaults() {
        let (settings, notices) = from_toml(
            r#"
            restic_repository = "/srv/restic"
            restic_password_file = "/run/secrets/restic"
            "#,
        )
        .unwrap();

        assert!(notices.is_empty());
        assert_eq!(settings.restic_repository, "/srv/restic");
        assert_eq!(settings.listen_port, 8001);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_deprecated_aliases_are_honored_with_notice() {
        let (settings, notices) = from_toml(
            r#"
            restic_repo_url = "s3:https://s3.example.com/bucket"
            restic_repo_password_file = "/etc/restic/password"
            "#,
        )
        .unwrap();

        assert_eq!(settings.restic_repository, "s3:https://s3.example.com/bucket");
        assert_eq!(settings.restic_password_file, "/etc/restic/password");
        assert_eq!(notices.len(), 2);
        assert!(notices[0].contains("RESTIC_REPO_URL is deprecated"));
        assert!(notices[1].contains("RESTIC_REPO_PASSWORD_FILE is deprecated"));
    }

    #[test]
    fn test_current_name_wins_over_deprecated_alias() {
        let (settings, notices) = from_toml(
            r#"
            restic_repository = "/new"
            restic_repo_url = "/old"
            restic_password_file = "/pw"
            "#,
        )
        .unwrap();

        assert_eq!(settings.restic_repository, "/new");
        assert!(notices.is_empty());
    }

    #[test]
    fn test_toggles_and_timeout() {
        let (settings, _) = from_toml(
            r#"
            restic_repository = "/srv/restic"
            restic_password_file = "/pw"
            no_check = true
            no_stats = true
            include_paths = true
            refresh_interval = 300
            command_timeout = 90
            listen_port = 9200
            "#,
        )
        .unwrap();

        assert!(settings.no_check);
        assert!(settings.no_stats);
        assert!(!settings.no_locks);
        assert!(settings.include_paths);
        assert_eq!(settings.refresh_every(), Duration::from_secs(300));
        assert_eq!(settings.command_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(settings.socket_address(), "0.0.0.0:9200");
    }

    #[test]
    fn test_zero_refresh_interval_is_rejected() {
        let result = from_toml(
            r#"
            restic_repository = "/srv/restic"
            restic_password_file = "/pw"
            refresh_interval = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_lock_pattern_is_rejected() {
        let result = from_toml(
            r#"
            restic_repository = "/srv/restic"
            restic_password_file = "/pw"
            lock_id_pattern = "^[a-z"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_variables() {
        let (settings, notices) = from_env(&[
            ("RESTIC_REPOSITORY", "/srv/restic"),
            ("RESTIC_PASSWORD_FILE", "/run/secrets/restic"),
            ("LISTEN_ADDRESS", ""),
            ("LISTEN_PORT", "9100"),
            ("REFRESH_INTERVAL", "120"),
            ("NO_STATS", "1"),
            ("INCLUDE_PATHS", "yes"),
            ("NO_CHECK", "off"),
            ("EXIT_ON_ERROR", "true"),
            ("INSECURE_TLS", "0"),
            ("LOG_LEVEL", "DEBUG"),
            ("HOME", "/root"),
        ])
        .unwrap();

        assert!(notices.is_empty());
        assert_eq!(settings.restic_repository, "/srv/restic");
        assert_eq!(settings.restic_password_file, "/run/secrets/restic");
        assert_eq!(settings.socket_address(), "0.0.0.0:9100");
        assert_eq!(settings.refresh_every(), Duration::from_secs(120));
        assert!(settings.no_stats);
        assert!(settings.include_paths);
        assert!(!settings.no_check);
        assert!(settings.exit_on_error);
        assert!(!settings.insecure_tls);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_deprecated_environment_variables() {
        let (settings, notices) = from_env(&[
            ("RESTIC_REPOSITORY", ""),
            ("RESTIC_REPO_URL", "/old/repo"),
            ("RESTIC_REPO_PASSWORD_FILE", "/old/password"),
        ])
        .unwrap();

        assert_eq!(settings.restic_repository, "/old/repo");
        assert_eq!(settings.restic_password_file, "/old/password");
        assert_eq!(
            notices,
            vec![
                "The environment variable RESTIC_REPO_URL is deprecated, \
                 please use RESTIC_REPOSITORY instead."
                    .to_string(),
                "The environment variable RESTIC_REPO_PASSWORD_FILE is deprecated, \
                 please use RESTIC_PASSWORD_FILE instead."
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_environment_is_rejected() {
        let err = from_env(&[("RESTIC_PASSWORD_FILE", "/pw")]).unwrap_err();
        assert!(err.to_string().contains("RESTIC_REPOSITORY is mandatory"));
    }
}
