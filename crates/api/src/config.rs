use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{key} {message}")]
    OutOfRange {
        key: &'static str,
        message: &'static str,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for running jobs (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Root directory for uploads, snapshots and diffs.
    pub artifact_root: PathBuf,
    /// Multipart body limit for uploads.
    pub max_upload_bytes: usize,
    /// When set, publish submissions are refused.
    pub imports_frozen: bool,
    /// A job whose heartbeat is older than this is failed by the sweeper.
    pub job_lease_secs: u64,
    pub job_heartbeat_secs: u64,
    /// Total transaction attempts for publish and rollback.
    pub publish_max_attempts: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `ARTIFACT_ROOT`        | `./data/artifacts`         |
    /// | `MAX_UPLOAD_BYTES`     | `268435456`                |
    /// | `IMPORTS_FROZEN`       | `false`                    |
    /// | `JOB_LEASE_SECS`       | `900`                      |
    /// | `JOB_HEARTBEAT_SECS`   | `15`                       |
    /// | `PUBLISH_MAX_ATTEMPTS` | `3`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&lookup, "PORT", 3000, "u16")?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30, "u64")?;
        let shutdown_timeout_secs = parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30, "u64")?;
        let artifact_root = lookup("ARTIFACT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/artifacts"));
        let max_upload_bytes = parse_or(&lookup, "MAX_UPLOAD_BYTES", 256 * 1024 * 1024, "usize")?;
        let imports_frozen = parse_bool(&lookup, "IMPORTS_FROZEN", false)?;
        let job_lease_secs = parse_or(&lookup, "JOB_LEASE_SECS", 900, "u64")?;
        let job_heartbeat_secs = parse_or(&lookup, "JOB_HEARTBEAT_SECS", 15, "u64")?;
        let publish_max_attempts = parse_or(&lookup, "PUBLISH_MAX_ATTEMPTS", 3, "u32")?;

        if publish_max_attempts == 0 {
            return Err(ConfigError::OutOfRange {
                key: "PUBLISH_MAX_ATTEMPTS",
                message: "must be at least 1",
            });
        }
        if job_heartbeat_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "JOB_HEARTBEAT_SECS",
                message: "must be at least 1",
            });
        }
        if job_heartbeat_secs >= job_lease_secs {
            return Err(ConfigError::OutOfRange {
                key: "JOB_HEARTBEAT_SECS",
                message: "must be shorter than JOB_LEASE_SECS",
            });
        }

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            artifact_root,
            max_upload_bytes,
            imports_frozen,
            job_lease_secs,
            job_heartbeat_secs,
            publish_max_attempts,
        })
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_secs(self.job_lease_secs)
    }

    pub fn job_heartbeat(&self) -> Duration {
        Duration::from_secs(self.job_heartbeat_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected,
        }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            expected: "boolean",
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.artifact_root, PathBuf::from("./data/artifacts"));
        assert_eq!(config.max_upload_bytes, 268_435_456);
        assert!(!config.imports_frozen);
        assert_eq!(config.job_lease_secs, 900);
        assert_eq!(config.job_heartbeat_secs, 15);
        assert_eq!(config.publish_max_attempts, 3);
    }

    #[test]
    fn frozen_flag_accepts_common_spellings() {
        assert!(load(&[("IMPORTS_FROZEN", "true")]).unwrap().imports_frozen);
        assert!(load(&[("IMPORTS_FROZEN", "1")]).unwrap().imports_frozen);
        assert!(!load(&[("IMPORTS_FROZEN", "off")]).unwrap().imports_frozen);
    }

    #[test]
    fn bad_values_are_typed_errors() {
        assert_eq!(
            load(&[("PORT", "http")]).unwrap_err(),
            ConfigError::Invalid {
                key: "PORT",
                value: "http".into(),
                expected: "u16",
            }
        );
        assert!(matches!(
            load(&[("IMPORTS_FROZEN", "maybe")]),
            Err(ConfigError::Invalid { key: "IMPORTS_FROZEN", .. })
        ));
    }

    #[test]
    fn heartbeat_must_fit_inside_lease() {
        assert!(matches!(
            load(&[("JOB_LEASE_SECS", "10"), ("JOB_HEARTBEAT_SECS", "10")]),
            Err(ConfigError::OutOfRange { key: "JOB_HEARTBEAT_SECS", .. })
        ));
        assert!(matches!(
            load(&[("PUBLISH_MAX_ATTEMPTS", "0")]),
            Err(ConfigError::OutOfRange { key: "PUBLISH_MAX_ATTEMPTS", .. })
        ));
    }
}
