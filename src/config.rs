//! Control timings and the TOML service file.
//!
//! A service file lists the services one executable hosts as `[[service]]`
//! tables, with the account they run under and the arguments the service
//! manager launches the executable with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::{Credentials, ServiceAccount, ServiceDescriptor};

const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_STATUS_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_UNINSTALL_SETTLE_MS: u64 = 5_000;

/// Timing of status polling and the post-uninstall settle delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ControlConfigToml", into = "ControlConfigToml")]
pub struct ControlConfig {
    pub poll_interval: Duration,
    /// Total budget for a start or stop to reach its target status.
    pub status_timeout: Duration,
    /// Pause after uninstall so the OS can finish tearing records down.
    pub uninstall_settle: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            status_timeout: Duration::from_millis(DEFAULT_STATUS_TIMEOUT_MS),
            uninstall_settle: Duration::from_millis(DEFAULT_UNINSTALL_SETTLE_MS),
        }
    }
}

impl ControlConfig {
    /// Millisecond budgets and no settle delay, for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            status_timeout: Duration::from_millis(200),
            uninstall_settle: Duration::ZERO,
        }
    }
}

/// On-disk shape of [`ControlConfig`]; every field optional.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ControlConfigToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uninstall_settle_ms: Option<u64>,
}

impl From<ControlConfigToml> for ControlConfig {
    fn from(raw: ControlConfigToml) -> Self {
        let ms = |v: Option<u64>, d: u64| Duration::from_millis(v.unwrap_or(d));
        Self {
            poll_interval: ms(raw.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS),
            status_timeout: ms(raw.status_timeout_ms, DEFAULT_STATUS_TIMEOUT_MS),
            uninstall_settle: ms(raw.uninstall_settle_ms, DEFAULT_UNINSTALL_SETTLE_MS),
        }
    }
}

impl From<ControlConfig> for ControlConfigToml {
    fn from(cfg: ControlConfig) -> Self {
        Self {
            poll_interval_ms: Some(cfg.poll_interval.as_millis() as u64),
            status_timeout_ms: Some(cfg.status_timeout.as_millis() as u64),
            uninstall_settle_ms: Some(cfg.uninstall_settle.as_millis() as u64),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse service file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Services hosted by one executable, and how to register them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFile {
    #[serde(default)]
    pub account: ServiceAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Arguments the service manager passes when it launches the executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe_args: Option<String>,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default, rename = "service", skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDescriptor>,
}

impl ServiceFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut file: ServiceFile = toml::from_str(text)?;
        for service in &mut file.services {
            if service.display_name.is_empty() {
                service.display_name = service.name.clone();
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::StartMode;

    #[test]
    fn parse_full_file() {
        let file = ServiceFile::from_toml_str(
            r#"
            account = "network-service"
            exe_args = "run --file svc.toml"

            [control]
            poll_interval_ms = 100
            uninstall_settle_ms = 0

            [[service]]
            name = "svc1"
            display_name = "Service One"
            description = "test"
            start_mode = "manual"
            depends_on = ["Tcpip", "Afd"]

            [[service]]
            name = "svc2"
            "#,
        )
        .unwrap();

        assert_eq!(file.account, ServiceAccount::NetworkService);
        assert_eq!(file.exe_args.as_deref(), Some("run --file svc.toml"));
        assert_eq!(file.control.poll_interval, Duration::from_millis(100));
        assert_eq!(file.control.status_timeout, Duration::from_secs(5));
        assert_eq!(file.control.uninstall_settle, Duration::ZERO);
        assert_eq!(file.services.len(), 2);
        assert_eq!(file.services[0].start_mode, StartMode::Manual);
        assert_eq!(file.services[0].depends_on, ["Tcpip", "Afd"]);
        assert_eq!(file.services[1].display_name, "svc2");
        assert_eq!(file.services[1].start_mode, StartMode::Automatic);
    }

    #[test]
    fn defaults_when_empty() {
        let file = ServiceFile::from_toml_str("").unwrap();
        assert_eq!(file.account, ServiceAccount::LocalService);
        assert_eq!(file.control, ControlConfig::default());
        assert!(file.services.is_empty());
    }

    #[test]
    fn user_credentials() {
        let file = ServiceFile::from_toml_str(
            r#"
            account = "user"
            [credentials]
            username = "alice"
            password = "pw"
            "#,
        )
        .unwrap();
        let creds = file.credentials.unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password.as_deref(), Some("pw"));
    }

    #[test]
    fn control_config_round_trips_through_toml() {
        let text = toml::to_string(&ServiceFile::default()).unwrap();
        assert!(text.contains("poll_interval_ms = 250"));
        let back = ServiceFile::from_toml_str(&text).unwrap();
        assert_eq!(back.control, ControlConfig::default());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            ServiceFile::from_toml_str("account = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
