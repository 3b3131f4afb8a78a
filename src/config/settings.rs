//! Typed views over the merged configuration
//!
//! Extraction checks every required key up front, so a missing parameter is
//! reported before any connection is attempted.

use std::fmt;
use std::time::Duration;

use super::store::{Config, ConfigError};
use crate::timeout::TimeoutConfig;

/// Connection parameters for the scheduler and its event publisher
#[derive(Clone)]
pub struct SchedulerSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub token: String,
    pub publisher_port: u16,
    pub timeouts: TimeoutConfig,
}

impl SchedulerSettings {
    pub const REQUIRED: [&'static str; 5] = [
        "lava.server.host",
        "lava.server.port",
        "lava.server.user",
        "lava.server.token",
        "lava.publisher.port",
    ];

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if let Some(missing) = Self::REQUIRED.iter().find(|key| !config.has(key)) {
            tracing::error!(parameter = %missing, "missing scheduler parameter");
            return Err(ConfigError::Missing(missing.to_string()));
        }

        let timeouts = TimeoutConfig::from_config(
            config.get_u64("lava.server.jobs.timeout")?,
            config.get_u64("lava.server.connect_timeout")?,
        );
        timeouts.validate().map_err(|e| ConfigError::Invalid {
            key: "lava.server.jobs.timeout".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            host: config.require_str("lava.server.host")?,
            port: require_port(config, "lava.server.port")?,
            user: config.require_str("lava.server.user")?,
            token: config.require_str("lava.server.token")?,
            publisher_port: require_port(config, "lava.publisher.port")?,
            timeouts,
        })
    }

    /// Web UI root, without credentials
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// XML-RPC endpoint, without credentials
    pub fn rpc_url(&self) -> String {
        format!("{}/{}", self.base_url(), lava_protocol::RPC_PATH)
    }

    /// ZeroMQ publisher endpoint
    pub fn publisher_endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.publisher_port)
    }

    /// Web page of one (sub-)job
    pub fn job_url(&self, job: impl fmt::Display) -> String {
        format!("{}/scheduler/job/{}", self.base_url(), job)
    }

    pub fn job_timeout(&self) -> Duration {
        self.timeouts.job_timeout()
    }
}

impl fmt::Debug for SchedulerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("token", &"[REDACTED]")
            .field("publisher_port", &self.publisher_port)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Connection parameters for the artifact store
#[derive(Clone)]
pub struct StorageSettings {
    pub host: String,
    /// HTTP port the uploaded files are served on
    pub http_port: u16,
    pub sftp_port: u16,
    pub user: String,
    pub pass: Option<String>,
    /// Private key used instead of a password
    pub key_path: Option<String>,
    /// Directory on the storage host that uploads land in
    pub root: String,
    /// HTTP path the storage root is served under
    pub files_prefix: String,
    pub connect_timeout: Duration,
}

impl StorageSettings {
    pub const REQUIRED: [&'static str; 3] = ["lava.server.host", "lava.sftp.port", "lava.sftp.user"];

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        if let Some(missing) = Self::REQUIRED.iter().find(|key| !config.has(key)) {
            tracing::error!(parameter = %missing, "missing storage parameter");
            return Err(ConfigError::Missing(missing.to_string()));
        }

        let pass = config.get_str("lava.sftp.pass").map(str::to_string);
        let key_path = config.get_str("lava.sftp.key").map(str::to_string);
        if pass.is_none() && key_path.is_none() {
            tracing::error!(parameter = "lava.sftp.pass", "missing storage parameter");
            return Err(ConfigError::Missing("lava.sftp.pass".to_string()));
        }

        let connect = config
            .get_u64("lava.server.connect_timeout")?
            .unwrap_or(TimeoutConfig::default().connect_timeout_seconds);

        Ok(Self {
            host: config.require_str("lava.server.host")?,
            http_port: require_port(config, "lava.server.port")?,
            sftp_port: require_port(config, "lava.sftp.port")?,
            user: config.require_str("lava.sftp.user")?,
            pass,
            key_path,
            root: config
                .get_str("lava.storage.root")
                .unwrap_or("/data/lava-ftp")
                .trim_end_matches('/')
                .to_string(),
            files_prefix: config
                .get_str("lava.storage.files_prefix")
                .unwrap_or("lava-files")
                .trim_matches('/')
                .to_string(),
            connect_timeout: Duration::from_secs(connect),
        })
    }

    /// Base URL uploaded files are downloadable from
    pub fn download_base(&self) -> String {
        format!("http://{}:{}/{}", self.host, self.http_port, self.files_prefix)
    }
}

impl fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSettings")
            .field("host", &self.host)
            .field("http_port", &self.http_port)
            .field("sftp_port", &self.sftp_port)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "[REDACTED]"))
            .field("key_path", &self.key_path)
            .field("root", &self.root)
            .field("files_prefix", &self.files_prefix)
            .finish()
    }
}

fn require_port(config: &Config, key: &str) -> Result<u16, ConfigError> {
    let raw = config.require_u64(key)?;
    u16::try_from(raw)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{} is not a valid port", raw),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scheduler_config() -> Config {
        Config::load(
            None,
            None,
            Some(json!({
                "lava": {"server": {"host": "lava.local", "user": "ci", "token": "s3cret"}}
            })),
        )
        .unwrap()
    }

    #[test]
    fn test_scheduler_settings() {
        let settings = SchedulerSettings::from_config(&scheduler_config()).unwrap();
        assert_eq!(settings.rpc_url(), "http://lava.local:80/RPC2");
        assert_eq!(settings.publisher_endpoint(), "tcp://lava.local:5500");
        assert_eq!(settings.job_url(1235), "http://lava.local:80/scheduler/job/1235");
        assert_eq!(settings.job_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_scheduler_missing_parameter() {
        let config = Config::load(None, None, Some(json!({"lava": {"server": {"host": "h"}}}))).unwrap();
        match SchedulerSettings::from_config(&config) {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "lava.server.user"),
            other => panic!("expected missing user, got {:?}", other),
        }
    }

    #[test]
    fn test_env_completes_scheduler_settings() {
        let config = Config::load(None, None, Some(json!({"lava": {"server": {"host": "h"}}})))
            .unwrap()
            .with_env(|var| match var {
                "LAVA_USER" => Some("env-user".to_string()),
                "LAVA_TOKEN" => Some("env-token".to_string()),
                _ => None,
            });
        let settings = SchedulerSettings::from_config(&config).unwrap();
        assert_eq!(settings.user, "env-user");
        assert_eq!(settings.token, "env-token");
    }

    #[test]
    fn test_debug_hides_token() {
        let settings = SchedulerSettings::from_config(&scheduler_config()).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_invalid_port() {
        let mut config = scheduler_config();
        config.set("lava.publisher.port", json!(70000)).unwrap();
        assert!(matches!(
            SchedulerSettings::from_config(&config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_storage_settings() {
        let mut config = scheduler_config();
        config.set("lava.sftp.user", json!("ftp")).unwrap();
        config.set("lava.sftp.pass", json!("pw")).unwrap();
        config.set("lava.server.port", json!(2041)).unwrap();

        let settings = StorageSettings::from_config(&config).unwrap();
        assert_eq!(settings.sftp_port, 22);
        assert_eq!(settings.root, "/data/lava-ftp");
        assert_eq!(settings.download_base(), "http://lava.local:2041/lava-files");
        assert!(!format!("{:?}", settings).contains("pw\""));
    }

    #[test]
    fn test_storage_requires_a_credential() {
        let mut config = scheduler_config();
        config.set("lava.sftp.user", json!("ftp")).unwrap();
        assert!(matches!(
            StorageSettings::from_config(&config),
            Err(ConfigError::Missing(key)) if key == "lava.sftp.pass"
        ));

        config.set("lava.sftp.key", json!("/home/ci/.ssh/id_ed25519")).unwrap();
        assert!(StorageSettings::from_config(&config).is_ok());
    }
}
