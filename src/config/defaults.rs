//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Scheduler HTTP port (default: 80)
    pub server_port: u16,

    /// Event publisher port (default: 5500)
    pub publisher_port: u16,

    /// Blocking submission timeout in seconds (default: 3600)
    pub job_timeout_seconds: u64,

    /// Connect timeout for RPC and storage sessions (default: 30)
    pub connect_timeout_seconds: u64,

    /// SFTP port of the artifact store (default: 22)
    pub sftp_port: u16,

    /// Directory on the storage host that uploads land in
    pub storage_root: String,

    /// HTTP path under which the storage root is served
    pub files_prefix: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            server_port: 80,
            publisher_port: 5500,
            job_timeout_seconds: 3600,
            connect_timeout_seconds: 30,
            sftp_port: 22,
            storage_root: "/data/lava-ftp".to_string(),
            files_prefix: "lava-files".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a JSON tree for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "lava": {
                "server": {
                    "port": self.server_port,
                    "connect_timeout": self.connect_timeout_seconds,
                    "jobs": {
                        "timeout": self.job_timeout_seconds
                    }
                },
                "publisher": {
                    "port": self.publisher_port
                },
                "sftp": {
                    "port": self.sftp_port
                },
                "storage": {
                    "root": self.storage_root,
                    "files_prefix": self.files_prefix
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.server_port, 80);
        assert_eq!(defaults.publisher_port, 5500);
        assert_eq!(defaults.job_timeout_seconds, 3600);
        assert_eq!(defaults.sftp_port, 22);
        assert_eq!(defaults.storage_root, "/data/lava-ftp");
    }

    #[test]
    fn test_to_value_layout() {
        let value = BuiltinDefaults::default().to_value();
        assert_eq!(value["lava"]["server"]["port"], 80);
        assert_eq!(value["lava"]["server"]["jobs"]["timeout"], 3600);
        assert_eq!(value["lava"]["publisher"]["port"], 5500);
        assert_eq!(value["lava"]["storage"]["files_prefix"], "lava-files");
        assert!(value["lava"]["server"].get("host").is_none());
    }
}
