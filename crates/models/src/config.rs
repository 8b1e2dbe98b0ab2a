use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub docker: DockerConfig,
    pub image: ImageConfig,
    pub data: DataConfig,
    pub run: RunConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields, default)]
pub struct DockerConfig {
    /// Empty means `DOCKER_HOST` or the local socket.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ImageConfig {
    pub repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DataConfig {
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct RunConfig {
    pub host_ip: String,
    pub stop_grace_secs: u64,
    pub ready_timeout_ms: u64,
    /// HTTP path probed once the port accepts connections, e.g. `/health`.
    pub health_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: "bootspec".to_string(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host_ip: crate::ports::DEFAULT_HOST_IP.to_string(),
            stop_grace_secs: 10,
            ready_timeout_ms: 30000,
            health_path: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
