use hookflow_core::config::default_history_path;
use hookflow_core::{DispatchConfig, HistoryConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub rpc_port: u16,
    pub http_port: u16,
    pub instance_id: String,
    pub dispatch: DispatchConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    dispatch: DispatchSection,
    #[serde(default)]
    history: HistorySection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_rpc_port")]
    rpc_port: u16,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default)]
    instance_id: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            rpc_port: default_rpc_port(),
            http_port: default_http_port(),
            instance_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DispatchSection {
    #[serde(with = "humantime_serde", default = "default_dequeue_wait")]
    dequeue_wait: Duration,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            dequeue_wait: default_dequeue_wait(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistorySection {
    #[serde(default = "default_history_path")]
    path: PathBuf,
    #[serde(with = "humantime_serde", default = "default_history_max_age")]
    max_age: Duration,
    #[serde(default = "default_history_max_size_bytes")]
    max_size_bytes: u64,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            max_age: default_history_max_age(),
            max_size_bytes: default_history_max_size_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_rpc_port() -> u16 {
    50051
}

fn default_http_port() -> u16 {
    8081
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_dequeue_wait() -> Duration {
    DispatchConfig::default().dequeue_wait
}

fn default_history_max_age() -> Duration {
    HistoryConfig::default().max_age
}

fn default_history_max_size_bytes() -> u64 {
    HistoryConfig::default().max_size_bytes
}

impl From<FileConfig> for ServerConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            host: file.server.host,
            rpc_port: file.server.rpc_port,
            http_port: file.server.http_port,
            instance_id: file.server.instance_id.unwrap_or_else(default_instance_id),
            dispatch: DispatchConfig {
                dequeue_wait: file.dispatch.dequeue_wait,
            },
            history: HistoryConfig {
                path: file.history.path,
                max_age: file.history.max_age,
                max_size_bytes: file.history.max_size_bytes,
                ..HistoryConfig::default()
            },
        }
    }
}

impl ServerConfig {
    /// Load from `HOOKFLOW_CONFIG` (or `./hookflow.toml`) when present,
    /// otherwise from `HOOKFLOW_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Ok(file_config.into());
        }

        Self::from_env()
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let parsed: FileConfig = toml::from_str(contents)
            .map_err(|err| anyhow::anyhow!("Failed to parse config: {}", err))?;
        Ok(parsed.into())
    }

    fn from_env() -> anyhow::Result<Self> {
        let host = env::var("HOOKFLOW_HOST").unwrap_or_else(|_| default_host());
        let rpc_port = env_parse("HOOKFLOW_RPC_PORT")?.unwrap_or_else(default_rpc_port);
        let http_port = env_parse("HOOKFLOW_HTTP_PORT")?.unwrap_or_else(default_http_port);
        let instance_id = env::var("HOOKFLOW_INSTANCE_ID")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_instance_id);

        let dequeue_wait = env_duration("HOOKFLOW_DEQUEUE_WAIT_TIME")?.unwrap_or_else(default_dequeue_wait);
        let history_path = env::var("HOOKFLOW_HISTORY_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_history_path);
        let max_age = env_duration("HOOKFLOW_HISTORY_MAX_AGE")?.unwrap_or_else(default_history_max_age);
        let max_size_bytes =
            env_parse("HOOKFLOW_HISTORY_MAX_SIZE_BYTES")?.unwrap_or_else(default_history_max_size_bytes);

        Ok(Self {
            host,
            rpc_port,
            http_port,
            instance_id,
            dispatch: DispatchConfig { dequeue_wait },
            history: HistoryConfig {
                path: history_path,
                max_age,
                max_size_bytes,
                ..HistoryConfig::default()
            },
        })
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("Invalid {}={}: {}", key, value, err)),
        _ => Ok(None),
    }
}

fn env_duration(key: &str) -> anyhow::Result<Option<Duration>> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => humantime::parse_duration(value.trim())
            .map(Some)
            .map_err(|err| anyhow::anyhow!("Invalid {}={}: {}", key, value, err)),
        _ => Ok(None),
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("HOOKFLOW_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("hookflow.toml").exists() {
        Some("hookflow.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}
