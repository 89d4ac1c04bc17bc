use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SprocketError};

pub const DEFAULT_HTTP_HOST: &str = "localhost";
pub const DEFAULT_HTTP_PORT: u16 = 9091;
pub const DEFAULT_RPC_PATH: &str = "/transmission/rpc";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client name and protocol range declared during the socket handshake.
pub const HANDSHAKE_LABEL: &str = "sprocket";
pub const PROTOCOL_MIN: i64 = 1;
pub const PROTOCOL_MAX: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Socket,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    pub socket_path: PathBuf,
    pub tcp_addr: Option<String>,
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Config {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            mode: Mode::Http,
            socket_path: default_socket_path(),
            tcp_addr: None,
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Endpoint for the binary-socket transport, resolved once at startup.
#[derive(Debug, Clone)]
pub enum SocketEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir()
        .ok_or_else(|| SprocketError::Config("cannot determine configuration directory".into()))?;
    path.push("sprocket");
    path.push("config.toml");
    Ok(path)
}

pub fn load_or_default(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let config_path = if let Some(path) = path {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        path
    } else {
        default_config_path()?
    };

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let cfg: Config = toml::from_str(&contents)?;
        Ok((cfg, config_path))
    } else {
        let cfg = Config::default();
        cfg.save(&config_path)?;
        Ok((cfg, config_path))
    }
}

impl Config {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn socket_endpoint(&self) -> SocketEndpoint {
        match &self.tcp_addr {
            Some(addr) => SocketEndpoint::Tcp(addr.clone()),
            None => SocketEndpoint::Unix(self.socket_path.clone()),
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, DEFAULT_RPC_PATH)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_socket_path() -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(".transmission/daemon/socket");
    };
    home.join(".transmission").join("daemon").join("socket")
}
