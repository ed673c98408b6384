//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::db::DbConfig;
use crate::error::StartupError;
use crate::logging::LogConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Image Store directory, also served as static files.
    pub static_dir: PathBuf,
    pub max_body_bytes: usize,
    pub db: DbConfig,
    pub log: LogConfig,
}

impl AppConfig {
    pub fn addr(&self) -> Result<SocketAddr, StartupError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| StartupError::Config(format!("invalid HOST/PORT: {}", e)))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            static_dir: std::env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25 * 1024 * 1024),
            db: DbConfig::default(),
            log: LogConfig::default(),
        }
    }
}
