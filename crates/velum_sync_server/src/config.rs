use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::room::RoomTimings;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3030)
    pub port: u16,
    /// Database file path (default: ./velum.db)
    pub database_path: PathBuf,
    /// Quiet period before buffered edits are flushed (default: 2000ms)
    pub debounce_ms: u64,
    /// Window for folding a flush into the previous version (default: 5000ms)
    pub merge_window_ms: u64,
    /// Grace period before an empty room is archived (default: 5000ms)
    pub archive_delay_ms: u64,
    /// A full-state snapshot is written after every N edits (default: 50)
    pub snapshot_interval: i64,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3030".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path =
            PathBuf::from(env::var("DATABASE_PATH").unwrap_or_else(|_| "./velum.db".to_string()));

        let debounce_ms = env::var("DEBOUNCE_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        let merge_window_ms = env::var("MERGE_WINDOW_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        let archive_delay_ms = env::var("ARCHIVE_DELAY_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        let snapshot_interval = env::var("SNAPSHOT_INTERVAL")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            debounce_ms,
            merge_window_ms,
            archive_delay_ms,
            snapshot_interval,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Room timing knobs derived from this configuration
    pub fn room_timings(&self) -> RoomTimings {
        RoomTimings {
            debounce: Duration::from_millis(self.debounce_ms),
            merge_window: Duration::from_millis(self.merge_window_ms),
            drain_delay: Duration::from_millis(self.archive_delay_ms),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
        }
    }
}

impl std::error::Error for ConfigError {}
