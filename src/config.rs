// src/config.rs
use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::path::Path;

/// Engine configuration, constructed once in `main` and handed to every
/// component constructor. Components never read the process environment
/// themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    pub exchanges: ExchangesConfig,

    /// Trade/order store
    pub database: DatabaseConfig,

    /// Retry policy for adapter calls
    pub retry: RetrySettings,

    /// Guard gate settings
    pub guard: GuardSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Credentials per supported exchange; an exchange without credentials gets
/// no adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangesConfig {
    pub binance: Option<BinanceCredentials>,
    pub okx: Option<OkxCredentials>,
    pub bybit: Option<BybitCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// Override for testnet use
    pub spot_base_url: Option<String>,
    pub futures_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Feature flag consulted by the guard gate, if any
    pub feature_key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> ExecutionResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let binance = match (env::var("BINANCE_API_KEY"), env::var("BINANCE_API_SECRET")) {
            (Ok(api_key), Ok(api_secret)) => Some(BinanceCredentials {
                api_key,
                api_secret,
                spot_base_url: env::var("BINANCE_SPOT_URL").ok(),
                futures_base_url: env::var("BINANCE_FUTURES_URL").ok(),
            }),
            _ => None,
        };

        let okx = match (
            env::var("OKX_API_KEY"),
            env::var("OKX_API_SECRET"),
            env::var("OKX_PASSPHRASE"),
        ) {
            (Ok(api_key), Ok(api_secret), Ok(passphrase)) => Some(OkxCredentials {
                api_key,
                api_secret,
                passphrase,
                base_url: env::var("OKX_BASE_URL").ok(),
            }),
            _ => None,
        };

        let bybit = match (env::var("BYBIT_API_KEY"), env::var("BYBIT_API_SECRET")) {
            (Ok(api_key), Ok(api_secret)) => Some(BybitCredentials {
                api_key,
                api_secret,
                base_url: env::var("BYBIT_BASE_URL").ok(),
            }),
            _ => None,
        };

        let parse_or = |name: &str, default: u64| -> u64 {
            env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Ok(Config {
            exchanges: ExchangesConfig { binance, okx, bybit },
            database: DatabaseConfig {
                path: env::var("DATABASE_PATH").unwrap_or_else(|_| "trade_engine.db".to_string()),
            },
            retry: RetrySettings {
                max_attempts: parse_or("RETRY_MAX_ATTEMPTS", 3) as u32,
                base_delay_ms: parse_or("RETRY_BASE_DELAY_MS", 1000),
                max_delay_ms: parse_or("RETRY_MAX_DELAY_MS", 10000),
            },
            guard: GuardSettings {
                feature_key: env::var("GUARD_FEATURE_KEY").ok(),
            },
            logging: LoggingConfig {
                level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                to_file: env::var("LOG_TO_FILE")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                file_path: env::var("LOG_FILE_PATH").ok(),
            },
        })
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ExecutionResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!("Failed to read config file: {}", e),
            )
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!("Failed to parse config file: {}", e),
            )
        })
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> ExecutionResult<()> {
        let mut builder = env_logger::Builder::new();

        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    ExecutionError::with_message(
                        ErrorKind::ValidationError,
                        format!("Failed to create log file: {}", e),
                    )
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: ExchangesConfig::default(),
            database: DatabaseConfig {
                path: "trade_engine.db".to_string(),
            },
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 1000,
                max_delay_ms: 10000,
            },
            guard: GuardSettings { feature_key: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}
