// src/main.rs
mod application;
mod config;
mod domain;
mod infrastructure;

use crate::application::dto::{ErrorBody, ExecuteTradeRequest, ExecuteTradeResponse};
use crate::application::guard::GuardGate;
use crate::application::retry::RetryPolicy;
use crate::application::usecase::TradeExecutor;
use crate::config::Config;
use crate::domain::errors::ExecutionResult;
use crate::domain::models::ExchangePlatform;
use crate::domain::repository::ExchangeAdapter;
use crate::infrastructure::exchange::{
    BinanceAdapter, BinanceConfig, BybitAdapter, BybitConfig, OkxAdapter, OkxConfig,
};
use crate::infrastructure::guard::SqliteGuardStore;
use crate::infrastructure::persistence::SqliteTradeStore;

use std::collections::HashMap;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.init_logging() {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("Starting trade_engine v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(response) => {
            match serde_json::to_string_pretty(&response) {
                Ok(body) => println!("{}", body),
                Err(e) => {
                    eprintln!("failed to serialize response: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let (status, body) = ErrorBody::from_error(&e);
            log::error!("execution failed ({}): {}", status, e);
            if let Ok(body) = serde_json::to_string_pretty(&body) {
                println!("{}", body);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> ExecutionResult<ExecuteTradeResponse> {
    let request = read_request()?;

    let store = Arc::new(SqliteTradeStore::open(&config.database.path)?);
    let guard_store = Arc::new(SqliteGuardStore::open(&config.database.path)?);
    guard_store.bootstrap()?;

    let adapters = build_adapters(config)?;
    log::info!(
        "configured adapters: {}",
        adapters
            .keys()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let executor = TradeExecutor::new(
        adapters.clone(),
        store,
        GuardGate::new(guard_store),
        RetryPolicy::new(
            config.retry.max_attempts,
            Duration::from_millis(config.retry.base_delay_ms),
            Duration::from_millis(config.retry.max_delay_ms),
        ),
        config.guard.feature_key.clone(),
    );

    // The CLI is a service-role caller: the owning user comes from the
    // request body, not a session.
    let platform = request.platform.clone();
    let order_type = request.order_type.clone();
    let domain_request = request.into_domain(None)?;

    log_quote_balance(&adapters, &domain_request).await;

    let report = executor.execute(domain_request).await?;

    Ok(ExecuteTradeResponse::from_report(&report, &platform, &order_type))
}

/// Pre-flight visibility: log the free quote balance for the request's
/// exchange. Purely informational, never blocks execution.
async fn log_quote_balance(
    adapters: &HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>>,
    request: &crate::domain::models::TradeExecutionRequest,
) {
    let Some(adapter) = adapters.get(&request.platform) else {
        return;
    };
    let quote = request.symbol.split(['/', '-']).nth(1).unwrap_or("USDT");
    match adapter.balance(quote).await {
        Ok(balance) => log::info!("{} free balance on {}: {}", quote, request.platform, balance),
        Err(e) => log::warn!("balance check on {} failed: {}", request.platform, e),
    }
}

/// Read the execution request JSON from the file given as the first
/// argument, or from stdin when the argument is absent or "-".
fn read_request() -> ExecutionResult<ExecuteTradeRequest> {
    let arg = std::env::args().nth(1);
    let raw = match arg.as_deref() {
        Some("-") | None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).map_err(|e| {
                crate::domain::errors::ExecutionError::with_message(
                    crate::domain::errors::ErrorKind::ValidationError,
                    format!("failed to read request from stdin: {}", e),
                )
            })?;
            buffer
        }
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            crate::domain::errors::ExecutionError::with_message(
                crate::domain::errors::ErrorKind::ValidationError,
                format!("failed to read request file {}: {}", path, e),
            )
        })?,
    };

    serde_json::from_str(&raw).map_err(|e| {
        crate::domain::errors::ExecutionError::with_message(
            crate::domain::errors::ErrorKind::ValidationError,
            format!("invalid request JSON: {}", e),
        )
    })
}

/// Build one adapter per exchange with configured credentials.
fn build_adapters(
    config: &Config,
) -> ExecutionResult<HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>>> {
    let mut adapters: HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>> = HashMap::new();

    if let Some(creds) = &config.exchanges.binance {
        let mut adapter_config = BinanceConfig {
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            ..Default::default()
        };
        if let Some(url) = &creds.spot_base_url {
            adapter_config.spot_base_url = url.clone();
        }
        if let Some(url) = &creds.futures_base_url {
            adapter_config.futures_base_url = url.clone();
        }
        adapters.insert(
            ExchangePlatform::Binance,
            Arc::new(BinanceAdapter::new(adapter_config)?),
        );
    }

    if let Some(creds) = &config.exchanges.okx {
        let mut adapter_config = OkxConfig {
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            passphrase: creds.passphrase.clone(),
            ..Default::default()
        };
        if let Some(url) = &creds.base_url {
            adapter_config.base_url = url.clone();
        }
        adapters.insert(ExchangePlatform::Okx, Arc::new(OkxAdapter::new(adapter_config)?));
    }

    if let Some(creds) = &config.exchanges.bybit {
        let mut adapter_config = BybitConfig {
            api_key: creds.api_key.clone(),
            api_secret: creds.api_secret.clone(),
            ..Default::default()
        };
        if let Some(url) = &creds.base_url {
            adapter_config.base_url = url.clone();
        }
        adapters.insert(ExchangePlatform::Bybit, Arc::new(BybitAdapter::new(adapter_config)?));
    }

    Ok(adapters)
}
