// src/infrastructure/exchange/binance.rs
// Binance adapter: spot and USDT-margined futures REST endpoints with
// HMAC-SHA256 query-string signing.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::models::{
    ConditionalKind, ConditionalOrderRequest, ExchangePlatform, MarketType, OrderKind,
    OrderRequest, OrderResponse, OrderStatus, SymbolRules,
};
use crate::domain::repository::ExchangeAdapter;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_key: String,
    pub api_secret: String,
    pub spot_base_url: String,
    pub futures_base_url: String,
    pub recv_window_ms: u64,
    pub timeout_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            spot_base_url: "https://api.binance.com".to_string(),
            futures_base_url: "https://fapi.binance.com".to_string(),
            recv_window_ms: 5000,
            timeout_ms: 10000,
        }
    }
}

pub struct BinanceAdapter {
    config: BinanceConfig,
    client: Client,
}

impl BinanceAdapter {
    pub fn new(config: BinanceConfig) -> ExecutionResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExecutionError::with_message(ErrorKind::Internal, e.to_string()))?;
        Ok(Self { config, client })
    }

    /// "BTC/USDT" -> "BTCUSDT"
    fn native_symbol(symbol: &str) -> String {
        symbol.replace(['/', '-'], "").to_uppercase()
    }

    fn base_url(&self, market: MarketType) -> &str {
        match market {
            MarketType::Spot => &self.config.spot_base_url,
            MarketType::Futures => &self.config.futures_base_url,
        }
    }

    fn order_path(market: MarketType) -> &'static str {
        match market {
            MarketType::Spot => "/api/v3/order",
            MarketType::Futures => "/fapi/v1/order",
        }
    }

    fn sign(&self, query: &str) -> ExecutionResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExecutionError::with_message(ErrorKind::ApiKeyInvalid, e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn public_request(
        &self,
        market: MarketType,
        path: &str,
        params: &[(&str, String)],
    ) -> ExecutionResult<Value> {
        let url = format!("{}{}?{}", self.base_url(market), path, Self::encode_query(params));
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn signed_request(
        &self,
        method: Method,
        market: MarketType,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExecutionResult<Value> {
        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        let query = Self::encode_query(&params);
        let signature = self.sign(&query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url(market),
            path,
            query,
            signature
        );

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.config.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: reqwest::Response) -> ExecutionResult<Value> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(ExecutionError::from);
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExecutionError::with_message(
                ErrorKind::RateLimited,
                format!("Binance rate limit: {}", body),
            ));
        }

        if let Ok(parsed) = serde_json::from_str::<Value>(&body) {
            let code = parsed["code"].as_i64().unwrap_or(0);
            let message = parsed["msg"].as_str().unwrap_or("unknown error");
            return Err(translate_binance_error(code, message));
        }

        if status.is_server_error() {
            return Err(ExecutionError::with_message(
                ErrorKind::ExchangeUnavailable,
                format!("Binance returned {}", status),
            ));
        }
        Err(ExecutionError::with_message(
            ErrorKind::Internal,
            format!("Binance returned {}: {}", status, body),
        ))
    }

    fn decimal_field(value: &Value, field: &str) -> Option<Decimal> {
        value[field]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .filter(|d| *d > Decimal::ZERO)
    }

    fn parse_order_ack(&self, value: &Value) -> ExecutionResult<OrderResponse> {
        let platform_order_id = value["orderId"]
            .as_u64()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::OrderPlacementFailed,
                    "Binance response missing orderId",
                )
            })?;

        let status = value["status"]
            .as_str()
            .map(map_order_status)
            .unwrap_or(OrderStatus::Pending);
        let filled = Self::decimal_field(value, "executedQty").unwrap_or(Decimal::ZERO);

        // Spot reports cumulative quote volume; futures reports avgPrice.
        let average_price = Self::decimal_field(value, "avgPrice").or_else(|| {
            Self::decimal_field(value, "cummulativeQuoteQty")
                .filter(|_| filled > Decimal::ZERO)
                .map(|quote| quote / filled)
        });

        Ok(OrderResponse {
            platform_order_id,
            client_order_id: value["clientOrderId"].as_str().map(str::to_string),
            status,
            filled_quantity: filled,
            average_price,
            timestamp: value["transactTime"]
                .as_i64()
                .or_else(|| value["updateTime"].as_i64())
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }
}

/// Map a native Binance error code onto the unified taxonomy.
pub fn translate_binance_error(code: i64, message: &str) -> ExecutionError {
    let kind = match code {
        -1003 => ErrorKind::RateLimited,
        -1013 => ErrorKind::BelowMinNotional,
        -1021 => ErrorKind::ExchangeAuthFailed,
        -1111 => ErrorKind::PrecisionFailed,
        -1121 => ErrorKind::SymbolUnsupported,
        -2010 => ErrorKind::InsufficientBalance,
        -2011 => ErrorKind::OrderCancelFailed,
        -2014 | -2015 => ErrorKind::ApiKeyInvalid,
        -4028 => ErrorKind::InvalidLeverage,
        _ => ErrorKind::Internal,
    };
    ExecutionError::with_message(kind, format!("Binance error {}: {}", code, message))
        .details(serde_json::json!({ "exchange": "binance", "native_code": code }))
}

fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" | "PENDING_NEW" => OrderStatus::Pending,
        "FILLED" => OrderStatus::Filled,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Failed,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::Pending,
    }
}

fn parse_symbol_rules(symbol_info: &Value) -> ExecutionResult<SymbolRules> {
    let filters = symbol_info["filters"].as_array().ok_or_else(|| {
        ExecutionError::with_message(ErrorKind::SymbolInfoFailed, "missing filters array")
    })?;

    let mut step_size = None;
    let mut min_qty = None;
    let mut tick_size = None;

    for filter in filters {
        match filter["filterType"].as_str() {
            Some("LOT_SIZE") => {
                step_size = filter["stepSize"].as_str().and_then(|s| Decimal::from_str(s).ok());
                min_qty = filter["minQty"].as_str().and_then(|s| Decimal::from_str(s).ok());
            }
            Some("PRICE_FILTER") => {
                tick_size = filter["tickSize"].as_str().and_then(|s| Decimal::from_str(s).ok());
            }
            _ => {}
        }
    }

    match (step_size, tick_size, min_qty) {
        (Some(step), Some(tick), Some(min)) => Ok(SymbolRules::from_steps(step, tick, min)),
        _ => Err(ExecutionError::with_message(
            ErrorKind::SymbolInfoFailed,
            "incomplete LOT_SIZE/PRICE_FILTER filters",
        )),
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn platform(&self) -> ExchangePlatform {
        ExchangePlatform::Binance
    }

    async fn symbol_rules(&self, symbol: &str, market: MarketType) -> ExecutionResult<SymbolRules> {
        let native = Self::native_symbol(symbol);
        let path = match market {
            MarketType::Spot => "/api/v3/exchangeInfo",
            MarketType::Futures => "/fapi/v1/exchangeInfo",
        };
        let value = self
            .public_request(market, path, &[("symbol", native.clone())])
            .await?;

        let symbols = value["symbols"].as_array().ok_or_else(|| {
            ExecutionError::with_message(ErrorKind::SymbolInfoFailed, "missing symbols array")
        })?;
        let info = symbols
            .iter()
            .find(|s| s["symbol"].as_str() == Some(native.as_str()))
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::SymbolUnsupported,
                    format!("{} is not listed on Binance", native),
                )
            })?;
        parse_symbol_rules(info)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecutionResult<()> {
        let params = vec![
            ("symbol", Self::native_symbol(symbol)),
            ("leverage", leverage.to_string()),
        ];
        self.signed_request(Method::POST, MarketType::Futures, "/fapi/v1/leverage", params)
            .await
            .map_err(|e| {
                if e.kind == ErrorKind::Internal {
                    ExecutionError::with_message(ErrorKind::LeverageSetFailed, e.message)
                } else {
                    e
                }
            })?;
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExecutionResult<OrderResponse> {
        let mut params = vec![
            ("symbol", Self::native_symbol(&request.symbol)),
            ("side", request.side.as_str().to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];
        match request.kind {
            OrderKind::Market => params.push(("type", "MARKET".to_string())),
            OrderKind::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExecutionError::with_message(ErrorKind::InvalidPrice, "limit order without price")
                })?;
                params.push(("type", "LIMIT".to_string()));
                params.push(("price", price.normalize().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        let value = self
            .signed_request(Method::POST, request.market, Self::order_path(request.market), params)
            .await?;
        self.parse_order_ack(&value)
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> ExecutionResult<OrderResponse> {
        let order_type = match (request.market, request.kind, request.limit_price.is_some()) {
            (MarketType::Spot, ConditionalKind::StopLoss, false) => "STOP_LOSS",
            (MarketType::Spot, ConditionalKind::StopLoss, true) => "STOP_LOSS_LIMIT",
            (MarketType::Spot, ConditionalKind::TakeProfit, false) => "TAKE_PROFIT",
            (MarketType::Spot, ConditionalKind::TakeProfit, true) => "TAKE_PROFIT_LIMIT",
            (MarketType::Futures, ConditionalKind::StopLoss, false) => "STOP_MARKET",
            (MarketType::Futures, ConditionalKind::StopLoss, true) => "STOP",
            (MarketType::Futures, ConditionalKind::TakeProfit, false) => "TAKE_PROFIT_MARKET",
            (MarketType::Futures, ConditionalKind::TakeProfit, true) => "TAKE_PROFIT",
        };

        let mut params = vec![
            ("symbol", Self::native_symbol(&request.symbol)),
            ("side", request.side.as_str().to_string()),
            ("type", order_type.to_string()),
            ("quantity", request.quantity.normalize().to_string()),
            ("stopPrice", request.trigger_price.normalize().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];
        if let Some(limit) = request.limit_price {
            params.push(("price", limit.normalize().to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if request.market == MarketType::Futures {
            params.push(("reduceOnly", "true".to_string()));
        }

        let value = self
            .signed_request(Method::POST, request.market, Self::order_path(request.market), params)
            .await?;
        self.parse_order_ack(&value)
    }

    async fn cancel_open_orders(&self, symbol: &str, market: MarketType) -> ExecutionResult<u32> {
        let params = vec![("symbol", Self::native_symbol(symbol))];
        let path = match market {
            MarketType::Spot => "/api/v3/openOrders",
            MarketType::Futures => "/fapi/v1/allOpenOrders",
        };
        let value = self
            .signed_request(Method::DELETE, market, path, params)
            .await
            .map_err(|e| {
                if e.kind == ErrorKind::Internal {
                    ExecutionError::with_message(ErrorKind::OrderCancelFailed, e.message)
                } else {
                    e
                }
            })?;
        Ok(value.as_array().map(|orders| orders.len() as u32).unwrap_or(0))
    }

    async fn balance(&self, asset: &str) -> ExecutionResult<Decimal> {
        let value = self
            .signed_request(Method::GET, MarketType::Spot, "/api/v3/account", Vec::new())
            .await
            .map_err(|e| {
                if e.kind == ErrorKind::Internal {
                    ExecutionError::with_message(ErrorKind::BalanceCheckFailed, e.message)
                } else {
                    e
                }
            })?;

        let balances = value["balances"].as_array().ok_or_else(|| {
            ExecutionError::with_message(ErrorKind::BalanceCheckFailed, "missing balances array")
        })?;
        let free = balances
            .iter()
            .find(|b| b["asset"].as_str() == Some(asset))
            .and_then(|b| b["free"].as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        Ok(free)
    }

    async fn order_status(
        &self,
        symbol: &str,
        market: MarketType,
        platform_order_id: &str,
    ) -> ExecutionResult<OrderResponse> {
        let params = vec![
            ("symbol", Self::native_symbol(symbol)),
            ("orderId", platform_order_id.to_string()),
        ];
        let value = self
            .signed_request(Method::GET, market, Self::order_path(market), params)
            .await?;
        self.parse_order_ack(&value)
    }
}
