// src/infrastructure/exchange/bybit.rs
// Bybit adapter: V5 unified REST endpoints with HMAC-SHA256 signing in the
// X-BAPI-* header scheme.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::models::{
    ConditionalKind, ConditionalOrderRequest, ExchangePlatform, MarketType, OrderKind,
    OrderRequest, OrderResponse, OrderSide, OrderStatus, SymbolRules,
};
use crate::domain::repository::ExchangeAdapter;

#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub recv_window_ms: u64,
    pub timeout_ms: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            base_url: "https://api.bybit.com".to_string(),
            recv_window_ms: 5000,
            timeout_ms: 10000,
        }
    }
}

pub struct BybitAdapter {
    config: BybitConfig,
    client: Client,
}

impl BybitAdapter {
    pub fn new(config: BybitConfig) -> ExecutionResult<Self> {
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

    fn category(market: MarketType) -> &'static str {
        match market {
            MarketType::Spot => "spot",
            MarketType::Futures => "linear",
        }
    }

    /// Signature payload is timestamp + api_key + recv_window + either the
    /// query string (GET) or the JSON body (POST).
    fn sign(&self, timestamp: i64, payload: &str) -> ExecutionResult<String> {
        let prehash = format!(
            "{}{}{}{}",
            timestamp, self.config.api_key, self.config.recv_window_ms, payload
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExecutionError::with_message(ErrorKind::ApiKeyInvalid, e.to_string()))?;
        mac.update(prehash.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<Value>,
        signed: bool,
    ) -> ExecutionResult<Value> {
        let url = match query {
            Some(q) => format!("{}{}?{}", self.config.base_url, path, q),
            None => format!("{}{}", self.config.base_url, path),
        };
        let body_text = body.map(|b| b.to_string());

        let mut builder = self.client.request(method, &url);

        if signed {
            let timestamp = Utc::now().timestamp_millis();
            let payload = body_text.as_deref().or(query).unwrap_or("");
            let signature = self.sign(timestamp, payload)?;
            builder = builder
                .header("X-BAPI-API-KEY", &self.config.api_key)
                .header("X-BAPI-TIMESTAMP", timestamp.to_string())
                .header("X-BAPI-SIGN", signature)
                .header("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string());
        }

        if let Some(text) = body_text {
            builder = builder.header("Content-Type", "application/json").body(text);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExecutionError::with_message(
                ErrorKind::RateLimited,
                format!("Bybit rate limit: {}", text),
            ));
        }
        if status.is_server_error() {
            return Err(ExecutionError::with_message(
                ErrorKind::ExchangeUnavailable,
                format!("Bybit returned {}", status),
            ));
        }

        let value: Value = serde_json::from_str(&text)?;
        let ret_code = value["retCode"].as_i64().unwrap_or(0);
        if ret_code != 0 {
            let message = value["retMsg"].as_str().unwrap_or("unknown error");
            return Err(translate_bybit_error(ret_code, message));
        }
        Ok(value)
    }
}

/// Map a native Bybit retCode onto the unified taxonomy.
pub fn translate_bybit_error(code: i64, message: &str) -> ExecutionError {
    let kind = match code {
        10006 | 10018 => ErrorKind::TooManyRequests,
        10002 => ErrorKind::ExchangeAuthFailed,
        10003 | 10004 | 10005 => ErrorKind::ApiKeyInvalid,
        10016 => ErrorKind::ExchangeUnavailable,
        110007 | 170131 => ErrorKind::InsufficientBalance,
        170136 | 170140 => ErrorKind::QuantityTooSmall,
        170134 => ErrorKind::PrecisionFailed,
        110043 => ErrorKind::LeverageSetFailed,
        10001 => ErrorKind::ValidationError,
        _ => ErrorKind::Internal,
    };
    ExecutionError::with_message(kind, format!("Bybit error {}: {}", code, message))
        .details(json!({ "exchange": "bybit", "native_code": code }))
}

fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "New" | "Created" | "Untriggered" => OrderStatus::Pending,
        "Filled" => OrderStatus::Filled,
        "PartiallyFilled" => OrderStatus::PartiallyFilled,
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => OrderStatus::Cancelled,
        "Rejected" => OrderStatus::Failed,
        "Expired" => OrderStatus::Expired,
        _ => OrderStatus::Pending,
    }
}

fn parse_instrument_rules(instrument: &Value) -> ExecutionResult<SymbolRules> {
    let lot = &instrument["lotSizeFilter"];
    // Linear contracts expose qtyStep; spot instruments expose basePrecision.
    let step = lot["qtyStep"]
        .as_str()
        .or_else(|| lot["basePrecision"].as_str())
        .and_then(|s| Decimal::from_str(s).ok());
    let min_qty = lot["minOrderQty"].as_str().and_then(|s| Decimal::from_str(s).ok());
    let tick = instrument["priceFilter"]["tickSize"]
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok());

    match (step, tick, min_qty) {
        (Some(step), Some(tick), Some(min)) => Ok(SymbolRules::from_steps(step, tick, min)),
        _ => Err(ExecutionError::with_message(
            ErrorKind::SymbolInfoFailed,
            "instrument missing lotSizeFilter/priceFilter",
        )),
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn platform(&self) -> ExchangePlatform {
        ExchangePlatform::Bybit
    }

    async fn symbol_rules(&self, symbol: &str, market: MarketType) -> ExecutionResult<SymbolRules> {
        let query = format!(
            "category={}&symbol={}",
            Self::category(market),
            Self::native_symbol(symbol)
        );
        let value = self
            .request(Method::GET, "/v5/market/instruments-info", Some(&query), None, false)
            .await?;

        let instrument = value["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::SymbolUnsupported,
                    format!("{} is not listed on Bybit", symbol),
                )
            })?;
        parse_instrument_rules(instrument)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecutionResult<()> {
        let body = json!({
            "category": "linear",
            "symbol": Self::native_symbol(symbol),
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self
            .request(Method::POST, "/v5/position/set-leverage", None, Some(body), true)
            .await
        {
            Ok(_) => Ok(()),
            // 110043: leverage not modified, already at the requested value.
            Err(e) if e.kind == ErrorKind::LeverageSetFailed && e.message.contains("110043") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn place_order(&self, request: &OrderRequest) -> ExecutionResult<OrderResponse> {
        let mut body = json!({
            "category": Self::category(request.market),
            "symbol": Self::native_symbol(&request.symbol),
            "side": match request.side {
                OrderSide::Buy => "Buy",
                OrderSide::Sell => "Sell",
            },
            "orderType": match request.kind {
                OrderKind::Market => "Market",
                OrderKind::Limit => "Limit",
            },
            "qty": request.quantity.normalize().to_string(),
            "orderLinkId": request.client_order_id,
        });
        if request.kind == OrderKind::Limit {
            let price = request.price.ok_or_else(|| {
                ExecutionError::with_message(ErrorKind::InvalidPrice, "limit order without price")
            })?;
            body["price"] = json!(price.normalize().to_string());
            body["timeInForce"] = json!("GTC");
        }
        if request.market == MarketType::Spot && request.kind == OrderKind::Market {
            // Spot market orders default to quote-denominated qty.
            body["marketUnit"] = json!("baseCoin");
        }

        let value = self
            .request(Method::POST, "/v5/order/create", None, Some(body), true)
            .await?;
        let order_id = value["result"]["orderId"].as_str().ok_or_else(|| {
            ExecutionError::with_message(ErrorKind::OrderPlacementFailed, "Bybit response missing orderId")
        })?;

        Ok(OrderResponse {
            platform_order_id: order_id.to_string(),
            client_order_id: value["result"]["orderLinkId"].as_str().map(str::to_string),
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> ExecutionResult<OrderResponse> {
        let mut body = json!({
            "category": Self::category(request.market),
            "symbol": Self::native_symbol(&request.symbol),
            "side": match request.side {
                OrderSide::Buy => "Buy",
                OrderSide::Sell => "Sell",
            },
            "orderType": if request.limit_price.is_some() { "Limit" } else { "Market" },
            "qty": request.quantity.normalize().to_string(),
            "triggerPrice": request.trigger_price.normalize().to_string(),
            // For a sell leg the stop fires on a fall, the take-profit on
            // a rise.
            "triggerDirection": match request.kind {
                ConditionalKind::StopLoss => 2,
                ConditionalKind::TakeProfit => 1,
            },
            "orderLinkId": request.client_order_id,
        });
        if let Some(limit) = request.limit_price {
            body["price"] = json!(limit.normalize().to_string());
            body["timeInForce"] = json!("GTC");
        }
        if request.market == MarketType::Spot {
            body["orderFilter"] = json!("StopOrder");
        } else {
            body["reduceOnly"] = json!(true);
        }

        let value = self
            .request(Method::POST, "/v5/order/create", None, Some(body), true)
            .await?;
        let order_id = value["result"]["orderId"].as_str().ok_or_else(|| {
            ExecutionError::with_message(ErrorKind::OrderPlacementFailed, "Bybit response missing orderId")
        })?;

        Ok(OrderResponse {
            platform_order_id: order_id.to_string(),
            client_order_id: value["result"]["orderLinkId"].as_str().map(str::to_string),
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    async fn cancel_open_orders(&self, symbol: &str, market: MarketType) -> ExecutionResult<u32> {
        let body = json!({
            "category": Self::category(market),
            "symbol": Self::native_symbol(symbol),
        });
        let value = self
            .request(Method::POST, "/v5/order/cancel-all", None, Some(body), true)
            .await
            .map_err(|e| {
                if e.kind == ErrorKind::Internal {
                    ExecutionError::with_message(ErrorKind::OrderCancelFailed, e.message)
                } else {
                    e
                }
            })?;
        Ok(value["result"]["list"]
            .as_array()
            .map(|list| list.len() as u32)
            .unwrap_or(0))
    }

    async fn balance(&self, asset: &str) -> ExecutionResult<Decimal> {
        let query = format!("accountType=UNIFIED&coin={}", asset);
        let value = self
            .request(Method::GET, "/v5/account/wallet-balance", Some(&query), None, true)
            .await
            .map_err(|e| {
                if e.kind == ErrorKind::Internal {
                    ExecutionError::with_message(ErrorKind::BalanceCheckFailed, e.message)
                } else {
                    e
                }
            })?;

        let available = value["result"]["list"][0]["coin"]
            .as_array()
            .and_then(|coins| coins.iter().find(|c| c["coin"].as_str() == Some(asset)))
            .and_then(|c| c["walletBalance"].as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);
        Ok(available)
    }

    async fn order_status(
        &self,
        symbol: &str,
        market: MarketType,
        platform_order_id: &str,
    ) -> ExecutionResult<OrderResponse> {
        let query = format!(
            "category={}&symbol={}&orderId={}",
            Self::category(market),
            Self::native_symbol(symbol),
            platform_order_id
        );
        let value = self
            .request(Method::GET, "/v5/order/realtime", Some(&query), None, true)
            .await?;
        let entry = value["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::OrderPlacementFailed,
                    format!("order {} not found", platform_order_id),
                )
            })?;

        let filled = entry["cumExecQty"]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(OrderResponse {
            platform_order_id: platform_order_id.to_string(),
            client_order_id: entry["orderLinkId"].as_str().map(str::to_string),
            status: entry["orderStatus"]
                .as_str()
                .map(map_order_status)
                .unwrap_or(OrderStatus::Pending),
            filled_quantity: filled,
            average_price: entry["avgPrice"].as_str().and_then(|s| Decimal::from_str(s).ok()),
            timestamp: entry["updatedTime"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }
}
