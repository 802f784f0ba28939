// src/infrastructure/exchange/okx.rs
// OKX adapter: V5 REST endpoints with base64 HMAC-SHA256 signing over
// timestamp + method + path + body, plus the account passphrase header.

use async_trait::async_trait;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::models::{
    ConditionalKind, ConditionalOrderRequest, ExchangePlatform, MarketType, OrderKind,
    OrderRequest, OrderResponse, OrderStatus, SymbolRules,
};
use crate::domain::repository::ExchangeAdapter;

#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
            base_url: "https://www.okx.com".to_string(),
            timeout_ms: 10000,
        }
    }
}

pub struct OkxAdapter {
    config: OkxConfig,
    client: Client,
}

impl OkxAdapter {
    pub fn new(config: OkxConfig) -> ExecutionResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExecutionError::with_message(ErrorKind::Internal, e.to_string()))?;
        Ok(Self { config, client })
    }

    /// "BTC/USDT" -> "BTC-USDT" (spot) or "BTC-USDT-SWAP" (futures).
    fn native_symbol(symbol: &str, market: MarketType) -> String {
        let inst = symbol.replace('/', "-").to_uppercase();
        match market {
            MarketType::Spot => inst,
            MarketType::Futures => format!("{}-SWAP", inst),
        }
    }

    fn trade_mode(market: MarketType) -> &'static str {
        match market {
            MarketType::Spot => "cash",
            MarketType::Futures => "cross",
        }
    }

    /// OKX client order ids allow only letters and digits.
    fn native_client_id(client_order_id: &str) -> String {
        client_order_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(32)
            .collect()
    }

    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> ExecutionResult<String> {
        let prehash = format!("{}{}{}{}", timestamp, method, request_path, body);
        let mut mac = Hmac::<Sha256>::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExecutionError::with_message(ErrorKind::ApiKeyInvalid, e.to_string()))?;
        mac.update(prehash.as_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn request(
        &self,
        method: Method,
        request_path: &str,
        body: Option<Value>,
        signed: bool,
    ) -> ExecutionResult<Value> {
        let url = format!("{}{}", self.config.base_url, request_path);
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");

        if signed {
            let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let signature = self.sign(&timestamp, method.as_str(), request_path, &body_text)?;
            builder = builder
                .header("OK-ACCESS-KEY", &self.config.api_key)
                .header("OK-ACCESS-SIGN", signature)
                .header("OK-ACCESS-TIMESTAMP", timestamp)
                .header("OK-ACCESS-PASSPHRASE", &self.config.passphrase);
        }

        if !body_text.is_empty() {
            builder = builder.body(body_text);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExecutionError::with_message(
                ErrorKind::RateLimited,
                format!("OKX rate limit: {}", text),
            ));
        }
        if status.is_server_error() {
            return Err(ExecutionError::with_message(
                ErrorKind::ExchangeUnavailable,
                format!("OKX returned {}", status),
            ));
        }

        let value: Value = serde_json::from_str(&text)?;
        let code = value["code"].as_str().unwrap_or("0");
        if code != "0" {
            let message = value["msg"].as_str().unwrap_or("unknown error");
            // Order-level errors ride inside data[0] with the envelope code
            // set to a generic failure.
            let detail = value["data"][0].clone();
            let (s_code, s_msg) = (
                detail["sCode"].as_str().unwrap_or(code).to_string(),
                detail["sMsg"].as_str().unwrap_or(message).to_string(),
            );
            return Err(translate_okx_error(&s_code, &s_msg));
        }
        Ok(value)
    }

    fn parse_order_ack(data: &Value, id_field: &str) -> ExecutionResult<OrderResponse> {
        let entry = &data["data"][0];
        let s_code = entry["sCode"].as_str().unwrap_or("0");
        if s_code != "0" {
            return Err(translate_okx_error(
                s_code,
                entry["sMsg"].as_str().unwrap_or("order rejected"),
            ));
        }
        let platform_order_id = entry[id_field]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::OrderPlacementFailed,
                    format!("OKX response missing {}", id_field),
                )
            })?
            .to_string();

        Ok(OrderResponse {
            platform_order_id,
            client_order_id: entry["clOrdId"].as_str().map(str::to_string),
            // Placement acks carry no fill information; fills arrive via
            // order state queries.
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}

/// Map a native OKX error code onto the unified taxonomy.
pub fn translate_okx_error(code: &str, message: &str) -> ExecutionError {
    let kind = match code {
        "51000" | "51008" => ErrorKind::InsufficientBalance,
        "50011" => ErrorKind::RateLimited,
        "50013" | "50001" => ErrorKind::ExchangeUnavailable,
        "50102" => ErrorKind::ExchangeAuthFailed,
        "50103" | "50105" | "50111" | "50113" => ErrorKind::ApiKeyInvalid,
        "51001" => ErrorKind::SymbolUnsupported,
        "51020" => ErrorKind::QuantityTooSmall,
        "51121" => ErrorKind::PrecisionFailed,
        "51400" | "51401" | "51402" => ErrorKind::OrderCancelFailed,
        "59000" | "59101" => ErrorKind::LeverageSetFailed,
        _ => ErrorKind::Internal,
    };
    ExecutionError::with_message(kind, format!("OKX error {}: {}", code, message))
        .details(json!({ "exchange": "okx", "native_code": code }))
}

fn map_order_state(state: &str) -> OrderStatus {
    match state {
        "live" => OrderStatus::Pending,
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "canceled" | "mmp_canceled" => OrderStatus::Cancelled,
        _ => OrderStatus::Pending,
    }
}

fn parse_instrument_rules(instrument: &Value) -> ExecutionResult<SymbolRules> {
    let field = |name: &str| {
        instrument[name]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
    };
    match (field("lotSz"), field("tickSz"), field("minSz")) {
        (Some(lot), Some(tick), Some(min)) => Ok(SymbolRules::from_steps(lot, tick, min)),
        _ => Err(ExecutionError::with_message(
            ErrorKind::SymbolInfoFailed,
            "instrument missing lotSz/tickSz/minSz",
        )),
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn platform(&self) -> ExchangePlatform {
        ExchangePlatform::Okx
    }

    async fn symbol_rules(&self, symbol: &str, market: MarketType) -> ExecutionResult<SymbolRules> {
        let inst_type = match market {
            MarketType::Spot => "SPOT",
            MarketType::Futures => "SWAP",
        };
        let path = format!(
            "/api/v5/public/instruments?instType={}&instId={}",
            inst_type,
            Self::native_symbol(symbol, market)
        );
        let value = self.request(Method::GET, &path, None, false).await?;
        let instrument = value["data"].as_array().and_then(|d| d.first()).ok_or_else(|| {
            ExecutionError::with_message(
                ErrorKind::SymbolUnsupported,
                format!("{} is not listed on OKX", symbol),
            )
        })?;
        parse_instrument_rules(instrument)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecutionResult<()> {
        let body = json!({
            "instId": Self::native_symbol(symbol, MarketType::Futures),
            "lever": leverage.to_string(),
            "mgnMode": "cross",
        });
        self.request(Method::POST, "/api/v5/account/set-leverage", Some(body), true)
            .await?;
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExecutionResult<OrderResponse> {
        let mut body = json!({
            "instId": Self::native_symbol(&request.symbol, request.market),
            "tdMode": Self::trade_mode(request.market),
            "side": match request.side {
                crate::domain::models::OrderSide::Buy => "buy",
                crate::domain::models::OrderSide::Sell => "sell",
            },
            "ordType": request.kind.as_str(),
            "sz": request.quantity.normalize().to_string(),
            "clOrdId": Self::native_client_id(&request.client_order_id),
        });
        match request.kind {
            OrderKind::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExecutionError::with_message(ErrorKind::InvalidPrice, "limit order without price")
                })?;
                body["px"] = json!(price.normalize().to_string());
            }
            OrderKind::Market => {
                if request.market == MarketType::Spot {
                    // Market buys default to quote-denominated size; we
                    // always send base quantity.
                    body["tgtCcy"] = json!("base_ccy");
                }
            }
        }

        let value = self
            .request(Method::POST, "/api/v5/trade/order", Some(body), true)
            .await?;
        Self::parse_order_ack(&value, "ordId")
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> ExecutionResult<OrderResponse> {
        let trigger = request.trigger_price.normalize().to_string();
        // "-1" requests market execution once triggered.
        let exec_price = request
            .limit_price
            .map(|p| p.normalize().to_string())
            .unwrap_or_else(|| "-1".to_string());

        let mut body = json!({
            "instId": Self::native_symbol(&request.symbol, request.market),
            "tdMode": Self::trade_mode(request.market),
            "side": match request.side {
                crate::domain::models::OrderSide::Buy => "buy",
                crate::domain::models::OrderSide::Sell => "sell",
            },
            "ordType": "conditional",
            "sz": request.quantity.normalize().to_string(),
            "algoClOrdId": Self::native_client_id(&request.client_order_id),
        });
        match request.kind {
            ConditionalKind::StopLoss => {
                body["slTriggerPx"] = json!(trigger);
                body["slOrdPx"] = json!(exec_price);
            }
            ConditionalKind::TakeProfit => {
                body["tpTriggerPx"] = json!(trigger);
                body["tpOrdPx"] = json!(exec_price);
            }
        }

        let value = self
            .request(Method::POST, "/api/v5/trade/order-algo", Some(body), true)
            .await?;
        Self::parse_order_ack(&value, "algoId")
    }

    async fn cancel_open_orders(&self, symbol: &str, market: MarketType) -> ExecutionResult<u32> {
        let inst_id = Self::native_symbol(symbol, market);
        let path = format!("/api/v5/trade/orders-pending?instId={}", inst_id);
        let value = self.request(Method::GET, &path, None, true).await?;

        let pending: Vec<Value> = value["data"]
            .as_array()
            .map(|orders| {
                orders
                    .iter()
                    .filter_map(|o| o["ordId"].as_str())
                    .map(|ord_id| json!({ "instId": inst_id, "ordId": ord_id }))
                    .collect()
            })
            .unwrap_or_default();

        if pending.is_empty() {
            return Ok(0);
        }

        let count = pending.len() as u32;
        self.request(
            Method::POST,
            "/api/v5/trade/cancel-batch-orders",
            Some(Value::Array(pending)),
            true,
        )
        .await
        .map_err(|e| {
            if e.kind == ErrorKind::Internal {
                ExecutionError::with_message(ErrorKind::OrderCancelFailed, e.message)
            } else {
                e
            }
        })?;
        Ok(count)
    }

    async fn balance(&self, asset: &str) -> ExecutionResult<Decimal> {
        let path = format!("/api/v5/account/balance?ccy={}", asset);
        let value = self.request(Method::GET, &path, None, true).await.map_err(|e| {
            if e.kind == ErrorKind::Internal {
                ExecutionError::with_message(ErrorKind::BalanceCheckFailed, e.message)
            } else {
                e
            }
        })?;

        let available = value["data"][0]["details"]
            .as_array()
            .and_then(|details| details.iter().find(|d| d["ccy"].as_str() == Some(asset)))
            .and_then(|d| d["availBal"].as_str())
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
        let path = format!(
            "/api/v5/trade/order?instId={}&ordId={}",
            Self::native_symbol(symbol, market),
            platform_order_id
        );
        let value = self.request(Method::GET, &path, None, true).await?;
        let entry = &value["data"][0];

        let filled = entry["accFillSz"]
            .as_str()
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(OrderResponse {
            platform_order_id: platform_order_id.to_string(),
            client_order_id: entry["clOrdId"].as_str().map(str::to_string),
            status: entry["state"].as_str().map(map_order_state).unwrap_or(OrderStatus::Pending),
            filled_quantity: filled,
            average_price: entry["avgPx"].as_str().and_then(|s| Decimal::from_str(s).ok()),
            timestamp: entry["uTime"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn native_symbol_uses_dash_and_swap_suffix() {
        assert_eq!(OkxAdapter::native_symbol("BTC/USDT", MarketType::Spot), "BTC-USDT");
        assert_eq!(
            OkxAdapter::native_symbol("btc/usdt", MarketType::Futures),
            "BTC-USDT-SWAP"
        );
    }

    #[test]
    fn client_ids_are_stripped_to_alphanumerics() {
        assert_eq!(OkxAdapter::native_client_id("user1234-sig42-BTCUSDT"), "user1234sig42BTCUSDT");
        assert!(OkxAdapter::native_client_id(&"x".repeat(64)).len() <= 32);
    }

    #[test]
    fn signature_is_deterministic_base64() {
        let adapter = OkxAdapter::new(OkxConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            passphrase: "phrase".to_string(),
            ..Default::default()
        })
        .unwrap();

        let a = adapter
            .sign("2024-01-01T00:00:00.000Z", "POST", "/api/v5/trade/order", "{}")
            .unwrap();
        let b = adapter
            .sign("2024-01-01T00:00:00.000Z", "POST", "/api/v5/trade/order", "{}")
            .unwrap();
        assert_eq!(a, b);
        let raw = base64::engine::general_purpose::STANDARD.decode(&a).unwrap();
        assert_eq!(raw.len(), 32, "HMAC-SHA256 digest must be 32 bytes");
    }

    #[test]
    fn translates_native_error_codes() {
        assert_eq!(translate_okx_error("51000", "x").kind, ErrorKind::InsufficientBalance);
        assert_eq!(translate_okx_error("50011", "x").kind, ErrorKind::RateLimited);
        assert_eq!(translate_okx_error("51001", "x").kind, ErrorKind::SymbolUnsupported);
        assert_eq!(translate_okx_error("50103", "x").kind, ErrorKind::ApiKeyInvalid);
        assert_eq!(translate_okx_error("99999", "x").kind, ErrorKind::Internal);
    }

    #[test]
    fn parses_instrument_rules() {
        let instrument: Value = serde_json::from_str(
            r#"{"instId": "BTC-USDT", "lotSz": "0.0001", "tickSz": "0.1", "minSz": "0.0001"}"#,
        )
        .unwrap();
        let rules = parse_instrument_rules(&instrument).unwrap();
        assert_eq!(rules.step_size, dec!(0.0001));
        assert_eq!(rules.tick_size, dec!(0.1));
        assert_eq!(rules.quantity_precision, 4);
        assert_eq!(rules.price_precision, 1);
    }

    #[test]
    fn maps_order_states() {
        assert_eq!(map_order_state("live"), OrderStatus::Pending);
        assert_eq!(map_order_state("filled"), OrderStatus::Filled);
        assert_eq!(map_order_state("partially_filled"), OrderStatus::PartiallyFilled);
        assert_eq!(map_order_state("canceled"), OrderStatus::Cancelled);
    }
}
