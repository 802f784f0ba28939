// src/application/dto.rs
// Wire contracts: the inbound execution request and the outbound
// success/error bodies. The HTTP surface itself lives outside this crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::models::{
    DcaLevel, ExecutionReport, ExecutionStatus, SourceMode, TradeExecutionRequest, TradeOrderType,
};

/// Inbound execution request as posted by the dashboard or by server-side
/// automation (which carries an explicit `userId`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTradeRequest {
    pub platform: String,
    pub symbol: String,
    pub market_type: String,
    pub order_type: String,
    pub entry_price: Decimal,
    #[serde(default)]
    pub stop_loss_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit_price: Option<Decimal>,
    pub initial_amount: Decimal,
    #[serde(default)]
    pub dca_levels: Vec<DcaLevelDto>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub strategy: Option<String>,
    pub auto_execute: bool,
    #[serde(default)]
    pub signal_id: Option<String>,
    #[serde(default)]
    pub source_mode: Option<String>,
    #[serde(default)]
    pub managed_by_bot: Option<bool>,
    #[serde(default)]
    pub management_profile_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcaLevelDto {
    pub level: u32,
    pub target_price: Decimal,
    pub amount: Decimal,
}

impl ExecuteTradeRequest {
    /// Resolve the owning user and convert into a validated domain request.
    /// `authenticated_user` comes from the bearer token; a service-role
    /// caller instead supplies `userId` in the body.
    pub fn into_domain(
        self,
        authenticated_user: Option<&str>,
    ) -> ExecutionResult<TradeExecutionRequest> {
        let user_id = self
            .user_id
            .or_else(|| authenticated_user.map(str::to_string))
            .ok_or_else(|| ExecutionError::new(ErrorKind::AuthRequired))?;

        let source_mode = match self.source_mode.as_deref() {
            Some(raw) => raw.parse()?,
            None => SourceMode::ManualExecute,
        };

        TradeExecutionRequest {
            platform: self.platform.parse()?,
            symbol: self.symbol,
            market_type: self.market_type.parse()?,
            order_type: self.order_type.parse()?,
            entry_price: self.entry_price,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
            initial_amount: self.initial_amount,
            dca_levels: self
                .dca_levels
                .into_iter()
                .map(|l| DcaLevel {
                    level: l.level,
                    target_price: l.target_price,
                    amount: l.amount,
                })
                .collect(),
            leverage: self.leverage.unwrap_or(1),
            auto_execute: self.auto_execute,
            user_id,
            signal_id: self.signal_id,
            source_mode,
            managed_by_bot: self.managed_by_bot.unwrap_or(false),
        }
        .validate()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrdersBreakdown {
    pub entry: u32,
    pub dca: u32,
    pub stop_loss: u32,
    pub take_profit: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrderDto {
    pub order_type: String,
    pub level: u32,
    pub platform_order_id: String,
    pub client_order_id: String,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub status: String,
}

/// Outbound success body summarizing what was placed.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteTradeResponse {
    pub success: bool,
    pub message: String,
    pub trade_id: Option<String>,
    pub placed_orders: Vec<PlacedOrderDto>,
    pub execution_status: String,
    pub orders_breakdown: OrdersBreakdown,
    pub platform_used: String,
    pub order_type: String,
}

impl ExecuteTradeResponse {
    pub fn from_report(report: &ExecutionReport, platform: &str, order_type: &str) -> Self {
        let message = match report.status {
            ExecutionStatus::Active => "Trade executed".to_string(),
            ExecutionStatus::Pending => "Trade recorded; auto-execute is off".to_string(),
            ExecutionStatus::Duplicate => "Duplicate submission; no new orders placed".to_string(),
            ExecutionStatus::Failed => report
                .first_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "Trade execution failed".to_string()),
        };

        Self {
            success: report.status != ExecutionStatus::Failed,
            message,
            trade_id: report.trade_id.clone(),
            placed_orders: report
                .orders
                .iter()
                .map(|o| PlacedOrderDto {
                    order_type: o.order_type.as_str().to_string(),
                    level: o.level,
                    platform_order_id: o.platform_order_id.clone(),
                    client_order_id: o.client_order_id.clone(),
                    price: o.price,
                    quantity: o.quantity,
                    status: o.status.as_str().to_string(),
                })
                .collect(),
            execution_status: report.status.as_str().to_string(),
            orders_breakdown: OrdersBreakdown {
                entry: report.count_of(TradeOrderType::Entry),
                dca: report.count_of(TradeOrderType::Dca),
                stop_loss: report.count_of(TradeOrderType::StopLoss),
                take_profit: report.count_of(TradeOrderType::TakeProfit),
            },
            platform_used: platform.to_string(),
            order_type: order_type.to_string(),
        }
    }
}

/// Structured error body; the HTTP status comes from the taxonomy.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ErrorBody {
    pub fn from_error(error: &ExecutionError) -> (u16, Self) {
        (
            error.http_status(),
            Self {
                success: false,
                code: error.kind.code().to_string(),
                message: error.message.clone(),
                details: error.details.clone(),
                retryable: error.retryable(),
            },
        )
    }
}
