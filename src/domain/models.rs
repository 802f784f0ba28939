// src/domain/models.rs
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};

/// Supported exchanges. The orchestrator never branches on this beyond
/// selecting the adapter instance once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangePlatform {
    Binance,
    Okx,
    Bybit,
}

impl ExchangePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangePlatform::Binance => "binance",
            ExchangePlatform::Okx => "okx",
            ExchangePlatform::Bybit => "bybit",
        }
    }
}

impl FromStr for ExchangePlatform {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(ExchangePlatform::Binance),
            "okx" => Ok(ExchangePlatform::Okx),
            "bybit" => Ok(ExchangePlatform::Bybit),
            other => Err(ExecutionError::with_message(
                ErrorKind::ExchangeUnsupported,
                format!("Unsupported exchange: {}", other),
            )),
        }
    }
}

impl fmt::Display for ExchangePlatform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketType {
    Spot,
    Futures,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Futures => "futures",
        }
    }
}

impl FromStr for MarketType {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "futures" => Ok(MarketType::Futures),
            other => Err(ExecutionError::with_message(
                ErrorKind::InvalidMarketType,
                format!("Invalid market type: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
        }
    }
}

impl FromStr for OrderKind {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderKind::Market),
            "limit" => Ok(OrderKind::Limit),
            other => Err(ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!("Invalid order type: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Status of the parent Trade aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Pending,
    Active,
    Failed,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Active => "ACTIVE",
            TradeStatus::Failed => "FAILED",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for TradeStatus {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TradeStatus::Pending),
            "ACTIVE" => Ok(TradeStatus::Active),
            "FAILED" => Ok(TradeStatus::Failed),
            "CLOSED" => Ok(TradeStatus::Closed),
            other => Err(ExecutionError::with_message(
                ErrorKind::Internal,
                format!("Unknown trade status: {}", other),
            )),
        }
    }
}

/// Aggregate outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Active,
    Failed,
    Duplicate,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Active => "ACTIVE",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Duplicate => "DUPLICATE",
        }
    }
}

/// Role of an order within its trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOrderType {
    Entry,
    Dca,
    StopLoss,
    TakeProfit,
}

impl TradeOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOrderType::Entry => "ENTRY",
            TradeOrderType::Dca => "DCA",
            TradeOrderType::StopLoss => "STOP_LOSS",
            TradeOrderType::TakeProfit => "TAKE_PROFIT",
        }
    }
}

impl FromStr for TradeOrderType {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY" => Ok(TradeOrderType::Entry),
            "DCA" => Ok(TradeOrderType::Dca),
            "STOP_LOSS" => Ok(TradeOrderType::StopLoss),
            "TAKE_PROFIT" => Ok(TradeOrderType::TakeProfit),
            other => Err(ExecutionError::with_message(
                ErrorKind::Internal,
                format!("Unknown order type: {}", other),
            )),
        }
    }
}

/// Order lifecycle state machine. PENDING is the initial state; FILLED,
/// CANCELLED, FAILED and EXPIRED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Cancelled,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed | OrderStatus::Expired
        )
    }

    /// A partially filled order may keep accumulating fills until it either
    /// completes or is cancelled/expired by the exchange.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::PartiallyFilled => matches!(
                next,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Failed
                    | OrderStatus::Expired
            ),
            _ => false,
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "FILLED" => Ok(OrderStatus::Filled),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            "EXPIRED" => Ok(OrderStatus::Expired),
            other => Err(ExecutionError::with_message(
                ErrorKind::Internal,
                format!("Unknown order status: {}", other),
            )),
        }
    }
}

/// Origin of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    System,
    Exchange,
    User,
    Retry,
    Monitor,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::System => "SYSTEM",
            EventSource::Exchange => "EXCHANGE",
            EventSource::User => "USER",
            EventSource::Retry => "RETRY",
            EventSource::Monitor => "MONITOR",
        }
    }
}

/// How the execution request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    AutoBot,
    ManualExecute,
    ManualSmartTrade,
    SignalExecution,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::AutoBot => "auto_bot",
            SourceMode::ManualExecute => "manual_execute",
            SourceMode::ManualSmartTrade => "manual_smart_trade",
            SourceMode::SignalExecution => "signal_execution",
        }
    }
}

impl FromStr for SourceMode {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_bot" => Ok(SourceMode::AutoBot),
            "manual_execute" => Ok(SourceMode::ManualExecute),
            "manual_smart_trade" => Ok(SourceMode::ManualSmartTrade),
            "signal_execution" => Ok(SourceMode::SignalExecution),
            other => Err(ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!("Unknown source mode: {}", other),
            )),
        }
    }
}

/// One pre-planned averaging-down buy below (or above, for shorts) the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DcaLevel {
    pub level: u32,
    pub target_price: Decimal,
    pub amount: Decimal,
}

/// Validated trade intent. Construct via `validate` so every instance the
/// executor sees already satisfies the invariants.
#[derive(Debug, Clone)]
pub struct TradeExecutionRequest {
    pub platform: ExchangePlatform,
    pub symbol: String,
    pub market_type: MarketType,
    pub order_type: OrderKind,
    pub entry_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub initial_amount: Decimal,
    pub dca_levels: Vec<DcaLevel>,
    pub leverage: u32,
    pub auto_execute: bool,
    pub user_id: String,
    pub signal_id: Option<String>,
    pub source_mode: SourceMode,
    pub managed_by_bot: bool,
}

impl TradeExecutionRequest {
    /// Enforces the request invariants: positive amounts and prices,
    /// leverage >= 1, DCA levels with unique indexes sorted by strictly
    /// increasing distance from entry.
    pub fn validate(mut self) -> ExecutionResult<Self> {
        if self.symbol.trim().is_empty() {
            return Err(ExecutionError::with_message(
                ErrorKind::ValidationError,
                "Symbol must not be empty",
            ));
        }
        if self.entry_price <= Decimal::ZERO {
            return Err(ExecutionError::with_message(
                ErrorKind::InvalidPrice,
                format!("Entry price must be positive, got {}", self.entry_price),
            ));
        }
        if self.initial_amount <= Decimal::ZERO {
            return Err(ExecutionError::with_message(
                ErrorKind::ValidationError,
                format!("Initial amount must be positive, got {}", self.initial_amount),
            ));
        }
        if self.leverage < 1 {
            return Err(ExecutionError::with_message(
                ErrorKind::InvalidLeverage,
                format!("Leverage must be >= 1, got {}", self.leverage),
            ));
        }

        self.dca_levels.sort_by_key(|l| l.level);
        let mut last_distance: Option<Decimal> = None;
        let mut last_level: Option<u32> = None;
        for dca in &self.dca_levels {
            if dca.level < 1 {
                return Err(ExecutionError::with_message(
                    ErrorKind::ValidationError,
                    "DCA level index must be >= 1",
                ));
            }
            if Some(dca.level) == last_level {
                return Err(ExecutionError::with_message(
                    ErrorKind::ValidationError,
                    format!("Duplicate DCA level {}", dca.level),
                ));
            }
            if dca.target_price <= Decimal::ZERO || dca.amount <= Decimal::ZERO {
                return Err(ExecutionError::with_message(
                    ErrorKind::ValidationError,
                    format!("DCA level {} must have positive price and amount", dca.level),
                ));
            }
            let distance = (dca.target_price - self.entry_price).abs();
            if let Some(prev) = last_distance {
                if distance <= prev {
                    return Err(ExecutionError::with_message(
                        ErrorKind::ValidationError,
                        format!(
                            "DCA level {} must be further from entry than the previous level",
                            dca.level
                        ),
                    ));
                }
            }
            last_distance = Some(distance);
            last_level = Some(dca.level);
        }

        Ok(self)
    }
}

/// Derive display precision from an exchange step: `-floor(log10(step))`,
/// floored at zero.
pub fn precision_from_step(step: Decimal) -> u32 {
    let step = match step.to_f64() {
        Some(s) if s > 0.0 => s,
        _ => return 0,
    };
    let p = -step.log10().floor();
    if p < 0.0 {
        0
    } else {
        p as u32
    }
}

/// Per-symbol trading constraints, fetched fresh from the exchange for
/// every execution. Every outbound quantity and price must pass through
/// `format_quantity` / `format_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub quantity_precision: u32,
    pub price_precision: u32,
    pub tick_size: Decimal,
    pub min_quantity: Decimal,
    pub step_size: Decimal,
}

impl SymbolRules {
    pub fn from_steps(step_size: Decimal, tick_size: Decimal, min_quantity: Decimal) -> Self {
        Self {
            quantity_precision: precision_from_step(step_size),
            price_precision: precision_from_step(tick_size),
            tick_size,
            min_quantity,
            step_size,
        }
    }

    /// Round a base-asset quantity down to the step size and reject
    /// quantities below the exchange minimum.
    pub fn format_quantity(&self, quantity: Decimal) -> ExecutionResult<Decimal> {
        let stepped = if self.step_size > Decimal::ZERO {
            (quantity / self.step_size).floor() * self.step_size
        } else {
            quantity
        };
        let stepped = stepped.normalize();
        if stepped <= Decimal::ZERO || stepped < self.min_quantity {
            return Err(ExecutionError::with_message(
                ErrorKind::QuantityTooSmall,
                format!(
                    "Quantity {} is below the minimum {} after step rounding",
                    stepped, self.min_quantity
                ),
            ));
        }
        Ok(stepped)
    }

    /// Floor a price to the tick size.
    pub fn format_price(&self, price: Decimal) -> ExecutionResult<Decimal> {
        if price <= Decimal::ZERO {
            return Err(ExecutionError::with_message(
                ErrorKind::InvalidPrice,
                format!("Price must be positive, got {}", price),
            ));
        }
        let ticked = if self.tick_size > Decimal::ZERO {
            (price / self.tick_size).floor() * self.tick_size
        } else {
            price
        };
        Ok(ticked.normalize())
    }
}

/// Parent aggregate persisted once per execution attempt that passes the
/// guard gate. Mutated only through the persistence layer.
#[derive(Debug, Clone)]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub leverage: u32,
    pub status: TradeStatus,
    pub platform: ExchangePlatform,
    pub entry_price: Decimal,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub total_invested: Decimal,
    pub client_order_id: String,
    pub signal_id: Option<String>,
    pub source_mode: SourceMode,
    pub managed_by_bot: bool,
    pub created_at: i64,
}

/// Child order row of a Trade.
#[derive(Debug, Clone)]
pub struct TradeOrder {
    pub id: String,
    pub trade_id: String,
    pub order_type: TradeOrderType,
    pub level: u32,
    pub platform_order_id: Option<String>,
    pub client_order_id: String,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fees: Decimal,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Immutable audit record. `order_id` is absent for trade-level events.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub id: i64,
    pub trade_id: String,
    pub order_id: Option<String>,
    pub event_type: String,
    pub previous_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub source: EventSource,
    pub data: Option<Value>,
    pub created_at: i64,
}

/// Adapter-facing plain order request. Quantities and prices are expected
/// to be pre-formatted through `SymbolRules`.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub market: MarketType,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub client_order_id: String,
}

/// Which protective leg a conditional order implements. Exchanges use
/// distinct native order types for the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalKind {
    StopLoss,
    TakeProfit,
}

/// Adapter-facing conditional (trigger) order request, used for stop-loss
/// and take-profit legs. `limit_price` of `None` means execute as market
/// once triggered.
#[derive(Debug, Clone)]
pub struct ConditionalOrderRequest {
    pub symbol: String,
    pub market: MarketType,
    pub side: OrderSide,
    pub kind: ConditionalKind,
    pub quantity: Decimal,
    pub trigger_price: Decimal,
    pub limit_price: Option<Decimal>,
    pub client_order_id: String,
}

/// Exchange acknowledgement of a placed (or queried) order.
#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub platform_order_id: String,
    pub client_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub timestamp: i64,
}

/// One order the executor successfully placed, tagged with its role.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_type: TradeOrderType,
    pub level: u32,
    pub platform_order_id: String,
    pub client_order_id: String,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub status: OrderStatus,
}

/// Result of one execution run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub trade_id: Option<String>,
    pub status: ExecutionStatus,
    pub orders: Vec<PlacedOrder>,
    pub first_error: Option<ExecutionError>,
}

impl ExecutionReport {
    pub fn count_of(&self, order_type: TradeOrderType) -> u32 {
        self.orders.iter().filter(|o| o.order_type == order_type).count() as u32
    }
}
