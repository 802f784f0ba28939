// src/domain/repository/mod.rs
// Boundary interfaces for the execution engine: the exchange capability
// set, the trade/order/event store, and the read-only guard policy store.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::errors::ExecutionResult;
use crate::domain::models::{
    ConditionalOrderRequest, DcaLevel, EventSource, ExchangePlatform, MarketType, OrderEvent,
    OrderRequest, OrderResponse, OrderStatus, SymbolRules, Trade, TradeOrder, TradeStatus,
};

/// Capability set every exchange adapter implements. The orchestrator is
/// polymorphic over this trait; exchange identity is only consulted when
/// selecting the adapter instance.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn platform(&self) -> ExchangePlatform;

    /// Fetch and normalize the instrument trading rules for a symbol.
    async fn symbol_rules(&self, symbol: &str, market: MarketType) -> ExecutionResult<SymbolRules>;

    /// Set position leverage. Futures only.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExecutionResult<()>;

    async fn place_order(&self, request: &OrderRequest) -> ExecutionResult<OrderResponse>;

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> ExecutionResult<OrderResponse>;

    /// Cancel all open orders for a symbol. Returns the cancelled count.
    async fn cancel_open_orders(&self, symbol: &str, market: MarketType) -> ExecutionResult<u32>;

    /// Free balance of one asset.
    async fn balance(&self, asset: &str) -> ExecutionResult<Decimal>;

    async fn order_status(
        &self,
        symbol: &str,
        market: MarketType,
        platform_order_id: &str,
    ) -> ExecutionResult<OrderResponse>;
}

/// Prior submission located by the idempotency guard.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyHit {
    pub trade_id: String,
    pub order_id: Option<String>,
}

/// A fill increment reported by the exchange for one order.
#[derive(Debug, Clone)]
pub struct FillUpdate {
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub fees: Decimal,
}

/// Durable store for trades, their orders, and the append-only event log.
/// Backed by blocking SQLite; calls are cheap local writes.
pub trait TradeRepository: Send + Sync {
    /// Insert the parent trade row. A client-order-id uniqueness conflict
    /// surfaces as `DuplicateOrder` and is the authoritative duplicate
    /// signal.
    fn create_trade(&self, trade: &Trade) -> ExecutionResult<()>;

    fn update_trade_status(&self, trade_id: &str, status: TradeStatus) -> ExecutionResult<()>;

    /// Idempotency lookup by client order id or platform order id.
    fn find_by_client_order_id(
        &self,
        user_id: &str,
        client_order_id: &str,
    ) -> ExecutionResult<Option<IdempotencyHit>>;

    /// Insert an order row in PENDING and append its CREATED event.
    fn create_order(&self, order: &TradeOrder) -> ExecutionResult<()>;

    /// Transition an order and append exactly one lifecycle event, both in
    /// one transaction. Illegal state transitions are rejected.
    fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        error_message: Option<&str>,
        source: EventSource,
    ) -> ExecutionResult<()>;

    /// Accumulate a fill. Returns the resulting status: FILLED once the
    /// accumulated quantity reaches the requested quantity, else
    /// PARTIALLY_FILLED.
    fn record_fill(
        &self,
        order_id: &str,
        fill: &FillUpdate,
        source: EventSource,
    ) -> ExecutionResult<OrderStatus>;

    /// Legacy reporting row, one per DCA level.
    fn record_dca_order(
        &self,
        trade_id: &str,
        user_id: &str,
        symbol: &str,
        level: &DcaLevel,
        status: &str,
    ) -> ExecutionResult<()>;

    /// Append a trade-level audit event (leg failures, guard outcomes).
    fn append_trade_event(
        &self,
        trade_id: &str,
        event_type: &str,
        source: EventSource,
        data: Option<Value>,
    ) -> ExecutionResult<()>;

    /// Append-only fleet observability record. Callers treat failures as
    /// best-effort.
    fn log_auto_trade(
        &self,
        user_id: Option<&str>,
        category: &str,
        message: &str,
        data: Option<Value>,
    ) -> ExecutionResult<()>;

    fn get_order(&self, order_id: &str) -> ExecutionResult<Option<TradeOrder>>;

    fn list_events(&self, trade_id: &str) -> ExecutionResult<Vec<OrderEvent>>;
}

/// Per-user trading policy record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTradingStatus {
    pub enabled: bool,
    pub reason: Option<String>,
}

/// Read-only access to the externally-owned policy store consulted by the
/// guard gate.
pub trait GuardStore: Send + Sync {
    fn kill_switch_enabled(&self) -> ExecutionResult<bool>;

    fn user_trading_status(&self, user_id: &str) -> ExecutionResult<Option<UserTradingStatus>>;

    /// `None` when the flag is not defined.
    fn feature_enabled(&self, key: &str) -> ExecutionResult<Option<bool>>;
}
