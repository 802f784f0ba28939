// src/domain/mod.rs
pub mod errors;
pub mod idempotency;
pub mod models;
pub mod repository;

// Re-export common types for convenience
pub use errors::{ErrorKind, ExecutionError, ExecutionResult};
pub use models::{
    ConditionalKind, ConditionalOrderRequest, DcaLevel, EventSource, ExchangePlatform, ExecutionReport,
    ExecutionStatus, MarketType, OrderEvent, OrderKind, OrderRequest, OrderResponse, OrderSide,
    OrderStatus, PlacedOrder, SourceMode, SymbolRules, Trade, TradeExecutionRequest, TradeOrder,
    TradeOrderType, TradeStatus,
};
