// src/domain/errors.rs
use serde_json::Value;
use thiserror::Error;

/// Closed set of unified error kinds. Every failure that crosses an
/// exchange, storage, or validation boundary is classified into exactly one
/// of these; retry decisions, HTTP statuses, and user-facing messages all
/// derive from the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Authentication / authorization
    AuthRequired,
    InvalidUser,
    ApiKeyNotFound,
    ApiKeyInvalid,
    ExchangeAuthFailed,

    // Exchange / symbol
    ExchangeUnsupported,
    SymbolUnsupported,
    SymbolInfoFailed,
    InvalidMarketType,

    // Balance / capital
    InsufficientBalance,
    BalanceCheckFailed,

    // Order validation
    BelowMinNotional,
    PrecisionFailed,
    QuantityTooSmall,
    InvalidPrice,

    // Order execution
    OrderPlacementFailed,
    OrderCancelFailed,
    PartialFillFailed,

    // Rate limiting
    RateLimited,
    TooManyRequests,

    // Network
    Timeout,
    NetworkError,
    ExchangeUnavailable,

    // Idempotency
    InvalidIdempotencyKey,
    DuplicateOrder,
    RetryExhausted,

    // Leverage
    LeverageSetFailed,
    InvalidLeverage,

    // Internal
    DatabaseError,
    ValidationError,
    Internal,
}

impl ErrorKind {
    /// Stable wire code used in error responses and log records.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::InvalidUser => "INVALID_USER",
            ErrorKind::ApiKeyNotFound => "API_KEY_NOT_FOUND",
            ErrorKind::ApiKeyInvalid => "API_KEY_INVALID",
            ErrorKind::ExchangeAuthFailed => "EXCHANGE_AUTH_FAILED",
            ErrorKind::ExchangeUnsupported => "EXCHANGE_UNSUPPORTED",
            ErrorKind::SymbolUnsupported => "SYMBOL_UNSUPPORTED",
            ErrorKind::SymbolInfoFailed => "SYMBOL_INFO_FAILED",
            ErrorKind::InvalidMarketType => "INVALID_MARKET_TYPE",
            ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorKind::BalanceCheckFailed => "BALANCE_CHECK_FAILED",
            ErrorKind::BelowMinNotional => "BELOW_MIN_NOTIONAL",
            ErrorKind::PrecisionFailed => "PRECISION_FAILED",
            ErrorKind::QuantityTooSmall => "QUANTITY_TOO_SMALL",
            ErrorKind::InvalidPrice => "INVALID_PRICE",
            ErrorKind::OrderPlacementFailed => "ORDER_PLACEMENT_FAILED",
            ErrorKind::OrderCancelFailed => "ORDER_CANCEL_FAILED",
            ErrorKind::PartialFillFailed => "PARTIAL_FILL_FAILED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ExchangeUnavailable => "EXCHANGE_UNAVAILABLE",
            ErrorKind::InvalidIdempotencyKey => "INVALID_IDEMPOTENCY_KEY",
            ErrorKind::DuplicateOrder => "DUPLICATE_ORDER",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::LeverageSetFailed => "LEVERAGE_SET_FAILED",
            ErrorKind::InvalidLeverage => "INVALID_LEVERAGE",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::AuthRequired => "Authentication required",
            ErrorKind::InvalidUser => "User is not allowed to trade",
            ErrorKind::ApiKeyNotFound => "No API key configured for this exchange",
            ErrorKind::ApiKeyInvalid => "Exchange API key is invalid",
            ErrorKind::ExchangeAuthFailed => "Exchange rejected the request signature",
            ErrorKind::ExchangeUnsupported => "Exchange is not supported",
            ErrorKind::SymbolUnsupported => "Symbol is not supported on this exchange",
            ErrorKind::SymbolInfoFailed => "Failed to resolve symbol trading rules",
            ErrorKind::InvalidMarketType => "Invalid market type",
            ErrorKind::InsufficientBalance => "Insufficient balance",
            ErrorKind::BalanceCheckFailed => "Failed to fetch account balance",
            ErrorKind::BelowMinNotional => "Order value is below the exchange minimum",
            ErrorKind::PrecisionFailed => "Price or quantity precision is invalid",
            ErrorKind::QuantityTooSmall => "Order quantity is below the exchange minimum",
            ErrorKind::InvalidPrice => "Order price is invalid",
            ErrorKind::OrderPlacementFailed => "Order placement failed",
            ErrorKind::OrderCancelFailed => "Order cancellation failed",
            ErrorKind::PartialFillFailed => "Partial fill handling failed",
            ErrorKind::RateLimited => "Rate limited by the exchange",
            ErrorKind::TooManyRequests => "Too many requests",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::NetworkError => "Network error",
            ErrorKind::ExchangeUnavailable => "Exchange is unavailable",
            ErrorKind::InvalidIdempotencyKey => "Invalid idempotency key",
            ErrorKind::DuplicateOrder => "Duplicate order submission",
            ErrorKind::RetryExhausted => "All retry attempts exhausted",
            ErrorKind::LeverageSetFailed => "Failed to set leverage",
            ErrorKind::InvalidLeverage => "Invalid leverage value",
            ErrorKind::DatabaseError => "Database error",
            ErrorKind::ValidationError => "Validation error",
            ErrorKind::Internal => "Internal error",
        }
    }

    /// Whether the retry engine may re-attempt a call failing with this kind.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::TooManyRequests
                | ErrorKind::Timeout
                | ErrorKind::NetworkError
                | ErrorKind::ExchangeUnavailable
        )
    }

    /// HTTP-equivalent status for the outbound error contract.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::AuthRequired | ErrorKind::ApiKeyInvalid | ErrorKind::ExchangeAuthFailed => 401,
            ErrorKind::InvalidUser => 403,
            ErrorKind::ApiKeyNotFound => 404,
            ErrorKind::ExchangeUnsupported
            | ErrorKind::SymbolUnsupported
            | ErrorKind::InvalidMarketType
            | ErrorKind::InsufficientBalance
            | ErrorKind::BelowMinNotional
            | ErrorKind::PrecisionFailed
            | ErrorKind::QuantityTooSmall
            | ErrorKind::InvalidPrice
            | ErrorKind::InvalidLeverage
            | ErrorKind::InvalidIdempotencyKey
            | ErrorKind::ValidationError => 400,
            ErrorKind::DuplicateOrder => 409,
            ErrorKind::RateLimited | ErrorKind::TooManyRequests => 429,
            ErrorKind::Timeout => 504,
            ErrorKind::SymbolInfoFailed
            | ErrorKind::BalanceCheckFailed
            | ErrorKind::OrderPlacementFailed
            | ErrorKind::OrderCancelFailed
            | ErrorKind::LeverageSetFailed
            | ErrorKind::NetworkError => 502,
            ErrorKind::ExchangeUnavailable | ErrorKind::RetryExhausted => 503,
            ErrorKind::PartialFillFailed | ErrorKind::DatabaseError | ErrorKind::Internal => 500,
        }
    }
}

/// Unified execution error: a taxonomy kind plus a human-readable message
/// and optional structured details (native exchange codes, attempt counts).
#[derive(Error, Debug, Clone)]
#[error("{}: {message}", .kind.code())]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            details: None,
        }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

impl From<rusqlite::Error> for ExecutionError {
    fn from(e: rusqlite::Error) -> Self {
        ExecutionError::with_message(ErrorKind::DatabaseError, e.to_string())
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_connect() {
            ErrorKind::ExchangeUnavailable
        } else {
            ErrorKind::NetworkError
        };
        ExecutionError::with_message(kind, e.to_string())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(e: serde_json::Error) -> Self {
        ExecutionError::with_message(ErrorKind::Internal, format!("JSON error: {}", e))
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_are_the_transient_ones() {
        let retryable = [
            ErrorKind::RateLimited,
            ErrorKind::TooManyRequests,
            ErrorKind::Timeout,
            ErrorKind::NetworkError,
            ErrorKind::ExchangeUnavailable,
        ];
        for kind in retryable {
            assert!(kind.retryable(), "{:?} should be retryable", kind);
        }
        for kind in [
            ErrorKind::InsufficientBalance,
            ErrorKind::SymbolInfoFailed,
            ErrorKind::DuplicateOrder,
            ErrorKind::ValidationError,
            ErrorKind::RetryExhausted,
        ] {
            assert!(!kind.retryable(), "{:?} should not be retryable", kind);
        }
    }

    #[test]
    fn http_statuses() {
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::DuplicateOrder.http_status(), 409);
        assert_eq!(ErrorKind::InsufficientBalance.http_status(), 400);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::ExchangeUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ExecutionError::with_message(ErrorKind::BelowMinNotional, "order too small");
        assert_eq!(err.to_string(), "BELOW_MIN_NOTIONAL: order too small");
    }

    #[test]
    fn default_message_used_by_new() {
        let err = ExecutionError::new(ErrorKind::RateLimited);
        assert_eq!(err.message, "Rate limited by the exchange");
        assert!(err.retryable());
    }
}
