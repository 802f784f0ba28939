// tests/execute_trade.rs
// End-to-end orchestrator tests: a scriptable mock exchange adapter, the
// real SQLite store in memory, and a fake guard store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trade_engine::application::guard::GuardGate;
use trade_engine::application::retry::RetryPolicy;
use trade_engine::application::usecase::TradeExecutor;
use trade_engine::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use trade_engine::domain::models::{
    ConditionalOrderRequest, DcaLevel, ExchangePlatform, ExecutionStatus, MarketType, OrderKind,
    OrderRequest, OrderResponse, OrderStatus, SourceMode, SymbolRules, TradeExecutionRequest,
    TradeOrderType,
};
use trade_engine::domain::repository::{
    ExchangeAdapter, GuardStore, TradeRepository, UserTradingStatus,
};
use trade_engine::infrastructure::persistence::SqliteTradeStore;

/// Scriptable exchange double. Records every call; individual legs can be
/// failed by client-order-id suffix, or every order can fail with a fixed
/// error kind.
#[derive(Default)]
struct MockAdapter {
    rules_error: Option<ErrorKind>,
    fail_order_suffixes: Vec<String>,
    fail_all_orders_with: Option<ErrorKind>,
    place_calls: Mutex<Vec<OrderRequest>>,
    conditional_calls: Mutex<Vec<ConditionalOrderRequest>>,
    leverage_calls: AtomicU32,
    cancel_calls: AtomicU32,
    rules_calls: AtomicU32,
    next_id: AtomicU64,
}

impl MockAdapter {
    fn total_calls(&self) -> usize {
        self.place_calls.lock().unwrap().len()
            + self.conditional_calls.lock().unwrap().len()
            + self.leverage_calls.load(Ordering::SeqCst) as usize
            + self.cancel_calls.load(Ordering::SeqCst) as usize
            + self.rules_calls.load(Ordering::SeqCst) as usize
    }

    fn ack(&self, quantity: Decimal, price: Option<Decimal>, filled: bool) -> OrderResponse {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        OrderResponse {
            platform_order_id: format!("ex-{}", id),
            client_order_id: None,
            status: if filled { OrderStatus::Filled } else { OrderStatus::Pending },
            filled_quantity: if filled { quantity } else { Decimal::ZERO },
            average_price: if filled { price } else { None },
            timestamp: 1_700_000_000_000,
        }
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn platform(&self) -> ExchangePlatform {
        ExchangePlatform::Binance
    }

    async fn symbol_rules(&self, _symbol: &str, _market: MarketType) -> ExecutionResult<SymbolRules> {
        self.rules_calls.fetch_add(1, Ordering::SeqCst);
        match self.rules_error {
            Some(kind) => Err(ExecutionError::new(kind)),
            None => Ok(SymbolRules::from_steps(dec!(0.001), dec!(0.01), dec!(0.001))),
        }
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> ExecutionResult<()> {
        self.leverage_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> ExecutionResult<OrderResponse> {
        self.place_calls.lock().unwrap().push(request.clone());
        if let Some(kind) = self.fail_all_orders_with {
            return Err(ExecutionError::new(kind));
        }
        if self
            .fail_order_suffixes
            .iter()
            .any(|suffix| request.client_order_id.ends_with(suffix))
        {
            return Err(ExecutionError::new(ErrorKind::OrderPlacementFailed));
        }
        // Market orders fill immediately; limit orders rest on the book.
        let filled = request.kind == OrderKind::Market;
        Ok(self.ack(request.quantity, request.price, filled))
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> ExecutionResult<OrderResponse> {
        self.conditional_calls.lock().unwrap().push(request.clone());
        if let Some(kind) = self.fail_all_orders_with {
            return Err(ExecutionError::new(kind));
        }
        if self
            .fail_order_suffixes
            .iter()
            .any(|suffix| request.client_order_id.ends_with(suffix))
        {
            return Err(ExecutionError::new(ErrorKind::OrderPlacementFailed));
        }
        Ok(self.ack(request.quantity, request.limit_price, false))
    }

    async fn cancel_open_orders(&self, _symbol: &str, _market: MarketType) -> ExecutionResult<u32> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn balance(&self, _asset: &str) -> ExecutionResult<Decimal> {
        Ok(dec!(10000))
    }

    async fn order_status(
        &self,
        _symbol: &str,
        _market: MarketType,
        platform_order_id: &str,
    ) -> ExecutionResult<OrderResponse> {
        Ok(OrderResponse {
            platform_order_id: platform_order_id.to_string(),
            client_order_id: None,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: 1_700_000_000_000,
        })
    }
}

struct FakeGuardStore {
    kill_switch: bool,
    user_disabled_reason: Option<String>,
}

impl Default for FakeGuardStore {
    fn default() -> Self {
        Self { kill_switch: false, user_disabled_reason: None }
    }
}

impl GuardStore for FakeGuardStore {
    fn kill_switch_enabled(&self) -> ExecutionResult<bool> {
        Ok(self.kill_switch)
    }

    fn user_trading_status(&self, _user_id: &str) -> ExecutionResult<Option<UserTradingStatus>> {
        Ok(self.user_disabled_reason.as_ref().map(|reason| UserTradingStatus {
            enabled: false,
            reason: Some(reason.clone()),
        }))
    }

    fn feature_enabled(&self, _key: &str) -> ExecutionResult<Option<bool>> {
        Ok(None)
    }
}

struct Harness {
    executor: TradeExecutor,
    adapter: Arc<MockAdapter>,
    store: Arc<SqliteTradeStore>,
}

fn harness(adapter: MockAdapter, guard: FakeGuardStore) -> Harness {
    let adapter = Arc::new(adapter);
    let store = Arc::new(SqliteTradeStore::open_in_memory().unwrap());

    let mut adapters: HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert(ExchangePlatform::Binance, adapter.clone());

    let executor = TradeExecutor::new(
        adapters,
        store.clone(),
        GuardGate::new(Arc::new(guard)),
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
        None,
    );

    Harness { executor, adapter, store }
}

fn entry_only_request() -> TradeExecutionRequest {
    TradeExecutionRequest {
        platform: ExchangePlatform::Binance,
        symbol: "BTC/USDT".to_string(),
        market_type: MarketType::Spot,
        order_type: OrderKind::Market,
        entry_price: dec!(50000),
        stop_loss_price: None,
        take_profit_price: None,
        initial_amount: dec!(50),
        dca_levels: Vec::new(),
        leverage: 1,
        auto_execute: true,
        user_id: "user-1".to_string(),
        signal_id: None,
        source_mode: SourceMode::ManualExecute,
        managed_by_bot: false,
    }
    .validate()
    .unwrap()
}

#[tokio::test]
async fn entry_only_trade_places_one_market_order() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let report = h.executor.execute(entry_only_request()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Active);
    assert_eq!(report.orders.len(), 1);
    let entry = &report.orders[0];
    assert_eq!(entry.order_type, TradeOrderType::Entry);
    // 50 / 50000 = 0.001 on a 0.001 step
    assert_eq!(entry.quantity, dec!(0.001));
    assert_eq!(report.count_of(TradeOrderType::Entry), 1);
    assert_eq!(report.count_of(TradeOrderType::Dca), 0);
    assert_eq!(report.count_of(TradeOrderType::StopLoss), 0);
    assert_eq!(report.count_of(TradeOrderType::TakeProfit), 0);

    let calls = h.adapter.place_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, OrderKind::Market);
}

#[tokio::test]
async fn entry_quantity_is_rounded_to_step() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.initial_amount = dec!(100);
    let report = h.executor.execute(request).await.unwrap();

    // 100 / 50000 = 0.002
    assert_eq!(report.orders[0].quantity, dec!(0.002));
}

#[tokio::test]
async fn dca_levels_are_independent_failures() {
    let adapter = MockAdapter {
        fail_order_suffixes: vec!["-D2".to_string()],
        ..Default::default()
    };
    let h = harness(adapter, FakeGuardStore::default());

    let mut request = entry_only_request();
    request.initial_amount = dec!(100);
    request.signal_id = Some("sig-dca".to_string());
    request.dca_levels = vec![
        DcaLevel { level: 1, target_price: dec!(49000), amount: dec!(49) },
        DcaLevel { level: 2, target_price: dec!(48000), amount: dec!(48) },
        DcaLevel { level: 3, target_price: dec!(47000), amount: dec!(47) },
    ];
    let request = request.validate().unwrap();
    let report = h.executor.execute(request).await.unwrap();

    // Level 2 failed; levels 1 and 3 still went out and the trade is live.
    assert_eq!(report.status, ExecutionStatus::Active);
    assert_eq!(report.count_of(TradeOrderType::Dca), 2);
    let placed_levels: Vec<u32> = report
        .orders
        .iter()
        .filter(|o| o.order_type == TradeOrderType::Dca)
        .map(|o| o.level)
        .collect();
    assert_eq!(placed_levels, vec![1, 3]);

    // All three levels were attempted.
    let attempts = h.adapter.place_calls.lock().unwrap();
    assert_eq!(attempts.len(), 4); // entry + 3 DCA

    let trade_id = report.trade_id.unwrap();
    let events = h.store.list_events(&trade_id).unwrap();
    assert!(events.iter().any(|e| e.event_type == "DCA_LEVEL_FAILED"));
}

#[tokio::test]
async fn stop_loss_covers_entry_plus_placed_dca_quantity() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.initial_amount = dec!(100);
    request.stop_loss_price = Some(dec!(45000));
    request.dca_levels = vec![DcaLevel {
        level: 1,
        target_price: dec!(48000),
        amount: dec!(48),
    }];
    let request = request.validate().unwrap();
    let report = h.executor.execute(request).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Active);
    // entry 0.002 + DCA 0.001
    let conditionals = h.adapter.conditional_calls.lock().unwrap();
    assert_eq!(conditionals.len(), 1);
    assert_eq!(conditionals[0].quantity, dec!(0.003));
    assert_eq!(conditionals[0].trigger_price, dec!(45000));
    assert!(conditionals[0].limit_price.is_none(), "stop-loss executes as market");
}

#[tokio::test]
async fn take_profit_is_triggered_and_limited_at_target() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.take_profit_price = Some(dec!(55000));
    let report = h.executor.execute(request).await.unwrap();

    assert_eq!(report.count_of(TradeOrderType::TakeProfit), 1);
    let conditionals = h.adapter.conditional_calls.lock().unwrap();
    assert_eq!(conditionals[0].trigger_price, dec!(55000));
    assert_eq!(conditionals[0].limit_price, Some(dec!(55000)));
}

#[tokio::test]
async fn failed_protective_leg_keeps_trade_active() {
    let adapter = MockAdapter {
        fail_order_suffixes: vec!["-SL".to_string()],
        ..Default::default()
    };
    let h = harness(adapter, FakeGuardStore::default());

    let mut request = entry_only_request();
    request.stop_loss_price = Some(dec!(45000));
    let report = h.executor.execute(request).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Active);
    assert_eq!(report.count_of(TradeOrderType::StopLoss), 0);

    let trade_id = report.trade_id.unwrap();
    let events = h.store.list_events(&trade_id).unwrap();
    assert!(events.iter().any(|e| e.event_type == "STOP_LOSS_FAILED"));
}

#[tokio::test]
async fn duplicate_signal_submission_short_circuits() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.signal_id = Some("sig-99".to_string());

    let first = h.executor.execute(request.clone()).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Active);
    let placed_after_first = h.adapter.place_calls.lock().unwrap().len();

    let second = h.executor.execute(request).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Duplicate);
    assert_eq!(second.trade_id, first.trade_id);
    assert!(second.orders.is_empty());
    assert_eq!(
        h.adapter.place_calls.lock().unwrap().len(),
        placed_after_first,
        "duplicate must place no new orders"
    );
}

#[tokio::test]
async fn kill_switch_blocks_before_any_adapter_call() {
    let guard = FakeGuardStore { kill_switch: true, ..Default::default() };
    let h = harness(MockAdapter::default(), guard);

    let err = h.executor.execute(entry_only_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidUser);
    assert_eq!(h.adapter.total_calls(), 0, "no adapter method may run under the kill switch");
}

#[tokio::test]
async fn disabled_user_is_denied_with_reason() {
    let guard = FakeGuardStore {
        user_disabled_reason: Some("compliance hold".to_string()),
        ..Default::default()
    };
    let h = harness(MockAdapter::default(), guard);

    let err = h.executor.execute(entry_only_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidUser);
    assert!(err.message.contains("compliance hold"));
}

#[tokio::test]
async fn staged_trade_records_without_exchange_calls() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.auto_execute = false;
    let report = h.executor.execute(request).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Pending);
    assert!(report.orders.is_empty());
    assert!(report.trade_id.is_some());
    assert_eq!(h.adapter.total_calls(), 0);
}

#[tokio::test]
async fn symbol_rules_failure_aborts_without_orders() {
    let adapter = MockAdapter {
        rules_error: Some(ErrorKind::NetworkError),
        ..Default::default()
    };
    let h = harness(adapter, FakeGuardStore::default());

    let err = h.executor.execute(entry_only_request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::SymbolInfoFailed);
    assert!(h.adapter.place_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn retryable_entry_failure_is_retried_then_fails_the_trade() {
    let adapter = MockAdapter {
        fail_all_orders_with: Some(ErrorKind::Timeout),
        ..Default::default()
    };
    let h = harness(adapter, FakeGuardStore::default());

    let report = h.executor.execute(entry_only_request()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.orders.is_empty());
    let first_error = report.first_error.unwrap();
    assert_eq!(first_error.kind, ErrorKind::RetryExhausted);
    // The retry policy allows three attempts for a retryable error.
    assert_eq!(h.adapter.place_calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn non_retryable_entry_failure_is_attempted_once() {
    let adapter = MockAdapter {
        fail_all_orders_with: Some(ErrorKind::InsufficientBalance),
        ..Default::default()
    };
    let h = harness(adapter, FakeGuardStore::default());

    let report = h.executor.execute(entry_only_request()).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.first_error.unwrap().kind, ErrorKind::InsufficientBalance);
    assert_eq!(h.adapter.place_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn futures_leverage_is_set_before_entry() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.market_type = MarketType::Futures;
    request.leverage = 5;
    let report = h.executor.execute(request).await.unwrap();

    assert_eq!(report.status, ExecutionStatus::Active);
    assert_eq!(h.adapter.leverage_calls.load(Ordering::SeqCst), 1);

    // Spot requests never touch leverage.
    let report = h.executor.execute(entry_only_request()).await.unwrap();
    assert_eq!(report.status, ExecutionStatus::Active);
    assert_eq!(h.adapter.leverage_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_rows_exist_for_placed_orders() {
    let h = harness(MockAdapter::default(), FakeGuardStore::default());

    let mut request = entry_only_request();
    request.signal_id = Some("sig-rows".to_string());
    let report = h.executor.execute(request).await.unwrap();

    let trade_id = report.trade_id.unwrap();
    let events = h.store.list_events(&trade_id).unwrap();
    // CREATED for the entry order plus the FILL from the market ack.
    assert!(events.iter().any(|e| e.event_type == "CREATED"));
    assert!(events.iter().any(|e| e.event_type == "FILL"));

    // The prior submission is findable for idempotency through the store.
    let hit = h
        .store
        .find_by_client_order_id("user-1", "user1-sigrows-BTCUSDT")
        .unwrap();
    assert!(hit.is_some());
}
