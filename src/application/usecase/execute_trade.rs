// src/application/usecase/execute_trade.rs
// Orchestrates one trade execution: guard, idempotency, symbol rules,
// leverage, entry, DCA ladder, stop-loss and take-profit, lifecycle
// persistence. Order placement within a trade is strictly sequential; the
// stop-loss size depends on which earlier legs actually went out.

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::guard::{GuardDecision, GuardGate};
use crate::application::retry::{with_retry, RetryPolicy};
use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
use crate::domain::idempotency::{generate_client_order_id, leg_client_order_id};
use crate::domain::models::{
    ConditionalKind, ConditionalOrderRequest, EventSource, ExchangePlatform, ExecutionReport,
    ExecutionStatus, MarketType, OrderKind, OrderRequest, OrderResponse, OrderSide, OrderStatus,
    PlacedOrder, SymbolRules, Trade, TradeExecutionRequest, TradeOrder, TradeOrderType,
    TradeStatus,
};
use crate::domain::repository::{ExchangeAdapter, FillUpdate, TradeRepository};

pub struct TradeExecutor {
    adapters: HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>>,
    repository: Arc<dyn TradeRepository>,
    guard: GuardGate,
    retry: RetryPolicy,
    feature_key: Option<String>,
}

impl TradeExecutor {
    pub fn new(
        adapters: HashMap<ExchangePlatform, Arc<dyn ExchangeAdapter>>,
        repository: Arc<dyn TradeRepository>,
        guard: GuardGate,
        retry: RetryPolicy,
        feature_key: Option<String>,
    ) -> Self {
        Self {
            adapters,
            repository,
            guard,
            retry,
            feature_key,
        }
    }

    /// Run one validated execution request to completion.
    pub async fn execute(&self, request: TradeExecutionRequest) -> ExecutionResult<ExecutionReport> {
        let adapter = self
            .adapters
            .get(&request.platform)
            .cloned()
            .ok_or_else(|| {
                ExecutionError::with_message(
                    ErrorKind::ExchangeUnsupported,
                    format!("No adapter configured for {}", request.platform),
                )
            })?;

        log::debug!("executing {} on {}", request.symbol, adapter.platform());

        // Guard gate: the only policy check before any exchange call.
        if let GuardDecision::Denied { reason } =
            self.guard.check(&request.user_id, self.feature_key.as_deref())
        {
            log::warn!("trade for {} denied by guard: {}", request.user_id, reason);
            self.best_effort(
                "guard denial log",
                self.repository.log_auto_trade(
                    Some(&request.user_id),
                    "guard_denied",
                    &reason,
                    Some(json!({ "symbol": request.symbol, "platform": request.platform.as_str() })),
                ),
            );
            return Err(ExecutionError::with_message(ErrorKind::InvalidUser, reason));
        }

        let client_order_id = generate_client_order_id(
            &request.user_id,
            request.signal_id.as_deref(),
            &request.symbol,
            None,
        );

        // Fast-path duplicate check. A lookup failure is treated as
        // not-existing so a storage blip cannot block the fleet.
        match self
            .repository
            .find_by_client_order_id(&request.user_id, &client_order_id)
        {
            Ok(Some(hit)) => {
                log::info!(
                    "duplicate submission for {} ({}), short-circuiting",
                    client_order_id,
                    hit.trade_id
                );
                return Ok(ExecutionReport {
                    trade_id: Some(hit.trade_id),
                    status: ExecutionStatus::Duplicate,
                    orders: Vec::new(),
                    first_error: None,
                });
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("idempotency lookup failed, continuing: {}", e);
            }
        }

        let trade = self.build_trade(&request, &client_order_id);

        // The UNIQUE constraint on client_order_id closes the window the
        // pre-check leaves open: a racing duplicate loses the insert.
        if let Err(e) = self.repository.create_trade(&trade) {
            if e.kind == ErrorKind::DuplicateOrder {
                let existing = self
                    .repository
                    .find_by_client_order_id(&request.user_id, &client_order_id)
                    .ok()
                    .flatten();
                return Ok(ExecutionReport {
                    trade_id: existing.map(|hit| hit.trade_id),
                    status: ExecutionStatus::Duplicate,
                    orders: Vec::new(),
                    first_error: None,
                });
            }
            return Err(e);
        }

        // Staged trade: recorded, nothing sent to the exchange.
        if !request.auto_execute {
            log::info!(
                "trade {} staged for {} without execution",
                trade.id,
                request.symbol
            );
            return Ok(ExecutionReport {
                trade_id: Some(trade.id),
                status: ExecutionStatus::Pending,
                orders: Vec::new(),
                first_error: None,
            });
        }

        // Symbol rules are fatal and not retried: without validated
        // precision no order may go out.
        let rules = match adapter.symbol_rules(&request.symbol, request.market_type).await {
            Ok(rules) => rules,
            Err(e) => {
                let error = ExecutionError::with_message(
                    ErrorKind::SymbolInfoFailed,
                    format!("Failed to resolve rules for {}: {}", request.symbol, e.message),
                );
                self.mark_trade_failed(&trade, &error);
                return Err(error);
            }
        };

        self.prepare_market(&request, adapter.as_ref(), &trade).await;

        let mut placed: Vec<PlacedOrder> = Vec::new();

        // Entry leg; its failure is fatal for the request.
        let entry_quantity = match self
            .place_entry(&request, adapter.as_ref(), &trade, &rules, &client_order_id, &mut placed)
            .await
        {
            Ok(quantity) => quantity,
            Err(error) => {
                self.mark_trade_failed(&trade, &error);
                return Ok(ExecutionReport {
                    trade_id: Some(trade.id),
                    status: ExecutionStatus::Failed,
                    orders: placed,
                    first_error: Some(error),
                });
            }
        };

        // DCA ladder: independent opportunities, each failure is skipped.
        let dca_quantity = self
            .place_dca_ladder(&request, adapter.as_ref(), &trade, &rules, &client_order_id, &mut placed)
            .await;

        let protected_quantity = entry_quantity + dca_quantity;

        if let Some(stop_price) = request.stop_loss_price {
            self.place_protective_leg(
                &request,
                adapter.as_ref(),
                &trade,
                &rules,
                &client_order_id,
                &mut placed,
                TradeOrderType::StopLoss,
                protected_quantity,
                stop_price,
                false,
            )
            .await;
        }

        if let Some(tp_price) = request.take_profit_price {
            self.place_protective_leg(
                &request,
                adapter.as_ref(),
                &trade,
                &rules,
                &client_order_id,
                &mut placed,
                TradeOrderType::TakeProfit,
                protected_quantity,
                tp_price,
                true,
            )
            .await;
        }

        let status = if placed.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Active
        };
        self.best_effort(
            "trade status update",
            self.repository.update_trade_status(
                &trade.id,
                match status {
                    ExecutionStatus::Active => TradeStatus::Active,
                    _ => TradeStatus::Failed,
                },
            ),
        );

        log::info!(
            "trade {} finished with {} order(s), status {}",
            trade.id,
            placed.len(),
            status.as_str()
        );

        Ok(ExecutionReport {
            trade_id: Some(trade.id),
            status,
            orders: placed,
            first_error: None,
        })
    }

    fn build_trade(&self, request: &TradeExecutionRequest, client_order_id: &str) -> Trade {
        let total_planned = request.initial_amount
            + request
                .dca_levels
                .iter()
                .map(|l| l.amount)
                .sum::<Decimal>();
        Trade {
            id: Uuid::new_v4().to_string(),
            user_id: request.user_id.clone(),
            symbol: request.symbol.clone(),
            side: OrderSide::Buy,
            leverage: request.leverage,
            status: TradeStatus::Pending,
            platform: request.platform,
            entry_price: request.entry_price,
            stop_loss_price: request.stop_loss_price,
            take_profit_price: request.take_profit_price,
            quantity: request.initial_amount / request.entry_price,
            total_invested: total_planned,
            client_order_id: client_order_id.to_string(),
            signal_id: request.signal_id.clone(),
            source_mode: request.source_mode,
            managed_by_bot: request.managed_by_bot,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    /// Leverage and stale-order cleanup. Both are non-fatal: execution
    /// continues at current leverage if the set call fails, and leftover
    /// orders only matter when they exist.
    async fn prepare_market(
        &self,
        request: &TradeExecutionRequest,
        adapter: &dyn ExchangeAdapter,
        trade: &Trade,
    ) {
        if request.market_type == MarketType::Futures && request.leverage > 1 {
            let result = with_retry(&self.retry, "set_leverage", || {
                adapter.set_leverage(&request.symbol, request.leverage)
            })
            .await;
            if let Err(e) = result {
                log::warn!(
                    "failed to set leverage {} on {}: {}",
                    request.leverage,
                    request.symbol,
                    e
                );
                self.best_effort(
                    "leverage failure event",
                    self.repository.append_trade_event(
                        &trade.id,
                        "LEVERAGE_SET_FAILED",
                        EventSource::System,
                        Some(json!({ "leverage": request.leverage, "error": e.message })),
                    ),
                );
            }
        }

        let result = with_retry(&self.retry, "cancel_open_orders", || {
            adapter.cancel_open_orders(&request.symbol, request.market_type)
        })
        .await;
        match result {
            Ok(cancelled) if cancelled > 0 => {
                log::info!("cancelled {} stale open order(s) on {}", cancelled, request.symbol);
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("failed to cancel open orders on {}: {}", request.symbol, e);
            }
        }
    }

    async fn place_entry(
        &self,
        request: &TradeExecutionRequest,
        adapter: &dyn ExchangeAdapter,
        trade: &Trade,
        rules: &SymbolRules,
        client_order_id: &str,
        placed: &mut Vec<PlacedOrder>,
    ) -> ExecutionResult<Decimal> {
        let quantity = rules.format_quantity(request.initial_amount / request.entry_price)?;
        let price = match request.order_type {
            OrderKind::Limit => Some(rules.format_price(request.entry_price)?),
            OrderKind::Market => None,
        };

        let order_request = OrderRequest {
            symbol: request.symbol.clone(),
            market: request.market_type,
            side: OrderSide::Buy,
            kind: request.order_type,
            quantity,
            price,
            client_order_id: client_order_id.to_string(),
        };

        let mut ack = with_retry(&self.retry, "place_entry_order", || {
            adapter.place_order(&order_request)
        })
        .await
        .map_err(|e| {
            self.best_effort(
                "entry failure event",
                self.repository.append_trade_event(
                    &trade.id,
                    "ENTRY_FAILED",
                    EventSource::System,
                    Some(json!({ "error": e.message, "code": e.kind.code() })),
                ),
            );
            e
        })?;

        // Some exchanges acknowledge a market order before reporting its
        // fill; one follow-up status query captures it when available.
        if ack.status == OrderStatus::Pending && request.order_type == OrderKind::Market {
            match adapter
                .order_status(&request.symbol, request.market_type, &ack.platform_order_id)
                .await
            {
                Ok(current) => ack = current,
                Err(e) => log::debug!("entry fill lookup failed: {}", e),
            }
        }

        self.record_placed(trade, TradeOrderType::Entry, 0, &order_request.client_order_id, price, quantity, &ack, placed);
        Ok(quantity)
    }

    /// Places each DCA level; returns the total successfully placed
    /// quantity so protective legs can cover it.
    async fn place_dca_ladder(
        &self,
        request: &TradeExecutionRequest,
        adapter: &dyn ExchangeAdapter,
        trade: &Trade,
        rules: &SymbolRules,
        client_order_id: &str,
        placed: &mut Vec<PlacedOrder>,
    ) -> Decimal {
        let mut total = Decimal::ZERO;

        for level in &request.dca_levels {
            let leg_id = leg_client_order_id(client_order_id, &format!("D{}", level.level));

            let prepared = rules
                .format_quantity(level.amount / level.target_price)
                .and_then(|qty| Ok((qty, rules.format_price(level.target_price)?)));
            let (quantity, price) = match prepared {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("skipping DCA level {}: {}", level.level, e);
                    self.record_dca_failure(trade, request, level.level, &e);
                    continue;
                }
            };

            let order_request = OrderRequest {
                symbol: request.symbol.clone(),
                market: request.market_type,
                side: OrderSide::Buy,
                kind: OrderKind::Limit,
                quantity,
                price: Some(price),
                client_order_id: leg_id,
            };

            let result = with_retry(&self.retry, "place_dca_order", || {
                adapter.place_order(&order_request)
            })
            .await;

            match result {
                Ok(ack) => {
                    self.record_placed(
                        trade,
                        TradeOrderType::Dca,
                        level.level,
                        &order_request.client_order_id,
                        Some(price),
                        quantity,
                        &ack,
                        placed,
                    );
                    self.best_effort(
                        "dca record",
                        self.repository.record_dca_order(
                            &trade.id,
                            &request.user_id,
                            &request.symbol,
                            level,
                            "PLACED",
                        ),
                    );
                    total += quantity;
                }
                Err(e) => {
                    log::warn!("DCA level {} failed on {}: {}", level.level, request.symbol, e);
                    self.record_dca_failure(trade, request, level.level, &e);
                }
            }
        }

        total
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_protective_leg(
        &self,
        request: &TradeExecutionRequest,
        adapter: &dyn ExchangeAdapter,
        trade: &Trade,
        rules: &SymbolRules,
        client_order_id: &str,
        placed: &mut Vec<PlacedOrder>,
        leg_type: TradeOrderType,
        quantity: Decimal,
        trigger_price: Decimal,
        limit_at_trigger: bool,
    ) {
        let suffix = match leg_type {
            TradeOrderType::StopLoss => "SL",
            _ => "TP",
        };
        let event = match leg_type {
            TradeOrderType::StopLoss => "STOP_LOSS_FAILED",
            _ => "TAKE_PROFIT_FAILED",
        };

        let prepared = rules
            .format_quantity(quantity)
            .and_then(|qty| Ok((qty, rules.format_price(trigger_price)?)));
        let (quantity, trigger) = match prepared {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("skipping {} leg: {}", leg_type.as_str(), e);
                self.record_leg_failure(trade, event, &e);
                return;
            }
        };

        let order_request = ConditionalOrderRequest {
            symbol: request.symbol.clone(),
            market: request.market_type,
            side: OrderSide::Sell,
            kind: match leg_type {
                TradeOrderType::StopLoss => ConditionalKind::StopLoss,
                _ => ConditionalKind::TakeProfit,
            },
            quantity,
            trigger_price: trigger,
            limit_price: if limit_at_trigger { Some(trigger) } else { None },
            client_order_id: leg_client_order_id(client_order_id, suffix),
        };

        let result = with_retry(&self.retry, "place_conditional_order", || {
            adapter.place_conditional_order(&order_request)
        })
        .await;

        match result {
            Ok(ack) => {
                let price = order_request.limit_price;
                self.record_placed(
                    trade,
                    leg_type,
                    0,
                    &order_request.client_order_id,
                    price,
                    quantity,
                    &ack,
                    placed,
                );
            }
            Err(e) => {
                // An unprotected position is still a real position; the
                // trade stays ACTIVE and the gap is recorded for operators.
                log::warn!("{} leg failed on {}: {}", leg_type.as_str(), request.symbol, e);
                self.record_leg_failure(trade, event, &e);
                self.best_effort(
                    "leg failure log",
                    self.repository.log_auto_trade(
                        Some(&request.user_id),
                        "protective_leg_failed",
                        &format!("{} on {}: {}", leg_type.as_str(), request.symbol, e.message),
                        None,
                    ),
                );
            }
        }
    }

    /// Persist one placed order: PENDING row + CREATED event, then the
    /// fill reported by the placement ack, if any. Database writes after a
    /// successful exchange call never fail the trade; the exchange is the
    /// source of truth and the store is a mirror.
    #[allow(clippy::too_many_arguments)]
    fn record_placed(
        &self,
        trade: &Trade,
        order_type: TradeOrderType,
        level: u32,
        client_order_id: &str,
        price: Option<Decimal>,
        quantity: Decimal,
        ack: &OrderResponse,
        placed: &mut Vec<PlacedOrder>,
    ) {
        let now = Utc::now().timestamp_millis();
        let order = TradeOrder {
            id: Uuid::new_v4().to_string(),
            trade_id: trade.id.clone(),
            order_type,
            level,
            platform_order_id: Some(ack.platform_order_id.clone()),
            client_order_id: client_order_id.to_string(),
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            fees: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.best_effort("order row", self.repository.create_order(&order));

        if ack.filled_quantity > Decimal::ZERO {
            self.best_effort(
                "order fill",
                self.repository
                    .record_fill(
                        &order.id,
                        &FillUpdate {
                            quantity: ack.filled_quantity,
                            price: ack.average_price,
                            fees: Decimal::ZERO,
                        },
                        EventSource::Exchange,
                    )
                    .map(|_| ()),
            );
        } else if ack.status.is_terminal() && ack.status != OrderStatus::Filled {
            self.best_effort(
                "order status",
                self.repository.update_order_status(
                    &order.id,
                    ack.status,
                    None,
                    EventSource::Exchange,
                ),
            );
        }

        placed.push(PlacedOrder {
            order_type,
            level,
            platform_order_id: ack.platform_order_id.clone(),
            client_order_id: client_order_id.to_string(),
            price,
            quantity,
            status: ack.status,
        });
    }

    fn record_dca_failure(
        &self,
        trade: &Trade,
        request: &TradeExecutionRequest,
        level: u32,
        error: &ExecutionError,
    ) {
        self.record_leg_failure(trade, "DCA_LEVEL_FAILED", error);
        if let Some(dca) = request.dca_levels.iter().find(|l| l.level == level) {
            self.best_effort(
                "dca record",
                self.repository.record_dca_order(
                    &trade.id,
                    &request.user_id,
                    &request.symbol,
                    dca,
                    "FAILED",
                ),
            );
        }
    }

    fn record_leg_failure(&self, trade: &Trade, event_type: &str, error: &ExecutionError) {
        self.best_effort(
            "leg failure event",
            self.repository.append_trade_event(
                &trade.id,
                event_type,
                EventSource::System,
                Some(json!({ "error": error.message, "code": error.kind.code() })),
            ),
        );
    }

    fn mark_trade_failed(&self, trade: &Trade, error: &ExecutionError) {
        self.best_effort(
            "trade failure status",
            self.repository.update_trade_status(&trade.id, TradeStatus::Failed),
        );
        self.best_effort(
            "terminal error log",
            self.repository.log_auto_trade(
                Some(&trade.user_id),
                "execution_failed",
                &error.message,
                Some(json!({ "code": error.kind.code(), "trade_id": trade.id })),
            ),
        );
    }

    /// Non-critical side effects must never abort the main path.
    fn best_effort(&self, label: &str, result: ExecutionResult<()>) {
        if let Err(e) = result {
            log::warn!("best-effort {} failed: {}", label, e);
        }
    }
}
