// ===============================
// src/strategy.rs
// ===============================
//
// Inventory-skewed market making around the book midpoint.
//
// Per tick:
//   mid (skip if unavailable) -> position (skip on error) -> skew -> target
//   prices -> reprice trigger -> caps -> cancel side(s) -> ensure order per
//   side -> remember mid.
//
// Remarks:
//   - No amend. A new price only lands after the slot was cancelled on an
//     earlier step (reprice or cap), then "ensure" places a fresh order.
//   - Cancel always clears the local slot, even when the remote cancel
//     failed. A failed cancel can leave an orphaned order on the exchange.
//   - Fills are not observed. A filled quote keeps occupying its slot until
//     the next reprice cancels it (the cancel then fails remotely and the
//     slot is cleared anyway).
//

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Side, WorkingOrder};
use crate::gateway::{ExchangeGateway, GatewayOp};
use crate::metrics::{GATEWAY_ERRORS, MID_PRICE, ORDERS_CANCELLED, ORDERS_PLACED, POSITION, TICKS_SKIPPED};
use crate::orderbook::OrderBook;
use crate::risk::check_quote;

/// Quoting parameters (all sizes in contracts, spreads in bps).
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteParams {
    pub quote_size: f64,
    pub base_spread_bps: f64,
    pub reprice_bps: f64,
    pub max_position: f64,
    pub target_position: f64,
    pub hedge_threshold: f64,
}

impl Default for QuoteParams {
    fn default() -> Self {
        Self {
            quote_size: 1.0,
            base_spread_bps: 5.0,
            reprice_bps: 2.0,
            max_position: 10.0,
            target_position: 0.0,
            hedge_threshold: 3.0,
        }
    }
}

/// Inventory skew in bps. Positive when long beyond target (bid wider, ask
/// tighter), negative when short beyond target, 0 inside the hedge threshold.
pub fn skew_bps(p: &QuoteParams, position: f64) -> f64 {
    let delta = position - p.target_position;
    if delta.abs() <= p.hedge_threshold {
        return 0.0;
    }
    let k = (delta.abs() / p.max_position).min(1.0);
    p.base_spread_bps * k * delta.signum()
}

/// True when there is no previous mid or it moved by at least `reprice_bps`.
pub fn reprice_needed(last_mid: Option<f64>, mid: f64, reprice_bps: f64) -> bool {
    match last_mid {
        None => true,
        Some(last) if last == 0.0 => true,
        Some(last) => (mid - last).abs() / last * 1e4 >= reprice_bps,
    }
}

/// Everything a tick decides before talking to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotePlan {
    pub mid: f64,
    pub skew_bps: f64,
    pub bid_px: f64,
    pub ask_px: f64,
    pub reprice: bool,
    pub suppress_bid: bool,
    pub suppress_ask: bool,
}

impl QuotePlan {
    pub fn bid_spread_bps(&self, p: &QuoteParams) -> f64 { p.base_spread_bps + self.skew_bps }
    pub fn ask_spread_bps(&self, p: &QuoteParams) -> f64 { p.base_spread_bps - self.skew_bps }

    pub fn price(&self, side: Side) -> f64 {
        match side { Side::Buy => self.bid_px, Side::Sell => self.ask_px }
    }

    pub fn suppressed(&self, side: Side) -> bool {
        match side { Side::Buy => self.suppress_bid, Side::Sell => self.suppress_ask }
    }

    /// Cancel the working order on `side` this tick?
    pub fn cancels(&self, side: Side) -> bool { self.reprice || self.suppressed(side) }
}

pub fn plan_quotes(p: &QuoteParams, mid: f64, last_mid: Option<f64>, position: f64) -> QuotePlan {
    let skew = skew_bps(p, position);
    QuotePlan {
        mid,
        skew_bps: skew,
        bid_px: mid * (1.0 - (p.base_spread_bps + skew) / 1e4),
        ask_px: mid * (1.0 + (p.base_spread_bps - skew) / 1e4),
        reprice: reprice_needed(last_mid, mid, p.reprice_bps),
        // hard caps
        suppress_bid: position >= p.max_position,
        suppress_ask: position <= -p.max_position,
    }
}

/// Private strategy state: last mid and one working slot per side.
#[derive(Debug, Default, Clone)]
pub struct StrategyState {
    pub last_mid: Option<f64>,
    bid: Option<WorkingOrder>,
    ask: Option<WorkingOrder>,
}

impl StrategyState {
    pub fn working(&self, side: Side) -> Option<&WorkingOrder> {
        match side { Side::Buy => self.bid.as_ref(), Side::Sell => self.ask.as_ref() }
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<WorkingOrder> {
        match side { Side::Buy => &mut self.bid, Side::Sell => &mut self.ask }
    }
}

/// What a tick ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoMid,
    NoPosition,
    Quoted { plan: QuotePlan, cancelled: Vec<Side>, placed: Vec<Side> },
}

pub struct MarketMaker {
    inst_id: String,
    params: QuoteParams,
    book: Arc<OrderBook>,
    gateway: Arc<dyn ExchangeGateway>,
    state: StrategyState,
}

impl MarketMaker {
    pub fn new(inst_id: impl Into<String>, params: QuoteParams, book: Arc<OrderBook>, gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { inst_id: inst_id.into(), params, book, gateway, state: StrategyState::default() }
    }

    pub fn state(&self) -> &StrategyState { &self.state }
    pub fn params(&self) -> &QuoteParams { &self.params }

    pub async fn tick(&mut self) -> TickOutcome {
        let Some(mid) = self.book.mid() else {
            debug!("mid unavailable, skip tick");
            TICKS_SKIPPED.with_label_values(&["no_mid"]).inc();
            return TickOutcome::NoMid;
        };

        let position = match self.gateway.position(&self.inst_id).await {
            Ok(p) => p.net,
            Err(e) => {
                debug!(error = %e, "position unavailable, skip tick");
                GATEWAY_ERRORS.with_label_values(&[GatewayOp::Position.as_str()]).inc();
                TICKS_SKIPPED.with_label_values(&["no_position"]).inc();
                return TickOutcome::NoPosition;
            }
        };
        POSITION.set(position);
        MID_PRICE.set(mid);

        let plan = plan_quotes(&self.params, mid, self.state.last_mid, position);
        debug!(
            mid,
            position,
            skew_bps = plan.skew_bps,
            bid_px = plan.bid_px,
            ask_px = plan.ask_px,
            reprice = plan.reprice,
            suppress_bid = plan.suppress_bid,
            suppress_ask = plan.suppress_ask,
            "quote plan"
        );

        let mut cancelled = Vec::new();
        for side in [Side::Buy, Side::Sell] {
            if plan.cancels(side) && self.cancel_side(side).await {
                cancelled.push(side);
            }
        }

        let mut placed = Vec::new();
        for side in [Side::Buy, Side::Sell] {
            if !plan.suppressed(side) && self.ensure_order(side, plan.price(side), mid).await {
                placed.push(side);
            }
        }

        self.state.last_mid = Some(mid);
        TickOutcome::Quoted { plan, cancelled, placed }
    }

    /// Place a post-only order on `side` unless one is already working.
    /// Returns true when a new order was placed.
    async fn ensure_order(&mut self, side: Side, px: f64, mid: f64) -> bool {
        if self.state.working(side).is_some() {
            return false;
        }
        let sz = self.params.quote_size;
        if let Err(e) = check_quote(side, px, sz, mid) {
            warn!(error = %e, side = ?side, "quote refused by risk check");
            return false;
        }
        match self.gateway.place_post_only(&self.inst_id, side, px, sz).await {
            Ok(id) => {
                info!(oid = %id, side = ?side, px, sz, "quote placed");
                ORDERS_PLACED.with_label_values(&[side.as_str()]).inc();
                *self.state.slot_mut(side) = Some(WorkingOrder {
                    id,
                    side,
                    inst_id: self.inst_id.clone(),
                    px,
                    sz,
                    placed_at: Utc::now(),
                });
                true
            }
            Err(e) => {
                warn!(error = %e, side = ?side, px, "place failed");
                GATEWAY_ERRORS.with_label_values(&[GatewayOp::Place.as_str()]).inc();
                false
            }
        }
    }

    /// Cancel the working order on `side`, if any. The slot is cleared even
    /// when the gateway reports failure. Returns true when a slot was cleared.
    async fn cancel_side(&mut self, side: Side) -> bool {
        let Some(order) = self.state.slot_mut(side).take() else {
            return false;
        };
        match self.gateway.cancel(&self.inst_id, &order.id).await {
            Ok(()) => {
                info!(oid = %order.id, side = ?side, px = order.px, "quote cancelled");
                ORDERS_CANCELLED.with_label_values(&[side.as_str()]).inc();
            }
            Err(e) => {
                warn!(error = %e, oid = %order.id, side = ?side, "cancel failed, slot cleared anyway");
                GATEWAY_ERRORS.with_label_values(&[GatewayOp::Cancel.as_str()]).inc();
            }
        }
        true
    }

    /// Best-effort cancel of both working orders (shutdown path).
    pub async fn cancel_all(&mut self) {
        for side in [Side::Buy, Side::Sell] {
            self.cancel_side(side).await;
        }
    }

    /// Tick every `refresh` until `cancel` fires, then pull the quotes.
    pub async fn run(mut self, refresh: Duration, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + refresh, refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(inst_id = %self.inst_id, refresh_ms = refresh.as_millis() as u64, params = ?self.params, "strategy started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.cancel_all().await;
        info!("strategy stopped");
    }
}
