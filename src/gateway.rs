// ===============================
// src/gateway.rs
// ===============================
//
// Exchange access as seen by the strategy:
// - `ExchangeGateway` : narrow async capability (place post-only, cancel,
//                        open orders, position).
// - `PaperGateway`    : simulated venue. Accepts every post-only order,
//                        optionally fills resting orders the book trades
//                        through, and doubles as the test double (fault
//                        injection + call history).
//
// The live DeepCoin implementation lives in gateway_deepcoin.rs.
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Position, Side, WorkingOrder};
use crate::orderbook::OrderBook;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange rejected request (code {code}): {msg}")]
    Api { code: String, msg: String },
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unknown order {0}")]
    UnknownOrder(String),
    #[error("missing credential {0}")]
    MissingCredential(&'static str),
    #[error("simulated {0} failure")]
    Simulated(&'static str),
}

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place a maker-only order. Must never execute as taker.
    async fn place_post_only(&self, inst_id: &str, side: Side, px: f64, sz: f64) -> Result<String, GatewayError>;

    async fn cancel(&self, inst_id: &str, order_id: &str) -> Result<(), GatewayError>;

    async fn open_orders(&self, inst_id: &str) -> Result<Vec<WorkingOrder>, GatewayError>;

    async fn position(&self, inst_id: &str) -> Result<Position, GatewayError>;
}

/// Gateway operations, used for fault injection and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp { Place, Cancel, OpenOrders, Position }

impl GatewayOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOp::Place => "place",
            GatewayOp::Cancel => "cancel",
            GatewayOp::OpenOrders => "open_orders",
            GatewayOp::Position => "position",
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    orders: HashMap<String, WorkingOrder>,
    position: f64,
    failing: Vec<GatewayOp>,
    placed: Vec<WorkingOrder>,
    cancelled: Vec<String>,
}

/// Simulated venue.
#[derive(Debug, Default)]
pub struct PaperGateway {
    state: Mutex<PaperState>,
    next_id: AtomicU64,
    book: Option<Arc<OrderBook>>,
}

impl PaperGateway {
    pub fn new() -> Self { Self::default() }

    /// Paper venue that fills resting orders against `book` whenever the
    /// position is queried.
    pub fn with_book(book: Arc<OrderBook>) -> Self {
        Self { book: Some(book), ..Self::default() }
    }

    pub fn set_position(&self, net: f64) { self.state.lock().position = net; }

    /// Make every subsequent call of `op` fail until switched back.
    pub fn set_failing(&self, op: GatewayOp, failing: bool) {
        let mut st = self.state.lock();
        st.failing.retain(|o| *o != op);
        if failing {
            st.failing.push(op);
        }
    }

    /// Every order ever accepted, oldest first.
    pub fn placed(&self) -> Vec<WorkingOrder> { self.state.lock().placed.clone() }

    /// Ids of every successful cancel, oldest first.
    pub fn cancelled(&self) -> Vec<String> { self.state.lock().cancelled.clone() }

    pub fn resting(&self) -> usize { self.state.lock().orders.len() }

    fn check(&self, st: &PaperState, op: GatewayOp) -> Result<(), GatewayError> {
        if st.failing.contains(&op) {
            return Err(GatewayError::Simulated(op.as_str()));
        }
        Ok(())
    }

    /// Fill resting orders the book has traded through: a bid fills once the
    /// best ask is at or below it, an ask once the best bid is at or above it.
    fn sweep(st: &mut PaperState, book: &OrderBook) {
        let (best_bid, best_ask) = book.top_of_book();
        let filled: Vec<String> = st
            .orders
            .values()
            .filter(|o| match o.side {
                Side::Buy => best_ask.is_some_and(|a| a <= o.px),
                Side::Sell => best_bid.is_some_and(|b| b >= o.px),
            })
            .map(|o| o.id.clone())
            .collect();
        for id in filled {
            if let Some(o) = st.orders.remove(&id) {
                st.position += o.side.sign() * o.sz;
                info!(oid = %o.id, side = ?o.side, px = o.px, sz = o.sz, position = st.position, "paper fill");
            }
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn place_post_only(&self, inst_id: &str, side: Side, px: f64, sz: f64) -> Result<String, GatewayError> {
        let mut st = self.state.lock();
        self.check(&st, GatewayOp::Place)?;
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("PAPER-{n}");
        let order = WorkingOrder { id: id.clone(), side, inst_id: inst_id.to_string(), px, sz, placed_at: Utc::now() };
        debug!(oid = %id, side = ?side, px, sz, "paper place");
        st.placed.push(order.clone());
        st.orders.insert(id.clone(), order);
        Ok(id)
    }

    async fn cancel(&self, _inst_id: &str, order_id: &str) -> Result<(), GatewayError> {
        let mut st = self.state.lock();
        self.check(&st, GatewayOp::Cancel)?;
        match st.orders.remove(order_id) {
            Some(_) => {
                st.cancelled.push(order_id.to_string());
                Ok(())
            }
            None => Err(GatewayError::UnknownOrder(order_id.to_string())),
        }
    }

    async fn open_orders(&self, inst_id: &str) -> Result<Vec<WorkingOrder>, GatewayError> {
        let st = self.state.lock();
        self.check(&st, GatewayOp::OpenOrders)?;
        let mut out: Vec<WorkingOrder> = st.orders.values().filter(|o| o.inst_id == inst_id).cloned().collect();
        out.sort_by_key(|o| o.placed_at);
        Ok(out)
    }

    async fn position(&self, inst_id: &str) -> Result<Position, GatewayError> {
        let mut st = self.state.lock();
        self.check(&st, GatewayOp::Position)?;
        if let Some(book) = &self.book {
            Self::sweep(&mut st, book);
        }
        Ok(Position::new(inst_id, st.position))
    }
}
