// ===============================
// src/feed.rs
// ===============================
//
// Market data adapters writing into the shared OrderBook:
// - run_session    : one DeepCoin public-WS session (connect, subscribe,
//                    ping, read, apply). Returns on cancel (Ok) or on the
//                    first fatal error; it never reconnects by itself.
// - run_supervised : reconnect loop around run_session with a fixed backoff.
//                    Every reconnect resubscribes from scratch (ResumeNo=-1).
// - run_mock       : offline random-walk top-of-book.
//

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::time::{interval, interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::deepcoin::{BookEnvelope, SubscribeRequest, RECV_TOPIC_ACTION};
use crate::domain::LevelUpdate;
use crate::metrics::{FEED_CONNECTED, FEED_MESSAGES, FEED_RECONNECTS};
use crate::orderbook::OrderBook;

pub const PING_INTERVAL: Duration = Duration::from_secs(10);
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("bad feed url: {0}")]
    Url(#[from] url::ParseError),
    #[error("instrument id {0:?} has no base/quote parts")]
    Instrument(String),
    #[error("websocket: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("encode subscription: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("subscription rejected: {0}")]
    Subscription(String),
    #[error("no data for {0:?}")]
    Stale(Duration),
    #[error("stream closed by peer")]
    Closed,
}

impl FeedError {
    /// The exchange refused the subscription itself (as opposed to a
    /// transport failure).
    pub fn is_subscription(&self) -> bool { matches!(self, FeedError::Subscription(_)) }
}

#[derive(Debug, Clone)]
pub struct FeedCfg {
    pub url: String,
    pub inst_id: String,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    pub clear_on_reconnect: bool,
}

impl FeedCfg {
    pub fn new(url: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inst_id: inst_id.into(),
            ping_interval: PING_INTERVAL,
            read_timeout: READ_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            clear_on_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Batch applied; number of entries taken by the book.
    Applied(usize),
    /// Subscription receipt with success.
    Subscribed,
    /// Envelope without entries (heartbeat-equivalent).
    Empty,
    /// Unparsable frame, skipped.
    Malformed,
}

/// Handle one text frame. Only a rejected subscription is an error.
pub fn handle_text(txt: &str, book: &OrderBook) -> Result<FrameOutcome, FeedError> {
    let env: BookEnvelope = match serde_json::from_str(txt) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, len = txt.len(), "malformed feed message, skipped");
            FEED_MESSAGES.with_label_values(&["malformed"]).inc();
            return Ok(FrameOutcome::Malformed);
        }
    };

    if let Some(msg) = env.rejection() {
        return Err(FeedError::Subscription(msg.to_string()));
    }

    if env.result.is_empty() {
        if env.action == RECV_TOPIC_ACTION {
            info!(inst_id = %book.inst_id(), "book-change subscription confirmed");
            FEED_CONNECTED.set(1);
            FEED_MESSAGES.with_label_values(&["control"]).inc();
            return Ok(FrameOutcome::Subscribed);
        }
        FEED_MESSAGES.with_label_values(&["empty"]).inc();
        return Ok(FrameOutcome::Empty);
    }

    let updates: Vec<LevelUpdate> = env.level_updates();
    let n = book.apply_update(&updates);
    FEED_MESSAGES.with_label_values(&["applied"]).inc();
    debug!(b_no = env.b_no, change = %env.change_type, entries = n, "book batch");
    Ok(FrameOutcome::Applied(n))
}

/// One streaming session. Ok(()) only when `cancel` fires.
pub async fn run_session(cfg: &FeedCfg, book: &OrderBook, cancel: &CancellationToken) -> Result<(), FeedError> {
    let url = Url::parse(&cfg.url)?;
    let sub = SubscribeRequest::book_changes(&cfg.inst_id).ok_or_else(|| FeedError::Instrument(cfg.inst_id.clone()))?;

    info!(url = %cfg.url, inst_id = %cfg.inst_id, "connecting book feed");
    let (ws, _resp) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        r = timeout(cfg.read_timeout, connect_async(url)) => r.map_err(|_| FeedError::Stale(cfg.read_timeout))??,
    };
    let (mut write, mut read) = ws.split();

    write.send(Message::Text(serde_json::to_string(&sub)?)).await?;
    info!(filter = %sub.send_topic_action.filter_value, topic = %sub.send_topic_action.topic_id, "subscribe sent");

    let mut ping = interval_at(Instant::now() + cfg.ping_interval, cfg.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_data = Instant::now();

    loop {
        let deadline = last_data + cfg.read_timeout;
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                info!("book feed cancelled");
                return Ok(());
            }
            _ = ping.tick() => {
                write.send(Message::Ping(b"ping".to_vec())).await?;
            }
            _ = sleep_until(deadline) => {
                return Err(FeedError::Stale(cfg.read_timeout));
            }
            frame = read.next() => {
                // frame apa pun (termasuk pong) dihitung sebagai tanda hidup
                last_data = Instant::now();
                match frame {
                    None => return Err(FeedError::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(txt))) => {
                        handle_text(&txt, book)?;
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(txt) => {
                            handle_text(&txt, book)?;
                        }
                        Err(e) => {
                            warn!(error = %e, "non-utf8 binary frame, skipped");
                            FEED_MESSAGES.with_label_values(&["malformed"]).inc();
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "book feed closed by server");
                        return Err(FeedError::Closed);
                    }
                    Some(Ok(_)) => {
                        // ping/pong/raw frame
                    }
                }
            }
        }
    }
}

/// Reconnect loop: restart `run_session` after `reconnect_delay` on any error
/// until `cancel` fires. The book is cleared after a failed session when
/// `clear_on_reconnect` is set, so no level survives a gap in the feed.
pub async fn run_supervised(cfg: FeedCfg, book: Arc<OrderBook>, cancel: CancellationToken) {
    let mut attempt: u64 = 0;
    loop {
        let res = run_session(&cfg, &book, &cancel).await;
        FEED_CONNECTED.set(0);
        match res {
            Ok(()) => {
                info!("book feed stopped");
                return;
            }
            Err(e) => {
                attempt += 1;
                FEED_RECONNECTS.inc();
                error!(
                    error = %e,
                    subscription = e.is_subscription(),
                    attempt,
                    delay_ms = cfg.reconnect_delay.as_millis() as u64,
                    "book feed session ended, reconnecting"
                );
            }
        }

        if cfg.clear_on_reconnect {
            book.clear();
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("book feed stopped during backoff");
                return;
            }
            _ = sleep(cfg.reconnect_delay) => {}
        }
    }
}

/// Offline feed: random-walk top-of-book, one level per side, ~10 batches/s.
/// Prices move in 0.1 steps around 100000.0.
pub async fn run_mock(book: Arc<OrderBook>, cancel: CancellationToken) {
    let mut mid_ticks: i64 = 1_000_000;
    let mut prev: Option<(f64, f64)> = None;
    let mut tick = interval(Duration::from_millis(100));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(inst_id = %book.inst_id(), "mock feed started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("mock feed stopped");
                return;
            }
            _ = tick.tick() => {}
        }

        // jangan simpan ThreadRng melewati .await
        let (step, bid_sz, ask_sz) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-3..=3), rng.gen_range(1..=20) as f64, rng.gen_range(1..=20) as f64)
        };
        mid_ticks = (mid_ticks + step).max(10);
        let bid = (mid_ticks - 1) as f64 / 10.0;
        let ask = (mid_ticks + 1) as f64 / 10.0;

        let mut batch = Vec::with_capacity(4);
        if let Some((pb, pa)) = prev {
            if pb != bid {
                batch.push(LevelUpdate::bid(pb, 0.0));
            }
            if pa != ask {
                batch.push(LevelUpdate::ask(pa, 0.0));
            }
        }
        batch.push(LevelUpdate::bid(bid, bid_sz));
        batch.push(LevelUpdate::ask(ask, ask_sz));
        book.apply_update(&batch);
        prev = Some((bid, ask));
    }
}
