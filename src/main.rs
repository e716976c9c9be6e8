// ===============================
// src/main.rs
// ===============================
/*
 # paper trading against the live public feed
 GATEWAY_MODE=paper cargo run --release

 # fully offline
 FEED_MODE=mock GATEWAY_MODE=paper cargo run

 curl -s localhost:9898/metrics | egrep '^(mid_price|position_net|orders_)'
*/
/*
=============================================================================
Project : dc_market_maker — async single-instrument market maker in Rust
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams DeepCoin order-book changes into a shared top-of-book,
          quotes post-only bid/ask around the mid with inventory skew and
          hard position caps, trades through a paper or live gateway, and
          exposes Prometheus metrics.
=============================================================================
*/
use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dc_market_maker::config::{self, FeedMode, GatewayMode};
use dc_market_maker::domain::BookSide;
use dc_market_maker::feed;
use dc_market_maker::gateway::{ExchangeGateway, PaperGateway};
use dc_market_maker::gateway_deepcoin::{Credentials, DeepcoinGateway};
use dc_market_maker::metrics;
use dc_market_maker::orderbook::OrderBook;
use dc_market_maker::strategy::MarketMaker;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    // ---- Load config ----
    let (args, params) = match config::load() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(2);
        }
    };

    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    metrics::init();

    info!(
        inst_id = %args.inst_id,
        feed_mode = ?args.feed_mode,
        gateway_mode = ?args.gateway_mode,
        ws_url = %args.ws_url,
        rest_url = %args.rest_url,
        params = ?params,
        refresh_ms = args.refresh_ms,
        book_depth = args.book_depth,
        "startup config"
    );

    let cancel = CancellationToken::new();

    // ---- Metrics ----
    let metrics_task = match tokio::net::TcpListener::bind(("0.0.0.0", args.metrics_port)).await {
        Ok(listener) => Some(tokio::spawn(metrics::serve_metrics(listener, cancel.clone()))),
        Err(e) => {
            error!(error = %e, port = args.metrics_port, "metrics bind failed, metrics disabled");
            None
        }
    };

    let book = Arc::new(OrderBook::new(args.inst_id.clone(), args.book_depth));

    // ---- Gateway ----
    let gateway: Arc<dyn ExchangeGateway> = match args.gateway_mode {
        GatewayMode::Paper => Arc::new(PaperGateway::with_book(book.clone())),
        GatewayMode::Live => match Credentials::from_env() {
            Ok(creds) => Arc::new(DeepcoinGateway::new(args.rest_url.clone(), creds, args.price_decimals)),
            Err(e) => {
                error!(error = %e, "live gateway needs DC_API_KEY / DC_API_SECRET / DC_API_PASSPHRASE");
                std::process::exit(2);
            }
        },
    };

    // ---- FEED (Market Data) ----
    let feed_task = match args.feed_mode {
        FeedMode::Deepcoin => tokio::spawn(feed::run_supervised(args.feed_cfg(), book.clone(), cancel.clone())),
        FeedMode::Mock => tokio::spawn(feed::run_mock(book.clone(), cancel.clone())),
    };

    // ---- Strategy ----
    let mm = MarketMaker::new(args.inst_id.clone(), params, book.clone(), gateway.clone());
    let strategy_task = tokio::spawn(mm.run(args.refresh(), cancel.clone()));

    // ---- Heartbeat until shutdown ----
    let mut hb = interval(Duration::from_secs(10));
    hb.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = hb.tick() => {
                let (bid, ask) = book.top_of_book();
                let open_orders = match gateway.open_orders(&args.inst_id).await {
                    Ok(orders) => orders.len() as i64,
                    Err(e) => {
                        error!(error = %e, "open orders unavailable");
                        -1
                    }
                };
                info!(
                    best_bid = ?bid,
                    best_ask = ?ask,
                    mid = ?book.mid(),
                    bid_levels = book.len(BookSide::Bid),
                    ask_levels = book.len(BookSide::Ask),
                    open_orders,
                    "heartbeat"
                );
            }
        }
    }

    cancel.cancel();
    if let Err(e) = strategy_task.await {
        error!(error = %e, "strategy task panicked");
    }
    if let Err(e) = feed_task.await {
        error!(error = %e, "feed task panicked");
    }
    if let Some(task) = metrics_task {
        // koneksi scrape yang menggantung tidak boleh menahan shutdown
        match tokio::time::timeout(Duration::from_secs(2), task).await {
            Ok(Ok(Err(e))) => error!(error = %e, "metrics server failed"),
            Ok(Err(e)) => error!(error = %e, "metrics task panicked"),
            Err(_) => info!("metrics server still draining, leaving it"),
            Ok(Ok(Ok(()))) => {}
        }
    }
    info!("bye");
}
