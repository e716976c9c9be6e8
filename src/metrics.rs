// ===============================
// src/metrics.rs
// ===============================
use axum::{http::header, response::IntoResponse, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed --------
pub static FEED_MESSAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("feed_messages_total", "feed frames by outcome (applied, empty, malformed, control)"),
        &["outcome"],
    )
    .unwrap()
});

pub static FEED_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("feed_reconnects_total", "feed sessions that ended with an error").unwrap()
});

pub static FEED_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("feed_connected", "1 if the book-change stream is subscribed, 0 otherwise").unwrap()
});

// -------- Order book --------
pub static BOOK_LEVELS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("book_levels", "retained price levels per side"), &["side"]).unwrap()
});

pub static MID_PRICE: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("mid_price", "midpoint used by the last quoting tick").unwrap());

// -------- Strategy / gateway --------
pub static POSITION: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position_net", "net position read on the last tick").unwrap());

pub static ORDERS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_placed_total", "post-only orders accepted"), &["side"]).unwrap()
});

pub static ORDERS_CANCELLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_cancelled_total", "working orders cancelled"), &["side"]).unwrap()
});

pub static GATEWAY_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("gateway_errors_total", "gateway call failures"), &["op"]).unwrap()
});

pub static TICKS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("ticks_skipped_total", "strategy ticks skipped"), &["reason"]).unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(FEED_MESSAGES.clone())),
        REGISTRY.register(Box::new(FEED_RECONNECTS.clone())),
        REGISTRY.register(Box::new(FEED_CONNECTED.clone())),
        REGISTRY.register(Box::new(BOOK_LEVELS.clone())),
        REGISTRY.register(Box::new(MID_PRICE.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(ORDERS_PLACED.clone())),
        REGISTRY.register(Box::new(ORDERS_CANCELLED.clone())),
        REGISTRY.register(Box::new(GATEWAY_ERRORS.clone())),
        REGISTRY.register(Box::new(TICKS_SKIPPED.clone())),
    ] {
        // AlreadyReg saat init dipanggil dua kali, aman diabaikan
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn metrics_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], encode_metrics())
}

/// `GET /` and `GET /metrics` both return the registry.
pub fn router() -> Router {
    Router::new().route("/", get(metrics_handler)).route("/metrics", get(metrics_handler))
}

/// Serve the registry on `listener` until `cancel` fires.
pub async fn serve_metrics(listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "metrics listening on /metrics");
    axum::serve(listener, router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_series() {
        init();
        init();
        ORDERS_PLACED.with_label_values(&["buy"]).inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("orders_placed_total"));
    }

    #[tokio::test]
    async fn test_idle_client_does_not_block_scrapes() {
        init();
        FEED_RECONNECTS.inc();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(serve_metrics(listener, cancel.clone()));

        // koneksi yang tidak pernah mengirim request
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();

        let rsp = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            reqwest::get(format!("http://{addr}/metrics")),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(rsp.status().is_success());
        let ctype = rsp.headers()[reqwest::header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(ctype.starts_with("text/plain"));
        assert!(rsp.text().await.unwrap().contains("feed_reconnects_total"));
        cancel.cancel();
    }
}
