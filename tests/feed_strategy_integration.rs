// ===============================
// tests/feed_strategy_integration.rs
// ===============================
//
// Local WS server standing in for the DeepCoin public stream:
// feed session -> shared OrderBook -> strategy ticks -> PaperGateway.
//

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use dc_market_maker::domain::{BookSide, Side};
use dc_market_maker::feed::{handle_text, run_session, FeedCfg, FeedError};
use dc_market_maker::gateway::PaperGateway;
use dc_market_maker::orderbook::OrderBook;
use dc_market_maker::strategy::{MarketMaker, QuoteParams, TickOutcome};

const INST: &str = "BTC-USDT-SWAP";

const RECEIPT_OK: &str = r#"{"action":"RecvTopicAction","errorMsg":"Success","index":"","bNo":0,"changeType":"","result":[]}"#;
const RECEIPT_FAIL: &str = r#"{"action":"RecvTopicAction","errorMsg":"Filter not found","result":[]}"#;
const BATCH: &str = r#"{"action":"PushMarketOrder","errorMsg":"Success","changeType":"Update","bNo":1,"result":[
    {"table":"MarketOrder","data":{"ExchangeID":"DeepCoin","InstrumentID":"BTCUSDT","Direction":"0","Price":100.0,"Volume":2,"Orders":1}},
    {"table":"MarketOrder","data":{"ExchangeID":"DeepCoin","InstrumentID":"BTCUSDT","Direction":"0","Price":99.5,"Volume":1,"Orders":1}},
    {"table":"MarketOrder","data":{"ExchangeID":"DeepCoin","InstrumentID":"BTCUSDT","Direction":"1","Price":100.5,"Volume":3,"Orders":2}}]}"#;
const REMOVE_TOP_BID: &str = r#"{"action":"PushMarketOrder","errorMsg":"Success","changeType":"Update","bNo":2,"result":[
    {"table":"MarketOrder","data":{"Direction":"0","Price":100.0,"Volume":0,"Orders":0}}]}"#;

/// Serve one connection: capture the subscription frame, push `frames`,
/// then keep the socket open (draining) until the client leaves.
async fn serve_once(frames: Vec<&'static str>) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (sub_tx, sub_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(sub))) = ws.next().await {
            let _ = sub_tx.send(sub);
        }
        for f in frames {
            if ws.send(Message::Text(f.to_string())).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = ws.next().await {}
    });
    (format!("ws://{addr}/public/ws"), sub_rx)
}

fn cfg(url: String) -> FeedCfg {
    let mut cfg = FeedCfg::new(url, INST);
    cfg.read_timeout = Duration::from_secs(5);
    cfg
}

#[tokio::test]
async fn test_session_subscribes_applies_and_fails_on_rejection() {
    let (url, sub_rx) = serve_once(vec![RECEIPT_OK, BATCH, "garbage", RECEIPT_FAIL]).await;
    let book = OrderBook::new(INST, 25);

    let res = timeout(Duration::from_secs(5), run_session(&cfg(url), &book, &CancellationToken::new()))
        .await
        .unwrap();
    assert!(matches!(res, Err(FeedError::Subscription(ref m)) if m == "Filter not found"));

    let sub: serde_json::Value = serde_json::from_str(&sub_rx.await.unwrap()).unwrap();
    assert_eq!(sub["SendTopicAction"]["FilterValue"], "DeepCoin_BTCUSDT");
    assert_eq!(sub["SendTopicAction"]["ResumeNo"], -1);
    assert_eq!(sub["SendTopicAction"]["TopicID"], "25");

    // batch sebelum penolakan tetap diterapkan, garbage dilewati
    assert_eq!(book.top_of_book(), (Some(100.0), Some(100.5)));
    assert_eq!(book.len(BookSide::Bid), 2);
}

#[tokio::test]
async fn test_session_returns_ok_on_cancel() {
    let (url, _sub_rx) = serve_once(vec![RECEIPT_OK, BATCH]).await;
    let book = Arc::new(OrderBook::new(INST, 25));
    let cancel = CancellationToken::new();

    let task = {
        let book = book.clone();
        let cancel = cancel.clone();
        let cfg = cfg(url);
        tokio::spawn(async move { run_session(&cfg, &book, &cancel).await })
    };
    // tunggu sampai batch masuk
    for _ in 0..100 {
        if book.mid().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(book.mid(), Some(100.25));
    cancel.cancel();
    let res = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(res.is_ok());
}

#[tokio::test]
async fn test_silent_stream_is_stale() {
    let (url, _sub_rx) = serve_once(vec![]).await;
    let book = OrderBook::new(INST, 25);
    let mut cfg = cfg(url);
    cfg.read_timeout = Duration::from_millis(200);
    cfg.ping_interval = Duration::from_secs(60);

    let res = timeout(Duration::from_secs(5), run_session(&cfg, &book, &CancellationToken::new()))
        .await
        .unwrap();
    assert!(matches!(res, Err(FeedError::Stale(_))));
}

#[tokio::test]
async fn test_feed_drives_quotes() {
    let (url, _sub_rx) = serve_once(vec![RECEIPT_OK, BATCH]).await;
    let book = Arc::new(OrderBook::new(INST, 25));
    let cancel = CancellationToken::new();
    let feed = {
        let book = book.clone();
        let cancel = cancel.clone();
        let cfg = cfg(url);
        tokio::spawn(async move { run_session(&cfg, &book, &cancel).await })
    };

    let gw = Arc::new(PaperGateway::new());
    let mut mm = MarketMaker::new(INST, QuoteParams::default(), book.clone(), gw.clone());

    let mut quoted = false;
    for _ in 0..100 {
        if let TickOutcome::Quoted { placed, .. } = mm.tick().await {
            assert_eq!(placed, vec![Side::Buy, Side::Sell]);
            quoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(quoted);
    assert_eq!(mm.state().last_mid, Some(100.25));

    // top bid hilang -> mid 100.0, ~25 bps -> reprice
    handle_text(REMOVE_TOP_BID, &book).unwrap();
    let TickOutcome::Quoted { plan, cancelled, placed } = mm.tick().await else { panic!("expected quotes") };
    assert!(plan.reprice);
    assert_eq!(cancelled, vec![Side::Buy, Side::Sell]);
    assert_eq!(placed, vec![Side::Buy, Side::Sell]);
    assert_eq!(gw.resting(), 2);

    cancel.cancel();
    assert!(timeout(Duration::from_secs(5), feed).await.unwrap().unwrap().is_ok());
}
