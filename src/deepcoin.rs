// ===============================
// src/deepcoin.rs
// ===============================
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::{BookSide, LevelUpdate};

type HmacSha256 = Hmac<Sha256>;

/// Exchange prefix of the public-feed filter value.
pub const FILTER_PREFIX: &str = "DeepCoin_";
/// Action code for "subscribe".
pub const ACTION_SUBSCRIBE: &str = "1";
/// Topic id of the order-book change channel.
pub const TOPIC_BOOK_CHANGES: &str = "25";
pub const LOCAL_NO: i64 = 1;
/// Resume token meaning "no prior session".
pub const RESUME_NONE: i64 = -1;
/// Action tag of a subscription receipt.
pub const RECV_TOPIC_ACTION: &str = "RecvTopicAction";
pub const SUCCESS_MSG: &str = "Success";

/// `BTC-USDT-SWAP` -> `DeepCoin_BTCUSDT`. Needs at least base and quote parts.
pub fn filter_value(inst_id: &str) -> Option<String> {
    let mut parts = inst_id.split('-');
    let base = parts.next().filter(|s| !s.is_empty())?;
    let quote = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{FILTER_PREFIX}{base}{quote}"))
}

// ---- Public WS: subscription request ----
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SendTopicAction {
    pub action: String,
    pub filter_value: String,
    pub local_no: i64,
    #[serde(rename = "TopicID")]
    pub topic_id: String,
    pub resume_no: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscribeRequest {
    #[serde(rename = "SendTopicAction")]
    pub send_topic_action: SendTopicAction,
}

impl SubscribeRequest {
    /// Book-change subscription, always from scratch (no resume).
    pub fn book_changes(inst_id: &str) -> Option<Self> {
        Some(Self {
            send_topic_action: SendTopicAction {
                action: ACTION_SUBSCRIBE.to_string(),
                filter_value: filter_value(inst_id)?,
                local_no: LOCAL_NO,
                topic_id: TOPIC_BOOK_CHANGES.to_string(),
                resume_no: RESUME_NONE,
            },
        })
    }
}

// ---- Public WS: book-change envelope ----
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookEnvelope {
    #[serde(default)]
    pub action: String,
    #[serde(rename = "errorMsg", default)]
    pub error_msg: String,
    #[serde(default)]
    pub index: String,
    #[serde(rename = "bNo", default)]
    pub b_no: i64,
    #[serde(rename = "changeType", default)]
    pub change_type: String,
    #[serde(default)]
    pub result: Vec<MarketOrder>,
}

impl BookEnvelope {
    /// Subscription receipt carrying anything other than success.
    pub fn rejection(&self) -> Option<&str> {
        if self.action == RECV_TOPIC_ACTION && self.error_msg != SUCCESS_MSG {
            Some(&self.error_msg)
        } else {
            None
        }
    }

    pub fn level_updates(&self) -> Vec<LevelUpdate> {
        self.result.iter().map(LevelUpdate::from).collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketOrder {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub data: MarketOrderData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketOrderData {
    #[serde(rename = "ExchangeID", default)]
    pub exchange_id: String,
    #[serde(rename = "InstrumentID", default)]
    pub instrument_id: String,
    #[serde(rename = "Direction", default)]
    pub direction: String, // "0" = bid
    #[serde(rename = "Price", default)]
    pub price: f64,
    #[serde(rename = "Volume", default)]
    pub volume: f64,
    #[serde(rename = "Orders", default)]
    pub orders: i64,
}

impl From<&MarketOrder> for LevelUpdate {
    fn from(o: &MarketOrder) -> Self {
        LevelUpdate {
            side: BookSide::from_direction(&o.data.direction),
            price: o.data.price,
            size: o.data.volume,
        }
    }
}

// ---- REST: signing ----

/// ISO-8601 millisecond timestamp used in `DC-ACCESS-TIMESTAMP`.
pub fn timestamp_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// base64(HMAC-SHA256(secret, ts + METHOD + path + body))
pub fn sign_request(secret: &str, ts: &str, method: &str, path: &str, body: &str) -> String {
    // HMAC menerima key dengan panjang berapa pun
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(ts.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

// ---- REST: request/response models ----
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub cl_ord_id: String,
    pub side: String,
    pub ord_type: String,
    pub pos_side: String,
    pub px: String,
    pub sz: String,
    pub mrg_position: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub inst_id: String,
    pub cl_ord_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    #[serde(default)]
    pub inst_id: String,
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub pos_side: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default)]
    pub ord_id: String,
    #[serde(default)]
    pub cl_ord_id: String,
    #[serde(default)]
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_value_concatenates_base_and_quote() {
        assert_eq!(filter_value("BTC-USDT-SWAP").as_deref(), Some("DeepCoin_BTCUSDT"));
        assert_eq!(filter_value("ETH-USDT").as_deref(), Some("DeepCoin_ETHUSDT"));
        assert_eq!(filter_value("BTCUSDT"), None);
        assert_eq!(filter_value("BTC-"), None);
    }

    #[test]
    fn test_subscribe_request_wire_shape() {
        let req = SubscribeRequest::book_changes("BTC-USDT-SWAP").unwrap();
        let v = serde_json::to_value(&req).unwrap();
        let s = &v["SendTopicAction"];
        assert_eq!(s["Action"], "1");
        assert_eq!(s["FilterValue"], "DeepCoin_BTCUSDT");
        assert_eq!(s["LocalNo"], 1);
        assert_eq!(s["TopicID"], "25");
        assert_eq!(s["ResumeNo"], -1);
    }

    #[test]
    fn test_envelope_parses_entries() {
        let raw = r#"{"action":"PushMarketOrder","errorMsg":"Success","index":"","bNo":42,"changeType":"Update",
            "result":[{"table":"MarketOrder","data":{"ExchangeID":"DeepCoin","InstrumentID":"BTCUSDT","Direction":"0","Price":100.0,"Volume":2.0,"Orders":3}},
                      {"table":"MarketOrder","data":{"ExchangeID":"DeepCoin","InstrumentID":"BTCUSDT","Direction":"1","Price":100.5,"Volume":0,"Orders":0}}]}"#;
        let env: BookEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.b_no, 42);
        assert!(env.rejection().is_none());
        let ups = env.level_updates();
        assert_eq!(ups, vec![LevelUpdate::bid(100.0, 2.0), LevelUpdate::ask(100.5, 0.0)]);
    }

    #[test]
    fn test_receipt_failure_is_rejection() {
        let env: BookEnvelope =
            serde_json::from_str(r#"{"action":"RecvTopicAction","errorMsg":"invalid filter"}"#).unwrap();
        assert_eq!(env.rejection(), Some("invalid filter"));
        let ok: BookEnvelope =
            serde_json::from_str(r#"{"action":"RecvTopicAction","errorMsg":"Success","result":[]}"#).unwrap();
        assert!(ok.rejection().is_none());
    }

    #[test]
    fn test_sign_is_deterministic_base64() {
        let a = sign_request("secret", "2024-01-01T00:00:00.000Z", "GET", "/deepcoin/account/positions", "");
        let b = sign_request("secret", "2024-01-01T00:00:00.000Z", "GET", "/deepcoin/account/positions", "");
        assert_eq!(a, b);
        // 32-byte digest -> 44 base64 chars
        assert_eq!(a.len(), 44);
        let c = sign_request("secret", "2024-01-01T00:00:00.000Z", "POST", "/deepcoin/account/positions", "");
        assert_ne!(a, c);
    }
}
