// ===============================
// src/gateway_deepcoin.rs
// ===============================
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::deepcoin::{
    sign_request, timestamp_iso, ApiResponse, CancelOrderRequest, OrderAck, PlaceOrderRequest, PositionEntry,
};
use crate::domain::{Position, Side, WorkingOrder};
use crate::gateway::{ExchangeGateway, GatewayError};

const PATH_ORDER: &str = "/deepcoin/trade/order";
const PATH_CANCEL: &str = "/deepcoin/trade/cancel-order";
const PATH_POSITIONS: &str = "/deepcoin/account/positions";

const TD_MODE_CROSS: &str = "cross";
const ORD_TYPE_POST_ONLY: &str = "post_only";
const MRG_POSITION_MERGE: &str = "merge";
const INST_TYPE_SWAP: &str = "SWAP";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl Credentials {
    /// Read `DC_API_KEY`, `DC_API_SECRET`, `DC_API_PASSPHRASE`.
    pub fn from_env() -> Result<Self, GatewayError> {
        let get = |k: &'static str| std::env::var(k).map_err(|_| GatewayError::MissingCredential(k));
        Ok(Self { api_key: get("DC_API_KEY")?, secret: get("DC_API_SECRET")?, passphrase: get("DC_API_PASSPHRASE")? })
    }
}

/// Client order id: `Dc<unix nanos><4 random digits>`.
pub fn client_order_id() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("Dc{}{:04}", nanos, rand::thread_rng().gen_range(0..10_000))
}

pub fn format_px(px: f64, decimals: usize) -> String { format!("{px:.decimals$}") }

pub fn format_sz(sz: f64) -> String { format!("{sz:.0}") }

/// Live DeepCoin swap gateway (signed REST).
/// Orders accepted here are also kept locally so `open_orders` does not need
/// a round trip. Fills are not seen, so a filled order stays listed until it
/// is cancelled or the next placement on its side replaces it.
pub struct DeepcoinGateway {
    http: reqwest::Client,
    rest_base: String,
    creds: Credentials,
    price_decimals: usize,
    orders: Mutex<HashMap<String, WorkingOrder>>,
}

impl DeepcoinGateway {
    pub fn new(rest_base: impl Into<String>, creds: Credentials, price_decimals: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_base: rest_base.into().trim_end_matches('/').to_string(),
            creds,
            price_decimals,
            orders: Mutex::new(HashMap::new()),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        body: Option<String>,
    ) -> Result<Vec<T>, GatewayError> {
        let ts = timestamp_iso();
        let body = body.unwrap_or_default();
        let sig = sign_request(&self.creds.secret, &ts, method.as_str(), path_and_query, &body);
        let url = format!("{}{}", self.rest_base, path_and_query);

        let mut req = self
            .http
            .request(method, url)
            .header("DC-ACCESS-KEY", &self.creds.api_key)
            .header("DC-ACCESS-SIGN", sig)
            .header("DC-ACCESS-TIMESTAMP", ts)
            .header("DC-ACCESS-PASSPHRASE", &self.creds.passphrase)
            .header("Content-Type", "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }

        let rsp = req.send().await?;
        let status = rsp.status();
        let text = rsp.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api { code: status.as_u16().to_string(), msg: text });
        }
        let parsed: ApiResponse<T> = serde_json::from_str(&text)?;
        if parsed.code != "0" {
            return Err(GatewayError::Api { code: parsed.code, msg: parsed.msg });
        }
        Ok(parsed.data)
    }
}

#[async_trait]
impl ExchangeGateway for DeepcoinGateway {
    async fn place_post_only(&self, inst_id: &str, side: Side, px: f64, sz: f64) -> Result<String, GatewayError> {
        let id = client_order_id();
        let req = PlaceOrderRequest {
            inst_id: inst_id.to_string(),
            td_mode: TD_MODE_CROSS.to_string(),
            cl_ord_id: id.clone(),
            side: side.as_str().to_string(),
            ord_type: ORD_TYPE_POST_ONLY.to_string(),
            pos_side: side.position_side().as_str().to_string(),
            px: format_px(px, self.price_decimals),
            sz: format_sz(sz),
            mrg_position: MRG_POSITION_MERGE.to_string(),
        };
        info!(cl_id = %id, side = %req.side, px = %req.px, sz = %req.sz, "post order");
        let body = serde_json::to_string(&req)?;
        let acks: Vec<OrderAck> = self.send(reqwest::Method::POST, PATH_ORDER, Some(body)).await?;
        if let Some(ack) = acks.iter().find(|a| !a.s_code.is_empty() && a.s_code != "0") {
            return Err(GatewayError::Api { code: ack.s_code.clone(), msg: ack.s_msg.clone() });
        }

        track_order(
            &mut self.orders.lock(),
            WorkingOrder { id: id.clone(), side, inst_id: inst_id.to_string(), px, sz, placed_at: Utc::now() },
        );
        Ok(id)
    }

    async fn cancel(&self, inst_id: &str, order_id: &str) -> Result<(), GatewayError> {
        let req = CancelOrderRequest { inst_id: inst_id.to_string(), cl_ord_id: order_id.to_string() };
        info!(cl_id = %order_id, "cancel order");
        let body = serde_json::to_string(&req)?;
        let _: Vec<OrderAck> = self.send(reqwest::Method::POST, PATH_CANCEL, Some(body)).await?;
        self.orders.lock().remove(order_id);
        Ok(())
    }

    async fn open_orders(&self, inst_id: &str) -> Result<Vec<WorkingOrder>, GatewayError> {
        let orders = self.orders.lock();
        Ok(orders.values().filter(|o| o.inst_id == inst_id).cloned().collect())
    }

    async fn position(&self, inst_id: &str) -> Result<Position, GatewayError> {
        let path = format!(
            "{}?instType={}&instId={}",
            PATH_POSITIONS,
            INST_TYPE_SWAP,
            urlencoding::encode(inst_id)
        );
        let entries: Vec<PositionEntry> = self.send(reqwest::Method::GET, &path, None).await?;
        let net = sum_positions(&entries);
        debug!(inst_id, net, entries = entries.len(), "position");
        Ok(Position::new(inst_id, net))
    }
}

/// At most one order per (instrument, side): a new placement supersedes the
/// previous one, which by then was cancelled or filled.
fn track_order(orders: &mut HashMap<String, WorkingOrder>, order: WorkingOrder) {
    orders.retain(|_, o| !(o.inst_id == order.inst_id && o.side == order.side));
    orders.insert(order.id.clone(), order);
}

/// Net position = sum of the per-entry size strings; unparsable entries count as 0.
pub fn sum_positions(entries: &[PositionEntry]) -> f64 {
    entries.iter().map(|p| p.pos.trim().parse::<f64>().unwrap_or(0.0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_formatting() {
        assert_eq!(format_px(99950.04, 1), "99950.0");
        assert_eq!(format_px(100.26, 2), "100.26");
        assert_eq!(format_sz(3.0), "3");
    }

    #[test]
    fn test_client_order_ids_are_distinct() {
        let a = client_order_id();
        let b = client_order_id();
        assert!(a.starts_with("Dc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sum_positions_nets_entries() {
        let raw = r#"{"code":"0","msg":"","data":[{"instId":"BTC-USDT-SWAP","pos":"3","posSide":"long"},{"instId":"BTC-USDT-SWAP","pos":"-1.5","posSide":"short"},{"instId":"BTC-USDT-SWAP","pos":"","posSide":"long"}]}"#;
        let rsp: ApiResponse<PositionEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(sum_positions(&rsp.data), 1.5);
    }

    fn order(id: &str, inst_id: &str, side: Side) -> WorkingOrder {
        WorkingOrder { id: id.into(), side, inst_id: inst_id.into(), px: 100.0, sz: 1.0, placed_at: Utc::now() }
    }

    #[test]
    fn test_tracked_orders_stay_bounded_per_side() {
        let mut orders = HashMap::new();
        track_order(&mut orders, order("b1", "BTC-USDT-SWAP", Side::Buy));
        track_order(&mut orders, order("a1", "BTC-USDT-SWAP", Side::Sell));
        track_order(&mut orders, order("e1", "ETH-USDT-SWAP", Side::Buy));
        // b1 terisi dan tidak pernah dibatalkan; quote berikutnya menggantikannya
        for i in 2..50 {
            track_order(&mut orders, order(&format!("b{i}"), "BTC-USDT-SWAP", Side::Buy));
        }
        assert_eq!(orders.len(), 3);
        assert!(orders.contains_key("b49"));
        assert!(orders.contains_key("a1"));
        assert!(orders.contains_key("e1"));
        assert!(!orders.contains_key("b1"));
    }

    #[test]
    fn test_api_error_envelope_decodes() {
        let raw = r#"{"code":"51000","msg":"Parameter px error","data":[]}"#;
        let rsp: ApiResponse<OrderAck> = serde_json::from_str(raw).unwrap();
        assert_eq!(rsp.code, "51000");
        assert!(rsp.data.is_empty());
    }
}
