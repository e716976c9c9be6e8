// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : dc_market_maker — async single-instrument market maker in Rust
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams DeepCoin order-book changes into a shared top-of-book,
          quotes post-only bid/ask around the mid with inventory skew and
          hard position caps, trades through a paper or live gateway, and
          exposes Prometheus metrics.
=============================================================================
*/
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use dotenvy::dotenv;
use thiserror::Error;

use crate::deepcoin::filter_value;
use crate::feed::FeedCfg;
use crate::risk::MAX_BASE_SPREAD_BPS;
use crate::strategy::QuoteParams;

/// Sumber market data
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    Deepcoin,
    Mock,
}

/// Venue untuk order
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GatewayMode {
    Paper,
    Live,
}

#[derive(Clone, Debug, Parser)]
#[command(name = "dc_market_maker", version, about = "Inventory-skewed market maker for one DeepCoin swap")]
pub struct Args {
    // instrument & endpoints
    #[arg(long, env = "INST_ID", default_value = "BTC-USDT-SWAP")]
    pub inst_id: String,
    #[arg(long, env = "WS_PUBLIC_URL", default_value = "wss://stream.deepcoin.com/public/ws")]
    pub ws_url: String,
    #[arg(long, env = "REST_URL", default_value = "https://api.deepcoin.com")]
    pub rest_url: String,

    // mode
    #[arg(long, env = "FEED_MODE", value_enum, default_value_t = FeedMode::Deepcoin)]
    pub feed_mode: FeedMode,
    #[arg(long, env = "GATEWAY_MODE", value_enum, default_value_t = GatewayMode::Paper)]
    pub gateway_mode: GatewayMode,

    // quoting
    #[arg(long, env = "QUOTE_SIZE", default_value_t = 1.0)]
    pub quote_size: f64,
    #[arg(long, env = "BASE_SPREAD_BPS", default_value_t = 5.0)]
    pub base_spread_bps: f64,
    #[arg(long, env = "REPRICE_BPS", default_value_t = 2.0)]
    pub reprice_bps: f64,
    #[arg(long, env = "MAX_POSITION", default_value_t = 10.0)]
    pub max_position: f64,
    #[arg(long, env = "TARGET_POSITION", default_value_t = 0.0, allow_negative_numbers = true)]
    pub target_position: f64,
    #[arg(long, env = "HEDGE_THRESHOLD", default_value_t = 3.0)]
    pub hedge_threshold: f64,
    #[arg(long, env = "REFRESH_MS", default_value_t = 1000)]
    pub refresh_ms: u64,

    // book & feed
    #[arg(long, env = "BOOK_DEPTH", default_value_t = 25)]
    pub book_depth: usize,
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value_t = 2000)]
    pub reconnect_delay_ms: u64,
    #[arg(long, env = "CLEAR_BOOK_ON_RECONNECT", default_value_t = true, action = ArgAction::Set)]
    pub clear_book_on_reconnect: bool,

    // wire formatting
    #[arg(long, env = "PRICE_DECIMALS", default_value_t = 1)]
    pub price_decimals: usize,

    // observability
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {rule}, got {value}")]
    Invalid { name: &'static str, rule: &'static str, value: String },
    #[error("instrument id {0:?} must look like BASE-QUOTE[-TYPE]")]
    Instrument(String),
    #[error("feed url {0:?} is not a valid URL")]
    Url(String),
}

fn invalid(name: &'static str, rule: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid { name, rule, value: value.to_string() }
}

impl Args {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if filter_value(&self.inst_id).is_none() {
            return Err(ConfigError::Instrument(self.inst_id.clone()));
        }
        if self.feed_mode == FeedMode::Deepcoin && url::Url::parse(&self.ws_url).is_err() {
            return Err(ConfigError::Url(self.ws_url.clone()));
        }
        if !(self.quote_size.is_finite() && self.quote_size > 0.0) {
            return Err(invalid("QUOTE_SIZE", "> 0", self.quote_size));
        }
        for (name, v) in [
            ("BASE_SPREAD_BPS", self.base_spread_bps),
            ("REPRICE_BPS", self.reprice_bps),
            ("HEDGE_THRESHOLD", self.hedge_threshold),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(invalid(name, ">= 0", v));
            }
        }
        // skew penuh menggandakan spread satu sisi; harus tetap di dalam band risk
        if self.base_spread_bps > MAX_BASE_SPREAD_BPS {
            return Err(invalid("BASE_SPREAD_BPS", "<= 250 (half the quote band)", self.base_spread_bps));
        }
        if !(self.max_position.is_finite() && self.max_position > 0.0) {
            return Err(invalid("MAX_POSITION", "> 0", self.max_position));
        }
        if !self.target_position.is_finite() {
            return Err(invalid("TARGET_POSITION", "finite", self.target_position));
        }
        if self.refresh_ms == 0 {
            return Err(invalid("REFRESH_MS", "> 0", self.refresh_ms));
        }
        if self.book_depth == 0 {
            return Err(invalid("BOOK_DEPTH", "> 0", self.book_depth));
        }
        Ok(())
    }

    pub fn quote_params(&self) -> QuoteParams {
        QuoteParams {
            quote_size: self.quote_size,
            base_spread_bps: self.base_spread_bps,
            reprice_bps: self.reprice_bps,
            max_position: self.max_position,
            target_position: self.target_position,
            hedge_threshold: self.hedge_threshold,
        }
    }

    pub fn feed_cfg(&self) -> FeedCfg {
        let mut cfg = FeedCfg::new(self.ws_url.clone(), self.inst_id.clone());
        cfg.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        cfg.clear_on_reconnect = self.clear_book_on_reconnect;
        cfg
    }

    pub fn refresh(&self) -> Duration { Duration::from_millis(self.refresh_ms) }
}

/// `.env` -> env/CLI -> validated args + quoting parameters.
pub fn load() -> Result<(Args, QuoteParams), ConfigError> {
    // Pastikan .env dibaca sebelum clap membaca env
    let _ = dotenv();
    let args = Args::parse();
    args.validate()?;
    let params = args.quote_params();
    Ok((args, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["dc_market_maker"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_demo_parameters() {
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--base-spread-bps", "5", "--max-position", "10"]);
        assert!(args.validate().is_ok());
        let p = args.quote_params();
        assert_eq!(p.base_spread_bps, 5.0);
        assert_eq!(p.max_position, 10.0);
        assert_eq!(args.feed_cfg().inst_id, "BTC-USDT-SWAP");
    }

    #[test]
    fn test_negative_target_and_modes() {
        let args = parse(&["--target-position", "-2", "--feed-mode", "mock", "--gateway-mode", "paper"]);
        assert_eq!(args.target_position, -2.0);
        assert_eq!(args.feed_mode, FeedMode::Mock);
        assert_eq!(args.gateway_mode, GatewayMode::Paper);
    }

    #[test]
    fn test_clear_flag_can_be_disabled() {
        let args = parse(&["--clear-book-on-reconnect", "false", "--reconnect-delay-ms", "500"]);
        let cfg = args.feed_cfg();
        assert!(!cfg.clear_on_reconnect);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let args = parse(&["--inst-id", "BTCUSDT"]);
        assert_eq!(args.validate(), Err(ConfigError::Instrument("BTCUSDT".into())));
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--max-position", "0"]);
        assert!(matches!(args.validate(), Err(ConfigError::Invalid { name: "MAX_POSITION", .. })));
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--refresh-ms", "0"]);
        assert!(matches!(args.validate(), Err(ConfigError::Invalid { name: "REFRESH_MS", .. })));
    }

    #[test]
    fn test_base_spread_limited_to_half_the_band() {
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--base-spread-bps", "250"]);
        assert!(args.validate().is_ok());
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--base-spread-bps", "300"]);
        assert!(matches!(args.validate(), Err(ConfigError::Invalid { name: "BASE_SPREAD_BPS", .. })));
        let args = parse(&["--inst-id", "BTC-USDT-SWAP", "--base-spread-bps", "600"]);
        assert!(matches!(args.validate(), Err(ConfigError::Invalid { name: "BASE_SPREAD_BPS", .. })));
    }
}
