// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod deepcoin;
pub mod domain;
pub mod feed;
pub mod gateway;
pub mod gateway_deepcoin; // live DeepCoin swap (signed REST)
pub mod metrics;
pub mod orderbook;
pub mod risk;
pub mod strategy;
