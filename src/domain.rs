// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side as the strategy and the gateway see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn sign(&self) -> f64 { match self { Side::Buy => 1.0, Side::Sell => -1.0 } }

    pub fn as_str(&self) -> &'static str {
        match self { Side::Buy => "buy", Side::Sell => "sell" }
    }

    /// Position side used by the exchange for a given order side.
    pub fn position_side(&self) -> PositionSide {
        match self { Side::Buy => PositionSide::Long, Side::Sell => PositionSide::Short }
    }
}

/// Which half of the book a level lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide { Bid, Ask }

impl BookSide {
    /// Feed direction flag: "0" = bid, anything else = ask.
    pub fn from_direction(direction: &str) -> Self {
        if direction == "0" { BookSide::Bid } else { BookSide::Ask }
    }

    pub fn as_str(&self) -> &'static str {
        match self { BookSide::Bid => "bid", BookSide::Ask => "ask" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide { Long, Short }

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self { PositionSide::Long => "long", PositionSide::Short => "short" }
    }
}

/// A resting price level. `size` is always > 0 while the level exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel { pub price: f64, pub size: f64 }

/// One entry of a book-change batch. `size == 0` removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelUpdate { pub side: BookSide, pub price: f64, pub size: f64 }

impl LevelUpdate {
    pub fn bid(price: f64, size: f64) -> Self { Self { side: BookSide::Bid, price, size } }
    pub fn ask(price: f64, size: f64) -> Self { Self { side: BookSide::Ask, price, size } }
}

/// An order accepted by the gateway and tracked by the strategy's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingOrder {
    pub id: String,
    pub side: Side,
    pub inst_id: String,
    pub px: f64,
    pub sz: f64,
    pub placed_at: DateTime<Utc>,
}

/// Net position for one instrument. Positive = long, negative = short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub inst_id: String,
    pub net: f64,
}

impl Position {
    pub fn new(inst_id: impl Into<String>, net: f64) -> Self {
        Self { inst_id: inst_id.into(), net }
    }

    /// Flat counts as short, same as the exchange's merged-position view.
    pub fn side(&self) -> PositionSide {
        if self.net > 0.0 { PositionSide::Long } else { PositionSide::Short }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flag_maps_zero_to_bid() {
        assert_eq!(BookSide::from_direction("0"), BookSide::Bid);
        assert_eq!(BookSide::from_direction("1"), BookSide::Ask);
        assert_eq!(BookSide::from_direction(""), BookSide::Ask);
    }

    #[test]
    fn test_position_side_label() {
        assert_eq!(Position::new("BTC-USDT-SWAP", 2.0).side(), PositionSide::Long);
        assert_eq!(Position::new("BTC-USDT-SWAP", -2.0).side(), PositionSide::Short);
        assert_eq!(Side::Sell.position_side(), PositionSide::Short);
    }
}
