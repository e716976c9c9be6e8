// ===============================
// src/orderbook.rs
// ===============================
//
// Top-of-book view for a single instrument.
// - Written by the feed task (single writer), read by the strategy task.
// - One RwLock per book; a whole feed batch is applied under one write lock.
// - Best bid/ask are recomputed by a full scan of the touched side after each
//   batch. Fine at demo depth (25 levels); for deep books switch the side
//   maps to an ordered structure keyed by price.
//

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;

use crate::domain::{BookSide, LevelUpdate, PriceLevel};
use crate::metrics::BOOK_LEVELS;

/// Hashable price key. Feed prices are matched exactly, so the raw bit
/// pattern is the identity of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PriceKey(u64);

impl PriceKey {
    fn of(px: f64) -> Self {
        // -0.0 dan 0.0 harus level yang sama
        if px == 0.0 { PriceKey(0.0f64.to_bits()) } else { PriceKey(px.to_bits()) }
    }
    fn price(self) -> f64 { f64::from_bits(self.0) }
}

#[derive(Debug, Default)]
struct Sides {
    bids: HashMap<PriceKey, f64>,
    asks: HashMap<PriceKey, f64>,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
}

impl Sides {
    fn side_mut(&mut self, side: BookSide) -> &mut HashMap<PriceKey, f64> {
        match side { BookSide::Bid => &mut self.bids, BookSide::Ask => &mut self.asks }
    }

    fn side(&self, side: BookSide) -> &HashMap<PriceKey, f64> {
        match side { BookSide::Bid => &self.bids, BookSide::Ask => &self.asks }
    }

    fn upsert(&mut self, u: &LevelUpdate) -> bool {
        if !u.price.is_finite() || u.size.is_nan() {
            return false;
        }
        let levels = self.side_mut(u.side);
        let key = PriceKey::of(u.price);
        if u.size > 0.0 {
            levels.insert(key, u.size);
        } else {
            // size 0 untuk level yang tidak ada = no-op
            levels.remove(&key);
        }
        true
    }

    /// Drop the worst levels beyond `depth`. Never touches the best level.
    fn trim(&mut self, side: BookSide, depth: usize) {
        let levels = self.side_mut(side);
        if levels.len() <= depth {
            return;
        }
        let mut keys: Vec<PriceKey> = levels.keys().copied().collect();
        match side {
            BookSide::Bid => keys.sort_by(|a, b| b.price().total_cmp(&a.price())),
            BookSide::Ask => keys.sort_by(|a, b| a.price().total_cmp(&b.price())),
        }
        for k in keys.into_iter().skip(depth) {
            levels.remove(&k);
        }
    }

    fn rescan(&mut self, side: BookSide) {
        let prices = self.side(side).keys().map(|k| k.price());
        let best = match side {
            BookSide::Bid => prices.reduce(f64::max),
            BookSide::Ask => prices.reduce(f64::min),
        };
        match side {
            BookSide::Bid => self.best_bid = best,
            BookSide::Ask => self.best_ask = best,
        }
    }
}

/// Shared order book. Callers only ever see copies of levels.
#[derive(Debug)]
pub struct OrderBook {
    inst_id: String,
    depth: usize,
    inner: RwLock<Sides>,
}

impl OrderBook {
    pub fn new(inst_id: impl Into<String>, depth: usize) -> Self {
        Self { inst_id: inst_id.into(), depth: depth.max(1), inner: RwLock::new(Sides::default()) }
    }

    pub fn inst_id(&self) -> &str { &self.inst_id }
    pub fn max_depth(&self) -> usize { self.depth }

    /// Apply one feed batch atomically, then refresh best bid/ask for every
    /// side the batch touched. Returns the number of entries applied.
    pub fn apply_update(&self, updates: &[LevelUpdate]) -> usize {
        if updates.is_empty() {
            return 0;
        }
        let mut touched_bid = false;
        let mut touched_ask = false;
        let mut applied = 0usize;

        let (n_bids, n_asks) = {
            let mut book = self.inner.write();
            for u in updates {
                if !book.upsert(u) {
                    continue;
                }
                applied += 1;
                match u.side {
                    BookSide::Bid => touched_bid = true,
                    BookSide::Ask => touched_ask = true,
                }
            }
            if touched_bid {
                book.trim(BookSide::Bid, self.depth);
                book.rescan(BookSide::Bid);
            }
            if touched_ask {
                book.trim(BookSide::Ask, self.depth);
                book.rescan(BookSide::Ask);
            }
            (book.bids.len(), book.asks.len())
        };

        BOOK_LEVELS.with_label_values(&["bid"]).set(n_bids as i64);
        BOOK_LEVELS.with_label_values(&["ask"]).set(n_asks as i64);
        applied
    }

    pub fn best_bid(&self) -> Option<f64> { self.inner.read().best_bid }
    pub fn best_ask(&self) -> Option<f64> { self.inner.read().best_ask }

    /// Best bid and best ask observed under the same read lock.
    pub fn top_of_book(&self) -> (Option<f64>, Option<f64>) {
        let book = self.inner.read();
        (book.best_bid, book.best_ask)
    }

    /// Midpoint, or `None` while either side is empty.
    pub fn mid(&self) -> Option<f64> {
        match self.top_of_book() {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Size resting at `price`, if that level exists.
    pub fn level(&self, side: BookSide, price: f64) -> Option<f64> {
        self.inner.read().side(side).get(&PriceKey::of(price)).copied()
    }

    pub fn len(&self, side: BookSide) -> usize { self.inner.read().side(side).len() }

    pub fn is_empty(&self) -> bool {
        let book = self.inner.read();
        book.bids.is_empty() && book.asks.is_empty()
    }

    /// Levels of one side, best first.
    pub fn levels(&self, side: BookSide) -> Vec<PriceLevel> {
        let mut out: Vec<PriceLevel> = {
            let book = self.inner.read();
            book.side(side).iter().map(|(k, sz)| PriceLevel { price: k.price(), size: *sz }).collect()
        };
        match side {
            BookSide::Bid => out.sort_by(|a, b| b.price.total_cmp(&a.price)),
            BookSide::Ask => out.sort_by(|a, b| a.price.total_cmp(&b.price)),
        }
        out
    }

    /// Empty both sides (resync after a feed gap).
    pub fn clear(&self) {
        {
            let mut book = self.inner.write();
            *book = Sides::default();
        }
        BOOK_LEVELS.with_label_values(&["bid"]).set(0);
        BOOK_LEVELS.with_label_values(&["ask"]).set(0);
    }
}
