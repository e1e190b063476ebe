//! Order book builder from incremental updates
//!
//! One `OrderBook` per instrument plus a table of live orders keyed by order
//! id. Price levels are kept in sorted vectors (bids descending, asks
//! ascending) and a level is removed as soon as its quantity reaches zero.
//!
//! Only the processing thread mutates a `BookBuilder`; other threads go
//! through `SharedBooks` and copy out a `BookSnapshot` under the read lock.

use crate::protocol::*;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

/// Default number of levels per side included in snapshots.
pub const DEFAULT_MAX_DEPTH: usize = 10;

pub type SharedBooks = Arc<RwLock<BookBuilder>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("duplicate order id {0}")]
    DuplicateOrder(u64),

    #[error("order not found: {0}")]
    UnknownOrder(u64),

    #[error("order {0} added with zero quantity")]
    ZeroQuantity(u64),

    #[error("order {order_id} belongs to instrument {tracked}, message names {received}")]
    InstrumentMismatch {
        order_id: u64,
        tracked: u32,
        received: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: u64,
    pub quantity: u64,
    pub order_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedOrder {
    pub order_id: u64,
    pub instrument_id: u32,
    pub side: Side,
    pub original_quantity: u32,
    pub remaining_quantity: u32,
    pub price: u64,
    pub add_timestamp: u64,
}

/// Per-instrument book.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    instrument_id: u32,
    symbol: Option<String>,
    lot_size: Option<u32>,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    last_trade_price: Option<u64>,
    last_trade_quantity: u32,
    total_volume: u64,
    turnover: u128,
    trade_count: u64,
    statistics: Option<Statistics>,
}

impl OrderBook {
    pub fn new(instrument_id: u32) -> Self {
        OrderBook {
            instrument_id,
            ..Default::default()
        }
    }

    fn levels_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Add resting quantity at `price`, creating the level if needed.
    fn add_liquidity(&mut self, side: Side, price: u64, quantity: u64) {
        let levels = self.levels_mut(side);
        // First position whose price is no better than `price`.
        let pos = levels
            .iter()
            .position(|l| match side {
                Side::Bid => l.price <= price,
                Side::Ask => l.price >= price,
            })
            .unwrap_or(levels.len());

        match levels.get_mut(pos) {
            Some(level) if level.price == price => {
                level.quantity += quantity;
                level.order_count += 1;
            }
            _ => levels.insert(
                pos,
                PriceLevel {
                    price,
                    quantity,
                    order_count: 1,
                },
            ),
        }
    }

    /// Take `quantity` out of the level at `price`; `order_gone` also drops the
    /// order count. Empty levels are removed.
    fn remove_liquidity(&mut self, side: Side, price: u64, quantity: u64, order_gone: bool) {
        let levels = self.levels_mut(side);
        if let Some(pos) = levels.iter().position(|l| l.price == price) {
            let level = &mut levels[pos];
            level.quantity = level.quantity.saturating_sub(quantity);
            if order_gone {
                level.order_count = level.order_count.saturating_sub(1);
            }
            if level.quantity == 0 || level.order_count == 0 {
                levels.remove(pos);
            }
        }
    }

    fn adjust_liquidity(&mut self, side: Side, price: u64, old_qty: u64, new_qty: u64) {
        let levels = self.levels_mut(side);
        if let Some(pos) = levels.iter().position(|l| l.price == price) {
            let level = &mut levels[pos];
            level.quantity = level.quantity.saturating_sub(old_qty).saturating_add(new_qty);
            if level.quantity == 0 {
                levels.remove(pos);
            }
        }
    }

    fn record_trade(&mut self, price: u64, quantity: u32) {
        self.last_trade_price = Some(price);
        self.last_trade_quantity = quantity;
        self.total_volume += quantity as u64;
        self.turnover += price as u128 * quantity as u128;
        self.trade_count += 1;
    }

    pub fn instrument_id(&self) -> u32 {
        self.instrument_id
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Get best bid price and quantity
    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids.first().map(|l| (l.price, l.quantity))
    }

    /// Get best ask price and quantity
    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks.first().map(|l| (l.price, l.quantity))
    }

    /// Get spread (best ask - best bid) in fixed-point units
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) if bid < ask => Some(ask - bid),
            _ => None,
        }
    }

    pub fn last_trade_price(&self) -> Option<u64> {
        self.last_trade_price
    }

    pub fn total_volume(&self) -> u64 {
        self.total_volume
    }

    pub fn turnover(&self) -> u128 {
        self.turnover
    }

    /// Copy out the top `max_depth` levels of each side plus trade state.
    pub fn snapshot(&self, max_depth: usize) -> BookSnapshot {
        BookSnapshot {
            instrument_id: self.instrument_id,
            symbol: self.symbol.clone(),
            lot_size: self.lot_size,
            bids: self.bids.iter().take(max_depth).copied().collect(),
            asks: self.asks.iter().take(max_depth).copied().collect(),
            last_trade_price: self.last_trade_price,
            last_trade_quantity: self.last_trade_quantity,
            total_volume: self.total_volume,
            turnover: self.turnover,
            trade_count: self.trade_count,
            statistics: self.statistics,
        }
    }
}

/// Point-in-time copy of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    pub instrument_id: u32,
    pub symbol: Option<String>,
    pub lot_size: Option<u32>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_trade_price: Option<u64>,
    pub last_trade_quantity: u32,
    pub total_volume: u64,
    pub turnover: u128,
    pub trade_count: u64,
    pub statistics: Option<Statistics>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

/// All books plus the live-order table.
#[derive(Debug, Clone)]
pub struct BookBuilder {
    books: FxHashMap<u32, OrderBook>,
    orders: FxHashMap<u64, TrackedOrder>,
    max_depth: usize,
}

impl BookBuilder {
    pub fn new(max_depth: usize) -> Self {
        BookBuilder {
            books: FxHashMap::default(),
            orders: FxHashMap::default(),
            max_depth,
        }
    }

    pub fn shared(max_depth: usize) -> SharedBooks {
        Arc::new(RwLock::new(Self::new(max_depth)))
    }

    fn book_mut(&mut self, instrument_id: u32) -> &mut OrderBook {
        self.books
            .entry(instrument_id)
            .or_insert_with(|| OrderBook::new(instrument_id))
    }

    /// Apply a message to the books. Messages that carry no book state are
    /// accepted and ignored.
    pub fn apply_message(&mut self, msg: &Message) -> Result<(), BookError> {
        match msg {
            Message::AddOrder(m) => self.add_order(m),
            Message::ModifyOrder(m) => self.modify_order(m),
            Message::DeleteOrder(m) => self.delete_order(m),
            Message::Trade(m) => {
                self.trade(m);
                Ok(())
            }
            Message::SecurityDefinition(m) => {
                let book = self.book_mut(m.header.instrument_id);
                book.symbol = Some(m.symbol_str());
                book.lot_size = Some(m.lot_size);
                Ok(())
            }
            Message::Statistics(m) => {
                self.book_mut(m.header.instrument_id).statistics = Some(*m);
                Ok(())
            }
            Message::TradeCancel(_) | Message::Heartbeat(_) | Message::SequenceReset(_) => Ok(()),
        }
    }

    fn add_order(&mut self, m: &AddOrder) -> Result<(), BookError> {
        if self.orders.contains_key(&m.order_id) {
            return Err(BookError::DuplicateOrder(m.order_id));
        }
        if m.quantity == 0 {
            return Err(BookError::ZeroQuantity(m.order_id));
        }

        let instrument_id = m.header.instrument_id;
        self.book_mut(instrument_id)
            .add_liquidity(m.side, m.price, m.quantity as u64);
        self.orders.insert(
            m.order_id,
            TrackedOrder {
                order_id: m.order_id,
                instrument_id,
                side: m.side,
                original_quantity: m.quantity,
                remaining_quantity: m.quantity,
                price: m.price,
                add_timestamp: m.header.send_time,
            },
        );
        Ok(())
    }

    fn modify_order(&mut self, m: &ModifyOrder) -> Result<(), BookError> {
        let order = *self
            .orders
            .get(&m.order_id)
            .ok_or(BookError::UnknownOrder(m.order_id))?;
        if order.instrument_id != m.header.instrument_id {
            return Err(BookError::InstrumentMismatch {
                order_id: m.order_id,
                tracked: order.instrument_id,
                received: m.header.instrument_id,
            });
        }

        let book = self.book_mut(order.instrument_id);
        if m.quantity == 0 {
            book.remove_liquidity(order.side, order.price, order.remaining_quantity as u64, true);
            self.orders.remove(&m.order_id);
            return Ok(());
        }

        if m.price == order.price {
            book.adjust_liquidity(
                order.side,
                order.price,
                order.remaining_quantity as u64,
                m.quantity as u64,
            );
        } else {
            book.remove_liquidity(order.side, order.price, order.remaining_quantity as u64, true);
            book.add_liquidity(order.side, m.price, m.quantity as u64);
        }

        if let Some(tracked) = self.orders.get_mut(&m.order_id) {
            tracked.price = m.price;
            tracked.remaining_quantity = m.quantity;
        }
        Ok(())
    }

    fn delete_order(&mut self, m: &DeleteOrder) -> Result<(), BookError> {
        let order = self
            .orders
            .remove(&m.order_id)
            .ok_or(BookError::UnknownOrder(m.order_id))?;

        self.book_mut(order.instrument_id).remove_liquidity(
            order.side,
            order.price,
            order.remaining_quantity as u64,
            true,
        );
        Ok(())
    }

    fn trade(&mut self, m: &Trade) {
        let instrument_id = m.header.instrument_id;
        self.book_mut(instrument_id).record_trade(m.price, m.quantity);

        if m.order_id == 0 {
            return;
        }

        // Execution against a resting order
        let Some(order) = self.orders.get_mut(&m.order_id) else {
            return;
        };
        if order.instrument_id != instrument_id {
            return;
        }
        let executed = m.quantity.min(order.remaining_quantity);
        order.remaining_quantity -= executed;
        let filled = order.remaining_quantity == 0;
        let (side, price) = (order.side, order.price);
        if filled {
            self.orders.remove(&m.order_id);
        }
        self.book_mut(instrument_id)
            .remove_liquidity(side, price, executed as u64, filled);
    }

    pub fn book(&self, instrument_id: u32) -> Option<&OrderBook> {
        self.books.get(&instrument_id)
    }

    pub fn snapshot(&self, instrument_id: u32) -> Option<BookSnapshot> {
        self.books
            .get(&instrument_id)
            .map(|b| b.snapshot(self.max_depth))
    }

    pub fn tracked_order(&self, order_id: u64) -> Option<&TrackedOrder> {
        self.orders.get(&order_id)
    }

    /// Get number of active orders
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn instrument_count(&self) -> usize {
        self.books.len()
    }

    pub fn instruments(&self) -> impl Iterator<Item = u32> + '_ {
        self.books.keys().copied()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn clear(&mut self) {
        self.books.clear();
        self.orders.clear();
    }
}

impl Default for BookBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(order_id: u64, price: u64, quantity: u32, side: Side) -> Message {
        Message::AddOrder(AddOrder {
            header: header(1, order_id, 0),
            order_id,
            price,
            quantity,
            side,
        })
    }

    #[test]
    fn test_empty_book() {
        let book = OrderBook::new(1);
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
    }

    #[test]
    fn test_levels_sorted_on_insert() {
        let mut builder = BookBuilder::default();
        for (id, price) in [(1, 100), (2, 102), (3, 101), (4, 99)] {
            builder.apply_message(&add(id, price, 10, Side::Bid)).unwrap();
        }
        for (id, price) in [(5, 105), (6, 103), (7, 104)] {
            builder.apply_message(&add(id, price, 10, Side::Ask)).unwrap();
        }

        let book = builder.book(1).unwrap();
        let bids: Vec<u64> = book.bids().iter().map(|l| l.price).collect();
        let asks: Vec<u64> = book.asks().iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![102, 101, 100, 99]);
        assert_eq!(asks, vec![103, 104, 105]);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut builder = BookBuilder::default();
        builder.apply_message(&add(1, 100, 10, Side::Bid)).unwrap();
        assert_eq!(
            builder.apply_message(&add(1, 100, 10, Side::Bid)),
            Err(BookError::DuplicateOrder(1))
        );
        assert_eq!(builder.book(1).unwrap().best_bid(), Some((100, 10)));
    }

    #[test]
    fn test_snapshot_capped_at_depth() {
        let mut builder = BookBuilder::new(2);
        for id in 0..5 {
            builder.apply_message(&add(id + 1, 100 + id, 10, Side::Ask)).unwrap();
        }
        let snap = builder.snapshot(1).unwrap();
        assert_eq!(snap.asks.len(), 2);
        assert_eq!(snap.asks[0].price, 100);
        assert_eq!(builder.book(1).unwrap().asks().len(), 5);
    }
}
