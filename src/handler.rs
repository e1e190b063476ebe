//! Event handler interface
//!
//! One method per message category, all defaulting to no-ops so a consumer
//! only implements what it cares about. Handlers run synchronously on the
//! processing thread, exactly once per accepted message.

use crate::protocol::*;

pub trait EventHandler: Send {
    fn on_add_order(&mut self, _msg: &AddOrder) {}
    fn on_modify_order(&mut self, _msg: &ModifyOrder) {}
    fn on_delete_order(&mut self, _msg: &DeleteOrder) {}
    fn on_trade(&mut self, _msg: &Trade) {}
    fn on_trade_cancel(&mut self, _msg: &TradeCancel) {}
    fn on_security_definition(&mut self, _msg: &SecurityDefinition) {}
    fn on_statistics(&mut self, _msg: &Statistics) {}
    fn on_heartbeat(&mut self, _header: &MessageHeader) {}
    fn on_sequence_reset(&mut self, _msg: &SequenceReset) {}

    /// Connection-level failure or local disconnect. Delivered at most once
    /// per connection.
    fn on_disconnect(&mut self, _reason: &str) {}
}

impl Message {
    /// Route this message to the matching handler method.
    #[inline]
    pub fn dispatch<H: EventHandler + ?Sized>(&self, handler: &mut H) {
        match self {
            Message::Heartbeat(h) => handler.on_heartbeat(h),
            Message::SequenceReset(m) => handler.on_sequence_reset(m),
            Message::SecurityDefinition(m) => handler.on_security_definition(m),
            Message::AddOrder(m) => handler.on_add_order(m),
            Message::ModifyOrder(m) => handler.on_modify_order(m),
            Message::DeleteOrder(m) => handler.on_delete_order(m),
            Message::Trade(m) => handler.on_trade(m),
            Message::TradeCancel(m) => handler.on_trade_cancel(m),
            Message::Statistics(m) => handler.on_statistics(m),
        }
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHandler;

impl EventHandler for NullHandler {}

/// Counts callbacks per category.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CountingHandler {
    pub add_orders: u64,
    pub modify_orders: u64,
    pub delete_orders: u64,
    pub trades: u64,
    pub trade_cancels: u64,
    pub security_definitions: u64,
    pub statistics: u64,
    pub heartbeats: u64,
    pub sequence_resets: u64,
    pub disconnects: Vec<String>,
}

impl CountingHandler {
    pub fn total(&self) -> u64 {
        self.add_orders
            + self.modify_orders
            + self.delete_orders
            + self.trades
            + self.trade_cancels
            + self.security_definitions
            + self.statistics
            + self.heartbeats
            + self.sequence_resets
    }
}

impl EventHandler for CountingHandler {
    fn on_add_order(&mut self, _msg: &AddOrder) {
        self.add_orders += 1;
    }
    fn on_modify_order(&mut self, _msg: &ModifyOrder) {
        self.modify_orders += 1;
    }
    fn on_delete_order(&mut self, _msg: &DeleteOrder) {
        self.delete_orders += 1;
    }
    fn on_trade(&mut self, _msg: &Trade) {
        self.trades += 1;
    }
    fn on_trade_cancel(&mut self, _msg: &TradeCancel) {
        self.trade_cancels += 1;
    }
    fn on_security_definition(&mut self, _msg: &SecurityDefinition) {
        self.security_definitions += 1;
    }
    fn on_statistics(&mut self, _msg: &Statistics) {
        self.statistics += 1;
    }
    fn on_heartbeat(&mut self, _header: &MessageHeader) {
        self.heartbeats += 1;
    }
    fn on_sequence_reset(&mut self, _msg: &SequenceReset) {
        self.sequence_resets += 1;
    }
    fn on_disconnect(&mut self, reason: &str) {
        self.disconnects.push(reason.to_string());
    }
}
