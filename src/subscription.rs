//! Instrument subscription filter.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Everything except `excluded`.
    All { excluded: FxHashSet<u32> },
    /// Only `included`.
    Only { included: FxHashSet<u32> },
}

/// Which instruments get book maintenance and callbacks. Read by the
/// processing thread on every instrument message, written by control calls.
#[derive(Debug)]
pub struct Subscriptions {
    mode: RwLock<Mode>,
}

impl Subscriptions {
    pub fn all() -> Self {
        Subscriptions {
            mode: RwLock::new(Mode::All {
                excluded: FxHashSet::default(),
            }),
        }
    }

    pub fn none() -> Self {
        Subscriptions {
            mode: RwLock::new(Mode::Only {
                included: FxHashSet::default(),
            }),
        }
    }

    pub fn subscribe(&self, instrument_id: u32) {
        match &mut *self.mode.write() {
            Mode::All { excluded } => {
                excluded.remove(&instrument_id);
            }
            Mode::Only { included } => {
                included.insert(instrument_id);
            }
        }
    }

    pub fn unsubscribe(&self, instrument_id: u32) {
        match &mut *self.mode.write() {
            Mode::All { excluded } => {
                excluded.insert(instrument_id);
            }
            Mode::Only { included } => {
                included.remove(&instrument_id);
            }
        }
    }

    pub fn subscribe_all(&self) {
        *self.mode.write() = Mode::All {
            excluded: FxHashSet::default(),
        };
    }

    /// Switch to an explicit, empty subscription set.
    pub fn subscribe_none(&self) {
        *self.mode.write() = Mode::Only {
            included: FxHashSet::default(),
        };
    }

    #[inline]
    pub fn is_subscribed(&self, instrument_id: u32) -> bool {
        match &*self.mode.read() {
            Mode::All { excluded } => !excluded.contains(&instrument_id),
            Mode::Only { included } => included.contains(&instrument_id),
        }
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::all()
    }
}
