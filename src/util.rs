//! Thread helpers shared by the pipeline workers.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Cooperative stop signal polled by every worker loop.
#[derive(Debug, Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Idle strategy for polling loops: spin briefly, then yield the CPU.
#[derive(Debug, Clone)]
pub struct Backoff {
    spins: u32,
    spin_limit: u32,
}

impl Backoff {
    pub fn new(spin_limit: u32) -> Self {
        Backoff {
            spins: 0,
            spin_limit,
        }
    }

    /// Call when the last poll found nothing to do.
    #[inline]
    pub fn idle(&mut self) {
        if self.spins < self.spin_limit {
            self.spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }

    /// Call after useful work.
    #[inline]
    pub fn reset(&mut self) {
        self.spins = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Pin the calling thread to logical core `core`. Best effort: a missing core,
/// an unsupported platform or a refused request are all ignored.
pub fn pin_current_thread(core: Option<usize>) -> bool {
    let Some(index) = core else {
        return false;
    };
    let pinned = core_affinity::get_core_ids()
        .and_then(|cores| cores.into_iter().find(|c| c.id == index))
        .map(core_affinity::set_for_current)
        .unwrap_or(false);
    if !pinned {
        debug!("could not pin thread to core {index}; continuing unpinned");
    }
    pinned
}

/// Wall-clock nanoseconds since the UNIX epoch; comparable with exchange send times.
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
