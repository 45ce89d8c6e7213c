use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use bitflags::bitflags;

use crate::bus::BusSample;

bitflags! {
    /// Host-controlled clock/reset state, kept in one atomic byte so the
    /// engine's single-step consumption is a single read-modify-write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockFlags: u8 {
        const ENABLED = 0b0000_0001;
        const SINGLE_STEP = 0b0000_0010;
        const RESET = 0b0000_0100;
    }
}

/// State shared between the bus engine thread and the link thread.
///
/// The dispatcher is the only writer of the clock flags except for the
/// engine clearing `ENABLED` when it consumes a single step. Everything
/// below `flags` is written by the engine only.
pub struct ControlState {
    flags: AtomicU8,
    clock_period_ns: AtomicU64,
    in_cycle: AtomicBool,
    cycles: AtomicU64,
    last_sample: AtomicU32,
}

impl ControlState {
    pub fn new() -> Self {
        ControlState {
            flags: AtomicU8::new(ClockFlags::empty().bits()),
            clock_period_ns: AtomicU64::new(0),
            in_cycle: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            last_sample: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn flags(&self) -> ClockFlags {
        ClockFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn clock_enabled(&self) -> bool {
        self.flags().contains(ClockFlags::ENABLED)
    }

    pub fn single_step(&self) -> bool {
        self.flags().contains(ClockFlags::SINGLE_STEP)
    }

    #[inline]
    pub fn reset_asserted(&self) -> bool {
        self.flags().contains(ClockFlags::RESET)
    }

    /// Free-running clock on/off. Enabling also leaves single-step mode.
    pub fn set_clock(&self, enabled: bool) {
        if enabled {
            self.update(|f| (f | ClockFlags::ENABLED) - ClockFlags::SINGLE_STEP);
        } else {
            self.flags
                .fetch_and(!ClockFlags::ENABLED.bits(), Ordering::SeqCst);
        }
    }

    /// Arms exactly one bus cycle; the engine clears `ENABLED` after it.
    pub fn arm_single_step(&self) {
        self.flags.fetch_or(
            (ClockFlags::ENABLED | ClockFlags::SINGLE_STEP).bits(),
            Ordering::SeqCst,
        );
    }

    /// Asserting reset also stops the clock.
    pub fn set_reset(&self, asserted: bool) {
        if asserted {
            self.update(|f| (f | ClockFlags::RESET) - ClockFlags::ENABLED);
        } else {
            self.flags
                .fetch_and(!ClockFlags::RESET.bits(), Ordering::SeqCst);
        }
    }

    #[inline]
    pub fn clock_period(&self) -> Duration {
        Duration::from_nanos(self.clock_period_ns.load(Ordering::Relaxed))
    }

    pub fn set_clock_period(&self, period: Duration) {
        let ns = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
        self.clock_period_ns.store(ns, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn in_cycle(&self) -> bool {
        self.in_cycle.load(Ordering::SeqCst)
    }

    pub fn last_sample(&self) -> Option<BusSample> {
        BusSample::unpack(self.last_sample.load(Ordering::SeqCst))
    }

    /// Engine side: publishes that a cycle is starting, then re-checks the
    /// clock. Paired with the store/load order in [`ControlState::quiesce`].
    #[inline]
    pub(crate) fn enter_cycle(&self) -> bool {
        self.in_cycle.store(true, Ordering::SeqCst);
        if self.clock_enabled() {
            true
        } else {
            self.in_cycle.store(false, Ordering::SeqCst);
            false
        }
    }

    /// Engine side: records the finished cycle. Returns true when the cycle
    /// consumed a single step and the clock is now off.
    #[inline]
    pub(crate) fn finish_cycle(&self, sample: BusSample) -> bool {
        self.last_sample.store(sample.pack(), Ordering::SeqCst);
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let consumed = self
            .flags
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                let f = ClockFlags::from_bits_truncate(bits);
                if f.contains(ClockFlags::SINGLE_STEP | ClockFlags::ENABLED) {
                    Some((f - ClockFlags::ENABLED).bits())
                } else {
                    None
                }
            })
            .is_ok();
        self.in_cycle.store(false, Ordering::SeqCst);
        consumed
    }

    /// Stops the clock and waits until no bus cycle is in flight. The clock
    /// comes back when the returned lease is dropped.
    pub fn quiesce(&self) -> BusLease<'_> {
        let start = self.cycles.load(Ordering::SeqCst);
        let prev = ClockFlags::from_bits_truncate(
            self.flags
                .fetch_and(!ClockFlags::ENABLED.bits(), Ordering::SeqCst),
        );
        let mut spins = 0u32;
        while self.in_cycle.load(Ordering::SeqCst) {
            if spins < 64 {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
        // An armed pulse that completed while we waited stays consumed.
        let consumed =
            prev.contains(ClockFlags::SINGLE_STEP) && self.cycles.load(Ordering::SeqCst) != start;
        BusLease {
            control: self,
            restore: prev.contains(ClockFlags::ENABLED) && !consumed,
        }
    }

    fn update(&self, f: impl Fn(ClockFlags) -> ClockFlags) {
        // The closure never returns None, so this cannot fail.
        let _ = self
            .flags
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some(f(ClockFlags::from_bits_truncate(bits)).bits())
            });
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped "bus quiescent" lease returned by [`ControlState::quiesce`].
pub struct BusLease<'a> {
    control: &'a ControlState,
    restore: bool,
}

impl BusLease<'_> {
    pub fn will_restore(&self) -> bool {
        self.restore
    }
}

impl Drop for BusLease<'_> {
    fn drop(&mut self) {
        if self.restore {
            self.control
                .flags
                .fetch_or(ClockFlags::ENABLED.bits(), Ordering::SeqCst);
        }
    }
}
