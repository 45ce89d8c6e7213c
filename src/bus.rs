//! The bus cycle engine.
//!
//! Once per target clock cycle the engine reads the low address byte and the
//! R/W level, then the high address byte, off the same eight data lines
//! (each half gated by its own buffer enable), and finally either samples the
//! data the CPU is writing or drives the byte the CPU is reading, with the
//! clock held high for the configured period.

pub mod pins;
pub mod sim;


use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::Bridge;
use crate::debug_flags;
pub use pins::{BusPins, ControlLines, PinSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// CPU reads: the bridge drives the data path.
    Read,
    /// CPU writes: the bridge samples the data path.
    Write,
}

impl Direction {
    #[inline]
    pub fn from_rw(rw: bool) -> Self {
        if rw {
            Direction::Read
        } else {
            Direction::Write
        }
    }

    pub fn rw_level(self) -> bool {
        self == Direction::Read
    }
}

/// What the engine saw on one bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSample {
    pub address: u16,
    pub direction: Direction,
    pub data: u8,
}

impl BusSample {
    const VALID: u32 = 1 << 31;
    const READ: u32 = 1 << 24;

    /// Packs into one word so the shared status is never torn.
    pub fn pack(self) -> u32 {
        let dir = if self.direction == Direction::Read {
            Self::READ
        } else {
            0
        };
        Self::VALID | dir | ((self.data as u32) << 16) | self.address as u32
    }

    pub fn unpack(word: u32) -> Option<Self> {
        if word & Self::VALID == 0 {
            return None;
        }
        Some(BusSample {
            address: word as u16,
            direction: Direction::from_rw(word & Self::READ != 0),
            data: (word >> 16) as u8,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTiming {
    /// Wait between asserting a buffer enable and sampling through it
    /// (level shifter propagation).
    pub settle: Duration,
}

impl EngineTiming {
    pub fn from_env() -> Self {
        EngineTiming {
            settle: Duration::from_nanos(debug_flags::settle_ns()),
        }
    }
}

impl Default for EngineTiming {
    fn default() -> Self {
        EngineTiming {
            settle: Duration::from_nanos(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AcquireAddressLow,
    AcquireAddressHigh { low: u8, direction: Direction },
    DriveOrSampleData { address: u16, direction: Direction },
}

pub struct BusEngine<P: BusPins> {
    pins: P,
    bridge: Arc<Bridge>,
    timing: EngineTiming,
    phase: Phase,
    lines: ControlLines,
    driving: bool,
}

impl<P: BusPins> BusEngine<P> {
    pub fn new(mut pins: P, bridge: Arc<Bridge>, timing: EngineTiming) -> Self {
        // Power-on: drivers off, low address buffer selected, reset released
        // unless the host already asked for it.
        let mut lines = ControlLines::ADDR_LO_OE;
        if !bridge.control.reset_asserted() {
            lines |= ControlLines::RST;
        }
        pins.release_data();
        pins.put_control(lines);
        BusEngine {
            pins,
            bridge,
            timing,
            phase: Phase::Idle,
            lines,
            driving: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lines(&self) -> ControlLines {
        self.lines
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    pub fn into_pins(self) -> P {
        self.pins
    }

    /// Advances the state machine by one phase. Returns the sample when the
    /// step completed a bus cycle.
    pub fn step(&mut self) -> Option<BusSample> {
        match self.phase {
            Phase::Idle => {
                self.follow_reset_line();
                if self.bridge.control.clock_enabled() {
                    self.phase = Phase::AcquireAddressLow;
                }
                None
            }
            Phase::AcquireAddressLow => {
                if !self.bridge.control.enter_cycle() {
                    self.phase = Phase::Idle;
                    return None;
                }
                self.release_data();
                self.select(ControlLines::ADDR_LO_OE);
                spin_for(self.timing.settle);
                let s = self.pins.sample();
                self.phase = Phase::AcquireAddressHigh {
                    low: s.data,
                    direction: Direction::from_rw(s.rw),
                };
                None
            }
            Phase::AcquireAddressHigh { low, direction } => {
                debug_assert_eq!(self.lines.enabled_buffer(), ControlLines::ADDR_LO_OE);
                debug_assert!(!self.driving);
                self.select(ControlLines::ADDR_HI_OE);
                spin_for(self.timing.settle);
                let high = self.pins.sample().data;
                self.phase = Phase::DriveOrSampleData {
                    address: u16::from_le_bytes([low, high]),
                    direction,
                };
                None
            }
            Phase::DriveOrSampleData { address, direction } => {
                debug_assert_eq!(self.lines.enabled_buffer(), ControlLines::ADDR_HI_OE);
                debug_assert!(!self.driving);
                let data = match direction {
                    Direction::Write => {
                        self.select(ControlLines::DATA_OE | ControlLines::CLK);
                        spin_for(self.timing.settle);
                        let value = self.pins.sample().data;
                        // Writes outside the shadow are observed, not stored.
                        self.bridge.memory.ram.set(address as usize, value);
                        value
                    }
                    Direction::Read => {
                        let value = self.bridge.memory.fetch(address);
                        self.select(ControlLines::DATA_OE);
                        self.pins.drive_data(value);
                        self.driving = true;
                        self.select(ControlLines::DATA_OE | ControlLines::CLK);
                        value
                    }
                };
                self.hold_clock();
                self.select(ControlLines::DATA_OE);

                let sample = BusSample {
                    address,
                    direction,
                    data,
                };
                self.phase = if self.bridge.control.finish_cycle(sample) {
                    Phase::Idle
                } else {
                    Phase::AcquireAddressLow
                };
                Some(sample)
            }
        }
    }

    /// Drives one whole cycle if the clock allows it.
    pub fn run_cycle(&mut self) -> Option<BusSample> {
        loop {
            if let Some(sample) = self.step() {
                return Some(sample);
            }
            if self.phase == Phase::Idle {
                return None;
            }
        }
    }

    /// Thread body: steps until `keep_running` says stop.
    pub fn run<F: Fn() -> bool>(&mut self, keep_running: F) {
        log::info!("bus engine started (settle {:?})", self.timing.settle);
        let mut was_idle = true;
        let mut started_at = 0;
        while keep_running() {
            self.step();
            let idle = self.phase == Phase::Idle;
            if idle {
                if !was_idle {
                    let cycles = self.bridge.control.cycles();
                    log::debug!("clock stopped after {} cycles", cycles - started_at);
                }
                std::thread::yield_now();
            } else if was_idle {
                started_at = self.bridge.control.cycles();
                log::debug!("clock running");
            }
            was_idle = idle;
        }
        self.release_data();
        log::info!("bus engine stopped after {} cycles", self.bridge.control.cycles());
    }

    fn base_lines(&self) -> ControlLines {
        if self.bridge.control.reset_asserted() {
            ControlLines::empty()
        } else {
            ControlLines::RST
        }
    }

    #[inline]
    fn select(&mut self, lines: ControlLines) {
        self.lines = self.base_lines() | lines;
        self.pins.put_control(self.lines);
    }

    #[inline]
    fn release_data(&mut self) {
        self.pins.release_data();
        self.driving = false;
    }

    /// Keeps CLK high for the tick period. Stopping the clock (a lease does)
    /// ends the hold early.
    fn hold_clock(&self) {
        let control = &self.bridge.control;
        let period = control.clock_period();
        if period.is_zero() {
            return;
        }
        let start = Instant::now();
        while start.elapsed() < period {
            if !control.clock_enabled() {
                return;
            }
            if period < YIELD_HOLD {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn follow_reset_line(&mut self) {
        let want = self.base_lines();
        if (self.lines & ControlLines::RST) != want {
            self.lines = (self.lines - ControlLines::RST) | want;
            self.pins.put_control(self.lines);
        }
    }
}

/// Holds at least this long give the core back while waiting.
const YIELD_HOLD: Duration = Duration::from_micros(100);

#[inline]
fn spin_for(wait: Duration) {
    if wait.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < wait {
        std::hint::spin_loop();
    }
}
