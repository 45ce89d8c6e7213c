//! Simulated target bus.
//!
//! Plays the CPU side of the multiplexed bus: presents a scripted address
//! and R/W level on the address buffers, presents write data on the data
//! buffer, and captures whatever the bridge drives during read cycles. Once
//! the script runs out it free-runs sequential reads, which is what a CPU
//! fetching straight-line code looks like from the bus.

use std::collections::VecDeque;

use super::pins::{BusPins, ControlLines, PinSample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAccess {
    Read,
    Write(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCycle {
    pub address: u16,
    pub access: SimAccess,
}

impl SimCycle {
    pub fn read(address: u16) -> Self {
        SimCycle {
            address,
            access: SimAccess::Read,
        }
    }

    pub fn write(address: u16, value: u8) -> Self {
        SimCycle {
            address,
            access: SimAccess::Write(value),
        }
    }
}

pub struct SimPins {
    script: VecDeque<SimCycle>,
    next_address: u16,
    current: Option<SimCycle>,
    lines: ControlLines,
    driven: Option<u8>,
    recording: bool,
    served: Vec<(u16, u8)>,
    completed: u64,
    reset_cycles: u64,
}

impl SimPins {
    /// Runs `script`, then free-runs from the address after its last cycle.
    pub fn scripted<I: IntoIterator<Item = SimCycle>>(script: I) -> Self {
        let script: VecDeque<SimCycle> = script.into_iter().collect();
        let next_address = script
            .back()
            .map(|c| c.address.wrapping_add(1))
            .unwrap_or(0);
        SimPins {
            script,
            next_address,
            current: None,
            lines: ControlLines::empty(),
            driven: None,
            recording: true,
            served: Vec::new(),
            completed: 0,
            reset_cycles: 0,
        }
    }

    /// Sequential reads from `start` forever, without recording served
    /// values (long-running use).
    pub fn free_running(start: u16) -> Self {
        let mut pins = Self::scripted(std::iter::empty());
        pins.next_address = start;
        pins.recording = false;
        pins
    }

    /// `(address, value)` of every read cycle the bridge served.
    pub fn served(&self) -> &[(u16, u8)] {
        &self.served
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed
    }

    /// Cycles clocked while the reset line was held low.
    pub fn reset_cycles(&self) -> u64 {
        self.reset_cycles
    }

    pub fn lines(&self) -> ControlLines {
        self.lines
    }

    pub fn is_driven(&self) -> bool {
        self.driven.is_some()
    }

    fn cycle(&mut self) -> SimCycle {
        if let Some(c) = self.current {
            return c;
        }
        let c = self.script.pop_front().unwrap_or_else(|| {
            let c = SimCycle::read(self.next_address);
            self.next_address = self.next_address.wrapping_add(1);
            c
        });
        self.current = Some(c);
        c
    }

    fn end_cycle(&mut self) {
        if let Some(c) = self.current.take() {
            if let (SimAccess::Read, Some(v)) = (c.access, self.driven) {
                if self.recording {
                    self.served.push((c.address, v));
                }
            }
            if !self.lines.contains(ControlLines::RST) {
                self.reset_cycles += 1;
            }
            self.completed += 1;
        }
    }
}

impl BusPins for SimPins {
    fn put_control(&mut self, lines: ControlLines) {
        let falling_clock =
            self.lines.contains(ControlLines::CLK) && !lines.contains(ControlLines::CLK);
        if falling_clock {
            self.end_cycle();
        }
        self.lines = lines;
    }

    fn release_data(&mut self) {
        self.driven = None;
    }

    fn drive_data(&mut self, value: u8) {
        self.driven = Some(value);
    }

    fn sample(&mut self) -> PinSample {
        let c = self.cycle();
        let rw = c.access == SimAccess::Read;
        let buffer = self.lines.enabled_buffer();
        let data = if buffer == ControlLines::ADDR_LO_OE {
            c.address as u8
        } else if buffer == ControlLines::ADDR_HI_OE {
            (c.address >> 8) as u8
        } else if buffer == ControlLines::DATA_OE {
            match (c.access, self.driven) {
                (SimAccess::Write(v), _) => v,
                (SimAccess::Read, Some(v)) => v,
                // Floating bus.
                (SimAccess::Read, None) => 0xFF,
            }
        } else {
            0xFF
        };
        PinSample { data, rw }
    }
}
