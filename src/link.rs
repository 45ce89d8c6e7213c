//! Host link: frames come in over a [`Transport`], go through the
//! [`FrameParser`] and the [`Dispatcher`], and every reply goes straight
//! back out.

pub mod command;
pub mod dispatch;
pub mod frame;
pub mod transport;

#[cfg(test)]
mod tests;

use std::io;

use crate::settings::SettingsStore;
use dispatch::{Dispatcher, ErrorCode, Reply};
use frame::{FrameParser, ResyncPolicy};
use transport::Transport;

pub use command::{Command, CommandError};
pub use dispatch::DispatchError;
pub use frame::{Frame, FrameError, FrameKind};

/// Input bytes handled per `poll`, so a flooding host can't keep the caller
/// from checking for shutdown.
pub const POLL_BUDGET: usize = 4096;

/// At this tick or slower every new bus sample is pushed to the host as a
/// `6502` frame.
pub const STATUS_REPORT_TICK_US: u64 = 10_000;

pub struct Link<T: Transport, S: SettingsStore> {
    transport: T,
    parser: FrameParser,
    dispatcher: Dispatcher<S>,
    session: u64,
    reported_cycles: u64,
    frames: u64,
    errors: u64,
}

impl<T: Transport, S: SettingsStore> Link<T, S> {
    pub fn new(transport: T, dispatcher: Dispatcher<S>, policy: ResyncPolicy) -> Self {
        let session = transport.session();
        let reported_cycles = dispatcher.bridge().control.cycles();
        Link {
            transport,
            parser: FrameParser::new(policy),
            dispatcher,
            session,
            reported_cycles,
            frames: 0,
            errors: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Frames dispatched and frame errors reported so far.
    pub fn counts(&self) -> (u64, u64) {
        (self.frames, self.errors)
    }

    /// Handles up to [`POLL_BUDGET`] buffered input bytes, then reports a
    /// new bus sample if the clock is slow enough. Returns the number of
    /// frames sent; zero means the link was idle.
    pub fn poll(&mut self) -> io::Result<usize> {
        let mut sent = 0;
        let mut budget = POLL_BUDGET;
        while budget > 0 && self.transport.available()? > 0 {
            self.follow_session();
            let Some(byte) = self.transport.read_byte()? else {
                break;
            };
            budget -= 1;
            let reply = match self.parser.push(byte) {
                None => continue,
                Some(Ok(frame)) => {
                    self.frames += 1;
                    log::trace!(
                        "{}{} ({} bytes)",
                        frame.kind.sentinel() as char,
                        frame.action,
                        frame.payload.len()
                    );
                    self.dispatcher.dispatch(&frame)
                }
                Some(Err(e)) => {
                    self.errors += 1;
                    log::warn!("dropped frame: {}", e);
                    Reply::from(ErrorCode::from(&e).frame())
                }
            };
            self.send(&reply)?;
            sent += 1;
        }
        if self.report_sample()? {
            sent += 1;
        }
        if sent == 0 {
            // Output a slow host has not taken yet.
            self.transport.flush()?;
        }
        Ok(sent)
    }

    /// A different host must not inherit a half-parsed frame.
    fn follow_session(&mut self) {
        let session = self.transport.session();
        if session != self.session {
            log::debug!("link session {} -> {}", self.session, session);
            self.session = session;
            self.parser.reset();
        }
    }

    // Cycles that complete between two polls are reported once, with the
    // latest sample.
    fn report_sample(&mut self) -> io::Result<bool> {
        let cycles = self.dispatcher.bridge().control.cycles();
        if cycles == self.reported_cycles {
            return Ok(false);
        }
        self.reported_cycles = cycles;
        if self.dispatcher.settings().tick_delay_us < STATUS_REPORT_TICK_US {
            return Ok(false);
        }
        let frame = self.dispatcher.status_frame();
        self.send(&Reply::from(frame))?;
        Ok(true)
    }

    fn send(&mut self, reply: &Reply) -> io::Result<()> {
        self.transport.write_bytes(&reply.frame.encode())?;
        self.transport.flush()?;
        if let Some(baud) = reply.reopen_baud {
            self.transport.reopen(baud)?;
            // Bytes buffered at the old rate are line noise now.
            self.parser.reset();
        }
        Ok(())
    }
}
