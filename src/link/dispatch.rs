use std::sync::Arc;

use thiserror::Error;

use super::command::{Command, CommandError};
use super::frame::{Frame, FrameError, FrameKind};
use crate::bridge::Bridge;
use crate::bus::Direction;
use crate::hex;
use crate::memory::{BankId, MemoryError};
use crate::settings::{SettingKey, Settings, SettingsError, SettingsStore};

/// Numeric codes carried by `!{ERROR,n}` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownAction,
    FrameTooLarge,
    OutOfRange,
    MalformedHeader,
    BadArgument,
    Storage,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::UnknownAction => -1,
            ErrorCode::FrameTooLarge => -2,
            ErrorCode::OutOfRange => -3,
            ErrorCode::MalformedHeader => -4,
            ErrorCode::BadArgument => -5,
            ErrorCode::Storage => -6,
        }
    }

    pub fn frame(self) -> Frame {
        Frame::response("ERROR", self.code().to_string())
    }
}

impl From<&FrameError> for ErrorCode {
    fn from(e: &FrameError) -> Self {
        match e {
            FrameError::MalformedHeader(_) => ErrorCode::MalformedHeader,
            FrameError::FrameTooLarge { .. } => ErrorCode::FrameTooLarge,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::Command(CommandError::UnknownAction { .. }) => ErrorCode::UnknownAction,
            DispatchError::Command(CommandError::BadArgument { .. }) => ErrorCode::BadArgument,
            DispatchError::Memory(_) => ErrorCode::OutOfRange,
            DispatchError::Settings(SettingsError::InvalidValue { .. }) => ErrorCode::BadArgument,
            DispatchError::Settings(_) => ErrorCode::Storage,
        }
    }
}

/// One response frame, plus a new line rate when the transport must be
/// re-established after the frame is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub frame: Frame,
    pub reopen_baud: Option<u32>,
}

impl Reply {
    fn new(action: &str, payload: impl Into<Vec<u8>>) -> Self {
        Reply {
            frame: Frame::response(action, payload),
            reopen_baud: None,
        }
    }
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Reply {
            frame,
            reopen_baud: None,
        }
    }
}

pub struct Dispatcher<S: SettingsStore> {
    bridge: Arc<Bridge>,
    settings: Settings,
    store: S,
}

impl<S: SettingsStore> Dispatcher<S> {
    /// Loads the persisted settings and applies the clock period.
    pub fn new(bridge: Arc<Bridge>, mut store: S) -> Result<Self, SettingsError> {
        let settings = store.load()?;
        bridge.control.set_clock_period(settings.clock_period());
        log::info!(
            "{}: {} baud, tick {} us",
            settings.name,
            settings.baud_rate,
            settings.tick_delay_us
        );
        Ok(Dispatcher {
            bridge,
            settings,
            store,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Always yields exactly one reply frame.
    pub fn dispatch(&mut self, frame: &Frame) -> Reply {
        let result = Command::parse(frame)
            .map_err(DispatchError::from)
            .and_then(|cmd| self.execute(cmd, frame));
        match result {
            Ok(reply) => reply,
            Err(DispatchError::Command(CommandError::UnknownAction { .. }))
                if frame.kind == FrameKind::Message =>
            {
                log::debug!("unknown message {:?}", frame.action);
                Reply::new("MESSAGE", "Unknown Command")
            }
            Err(e) => {
                let code = e.code();
                log::warn!(
                    "{}{}: {} ({})",
                    frame.kind.sentinel() as char,
                    frame.action,
                    e,
                    code.code()
                );
                code.frame().into()
            }
        }
    }

    /// The bus sample frame: `!{6502,10}AAAA,DD,RN`, R set for a CPU read and
    /// N set while RESET is released.
    pub fn status_frame(&self) -> Frame {
        Frame::response("6502", self.status())
    }

    fn execute(&mut self, cmd: Command, frame: &Frame) -> Result<Reply, DispatchError> {
        let memory = &self.bridge.memory;
        let control = &self.bridge.control;
        match cmd {
            Command::RomLoad { address, data } => {
                {
                    let _lease = control.quiesce();
                    memory.rom.load(address as usize, &data)?;
                }
                log::debug!("ROM load of {} bytes at {:04X}", data.len(), address);
                Ok(Reply::new("ROMLW", format!("Wrote {} bytes.", data.len())))
            }
            Command::RomWrite { address, value } => {
                memory.rom.write(address as usize, value)?;
                Ok(Reply::new("ROM", frame.payload.clone()))
            }
            Command::RamClear => {
                {
                    let _lease = control.quiesce();
                    memory.ram.clear();
                }
                Ok(Reply::new(
                    "RAMCLR",
                    format!("Cleared {} bytes.", memory.ram.len()),
                ))
            }
            Command::Awake => Ok(Reply::new("AWAKE", Vec::new())),
            Command::SetSetting { key, value } => {
                self.settings.set(key, &value)?;
                let mut reply = self.setting_reply(key);
                match key {
                    SettingKey::Baud => reply.reopen_baud = Some(self.settings.baud_rate),
                    SettingKey::Tick => {
                        self.bridge
                            .control
                            .set_clock_period(self.settings.clock_period());
                    }
                    SettingKey::Name | SettingKey::Rams => {}
                }
                Ok(reply)
            }
            Command::GetSetting(key) => Ok(self.setting_reply(key)),
            Command::Save => {
                self.store.save(&self.settings)?;
                Ok(self.all_settings("SAVE"))
            }
            Command::Defaults => {
                let previous_baud = self.settings.baud_rate;
                self.settings = self.store.reset_to_defaults()?;
                self.bridge
                    .control
                    .set_clock_period(self.settings.clock_period());
                let mut reply = self.all_settings("DEFAULTS");
                if self.settings.baud_rate != previous_baud {
                    reply.reopen_baud = Some(self.settings.baud_rate);
                }
                Ok(reply)
            }
            Command::ClockPulse => {
                control.arm_single_step();
                Ok(Reply::new("CLOCKPULSE", Vec::new()))
            }
            Command::Clock(on) => {
                control.set_clock(on);
                Ok(Reply::new("CLOCK", if on { "1" } else { "0" }))
            }
            Command::Reset(asserted) => {
                control.set_reset(asserted);
                Ok(Reply::new("RESET", if asserted { "1" } else { "0" }))
            }
            Command::RamRead { address, count } => self.read_back(BankId::Ram, address, count),
            Command::RomRead { address, count } => self.read_back(BankId::Rom, address, count),
            Command::Status => Ok(self.status_frame().into()),
        }
    }

    fn setting_reply(&self, key: SettingKey) -> Reply {
        Reply::new("SETTING", self.settings.entry(key))
    }

    fn all_settings(&self, action: &str) -> Reply {
        let lines: Vec<String> = SettingKey::ALL
            .iter()
            .map(|&key| self.settings.entry(key))
            .collect();
        Reply::new(action, lines.join("\n"))
    }

    fn read_back(&self, bank: BankId, address: u16, count: usize) -> Result<Reply, DispatchError> {
        let action = match bank {
            BankId::Ram => "RAMLR",
            BankId::Rom => "ROMLR",
        };
        let bytes = self
            .bridge
            .memory
            .bank(bank)
            .read_range(address as usize, count)?;
        let mut out = Vec::with_capacity(count * 2);
        for b in bytes {
            hex::push_hex2(&mut out, b);
        }
        Ok(Reply::new(action, out))
    }

    fn status(&self) -> String {
        let control = &self.bridge.control;
        let (address, data, read) = match control.last_sample() {
            Some(s) => (s.address, s.data, s.direction == Direction::Read),
            None => (0, 0, false),
        };
        format!(
            "{},{},{}{}",
            hex::word_to_hex4(address),
            hex::byte_to_hex2(data),
            read as u8,
            !control.reset_asserted() as u8
        )
    }
}
