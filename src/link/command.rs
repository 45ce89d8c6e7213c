use thiserror::Error;

use super::frame::{Frame, FrameKind};
use crate::hex::{self, HexError};
use crate::settings::SettingKey;

/// A decoded host frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!{ROMLW}addr,hexpairs`
    RomLoad { address: u16, data: Vec<u8> },
    /// `ROM addr,hex2` (accepted as message or request)
    RomWrite { address: u16, value: u8 },
    /// `!{RAMCLR}`
    RamClear,
    Awake,
    SetSetting { key: SettingKey, value: String },
    GetSetting(SettingKey),
    Save,
    Defaults,
    ClockPulse,
    Clock(bool),
    Reset(bool),
    RamRead { address: u16, count: usize },
    RomRead { address: u16, count: usize },
    /// `?{6502}`, also accepted as `?{STATUS}`
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown {kind:?} action {action:?}")]
    UnknownAction { kind: FrameKind, action: String },
    #[error("bad argument for {action}: {reason}")]
    BadArgument {
        action: &'static str,
        reason: String,
    },
}

impl CommandError {
    fn bad(action: &'static str, reason: impl Into<String>) -> Self {
        CommandError::BadArgument {
            action,
            reason: reason.into(),
        }
    }

    fn hex(action: &'static str, e: HexError) -> Self {
        Self::bad(action, e.to_string())
    }
}

impl Command {
    pub fn parse(frame: &Frame) -> Result<Command, CommandError> {
        let payload = frame.payload.as_slice();
        match (frame.kind, frame.action.as_str()) {
            (FrameKind::Message, "ROMLW") => {
                let (addr, data) = split_pair(payload, "ROMLW")?;
                Ok(Command::RomLoad {
                    address: parse_address("ROMLW", addr)?,
                    data: hex::decode_pairs(data).map_err(|e| CommandError::hex("ROMLW", e))?,
                })
            }
            (FrameKind::Message, "RAMCLR") => Ok(Command::RamClear),
            (_, "ROM") => {
                let (addr, value) = split_pair(payload, "ROM")?;
                Ok(Command::RomWrite {
                    address: parse_address("ROM", addr)?,
                    value: hex::hex2_to_byte(text("ROM", value)?)
                        .map_err(|e| CommandError::hex("ROM", e))?,
                })
            }
            (FrameKind::Request, "AWAKE") => Ok(Command::Awake),
            (FrameKind::Request, "SETT") => {
                let (key, value) = split_pair(payload, "SETT")?;
                Ok(Command::SetSetting {
                    key: parse_key("SETT", key)?,
                    value: text("SETT", value)?.to_string(),
                })
            }
            (FrameKind::Request, "SETTING") => Ok(Command::GetSetting(parse_key("SETTING", payload)?)),
            (FrameKind::Request, "SAVE") => Ok(Command::Save),
            (FrameKind::Request, "DEFAULTS") => Ok(Command::Defaults),
            (FrameKind::Request, "CLOCKPULSE") => Ok(Command::ClockPulse),
            (FrameKind::Request, "CLOCK") => match payload.first() {
                Some(b'0') => Ok(Command::Clock(false)),
                Some(b'1') => Ok(Command::Clock(true)),
                _ => Err(CommandError::bad("CLOCK", "expected 0 or 1")),
            },
            (FrameKind::Request, "RESET") => match payload.first() {
                None | Some(b'1') => Ok(Command::Reset(true)),
                Some(b'0') => Ok(Command::Reset(false)),
                _ => Err(CommandError::bad("RESET", "expected 0 or 1")),
            },
            (FrameKind::Request, "RAMLR") => {
                let (address, count) = parse_range("RAMLR", payload)?;
                Ok(Command::RamRead { address, count })
            }
            (FrameKind::Request, "ROMLR") => {
                let (address, count) = parse_range("ROMLR", payload)?;
                Ok(Command::RomRead { address, count })
            }
            (FrameKind::Request, "6502" | "STATUS") => Ok(Command::Status),
            (kind, action) => Err(CommandError::UnknownAction {
                kind,
                action: action.to_string(),
            }),
        }
    }
}

fn text<'a>(action: &'static str, bytes: &'a [u8]) -> Result<&'a str, CommandError> {
    std::str::from_utf8(bytes).map_err(|_| CommandError::bad(action, "payload is not text"))
}

fn split_pair<'a>(
    payload: &'a [u8],
    action: &'static str,
) -> Result<(&'a [u8], &'a [u8]), CommandError> {
    let comma = payload
        .iter()
        .position(|&b| b == b',')
        .ok_or_else(|| CommandError::bad(action, "missing ','"))?;
    Ok((&payload[..comma], &payload[comma + 1..]))
}

fn parse_address(action: &'static str, bytes: &[u8]) -> Result<u16, CommandError> {
    hex::hex4_to_word(text(action, bytes)?).map_err(|e| CommandError::hex(action, e))
}

fn parse_key(action: &'static str, bytes: &[u8]) -> Result<SettingKey, CommandError> {
    let name = text(action, bytes)?.trim();
    SettingKey::from_name(name)
        .ok_or_else(|| CommandError::bad(action, format!("unknown setting {:?}", name)))
}

fn parse_range(action: &'static str, payload: &[u8]) -> Result<(u16, usize), CommandError> {
    let (addr, count) = split_pair(payload, action)?;
    let address = parse_address(action, addr)?;
    let count = text(action, count)?
        .trim()
        .parse::<usize>()
        .map_err(|_| CommandError::bad(action, "count is not a decimal number"))?;
    Ok((address, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str, payload: &str) -> Frame {
        Frame::new(FrameKind::Request, action, payload.as_bytes().to_vec())
    }

    fn message(action: &str, payload: &str) -> Frame {
        Frame::new(FrameKind::Message, action, payload.as_bytes().to_vec())
    }

    #[test]
    fn test_rom_load() {
        assert_eq!(
            Command::parse(&message("ROMLW", "8000,A9008D")),
            Ok(Command::RomLoad {
                address: 0x8000,
                data: vec![0xA9, 0x00, 0x8D]
            })
        );
        assert!(Command::parse(&message("ROMLW", "8000,A90")).is_err());
        assert!(Command::parse(&message("ROMLW", "80,A9")).is_err());
    }

    #[test]
    fn test_rom_write_either_kind() {
        let expected = Ok(Command::RomWrite {
            address: 0x0010,
            value: 0xFF,
        });
        assert_eq!(Command::parse(&request("ROM", "0010,FF")), expected);
        assert_eq!(Command::parse(&message("ROM", "0010,ff")), expected);
    }

    #[test]
    fn test_settings_commands() {
        assert_eq!(
            Command::parse(&request("SETT", "BAUD,9600")),
            Ok(Command::SetSetting {
                key: SettingKey::Baud,
                value: "9600".into()
            })
        );
        assert_eq!(
            Command::parse(&request("SETT", "NAME,My, bridge")),
            Ok(Command::SetSetting {
                key: SettingKey::Name,
                value: "My, bridge".into()
            })
        );
        assert_eq!(
            Command::parse(&request("SETTING", "TICK")),
            Ok(Command::GetSetting(SettingKey::Tick))
        );
        assert!(matches!(
            Command::parse(&request("SETTING", "COLOR")),
            Err(CommandError::BadArgument { action: "SETTING", .. })
        ));
    }

    #[test]
    fn test_clock_and_reset_arguments() {
        assert_eq!(Command::parse(&request("CLOCK", "1")), Ok(Command::Clock(true)));
        assert_eq!(Command::parse(&request("CLOCK", "0")), Ok(Command::Clock(false)));
        assert!(Command::parse(&request("CLOCK", "")).is_err());
        assert_eq!(Command::parse(&request("RESET", "")), Ok(Command::Reset(true)));
        assert_eq!(Command::parse(&request("RESET", "0")), Ok(Command::Reset(false)));
    }

    #[test]
    fn test_read_ranges() {
        assert_eq!(
            Command::parse(&request("RAMLR", "07F0,16")),
            Ok(Command::RamRead {
                address: 0x07F0,
                count: 16
            })
        );
        assert!(Command::parse(&request("ROMLR", "0000,1F")).is_err());
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(Command::parse(&request("6502", "")), Ok(Command::Status));
        assert_eq!(Command::parse(&request("STATUS", "")), Ok(Command::Status));
        assert!(Command::parse(&message("6502", "")).is_err());
    }

    #[test]
    fn test_kind_matters() {
        assert!(matches!(
            Command::parse(&request("RAMCLR", "")),
            Err(CommandError::UnknownAction {
                kind: FrameKind::Request,
                ..
            })
        ));
        assert!(matches!(
            Command::parse(&message("AWAKE", "")),
            Err(CommandError::UnknownAction {
                kind: FrameKind::Message,
                ..
            })
        ));
    }
}
