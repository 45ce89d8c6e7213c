use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::RAM_SIZE;

/// Longest device name kept, in characters.
pub const NAME_CAPACITY: usize = 120;

/// Slowest clock accepted: one second with CLK held high.
pub const MAX_TICK_US: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("settings file version {found} is newer than {supported}")]
    Version { found: u32, supported: u32 },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Baud,
    Tick,
    Name,
    Rams,
}

impl SettingKey {
    pub const ALL: [SettingKey; 4] = [
        SettingKey::Baud,
        SettingKey::Tick,
        SettingKey::Name,
        SettingKey::Rams,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BAUD" => Some(SettingKey::Baud),
            "TICK" => Some(SettingKey::Tick),
            "NAME" => Some(SettingKey::Name),
            "RAMS" => Some(SettingKey::Rams),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::Baud => "BAUD",
            SettingKey::Tick => "TICK",
            SettingKey::Name => "NAME",
            SettingKey::Rams => "RAMS",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub baud_rate: u32,
    /// Clock-high hold per bus cycle, in microseconds.
    pub tick_delay_us: u64,
    pub name: String,
    pub ram_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            baud_rate: 115_200,
            tick_delay_us: 0,
            name: String::from("Bridge 6502 v0.01"),
            ram_size: RAM_SIZE as u32,
        }
    }
}

impl Settings {
    pub fn clock_period(&self) -> Duration {
        // Files written by older builds may hold anything.
        Duration::from_micros(self.tick_delay_us.min(MAX_TICK_US))
    }

    pub fn get(&self, key: SettingKey) -> String {
        match key {
            SettingKey::Baud => self.baud_rate.to_string(),
            SettingKey::Tick => self.tick_delay_us.to_string(),
            SettingKey::Name => self.name.trim().to_string(),
            SettingKey::Rams => self.ram_size.to_string(),
        }
    }

    /// `KEY,value` as it appears on the wire.
    pub fn entry(&self, key: SettingKey) -> String {
        format!("{},{}", key.name(), self.get(key))
    }

    /// Updates one value. `RAMS` is fixed by the shadow size and silently
    /// keeps its value.
    pub fn set(&mut self, key: SettingKey, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.name(),
            value: value.to_string(),
        };
        match key {
            SettingKey::Baud => {
                let baud = value.trim().parse::<u32>().map_err(|_| invalid())?;
                if baud == 0 {
                    return Err(invalid());
                }
                self.baud_rate = baud;
            }
            SettingKey::Tick => {
                let tick = value.trim().parse::<u64>().map_err(|_| invalid())?;
                if tick > MAX_TICK_US {
                    return Err(invalid());
                }
                self.tick_delay_us = tick;
            }
            SettingKey::Name => {
                self.name = value.trim().chars().take(NAME_CAPACITY).collect();
            }
            SettingKey::Rams => {}
        }
        Ok(())
    }
}

/// The persistence collaborator. Nothing is durable until `save` returns.
pub trait SettingsStore {
    fn load(&mut self) -> Result<Settings, SettingsError>;
    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError>;
    fn reset_to_defaults(&mut self) -> Result<Settings, SettingsError>;
}

impl<S: SettingsStore + ?Sized> SettingsStore for Box<S> {
    fn load(&mut self) -> Result<Settings, SettingsError> {
        (**self).load()
    }

    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError> {
        (**self).save(settings)
    }

    fn reset_to_defaults(&mut self) -> Result<Settings, SettingsError> {
        (**self).reset_to_defaults()
    }
}

#[derive(Serialize, Deserialize)]
struct SettingsFile {
    version: u32,
    settings: Settings,
}

impl SettingsFile {
    const CURRENT_VERSION: u32 = 1;
}

/// Settings kept in a small bincode file next to the daemon.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileSettingsStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&mut self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            log::info!(
                "no settings at {}, initialising defaults",
                self.path.display()
            );
            let defaults = Settings::default();
            self.save(&defaults)?;
            return Ok(defaults);
        }

        let mut file = File::open(&self.path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let stored: SettingsFile = bincode::deserialize(&data)?;
        if stored.version > SettingsFile::CURRENT_VERSION {
            return Err(SettingsError::Version {
                found: stored.version,
                supported: SettingsFile::CURRENT_VERSION,
            });
        }
        log::debug!("loaded settings from {}", self.path.display());
        Ok(stored.settings)
    }

    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let data = bincode::serialize(&SettingsFile {
            version: SettingsFile::CURRENT_VERSION,
            settings: settings.clone(),
        })?;
        let mut file = File::create(&self.path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        log::info!("saved settings to {}", self.path.display());
        Ok(())
    }

    fn reset_to_defaults(&mut self) -> Result<Settings, SettingsError> {
        let defaults = Settings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }
}

/// Volatile store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemorySettingsStore {
    saved: Option<Settings>,
    commits: usize,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: Settings) -> Self {
        MemorySettingsStore {
            saved: Some(settings),
            commits: 0,
        }
    }

    pub fn saved(&self) -> Option<&Settings> {
        self.saved.as_ref()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&mut self) -> Result<Settings, SettingsError> {
        Ok(self.saved.clone().unwrap_or_default())
    }

    fn save(&mut self, settings: &Settings) -> Result<(), SettingsError> {
        self.saved = Some(settings.clone());
        self.commits += 1;
        Ok(())
    }

    fn reset_to_defaults(&mut self) -> Result<Settings, SettingsError> {
        let defaults = Settings::default();
        self.save(&defaults)?;
        Ok(defaults)
    }
}
