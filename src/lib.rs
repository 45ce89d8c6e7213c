//! Bus bridge for a real 6502: shadows the CPU's RAM, serves its ROM, and
//! lets a host drive the clock and memory over a framed byte link.

pub mod bridge;
pub mod bus;
pub mod control;
pub mod debug_flags;
pub mod hex;
pub mod link;
pub mod memory;
pub mod settings;
pub mod shutdown;

pub use bridge::Bridge;
pub use bus::{BusEngine, BusPins, BusSample, Direction, EngineTiming};
pub use control::{BusLease, ClockFlags, ControlState};
pub use link::dispatch::{Dispatcher, ErrorCode, Reply};
pub use link::frame::{FrameParser, ResyncPolicy};
pub use link::transport::{LoopbackTransport, TcpTransport, Transport};
pub use link::Link;
pub use memory::{BankId, MemoryBanks, MemoryError, RAM_SIZE, ROM_SIZE};
pub use settings::{FileSettingsStore, MemorySettingsStore, Settings, SettingsStore};
