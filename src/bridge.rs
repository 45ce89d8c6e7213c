use std::sync::Arc;

use crate::control::ControlState;
use crate::memory::MemoryBanks;

/// Everything the bus engine thread and the link thread share.
pub struct Bridge {
    pub control: ControlState,
    pub memory: MemoryBanks,
}

impl Bridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Bridge {
            control: ControlState::new(),
            memory: MemoryBanks::new(),
        })
    }
}
