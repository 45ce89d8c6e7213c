use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

pub const RAM_SIZE: usize = 0x800;
pub const ROM_SIZE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankId {
    Ram,
    Rom,
}

impl BankId {
    pub fn name(self) -> &'static str {
        match self {
            BankId::Ram => "RAM",
            BankId::Rom => "ROM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("{bank} access at 0x{addr:X} (+{count}) outside 0x{len:X} bytes")]
    OutOfRange {
        bank: &'static str,
        addr: usize,
        count: usize,
        len: usize,
    },
}

/// A fixed-size byte array shared between the bus engine and the link.
///
/// Each cell is its own atomic so the two loops never need a lock; ordering
/// between a bulk mutation and the engine comes from the bus lease, so cell
/// accesses themselves are relaxed.
pub struct Bank {
    id: BankId,
    cells: Box<[AtomicU8]>,
}

impl Bank {
    pub fn new(id: BankId, len: usize) -> Self {
        Bank {
            id,
            cells: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn id(&self) -> BankId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr < self.cells.len()
    }

    /// Hot-path read: `None` outside the bank.
    #[inline]
    pub fn get(&self, addr: usize) -> Option<u8> {
        self.cells.get(addr).map(|c| c.load(Ordering::Relaxed))
    }

    /// Hot-path write: returns false (and stores nothing) outside the bank.
    #[inline]
    pub fn set(&self, addr: usize, value: u8) -> bool {
        match self.cells.get(addr) {
            Some(c) => {
                c.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn read(&self, addr: usize) -> Result<u8, MemoryError> {
        self.get(addr).ok_or_else(|| self.out_of_range(addr, 1))
    }

    pub fn write(&self, addr: usize, value: u8) -> Result<(), MemoryError> {
        if self.set(addr, value) {
            Ok(())
        } else {
            Err(self.out_of_range(addr, 1))
        }
    }

    pub fn read_range(&self, addr: usize, count: usize) -> Result<Vec<u8>, MemoryError> {
        self.check_range(addr, count)?;
        Ok(self.cells[addr..addr + count]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect())
    }

    /// Bulk write. The whole range is validated first so a rejected load
    /// leaves the bank untouched.
    pub fn load(&self, addr: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.check_range(addr, data.len())?;
        for (cell, &b) in self.cells[addr..addr + data.len()].iter().zip(data) {
            cell.store(b, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    fn check_range(&self, addr: usize, count: usize) -> Result<(), MemoryError> {
        match addr.checked_add(count) {
            Some(end) if end <= self.cells.len() => Ok(()),
            _ => Err(self.out_of_range(addr, count)),
        }
    }

    fn out_of_range(&self, addr: usize, count: usize) -> MemoryError {
        MemoryError::OutOfRange {
            bank: self.id.name(),
            addr,
            count,
            len: self.cells.len(),
        }
    }
}

/// RAM shadow and ROM image of the target system.
pub struct MemoryBanks {
    pub ram: Bank,
    pub rom: Bank,
}

impl MemoryBanks {
    pub fn new() -> Self {
        MemoryBanks {
            ram: Bank::new(BankId::Ram, RAM_SIZE),
            rom: Bank::new(BankId::Rom, ROM_SIZE),
        }
    }

    pub fn bank(&self, id: BankId) -> &Bank {
        match id {
            BankId::Ram => &self.ram,
            BankId::Rom => &self.rom,
        }
    }

    pub fn read(&self, id: BankId, addr: usize) -> Result<u8, MemoryError> {
        self.bank(id).read(addr)
    }

    pub fn write(&self, id: BankId, addr: usize, value: u8) -> Result<(), MemoryError> {
        self.bank(id).write(addr, value)
    }

    pub fn clear(&self, id: BankId) {
        self.bank(id).clear();
    }

    /// Value served to the CPU on a read cycle: RAM first, then ROM, else 0.
    #[inline]
    pub fn fetch(&self, address: u16) -> u8 {
        let addr = address as usize;
        self.ram
            .get(addr)
            .or_else(|| self.rom.get(addr))
            .unwrap_or(0)
    }
}

impl Default for MemoryBanks {
    fn default() -> Self {
        Self::new()
    }
}
