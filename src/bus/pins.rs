use bitflags::bitflags;

bitflags! {
    /// Output control lines of the bridge. `RST` is the level of the
    /// active-low reset line: set means the CPU runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlLines: u8 {
        const CLK = 0b0000_0001;
        const RST = 0b0000_0010;
        const DATA_OE = 0b0000_0100;
        const ADDR_LO_OE = 0b0000_1000;
        const ADDR_HI_OE = 0b0001_0000;
    }
}

impl ControlLines {
    pub const ENABLES: ControlLines = ControlLines::DATA_OE
        .union(ControlLines::ADDR_LO_OE)
        .union(ControlLines::ADDR_HI_OE);

    /// Which of the three buffers currently owns the shared data path.
    pub fn enabled_buffer(self) -> ControlLines {
        self & Self::ENABLES
    }
}

/// One read of the shared data path plus the CPU's R/W line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSample {
    pub data: u8,
    /// Level of the R/W line: high means the CPU is reading.
    pub rw: bool,
}

/// The hardware seam of the bus engine.
///
/// A GPIO implementation maps these onto the microcontroller's pins; the
/// simulated target in [`super::sim`] implements it for tests and the host
/// daemon. Implementations must not block, allocate or lock.
pub trait BusPins {
    /// Drives the control lines to exactly `lines`.
    fn put_control(&mut self, lines: ControlLines);
    /// Turns the local data drivers off (data path becomes an input).
    fn release_data(&mut self);
    /// Switches the data path to output and drives `value`.
    fn drive_data(&mut self, value: u8);
    fn sample(&mut self) -> PinSample;
}

impl<P: BusPins + ?Sized> BusPins for &mut P {
    fn put_control(&mut self, lines: ControlLines) {
        (**self).put_control(lines)
    }

    fn release_data(&mut self) {
        (**self).release_data()
    }

    fn drive_data(&mut self, value: u8) {
        (**self).drive_data(value)
    }

    fn sample(&mut self) -> PinSample {
        (**self).sample()
    }
}
