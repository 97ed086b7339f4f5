//! Burst register access over the SPI bus.

use crate::registers::Register;
use embedded_hal::spi::{Operation, SpiDevice};

/// Register burst access as the driver consumes it.
///
/// Blanket-implemented for every [`SpiDevice`], whose transaction keeps the
/// chip-select line asserted across the address byte and all data bytes, so
/// the chip sees each burst as one continuous access.
pub trait ReadWrite {
    type Error;

    /// Writes `values` starting at `register` in a single bus transaction.
    fn write_many(&mut self, register: Register, values: &[u8]) -> Result<(), Self::Error>;

    /// Reads `buffer.len()` bytes starting at `register` in a single bus
    /// transaction. The buffer contents are exchanged in place; callers
    /// pass zeroed buffers so the chip is clocked with dummy bytes.
    fn read_many(&mut self, register: Register, buffer: &mut [u8]) -> Result<(), Self::Error>;
}

impl<SPI> ReadWrite for SPI
where
    SPI: SpiDevice<u8>,
{
    type Error = SPI::Error;

    fn write_many(&mut self, register: Register, values: &[u8]) -> Result<(), Self::Error> {
        self.transaction(&mut [
            Operation::Write(&[register.write()]),
            Operation::Write(values),
        ])
    }

    fn read_many(&mut self, register: Register, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.transaction(&mut [
            Operation::Write(&[register.read()]),
            Operation::TransferInPlace(buffer),
        ])
    }
}
