//! [`RegisterBus`] over I2C
//!
//! The AB8500 I2C bridge addresses a register by sending the bank number
//! followed by the in-bank address. Reads are a write-then-read of those two
//! bytes; writes append the value as a third byte.

use embedded_hal::i2c::ErrorKind;
use embedded_hal_async::i2c::I2c;

use crate::register::{BusError, RegisterBus};

/// Banked register access through an async I2C bus.
pub struct I2cRegisterBus<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> I2cRegisterBus<I> {
    /// Wrap `i2c`, talking to the device at 7-bit `address`.
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Give the underlying bus back.
    pub fn release(self) -> I {
        self.i2c
    }
}

fn map_error<E: embedded_hal::i2c::Error>(err: &E) -> BusError {
    match err.kind() {
        ErrorKind::NoAcknowledge(_) => BusError::Nack,
        _ => BusError::Bus,
    }
}

impl<I: I2c> RegisterBus for I2cRegisterBus<I> {
    type Error = BusError;

    async fn read(&mut self, bank: u8, addr: u8) -> Result<u8, BusError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[bank, addr], &mut buf)
            .await
            .map_err(|e| map_error(&e))?;
        let [value] = buf;
        Ok(value)
    }

    async fn write(&mut self, bank: u8, addr: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[bank, addr, value])
            .await
            .map_err(|e| map_error(&e))
    }
}
