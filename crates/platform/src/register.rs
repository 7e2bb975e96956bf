//! Banked register access
//!
//! The AB8500 exposes its registers as `(bank, address)` pairs of 8-bit
//! values. Banks group functional blocks (charger, USB, interrupt, RTC, …).

/// Transport-level failure reported by a [`RegisterBus`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The device did not acknowledge the transfer.
    Nack,
    /// Arbitration loss, overrun or another bus-level fault.
    Bus,
    /// The `(bank, address)` pair is not backed by a register.
    Unmapped,
}

impl BusError {
    /// Short static label, usable in log formats that avoid `Debug`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nack => "nack",
            Self::Bus => "bus",
            Self::Unmapped => "unmapped",
        }
    }
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Nack => write!(f, "register access not acknowledged"),
            Self::Bus => write!(f, "register bus fault"),
            Self::Unmapped => write!(f, "register not mapped"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BusError {}

/// Asynchronous access to banked 8-bit PMIC registers.
///
/// Implementations must complete each call as one transaction: a concurrent
/// caller may observe the register before or after a write, never halfway.
pub trait RegisterBus {
    /// Error type
    type Error: core::fmt::Debug;

    /// Read one register.
    fn read(
        &mut self,
        bank: u8,
        addr: u8,
    ) -> impl core::future::Future<Output = Result<u8, Self::Error>>;

    /// Write one register.
    fn write(
        &mut self,
        bank: u8,
        addr: u8,
        value: u8,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>>;

    /// Replace the bits selected by `mask` with the matching bits of `value`.
    ///
    /// The default reads then writes; transports with a native masked write
    /// should override it.
    fn read_modify_write(
        &mut self,
        bank: u8,
        addr: u8,
        mask: u8,
        value: u8,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> {
        async move {
            let current = self.read(bank, addr).await?;
            self.write(bank, addr, (current & !mask) | (value & mask))
                .await
        }
    }
}

impl<T: RegisterBus> RegisterBus for &mut T {
    type Error = T::Error;

    fn read(
        &mut self,
        bank: u8,
        addr: u8,
    ) -> impl core::future::Future<Output = Result<u8, Self::Error>> {
        (**self).read(bank, addr)
    }

    fn write(
        &mut self,
        bank: u8,
        addr: u8,
        value: u8,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> {
        (**self).write(bank, addr, value)
    }

    fn read_modify_write(
        &mut self,
        bank: u8,
        addr: u8,
        mask: u8,
        value: u8,
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> {
        (**self).read_modify_write(bank, addr, mask, value)
    }
}
