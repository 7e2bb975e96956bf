//! General-purpose ADC
//!
//! The charger reads its live voltages and currents from the GPADC. Channel
//! selection and scaling are the implementation's job; results come back in
//! engineering units (mV or mA).

/// Charger-related GPADC input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcChannel {
    /// VBUS voltage in mV.
    VbusVoltage,
    /// USB charger current in mA.
    UsbChargerCurrent,
    /// Main (AC) charger voltage in mV.
    MainChargerVoltage,
    /// Main (AC) charger current in mA.
    MainChargerCurrent,
}

impl AdcChannel {
    /// Every channel, in index order.
    pub const ALL: [Self; 4] = [
        Self::VbusVoltage,
        Self::UsbChargerCurrent,
        Self::MainChargerVoltage,
        Self::MainChargerCurrent,
    ];

    /// Dense index for table-backed implementations.
    pub const fn index(self) -> usize {
        match self {
            Self::VbusVoltage => 0,
            Self::UsbChargerCurrent => 1,
            Self::MainChargerVoltage => 2,
            Self::MainChargerCurrent => 3,
        }
    }
}

/// GPADC conversion service.
pub trait Gpadc {
    /// Error type
    type Error: core::fmt::Debug;

    /// Run one conversion and return the scaled result.
    fn convert(
        &mut self,
        channel: AdcChannel,
    ) -> impl core::future::Future<Output = Result<i32, Self::Error>>;
}

impl<T: Gpadc> Gpadc for &mut T {
    type Error = T::Error;

    fn convert(
        &mut self,
        channel: AdcChannel,
    ) -> impl core::future::Future<Output = Result<i32, Self::Error>> {
        (**self).convert(channel)
    }
}
