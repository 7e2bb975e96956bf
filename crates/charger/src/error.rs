//! Charger error type

use platform::BusError;

/// Everything that can go wrong in the charger core.
///
/// None of these is fatal to the driver: the worst outcome of any failure is
/// "charging disabled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerError {
    /// A register or ADC transaction failed. Logged where it happened and
    /// never retried at that layer.
    Io,
    /// A requested voltage or current has no register code. Nothing was
    /// written.
    Range,
    /// The attached source must not be charged from. The input ceiling has
    /// been floored to the minimum step.
    NotAllowed,
    /// VBUS collapsed repeatedly and the recovery sequence did not bring the
    /// charger back.
    HardwareCollapse,
    /// The USB link type did not settle within the polling budget.
    Timeout,
    /// The requested charger has no source attached.
    NotConnected,
    /// The register id does not name a current-controlled register.
    InvalidRegister,
    /// Hardware is mid-transition; try again later.
    Busy,
}

impl ChargerError {
    /// Short static label for log formats that avoid `Debug`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Range => "range",
            Self::NotAllowed => "not-allowed",
            Self::HardwareCollapse => "hardware-collapse",
            Self::Timeout => "timeout",
            Self::NotConnected => "not-connected",
            Self::InvalidRegister => "invalid-register",
            Self::Busy => "busy",
        }
    }
}

impl core::fmt::Display for ChargerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Io => write!(f, "register or ADC access failed"),
            Self::Range => write!(f, "requested voltage or current out of range"),
            Self::NotAllowed => write!(f, "charging not allowed from this source"),
            Self::HardwareCollapse => write!(f, "VBUS collapsed and did not recover"),
            Self::Timeout => write!(f, "USB link type did not settle"),
            Self::NotConnected => write!(f, "charger not connected"),
            Self::InvalidRegister => write!(f, "not a current-controlled register"),
            Self::Busy => write!(f, "charger busy, retry later"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ChargerError {}

impl From<BusError> for ChargerError {
    fn from(_: BusError) -> Self {
        Self::Io
    }
}

/// Charger result alias.
pub type Result<T> = core::result::Result<T, ChargerError>;
