//! Runtime configuration
//!
//! Board-specific behavior is chosen here at startup rather than with Cargo
//! features: LED control, backup battery charging and the autopower fallback
//! are plain flags, and silicon workarounds are resolved once into [`Quirks`].

use embassy_time::Duration;

/// Every delay the charger core waits on.
///
/// Defaults match the hardware; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Extra settle time before sampling VBUS detection, beyond the 100 ms
    /// hardware debounce.
    pub settle: Duration,
    /// Interval between USB link-status samples while enumeration settles.
    pub link_poll_interval: Duration,
    /// Number of link-status samples before giving up.
    pub link_poll_attempts: u8,
    /// Base delay between current steps. The USB input register and large
    /// output jumps use ten times this.
    pub step_delay: Duration,
    /// Delay before attaching an ACA accessory, letting USB enumeration
    /// finish.
    pub aca_enumeration_wait: Duration,
    /// Delay between a USB power-budget notification and acting on it.
    pub usb_state_settle: Duration,
    /// Extra delay before charging again after a USB resume.
    pub resume_delay: Duration,
    /// Period of the over-voltage, not-ok and similar fault rechecks.
    pub fault_recheck: Duration,
    /// Charger watchdog kick period on silicon that needs it.
    pub watchdog_kick: Duration,
    /// Battery-voltage check period close to the input-reduction threshold.
    pub vbat_check_near: Duration,
    /// Battery-voltage check period away from the threshold.
    pub vbat_check_far: Duration,
    /// One unit of VBUS drop retry backoff. The backoff counter is in these
    /// units (seconds on hardware).
    pub drop_retry_unit: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(110),
            link_poll_interval: Duration::from_millis(250),
            link_poll_attempts: 10,
            step_delay: Duration::from_millis(1),
            aca_enumeration_wait: Duration::from_secs(5),
            usb_state_settle: Duration::from_millis(500),
            resume_delay: Duration::from_secs(1),
            fault_recheck: Duration::from_secs(1),
            watchdog_kick: Duration::from_secs(60),
            vbat_check_near: Duration::from_secs(1),
            vbat_check_far: Duration::from_secs(10),
            drop_retry_unit: Duration::from_secs(1),
        }
    }
}

/// Backup (coin cell) battery charging setup, written to the RTC block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BackupCharger {
    /// Pre-shifted voltage field of `RTC_BACKUP_CHG`.
    pub voltage_bits: u8,
    /// Pre-shifted current field of `RTC_BACKUP_CHG`.
    pub current_bits: u8,
}

/// Charger configuration supplied by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerConfig {
    /// Highest USB input current the platform allows, in mA.
    pub usb_curr_max_ma: i32,
    /// Input ceiling for chargers whose D+/D- resistance is out of spec and
    /// that therefore classify as not configured. `None` refuses them.
    pub usb_curr_max_nc_ma: Option<i32>,
    /// Main (AC) charger input current, in mA.
    pub ac_curr_max_ma: i32,
    /// Leave battery overshoot protection enabled while charging.
    pub enable_overshoot: bool,
    /// Drive the charging LED from enable/disable.
    pub led_control: bool,
    /// Charge the backup battery, if fitted.
    pub backup_charger: Option<BackupCharger>,
    /// Toggle the SW power-on fallback as chargers come and go.
    pub autopower: bool,
    /// Delays.
    pub timings: Timings,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            usb_curr_max_ma: 1500,
            usb_curr_max_nc_ma: None,
            ac_curr_max_ma: 1500,
            enable_overshoot: false,
            led_control: false,
            backup_charger: None,
            autopower: false,
            timings: Timings::default(),
        }
    }
}

/// Last silicon revision with the watchdog and missing link-IRQ defects (1.1).
const LAST_EARLY_REVISION: u8 = 0x11;
/// First revision with writable maximum voltage/current registers (2.0).
const FIRST_CUT2_REVISION: u8 = 0x20;

/// Revision-dependent workarounds, resolved once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Quirks {
    /// The charger watchdog must be kicked by this driver while AC charging
    /// is active, independent of the charging algorithm.
    pub watchdog_kick_required: bool,
    /// No link-status interrupt exists; VBUS edges classify the link
    /// directly.
    pub usb_link_irq_missing: bool,
    /// Maximum charge voltage and output current registers exist and must
    /// be programmed at start-up.
    pub max_limits_writable: bool,
}

impl Quirks {
    /// Resolve quirks from the silicon revision byte (`0x10` = 1.0, …).
    pub const fn from_revision(revision: u8) -> Self {
        let early = revision <= LAST_EARLY_REVISION;
        Self {
            watchdog_kick_required: early,
            usb_link_irq_missing: early,
            max_limits_writable: revision >= FIRST_CUT2_REVISION,
        }
    }
}
