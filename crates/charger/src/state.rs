//! Charger state and event model
//!
//! Everything here is plain data. The driver keeps [`ChargerState`] behind a
//! blocking mutex and [`UsbLinkState`] behind a second one, so interrupt
//! handlers and the USB notifier can update them without awaiting.

use embassy_time::Instant;

use crate::vbus_drop::VbusDropState;

/// The two power supplies the driver exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SupplyKind {
    /// Mains: the main charger, or a dedicated USB charger.
    Ac,
    /// A USB host port.
    Usb,
}

impl SupplyKind {
    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ac => "ac",
            Self::Usb => "usb",
        }
    }
}

/// Lifecycle of one charger instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerPhase {
    /// No source attached.
    #[default]
    Disconnected,
    /// A source appeared and is being identified.
    Detecting,
    /// The source is identified and may be enabled.
    Classified,
    /// Enable in progress: currents are being stepped.
    Stepping,
    /// Charging at the requested setpoints.
    Steady,
    /// Charging switched off while the source stays attached.
    Disabled,
}

impl ChargerPhase {
    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Detecting => "detecting",
            Self::Classified => "classified",
            Self::Stepping => "stepping",
            Self::Steady => "steady",
            Self::Disabled => "disabled",
        }
    }
}

/// Per-source charger status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargerInstance {
    /// A source is attached and usable.
    pub connected: bool,
    /// Charging is enabled.
    pub online: bool,
    /// Last measured source voltage, in mV.
    pub voltage_mv: i32,
    /// Last sampled constant-voltage indicator.
    pub in_cv_mode: bool,
    /// The charger watchdog expired while this instance was online. The
    /// consumer must re-enable.
    pub watchdog_expired: bool,
    /// Lifecycle phase.
    pub phase: ChargerPhase,
}

/// Latched hardware conditions.
///
/// Interrupt handlers set these; the matching recheck clears them once the
/// status bit deasserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    /// Main charger reports "external charger not ok".
    pub main_ext_not_ok: bool,
    /// Main charger thermal protection active.
    pub main_thermal_prot: bool,
    /// USB charger thermal protection active.
    pub usb_thermal_prot: bool,
    /// VBUS over-voltage.
    pub vbus_overvoltage: bool,
    /// USB charger "not ok".
    pub usb_charger_not_ok: bool,
    /// The charger watchdog expired on some online instance.
    pub watchdog_expired: bool,
    /// VBUS collapsed under load and did not recover.
    pub vbus_collapsed: bool,
    /// Automatic input limiting ended; a retry is scheduled.
    pub vbus_drop_ended: bool,
    /// A USB source is attached but must not be charged from.
    pub report_no_charge: bool,
}

/// Bus state reported by the USB stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbState {
    /// High-speed bus reset.
    #[default]
    ResetHs,
    /// Full/low-speed bus reset.
    ResetFs,
    /// Enumerated and configured.
    Configured,
    /// Bus suspended.
    Suspend,
    /// Bus resumed from suspend.
    Resume,
    /// Unknown.
    Max,
}

impl UsbState {
    /// Map a USB power budget notification to a bus state.
    ///
    /// `previous_ma` is the budget currently in effect: going from the 2 mA
    /// suspend budget to anything larger is a resume.
    pub const fn from_budget(previous_ma: i32, ma: i32) -> Self {
        if previous_ma == 2 && ma > 2 {
            Self::Resume
        } else if ma == 0 {
            Self::ResetHs
        } else if ma == 2 {
            Self::Suspend
        } else if ma >= 8 {
            Self::Configured
        } else {
            Self::ResetFs
        }
    }

    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ResetHs => "reset-hs",
            Self::ResetFs => "reset-fs",
            Self::Configured => "configured",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Max => "max",
        }
    }
}

/// Double-buffered USB bus state.
///
/// The notifier only [`stage`](Self::stage)s; the deferred handler
/// [`commit`](Self::commit)s and then acts on the active fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbLinkState {
    /// Budget in effect, in mA. `-1` until the USB stack has spoken.
    pub current_ma: i32,
    /// Budget staged by the notifier.
    pub current_ma_pending: i32,
    /// Bus state in effect.
    pub link_state: UsbState,
    /// Bus state staged by the notifier.
    pub link_state_pending: UsbState,
}

impl Default for UsbLinkState {
    fn default() -> Self {
        Self {
            current_ma: -1,
            current_ma_pending: -1,
            link_state: UsbState::ResetHs,
            link_state_pending: UsbState::ResetHs,
        }
    }
}

impl UsbLinkState {
    /// Record a notification without touching the active fields.
    pub fn stage(&mut self, state: UsbState, current_ma: i32) {
        self.link_state_pending = state;
        self.current_ma_pending = current_ma;
    }

    /// Copy pending into active and return the new active pair.
    pub fn commit(&mut self) -> (UsbState, i32) {
        self.link_state = self.link_state_pending;
        self.current_ma = self.current_ma_pending;
        (self.link_state, self.current_ma)
    }
}

/// Power-supply health, in reporting priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Health {
    /// A source is attached but charging from it is not allowed.
    Unknown,
    /// The charger reports "not ok".
    UnspecFailure,
    /// The watchdog expired; charging stopped until re-enabled.
    Dead,
    /// Thermal protection is active.
    Overheat,
    /// VBUS is over-voltage.
    Overvoltage,
    /// Nothing wrong.
    Good,
}

impl Health {
    /// Derive health from the latched flags and both instances.
    pub fn derive(flags: &EventFlags, ac: &ChargerInstance, usb: &ChargerInstance) -> Self {
        if flags.report_no_charge {
            Self::Unknown
        } else if flags.usb_charger_not_ok || flags.main_ext_not_ok {
            Self::UnspecFailure
        } else if ac.watchdog_expired || usb.watchdog_expired {
            Self::Dead
        } else if flags.usb_thermal_prot || flags.main_thermal_prot {
            Self::Overheat
        } else if flags.vbus_overvoltage {
            Self::Overvoltage
        } else {
            Self::Good
        }
    }

    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UnspecFailure => "unspecified-failure",
            Self::Dead => "dead",
            Self::Overheat => "overheat",
            Self::Overvoltage => "overvoltage",
            Self::Good => "good",
        }
    }
}

/// ACA (accessory charger adapter) enumeration wait, once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcaRid {
    /// No accessory seen.
    #[default]
    None,
    /// Accessory classified; the attach step has not waited yet.
    Detected,
    /// The enumeration wait has been spent.
    Waited,
}

/// Progress of the forced start for chargers the PHY flags as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidChargerState {
    /// Nothing forced.
    #[default]
    Idle,
    /// Charger and detection forced on; waiting for the next link event.
    ForceStarted,
    /// Detection switched back off; the charger keeps running.
    DetectionOff,
}

/// Aggregate charger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerState {
    /// Main (AC) charger.
    pub ac: ChargerInstance,
    /// USB charger.
    pub usb: ChargerInstance,
    /// Latched conditions.
    pub flags: EventFlags,
    /// VBUS currently detected.
    pub vbus_detected: bool,
    /// VBUS was present at start-up, so no link interrupt will arrive.
    pub vbus_detected_start: bool,
    /// AC has been connected at least once.
    pub ac_conn: bool,
    /// Input ceiling from classification or the USB budget, in mA.
    pub max_usb_in_curr_ma: i32,
    /// The last classified link is a USB host port.
    pub is_usb_host: bool,
    /// ACA enumeration wait.
    pub aca_rid: AcaRid,
    /// Forced start for invalid chargers.
    pub invalid_charger: InvalidChargerState,
    /// Battery voltage reported by the consumer, in mV.
    pub vbat_mv: i32,
    /// Battery voltage at the previous check, in mV.
    pub old_vbat_mv: i32,
    /// SW power-on fallback currently enabled.
    pub autopower_active: bool,
    /// VBUS drop retry bookkeeping.
    pub drop: VbusDropState,
    /// Deadline of the drop-end retry parked by a suspend.
    pub drop_retry_deadline: Option<Instant>,
}

impl Default for ChargerState {
    fn default() -> Self {
        Self {
            ac: ChargerInstance::default(),
            usb: ChargerInstance::default(),
            flags: EventFlags::default(),
            vbus_detected: false,
            vbus_detected_start: false,
            ac_conn: false,
            max_usb_in_curr_ma: 0,
            is_usb_host: false,
            aca_rid: AcaRid::None,
            invalid_charger: InvalidChargerState::Idle,
            vbat_mv: 0,
            old_vbat_mv: 0,
            autopower_active: false,
            drop: VbusDropState::default(),
            drop_retry_deadline: None,
        }
    }
}

impl ChargerState {
    /// Instance for `kind`.
    pub fn instance(&self, kind: SupplyKind) -> &ChargerInstance {
        match kind {
            SupplyKind::Ac => &self.ac,
            SupplyKind::Usb => &self.usb,
        }
    }

    /// Mutable instance for `kind`.
    pub fn instance_mut(&mut self, kind: SupplyKind) -> &mut ChargerInstance {
        match kind {
            SupplyKind::Ac => &mut self.ac,
            SupplyKind::Usb => &mut self.usb,
        }
    }

    /// Update the USB connected flag. Returns `true` if it changed.
    ///
    /// Disconnecting clears everything learned about the source: drop
    /// retry state, host/accessory classification and the no-charge report.
    pub fn set_usb_connected(&mut self, connected: bool) -> bool {
        if self.usb.connected == connected {
            return false;
        }
        self.usb.connected = connected;
        if connected {
            if self.usb.phase == ChargerPhase::Disconnected
                || self.usb.phase == ChargerPhase::Detecting
            {
                self.usb.phase = ChargerPhase::Classified;
            }
        } else {
            self.drop = VbusDropState::default();
            self.flags.vbus_drop_ended = false;
            self.is_usb_host = false;
            self.aca_rid = AcaRid::None;
            self.flags.report_no_charge = false;
            self.usb.phase = ChargerPhase::Disconnected;
        }
        true
    }

    /// Which supply a generic "something changed" concerns: dedicated
    /// chargers are reported as mains.
    pub fn changed_supply(&self) -> SupplyKind {
        if self.is_usb_host {
            SupplyKind::Usb
        } else {
            SupplyKind::Ac
        }
    }

    /// `true` if the main charger, rather than VBUS, backs the AC supply.
    pub fn main_backs_ac(&self) -> bool {
        self.ac.connected || self.ac.online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── health ──────────────────────────────────────────────────────────────

    #[test]
    fn watchdog_outranks_thermal() {
        let flags = EventFlags {
            usb_thermal_prot: true,
            ..EventFlags::default()
        };
        let usb = ChargerInstance {
            watchdog_expired: true,
            ..ChargerInstance::default()
        };
        let h = Health::derive(&flags, &ChargerInstance::default(), &usb);
        assert_eq!(h, Health::Dead);
    }

    #[test]
    fn no_charge_report_outranks_everything() {
        let flags = EventFlags {
            report_no_charge: true,
            usb_charger_not_ok: true,
            vbus_overvoltage: true,
            ..EventFlags::default()
        };
        let h = Health::derive(&flags, &ChargerInstance::default(), &ChargerInstance::default());
        assert_eq!(h, Health::Unknown);
    }

    #[test]
    fn overvoltage_is_last_before_good() {
        let mut flags = EventFlags {
            vbus_overvoltage: true,
            ..EventFlags::default()
        };
        let idle = ChargerInstance::default();
        assert_eq!(Health::derive(&flags, &idle, &idle), Health::Overvoltage);
        flags.vbus_overvoltage = false;
        assert_eq!(Health::derive(&flags, &idle, &idle), Health::Good);
    }

    // ── USB budget mapping ──────────────────────────────────────────────────

    #[test]
    fn budget_mapping() {
        assert_eq!(UsbState::from_budget(-1, 0), UsbState::ResetHs);
        assert_eq!(UsbState::from_budget(500, 2), UsbState::Suspend);
        assert_eq!(UsbState::from_budget(2, 500), UsbState::Resume);
        assert_eq!(UsbState::from_budget(-1, 100), UsbState::Configured);
        assert_eq!(UsbState::from_budget(-1, 8), UsbState::Configured);
        assert_eq!(UsbState::from_budget(-1, 5), UsbState::ResetFs);
    }

    #[test]
    fn staging_leaves_active_fields_alone() {
        let mut link = UsbLinkState::default();
        link.stage(UsbState::Configured, 500);
        assert_eq!(link.current_ma, -1);
        assert_eq!(link.link_state, UsbState::ResetHs);

        assert_eq!(link.commit(), (UsbState::Configured, 500));
        assert_eq!(link.current_ma, 500);
    }

    // ── connection bookkeeping ──────────────────────────────────────────────

    #[test]
    fn disconnect_resets_source_knowledge() {
        let mut state = ChargerState::default();
        assert!(state.set_usb_connected(true));
        state.is_usb_host = true;
        state.aca_rid = AcaRid::Waited;
        state.flags.report_no_charge = true;
        state.flags.vbus_drop_ended = true;
        state.drop.on_drop_end(500);

        assert!(state.set_usb_connected(false));

        assert!(!state.is_usb_host);
        assert_eq!(state.aca_rid, AcaRid::None);
        assert!(!state.flags.report_no_charge);
        assert!(!state.flags.vbus_drop_ended);
        assert_eq!(state.drop, VbusDropState::default());
        assert_eq!(state.usb.phase, ChargerPhase::Disconnected);
    }

    #[test]
    fn repeated_connect_is_not_a_change() {
        let mut state = ChargerState::default();
        assert!(state.set_usb_connected(true));
        assert!(!state.set_usb_connected(true));
    }
}
