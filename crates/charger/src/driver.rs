//! The charger context
//!
//! [`Charger`] owns everything the core needs: the register facade, the ADC,
//! configuration and quirks, the state aggregate, the USB double buffer and
//! the work queue. It is shared by reference between the interrupt glue, the
//! workers of [`Charger::run`] and the consumer.
//!
//! Consumers learn about externally visible changes through
//! [`Charger::wait_change`], the equivalent of a power-supply "changed"
//! notification. Notifications are edge hints, not a log: when the consumer
//! falls behind, surplus notifications are dropped and the current state is
//! read through the property accessors.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use platform::{Gpadc, RegisterBus};

use crate::config::{ChargerConfig, Quirks};
use crate::dispatch::{Work, WorkQueue};
use crate::error::Result;
use crate::regs::Registers;
use crate::state::{ChargerPhase, ChargerState, SupplyKind, UsbLinkState};
use crate::stepping::SteppingSessions;

/// Depth of the change notification channel.
pub const CHANGE_DEPTH: usize = 8;

/// AB8500 charger control core.
pub struct Charger<B, A> {
    pub(crate) regs: Registers<B>,
    pub(crate) adc: Mutex<CriticalSectionRawMutex, A>,
    pub(crate) config: ChargerConfig,
    pub(crate) quirks: Quirks,
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<ChargerState>>,
    usb_link: BlockingMutex<CriticalSectionRawMutex, RefCell<UsbLinkState>>,
    pub(crate) stepping: SteppingSessions,
    /// Serialises every writer of `USBCH_IPT_CRNTLVL`.
    pub(crate) usb_input_lock: Mutex<CriticalSectionRawMutex, ()>,
    pub(crate) queue: WorkQueue,
    changes: Channel<CriticalSectionRawMutex, SupplyKind, CHANGE_DEPTH>,
}

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Build the context. Nothing touches the hardware until
    /// [`Charger::start`].
    pub fn new(bus: B, adc: A, config: ChargerConfig, quirks: Quirks) -> Self {
        Self {
            regs: Registers::new(bus),
            adc: Mutex::new(adc),
            config,
            quirks,
            state: BlockingMutex::new(RefCell::new(ChargerState::default())),
            usb_link: BlockingMutex::new(RefCell::new(UsbLinkState::default())),
            stepping: SteppingSessions::new(),
            usb_input_lock: Mutex::new(()),
            queue: WorkQueue::new(),
            changes: Channel::new(),
        }
    }

    /// Configuration in force.
    pub fn config(&self) -> &ChargerConfig {
        &self.config
    }

    /// Revision workarounds in force.
    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    /// Run `f` on the state aggregate. Never hold it across an await.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ChargerState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    /// Run `f` on the USB double buffer.
    pub(crate) fn with_usb_link<R>(&self, f: impl FnOnce(&mut UsbLinkState) -> R) -> R {
        self.usb_link.lock(|s| f(&mut s.borrow_mut()))
    }

    /// Copy of the whole state aggregate.
    pub fn snapshot(&self) -> ChargerState {
        self.with_state(|s| *s)
    }

    /// Copy of the USB double buffer.
    pub fn usb_link_state(&self) -> UsbLinkState {
        self.with_usb_link(|l| *l)
    }

    /// Lifecycle phase of one charger instance.
    pub fn phase(&self, kind: SupplyKind) -> ChargerPhase {
        self.with_state(|s| s.instance(kind).phase)
    }

    /// Stepping operations currently in flight.
    pub fn stepping_sessions(&self) -> usize {
        self.stepping.active()
    }

    /// `true` while `work` is queued or waiting on its delay.
    pub fn work_pending(&self, work: Work) -> bool {
        self.queue.pending(work)
    }

    // ── notifications ───────────────────────────────────────────────────────

    /// Tell the consumer that `kind` changed.
    pub(crate) fn notify(&self, kind: SupplyKind) {
        if self.changes.try_send(kind).is_err() {
            trace!("change queue full, {} dropped", kind.name());
        }
    }

    /// Notify whichever supply the current USB classification reports as.
    pub(crate) fn notify_changed(&self) {
        let kind = self.with_state(|s| s.changed_supply());
        self.notify(kind);
    }

    /// Wait for the next change notification.
    pub async fn wait_change(&self) -> SupplyKind {
        self.changes.receive().await
    }

    /// Next change notification, if one is waiting.
    pub fn poll_change(&self) -> Option<SupplyKind> {
        self.changes.try_receive().ok()
    }

    // ── shared transitions ──────────────────────────────────────────────────

    /// Latest battery voltage from the fuel gauge.
    pub fn report_battery_voltage(&self, mv: i32) {
        self.with_state(|s| s.vbat_mv = mv);
    }

    /// Update the USB connected flag, following up with the SW fallback
    /// toggle when autopower is enabled.
    pub(crate) async fn set_usb_connected(&self, connected: bool) -> Result<()> {
        if !self.with_state(|s| s.set_usb_connected(connected)) {
            return Ok(());
        }
        debug!("USB connected: {}", connected);
        self.update_sw_fallback().await
    }

    /// VBUS is gone: forget everything learned about the USB source.
    pub(crate) async fn vbus_teardown(&self) -> Result<()> {
        self.with_state(|s| {
            s.vbus_detected = false;
            s.max_usb_in_curr_ma = 0;
            s.drop = Default::default();
        });
        self.with_usb_link(|l| *l = UsbLinkState::default());
        let result = self.set_usb_connected(false).await;
        self.notify_changed();
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::state::UsbState;
    use platform::mocks::{MockGpadc, MockRegisterBus};

    fn charger() -> Charger<MockRegisterBus, MockGpadc> {
        Charger::new(
            MockRegisterBus::new(),
            MockGpadc::new(),
            ChargerConfig::default(),
            Quirks::from_revision(0x20),
        )
    }

    #[test]
    fn notifications_overflow_silently() {
        let c = charger();
        for _ in 0..(CHANGE_DEPTH + 3) {
            c.notify(SupplyKind::Usb);
        }
        let mut seen = 0;
        while c.poll_change().is_some() {
            seen += 1;
        }
        assert_eq!(seen, CHANGE_DEPTH);
    }

    #[test]
    fn dedicated_chargers_notify_as_mains() {
        let c = charger();
        c.notify_changed();
        assert_eq!(c.poll_change(), Some(SupplyKind::Ac));
        c.with_state(|s| s.is_usb_host = true);
        c.notify_changed();
        assert_eq!(c.poll_change(), Some(SupplyKind::Usb));
    }

    #[tokio::test]
    async fn vbus_teardown_resets_usb_session_state() {
        let c = charger();
        c.with_state(|s| {
            s.vbus_detected = true;
            s.set_usb_connected(true);
            s.drop.set_raw_ceiling(450);
            s.drop.on_drop_end(450);
        });
        c.with_usb_link(|l| {
            l.stage(UsbState::Configured, 500);
            l.commit();
        });

        c.vbus_teardown().await.unwrap();

        let s = c.snapshot();
        assert!(!s.vbus_detected);
        assert!(!s.usb.connected);
        assert_eq!(s.drop, Default::default());
        assert_eq!(c.usb_link_state(), UsbLinkState::default());
    }
}
