//! USB stack power-budget notifications
//!
//! The USB stack reports the negotiated budget from its own context. The
//! notifier only stages the new state in the double buffer; the deferred
//! task commits it after the bus has settled and acts on it.

use embassy_time::Timer;
use platform::{Gpadc, RegisterBus};

use crate::detect::NOT_ALLOWED_CEILING_MA;
use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::{ChargerError, Result};
use crate::state::UsbState;

/// Input ceiling for a negotiated budget, in input-ladder steps.
///
/// Only the standard 100 mA multiples up to 500 mA are accepted.
pub const fn budget_ceiling_ma(budget_ma: i32) -> Option<i32> {
    match budget_ma {
        100 => Some(98),
        200 => Some(193),
        300 => Some(290),
        400 => Some(380),
        500 => Some(500),
        _ => None,
    }
}

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// USB stack notification: the host granted `ma` (0 on bus reset, 2 on
    /// suspend). Never blocks.
    pub fn usb_power_budget(&self, ma: u16) {
        let ma = i32::from(ma);
        let state = self.with_usb_link(|l| {
            let state = UsbState::from_budget(l.current_ma, ma);
            l.stage(state, ma);
            state
        });
        debug!("USB budget {} mA, state {}", ma, state.name());
        self.queue
            .queue_delayed(Work::UsbStateChanged, self.config.timings.usb_state_settle);
    }

    /// Commit the staged budget and follow it.
    pub(crate) async fn usb_state_changed_work(&self) -> Result<()> {
        if !self.with_state(|s| s.vbus_detected) {
            debug!("USB state change without VBUS");
            return Ok(());
        }

        let (state, ma) = self.with_usb_link(|l| l.commit());
        debug!("USB state {} at {} mA", state.name(), ma);

        match state {
            UsbState::ResetHs | UsbState::ResetFs | UsbState::Suspend | UsbState::Max => {
                self.set_usb_connected(false).await?;
                self.notify_changed();
                Ok(())
            }
            UsbState::Resume => {
                Timer::after(self.config.timings.resume_delay).await;
                self.usb_configured(ma).await
            }
            UsbState::Configured => self.usb_configured(ma).await,
        }
    }

    async fn usb_configured(&self, budget_ma: i32) -> Result<()> {
        let Some(ceiling) = budget_ceiling_ma(budget_ma) else {
            warn!("USB budget {} mA not usable", budget_ma);
            self.with_state(|s| {
                s.max_usb_in_curr_ma = NOT_ALLOWED_CEILING_MA;
                s.drop.set_raw_ceiling(NOT_ALLOWED_CEILING_MA);
            });
            return Err(ChargerError::NotAllowed);
        };
        self.with_state(|s| {
            s.max_usb_in_curr_ma = ceiling;
            s.drop.set_raw_ceiling(ceiling);
        });
        self.set_vbus_input_current(ceiling).await?;
        self.set_usb_connected(true).await?;
        self.notify_changed();
        Ok(())
    }
}
