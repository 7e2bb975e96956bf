//! VBUS drop / retry controller
//!
//! When the source cannot deliver the commanded input current, VBUS sags and
//! the PMIC limits the input current on its own. Once that ends, the driver
//! samples the limit it settled on and later probes the full ceiling again,
//! backing off exponentially while the source keeps settling at the same
//! value. After the backoff passes its cap the ceiling is frozen at the
//! sampled value until the source is unplugged.

use embassy_time::Duration;

use crate::driver::Charger;
use crate::error::Result;
use crate::regs::{self, bits};
use crate::tables::VBUS_INPUT_CURRENT;
use platform::{Gpadc, RegisterBus};

/// Backoff after a new ceiling is observed, in retry units.
pub const RETRY_SEED: u32 = 30;
/// Largest backoff before the ceiling freezes, in retry units.
pub const RETRY_MAX: u32 = 3840;

/// Ceiling bookkeeping for one USB connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbusDropState {
    /// `[raw ceiling, last sampled ceiling]` in mA. The raw ceiling caps the
    /// input limit when non-zero.
    pub observed_max_input_ma: [i32; 2],
    /// Delay before the next probe, in retry units.
    pub retry_backoff: u32,
    /// The raw ceiling has been lowered for the rest of the connection.
    pub frozen: bool,
}

impl Default for VbusDropState {
    fn default() -> Self {
        Self {
            observed_max_input_ma: [0, 0],
            retry_backoff: RETRY_SEED,
            frozen: false,
        }
    }
}

/// What a drop-end observation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropOutcome {
    /// The source settled somewhere new; backoff restarts from the seed.
    NewCeiling {
        /// Sampled ceiling, in mA.
        ceiling_ma: i32,
    },
    /// Same ceiling as last time; backoff doubled.
    StillLimited {
        /// Sampled ceiling, in mA.
        ceiling_ma: i32,
        /// New backoff, in retry units.
        backoff: u32,
    },
    /// Backoff exhausted; the raw ceiling is now the sampled one.
    Frozen {
        /// Frozen ceiling, in mA.
        ceiling_ma: i32,
    },
}

impl VbusDropState {
    /// Ceiling that caps the input limit, or `0` for none.
    pub fn raw_ceiling(&self) -> i32 {
        self.observed_max_input_ma[0]
    }

    /// Last sampled ceiling.
    pub fn sampled_ceiling(&self) -> i32 {
        self.observed_max_input_ma[1]
    }

    /// Record the ceiling from classification or the USB budget. A frozen
    /// ceiling can only go down.
    pub fn set_raw_ceiling(&mut self, ceiling_ma: i32) {
        self.observed_max_input_ma[0] = if self.frozen {
            self.observed_max_input_ma[0].min(ceiling_ma)
        } else {
            ceiling_ma
        };
    }

    /// Feed one drop-end sample of the automatic input limit.
    ///
    /// Once frozen, no more retries are scheduled for the connection; a
    /// lower sample can still pull the ceiling down.
    pub fn on_drop_end(&mut self, sampled_ma: i32) -> DropOutcome {
        if self.frozen {
            self.observed_max_input_ma[1] = sampled_ma;
            let ceiling_ma = self.observed_max_input_ma[0].min(sampled_ma);
            self.observed_max_input_ma[0] = ceiling_ma;
            return DropOutcome::Frozen { ceiling_ma };
        }
        if self.observed_max_input_ma[1] != sampled_ma {
            self.observed_max_input_ma[1] = sampled_ma;
            self.retry_backoff = RETRY_SEED;
            return DropOutcome::NewCeiling {
                ceiling_ma: sampled_ma,
            };
        }
        let next = self.retry_backoff.saturating_mul(2);
        if next > RETRY_MAX {
            self.observed_max_input_ma[0] = self.observed_max_input_ma[1];
            self.frozen = true;
            DropOutcome::Frozen {
                ceiling_ma: sampled_ma,
            }
        } else {
            self.retry_backoff = next;
            DropOutcome::StillLimited {
                ceiling_ma: sampled_ma,
                backoff: next,
            }
        }
    }

    /// Delay before the next probe.
    pub fn retry_delay(&self, unit: Duration) -> Duration {
        Duration::from_ticks(unit.as_ticks().saturating_mul(u64::from(self.retry_backoff)))
    }
}

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Drop-end work: sample the automatic limit, update the backoff and,
    /// unless the ceiling just froze, probe the full input limit again.
    pub(crate) async fn vbus_drop_end_work(&self) -> Result<()> {
        self.with_state(|s| s.flags.vbus_drop_ended = false);

        // The sample below still decides.
        if let Err(e) = self
            .regs
            .write(regs::CHARGER_CTRL, bits::DROP_COUNTER_RESET)
            .await
        {
            warn!("drop counter not reset: {}", e.name());
        }

        if let Ok(raw) = self.regs.read(regs::USBCH_STAT2).await {
            let code = raw.wrapping_shr(u32::from(bits::AUTO_VBUS_IN_CURR_LIM_SHIFT));
            let sampled = VBUS_INPUT_CURRENT.decode(code).unwrap_or(0);
            let (outcome, max) = self.with_state(|s| (s.drop.on_drop_end(sampled), s.max_usb_in_curr_ma));
            match outcome {
                DropOutcome::NewCeiling { ceiling_ma } => {
                    info!("VBUS input limited to {} mA, retrying {} mA", ceiling_ma, max);
                }
                DropOutcome::StillLimited { ceiling_ma, backoff } => {
                    info!(
                        "VBUS input still limited to {} mA, retrying {} mA in {} units",
                        ceiling_ma,
                        max,
                        backoff
                    );
                }
                DropOutcome::Frozen { ceiling_ma } => {
                    info!("VBUS input capped at {} mA, no more retries", ceiling_ma);
                    return Ok(());
                }
            }
        }

        let (connected, max) = self.with_state(|s| (s.usb.connected, s.max_usb_in_curr_ma));
        if connected {
            self.set_vbus_input_current(max).await?;
        }
        Ok(())
    }
}
