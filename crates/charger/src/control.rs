//! Charge control: the interface the charging algorithm drives
//!
//! Enable and disable for both chargers, output current updates, the
//! watchdog kick and the input current policy for VBUS.

use embassy_time::Duration;
use platform::{Gpadc, RegisterBus};

use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::{ChargerError, Result};
use crate::regs::{self, bits};
use crate::state::{ChargerPhase, ChargerState, SupplyKind};
use crate::stepping::{step_current, CurrentRegister, StepPolicy};
use crate::tables::{CHARGER_CURRENT, CHARGE_VOLTAGE};

/// Below this battery voltage the VBUS input limit is trimmed to work around
/// an input stage defect, in mV.
pub const VBAT_INPUT_REDUCTION_MV: i32 = 3800;

/// Battery voltage band around the threshold checked at the fast rate.
const VBAT_NEAR_BAND_MV: i32 = 100;

/// Clear the watchdog-expired marker of `kind` and the latched flag once no
/// instance still carries one.
fn clear_watchdog_expired(s: &mut ChargerState, kind: SupplyKind) {
    s.instance_mut(kind).watchdog_expired = false;
    if !s.ac.watchdog_expired && !s.usb.watchdog_expired {
        s.flags.watchdog_expired = false;
    }
}

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Enable or disable charging from `kind`.
    ///
    /// `Ac` drives the main charger while one is attached or online; a
    /// dedicated USB charger reports as `Ac` too and is driven through the
    /// USB path. Voltage and current are checked against the register
    /// tables before anything is written.
    pub async fn enable(
        &self,
        kind: SupplyKind,
        on: bool,
        voltage_mv: i32,
        current_ma: i32,
    ) -> Result<()> {
        let main = kind == SupplyKind::Ac && self.with_state(|s| s.main_backs_ac());
        match (main, on) {
            (true, true) => self.ac_enable(voltage_mv, current_ma).await,
            (true, false) => self.ac_disable().await,
            (false, true) => self.usb_enable(voltage_mv, current_ma).await,
            (false, false) => self.usb_disable().await,
        }
    }

    /// Kick the charger watchdog.
    pub async fn kick_watchdog(&self) -> Result<()> {
        self.regs
            .write(regs::CHARG_WD_CTRL, bits::CHARG_WD_KICK)
            .await
            .map_err(|e| {
                error!("watchdog kick failed");
                e
            })
    }

    /// Step the output current to `current_ma` and restart the input drop
    /// counters.
    pub async fn update_output_current(&self, current_ma: i32) -> Result<()> {
        self.set_current(current_ma, CurrentRegister::Output).await?;
        self.regs
            .write(regs::CHARGER_CTRL, bits::DROP_COUNTER_RESET)
            .await
    }

    /// Step `register` to `target_ma`.
    ///
    /// Raising the USB input limit stops early once a VBUS drop-end event
    /// arrives. Writers of that register are serialised.
    pub async fn set_current(&self, target_ma: i32, register: CurrentRegister) -> Result<()> {
        let _usb_input = if register == CurrentRegister::UsbInput {
            Some(self.usb_input_lock.lock().await)
        } else {
            None
        };
        let stepping_allowed = self.with_state(|s| match register {
            CurrentRegister::MainInput => s.ac.connected,
            CurrentRegister::UsbInput => s.usb.connected,
            CurrentRegister::Output => s.ac.connected || s.usb.connected,
        });
        let policy = StepPolicy {
            step_delay: self.config.timings.step_delay,
            stepping_allowed,
        };
        let keep_raising = || {
            register != CurrentRegister::UsbInput
                || !self.with_state(|s| s.flags.vbus_drop_ended)
        };
        step_current(
            &self.regs,
            &self.stepping,
            register,
            target_ma,
            policy,
            keep_raising,
        )
        .await
    }

    /// Input ceiling the USB policy would apply for a request of `ma`.
    pub fn usb_input_ceiling_ma(&self, ma: i32) -> i32 {
        let budget = self.with_usb_link(|l| l.current_ma);
        self.with_state(|s| {
            let mut limit = self.config.usb_curr_max_ma.min(ma);
            let raw = s.drop.raw_ceiling();
            if raw > 0 {
                limit = limit.min(raw);
            }
            if budget >= 100 {
                limit = limit.min(budget);
            }
            if s.vbat_mv < VBAT_INPUT_REDUCTION_MV {
                limit = match limit {
                    100 => 50,
                    500 => 450,
                    other => other,
                };
            }
            limit
        })
    }

    /// Apply the USB input current policy and step the input limit there.
    pub(crate) async fn set_vbus_input_current(&self, ma: i32) -> Result<()> {
        let limit = self.usb_input_ceiling_ma(ma);
        info!("VBUS input current limit {} mA", limit);
        self.set_current(limit, CurrentRegister::UsbInput).await
    }

    async fn led(&self, on: bool) -> Result<()> {
        if on {
            self.regs
                .write(
                    regs::LED_PWM_CTRL,
                    bits::LED_IND_CUR_5MA | bits::LED_PWM_ENA,
                )
                .await?;
            self.regs
                .write(regs::LED_PWM_DUTY, bits::LED_PWM_DUTY_252_256)
                .await
        } else {
            self.regs.write(regs::LED_PWM_CTRL, bits::LED_PWM_DIS).await
        }
    }

    async fn led_if_controlled(&self, on: bool) {
        if self.config.led_control {
            if let Err(e) = self.led(on).await {
                warn!("charging LED: {}", e.name());
            }
        }
    }

    fn overshoot_bits(&self) -> u8 {
        if self.config.enable_overshoot {
            0
        } else {
            bits::NO_OVERSHOOT_ENA_N
        }
    }

    fn encode_targets(&self, voltage_mv: i32, current_ma: i32) -> Result<u8> {
        let volt = CHARGE_VOLTAGE.encode(voltage_mv);
        let curr = CHARGER_CURRENT.encode(current_ma);
        match (volt, curr) {
            (Ok(volt), Ok(_)) => Ok(volt),
            _ => {
                error!(
                    "{} mV / {} mA out of range, charging not started",
                    voltage_mv,
                    current_ma
                );
                Err(ChargerError::Range)
            }
        }
    }

    // ── USB ─────────────────────────────────────────────────────────────────

    async fn usb_enable(&self, voltage_mv: i32, current_ma: i32) -> Result<()> {
        if !self.with_state(|s| s.usb.connected) {
            error!("USB charger not connected");
            return Err(ChargerError::NotConnected);
        }
        info!("enable USB charging: {} mV {} mA", voltage_mv, current_ma);
        let volt = self.encode_targets(voltage_mv, current_ma)?;

        self.with_state(|s| s.usb.phase = ChargerPhase::Stepping);
        self.regs.write(regs::CH_VOLT_LVL, volt).await?;
        self.regs
            .write(regs::USBCH_CTRL1, bits::CH_ENA | self.overshoot_bits())
            .await?;
        self.led_if_controlled(true).await;

        let max = self.with_state(|s| {
            s.usb.online = true;
            clear_watchdog_expired(s, SupplyKind::Usb);
            s.max_usb_in_curr_ma
        });
        self.set_vbus_input_current(max).await?;
        self.set_current(current_ma, CurrentRegister::Output).await?;

        self.queue
            .queue_delayed(Work::CheckVbat, self.config.timings.vbat_check_near);
        self.with_state(|s| s.usb.phase = ChargerPhase::Steady);
        self.notify_changed();
        Ok(())
    }

    async fn usb_disable(&self) -> Result<()> {
        debug!("disable USB charging");
        self.regs.write(regs::USBCH_CTRL1, 0).await?;
        self.led_if_controlled(false).await;

        self.set_vbus_input_current(0).await?;
        self.set_current(0, CurrentRegister::Output).await?;
        self.with_state(|s| {
            s.usb.online = false;
            clear_watchdog_expired(s, SupplyKind::Usb);
            s.usb.phase = if s.usb.connected {
                ChargerPhase::Disabled
            } else {
                ChargerPhase::Disconnected
            };
        });
        self.queue.cancel(Work::CheckVbat);
        self.notify_changed();
        Ok(())
    }

    // ── main charger ────────────────────────────────────────────────────────

    async fn ac_enable(&self, voltage_mv: i32, current_ma: i32) -> Result<()> {
        if !self.with_state(|s| s.ac.connected) {
            error!("main charger not connected");
            return Err(ChargerError::NotConnected);
        }
        info!("enable main charging: {} mV {} mA", voltage_mv, current_ma);
        let volt = self.encode_targets(voltage_mv, current_ma)?;
        CHARGER_CURRENT.encode(self.config.ac_curr_max_ma)?;

        self.with_state(|s| s.ac.phase = ChargerPhase::Stepping);
        self.regs.write(regs::CH_VOLT_LVL, volt).await?;
        self.set_current(self.config.ac_curr_max_ma, CurrentRegister::MainInput)
            .await?;
        self.set_current(current_ma, CurrentRegister::Output).await?;
        self.regs
            .write(regs::MCH_CTRL1, bits::CH_ENA | self.overshoot_bits())
            .await?;
        self.led_if_controlled(true).await;

        self.with_state(|s| {
            s.ac.online = true;
            clear_watchdog_expired(s, SupplyKind::Ac);
            s.ac.phase = ChargerPhase::Steady;
        });
        if self.quirks.watchdog_kick_required {
            self.queue
                .queue_delayed(Work::KickWatchdog, self.config.timings.watchdog_kick);
        }
        self.notify(SupplyKind::Ac);
        Ok(())
    }

    async fn ac_disable(&self) -> Result<()> {
        debug!("disable main charging");
        self.regs.write(regs::MCH_CTRL1, 0).await?;
        self.queue.cancel(Work::KickWatchdog);
        self.led_if_controlled(false).await;

        self.set_current(0, CurrentRegister::MainInput).await?;
        self.set_current(0, CurrentRegister::Output).await?;
        self.with_state(|s| {
            s.ac.online = false;
            clear_watchdog_expired(s, SupplyKind::Ac);
            s.ac.phase = if s.ac.connected {
                ChargerPhase::Disabled
            } else {
                ChargerPhase::Disconnected
            };
        });
        self.notify(SupplyKind::Ac);
        Ok(())
    }

    // ── deferred work ───────────────────────────────────────────────────────

    /// Watchdog keep-alive for silicon whose watchdog logic needs the driver
    /// to kick it while the main charger is in use.
    pub(crate) async fn kick_watchdog_work(&self) -> Result<()> {
        let result = self.kick_watchdog().await;
        self.queue
            .queue_delayed(Work::KickWatchdog, self.config.timings.watchdog_kick);
        result
    }

    /// Re-apply the input limit whenever the battery voltage crosses the
    /// input reduction threshold.
    pub(crate) async fn check_vbat_work(&self) -> Result<()> {
        let (crossed, vbat, max) = self.with_state(|s| {
            if s.old_vbat_mv == 0 {
                s.old_vbat_mv = s.vbat_mv;
            }
            let below_before = s.old_vbat_mv <= VBAT_INPUT_REDUCTION_MV;
            let below_now = s.vbat_mv <= VBAT_INPUT_REDUCTION_MV;
            let crossed = below_before != below_now;
            s.old_vbat_mv = s.vbat_mv;
            (crossed, s.vbat_mv, s.max_usb_in_curr_ma)
        });

        let result = if crossed {
            debug!("battery crossed {} mV, now {} mV", VBAT_INPUT_REDUCTION_MV, vbat);
            let r = self.set_vbus_input_current(max).await;
            self.notify(SupplyKind::Usb);
            r
        } else {
            Ok(())
        };

        let near = vbat > VBAT_INPUT_REDUCTION_MV.saturating_sub(VBAT_NEAR_BAND_MV)
            && vbat < VBAT_INPUT_REDUCTION_MV.saturating_add(VBAT_NEAR_BAND_MV);
        let period: Duration = if near {
            self.config.timings.vbat_check_near
        } else {
            self.config.timings.vbat_check_far
        };
        self.queue.queue_delayed(Work::CheckVbat, period);
        result
    }
}
