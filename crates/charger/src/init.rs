//! Start-up and the SW power-on fallback
//!
//! [`Charger::start`] takes over charging control from the hardware state
//! machine and samples the sources present at boot. It must complete before
//! interrupts are routed to [`Charger::handle_irq`].

use embassy_time::{Duration, Timer};
use platform::{Gpadc, RegisterBus};

use crate::detect::SourceMask;
use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::Result;
use crate::regs::{self, bits, Reg};
use crate::state::{ChargerPhase, SupplyKind};

/// Minimum gap between the main watchdog enable and kick writes: two
/// periods of the 32 kHz clock.
const WDOG_ENABLE_TO_KICK: Duration = Duration::from_micros(63);

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Program the charger registers and pick up sources already attached.
    pub async fn start(&self) -> Result<()> {
        self.init_hw_registers().await.map_err(|e| {
            error!("charger register setup failed: {}", e.name());
            e
        })?;

        let sources = self.detect_sources(true).await?;
        if sources.contains(SourceMask::AC) {
            info!("main charger present at start-up");
            self.with_state(|s| {
                s.ac.connected = true;
                s.ac_conn = true;
                s.ac.phase = ChargerPhase::Classified;
            });
            self.update_sw_fallback().await?;
            self.notify(SupplyKind::Ac);
        }
        if sources.contains(SourceMask::USB) {
            debug!("VBUS present at start-up");
            self.with_state(|s| {
                s.vbus_detected = true;
                s.vbus_detected_start = true;
                s.usb.phase = ChargerPhase::Detecting;
            });
            self.queue.queue(Work::DetectUsbType);
        }
        Ok(())
    }

    /// One-time register setup.
    async fn init_hw_registers(&self) -> Result<()> {
        if self.quirks.max_limits_writable {
            self.regs
                .write(regs::CH_VOLT_LVL_MAX, bits::CH_VOL_LVL_4P6)
                .await?;
            self.regs
                .write(regs::CH_OPT_CRNTLVL_MAX, bits::CH_OP_CUR_LVL_1P6)
                .await?;
        }

        self.regs
            .write(
                regs::USBCH_CTRL2,
                bits::VBUS_OVV_SELECT_6P3V | bits::VBUS_AUTO_IN_CURR_LIM_ENA,
            )
            .await?;

        let Ok(saved) = self.regs.read(regs::MAIN_WDOG_CTRL).await else {
            // Without the watchdog state there is nothing safe to restore.
            warn!("main watchdog unreadable, leaving it to the hardware");
            return Ok(());
        };

        if let Err(e) = self.emulate_main_watchdog(saved).await {
            warn!("OTP emulation of the main watchdog failed: {}", e.name());
        }

        // Enable and kick cannot share a write.
        self.regs
            .write(
                regs::MAIN_WDOG_CTRL,
                saved | bits::MAIN_WDOG_ENA | bits::MAIN_WDOG_KICK,
            )
            .await?;
        Timer::after(WDOG_ENABLE_TO_KICK).await;
        self.regs
            .write(regs::MAIN_WDOG_CTRL, bits::MAIN_WDOG_ENA | bits::MAIN_WDOG_KICK)
            .await?;
        self.regs.write(regs::MAIN_WDOG_CTRL, saved).await?;

        self.regs
            .write(regs::CH_WD_TIMER, bits::WD_TIMER_4MIN)
            .await?;

        if !self.config.led_control {
            self.regs.write(regs::LED_PWM_CTRL, bits::LED_PWM_DIS).await?;
        }

        if let Some(backup) = self.config.backup_charger {
            self.regs
                .write(
                    regs::RTC_BACKUP_CHG,
                    backup.voltage_bits | backup.current_bits,
                )
                .await?;
            if let Err(e) = self
                .regs
                .update(regs::RTC_CTRL, bits::RTC_BUP_CH_ENA, bits::RTC_BUP_CH_ENA)
                .await
            {
                warn!("backup charging not enabled: {}", e.name());
            }
        }
        Ok(())
    }

    /// Mirror the main watchdog enable into the OTP emulation shadow so a
    /// stuck firmware still gets the board restarted.
    async fn emulate_main_watchdog(&self, wdog: u8) -> Result<()> {
        debug!("OTP emulation, main watchdog {}", wdog);
        self.regs
            .write(regs::OTP_EMUL_ENABLE, bits::OTP_EMUL_ON)
            .await?;

        let mut shadow = [0u8; regs::OTP_REG_COUNT as usize];
        for (index, slot) in (0..regs::OTP_REG_COUNT).zip(shadow.iter_mut()) {
            *slot = self.regs.read(Reg::otp_emul(index)).await?;
        }
        if let Some(conf) = shadow.get_mut(usize::from(regs::OTP_CONF_15)) {
            *conf = (*conf & !bits::MAIN_WDOG_ENA) | (wdog & bits::MAIN_WDOG_ENA);
        }

        self.regs.write(regs::STE_TEST_EMUL, bits::EMUL_LOAD).await?;
        for (index, value) in (0..regs::OTP_REG_COUNT).zip(shadow) {
            self.regs.write(Reg::otp_emul(index), value).await?;
        }
        self.regs.write(regs::STE_TEST_EMUL, bits::EMUL_ACTIVE).await
    }

    // ── SW fallback ─────────────────────────────────────────────────────────

    /// Keep the SW power-on fallback enabled exactly while a charger is
    /// connected. No-op unless autopower is configured.
    pub(crate) async fn update_sw_fallback(&self) -> Result<()> {
        if !self.config.autopower {
            return Ok(());
        }
        let toggle = self.with_state(|s| {
            let any = s.ac.connected || s.usb.connected;
            if any == s.autopower_active {
                None
            } else {
                s.autopower_active = any;
                Some(any)
            }
        });
        match toggle {
            Some(on) => self.set_sw_fallback(on).await,
            None => Ok(()),
        }
    }

    async fn set_sw_fallback(&self, on: bool) -> Result<()> {
        debug!("SW fallback: {}", on);
        let current = self.regs.read(regs::OTP_FALLBACK).await?;
        self.regs
            .write(regs::OTP_EMUL_ENABLE, bits::OTP_EMUL_ON)
            .await?;
        let value = if on {
            current | bits::SW_FALLBACK
        } else {
            current & !bits::SW_FALLBACK
        };
        self.regs.write(regs::OTP_FALLBACK, value).await?;
        self.regs
            .write(regs::OTP_EMUL_ENABLE, bits::OTP_EMUL_OFF)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{BackupCharger, ChargerConfig, Quirks, Timings};
    use platform::mocks::{MockGpadc, MockRegisterBus};

    fn quick() -> ChargerConfig {
        ChargerConfig {
            timings: Timings {
                settle: Duration::from_millis(1),
                ..Timings::default()
            },
            ..ChargerConfig::default()
        }
    }

    fn setup(
        config: ChargerConfig,
        revision: u8,
    ) -> (MockRegisterBus, Charger<MockRegisterBus, MockGpadc>) {
        let bus = MockRegisterBus::new();
        let c = Charger::new(
            bus.clone(),
            MockGpadc::new(),
            config,
            Quirks::from_revision(revision),
        );
        (bus, c)
    }

    // ── register setup ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn max_limits_only_on_cut2() {
        let (bus, c) = setup(quick(), 0x20);
        c.start().await.unwrap();
        assert_eq!(
            bus.writes_to(regs::bank::CHARGER, regs::CH_VOLT_LVL_MAX.addr),
            vec![bits::CH_VOL_LVL_4P6]
        );

        let (bus, c) = setup(quick(), 0x11);
        c.start().await.unwrap();
        assert!(bus
            .writes_to(regs::bank::CHARGER, regs::CH_VOLT_LVL_MAX.addr)
            .is_empty());
    }

    #[tokio::test]
    async fn main_watchdog_is_enabled_kicked_and_restored() {
        let (bus, c) = setup(quick(), 0x20);
        bus.set(regs::bank::SYS_CTRL2, regs::MAIN_WDOG_CTRL.addr, 0x10);
        c.start().await.unwrap();
        assert_eq!(
            bus.writes_to(regs::bank::SYS_CTRL2, regs::MAIN_WDOG_CTRL.addr),
            vec![0x13, 0x03, 0x10]
        );
        assert_eq!(
            bus.writes_to(regs::bank::CHARGER, regs::CH_WD_TIMER.addr),
            vec![bits::WD_TIMER_4MIN]
        );
    }

    #[tokio::test]
    async fn otp_shadow_follows_the_main_watchdog() {
        let (bus, c) = setup(quick(), 0x20);
        bus.set(regs::bank::SYS_CTRL2, regs::MAIN_WDOG_CTRL.addr, bits::MAIN_WDOG_ENA);
        bus.set(regs::bank::OTP_EMUL, regs::OTP_CONF_15, 0xF0);
        c.start().await.unwrap();
        assert_eq!(bus.get(regs::bank::OTP_EMUL, regs::OTP_CONF_15), 0xF1);
        assert_eq!(
            bus.writes_to(regs::bank::STE_TEST, regs::STE_TEST_EMUL.addr),
            vec![bits::EMUL_LOAD, bits::EMUL_ACTIVE]
        );
    }

    #[tokio::test]
    async fn unreadable_otp_shadow_leaves_the_emulation_alone() {
        let (bus, c) = setup(quick(), 0x20);
        bus.set(regs::bank::SYS_CTRL2, regs::MAIN_WDOG_CTRL.addr, bits::MAIN_WDOG_ENA);
        bus.set(regs::bank::OTP_EMUL, regs::OTP_CONF_15, 0xF0);
        bus.fail_reads(regs::bank::OTP_EMUL, 0x05);
        c.start().await.unwrap();

        assert!(bus
            .writes_to(regs::bank::STE_TEST, regs::STE_TEST_EMUL.addr)
            .is_empty());
        assert!(bus
            .writes()
            .iter()
            .all(|&(bank, _, _)| bank != regs::bank::OTP_EMUL));
        assert_eq!(bus.get(regs::bank::OTP_EMUL, regs::OTP_CONF_15), 0xF0);
        // The rest of the set-up still runs.
        assert_eq!(
            bus.writes_to(regs::bank::CHARGER, regs::CH_WD_TIMER.addr),
            vec![bits::WD_TIMER_4MIN]
        );
    }

    #[tokio::test]
    async fn unreadable_main_watchdog_skips_the_rest() {
        let (bus, c) = setup(quick(), 0x20);
        bus.fail_reads(regs::bank::SYS_CTRL2, regs::MAIN_WDOG_CTRL.addr);
        c.start().await.unwrap();
        assert!(bus
            .writes_to(regs::bank::CHARGER, regs::CH_WD_TIMER.addr)
            .is_empty());
    }

    #[tokio::test]
    async fn backup_charger_is_programmed() {
        let config = ChargerConfig {
            backup_charger: Some(BackupCharger {
                voltage_bits: 0x0C,
                current_bits: 0x20,
            }),
            ..quick()
        };
        let (bus, c) = setup(config, 0x20);
        c.start().await.unwrap();
        assert_eq!(bus.get(regs::bank::RTC, regs::RTC_BACKUP_CHG.addr), 0x2C);
        assert_eq!(
            bus.get(regs::bank::RTC, regs::RTC_CTRL.addr) & bits::RTC_BUP_CH_ENA,
            bits::RTC_BUP_CH_ENA
        );
    }

    #[tokio::test]
    async fn setup_failure_aborts_start() {
        let (bus, c) = setup(quick(), 0x20);
        bus.fail_writes(regs::bank::CHARGER, regs::USBCH_CTRL2.addr);
        assert!(c.start().await.is_err());
    }

    // ── boot detection ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn sources_present_at_boot() {
        let (bus, c) = setup(quick(), 0x20);
        bus.set(regs::bank::CHARGER, regs::CH_STATUS1.addr, bits::MAIN_CH_DET);
        bus.set(
            regs::bank::CHARGER,
            regs::USBCH_STAT1.addr,
            bits::VBUS_DET_DBNC1 | bits::VBUS_DET_DBNC100,
        );
        c.start().await.unwrap();

        let s = c.snapshot();
        assert!(s.ac.connected && s.ac_conn);
        assert!(s.vbus_detected && s.vbus_detected_start);
        assert_eq!(s.usb.phase, ChargerPhase::Detecting);
        assert!(c.work_pending(Work::DetectUsbType));
        assert_eq!(c.poll_change(), Some(SupplyKind::Ac));
    }

    // ── SW fallback ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fallback_follows_connection() {
        let config = ChargerConfig {
            autopower: true,
            ..quick()
        };
        let (bus, c) = setup(config, 0x20);
        bus.set(regs::bank::OTP_EMUL, 0x00, 0x41);

        c.with_state(|s| s.ac.connected = true);
        c.update_sw_fallback().await.unwrap();
        assert_eq!(bus.get(regs::bank::OTP_EMUL, 0x00), 0x49);
        assert_eq!(
            bus.writes_to(regs::bank::DEVELOPMENT, regs::OTP_EMUL_ENABLE.addr),
            vec![bits::OTP_EMUL_ON, bits::OTP_EMUL_OFF]
        );

        bus.clear_log();
        c.update_sw_fallback().await.unwrap();
        assert!(bus.writes().is_empty());

        c.with_state(|s| s.ac.connected = false);
        c.update_sw_fallback().await.unwrap();
        assert_eq!(bus.get(regs::bank::OTP_EMUL, 0x00), 0x41);
    }

    #[tokio::test]
    async fn fallback_untouched_without_autopower() {
        let (bus, c) = setup(quick(), 0x20);
        c.with_state(|s| s.ac.connected = true);
        c.update_sw_fallback().await.unwrap();
        assert!(bus.writes().is_empty());
    }
}
