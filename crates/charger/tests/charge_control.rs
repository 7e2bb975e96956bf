//! Enable/disable, fault reporting and input-limit policy through the
//! public interface.

#![allow(clippy::unwrap_used)]

mod common;

use charger::regs::{self, bits};
use charger::{ChargerPhase, Health, Irq, LinkStatus, SupplyKind, Work};
use common::{eventually, fast_config, idle, rig, rig_with, Rig};
use embassy_time::Duration;

const SETTLE: Duration = Duration::from_millis(500);

async fn attach(r: &Rig, link: LinkStatus) {
    r.vbus(true);
    r.link(link);
    r.charger.handle_irq(Irq::UsbLinkStatus);
    eventually(SETTLE, || r.charger.snapshot().usb.connected).await;
}

// ── main charger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn main_charger_enable_and_disable() {
    let r = rig();
    r.mains(true);

    r.drive(async {
        r.charger.handle_irq(Irq::MainPlug);
        eventually(SETTLE, || r.charger.present(SupplyKind::Ac)).await;
        assert_eq!(r.charger.wait_change().await, SupplyKind::Ac);

        r.charger
            .enable(SupplyKind::Ac, true, 4200, 500)
            .await
            .unwrap();
        assert!(r.charger.online(SupplyKind::Ac));
        assert_eq!(r.get(regs::MCH_CTRL1), bits::CH_ENA | bits::NO_OVERSHOOT_ENA_N);
        assert_eq!(r.get(regs::MCH_IPT_CURLVL), 14 << 4);
        assert_eq!(r.get(regs::CH_OPT_CRNTLVL), 4);
        assert_eq!(r.get(regs::CH_VOLT_LVL), 37);

        r.charger
            .enable(SupplyKind::Ac, false, 0, 0)
            .await
            .unwrap();
    })
    .await;

    assert!(!r.charger.online(SupplyKind::Ac));
    assert!(r.charger.present(SupplyKind::Ac));
    assert_eq!(r.charger.phase(SupplyKind::Ac), ChargerPhase::Disabled);
    assert_eq!(r.get(regs::MCH_CTRL1), 0);
    assert_eq!(r.get(regs::MCH_IPT_CURLVL), 0);
    assert_eq!(r.get(regs::CH_OPT_CRNTLVL), 0);
    // Stepped down one code at a time.
    let down: Vec<u8> = r
        .writes_to(regs::MCH_IPT_CURLVL)
        .into_iter()
        .skip_while(|v| *v != 14 << 4)
        .skip(1)
        .collect();
    assert_eq!(down, (0u8..14).rev().map(|c| c << 4).collect::<Vec<_>>());
}

#[tokio::test]
async fn main_charger_unplug_is_reported() {
    let r = rig();
    r.mains(true);
    r.drive(async {
        r.charger.handle_irq(Irq::MainPlug);
        eventually(SETTLE, || r.charger.present(SupplyKind::Ac)).await;
        r.mains(false);
        r.charger.handle_irq(Irq::MainUnplug);
        eventually(SETTLE, || !r.charger.present(SupplyKind::Ac)).await;
    })
    .await;
    assert_eq!(r.charger.phase(SupplyKind::Ac), ChargerPhase::Disconnected);
}

#[tokio::test]
async fn early_silicon_kicks_the_watchdog_while_mains_charge() {
    let r = rig_with(fast_config(), 0x10);
    r.mains(true);

    r.drive(async {
        r.charger.handle_irq(Irq::MainPlug);
        eventually(SETTLE, || r.charger.present(SupplyKind::Ac)).await;
        r.charger
            .enable(SupplyKind::Ac, true, 4200, 500)
            .await
            .unwrap();
        eventually(SETTLE, || r.writes_to(regs::CHARG_WD_CTRL).len() >= 2).await;

        r.charger
            .enable(SupplyKind::Ac, false, 0, 0)
            .await
            .unwrap();
        assert!(!r.charger.work_pending(Work::KickWatchdog));
    })
    .await;
}

#[tokio::test]
async fn enabling_without_a_source_is_refused() {
    let r = rig();
    let result = r
        .drive(r.charger.enable(SupplyKind::Usb, true, 4200, 500))
        .await;
    assert_eq!(result, Err(charger::ChargerError::NotConnected));
    assert!(r.bus.writes().is_empty());
}

// ── watchdog expiry ─────────────────────────────────────────────────────────

#[tokio::test]
async fn watchdog_expiry_needs_a_re_enable() {
    let r = rig();
    r.charger.report_battery_voltage(4000);

    r.drive(async {
        attach(&r, LinkStatus::DedicatedChg).await;
        r.charger
            .enable(SupplyKind::Ac, true, 4200, 500)
            .await
            .unwrap();

        r.charger.handle_irq(Irq::WatchdogExpired);
        assert_eq!(r.charger.health(SupplyKind::Ac), Health::Dead);
        assert!(r.charger.snapshot().usb.watchdog_expired);

        r.charger
            .enable(SupplyKind::Ac, true, 4200, 500)
            .await
            .unwrap();
    })
    .await;

    assert_eq!(r.charger.health(SupplyKind::Ac), Health::Good);
    assert!(!r.charger.snapshot().flags.watchdog_expired);
}

#[tokio::test]
async fn watchdog_expiry_ignores_offline_chargers() {
    let r = rig();
    r.charger.handle_irq(Irq::WatchdogExpired);
    assert_eq!(r.charger.health(SupplyKind::Usb), Health::Good);
    assert_eq!(r.charger.poll_change(), None);
}

// ── health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_follows_fault_priority() {
    let r = rig();
    r.set(regs::USBCH_STAT2, bits::VBUS_OVV_TH);

    r.drive(async {
        r.charger.handle_irq(Irq::VbusOvervoltage);
        assert_eq!(r.charger.health(SupplyKind::Usb), Health::Overvoltage);

        r.set(regs::USBCH_STAT2, bits::VBUS_OVV_TH | bits::USB_CH_TH_PROT);
        r.charger.handle_irq(Irq::UsbThermalRising);
        eventually(SETTLE, || r.charger.health(SupplyKind::Usb) == Health::Overheat).await;

        r.set(
            regs::USBCH_STAT2,
            bits::VBUS_OVV_TH | bits::USB_CH_TH_PROT | bits::VBUS_CH_NOK,
        );
        r.charger.handle_irq(Irq::UsbChargerNotOk);
        eventually(SETTLE, || {
            r.charger.health(SupplyKind::Usb) == Health::UnspecFailure
        })
        .await;

        // Rechecks clear not-ok and overvoltage; thermal waits for its edge.
        r.set(regs::USBCH_STAT2, bits::USB_CH_TH_PROT);
        eventually(SETTLE, || r.charger.health(SupplyKind::Usb) == Health::Overheat).await;

        r.set(regs::USBCH_STAT2, 0);
        r.charger.handle_irq(Irq::UsbThermalFalling);
        eventually(SETTLE, || r.charger.health(SupplyKind::Usb) == Health::Good).await;
        idle(30).await;
    })
    .await;

    assert!(!r.charger.work_pending(Work::CheckHwFailure));
    assert!(!r.charger.work_pending(Work::CheckUsbChargerNotOk));
}

// ── input limit policy ──────────────────────────────────────────────────────

#[tokio::test]
async fn drop_end_samples_the_limit_and_probes_again() {
    let r = rig();
    r.charger.report_battery_voltage(4000);

    r.drive(async {
        attach(&r, LinkStatus::DedicatedChg).await;
        r.charger
            .enable(SupplyKind::Ac, true, 4200, 500)
            .await
            .unwrap();
        assert_eq!(r.get(regs::USBCH_IPT_CRNTLVL), 0xF0);

        // The PMIC settled at 900 mA on its own.
        r.set(regs::USBCH_STAT2, 10 << 4);
        r.bus.clear_log();
        r.charger.handle_irq(Irq::VbusDropEnd);
        assert!(r.charger.snapshot().flags.vbus_drop_ended);
        eventually(SETTLE, || r.charger.snapshot().drop.sampled_ceiling() == 900).await;
        eventually(SETTLE, || r.writes_to(regs::USBCH_IPT_CRNTLVL).len() == 5).await;
    })
    .await;

    assert_eq!(
        r.writes_to(regs::USBCH_IPT_CRNTLVL),
        vec![0xB0, 0xC0, 0xD0, 0xE0, 0xF0]
    );
    let s = r.charger.snapshot();
    assert!(!s.flags.vbus_drop_ended);
    assert_eq!(s.drop.retry_backoff, charger::vbus_drop::RETRY_SEED);
}

#[tokio::test]
async fn low_battery_trims_the_host_limit() {
    let r = rig();
    r.set(regs::USBCH_STAT2, 0xF0);
    r.charger.report_battery_voltage(4000);

    r.drive(async {
        attach(&r, LinkStatus::StdHostCNs).await;
        r.charger
            .enable(SupplyKind::Usb, true, 4200, 500)
            .await
            .unwrap();
        assert_eq!(r.get(regs::USBCH_IPT_CRNTLVL), 6 << 4);
        // The first check records the voltage the crossings are judged from.
        eventually(SETTLE, || r.charger.snapshot().old_vbat_mv == 4000).await;

        r.charger.report_battery_voltage(3750);
        eventually(SETTLE, || r.get(regs::USBCH_IPT_CRNTLVL) == 5 << 4).await;

        r.charger.report_battery_voltage(3950);
        eventually(SETTLE, || r.get(regs::USBCH_IPT_CRNTLVL) == 6 << 4).await;

        r.charger
            .enable(SupplyKind::Usb, false, 0, 0)
            .await
            .unwrap();
        assert!(!r.charger.work_pending(Work::CheckVbat));
    })
    .await;

    assert_eq!(r.get(regs::USBCH_CTRL1), 0);
    assert_eq!(r.charger.phase(SupplyKind::Usb), ChargerPhase::Disabled);
}
