//! Shared rig for the charger integration suites.

#![allow(dead_code, clippy::unwrap_used, clippy::panic, clippy::arithmetic_side_effects)]

use core::future::Future;

use charger::regs::{self, bits};
use charger::{Charger, ChargerConfig, LinkStatus, Quirks, Timings};
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use platform::mocks::{MockGpadc, MockRegisterBus};

pub type TestCharger = Charger<MockRegisterBus, MockGpadc>;

/// Delays shrunk so a full attach sequence runs in milliseconds.
pub fn fast_timings() -> Timings {
    Timings {
        settle: Duration::from_millis(1),
        link_poll_interval: Duration::from_millis(2),
        link_poll_attempts: 3,
        step_delay: Duration::from_micros(20),
        aca_enumeration_wait: Duration::from_millis(40),
        usb_state_settle: Duration::from_millis(5),
        resume_delay: Duration::from_millis(5),
        fault_recheck: Duration::from_millis(10),
        watchdog_kick: Duration::from_millis(15),
        vbat_check_near: Duration::from_millis(10),
        vbat_check_far: Duration::from_millis(50),
        drop_retry_unit: Duration::from_millis(1),
    }
}

pub fn fast_config() -> ChargerConfig {
    ChargerConfig {
        timings: fast_timings(),
        ..ChargerConfig::default()
    }
}

pub struct Rig {
    pub bus: MockRegisterBus,
    pub adc: MockGpadc,
    pub charger: TestCharger,
}

/// Driver logs on the test writer. Only visible with `--features tracing`;
/// filter with `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Charger on fresh mocks. Revision `0x20` is cut 2.0, `0x10` is cut 1.0.
pub fn rig_with(config: ChargerConfig, revision: u8) -> Rig {
    init_logging();
    let bus = MockRegisterBus::new();
    let adc = MockGpadc::new();
    let charger = Charger::new(
        bus.clone(),
        adc.clone(),
        config,
        Quirks::from_revision(revision),
    );
    Rig { bus, adc, charger }
}

pub fn rig() -> Rig {
    rig_with(fast_config(), 0x20)
}

impl Rig {
    pub fn set(&self, reg: regs::Reg, value: u8) {
        self.bus.set(reg.bank, reg.addr, value);
    }

    pub fn get(&self, reg: regs::Reg) -> u8 {
        self.bus.get(reg.bank, reg.addr)
    }

    pub fn writes_to(&self, reg: regs::Reg) -> Vec<u8> {
        self.bus.writes_to(reg.bank, reg.addr)
    }

    /// VBUS debounced present (or gone).
    pub fn vbus(&self, present: bool) {
        let value = if present {
            bits::VBUS_DET_DBNC1 | bits::VBUS_DET_DBNC100
        } else {
            0
        };
        self.set(regs::USBCH_STAT1, value);
    }

    /// Main charger detect bit.
    pub fn mains(&self, present: bool) {
        let value = if present { bits::MAIN_CH_DET } else { 0 };
        self.set(regs::CH_STATUS1, value);
    }

    /// Link code as the PHY reports it in `USB_LINE_STAT`.
    pub fn link(&self, status: LinkStatus) {
        let code = (0u8..16)
            .find(|c| LinkStatus::from_code(*c) == status)
            .unwrap();
        self.set(regs::USB_LINE_STAT, code << bits::USB_LINK_STATUS_SHIFT);
    }

    /// Run `body` while the work queue is being served.
    pub async fn drive<F: Future>(&self, body: F) -> F::Output {
        match select(self.charger.run(), body).await {
            Either::First(()) => panic!("work queue stopped before the test body finished"),
            Either::Second(out) => out,
        }
    }
}

/// Poll `cond` until it holds, giving up after `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        if Instant::now() > deadline {
            panic!("condition not reached within {} ms", limit.as_millis());
        }
        Timer::after(Duration::from_micros(500)).await;
    }
}

/// Let the workers settle for `ms` milliseconds.
pub async fn idle(ms: u64) {
    Timer::after(Duration::from_millis(ms)).await;
}
