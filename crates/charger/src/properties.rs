//! Power-supply properties
//!
//! Read-only queries the consumer polls after a change notification. A
//! dedicated USB charger is reported through the `Ac` supply, so presence
//! and online state depend on the last USB classification as well as on
//! the main charger.

use platform::{AdcChannel, Gpadc, RegisterBus};

use crate::driver::Charger;
use crate::error::{ChargerError, Result};
use crate::regs::{self, bits};
use crate::state::{Health, SupplyKind};

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// One GPADC conversion.
    pub(crate) async fn convert(&self, channel: AdcChannel) -> Result<i32> {
        let mut adc = self.adc.lock().await;
        adc.convert(channel).await.map_err(|_| {
            error!("GPADC conversion failed");
            ChargerError::Io
        })
    }

    /// `true` when `kind` is served by the main charger rather than VBUS.
    fn on_main(&self, kind: SupplyKind) -> bool {
        kind == SupplyKind::Ac && self.with_state(|s| s.main_backs_ac())
    }

    /// Health, in fixed priority order. Both supplies share one view.
    pub fn health(&self, kind: SupplyKind) -> Health {
        let health = self.with_state(|s| Health::derive(&s.flags, &s.ac, &s.usb));
        trace!("{} health {}", kind.name(), health.name());
        health
    }

    /// A source of this kind is attached.
    pub fn present(&self, kind: SupplyKind) -> bool {
        self.with_state(|s| match kind {
            SupplyKind::Ac => s.ac.connected || (s.usb.connected && !s.is_usb_host),
            SupplyKind::Usb => s.usb.connected && s.is_usb_host,
        })
    }

    /// Charging from this kind is enabled.
    pub fn online(&self, kind: SupplyKind) -> bool {
        self.with_state(|s| match kind {
            SupplyKind::Ac => s.ac.online || (s.usb.online && !s.is_usb_host),
            SupplyKind::Usb => s.usb.online && s.is_usb_host,
        })
    }

    /// Source voltage in mV, or 0 without a source.
    pub async fn voltage_now_mv(&self, kind: SupplyKind) -> Result<i32> {
        let main = self.on_main(kind);
        let (instance, channel) = if main {
            (SupplyKind::Ac, AdcChannel::MainChargerVoltage)
        } else {
            (SupplyKind::Usb, AdcChannel::VbusVoltage)
        };
        if !self.with_state(|s| s.instance(instance).connected) {
            return Ok(0);
        }
        let mv = self.convert(channel).await?;
        self.with_state(|s| s.instance_mut(instance).voltage_mv = mv);
        Ok(mv)
    }

    /// Constant-voltage indicator: `true` once the charger regulates
    /// voltage instead of current.
    pub async fn voltage_avg(&self, kind: SupplyKind) -> Result<bool> {
        let main = self.on_main(kind);
        let instance = if main { SupplyKind::Ac } else { SupplyKind::Usb };
        let cv = if self.with_state(|s| s.instance(instance).online) {
            if main {
                self.regs.read(regs::CH_STATUS1).await? & bits::MAIN_CH_CV_ON != 0
            } else {
                self.regs.read(regs::USBCH_STAT1).await? & bits::USB_CH_CV_ON != 0
            }
        } else {
            false
        };
        self.with_state(|s| s.instance_mut(instance).in_cv_mode = cv);
        Ok(cv)
    }

    /// Charger current in mA while charging, otherwise 0.
    pub async fn current_now_ma(&self, kind: SupplyKind) -> Result<i32> {
        let main = self.on_main(kind);
        let (instance, channel) = if main {
            (SupplyKind::Ac, AdcChannel::MainChargerCurrent)
        } else {
            (SupplyKind::Usb, AdcChannel::UsbChargerCurrent)
        };
        if !self.with_state(|s| s.instance(instance).online) {
            return Ok(0);
        }
        self.convert(channel).await
    }

    /// VBUS collapse indicator: the charger drew more than the source could
    /// deliver and did not recover.
    pub fn current_avg(&self, _kind: SupplyKind) -> bool {
        self.with_state(|s| s.flags.vbus_collapsed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{ChargerConfig, Quirks};
    use platform::mocks::{MockGpadc, MockRegisterBus};

    fn setup() -> (MockRegisterBus, MockGpadc, Charger<MockRegisterBus, MockGpadc>) {
        let bus = MockRegisterBus::new();
        let adc = MockGpadc::new();
        let c = Charger::new(
            bus.clone(),
            adc.clone(),
            ChargerConfig::default(),
            Quirks::from_revision(0x20),
        );
        (bus, adc, c)
    }

    // ── presence ────────────────────────────────────────────────────────────

    #[test]
    fn dedicated_charger_presents_as_mains() {
        let (_, _, c) = setup();
        c.with_state(|s| s.set_usb_connected(true));
        assert!(c.present(SupplyKind::Ac));
        assert!(!c.present(SupplyKind::Usb));

        c.with_state(|s| s.is_usb_host = true);
        assert!(!c.present(SupplyKind::Ac));
        assert!(c.present(SupplyKind::Usb));
    }

    #[test]
    fn main_charger_presents_as_mains() {
        let (_, _, c) = setup();
        c.with_state(|s| s.ac.connected = true);
        assert!(c.present(SupplyKind::Ac));
        assert!(!c.online(SupplyKind::Ac));
    }

    // ── measurements ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn voltage_is_zero_without_a_source() {
        let (_, adc, c) = setup();
        adc.set(AdcChannel::VbusVoltage, 5000);
        assert_eq!(c.voltage_now_mv(SupplyKind::Usb).await.unwrap(), 0);
        assert_eq!(adc.conversions(), 0);
    }

    #[tokio::test]
    async fn voltage_is_stored_on_the_instance() {
        let (_, adc, c) = setup();
        adc.set(AdcChannel::VbusVoltage, 5012);
        c.with_state(|s| s.set_usb_connected(true));
        assert_eq!(c.voltage_now_mv(SupplyKind::Ac).await.unwrap(), 5012);
        assert_eq!(c.snapshot().usb.voltage_mv, 5012);
    }

    #[tokio::test]
    async fn main_charger_voltage_uses_its_own_channel() {
        let (_, adc, c) = setup();
        adc.set(AdcChannel::VbusVoltage, 5000);
        adc.set(AdcChannel::MainChargerVoltage, 9100);
        c.with_state(|s| s.ac.connected = true);
        assert_eq!(c.voltage_now_mv(SupplyKind::Ac).await.unwrap(), 9100);
        assert_eq!(c.snapshot().ac.voltage_mv, 9100);
    }

    #[tokio::test]
    async fn adc_failure_is_io() {
        let (_, adc, c) = setup();
        adc.set_failing(true);
        c.with_state(|s| s.set_usb_connected(true));
        assert_eq!(
            c.voltage_now_mv(SupplyKind::Usb).await,
            Err(ChargerError::Io)
        );
    }

    #[tokio::test]
    async fn cv_mode_reads_status_only_when_online() {
        let (bus, _, c) = setup();
        bus.set(regs::bank::CHARGER, regs::USBCH_STAT1.addr, bits::USB_CH_CV_ON);
        assert!(!c.voltage_avg(SupplyKind::Usb).await.unwrap());
        assert_eq!(bus.read_count(regs::bank::CHARGER, regs::USBCH_STAT1.addr), 0);

        c.with_state(|s| s.usb.online = true);
        assert!(c.voltage_avg(SupplyKind::Usb).await.unwrap());
        assert!(c.snapshot().usb.in_cv_mode);
    }

    #[tokio::test]
    async fn current_is_zero_while_offline() {
        let (_, adc, c) = setup();
        adc.set(AdcChannel::UsbChargerCurrent, 480);
        assert_eq!(c.current_now_ma(SupplyKind::Usb).await.unwrap(), 0);
        c.with_state(|s| s.usb.online = true);
        assert_eq!(c.current_now_ma(SupplyKind::Usb).await.unwrap(), 480);
    }

    #[test]
    fn current_avg_reports_collapse() {
        let (_, _, c) = setup();
        assert!(!c.current_avg(SupplyKind::Usb));
        c.with_state(|s| s.flags.vbus_collapsed = true);
        assert!(c.current_avg(SupplyKind::Usb));
    }
}
