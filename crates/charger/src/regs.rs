//! AB8500 register map and the access facade.
//!
//! Addresses are `(bank, offset)` pairs as documented in UM0836. Only the
//! registers the charger core touches are listed.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use platform::RegisterBus;

use crate::error::{ChargerError, Result};

/// A named register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
    /// Bank (functional block).
    pub bank: u8,
    /// Offset within the bank.
    pub addr: u8,
    /// Datasheet name, for logs.
    pub name: &'static str,
}

impl Reg {
    const fn new(bank: u8, addr: u8, name: &'static str) -> Self {
        Self { bank, addr, name }
    }

    /// One of the sixteen OTP emulation shadow registers.
    pub const fn otp_emul(index: u8) -> Self {
        Self::new(bank::OTP_EMUL, index, "OTP_EMUL")
    }
}

/// Register banks.
pub mod bank {
    /// System control 2 (main watchdog).
    pub const SYS_CTRL2: u8 = 0x02;
    /// USB PHY / link detection.
    pub const USB: u8 = 0x05;
    /// Charger block.
    pub const CHARGER: u8 = 0x0B;
    /// Interrupt sources.
    pub const INTERRUPT: u8 = 0x0E;
    /// RTC and backup battery.
    pub const RTC: u8 = 0x0F;
    /// Development (OTP emulation enable).
    pub const DEVELOPMENT: u8 = 0x11;
    /// ST-Ericsson test block.
    pub const STE_TEST: u8 = 0x14;
    /// OTP emulation shadow registers.
    pub const OTP_EMUL: u8 = 0x15;
}

/// Main charger status: detection and CV mode.
pub const CH_STATUS1: Reg = Reg::new(bank::CHARGER, 0x00, "CH_STATUS1");
/// Main charger status: thermal protection and "not ok".
pub const CH_STATUS2: Reg = Reg::new(bank::CHARGER, 0x01, "CH_STATUS2");
/// USB charger status: VBUS detection, CV mode, charger on.
pub const USBCH_STAT1: Reg = Reg::new(bank::CHARGER, 0x02, "USBCH_STAT1");
/// USB charger status: auto input limit, thermal, not ok, over-voltage.
pub const USBCH_STAT2: Reg = Reg::new(bank::CHARGER, 0x03, "USBCH_STAT2");
/// Charge voltage level.
pub const CH_VOLT_LVL: Reg = Reg::new(bank::CHARGER, 0x40, "CH_VOLT_LVL");
/// Maximum charge voltage level (rev 2.0+).
pub const CH_VOLT_LVL_MAX: Reg = Reg::new(bank::CHARGER, 0x41, "CH_VOLT_LVL_MAX");
/// Charger output current level.
pub const CH_OPT_CRNTLVL: Reg = Reg::new(bank::CHARGER, 0x42, "CH_OPT_CRNTLVL");
/// Maximum charger output current level (rev 2.0+).
pub const CH_OPT_CRNTLVL_MAX: Reg = Reg::new(bank::CHARGER, 0x43, "CH_OPT_CRNTLVL_MAX");
/// Charger watchdog timeout.
pub const CH_WD_TIMER: Reg = Reg::new(bank::CHARGER, 0x50, "CH_WD_TIMER");
/// Charger watchdog kick.
pub const CHARG_WD_CTRL: Reg = Reg::new(bank::CHARGER, 0x51, "CHARG_WD_CTRL");
/// Charging LED PWM control.
pub const LED_PWM_CTRL: Reg = Reg::new(bank::CHARGER, 0x53, "LED_PWM_CTRL");
/// Charging LED PWM duty cycle.
pub const LED_PWM_DUTY: Reg = Reg::new(bank::CHARGER, 0x54, "LED_PWM_DUTY");
/// Charger control: drop counter reset.
pub const CHARGER_CTRL: Reg = Reg::new(bank::CHARGER, 0x56, "CHARGER_CTRL");
/// Main charger enable and overshoot control.
pub const MCH_CTRL1: Reg = Reg::new(bank::CHARGER, 0x80, "MCH_CTRL1");
/// Main charger input current level.
pub const MCH_IPT_CURLVL: Reg = Reg::new(bank::CHARGER, 0x82, "MCH_IPT_CURLVL");
/// USB charger enable and overshoot control.
pub const USBCH_CTRL1: Reg = Reg::new(bank::CHARGER, 0xC0, "USBCH_CTRL1");
/// VBUS over-voltage threshold and automatic input limiting.
pub const USBCH_CTRL2: Reg = Reg::new(bank::CHARGER, 0xC1, "USBCH_CTRL2");
/// USB charger input current level.
pub const USBCH_IPT_CRNTLVL: Reg = Reg::new(bank::CHARGER, 0xC2, "USBCH_IPT_CRNTLVL");
/// Main watchdog control.
pub const MAIN_WDOG_CTRL: Reg = Reg::new(bank::SYS_CTRL2, 0x01, "MAIN_WDOG_CTRL");
/// USB line status: link type.
pub const USB_LINE_STAT: Reg = Reg::new(bank::USB, 0x80, "USB_LINE_STAT");
/// USB line control 2: charger detection enable.
pub const USB_LINE_CTRL2: Reg = Reg::new(bank::USB, 0x82, "USB_LINE_CTRL2");
/// Interrupt source 21. Reading it latches a fresh USB line status.
pub const IT_SOURCE21: Reg = Reg::new(bank::INTERRUPT, 0x14, "IT_SOURCE21");
/// Backup battery charge voltage and current.
pub const RTC_BACKUP_CHG: Reg = Reg::new(bank::RTC, 0x0C, "RTC_BACKUP_CHG");
/// RTC control: backup charger enable.
pub const RTC_CTRL: Reg = Reg::new(bank::RTC, 0x0B, "RTC_CTRL");
/// OTP emulation enable.
pub const OTP_EMUL_ENABLE: Reg = Reg::new(bank::DEVELOPMENT, 0x00, "OTP_EMUL_ENABLE");
/// Emulation content control.
pub const STE_TEST_EMUL: Reg = Reg::new(bank::STE_TEST, 0xB1, "STE_TEST_EMUL");
/// OTP shadow holding the SW fallback bit.
pub const OTP_FALLBACK: Reg = Reg::otp_emul(0x00);

/// Number of OTP emulation shadow registers.
pub const OTP_REG_COUNT: u8 = 0x10;
/// OTP shadow index holding the main watchdog enable.
pub const OTP_CONF_15: u8 = 0x0E;

/// Register bit fields and fixed values.
pub mod bits {
    /// `CH_STATUS1`: main charger detected.
    pub const MAIN_CH_DET: u8 = 0x01;
    /// `CH_STATUS1`: main charger in CV mode.
    pub const MAIN_CH_CV_ON: u8 = 0x04;
    /// `CH_STATUS2`: main charger "not ok".
    pub const MAIN_CH_NOK: u8 = 0x01;
    /// `CH_STATUS2`: main charger thermal protection.
    pub const MAIN_CH_TH_PROT: u8 = 0x02;
    /// `USBCH_STAT1`: VBUS detected, 1 ms debounce.
    pub const VBUS_DET_DBNC1: u8 = 0x01;
    /// `USBCH_STAT1`: VBUS detected, 100 ms debounce.
    pub const VBUS_DET_DBNC100: u8 = 0x02;
    /// `USBCH_STAT1`: USB charger switched on.
    pub const USB_CH_ON: u8 = 0x04;
    /// `USBCH_STAT1`: USB charger in CV mode.
    pub const USB_CH_CV_ON: u8 = 0x08;
    /// `USBCH_STAT2`: VBUS over-voltage.
    pub const VBUS_OVV_TH: u8 = 0x01;
    /// `USBCH_STAT2`: USB charger thermal protection.
    pub const USB_CH_TH_PROT: u8 = 0x02;
    /// `USBCH_STAT2`: USB charger "not ok".
    pub const VBUS_CH_NOK: u8 = 0x08;
    /// `USBCH_STAT2`: shift of the automatic input current limit field.
    pub const AUTO_VBUS_IN_CURR_LIM_SHIFT: u8 = 4;
    /// Shift of the input current fields in `MCH_IPT_CURLVL` and
    /// `USBCH_IPT_CRNTLVL`.
    pub const INPUT_CURR_SHIFT: u8 = 4;
    /// `USB_LINE_STAT`: link status field.
    pub const USB_LINK_STATUS_MASK: u8 = 0x78;
    /// `USB_LINE_STAT`: link status shift.
    pub const USB_LINK_STATUS_SHIFT: u8 = 3;
    /// `USB_LINE_CTRL2`: charger detection enable.
    pub const USB_CHARGER_DETECTION: u8 = 0x01;
    /// `MCH_CTRL1` / `USBCH_CTRL1`: charger enable.
    pub const CH_ENA: u8 = 0x01;
    /// `MCH_CTRL1` / `USBCH_CTRL1`: overshoot protection disable (active low).
    pub const NO_OVERSHOOT_ENA_N: u8 = 0x02;
    /// `USBCH_CTRL1`: enable plus SW-forced charge path bits.
    pub const USB_CH_CTRL_MASK: u8 = 0x03;
    /// `USBCH_CTRL1`: charge path forced off by SW.
    pub const USB_CH_FORCE_OFF: u8 = 0x02;
    /// `USBCH_CTRL1`: charge path forced back on by SW.
    pub const USB_CH_FORCE_ON: u8 = 0x03;
    /// `CHARGER_CTRL`: reset the input drop counter.
    pub const DROP_COUNTER_RESET: u8 = 0x01;
    /// `CHARG_WD_CTRL`: kick.
    pub const CHARG_WD_KICK: u8 = 0x01;
    /// `MAIN_WDOG_CTRL`: enable.
    pub const MAIN_WDOG_ENA: u8 = 0x01;
    /// `MAIN_WDOG_CTRL`: kick.
    pub const MAIN_WDOG_KICK: u8 = 0x02;
    /// `USBCH_CTRL2`: VBUS over-voltage threshold 6.3 V.
    pub const VBUS_OVV_SELECT_6P3V: u8 = 0x12;
    /// `USBCH_CTRL2`: automatic input current limiting.
    pub const VBUS_AUTO_IN_CURR_LIM_ENA: u8 = 0x04;
    /// `CH_VOLT_LVL_MAX`: 4.6 V.
    pub const CH_VOL_LVL_4P6: u8 = 0x4D;
    /// `CH_OPT_CRNTLVL_MAX`: 1.6 A.
    pub const CH_OP_CUR_LVL_1P6: u8 = 0x0F;
    /// `CH_WD_TIMER`: four minutes.
    pub const WD_TIMER_4MIN: u8 = 0x30;
    /// `LED_PWM_CTRL`: 5 mA LED current.
    pub const LED_IND_CUR_5MA: u8 = 0x04;
    /// `LED_PWM_CTRL`: PWM enable.
    pub const LED_PWM_ENA: u8 = 0x01;
    /// `LED_PWM_CTRL`: PWM off.
    pub const LED_PWM_DIS: u8 = 0x00;
    /// `LED_PWM_DUTY`: 252/256.
    pub const LED_PWM_DUTY_252_256: u8 = 0xBF;
    /// `RTC_CTRL`: backup battery charging enable.
    pub const RTC_BUP_CH_ENA: u8 = 0x10;
    /// `OTP_EMUL_ENABLE`: shadow registers writable.
    pub const OTP_EMUL_ON: u8 = 0x02;
    /// `OTP_EMUL_ENABLE`: shadow registers locked.
    pub const OTP_EMUL_OFF: u8 = 0x00;
    /// `STE_TEST_EMUL`: load emulation contents.
    pub const EMUL_LOAD: u8 = 0x02;
    /// `STE_TEST_EMUL`: chip controlled by emulation registers.
    pub const EMUL_ACTIVE: u8 = 0x03;
    /// OTP shadow 0: SW power-on fallback.
    pub const SW_FALLBACK: u8 = 0x08;
}

/// Serialised access to the register bus.
///
/// Every failure is logged with the register name and surfaces as
/// [`ChargerError::Io`]. Nothing here retries.
pub struct Registers<B> {
    bus: Mutex<CriticalSectionRawMutex, B>,
}

impl<B: RegisterBus> Registers<B> {
    /// Take ownership of the bus.
    pub fn new(bus: B) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    /// Read one register.
    pub async fn read(&self, reg: Reg) -> Result<u8> {
        let mut bus = self.bus.lock().await;
        bus.read(reg.bank, reg.addr).await.map_err(|_| {
            error!("{} read failed", reg.name);
            ChargerError::Io
        })
    }

    /// Write one register.
    pub async fn write(&self, reg: Reg, value: u8) -> Result<()> {
        let mut bus = self.bus.lock().await;
        trace!("{} <- {}", reg.name, value);
        bus.write(reg.bank, reg.addr, value).await.map_err(|_| {
            error!("{} write failed", reg.name);
            ChargerError::Io
        })
    }

    /// Replace the bits under `mask`.
    pub async fn update(&self, reg: Reg, mask: u8, value: u8) -> Result<()> {
        let mut bus = self.bus.lock().await;
        bus.read_modify_write(reg.bank, reg.addr, mask, value)
            .await
            .map_err(|_| {
                error!("{} mask-and-set failed", reg.name);
                ChargerError::Io
            })
    }
}
