//! Charger detection and USB link classification

use core::ops::BitOr;

use embassy_time::Timer;
use platform::{AdcChannel, Gpadc, RegisterBus};

use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::{ChargerError, Result};
use crate::regs::{self, bits};
use crate::state::{AcaRid, ChargerPhase, InvalidChargerState, SupplyKind};

/// Input ceiling when charging is not allowed, in mA.
pub const NOT_ALLOWED_CEILING_MA: i32 = 50;

/// Attached power sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceMask(u8);

impl SourceMask {
    /// Nothing attached.
    pub const NONE: Self = Self(0);
    /// Main charger attached.
    pub const AC: Self = Self(0x01);
    /// VBUS present.
    pub const USB: Self = Self(0x02);

    /// `true` if every source in `other` is present.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if nothing is attached.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SourceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// USB link classification reported in `USB_LINE_STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    /// Nothing classified yet.
    NotConfigured,
    /// Standard host, not configured.
    StdHostNc,
    /// Standard host, configured, not suspended.
    StdHostCNs,
    /// Standard host, configured, suspended.
    StdHostCS,
    /// Host charger, normal mode.
    HostChgNm,
    /// Host charger, high speed.
    HostChgHs,
    /// Host charger, high speed chirp.
    HostChgHsChirp,
    /// Dedicated charger.
    DedicatedChg,
    /// Accessory charger adapter, RID_A.
    AcaRidA,
    /// Accessory charger adapter, RID_B.
    AcaRidB,
    /// Accessory charger adapter, RID_C normal mode.
    AcaRidCNm,
    /// Accessory charger adapter, RID_C high speed.
    AcaRidCHs,
    /// Accessory charger adapter, RID_C high speed chirp.
    AcaRidCHsChirp,
    /// ID pin grounded: we are the host.
    HmIdgnd,
    /// VBUS dropped below detection four times in a row.
    Reserved,
    /// Out-of-spec link.
    NotValidLink,
}

impl LinkStatus {
    /// Decode the 4-bit link code.
    pub const fn from_code(code: u8) -> Self {
        match code & 0x0F {
            0x00 => Self::NotConfigured,
            0x01 => Self::StdHostNc,
            0x02 => Self::StdHostCNs,
            0x03 => Self::StdHostCS,
            0x04 => Self::HostChgNm,
            0x05 => Self::HostChgHs,
            0x06 => Self::HostChgHsChirp,
            0x07 => Self::DedicatedChg,
            0x08 => Self::AcaRidA,
            0x09 => Self::AcaRidB,
            0x0A => Self::AcaRidCNm,
            0x0B => Self::AcaRidCHs,
            0x0C => Self::AcaRidCHsChirp,
            0x0D => Self::HmIdgnd,
            0x0E => Self::Reserved,
            _ => Self::NotValidLink,
        }
    }

    /// Decode the raw `USB_LINE_STAT` register.
    pub const fn from_line_status(raw: u8) -> Self {
        let code = (raw & bits::USB_LINK_STATUS_MASK).wrapping_shr(bits::USB_LINK_STATUS_SHIFT as u32);
        Self::from_code(code)
    }

    /// Datasheet label.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::StdHostNc => "STD_HOST_NC",
            Self::StdHostCNs => "STD_HOST_C_NS",
            Self::StdHostCS => "STD_HOST_C_S",
            Self::HostChgNm => "HOST_CHG_NM",
            Self::HostChgHs => "HOST_CHG_HS",
            Self::HostChgHsChirp => "HOST_CHG_HS_CHIRP",
            Self::DedicatedChg => "DEDICATED_CHG",
            Self::AcaRidA => "ACA_RID_A",
            Self::AcaRidB => "ACA_RID_B",
            Self::AcaRidCNm => "ACA_RID_C_NM",
            Self::AcaRidCHs => "ACA_RID_C_HS",
            Self::AcaRidCHsChirp => "ACA_RID_C_HS_CHIRP",
            Self::HmIdgnd => "HM_IDGND",
            Self::Reserved => "RESERVED",
            Self::NotValidLink => "NOT_VALID_LINK",
        }
    }
}

/// Result of a successful classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbClassification {
    /// Input current ceiling in mA.
    pub max_input_ma: i32,
    /// Data-capable host (as opposed to a dedicated charger).
    pub is_host: bool,
    /// Accessory charger adapter.
    pub is_aca_rid: bool,
}

const fn class(max_input_ma: i32, is_host: bool, is_aca_rid: bool) -> UsbClassification {
    UsbClassification {
        max_input_ma,
        is_host,
        is_aca_rid,
    }
}

/// Map a link classification to its input ceiling.
///
/// Hosts are capped at 500 mA (USB 2.0 only). `not_configured_ma` is the
/// platform ceiling for out-of-spec chargers; without it those are not
/// allowed. [`LinkStatus::Reserved`] yields
/// [`ChargerError::HardwareCollapse`]: it carries no ceiling of its own and
/// needs the collapse recovery sequence.
pub fn classify_usb_link(
    link: LinkStatus,
    not_configured_ma: Option<i32>,
) -> Result<UsbClassification> {
    match link {
        LinkStatus::StdHostNc
        | LinkStatus::StdHostCNs
        | LinkStatus::StdHostCS
        | LinkStatus::HostChgNm
        | LinkStatus::HostChgHs
        | LinkStatus::HostChgHsChirp => Ok(class(500, true, false)),
        LinkStatus::DedicatedChg => Ok(class(1500, false, false)),
        LinkStatus::AcaRidCHs => Ok(class(900, false, false)),
        // Dedicated level minus what an accessory may draw; policy value.
        LinkStatus::AcaRidA => Ok(class(500, false, true)),
        LinkStatus::AcaRidB => Ok(class(1300, false, true)),
        LinkStatus::AcaRidCNm | LinkStatus::AcaRidCHsChirp => Ok(class(1500, false, true)),
        LinkStatus::Reserved => Err(ChargerError::HardwareCollapse),
        LinkStatus::NotValidLink | LinkStatus::NotConfigured => match not_configured_ma {
            Some(ma) => Ok(class(ma, false, false)),
            None => Err(ChargerError::NotAllowed),
        },
        LinkStatus::HmIdgnd => Err(ChargerError::NotAllowed),
    }
}

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Sample which sources are attached.
    ///
    /// With `allow_settle` the read waits out the accessory disconnect
    /// transient first: the hardware reports VBUS debounced for a while
    /// after an ACA is pulled.
    pub async fn detect_sources(&self, allow_settle: bool) -> Result<SourceMask> {
        if allow_settle {
            Timer::after(self.config.timings.settle).await;
        }
        let mut found = SourceMask::NONE;

        let main = self.regs.read(regs::CH_STATUS1).await?;
        if main & bits::MAIN_CH_DET != 0 {
            found = found | SourceMask::AC;
        }

        let usb = self.regs.read(regs::USBCH_STAT1).await?;
        trace!("USBCH_STAT1 {}", usb);
        let debounced = bits::VBUS_DET_DBNC1 | bits::VBUS_DET_DBNC100;
        if usb & debounced == debounced {
            found = found | SourceMask::USB;
        }
        Ok(found)
    }

    /// Current link classification. `IT_SOURCE21` must be read first or the
    /// line status is not refreshed.
    async fn read_link(&self) -> Result<LinkStatus> {
        self.regs.read(regs::IT_SOURCE21).await?;
        let raw = self.regs.read(regs::USB_LINE_STAT).await?;
        Ok(LinkStatus::from_line_status(raw))
    }

    /// Classify the link as it stands now.
    pub(crate) async fn read_usb_type(&self) -> Result<()> {
        let link = self.read_link().await?;
        self.apply_classification(link).await
    }

    /// Classify the link, polling while enumeration is still under way.
    pub(crate) async fn detect_usb_type(&self) -> Result<()> {
        let timings = self.config.timings;
        let mut link = LinkStatus::NotConfigured;
        for _ in 0..timings.link_poll_attempts {
            Timer::after(timings.link_poll_interval).await;
            link = self.read_link().await?;
            if link != LinkStatus::NotConfigured {
                break;
            }
        }
        let unresolved = link == LinkStatus::NotConfigured;
        match self.apply_classification(link).await {
            Err(ChargerError::NotAllowed) if unresolved => {
                warn!("USB link type did not settle");
                Err(ChargerError::Timeout)
            }
            other => other,
        }
    }

    async fn apply_classification(&self, link: LinkStatus) -> Result<()> {
        debug!("USB link {}", link.name());
        match classify_usb_link(link, self.config.usb_curr_max_nc_ma) {
            Ok(c) => {
                self.with_state(|s| {
                    s.max_usb_in_curr_ma = c.max_input_ma;
                    s.is_usb_host = c.is_host;
                    s.aca_rid = match (c.is_aca_rid, s.aca_rid) {
                        (false, _) => AcaRid::None,
                        (true, AcaRid::None) => AcaRid::Detected,
                        (true, seen) => seen,
                    };
                    s.drop.set_raw_ceiling(c.max_input_ma);
                });
                debug!("USB max input {} mA", c.max_input_ma);
                Ok(())
            }
            Err(ChargerError::HardwareCollapse) => {
                let result = self.recover_vbus_collapse().await;
                self.with_state(|s| {
                    let max = s.max_usb_in_curr_ma;
                    s.drop.set_raw_ceiling(max);
                });
                result
            }
            Err(e) => {
                error!("USB link {}: charging not allowed", link.name());
                self.with_state(|s| {
                    s.max_usb_in_curr_ma = NOT_ALLOWED_CEILING_MA;
                    s.drop.set_raw_ceiling(NOT_ALLOWED_CEILING_MA);
                });
                Err(e)
            }
        }
    }

    /// Force the USB charge path off and on again after repeated VBUS
    /// collapse, then check whether the charger came back.
    async fn recover_vbus_collapse(&self) -> Result<()> {
        if let Ok(mv) = self.convert(AdcChannel::VbusVoltage).await {
            debug!("VBUS collapsed, now {} mV", mv);
        }
        let wdog = self.regs.read(regs::MAIN_WDOG_CTRL).await?;
        trace!("MAIN_WDOG_CTRL {}", wdog);

        self.regs
            .update(regs::USBCH_CTRL1, bits::USB_CH_CTRL_MASK, bits::USB_CH_FORCE_OFF)
            .await?;
        self.regs
            .write(regs::CHARGER_CTRL, bits::DROP_COUNTER_RESET)
            .await?;
        self.regs
            .update(regs::USBCH_CTRL1, bits::USB_CH_CTRL_MASK, bits::USB_CH_FORCE_ON)
            .await?;

        let status = self.regs.read(regs::USBCH_STAT1).await?;
        let recovered = status & bits::USB_CH_ON != 0;
        self.with_state(|s| s.flags.vbus_collapsed = !recovered);
        if recovered {
            info!("recovered from VBUS collapse");
            Ok(())
        } else {
            warn!("VBUS collapsed, charger stays off");
            Err(ChargerError::HardwareCollapse)
        }
    }

    // ── deferred work ───────────────────────────────────────────────────────

    /// VBUS edge follow-up. Classification only runs here for silicon
    /// without a link status interrupt, or for a source present at boot.
    pub(crate) async fn detect_usb_type_work(&self) -> Result<()> {
        let sources = self.detect_sources(true).await?;
        if !sources.contains(SourceMask::USB) {
            debug!("VBUS gone");
            return self.vbus_teardown().await;
        }

        let classify = self.with_state(|s| {
            s.vbus_detected = true;
            if s.usb.phase == ChargerPhase::Disconnected {
                s.usb.phase = ChargerPhase::Detecting;
            }
            let at_boot = core::mem::take(&mut s.vbus_detected_start);
            self.quirks.usb_link_irq_missing || at_boot
        });
        if !classify {
            return Ok(());
        }

        self.detect_usb_type().await?;
        self.set_usb_connected(true).await?;
        self.notify_changed();
        Ok(())
    }

    /// Link status interrupt follow-up.
    pub(crate) async fn usb_link_status_work(&self) -> Result<()> {
        let sources = self.detect_sources(true).await?;
        let usb = sources.contains(SourceMask::USB);

        if usb {
            // Some out-of-spec chargers are refused by the detection logic
            // but charge fine once forced on.
            let invalid = matches!(
                self.regs.read(regs::USB_LINE_STAT).await.map(LinkStatus::from_line_status),
                Ok(LinkStatus::NotValidLink)
            );
            let state = self.with_state(|s| s.invalid_charger);
            if invalid && state == InvalidChargerState::Idle {
                warn!("invalid USB charger, forcing charger on");
                self.regs
                    .update(regs::USBCH_CTRL1, bits::CH_ENA, bits::CH_ENA)
                    .await?;
                self.regs
                    .update(
                        regs::USB_LINE_CTRL2,
                        bits::USB_CHARGER_DETECTION,
                        bits::USB_CHARGER_DETECTION,
                    )
                    .await?;
                self.with_state(|s| s.invalid_charger = InvalidChargerState::ForceStarted);
                return Ok(());
            }
            if state == InvalidChargerState::ForceStarted {
                self.regs
                    .update(regs::USB_LINE_CTRL2, bits::USB_CHARGER_DETECTION, 0)
                    .await?;
                self.with_state(|s| s.invalid_charger = InvalidChargerState::DetectionOff);
            }
        } else {
            self.with_state(|s| s.invalid_charger = InvalidChargerState::Idle);
        }

        if !usb {
            debug!("VBUS gone");
            self.queue.cancel(Work::UsbAttach);
            return self.vbus_teardown().await;
        }

        self.with_state(|s| {
            s.vbus_detected = true;
            if s.usb.phase == ChargerPhase::Disconnected {
                s.usb.phase = ChargerPhase::Detecting;
            }
        });
        match self.read_usb_type().await {
            Ok(()) => {
                let wait = self.with_state(|s| {
                    if s.aca_rid == AcaRid::Detected {
                        s.aca_rid = AcaRid::Waited;
                        true
                    } else {
                        false
                    }
                });
                if wait {
                    debug!("waiting for accessory enumeration");
                    self.queue
                        .queue_delayed(Work::UsbAttach, self.config.timings.aca_enumeration_wait);
                } else {
                    self.queue.queue(Work::UsbAttach);
                }
                Ok(())
            }
            Err(ChargerError::NotAllowed) => {
                self.with_state(|s| {
                    s.flags.report_no_charge = true;
                    s.is_usb_host = true;
                });
                self.set_usb_connected(true).await?;
                self.notify_changed();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Second half of a link status change: apply the ceiling, then report.
    pub(crate) async fn usb_attach_work(&self) -> Result<()> {
        let (online, max) = self.with_state(|s| (s.usb.online, s.max_usb_in_curr_ma));
        if online {
            self.set_vbus_input_current(max).await?;
        }
        self.set_usb_connected(true).await?;
        self.notify_changed();
        Ok(())
    }

    /// Main charger plug/unplug follow-up.
    pub(crate) async fn ac_detect_work(&self) -> Result<()> {
        let sources = self.detect_sources(true).await?;
        let present = sources.contains(SourceMask::AC);
        let changed = self.with_state(|s| {
            if s.ac.connected == present {
                return false;
            }
            s.ac.connected = present;
            s.ac_conn = present;
            s.ac.phase = if present {
                ChargerPhase::Classified
            } else {
                ChargerPhase::Disconnected
            };
            true
        });
        if !changed {
            return Ok(());
        }
        info!("main charger {}", if present { "plugged" } else { "unplugged" });
        self.update_sw_fallback().await?;
        self.notify(SupplyKind::Ac);
        Ok(())
    }
}
