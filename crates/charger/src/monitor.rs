//! Fault pollers
//!
//! Each latched fault flag is cleared by exactly one of these tasks once the
//! hardware status bit reads deasserted. Thermal edges only trigger a fresh
//! read; there is no separate entering/leaving logic.

use platform::{Gpadc, RegisterBus};

use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::Result;
use crate::regs::{self, bits};
use crate::state::SupplyKind;

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    pub(crate) async fn check_usb_thermal_work(&self) -> Result<()> {
        let status = self.regs.read(regs::USBCH_STAT2).await?;
        let hot = status & bits::USB_CH_TH_PROT != 0;
        self.with_state(|s| s.flags.usb_thermal_prot = hot);
        debug!("USB thermal protection {}", hot);
        self.notify_changed();
        Ok(())
    }

    pub(crate) async fn check_main_thermal_work(&self) -> Result<()> {
        let status = self.regs.read(regs::CH_STATUS2).await?;
        let hot = status & bits::MAIN_CH_TH_PROT != 0;
        self.with_state(|s| s.flags.main_thermal_prot = hot);
        debug!("main thermal protection {}", hot);
        self.notify(SupplyKind::Ac);
        Ok(())
    }

    /// Rechecks every fault period while the charger reports "not ok".
    pub(crate) async fn check_usb_charger_not_ok_work(&self) -> Result<()> {
        let status = self.regs.read(regs::USBCH_STAT2).await?;
        let not_ok = status & bits::VBUS_CH_NOK != 0;
        let changed = self.with_state(|s| {
            let before = s.flags.usb_charger_not_ok;
            s.flags.usb_charger_not_ok = not_ok;
            if !not_ok {
                s.flags.vbus_collapsed = false;
            }
            before != not_ok
        });
        if not_ok {
            self.queue.queue_delayed(
                Work::CheckUsbChargerNotOk,
                self.config.timings.fault_recheck,
            );
        }
        if changed {
            self.notify_changed();
        }
        Ok(())
    }

    /// Clears overvoltage and external charger faults once deasserted,
    /// rechecking while either is still latched.
    pub(crate) async fn check_hw_failure_work(&self) -> Result<()> {
        let (ovv, main_nok) =
            self.with_state(|s| (s.flags.vbus_overvoltage, s.flags.main_ext_not_ok));

        if ovv {
            let status = self.regs.read(regs::USBCH_STAT2).await?;
            if status & bits::VBUS_OVV_TH == 0 {
                info!("VBUS overvoltage cleared");
                self.with_state(|s| s.flags.vbus_overvoltage = false);
                self.notify(SupplyKind::Usb);
            }
        }
        if main_nok {
            let status = self.regs.read(regs::CH_STATUS2).await?;
            if status & bits::MAIN_CH_NOK == 0 {
                info!("main charger fault cleared");
                self.with_state(|s| s.flags.main_ext_not_ok = false);
                self.notify(SupplyKind::Ac);
            }
        }

        let latched =
            self.with_state(|s| s.flags.vbus_overvoltage || s.flags.main_ext_not_ok);
        if latched {
            self.queue
                .queue_delayed(Work::CheckHwFailure, self.config.timings.fault_recheck);
        }
        Ok(())
    }
}
