//! System suspend, resume and teardown

use embassy_time::{Duration, Instant};
use platform::{Gpadc, RegisterBus};

use crate::dispatch::Work;
use crate::driver::Charger;
use crate::error::{ChargerError, Result};
use crate::regs::{self, bits};
use crate::state::SupplyKind;

/// Link classification work that must drain before a suspend.
const CLASSIFICATION: [Work; 3] = [Work::DetectUsbType, Work::UsbLinkStatus, Work::UsbAttach];

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Prepare for a system suspend.
    ///
    /// Parks the fault recheck and the drop-end retry, waits for a running
    /// VBUS detection to finish and refuses with [`ChargerError::Busy`] while
    /// hardware is mid-transition or link classification has not drained. A
    /// refused suspend re-arms what it parked; otherwise
    /// [`Charger::resume`] must follow.
    ///
    /// Draining detection needs the workers of [`Charger::run`].
    pub async fn suspend(&self) -> Result<()> {
        self.queue.cancel(Work::CheckHwFailure);
        if let Some(left) = self.queue.remaining(Work::VbusDropEnd) {
            let deadline = Instant::now().checked_add(left).unwrap_or(Instant::MAX);
            self.with_state(|s| s.drop_retry_deadline = Some(deadline));
            self.queue.cancel(Work::VbusDropEnd);
        }

        self.queue.flush(Work::DetectUsbType).await;

        let stepping = self.stepping.active();
        let classifying = CLASSIFICATION
            .into_iter()
            .any(|work| self.queue.pending(work) || self.queue.is_running(work));
        if stepping > 0 || classifying {
            warn!(
                "suspend refused: {} stepping sessions, classification busy {}",
                stepping,
                classifying
            );
            self.resume().await;
            return Err(ChargerError::Busy);
        }
        debug!("charger suspended");
        Ok(())
    }

    /// Undo [`Charger::suspend`]: restart the watchdog keep-alive, pending
    /// fault rechecks and the drop-end retry. A retry whose deadline passed
    /// while suspended runs at once.
    pub async fn resume(&self) {
        let (ac_conn, hw_fault, drop_ended, deadline) = self.with_state(|s| {
            (
                s.ac_conn,
                s.flags.vbus_overvoltage || s.flags.main_ext_not_ok,
                s.flags.vbus_drop_ended,
                s.drop_retry_deadline.take(),
            )
        });

        if ac_conn && self.quirks.watchdog_kick_required {
            if let Err(e) = self.kick_watchdog().await {
                warn!("watchdog kick on resume: {}", e.name());
            }
            self.queue
                .queue_delayed(Work::KickWatchdog, self.config.timings.watchdog_kick);
        }
        if hw_fault {
            self.queue.queue(Work::CheckHwFailure);
        }
        if drop_ended {
            let left = deadline.map_or(Duration::from_ticks(0), |at| {
                at.saturating_duration_since(Instant::now())
            });
            self.queue.queue_delayed(Work::VbusDropEnd, left);
        }
        debug!("charger resumed");
    }

    /// Stop USB charging, release the backup battery charger and shut the
    /// work queue down. [`Charger::run`] returns once in-flight jobs are
    /// finished. Nothing can be queued afterwards.
    pub async fn teardown(&self) {
        if let Err(e) = self.enable(SupplyKind::Usb, false, 0, 0).await {
            error!("disabling USB charging on teardown: {}", e.name());
        }
        if self.config.backup_charger.is_some() {
            if let Err(e) = self
                .regs
                .update(regs::RTC_CTRL, bits::RTC_BUP_CH_ENA, 0)
                .await
            {
                error!("backup charging left on: {}", e.name());
            }
        }
        self.queue.close();
        info!("charger torn down");
    }
}
