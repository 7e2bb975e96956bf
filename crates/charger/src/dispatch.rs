//! Interrupt dispatch and the deferred work queue
//!
//! Interrupt callbacks never touch the bus. [`Charger::handle_irq`] latches
//! the flag the event owns and queues exactly one [`Work`] item; a small pool
//! of workers started by [`Charger::run`] executes queued items, and a timer
//! task releases delayed ones when their deadline passes.
//!
//! Each work kind is queued at most once at a time (queueing an already
//! pending kind is a no-op) and never runs concurrently with itself.

use core::cell::RefCell;

use embassy_futures::join::join4;
use embassy_futures::select::select;
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use platform::{Gpadc, RegisterBus};

use crate::driver::Charger;
use crate::error::Result;
use crate::state::SupplyKind;

// ---------------------------------------------------------------------------
// Interrupt sources
// ---------------------------------------------------------------------------

/// Named PMIC interrupt sources handled by the charger core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Irq {
    /// VBUS rising edge.
    VbusDetRising,
    /// VBUS falling edge.
    VbusDetFalling,
    /// USB link status changed.
    UsbLinkStatus,
    /// Die temperature above the USB charger thermal threshold.
    UsbThermalRising,
    /// Die temperature back below the USB charger thermal threshold.
    UsbThermalFalling,
    /// USB charger not OK.
    UsbChargerNotOk,
    /// VBUS overvoltage.
    VbusOvervoltage,
    /// Charger watchdog expired.
    WatchdogExpired,
    /// Input current auto-limiting ended.
    VbusDropEnd,
    /// Main charger plugged.
    MainPlug,
    /// Main charger unplugged.
    MainUnplug,
    /// Die temperature above the main charger thermal threshold.
    MainThermalRising,
    /// Die temperature back below the main charger thermal threshold.
    MainThermalFalling,
    /// External main charger not OK.
    MainExtNotOk,
}

impl Irq {
    /// Every source, in registration order.
    pub const ALL: [Irq; 14] = [
        Irq::MainExtNotOk,
        Irq::MainThermalRising,
        Irq::MainThermalFalling,
        Irq::MainUnplug,
        Irq::MainPlug,
        Irq::VbusDetFalling,
        Irq::VbusDetRising,
        Irq::UsbLinkStatus,
        Irq::UsbThermalRising,
        Irq::UsbThermalFalling,
        Irq::UsbChargerNotOk,
        Irq::VbusOvervoltage,
        Irq::WatchdogExpired,
        Irq::VbusDropEnd,
    ];

    /// Datasheet interrupt name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::VbusDetRising => "VBUS_DET_R",
            Self::VbusDetFalling => "VBUS_DET_F",
            Self::UsbLinkStatus => "USB_LINK_STATUS",
            Self::UsbThermalRising => "USB_CH_TH_PROT_R",
            Self::UsbThermalFalling => "USB_CH_TH_PROT_F",
            Self::UsbChargerNotOk => "USB_CHARGER_NOT_OKR",
            Self::VbusOvervoltage => "VBUS_OVV",
            Self::WatchdogExpired => "CH_WD_EXP",
            Self::VbusDropEnd => "VBUS_CH_DROP_END",
            Self::MainPlug => "MAIN_CH_PLUG_DET",
            Self::MainUnplug => "MAIN_CH_UNPLUG_DET",
            Self::MainThermalRising => "MAIN_CH_TH_PROT_R",
            Self::MainThermalFalling => "MAIN_CH_TH_PROT_F",
            Self::MainExtNotOk => "MAIN_EXT_CH_NOT_OK",
        }
    }

    /// Look a source up by its datasheet name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|irq| irq.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Deferred work kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Work {
    /// Re-read VBUS presence and classify the USB source if needed.
    DetectUsbType,
    /// React to a USB link status change.
    UsbLinkStatus,
    /// Apply the input limit and report the USB source connected.
    UsbAttach,
    /// Commit a staged USB power budget.
    UsbStateChanged,
    /// Poll the USB thermal protection bit.
    CheckUsbThermal,
    /// Poll the main thermal protection bit.
    CheckMainThermal,
    /// Poll the USB charger not-OK bit.
    CheckUsbChargerNotOk,
    /// Poll overvoltage and external charger faults.
    CheckHwFailure,
    /// Periodic charger watchdog kick.
    KickWatchdog,
    /// Re-probe the input limit after a VBUS drop.
    VbusDropEnd,
    /// Periodic battery voltage check.
    CheckVbat,
    /// Re-read main charger presence.
    AcDetect,
}

/// Number of [`Work`] kinds.
pub const WORK_KINDS: usize = 12;

impl Work {
    /// Every kind.
    pub const ALL: [Work; WORK_KINDS] = [
        Work::DetectUsbType,
        Work::UsbLinkStatus,
        Work::UsbAttach,
        Work::UsbStateChanged,
        Work::CheckUsbThermal,
        Work::CheckMainThermal,
        Work::CheckUsbChargerNotOk,
        Work::CheckHwFailure,
        Work::KickWatchdog,
        Work::VbusDropEnd,
        Work::CheckVbat,
        Work::AcDetect,
    ];

    /// Slot index.
    pub const fn index(self) -> usize {
        match self {
            Self::DetectUsbType => 0,
            Self::UsbLinkStatus => 1,
            Self::UsbAttach => 2,
            Self::UsbStateChanged => 3,
            Self::CheckUsbThermal => 4,
            Self::CheckMainThermal => 5,
            Self::CheckUsbChargerNotOk => 6,
            Self::CheckHwFailure => 7,
            Self::KickWatchdog => 8,
            Self::VbusDropEnd => 9,
            Self::CheckVbat => 10,
            Self::AcDetect => 11,
        }
    }

    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::DetectUsbType => "detect-usb-type",
            Self::UsbLinkStatus => "usb-link-status",
            Self::UsbAttach => "usb-attach",
            Self::UsbStateChanged => "usb-state-changed",
            Self::CheckUsbThermal => "check-usb-thermal",
            Self::CheckMainThermal => "check-main-thermal",
            Self::CheckUsbChargerNotOk => "check-usb-charger-not-ok",
            Self::CheckHwFailure => "check-hw-failure",
            Self::KickWatchdog => "kick-watchdog",
            Self::VbusDropEnd => "vbus-drop-end",
            Self::CheckVbat => "check-vbat",
            Self::AcDetect => "ac-detect",
        }
    }
}

// ---------------------------------------------------------------------------
// WorkQueue
// ---------------------------------------------------------------------------

/// Number of concurrent workers.
pub const WORKERS: usize = 3;

/// One entry per kind plus the stop tokens, with headroom.
const JOB_DEPTH: usize = 2 * WORK_KINDS + WORKERS;

#[derive(Debug, Clone, Copy)]
enum Job {
    Run(Work),
    Stop,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Waiting for a worker.
    queued: bool,
    /// A job for this kind sits in the channel.
    in_channel: bool,
    /// Delayed queueing deadline.
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueState {
    slots: [Slot; WORK_KINDS],
    closed: bool,
}

impl QueueState {
    fn slot(&mut self, work: Work) -> Option<&mut Slot> {
        self.slots.get_mut(work.index())
    }
}

/// Coalescing work queue with per-kind delayed scheduling.
pub struct WorkQueue {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<QueueState>>,
    jobs: Channel<CriticalSectionRawMutex, Job, JOB_DEPTH>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    running: [Mutex<CriticalSectionRawMutex, ()>; WORK_KINDS],
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Empty, open queue.
    pub fn new() -> Self {
        Self {
            state: BlockingMutex::new(RefCell::new(QueueState::default())),
            jobs: Channel::new(),
            wake: Signal::new(),
            running: core::array::from_fn(|_| Mutex::new(())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    /// Mark `work` queued; `true` if a job must be pushed to the channel.
    fn mark(state: &mut QueueState, work: Work) -> bool {
        match state.slot(work) {
            Some(slot) if !slot.queued => {
                slot.queued = true;
                slot.deadline = None;
                let push = !slot.in_channel;
                slot.in_channel = true;
                push
            }
            _ => false,
        }
    }

    fn push(&self, work: Work) {
        if self.jobs.try_send(Job::Run(work)).is_err() {
            // Unreachable with one in-channel job per kind.
            error!("work channel full, dropping {}", work.name());
            self.with(|s| {
                if let Some(slot) = s.slot(work) {
                    slot.queued = false;
                    slot.in_channel = false;
                }
            });
        }
    }

    /// Queue `work` now. Returns `false` if it was already pending or the
    /// queue is closed.
    pub fn queue(&self, work: Work) -> bool {
        let (accepted, push) = self.with(|s| {
            if s.closed {
                return (false, false);
            }
            let busy = s
                .slot(work)
                .map_or(true, |slot| slot.queued || slot.deadline.is_some());
            if busy {
                return (false, false);
            }
            (true, Self::mark(s, work))
        });
        if push {
            self.push(work);
        }
        accepted
    }

    /// Queue `work` once `delay` has passed. A zero delay queues now.
    /// Returns `false` if it was already pending or the queue is closed.
    pub fn queue_delayed(&self, work: Work, delay: Duration) -> bool {
        if delay == Duration::from_ticks(0) {
            return self.queue(work);
        }
        let deadline = Instant::now().checked_add(delay).unwrap_or(Instant::MAX);
        let accepted = self.with(|s| {
            if s.closed {
                return false;
            }
            match s.slot(work) {
                Some(slot) if !slot.queued && slot.deadline.is_none() => {
                    slot.deadline = Some(deadline);
                    true
                }
                _ => false,
            }
        });
        if accepted {
            trace!("{} due in {} ms", work.name(), delay.as_millis());
            self.wake.signal(());
        }
        accepted
    }

    /// Drop a pending `work`, queued or delayed. A running instance is not
    /// interrupted.
    pub fn cancel(&self, work: Work) -> bool {
        self.with(|s| match s.slot(work) {
            Some(slot) => {
                let was = slot.queued || slot.deadline.is_some();
                slot.queued = false;
                slot.deadline = None;
                was
            }
            None => false,
        })
    }

    /// `true` while `work` is queued or delayed.
    pub fn pending(&self, work: Work) -> bool {
        self.with(|s| {
            s.slot(work)
                .is_some_and(|slot| slot.queued || slot.deadline.is_some())
        })
    }

    /// `true` while a worker is executing `work`.
    pub fn is_running(&self, work: Work) -> bool {
        self.running
            .get(work.index())
            .is_some_and(|running| running.try_lock().is_err())
    }

    /// Time left before a delayed `work` is queued.
    pub fn remaining(&self, work: Work) -> Option<Duration> {
        let deadline = self.with(|s| s.slot(work).and_then(|slot| slot.deadline))?;
        Some(
            deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::from_ticks(0)),
        )
    }

    /// Wait until a queued `work` has been picked up and finished.
    ///
    /// Needs the workers of [`Charger::run`] to be alive.
    pub async fn flush(&self, work: Work) {
        while self.with(|s| s.slot(work).is_some_and(|slot| slot.queued)) {
            yield_now().await;
        }
        if let Some(running) = self.running.get(work.index()) {
            let _done = running.lock().await;
        }
    }

    /// Refuse new work, drop pending work and stop every worker once its
    /// current job is finished.
    pub fn close(&self) {
        self.with(|s| {
            s.closed = true;
            for slot in &mut s.slots {
                slot.queued = false;
                slot.deadline = None;
            }
        });
        for _ in 0..WORKERS {
            if self.jobs.try_send(Job::Stop).is_err() {
                error!("work channel full while closing");
            }
        }
        self.wake.signal(());
    }

    /// `true` once [`WorkQueue::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }

    /// Claim a dequeued job. `false` if it was cancelled meanwhile.
    fn begin(&self, work: Work) -> bool {
        self.with(|s| match s.slot(work) {
            Some(slot) => {
                slot.in_channel = false;
                let run = slot.queued;
                slot.queued = false;
                run
            }
            None => false,
        })
    }

    async fn run_timers(&self) {
        loop {
            let next = self.with(|s| {
                if s.closed {
                    return Err(());
                }
                Ok(s.slots.iter().filter_map(|slot| slot.deadline).min())
            });
            match next {
                Err(()) => return,
                Ok(Some(at)) => {
                    select(Timer::at(at), self.wake.wait()).await;
                }
                Ok(None) => self.wake.wait().await,
            }

            let now = Instant::now();
            for work in Work::ALL {
                let push = self.with(|s| {
                    let Some(slot) = s.slot(work) else {
                        return false;
                    };
                    if !slot.deadline.is_some_and(|d| d <= now) {
                        return false;
                    }
                    slot.deadline = None;
                    Self::mark(s, work)
                });
                if push {
                    self.push(work);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Charger glue
// ---------------------------------------------------------------------------

impl<B: RegisterBus, A: Gpadc> Charger<B, A> {
    /// Interrupt entry point. Never blocks and never touches the bus.
    pub fn handle_irq(&self, irq: Irq) {
        debug!("irq {}", irq.name());
        match irq {
            Irq::VbusDetRising | Irq::VbusDetFalling => {
                self.with_state(|s| s.vbus_detected = irq == Irq::VbusDetRising);
                self.queue.queue(Work::DetectUsbType);
            }
            Irq::UsbLinkStatus => {
                self.queue.queue(Work::UsbLinkStatus);
            }
            Irq::UsbThermalRising | Irq::UsbThermalFalling => {
                self.queue.queue(Work::CheckUsbThermal);
            }
            Irq::UsbChargerNotOk => {
                self.queue.queue(Work::CheckUsbChargerNotOk);
            }
            Irq::VbusOvervoltage => {
                self.with_state(|s| s.flags.vbus_overvoltage = true);
                self.notify(SupplyKind::Usb);
                self.queue.queue(Work::CheckHwFailure);
            }
            Irq::WatchdogExpired => {
                // Only the charger that was online needs a restart.
                let expired = self.with_state(|s| {
                    let mut any = false;
                    for kind in [SupplyKind::Ac, SupplyKind::Usb] {
                        let instance = s.instance_mut(kind);
                        if instance.online {
                            instance.watchdog_expired = true;
                            any = true;
                        }
                    }
                    if any {
                        s.flags.watchdog_expired = true;
                    }
                    any
                });
                if expired {
                    self.notify_changed();
                }
            }
            Irq::VbusDropEnd => {
                let delay = self.with_state(|s| {
                    s.flags.vbus_drop_ended = true;
                    s.drop.retry_delay(self.config.timings.drop_retry_unit)
                });
                self.queue.queue_delayed(Work::VbusDropEnd, delay);
            }
            Irq::MainPlug | Irq::MainUnplug => {
                self.queue.queue(Work::AcDetect);
            }
            Irq::MainThermalRising | Irq::MainThermalFalling => {
                self.queue.queue(Work::CheckMainThermal);
            }
            Irq::MainExtNotOk => {
                self.with_state(|s| s.flags.main_ext_not_ok = true);
                self.notify(SupplyKind::Ac);
                self.queue.queue(Work::CheckHwFailure);
            }
        }
    }

    /// Drive the work queue: the delay timer plus [`WORKERS`] workers.
    ///
    /// Returns after [`Charger::teardown`] once in-flight jobs finished.
    pub async fn run(&self) {
        info!("charger work queue running");
        join4(
            self.queue.run_timers(),
            self.worker(0),
            self.worker(1),
            self.worker(2),
        )
        .await;
        info!("charger work queue stopped");
    }

    async fn worker(&self, id: u8) {
        loop {
            let work = match self.queue.jobs.receive().await {
                Job::Stop => return,
                Job::Run(work) => work,
            };
            let Some(running) = self.queue.running.get(work.index()) else {
                continue;
            };
            let _running = running.lock().await;
            if !self.queue.begin(work) {
                trace!("worker {}: {} cancelled", id, work.name());
                continue;
            }
            trace!("worker {}: {}", id, work.name());
            if let Err(e) = self.execute(work).await {
                warn!("{} failed: {}", work.name(), e.name());
            }
        }
    }

    async fn execute(&self, work: Work) -> Result<()> {
        match work {
            Work::DetectUsbType => self.detect_usb_type_work().await,
            Work::UsbLinkStatus => self.usb_link_status_work().await,
            Work::UsbAttach => self.usb_attach_work().await,
            Work::UsbStateChanged => self.usb_state_changed_work().await,
            Work::CheckUsbThermal => self.check_usb_thermal_work().await,
            Work::CheckMainThermal => self.check_main_thermal_work().await,
            Work::CheckUsbChargerNotOk => self.check_usb_charger_not_ok_work().await,
            Work::CheckHwFailure => self.check_hw_failure_work().await,
            Work::KickWatchdog => self.kick_watchdog_work().await,
            Work::VbusDropEnd => self.vbus_drop_end_work().await,
            Work::CheckVbat => self.check_vbat_work().await,
            Work::AcDetect => self.ac_detect_work().await,
        }
    }
}
