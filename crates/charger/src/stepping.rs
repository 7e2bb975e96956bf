//! Current stepping engine
//!
//! The PMIC has no ramp generator of its own, so every change of a current
//! setpoint is walked one register code at a time to keep MAIN, VBUS and
//! VBAT free of dips and spikes. Lowering always runs to completion; raising
//! asks a register-specific predicate after every step and may stop short.

use core::sync::atomic::{AtomicUsize, Ordering};

use embassy_time::{Duration, Timer};
use platform::RegisterBus;

use crate::error::{ChargerError, Result};
use crate::regs::{self, bits, Reg, Registers};
use crate::tables::{Ladder, CHARGER_CURRENT, VBUS_INPUT_CURRENT};

/// Registers whose setpoint is stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentRegister {
    /// Main charger input current (`MCH_IPT_CURLVL`).
    MainInput,
    /// USB charger input current (`USBCH_IPT_CRNTLVL`).
    UsbInput,
    /// Charger output current (`CH_OPT_CRNTLVL`).
    Output,
}

impl CurrentRegister {
    /// Backing register.
    pub const fn reg(self) -> Reg {
        match self {
            Self::MainInput => regs::MCH_IPT_CURLVL,
            Self::UsbInput => regs::USBCH_IPT_CRNTLVL,
            Self::Output => regs::CH_OPT_CRNTLVL,
        }
    }

    /// Position of the code within the register.
    pub const fn shift(self) -> u8 {
        match self {
            Self::MainInput | Self::UsbInput => bits::INPUT_CURR_SHIFT,
            Self::Output => 0,
        }
    }

    /// Table translating mA to codes.
    pub const fn ladder(self) -> &'static Ladder {
        match self {
            Self::MainInput | Self::Output => &CHARGER_CURRENT,
            Self::UsbInput => &VBUS_INPUT_CURRENT,
        }
    }

    /// Short label for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::MainInput => "main-input",
            Self::UsbInput => "usb-input",
            Self::Output => "output",
        }
    }
}

impl TryFrom<u8> for CurrentRegister {
    type Error = ChargerError;

    /// Resolve a charger-bank register address.
    fn try_from(addr: u8) -> Result<Self> {
        [Self::MainInput, Self::UsbInput, Self::Output]
            .into_iter()
            .find(|r| r.reg().addr == addr)
            .ok_or(ChargerError::InvalidRegister)
    }
}

/// Count of stepping operations in flight.
#[derive(Debug, Default)]
pub struct SteppingSessions(AtomicUsize);

impl SteppingSessions {
    /// No sessions.
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Sessions currently running.
    pub fn active(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Open a session, closed again when the guard drops.
    pub fn begin(&self) -> SessionGuard<'_> {
        self.0.fetch_add(1, Ordering::AcqRel);
        SessionGuard(self)
    }
}

/// Open stepping session.
#[must_use = "the session ends when the guard is dropped"]
pub struct SessionGuard<'a>(&'a SteppingSessions);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// How one `step_current` call may proceed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepPolicy {
    /// Base inter-step delay.
    pub step_delay: Duration,
    /// `false` when the source behind the register is absent: the target
    /// code is written in one go.
    pub stepping_allowed: bool,
}

fn times(base: Duration, factor: u64) -> Duration {
    Duration::from_ticks(base.as_ticks().saturating_mul(factor))
}

/// Move `register` to the code for `target_ma`, one code per write.
///
/// `keep_raising` is asked after each upward step; returning `false` stops
/// below the target without error.
pub(crate) async fn step_current<B, F>(
    regs: &Registers<B>,
    sessions: &SteppingSessions,
    register: CurrentRegister,
    target_ma: i32,
    policy: StepPolicy,
    keep_raising: F,
) -> Result<()>
where
    B: RegisterBus,
    F: Fn() -> bool,
{
    let _session = sessions.begin();

    let target = register.ladder().encode(target_ma).map_err(|e| {
        error!("{} current {} mA out of range", register.name(), target_ma);
        e
    })?;
    let shift = u32::from(register.shift());
    let reg = register.reg();

    let mut prev = regs.read(reg).await?.wrapping_shr(shift);
    let delay = match register {
        CurrentRegister::MainInput => policy.step_delay,
        CurrentRegister::UsbInput => times(policy.step_delay, 10),
        CurrentRegister::Output if target == 0 => policy.step_delay,
        CurrentRegister::Output if target.saturating_sub(prev) > 1 => times(policy.step_delay, 10),
        CurrentRegister::Output => policy.step_delay,
    };

    if register == CurrentRegister::UsbInput {
        // Never step through a range the hardware already limited on its own.
        let auto = regs
            .read(regs::USBCH_STAT2)
            .await?
            .wrapping_shr(u32::from(bits::AUTO_VBUS_IN_CURR_LIM_SHIFT));
        trace!(
            "auto VBUS input limit {} mA",
            VBUS_INPUT_CURRENT.decode(auto).unwrap_or(0)
        );
        prev = prev.min(auto);
    }

    if prev == target {
        debug!("{} current unchanged", register.name());
        return Ok(());
    }
    debug!("{} current -> {} mA", register.name(), target_ma);

    if !policy.stepping_allowed {
        return regs.write(reg, target.wrapping_shl(shift)).await;
    }

    if prev > target {
        for code in (target..prev).rev() {
            regs.write(reg, code.wrapping_shl(shift)).await?;
            if code != target {
                Timer::after(delay).await;
            }
        }
    } else {
        for code in prev.saturating_add(1)..=target {
            regs.write(reg, code.wrapping_shl(shift)).await?;
            if code != target {
                Timer::after(delay).await;
            }
            if !keep_raising() {
                debug!("{} stepping stopped at code {}", register.name(), code);
                break;
            }
        }
    }
    Ok(())
}
