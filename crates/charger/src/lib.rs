//! AB8500 battery charger control core
//!
//! Detects and classifies the attached power sources (main charger, USB host
//! port, dedicated USB charger, accessory adapters), steps the input and
//! output current limits towards the setpoints requested by the charging
//! algorithm, recovers from VBUS collapse and reports state changes to the
//! power-supply consumer.
//!
//! # Architecture
//!
//! ```text
//! PMIC interrupts ──► Charger::handle_irq ──► WorkQueue ──► workers (Charger::run)
//! USB stack ────────► Charger::usb_power_budget ──┘              │
//!                                                                ▼
//! Charging algorithm ─► enable / update_output_current ──► Registers (platform::RegisterBus)
//!                                                                │
//! Consumer ◄── wait_change / health / present / online ◄── ChargerState
//! ```
//!
//! Interrupt handlers only latch flags and queue work; every register
//! transaction happens in a worker or in a call from the charging
//! algorithm.
//!
//! # Features
//!
//! - `std`: `std::error::Error` impls and the platform mocks
//! - `defmt`: embedded logging and `defmt::Format` derives
//! - `tracing`: host logging
//!
//! # Example
//!
//! ```no_run
//! use charger::{Charger, ChargerConfig, Quirks};
//! use platform::{Gpadc, RegisterBus};
//!
//! async fn example<B: RegisterBus, A: Gpadc>(bus: B, adc: A, revision: u8) {
//!     let charger = Charger::new(bus, adc, ChargerConfig::default(), Quirks::from_revision(revision));
//!     if charger.start().await.is_err() {
//!         return;
//!     }
//!     let consumer = async {
//!         loop {
//!             let kind = charger.wait_change().await;
//!             if charger.present(kind) && !charger.online(kind) {
//!                 let _ = charger.enable(kind, true, 4200, 500).await;
//!             }
//!         }
//!     };
//!     embassy_futures::join::join(charger.run(), consumer).await;
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[cfg(feature = "std")]
extern crate std;

// Must come first so the log macros are visible to every module below.
mod fmt;

pub mod config;
pub mod control;
pub mod detect;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod init;
pub mod monitor;
pub mod pm;
pub mod properties;
pub mod regs;
pub mod state;
pub mod stepping;
pub mod tables;
pub mod usb;
pub mod vbus_drop;

pub use config::{BackupCharger, ChargerConfig, Quirks, Timings};
pub use detect::{classify_usb_link, LinkStatus, SourceMask, UsbClassification};
pub use dispatch::{Irq, Work, WorkQueue};
pub use driver::Charger;
pub use error::{ChargerError, Result};
pub use state::{
    AcaRid, ChargerInstance, ChargerPhase, ChargerState, EventFlags, Health, InvalidChargerState,
    SupplyKind, UsbLinkState, UsbState,
};
pub use stepping::CurrentRegister;
pub use tables::Ladder;
pub use vbus_drop::{DropOutcome, VbusDropState};
