//! Hardware abstraction layer for the AB8500 charger core
//!
//! The charger logic never touches a bus directly. Everything it needs from
//! the PMIC goes through two narrow traits defined here, so the same core runs
//! against real silicon, a host simulator, or the recording mocks used in
//! tests.
//!
//! # Architecture Layers
//!
//! ```text
//! Charger core (charger crate)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Transport (I2C via embedded-hal-async, or a vendor PRCMU bridge)
//! ```
//!
//! # Abstractions
//!
//! - [`RegisterBus`] - banked 8-bit register access with read-modify-write
//! - [`Gpadc`] - general-purpose ADC conversions on the charger channels
//! - [`I2cRegisterBus`] - `RegisterBus` over any `embedded_hal_async::i2c::I2c`
//!
//! # Features
//!
//! - `std`: Enable standard library support and the [`mocks`] module
//! - `defmt`: Enable defmt derives on public types
//!
//! # Example
//!
//! ```no_run
//! use platform::RegisterBus;
//!
//! async fn example<B: RegisterBus>(bus: &mut B) {
//!     let status = bus.read(0x0B, 0x00).await;
//!     let _ = status;
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
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // accessors; callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

#[cfg(feature = "std")]
extern crate std;

pub mod adc;
pub mod i2c;
pub mod mocks;
pub mod register;

pub use adc::{AdcChannel, Gpadc};
pub use i2c::I2cRegisterBus;
pub use register::{BusError, RegisterBus};
