//! Mock implementations for testing
//!
//! Recording stand-ins for [`RegisterBus`] and [`Gpadc`]. Both are cheap
//! handles over shared state: clone one into the code under test and keep
//! the other to preset registers and inspect what was written.

#![cfg(any(test, feature = "std"))]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use crate::adc::{AdcChannel, Gpadc};
use crate::register::{BusError, RegisterBus};

/// `(bank, address)` key.
pub type RegKey = (u8, u8);

#[derive(Default)]
struct RegisterState {
    values: BTreeMap<RegKey, u8>,
    queued: BTreeMap<RegKey, VecDeque<u8>>,
    writes: Vec<(u8, u8, u8)>,
    reads: Vec<RegKey>,
    failing_reads: BTreeSet<RegKey>,
    failing_writes: BTreeSet<RegKey>,
}

/// In-memory register file that records every access.
///
/// Unset registers read as `0`. A register with queued values returns them
/// in order before falling back to its stored value.
#[derive(Clone, Default)]
pub struct MockRegisterBus {
    state: Arc<Mutex<RegisterState>>,
}

impl MockRegisterBus {
    /// Create an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegisterState> {
        // A panicking test thread must not hide the recorded state from others.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Preset a register without recording a write.
    pub fn set(&self, bank: u8, addr: u8, value: u8) {
        self.lock().values.insert((bank, addr), value);
    }

    /// Current stored value of a register.
    pub fn get(&self, bank: u8, addr: u8) -> u8 {
        self.lock().values.get(&(bank, addr)).copied().unwrap_or(0)
    }

    /// Queue values to be returned by successive reads of one register.
    pub fn queue_reads(&self, bank: u8, addr: u8, values: &[u8]) {
        self.lock()
            .queued
            .entry((bank, addr))
            .or_default()
            .extend(values.iter().copied());
    }

    /// Make every read of this register fail with [`BusError::Nack`].
    pub fn fail_reads(&self, bank: u8, addr: u8) {
        self.lock().failing_reads.insert((bank, addr));
    }

    /// Make every write to this register fail with [`BusError::Nack`].
    pub fn fail_writes(&self, bank: u8, addr: u8) {
        self.lock().failing_writes.insert((bank, addr));
    }

    /// Undo [`fail_reads`](Self::fail_reads) and [`fail_writes`](Self::fail_writes).
    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }

    /// Every successful write as `(bank, address, value)`, oldest first.
    pub fn writes(&self) -> Vec<(u8, u8, u8)> {
        self.lock().writes.clone()
    }

    /// Values written to one register, oldest first.
    pub fn writes_to(&self, bank: u8, addr: u8) -> Vec<u8> {
        self.lock()
            .writes
            .iter()
            .filter(|(b, a, _)| *b == bank && *a == addr)
            .map(|(_, _, v)| *v)
            .collect()
    }

    /// Number of reads issued against one register.
    pub fn read_count(&self, bank: u8, addr: u8) -> usize {
        self.lock()
            .reads
            .iter()
            .filter(|key| **key == (bank, addr))
            .count()
    }

    /// Forget recorded reads and writes. Register values are kept.
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.writes.clear();
        state.reads.clear();
    }
}

impl RegisterBus for MockRegisterBus {
    type Error = BusError;

    async fn read(&mut self, bank: u8, addr: u8) -> Result<u8, BusError> {
        let mut state = self.lock();
        let key = (bank, addr);
        state.reads.push(key);
        if state.failing_reads.contains(&key) {
            return Err(BusError::Nack);
        }
        if let Some(value) = state.queued.get_mut(&key).and_then(VecDeque::pop_front) {
            state.values.insert(key, value);
            return Ok(value);
        }
        Ok(state.values.get(&key).copied().unwrap_or(0))
    }

    async fn write(&mut self, bank: u8, addr: u8, value: u8) -> Result<(), BusError> {
        let mut state = self.lock();
        let key = (bank, addr);
        if state.failing_writes.contains(&key) {
            return Err(BusError::Nack);
        }
        state.values.insert(key, value);
        state.writes.push((bank, addr, value));
        Ok(())
    }
}

#[derive(Default)]
struct AdcState {
    values: [i32; 4],
    failing: bool,
    conversions: usize,
}

/// GPADC returning preset values per channel.
#[derive(Clone, Default)]
pub struct MockGpadc {
    state: Arc<Mutex<AdcState>>,
}

impl MockGpadc {
    /// Create a GPADC that reads `0` on every channel.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AdcState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Preset the result for one channel.
    pub fn set(&self, channel: AdcChannel, value: i32) {
        if let Some(slot) = self.lock().values.get_mut(channel.index()) {
            *slot = value;
        }
    }

    /// Make every conversion fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Number of conversions requested so far.
    pub fn conversions(&self) -> usize {
        self.lock().conversions
    }
}

impl Gpadc for MockGpadc {
    type Error = BusError;

    async fn convert(&mut self, channel: AdcChannel) -> Result<i32, BusError> {
        let mut state = self.lock();
        state.conversions = state.conversions.saturating_add(1);
        if state.failing {
            return Err(BusError::Bus);
        }
        Ok(state.values.get(channel.index()).copied().unwrap_or(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_reads_drain_before_stored_value() {
        let mut bus = MockRegisterBus::new();
        bus.set(0x05, 0x80, 0x00);
        bus.queue_reads(0x05, 0x80, &[0x08, 0x10]);

        assert_eq!(bus.read(0x05, 0x80).await.unwrap(), 0x08);
        assert_eq!(bus.read(0x05, 0x80).await.unwrap(), 0x10);
        assert_eq!(bus.read(0x05, 0x80).await.unwrap(), 0x10);
        assert_eq!(bus.read_count(0x05, 0x80), 3);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let handle = MockRegisterBus::new();
        let mut bus = handle.clone();

        bus.write(0x0B, 0x56, 0x01).await.unwrap();

        assert_eq!(handle.get(0x0B, 0x56), 0x01);
        assert_eq!(handle.writes_to(0x0B, 0x56), vec![0x01]);
    }

    #[tokio::test]
    async fn failing_write_is_not_recorded() {
        let mut bus = MockRegisterBus::new();
        bus.fail_writes(0x0B, 0x56);

        assert_eq!(bus.write(0x0B, 0x56, 0x01).await, Err(BusError::Nack));
        assert!(bus.writes().is_empty());

        bus.heal();
        bus.write(0x0B, 0x56, 0x01).await.unwrap();
        assert_eq!(bus.writes().len(), 1);
    }

    #[tokio::test]
    async fn gpadc_returns_preset_channel_value() {
        let mut adc = MockGpadc::new();
        adc.set(AdcChannel::VbusVoltage, 5_000);

        assert_eq!(adc.convert(AdcChannel::VbusVoltage).await.unwrap(), 5_000);
        assert_eq!(adc.convert(AdcChannel::MainChargerCurrent).await.unwrap(), 0);
        adc.set_failing(true);
        assert_eq!(adc.convert(AdcChannel::VbusVoltage).await, Err(BusError::Bus));
        assert_eq!(adc.conversions(), 3);
    }
}
