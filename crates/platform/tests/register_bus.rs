//! Public-API checks for the register and ADC traits.
//!
//! The charger core borrows its bus for the whole driver lifetime, so the
//! `&mut T` forwarding impls must behave exactly like the owned transport.

#![allow(clippy::unwrap_used)]

use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};
use platform::{AdcChannel, BusError, Gpadc, I2cRegisterBus, RegisterBus};

const ADDR: u8 = 0x48;

async fn set_enable_bit<B: RegisterBus>(mut bus: B) -> Result<(), B::Error> {
    bus.read_modify_write(0x0B, 0xC0, 0x01, 0x01).await
}

#[tokio::test]
async fn borrowed_i2c_bus_forwards_every_call() {
    let expectations = [
        I2cTransaction::write_read(ADDR, vec![0x0B, 0xC0], vec![0x02]),
        I2cTransaction::write(ADDR, vec![0x0B, 0xC0, 0x03]),
        I2cTransaction::write_read(ADDR, vec![0x0B, 0x02], vec![0x03]),
    ];
    let mut i2c = I2cMock::new(&expectations);
    let mut bus = I2cRegisterBus::new(i2c.clone(), ADDR);

    set_enable_bit(&mut bus).await.unwrap();
    assert_eq!(bus.read(0x0B, 0x02).await.unwrap(), 0x03);

    bus.release();
    i2c.done();
}

struct FixedAdc {
    calls: usize,
}

impl Gpadc for FixedAdc {
    type Error = BusError;

    async fn convert(&mut self, channel: AdcChannel) -> Result<i32, BusError> {
        self.calls = self.calls.saturating_add(1);
        match channel {
            AdcChannel::VbusVoltage => Ok(5000),
            AdcChannel::MainChargerVoltage => Err(BusError::Unmapped),
            _ => Ok(0),
        }
    }
}

async fn sample<A: Gpadc>(mut adc: A, channel: AdcChannel) -> Result<i32, A::Error> {
    adc.convert(channel).await
}

#[tokio::test]
async fn borrowed_adc_forwards_results_and_errors() {
    let mut adc = FixedAdc { calls: 0 };
    assert_eq!(sample(&mut adc, AdcChannel::VbusVoltage).await, Ok(5000));
    assert_eq!(
        sample(&mut adc, AdcChannel::MainChargerVoltage).await,
        Err(BusError::Unmapped)
    );
    assert_eq!(adc.calls, 2);
}

#[test]
fn adc_channel_indices_are_dense() {
    for (i, channel) in AdcChannel::ALL.into_iter().enumerate() {
        assert_eq!(channel.index(), i);
    }
}
