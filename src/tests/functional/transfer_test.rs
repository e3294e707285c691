// Licensed under the Apache-2.0 license

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::i2c::{I2c, NoAcknowledgeSource};
use fugit::MillisDurationU32;
use hex_literal::hex;

use crate::i2c::{
    Adapter, AdapterBuilder, AdapterQuirks, ClientFlags, I2cBoardInfo, I2cController, I2cCore,
    I2cError, I2cMsg, LockScope, QuirkFlags, XferCaps, I2C_SMBUS_BLOCK_MAX,
};

use super::mock::MockBus;

const TARGET: u16 = 0x50;

fn setup(
    mock: &MockBus,
    configure: impl FnOnce(AdapterBuilder) -> AdapterBuilder,
) -> (I2cCore, Arc<Adapter>) {
    mock.attach(TARGET);
    let core = I2cCore::new();
    let adap = core
        .add_adapter(configure(Adapter::builder("mock", mock.clone())))
        .unwrap();
    (core, adap)
}

fn write_one(adap: &Adapter, data: &[u8]) -> Result<usize, I2cError> {
    adap.transfer(&mut [I2cMsg::write(TARGET, data)])
}

#[test]
fn test_arbitration_retries_are_bounded() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b.retries(3));
    mock.script(&[I2cError::ArbitrationRetry; 10]);

    assert_eq!(write_one(&adap, &[0x00]), Err(I2cError::ArbitrationRetry));
    assert_eq!(mock.calls(), 4);
}

#[test]
fn test_retry_until_success() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b.retries(3));
    mock.script(&[I2cError::ArbitrationRetry, I2cError::ArbitrationRetry]);

    assert_eq!(write_one(&adap, &[0x00]), Ok(1));
    assert_eq!(mock.calls(), 3);
}

#[test]
fn test_other_errors_are_not_retried() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b.retries(5));

    let err = adap
        .transfer(&mut [I2cMsg::write(0x51, &[0x00])])
        .unwrap_err();
    assert_eq!(err, I2cError::NoAcknowledge(NoAcknowledgeSource::Address));
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_retries_stop_at_timeout() {
    let mock = MockBus::with(XferCaps::MASTER_XFER, Some(Duration::from_millis(3)));
    let (_core, adap) = setup(&mock, |b| {
        b.retries(50).timeout(MillisDurationU32::from_ticks(1))
    });
    mock.script(&[I2cError::ArbitrationRetry; 50]);

    assert_eq!(write_one(&adap, &[0x00]), Err(I2cError::ArbitrationRetry));
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_quirk_violation_never_reaches_engine() {
    let mock = MockBus::new();
    let quirks = AdapterQuirks::new()
        .flags(QuirkFlags::COMB_WRITE_THEN_READ)
        .max_write_len(4);
    let (_core, adap) = setup(&mock, |b| b.quirks(quirks));

    assert_eq!(
        write_one(&adap, &[0; 8]),
        Err(I2cError::Unsupported("adapter quirk"))
    );
    let mut buf = [0u8; 2];
    assert_eq!(
        adap.transfer(&mut [
            I2cMsg::read(TARGET, &mut buf),
            I2cMsg::write(TARGET, &[0x10]),
        ]),
        Err(I2cError::Unsupported("adapter quirk"))
    );
    assert_eq!(mock.calls(), 0);

    // the supported shape goes through
    assert_eq!(
        adap.transfer(&mut [
            I2cMsg::write(TARGET, &[0x10]),
            I2cMsg::read(TARGET, &mut buf),
        ]),
        Ok(2)
    );
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_malformed_batches_rejected() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b);

    assert_eq!(
        adap.transfer(&mut []),
        Err(I2cError::InvalidArgument("empty transfer"))
    );
    let big = vec![0u8; 70_000];
    assert!(matches!(
        write_one(&adap, &big),
        Err(I2cError::InvalidArgument(_))
    ));
    assert_eq!(mock.calls(), 0);
}

#[test]
fn test_engine_without_i2c_entry_point() {
    let mock = MockBus::with(XferCaps::SMBUS_XFER, None);
    let (_core, adap) = setup(&mock, |b| b);
    assert!(matches!(
        write_one(&adap, &[0x00]),
        Err(I2cError::Unsupported(_))
    ));
    assert_eq!(mock.calls(), 0);
}

#[test]
fn test_suspended_adapter_rejects_transfers() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b);

    adap.mark_suspended();
    assert!(adap.is_suspended());
    assert_eq!(write_one(&adap, &[0x00]), Err(I2cError::Shutdown));
    assert_eq!(write_one(&adap, &[0x00]), Err(I2cError::Shutdown));
    assert_eq!(
        adap.smbus_read_byte_data(TARGET, ClientFlags::empty(), 0),
        Err(I2cError::Shutdown)
    );
    assert_eq!(mock.calls(), 0);

    adap.mark_resumed();
    assert_eq!(write_one(&adap, &[0x00]), Ok(1));
}

#[test]
fn test_atomic_context_does_not_wait_for_bus() {
    let mock = MockBus::with(XferCaps::MASTER_XFER | XferCaps::MASTER_XFER_ATOMIC, None);
    let (core, adap) = setup(&mock, |b| b);
    core.set_atomic(true);

    let guard = adap.lock_bus(LockScope::Segment);
    assert_eq!(write_one(&adap, &[0x00]), Err(I2cError::WouldBlock));
    drop(guard);

    // the polled entry point is used and polled until done
    assert_eq!(write_one(&adap, &[0x00]), Ok(1));
    assert_eq!(mock.calls(), 0);
    assert_eq!(mock.atomic_calls(), 2);

    core.set_atomic(false);
    assert_eq!(write_one(&adap, &[0x00]), Ok(1));
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_locked_sequence() {
    let mock = MockBus::new();
    let (core, adap) = setup(&mock, |b| b);
    let other = core
        .add_adapter(Adapter::builder("other", MockBus::new()))
        .unwrap();

    let guard = adap.lock_bus(LockScope::Segment);
    assert!(adap.try_lock_bus(LockScope::Segment).is_none());
    for reg in [0x01u8, 0x02] {
        let data = [reg];
        let mut msgs = [I2cMsg::write(TARGET, &data)];
        assert_eq!(adap.transfer_locked(&guard, &mut msgs), Ok(1));
    }
    assert_eq!(
        other.transfer_locked(&guard, &mut [I2cMsg::write(TARGET, &[0x03])]),
        Err(I2cError::InvalidArgument("bus guard of another adapter"))
    );
    drop(guard);
    assert!(!adap.bus_mutex().is_locked());
    assert_eq!(mock.batches().len(), 2);
}

#[test]
fn test_transfers_are_serialized() {
    let mock = MockBus::with(XferCaps::MASTER_XFER, Some(Duration::from_millis(1)));
    let (_core, adap) = setup(&mock, |b| b);

    let handles: Vec<_> = (0..4)
        .map(|i: u8| {
            let adap = Arc::clone(&adap);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    write_one(&adap, &[i]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(mock.calls(), 20);
    assert_eq!(mock.max_in_flight(), 1);
}

#[test]
fn test_client_buffers_and_smbus_emulation() {
    let mock = MockBus::new();
    let (core, adap) = setup(&mock, |b| b);
    let client = core
        .new_client_device(&adap, &I2cBoardInfo::new("eeprom", TARGET).unwrap())
        .unwrap();

    assert_eq!(client.master_send(&hex!("10 de ad be ef")), Ok(5));
    assert_eq!(mock.reg(TARGET, 0x12), 0xbe);
    assert_eq!(client.master_send(&[0x10]), Ok(1));
    let mut buf = [0u8; 4];
    assert_eq!(client.master_recv(&mut buf), Ok(4));
    assert_eq!(buf, hex!("de ad be ef"));

    client.smbus_write_byte_data(0x20, 0x5a).unwrap();
    assert_eq!(client.smbus_read_byte_data(0x20), Ok(0x5a));
    assert_eq!(client.smbus_read_word_data(0x10), Ok(0xadde));

    let block = adap
        .smbus_read_i2c_block_data(TARGET, ClientFlags::empty(), 0x11, 3)
        .unwrap();
    assert_eq!(block.as_slice(), hex!("ad be ef"));

    // block reads are emulated as one write-then-read batch
    let last = mock.batches().pop().unwrap();
    assert_eq!(last, [(TARGET, false, 1), (TARGET, true, 3)]);

    // oversized requests are cut to the SMBus block limit
    let block = adap
        .smbus_read_i2c_block_data(TARGET, ClientFlags::empty(), 0x10, 40)
        .unwrap();
    assert_eq!(block.len(), I2C_SMBUS_BLOCK_MAX);
    assert_eq!(block.get(..4).unwrap(), hex!("de ad be ef"));
    assert!(matches!(
        adap.smbus_read_i2c_block_data(TARGET, ClientFlags::empty(), 0x10, 0),
        Err(I2cError::InvalidArgument(_))
    ));
}

#[test]
fn test_native_smbus_falls_back_to_emulation() {
    let mock = MockBus::with(XferCaps::MASTER_XFER | XferCaps::SMBUS_XFER, None);
    let (_core, adap) = setup(&mock, |b| b);
    mock.set_reg(TARGET, 0x07, 0x42);

    assert_eq!(adap.smbus_read_byte_data(TARGET, ClientFlags::empty(), 0x07), Ok(0x42));
    assert_eq!(mock.smbus_calls(), 1);
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_atomic_smbus_uses_polled_emulation() {
    let caps = XferCaps::MASTER_XFER | XferCaps::MASTER_XFER_ATOMIC | XferCaps::SMBUS_XFER;
    let mock = MockBus::with(caps, None);
    let (core, adap) = setup(&mock, |b| b);
    mock.set_reg(TARGET, 0x07, 0x42);
    core.set_atomic(true);

    assert_eq!(adap.smbus_read_byte_data(TARGET, ClientFlags::empty(), 0x07), Ok(0x42));
    assert_eq!(mock.smbus_calls(), 0);
    assert_eq!(mock.calls(), 0);
    assert_eq!(mock.atomic_calls(), 2);

    core.set_atomic(false);
    assert_eq!(adap.smbus_read_byte_data(TARGET, ClientFlags::empty(), 0x07), Ok(0x42));
    assert_eq!(mock.smbus_calls(), 1);
    assert_eq!(mock.calls(), 1);
}

#[test]
fn test_device_id_query() {
    let mock = MockBus::new();
    let (core, adap) = setup(&mock, |b| b);
    mock.attach(0x7c);
    for (offset, byte) in hex!("0a 32 1b").into_iter().enumerate() {
        mock.set_reg(0x7c, 0xa0 + offset as u8, byte);
    }
    let client = core
        .new_client_device(&adap, &I2cBoardInfo::new("eeprom", TARGET).unwrap())
        .unwrap();

    let id = client.get_device_id().unwrap();
    assert_eq!(id.manufacturer_id, 0x0a3);
    assert_eq!(id.part_id, 0x43);
    assert_eq!(id.die_revision, 3);
}

#[test]
fn test_embedded_hal_bridge() {
    let mock = MockBus::new();
    let (_core, adap) = setup(&mock, |b| b);
    mock.set_reg(TARGET, 0x30, 0x11).set_reg(TARGET, 0x31, 0x22);
    let mut bus = I2cController::new(Arc::clone(&adap));

    let mut buf = [0u8; 2];
    I2c::<u8>::write_read(&mut bus, 0x50, &[0x30], &mut buf).unwrap();
    assert_eq!(buf, [0x11, 0x22]);
    I2c::<u8>::write(&mut bus, 0x50, &[0x40, 0x99]).unwrap();
    assert_eq!(mock.reg(TARGET, 0x40), 0x99);

    let err = I2c::<u8>::read(&mut bus, 0x51, &mut buf).unwrap_err();
    assert_eq!(
        embedded_hal::i2c::Error::kind(&err),
        embedded_hal::i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    );
    assert_eq!(mock.batches().len(), 3);
}
