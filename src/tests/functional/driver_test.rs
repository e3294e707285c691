// Licensed under the Apache-2.0 license

use std::sync::Arc;

use crate::i2c::{Adapter, I2cBoardInfo, I2cCore, I2cDriver, I2cError, StaticNode};

use super::mock::{Event, MockBus, RecordingDriver};

fn core_with_bus() -> (I2cCore, Arc<Adapter>) {
    let core = I2cCore::new();
    let adap = core
        .add_adapter(Adapter::builder("mock", MockBus::new()))
        .unwrap();
    (core, adap)
}

fn eeprom(core: &I2cCore, adap: &Arc<Adapter>, addr: u16) -> Arc<crate::i2c::Client> {
    core.new_client_device(adap, &I2cBoardInfo::new("24c02", addr).unwrap())
        .unwrap()
}

#[test]
fn test_bind_on_client_and_on_driver_registration() {
    let (core, adap) = core_with_bus();
    let early = eeprom(&core, &adap, 0x50);
    assert!(early.driver().is_none());

    let driver = Arc::new(RecordingDriver::new("at24", &["24c02"]));
    core.register_driver(driver.clone()).unwrap();
    let late = eeprom(&core, &adap, 0x51);

    assert_eq!(driver.probed(), ["0-0050", "0-0051"]);
    assert_eq!(early.driver().unwrap().name(), "at24");
    assert_eq!(late.driver().unwrap().name(), "at24");
}

#[test]
fn test_duplicate_driver_name_rejected() {
    let core = I2cCore::new();
    core.register_driver(Arc::new(RecordingDriver::new("at24", &[])))
        .unwrap();
    assert_eq!(
        core.register_driver(Arc::new(RecordingDriver::new("at24", &[]))),
        Err(I2cError::Busy)
    );
    assert_eq!(
        core.register_driver(Arc::new(RecordingDriver::new("dummy", &[]))),
        Err(I2cError::Busy)
    );
}

#[test]
fn test_compatible_match_through_firmware_node() {
    let (core, adap) = core_with_bus();
    let driver = Arc::new(RecordingDriver::new("rtc", &[]).with_compatible("nxp,pcf8563"));
    core.register_driver(driver.clone()).unwrap();

    let node = StaticNode::new("rtc@51").compatible("nxp,pcf8563").reg(0x51).build();
    let info = I2cBoardInfo::new("pcf8563", 0x51).unwrap().fw_node(node);
    core.new_client_device(&adap, &info).unwrap();

    // type name matched against the compatible string minus its vendor
    core.new_client_device(&adap, &I2cBoardInfo::new("pcf8563", 0x52).unwrap())
        .unwrap();

    assert_eq!(driver.probed(), ["i2c-rtc@51", "0-0052"]);
}

#[test]
fn test_deferred_probe_is_retried() {
    let (core, adap) = core_with_bus();
    let driver = Arc::new(RecordingDriver::new("at24", &["24c02"]));
    driver.fail_probes(&[I2cError::Deferred]);
    core.register_driver(driver.clone()).unwrap();

    let client = eeprom(&core, &adap, 0x50);
    assert!(client.driver().is_none());
    assert!(client.is_registered());

    core.probe_deferred();
    assert_eq!(client.driver().unwrap().name(), "at24");
    assert_eq!(driver.probed(), ["0-0050"]);
}

#[test]
fn test_no_device_falls_through_to_next_driver() {
    let (core, adap) = core_with_bus();
    let picky = Arc::new(RecordingDriver::new("picky", &["24c02"]));
    picky.fail_probes(&[I2cError::NoDevice]);
    let generic = Arc::new(RecordingDriver::new("generic", &["24c02"]));
    core.register_driver(picky.clone()).unwrap();
    core.register_driver(generic.clone()).unwrap();

    let client = eeprom(&core, &adap, 0x50);
    assert_eq!(client.driver().unwrap().name(), "generic");
    assert!(picky.probed().is_empty());
}

#[test]
fn test_failed_probe_leaves_client_unbound() {
    let (core, adap) = core_with_bus();
    let broken = Arc::new(RecordingDriver::new("broken", &["24c02"]));
    broken.fail_probes(&[I2cError::Bus(embedded_hal::i2c::ErrorKind::Other)]);
    let generic = Arc::new(RecordingDriver::new("generic", &["24c02"]));
    core.register_driver(broken.clone()).unwrap();
    core.register_driver(generic.clone()).unwrap();

    let client = eeprom(&core, &adap, 0x50);
    assert!(client.driver().is_none());
    assert!(client.is_registered());
    assert!(generic.probed().is_empty());
}

#[test]
fn test_del_driver_unbinds_but_keeps_clients() {
    let (core, adap) = core_with_bus();
    let driver = Arc::new(RecordingDriver::new("at24", &["24c02"]));
    core.register_driver(driver.clone()).unwrap();
    let client = eeprom(&core, &adap, 0x50);

    core.del_driver("at24").unwrap();
    assert!(client.driver().is_none());
    assert!(client.is_registered());
    assert_eq!(
        driver.events(),
        [Event::Probe("0-0050".into()), Event::Remove("0-0050".into())]
    );
    assert_eq!(core.del_driver("at24"), Err(I2cError::NotFound));
}

#[test]
fn test_clients_command_reaches_bound_drivers() {
    let (core, adap) = core_with_bus();
    let driver = Arc::new(RecordingDriver::new("at24", &["24c02"]));
    core.register_driver(driver.clone()).unwrap();
    eeprom(&core, &adap, 0x50);
    eeprom(&core, &adap, 0x51);
    core.new_client_device(&adap, &I2cBoardInfo::new("unbound", 0x60).unwrap())
        .unwrap();

    let mut count = 0u32;
    core.clients_command(&adap, 7, &mut count);
    assert_eq!(count, 2);
    assert!(driver
        .events()
        .contains(&Event::Command("0-0051".into(), 7)));
}
