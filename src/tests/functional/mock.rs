// Licensed under the Apache-2.0 license

//! Test doubles: a scriptable bus, a recording driver and a detecting driver.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::i2c::{NoAcknowledgeSource, Operation};
use parking_lot::Mutex;

use crate::i2c::{
    Adapter, Algorithm, ClassFlags, Client, DetectClient, Functionality, I2cBoardInfo, I2cDetect,
    I2cDeviceId, I2cDriver, I2cError, I2cMsg, MsgFlags, Result, SmbusRequest, XferCaps,
};

/// One message as the engine saw it: address, read?, length.
pub type Seen = (u16, bool, usize);

#[derive(Default)]
struct BusState {
    present: BTreeSet<u16>,
    /// Register file per target address
    regs: BTreeMap<u16, [u8; 256]>,
    /// Register pointer per target address
    pointer: BTreeMap<u16, u8>,
    script: VecDeque<I2cError>,
    batches: Vec<Vec<Seen>>,
}

struct Inner {
    state: Mutex<BusState>,
    caps: XferCaps,
    func: Functionality,
    delay: Option<Duration>,
    calls: AtomicUsize,
    atomic_calls: AtomicUsize,
    smbus_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// In-memory bus: targets in `present` acknowledge, everything else NAKs.
///
/// Clones share state, so a test keeps one clone and hands the other to the
/// adapter.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Inner>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::with(XferCaps::MASTER_XFER, None)
    }

    pub fn with(caps: XferCaps, delay: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BusState::default()),
                caps,
                func: Functionality::I2C | Functionality::SMBUS_EMUL,
                delay,
                calls: AtomicUsize::new(0),
                atomic_calls: AtomicUsize::new(0),
                smbus_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn attach(&self, addr: u16) -> &Self {
        self.inner.state.lock().present.insert(addr);
        self
    }

    pub fn set_reg(&self, addr: u16, reg: u8, value: u8) -> &Self {
        let mut state = self.inner.state.lock();
        let regs = state.regs.entry(addr).or_insert([0; 256]);
        if let Some(slot) = regs.get_mut(usize::from(reg)) {
            *slot = value;
        }
        self
    }

    pub fn reg(&self, addr: u16, reg: u8) -> u8 {
        self.inner
            .state
            .lock()
            .regs
            .get(&addr)
            .and_then(|regs| regs.get(usize::from(reg)).copied())
            .unwrap_or(0)
    }

    /// Fail the next engine calls with these errors, in order.
    pub fn script(&self, errors: &[I2cError]) {
        self.inner.state.lock().script.extend(errors.iter().copied());
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn atomic_calls(&self) -> usize {
        self.inner.atomic_calls.load(Ordering::SeqCst)
    }

    /// Calls into the blocking native SMBus entry point.
    pub fn smbus_calls(&self) -> usize {
        self.inner.smbus_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<Seen>> {
        self.inner.state.lock().batches.clone()
    }

    fn run(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.inner.delay {
            std::thread::sleep(delay);
        }
        let ret = self.execute(msgs);
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        ret
    }

    fn execute(&self, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        let mut state = self.inner.state.lock();
        state
            .batches
            .push(msgs.iter().map(|m| (m.addr, m.is_read(), m.len())).collect());
        if let Some(err) = state.script.pop_front() {
            return Err(err);
        }
        for msg in msgs.iter_mut() {
            if !state.present.contains(&msg.addr) {
                if msg.flags.contains(MsgFlags::IGNORE_NAK) {
                    continue;
                }
                return Err(I2cError::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            let addr = msg.addr;
            let mut ptr = state.pointer.get(&addr).copied().unwrap_or(0);
            let regs = state.regs.entry(addr).or_insert([0; 256]);
            match &mut msg.op {
                Operation::Write(buf) => {
                    if let Some((&first, rest)) = buf.split_first() {
                        ptr = first;
                        for &byte in rest {
                            regs[usize::from(ptr)] = byte;
                            ptr = ptr.wrapping_add(1);
                        }
                    }
                }
                Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = regs[usize::from(ptr)];
                        ptr = ptr.wrapping_add(1);
                    }
                }
            }
            state.pointer.insert(addr, ptr);
        }
        Ok(msgs.len())
    }
}

impl Algorithm for MockBus {
    fn functionality(&self, _adapter: &Adapter) -> Functionality {
        self.inner.func
    }

    fn capabilities(&self) -> XferCaps {
        self.inner.caps
    }

    fn master_xfer(&self, _adapter: &Adapter, msgs: &mut [I2cMsg<'_>]) -> Result<usize> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.run(msgs)
    }

    fn master_xfer_atomic(
        &self,
        _adapter: &Adapter,
        msgs: &mut [I2cMsg<'_>],
    ) -> nb::Result<usize, I2cError> {
        // report busy once per call so the dispatcher has to poll
        if self.inner.atomic_calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.execute(msgs).map_err(nb::Error::Other)
    }

    fn smbus_xfer(&self, _adapter: &Adapter, _req: &mut SmbusRequest) -> Result<()> {
        // no native protocol support; the core falls back to emulation
        self.inner.smbus_calls.fetch_add(1, Ordering::SeqCst);
        Err(I2cError::Unsupported("SMBus transfers not supported"))
    }
}

/// What a [`RecordingDriver`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Probe(String),
    Remove(String),
    Command(String, u32),
}

/// Driver that binds to its id table and logs every callback.
pub struct RecordingDriver {
    name: &'static str,
    ids: Vec<I2cDeviceId>,
    compatible: Vec<&'static str>,
    probe_result: Mutex<VecDeque<I2cError>>,
    events: Mutex<Vec<Event>>,
}

impl RecordingDriver {
    pub fn new(name: &'static str, types: &[&'static str]) -> Self {
        Self {
            name,
            ids: types.iter().map(|&t| I2cDeviceId::new(t, 0)).collect(),
            compatible: Vec::new(),
            probe_result: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_compatible(mut self, compat: &'static str) -> Self {
        self.compatible.push(compat);
        self
    }

    /// Fail the next probes with these errors, in order.
    pub fn fail_probes(&self, errors: &[I2cError]) {
        self.probe_result.lock().extend(errors.iter().copied());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Probe(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl I2cDriver for RecordingDriver {
    fn name(&self) -> &str {
        self.name
    }

    fn id_table(&self) -> &[I2cDeviceId] {
        &self.ids
    }

    fn compatible(&self) -> &[&str] {
        &self.compatible
    }

    fn probe(&self, client: &Arc<Client>) -> Result<()> {
        if let Some(err) = self.probe_result.lock().pop_front() {
            return Err(err);
        }
        self.events
            .lock()
            .push(Event::Probe(client.dev_name().to_owned()));
        Ok(())
    }

    fn remove(&self, client: &Arc<Client>) -> Result<()> {
        self.events
            .lock()
            .push(Event::Remove(client.dev_name().to_owned()));
        Ok(())
    }

    fn command(&self, client: &Arc<Client>, cmd: u32, arg: &mut dyn std::any::Any) {
        if let Some(count) = arg.downcast_mut::<u32>() {
            *count += 1;
        }
        self.events
            .lock()
            .push(Event::Command(client.dev_name().to_owned(), cmd));
    }
}

/// Sensor-style detector: a chip answers with `chip_id` in register 0xfe.
pub struct SensorDetect {
    pub addresses: Vec<u16>,
    pub chip_id: u8,
    pub class: ClassFlags,
    pub seen: Mutex<Vec<u16>>,
    pub fail_with: Mutex<Option<I2cError>>,
    /// Report a match but leave the type name empty
    pub unnamed: Mutex<bool>,
}

pub const CHIP_ID_REG: u8 = 0xfe;

impl SensorDetect {
    pub fn new(addresses: &[u16], chip_id: u8) -> Self {
        Self {
            addresses: addresses.to_vec(),
            chip_id,
            class: ClassFlags::HWMON,
            seen: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            unnamed: Mutex::new(false),
        }
    }
}

impl I2cDetect for SensorDetect {
    fn class(&self) -> ClassFlags {
        self.class
    }

    fn address_list(&self) -> &[u16] {
        &self.addresses
    }

    fn detect(&self, client: &DetectClient<'_>, info: &mut I2cBoardInfo) -> Result<()> {
        self.seen.lock().push(client.addr());
        if let Some(err) = *self.fail_with.lock() {
            return Err(err);
        }
        if !client.check_functionality(Functionality::SMBUS_READ_BYTE_DATA) {
            return Err(I2cError::NoDevice);
        }
        if client.smbus_read_byte_data(CHIP_ID_REG)? != self.chip_id {
            return Err(I2cError::NoDevice);
        }
        if *self.unnamed.lock() {
            return Ok(());
        }
        *info = I2cBoardInfo::new("lm75", client.addr())?;
        Ok(())
    }
}

/// Driver for "lm75" chips that brings its own detector.
pub struct SensorDriver {
    pub inner: RecordingDriver,
    pub detect: SensorDetect,
}

impl SensorDriver {
    pub fn new(addresses: &[u16], chip_id: u8) -> Self {
        Self {
            inner: RecordingDriver::new("lm75", &["lm75"]),
            detect: SensorDetect::new(addresses, chip_id),
        }
    }
}

impl I2cDriver for SensorDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn id_table(&self) -> &[I2cDeviceId] {
        self.inner.id_table()
    }

    fn probe(&self, client: &Arc<Client>) -> Result<()> {
        self.inner.probe(client)
    }

    fn remove(&self, client: &Arc<Client>) -> Result<()> {
        self.inner.remove(client)
    }

    fn detector(&self) -> Option<&dyn I2cDetect> {
        Some(&self.detect)
    }
}
