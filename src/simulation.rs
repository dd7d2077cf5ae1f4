/*!
    An in-memory fieldbus with simulated CiA-402 drives, implementing [Fieldbus].

    Each [SimulatedDrive] has an object dictionary, evaluates the PDO mapping written in it when the network goes safe-operational, reacts to controlwords following the CiA-402 state machine, and integrates its velocity. Faults, frozen statuswords, homing progress and exchange failures can be injected, and every access is recorded in a [Journal] shared with the caller.

    This is what the demos and tests run on when no real network is at hand.
*/

use crate::{
    sdo::{PdoEntry, SdoAbortCode},
    cia402::{DeviceState, Command, OperationMode},
    master::{DeviceId, DeviceInfo, CommunicationState, RegisterAccess, ProcessData, Fieldbus},
    error::{TransportError, TransportResult},
    };
use core::time::Duration;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
    };
use tokio::time::Instant;


const CONTROLWORD: (u16, u8) = (0x6040, 0);
const STATUSWORD: (u16, u8) = (0x6041, 0);
const MODE: (u16, u8) = (0x6060, 0);
const MODE_DISPLAY: (u16, u8) = (0x6061, 0);
const TARGET_VELOCITY: (u16, u8) = (0x60ff, 0);
const ACTUAL_POSITION: (u16, u8) = (0x6064, 0);
const ACTUAL_VELOCITY: (u16, u8) = (0x606c, 0);

/// objects only the drive writes
const READ_ONLY: [(u16, u8); 5] = [STATUSWORD, MODE_DISPLAY, ACTUAL_POSITION, ACTUAL_VELOCITY, (0x6077, 0)];
/// objects only writable before the network goes safe-operational
const MAPPING_OBJECTS: [u16; 4] = [0x1c12, 0x1c13, 0x1600, 0x1a00];


/// faults injected in a simulated drive
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Behavior {
    /// the drive ignores every controlword, so its statusword never changes
    pub frozen: bool,
    /// the drive's fault cannot be reset
    pub latched_fault: bool,
    /// number of statusword reads after homing started before homing completes
    pub homing_polls: u32,
    /// homing ends with an error instead of completing
    pub homing_error: bool,
    /// writes to this object are refused
    pub refused: Option<(u16, u8)>,
    /// the drive faults after this number of process data exchanges
    pub fault_after: Option<u32>,
}

/// a register write accepted by a simulated drive
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisterWrite {
    pub device: DeviceId,
    pub index: u16,
    pub sub: u8,
    pub data: Vec<u8>,
}

/// record of everything the master was asked
#[derive(Clone, Debug, Default)]
pub struct Journal {
    /// accepted register writes, in order
    pub writes: Vec<RegisterWrite>,
    /// for each successful exchange, the controlword received by each device (`None` when not mapped)
    pub exchanges: Vec<Vec<Option<u16>>>,
    pub failed_exchanges: u32,
    /// network state requests, in order
    pub switches: Vec<CommunicationState>,
    pub opens: u32,
    pub closes: u32,
}
impl Journal {
    /// register writes to a device
    pub fn writes_to(&self, device: DeviceId) -> Vec<&RegisterWrite> {
        self.writes.iter().filter(|write| write.device == device).collect()
    }
    /// controlwords written to a device through its dictionary
    pub fn controlword_writes(&self, device: DeviceId) -> Vec<u16> {
        self.writes_to(device).into_iter()
            .filter(|write| (write.index, write.sub) == CONTROLWORD)
            .filter_map(|write| Some(u16::from_le_bytes(write.data.as_slice().try_into().ok()?)))
            .collect()
    }
    /// controlwords sent to a device through the process data, one per exchange
    pub fn exchanged_controlwords(&self, device: DeviceId) -> Vec<u16> {
        self.exchanges.iter()
            .filter_map(|exchange| exchange.get(usize::from(device.0)).copied().flatten())
            .collect()
    }
}


/// a CiA-402 servo drive in memory
#[derive(Clone, Debug)]
pub struct SimulatedDrive {
    info: DeviceInfo,
    behavior: Behavior,
    /// byte sizes of the sync manager buffers
    capacity: (usize, usize),
    dictionary: BTreeMap<(u16, u8), Vec<u8>>,
    state: DeviceState,
    /// statusword reads since homing started
    homing: Option<u32>,
    /// process data exchanges since the network went safe-operational
    exchanges: u32,
    rx: Vec<PdoEntry>,
    tx: Vec<PdoEntry>,
    outputs: Vec<u8>,
    inputs: Vec<u8>,
}
impl SimulatedDrive {
    /// drive with the given station alias, ready to be switched on
    pub fn new(alias: u16) -> Self {
        let mut dictionary = BTreeMap::new();
        for (index, sub, size) in [
                (0x603f, 0, 2), (0x6040, 0, 2), (0x6041, 0, 2), (0x6060, 0, 1), (0x6061, 0, 1),
                (0x607a, 0, 4), (0x60ff, 0, 4), (0x6071, 0, 2),
                (0x6064, 0, 4), (0x606c, 0, 4), (0x6077, 0, 2),
                (0x6081, 0, 4), (0x6083, 0, 4), (0x6084, 0, 4), (0x607d, 1, 4), (0x607d, 2, 4),
                (0x607c, 0, 4), (0x6098, 0, 1), (0x6099, 1, 4), (0x6099, 2, 4), (0x609a, 0, 4),
                (0x1c12, 0, 1), (0x1c12, 1, 2), (0x1c13, 0, 1), (0x1c13, 1, 2),
                (0x1600, 0, 1), (0x1a00, 0, 1),
                ] {
            dictionary.insert((index, sub), vec![0; size]);
        }
        for sub in 1 ..= 8 {
            dictionary.insert((0x1600, sub), vec![0; 4]);
            dictionary.insert((0x1a00, sub), vec![0; 4]);
        }
        Self {
            info: DeviceInfo {
                position: DeviceId(0),
                alias,
                vendor: 0x0000_0a5e,
                product: 0x0000_0402,
                revision: 0x0001_0000,
                name: "simulated servodrive".into(),
                },
            behavior: Behavior::default(),
            capacity: (32, 32),
            dictionary,
            state: DeviceState::SwitchOnDisabled,
            homing: None,
            exchanges: 0,
            rx: Vec::new(),
            tx: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
        }
    }
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }
    /// byte sizes of the output and input buffers
    pub fn with_capacity(mut self, outputs: usize, inputs: usize) -> Self {
        self.capacity = (outputs, inputs);
        self
    }
    /// initial state of the state machine
    pub fn in_state(mut self, state: DeviceState) -> Self {
        self.state = state;
        self
    }

    pub fn info(&self) -> &DeviceInfo  {&self.info}
    pub fn state(&self) -> DeviceState  {self.state}
    pub fn behavior_mut(&mut self) -> &mut Behavior  {&mut self.behavior}
    /// raw value of an object
    pub fn value(&self, index: u16, sub: u8) -> Option<&[u8]> {
        self.dictionary.get(&(index, sub)).map(Vec::as_slice)
    }
    /// entries of the output and input mappings in use
    pub fn mapping(&self) -> (&[PdoEntry], &[PdoEntry])  {(&self.rx, &self.tx)}

    fn integer(&self, object: (u16, u8)) -> i64 {
        match self.dictionary.get(&object).map(Vec::as_slice) {
            Some(&[a]) => i8::from_le_bytes([a]).into(),
            Some(&[a, b]) => i16::from_le_bytes([a, b]).into(),
            Some(&[a, b, c, d]) => i32::from_le_bytes([a, b, c, d]).into(),
            _ => 0,
        }
    }
    fn mode(&self) -> i8 {
        self.integer(MODE) as i8
    }
    fn controlword(&self) -> u16 {
        self.integer(CONTROLWORD) as u16
    }

    fn write(&mut self, index: u16, sub: u8, data: &[u8], network: CommunicationState) -> TransportResult<()> {
        let abort = |code| TransportError::Abort {index, sub, code};
        if self.behavior.refused == Some((index, sub))
            {return Err(abort(SdoAbortCode::GeneralError))}
        let size = match self.dictionary.get(&(index, sub)) {
            Some(value) => value.len(),
            None => return Err(abort(SdoAbortCode::InvalidIndex)),
            };
        if READ_ONLY.contains(&(index, sub))
            {return Err(abort(SdoAbortCode::ReadOnly))}
        if MAPPING_OBJECTS.contains(&index) && network >= CommunicationState::SafeOperational
            {return Err(abort(SdoAbortCode::StateRefused))}
        if data.len() != size
            {return Err(abort(SdoAbortCode::InvalidLength))}

        self.dictionary.insert((index, sub), data.to_vec());
        match (index, sub) {
            CONTROLWORD => self.receive(self.controlword()),
            MODE => {self.dictionary.insert(MODE_DISPLAY, data.to_vec());},
            _ => {},
        }
        Ok(())
    }

    fn read(&mut self, index: u16, sub: u8, data: &mut [u8]) -> TransportResult<usize> {
        let abort = |code| TransportError::Abort {index, sub, code};
        let value = if (index, sub) == STATUSWORD {
            self.statusword().to_le_bytes().to_vec()
        } else {
            self.dictionary.get(&(index, sub))
                .ok_or(abort(SdoAbortCode::InvalidIndex))?
                .clone()
        };
        let dst = data.get_mut(.. value.len())
            .ok_or(abort(SdoAbortCode::InvalidLength))?;
        dst.copy_from_slice(&value);
        Ok(value.len())
    }

    /// react to a controlword
    fn receive(&mut self, controlword: u16) {
        if self.behavior.frozen
            {return}
        let previous = self.state;
        match Command::decode(controlword) {
            Some(Command::FaultReset) if self.state == DeviceState::Fault && self.behavior.latched_fault => {},
            Some(command) => {
                if let Some(next) = self.state.apply(command)
                    {self.state = next;}
            },
            None => {},
        }
        if self.state != previous
            {log::trace!("{}: {} -> {}", self.info.position, previous, self.state);}

        // homing starts on the operation mode specific bit 4
        let start = controlword & 0x0010 != 0
            && self.state == DeviceState::OperationEnabled
            && self.mode() == OperationMode::Homing.code();
        if ! start
            {self.homing = None;}
        else if self.homing.is_none()
            {self.homing = Some(0);}
    }

    /// statusword as the drive reports it, each call counts as a read
    fn statusword(&mut self) -> u16 {
        let mut status = self.state.bits() | 0x0200;
        if matches!(self.state,
                DeviceState::ReadyToSwitchOn
                | DeviceState::SwitchedOn
                | DeviceState::OperationEnabled
                | DeviceState::QuickStopActive)
            {status |= 0x0010;}
        if let Some(reads) = self.homing {
            let reads = reads + 1;
            self.homing = Some(reads);
            if reads >= self.behavior.homing_polls
                {status |= if self.behavior.homing_error {0x2000} else {0x1000};}
        }
        else if self.state == DeviceState::OperationEnabled
            && self.mode() == OperationMode::ProfilePosition.code()
            && self.controlword() & 0x0010 != 0
            {status |= 0x1000;}
        status
    }

    /// read the mapping written in the dictionary and size the process data buffers
    fn apply_mapping(&mut self) -> TransportResult<()> {
        let rx = self.mapped(0x1c12)?;
        let tx = self.mapped(0x1c13)?;
        let (rx_size, tx_size) = (size(&rx), size(&tx));
        if rx_size > self.capacity.0 || tx_size > self.capacity.1
            {return Err(TransportError::Protocol("mapped process data exceed the sync manager size"))}
        self.outputs = vec![0; rx_size];
        self.inputs = vec![0; tx_size];
        self.exchanges = 0;
        self.rx = rx;
        self.tx = tx;
        Ok(())
    }
    fn mapped(&self, assignment: u16) -> TransportResult<Vec<PdoEntry>> {
        let invalid = TransportError::Protocol("invalid PDO assignment");
        let mut entries = Vec::new();
        for i in 1 ..= self.integer((assignment, 0)) as u8 {
            let pdo = self.integer((assignment, i)) as u16;
            let count = self.dictionary.get(&(pdo, 0))
                .and_then(|value| value.first().copied())
                .ok_or(invalid.clone())?;
            for j in 1 ..= count {
                let raw = self.dictionary.get(&(pdo, j))
                    .and_then(|value| <[u8; 4]>::try_from(value.as_slice()).ok())
                    .ok_or(invalid.clone())?;
                entries.push(PdoEntry::from(u32::from_le_bytes(raw)));
            }
        }
        Ok(entries)
    }

    /// take the outputs of an exchange, returning the controlword received
    fn take_outputs(&mut self, operational: bool) -> Option<u16> {
        self.exchanges += 1;
        if self.behavior.fault_after.is_some_and(|count| self.exchanges > count)
            && ! self.state.is_fault() {
            log::trace!("{}: {} -> {}", self.info.position, self.state, DeviceState::Fault);
            self.state = DeviceState::Fault;
        }
        let mut controlword = None;
        let mut offset = 0;
        for entry in self.rx.clone() {
            let len = usize::from(entry.bits()) / 8;
            let data = self.outputs.get(offset .. offset + len).map(<[u8]>::to_vec);
            offset += len;
            let Some(data) = data else {break};
            let object = (entry.index(), entry.sub());
            if object == CONTROLWORD {
                controlword = data.as_slice().try_into().ok().map(u16::from_le_bytes);
            }
            if operational && self.dictionary.contains_key(&object) {
                self.dictionary.insert(object, data);
                match object {
                    CONTROLWORD => self.receive(self.controlword()),
                    MODE => {
                        let mode = self.dictionary.get(&MODE).cloned().unwrap_or_default();
                        self.dictionary.insert(MODE_DISPLAY, mode);
                    },
                    _ => {},
                }
            }
        }
        controlword
    }
    /// move according to the current mode and target
    fn integrate(&mut self, elapsed: Duration) {
        let velocity = match OperationMode::try_from(self.mode()) {
            Ok(OperationMode::ProfileVelocity | OperationMode::SynchronousVelocity | OperationMode::Velocity)
            if self.state == DeviceState::OperationEnabled
                => self.integer(TARGET_VELOCITY),
            _ => 0,
            };
        let position = self.integer(ACTUAL_POSITION)
            .wrapping_add((velocity as f64 * elapsed.as_secs_f64()) as i64);
        self.dictionary.insert(ACTUAL_VELOCITY, (velocity as i32).to_le_bytes().to_vec());
        self.dictionary.insert(ACTUAL_POSITION, (position as i32).to_le_bytes().to_vec());
    }
    /// fill the inputs of an exchange
    fn give_inputs(&mut self) {
        let mut offset = 0;
        for entry in self.tx.clone() {
            let len = usize::from(entry.bits()) / 8;
            let object = (entry.index(), entry.sub());
            let value = if object == STATUSWORD {
                self.statusword().to_le_bytes().to_vec()
            } else {
                self.dictionary.get(&object).cloned().unwrap_or_default()
            };
            if let Some(dst) = self.inputs.get_mut(offset .. offset + len) {
                for (dst, src) in dst.iter_mut().zip(value.iter().chain(core::iter::repeat(&0)))
                    {*dst = *src;}
            }
            offset += len;
        }
    }
}

fn size(entries: &[PdoEntry]) -> usize {
    entries.iter().map(|entry| usize::from(entry.bits()) / 8).sum()
}


/// an in-memory network of simulated drives, in topological order
#[derive(Debug)]
pub struct SimulatedBus {
    drives: Vec<SimulatedDrive>,
    state: CommunicationState,
    open: bool,
    exchange_failures: u32,
    last_exchange: Option<Instant>,
    journal: Arc<Mutex<Journal>>,
}
impl SimulatedBus {
    pub fn new(drives: impl IntoIterator<Item=SimulatedDrive>) -> Self {
        let drives = drives.into_iter()
            .enumerate()
            .map(|(position, mut drive)| {
                drive.info.position = DeviceId(position as u16);
                drive
            })
            .collect();
        Self {
            drives,
            state: CommunicationState::Init,
            open: false,
            exchange_failures: 0,
            last_exchange: None,
            journal: Arc::default(),
        }
    }
    /// shared record of the accesses, still readable once the bus is consumed
    pub fn journal(&self) -> Arc<Mutex<Journal>>  {self.journal.clone()}
    /// make the next `count` exchanges fail with a timeout
    pub fn fail_exchanges(&mut self, count: u32)  {self.exchange_failures = count}
    pub fn state(&self) -> CommunicationState  {self.state}
    pub fn drives(&self) -> &[SimulatedDrive]  {&self.drives}
    pub fn drive_mut(&mut self, device: DeviceId) -> Option<&mut SimulatedDrive> {
        self.drives.get_mut(usize::from(device.0))
    }

    fn record(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    fn check_open(&self) -> TransportResult<()> {
        if self.open {Ok(())}
        else {Err(TransportError::Master("network is not open"))}
    }
    fn device(&mut self, device: DeviceId) -> TransportResult<&mut SimulatedDrive> {
        self.check_open()?;
        self.drives.get_mut(usize::from(device.0))
            .ok_or(TransportError::Master("no device at this position"))
    }
}

impl RegisterAccess for SimulatedBus {
    async fn sdo_read(&mut self, device: DeviceId, index: u16, sub: u8, data: &mut [u8]) -> TransportResult<usize> {
        self.device(device)?.read(index, sub, data)
    }
    async fn sdo_write(&mut self, device: DeviceId, index: u16, sub: u8, data: &[u8]) -> TransportResult<()> {
        let network = self.state;
        self.device(device)?.write(index, sub, data, network)?;
        self.record().writes.push(RegisterWrite {device, index, sub, data: data.to_vec()});
        Ok(())
    }
}

impl ProcessData for SimulatedBus {
    async fn exchange(&mut self, _timeout: Duration) -> TransportResult<()> {
        self.check_open()?;
        if self.exchange_failures > 0 {
            self.exchange_failures -= 1;
            self.record().failed_exchanges += 1;
            return Err(TransportError::Timeout("process data exchange"));
        }
        if self.state < CommunicationState::SafeOperational
            {return Err(TransportError::Master("process data is only exchanged once safe-operational"))}

        let now = Instant::now();
        let elapsed = self.last_exchange.map(|last| now - last).unwrap_or_default();
        self.last_exchange = Some(now);
        let operational = self.state == CommunicationState::Operational;
        let mut controlwords = Vec::with_capacity(self.drives.len());
        for drive in &mut self.drives {
            controlwords.push(drive.take_outputs(operational));
            drive.integrate(elapsed);
            drive.give_inputs();
        }
        self.record().exchanges.push(controlwords);
        Ok(())
    }
    fn outputs(&mut self, device: DeviceId) -> TransportResult<&mut [u8]> {
        Ok(self.device(device)?.outputs.as_mut_slice())
    }
    fn inputs(&self, device: DeviceId) -> TransportResult<&[u8]> {
        self.check_open()?;
        self.drives.get(usize::from(device.0))
            .map(|drive| drive.inputs.as_slice())
            .ok_or(TransportError::Master("no device at this position"))
    }
    fn capacity(&self, device: DeviceId) -> TransportResult<(usize, usize)> {
        self.drives.get(usize::from(device.0))
            .map(|drive| drive.capacity)
            .ok_or(TransportError::Master("no device at this position"))
    }
}

impl Fieldbus for SimulatedBus {
    async fn open(&mut self, interface: &str) -> TransportResult<()> {
        if self.open
            {return Err(TransportError::Master("network already open"))}
        log::debug!("simulated network opened on {}", interface);
        self.open = true;
        self.state = CommunicationState::Init;
        self.record().opens += 1;
        Ok(())
    }
    async fn close(&mut self) -> TransportResult<()> {
        self.check_open()?;
        self.open = false;
        self.record().closes += 1;
        Ok(())
    }
    async fn discover(&mut self) -> TransportResult<Vec<DeviceInfo>> {
        self.check_open()?;
        Ok(self.drives.iter().map(|drive| drive.info.clone()).collect())
    }
    async fn switch(&mut self, target: CommunicationState) -> TransportResult<()> {
        self.check_open()?;
        self.record().switches.push(target);
        if target >= CommunicationState::SafeOperational && self.state < CommunicationState::SafeOperational {
            for drive in &mut self.drives
                {drive.apply_mapping()?;}
        }
        self.state = target;
        Ok(())
    }
    async fn confirm(&mut self, target: CommunicationState, _timeout: Duration) -> TransportResult<()> {
        self.check_open()?;
        if self.state == target {Ok(())}
        else {Err(TransportError::Timeout("network state not reached"))}
    }
}
