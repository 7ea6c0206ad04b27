/*!
    Simulated fieldbus master and drives.

    [SimMaster] implements the full [FieldbusMaster] surface over an in-memory process
    image, with one simulated drive per configured slave. Drives either react to control
    words like a well-behaved CiA-402 power stage (bring-up transitions, fault reset), or
    play back a scripted status sequence when a test needs exact bus behavior.

    The master state is shared behind the [SimBus] handle, so a test can keep inspecting
    drives, programmed sync managers and the control words emitted each cycle while the
    controller owns the master.
*/

use crate::{
    error::{ControllerError, ControllerResult},
    master::{FieldbusMaster, PdoEntryReg, SlaveHandle, SyncInfo},
    sdo::cia402,
    data,
    };
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    };


/// status word a freshly powered simulated drive reports: switch-on disabled
pub const POWERUP_STATUS: u16 = 0x0250;
const READY_STATUS: u16 = 0x0231;
const SWITCHED_STATUS: u16 = 0x0233;
const ENABLED_STATUS: u16 = 0x0237;

/// one simulated CiA-402 power stage
pub struct SimDrive {
    pub status: u16,
    pub actual_position: i32,
    pub mode_display: i8,
    /// control word observed at each cycle's send, in cycle order
    pub control_log: Vec<u16>,
    /// target position observed at each cycle's send
    pub target_log: Vec<i32>,
    /// statuses to report on the next receives; while non-empty the reactive model is off
    pub script: VecDeque<u16>,
    /// react to control words with the standard power-state transitions
    pub reactive: bool,
}
impl Default for SimDrive {
    fn default() -> Self {
        Self {
            status: POWERUP_STATUS,
            actual_position: 0,
            mode_display: 0,
            control_log: Vec::new(),
            target_log: Vec::new(),
            script: VecDeque::new(),
            reactive: true,
        }
    }
}
impl SimDrive {
    /// standard reaction of the power stage to a received control word
    fn react(&mut self, control: u16, target: i32) {
        if control & 0x0080 != 0 {
            // fault reset: faulted drives recover into switch-on disabled
            if self.status & 0x0008 != 0 {
                self.status = POWERUP_STATUS;
            }
            return;
        }
        if self.status & 0x0008 != 0 {
            // faulted and no reset requested: stay faulted
            return;
        }
        match control & 0x000f {
            0x0006 => self.status = READY_STATUS,
            0x0007 => {
                if self.status & 0x0001 != 0 {self.status = SWITCHED_STATUS}
            }
            0x000f => {
                if self.status & 0x0003 != 0 {
                    self.status = ENABLED_STATUS;
                    self.mode_display = 8;
                    self.actual_position = target;
                }
            }
            _ => {}
        }
        if self.status == ENABLED_STATUS {
            self.actual_position = target;
        }
    }
}

/// everything a simulated slave accumulated during bootstrap and cycles
pub struct SimSlave {
    pub position: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    /// startup parameters written through service data: (index, sub, value)
    pub sdo_writes: Vec<(u16, u8, u32)>,
    pub syncs: Vec<SyncInfo>,
    /// (assign_activate, sync0 period, sync0 shift)
    pub dc: Option<(u16, u64, u64)>,
    /// image offsets bound at registration, keyed by (object index, sub)
    pub offsets: Vec<((u16, u8), u32)>,
    pub drive: SimDrive,
}
impl SimSlave {
    fn offset(&self, index: u16, sub: u8) -> Option<usize> {
        self.offsets.iter()
            .find(|(key, _)| *key == (index, sub))
            .map(|(_, offset)| *offset as usize)
    }
    /// bit length of a programmed entry, looked up in the sync manager assignment
    fn bitlen(&self, index: u16, sub: u8) -> Option<u8> {
        self.syncs.iter()
            .flat_map(|sync| &sync.pdos)
            .flat_map(|pdo| &pdo.entries)
            .find(|entry| ! entry.is_gap() && entry.index == index && entry.sub == sub)
            .map(|entry| entry.bitlen)
    }
}

#[derive(Default)]
pub struct SimState {
    pub slaves: Vec<SimSlave>,
    pub reference_clock: Option<usize>,
    pub application_time: u64,
    pub domain_created: bool,
    pub activated: bool,
    pub released: bool,
    pub cycles: u64,
}

/// shared handle onto the simulated bus state
#[derive(Clone, Default)]
pub struct SimBus(Arc<Mutex<SimState>>);
impl SimBus {
    pub fn new() -> Self {Self::default()}

    pub fn lock(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }
    /// force the status a slave reports from the next receive on
    pub fn set_status(&self, slave: usize, status: u16) {
        self.lock().slaves[slave].drive.status = status;
    }
    /// enqueue scripted statuses, reported one per receive
    pub fn script(&self, slave: usize, statuses: &[u16]) {
        let mut state = self.lock();
        let drive = &mut state.slaves[slave].drive;
        drive.script.extend(statuses.iter().copied());
    }
    /// control words observed at each cycle's send so far
    pub fn control_log(&self, slave: usize) -> Vec<u16> {
        self.lock().slaves[slave].drive.control_log.clone()
    }
    pub fn status(&self, slave: usize) -> u16 {
        self.lock().slaves[slave].drive.status
    }
    pub fn actual_position(&self, slave: usize) -> i32 {
        self.lock().slaves[slave].drive.actual_position
    }
    pub fn set_actual_position(&self, slave: usize, position: i32) {
        self.lock().slaves[slave].drive.actual_position = position;
    }
}

/// simulated master: the [FieldbusMaster] implementation tests and demos run against
pub struct SimMaster {
    bus: SimBus,
    image: Vec<u8>,
}
impl SimMaster {
    pub fn new() -> Self {
        Self {bus: SimBus::new(), image: Vec::new()}
    }
    /// handle kept by the caller to script and inspect the bus
    pub fn bus(&self) -> SimBus {
        self.bus.clone()
    }
}
impl Default for SimMaster {
    fn default() -> Self {Self::new()}
}

impl FieldbusMaster for SimMaster {
    fn create_domain(&mut self) -> ControllerResult<()> {
        self.bus.lock().domain_created = true;
        Ok(())
    }

    fn configure_slave(&mut self, _alias: u16, position: u16, vendor_id: u32,
            product_code: u32) -> ControllerResult<SlaveHandle> {
        let mut state = self.bus.lock();
        if let Some(existing) = state.slaves.iter().position(|s| s.position == position) {
            return Ok(SlaveHandle(existing));
        }
        state.slaves.push(SimSlave {
            position, vendor_id, product_code,
            sdo_writes: Vec::new(),
            syncs: Vec::new(),
            dc: None,
            offsets: Vec::new(),
            drive: SimDrive::default(),
            });
        Ok(SlaveHandle(state.slaves.len() - 1))
    }

    fn sdo_write_u8(&mut self, slave: SlaveHandle, index: u16, sub: u8, value: u8)
            -> ControllerResult<()> {
        self.bus.lock().slaves[slave.0].sdo_writes.push((index, sub, value as u32));
        Ok(())
    }
    fn sdo_write_u32(&mut self, slave: SlaveHandle, index: u16, sub: u8, value: u32)
            -> ControllerResult<()> {
        self.bus.lock().slaves[slave.0].sdo_writes.push((index, sub, value));
        Ok(())
    }

    fn configure_pdos(&mut self, slave: SlaveHandle, syncs: &[SyncInfo]) -> ControllerResult<()> {
        self.bus.lock().slaves[slave.0].syncs = syncs.to_vec();
        Ok(())
    }

    fn configure_dc(&mut self, slave: SlaveHandle, assign_activate: u16,
            sync0_period_ns: u64, sync0_shift_ns: u64) -> ControllerResult<()> {
        self.bus.lock().slaves[slave.0].dc =
            Some((assign_activate, sync0_period_ns, sync0_shift_ns));
        Ok(())
    }

    fn select_reference_clock(&mut self, slave: SlaveHandle) -> ControllerResult<()> {
        self.bus.lock().reference_clock = Some(slave.0);
        Ok(())
    }

    fn register_pdo_entries(&mut self, entries: &[PdoEntryReg]) -> ControllerResult<Vec<u32>> {
        let mut state = self.bus.lock();
        let mut offsets = Vec::with_capacity(entries.len());
        let mut cursor = 0u32;
        for reg in entries {
            let slave = state.slaves.iter_mut()
                .find(|s| s.position == reg.position
                    && s.vendor_id == reg.vendor_id
                    && s.product_code == reg.product_code)
                .ok_or_else(|| ControllerError::Config(format!(
                    "registration for unconfigured slave at position {}", reg.position)))?;
            let bitlen = slave.bitlen(reg.index, reg.sub)
                .ok_or_else(|| ControllerError::Config(format!(
                    "entry {:#06x}:{} not programmed on slave {}",
                    reg.index, reg.sub, reg.position)))?;
            slave.offsets.push(((reg.index, reg.sub), cursor));
            offsets.push(cursor);
            cursor += (bitlen as u32 + 7) / 8;
        }
        drop(state);
        self.image = vec![0; cursor as usize];
        Ok(offsets)
    }

    fn activate(&mut self) -> ControllerResult<usize> {
        let mut state = self.bus.lock();
        if ! state.domain_created {
            return Err(ControllerError::Init("activate before domain creation"));
        }
        state.activated = true;
        Ok(self.image.len())
    }

    fn application_time(&mut self, ns: u64) {
        self.bus.lock().application_time = ns;
    }

    fn receive(&mut self) {
        let mut state = self.bus.lock();
        for slave in state.slaves.iter_mut() {
            if let Some(status) = slave.drive.script.pop_front() {
                slave.drive.status = status;
            }
            if let Some(offset) = slave.offset(cia402::statusword.index, 0) {
                data::write_le_u16(&mut self.image[offset ..], slave.drive.status);
            }
            if let Some(offset) = slave.offset(cia402::current::position.index, 0) {
                data::write_le_i32(&mut self.image[offset ..], slave.drive.actual_position);
            }
            if let Some(offset) = slave.offset(cia402::current::mode.index, 0) {
                self.image[offset] = slave.drive.mode_display as u8;
            }
        }
    }

    fn process(&mut self) {}
    fn sync_slave_clocks(&mut self) {}
    fn queue(&mut self) {}

    fn send(&mut self) {
        let mut state = self.bus.lock();
        state.cycles += 1;
        for slave in state.slaves.iter_mut() {
            let control = slave.offset(cia402::controlword.index, 0)
                .map(|offset| data::read_le_u16(&self.image[offset ..]))
                .unwrap_or(0);
            let target = slave.offset(cia402::target::position.index, 0)
                .map(|offset| data::read_le_i32(&self.image[offset ..]))
                .unwrap_or(0);
            slave.drive.control_log.push(control);
            slave.drive.target_log.push(target);
            if slave.drive.reactive && slave.drive.script.is_empty() {
                slave.drive.react(control, target);
            }
        }
    }

    fn pd(&self) -> &[u8] {&self.image}
    fn pd_mut(&mut self) -> &mut [u8] {&mut self.image}

    fn release(&mut self) {
        let mut state = self.bus.lock();
        state.activated = false;
        state.released = true;
    }
}
