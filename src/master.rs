/*!
    Abstraction of the cyclic fieldbus master the controller runs on.

    The master library itself (bus access, frame scheduling, slave state machines) is not part
    of this crate; the controller only needs the cyclic-master surface below. Implementations
    wrap a real master, the in-tree [crate::sim::SimMaster] provides a simulated one.

    The expected call sequence is the one of a cyclic master:

    1. [FieldbusMaster::create_domain], then per slave [FieldbusMaster::configure_slave],
       startup [FieldbusMaster::sdo_write_u32] parameters, [FieldbusMaster::configure_pdos]
       and [FieldbusMaster::configure_dc]
    2. [FieldbusMaster::register_pdo_entries] binding process-data objects to image offsets
    3. [FieldbusMaster::activate], after which [FieldbusMaster::pd] is valid
    4. every cycle: `application_time`, `receive`, `process`, `sync_slave_clocks`,
       image reads/writes, `queue`, `send`
*/

use crate::error::ControllerResult;


/// opaque handle to a configured slave, only meaningful to the master that produced it
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SlaveHandle(pub usize);

/// transfer direction of a sync manager, seen from the master
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SyncDirection {
    /// master -> slave
    Output,
    /// slave -> master
    Input,
}

/// watchdog mode of a sync manager
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Watchdog {
    Enable,
    Disable,
}

/**
    one sync manager assignment programmed into a slave

    A drive typically uses four: two mailbox channels without PDOs, one output channel
    carrying the Rx PDOs with the watchdog armed, one input channel carrying the Tx PDOs.
*/
#[derive(Clone, Debug)]
pub struct SyncInfo {
    /// sync manager index (0 ..= 3 on drives)
    pub index: u8,
    pub direction: SyncDirection,
    pub watchdog: Watchdog,
    /// PDOs assigned to this channel
    pub pdos: Vec<crate::sdo::PdoMapping>,
}

/**
    one process-data object to bind into the domain image

    Gap entries are filtered out before registration, every registered entry must resolve to
    an offset. The master answers with one byte offset per entry, in registration order.
*/
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PdoEntryReg {
    pub alias: u16,
    pub position: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub index: u16,
    pub sub: u8,
}

/**
    cyclic fieldbus master surface required by the controller

    The trait is object-safe so drive adapters can program sync managers through
    `&mut dyn FieldbusMaster` without knowing the concrete master.

    Methods of the cyclic group (`application_time` to `send`) are infallible: a cyclic
    master records transient bus errors internally and the next cycle is attempted anyway.
*/
pub trait FieldbusMaster {
    /// create the process-data domain the PDO entries will be registered into
    fn create_domain(&mut self) -> ControllerResult<()>;

    /// obtain a slave configuration handle by bus position and identity
    fn configure_slave(&mut self, alias: u16, position: u16, vendor_id: u32, product_code: u32)
        -> ControllerResult<SlaveHandle>;

    /// write a startup parameter through service data, applied when the slave is brought up
    fn sdo_write_u8(&mut self, slave: SlaveHandle, index: u16, sub: u8, value: u8)
        -> ControllerResult<()>;
    fn sdo_write_u32(&mut self, slave: SlaveHandle, index: u16, sub: u8, value: u32)
        -> ControllerResult<()>;

    /// program the slave's sync managers and their PDO assignment
    fn configure_pdos(&mut self, slave: SlaveHandle, syncs: &[SyncInfo]) -> ControllerResult<()>;

    /// program the slave's distributed-clock sync0 signal
    fn configure_dc(&mut self, slave: SlaveHandle, assign_activate: u16,
        sync0_period_ns: u64, sync0_shift_ns: u64) -> ControllerResult<()>;

    /// select the slave serving as distributed-clock reference
    fn select_reference_clock(&mut self, slave: SlaveHandle) -> ControllerResult<()>;

    /// bind the given entries into the domain, answering one image byte offset per entry
    fn register_pdo_entries(&mut self, entries: &[PdoEntryReg]) -> ControllerResult<Vec<u32>>;

    /// activate the master, freezing the configuration; answers the process-image size
    fn activate(&mut self) -> ControllerResult<usize>;

    /// hand the master the application time used as distributed-clock epoch
    fn application_time(&mut self, ns: u64);
    /// fetch frames received from the bus
    fn receive(&mut self);
    /// evaluate the domain working counters after a receive
    fn process(&mut self);
    /// correct the slave clocks drift toward the reference
    fn sync_slave_clocks(&mut self);
    /// mark the domain data for transmission
    fn queue(&mut self);
    /// emit the queued frames on the bus
    fn send(&mut self);

    /// process image, valid between [Self::activate] and [Self::release]
    fn pd(&self) -> &[u8];
    fn pd_mut(&mut self) -> &mut [u8];

    /// release the master, the process image is not accessible anymore
    fn release(&mut self);
}
