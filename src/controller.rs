/*!
    The controller: bus bootstrap, cyclic pipeline and the caller-facing surface.

    [Controller::create] performs the whole bootstrap against the given master and returns a
    ready-to-cycle controller. From then on the caller owns the pacing: [Controller::tick]
    runs exactly one cycle and must be invoked at the configured period, the controller never
    sleeps and never allocates inside the cycle.

    Everything callable from outside the cycle thread goes through the command record (mutex
    guarded, copied out once per tick) or the atomic running flag; the per-axis runtime state
    and the process image belong to the cycle thread alone.
*/

use crate::{
    adapter::{AdapterRegistry, DriveAdapter, DriveStatus, StandardAdapter},
    axis::{Axis, AxisDiag},
    barrier::{Clock, StartBarrier, SystemClock},
    config::ControllerConfig,
    eni::{self, EniSlave},
    error::{ControllerError, ControllerResult},
    mapping::{AxisLayout, Registration},
    master::{FieldbusMaster, SlaveHandle, SyncDirection, SyncInfo, Watchdog},
    sdo::{cia402, PdoMapping},
    };
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
        },
    };
use tracing::{debug, info, warn};


/// cycles between two rate-limited cycle diagnostics
const DIAG_CYCLE_PERIOD: u64 = 500;

/// per-axis motion intent, written by any caller, read once per tick
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Command {
    pub run: bool,
    /// -1, 0 or +1
    pub direction: i32,
    /// per-cycle step in position counts, clamped to [1, 100 000]
    pub step: i32,
}

/// the multi-axis servo controller
pub struct Controller<M: FieldbusMaster> {
    master: M,
    config: ControllerConfig,
    clock: Box<dyn Clock>,
    axes: Vec<Axis>,
    handles: Vec<SlaveHandle>,
    barrier: StartBarrier,
    command: Mutex<Command>,
    running: AtomicBool,
    released: bool,
    cycles: u64,
}

impl<M: FieldbusMaster> Controller<M> {
    /**
        bootstrap the controller: acquire the bus, configure and register every axis,
        activate, and answer ready to cycle

        `eni_path` selects the slave set; without it the configured default slaves are
        assumed. The registry decides which adapter drives each discovered identity.
    */
    pub fn create(master: M, registry: &AdapterRegistry, config: ControllerConfig,
            eni_path: Option<&Path>) -> ControllerResult<Self> {
        Self::with_clock(master, registry, config, eni_path, Box::new(SystemClock::new()))
    }

    /// [Self::create] with an explicit time source, used by tests and simulated runs
    pub fn with_clock(mut master: M, registry: &AdapterRegistry, config: ControllerConfig,
            eni_path: Option<&Path>, clock: Box<dyn Clock>) -> ControllerResult<Self> {
        config.validate()?;

        master.create_domain()?;

        let slaves: Vec<EniSlave> = match eni_path {
            Some(path) => {
                let slaves = eni::parse_file(path)?;
                info!(count = slaves.len(), ?path, "network information parsed");
                slaves
            }
            None => {
                warn!(count = config.default_slaves.len(),
                    "no network information given, assuming default slaves");
                config.default_slaves.iter()
                    .map(|spec| EniSlave {
                        position: spec.position,
                        vendor_id: spec.vendor_id,
                        product_code: spec.product_code,
                        .. Default::default()
                        })
                    .collect()
            }
        };
        if slaves.is_empty() {
            return Err(ControllerError::Config("no slaves to configure".into()));
        }
        for (index, slave) in slaves.iter().enumerate() {
            // positions must be unique, the registration is keyed on them
            if slaves[.. index].iter().any(|other| other.position == slave.position) {
                return Err(ControllerError::Config(format!(
                    "duplicate bus position {}", slave.position)));
            }
        }

        let mut axes = Vec::with_capacity(slaves.len());
        let mut handles = Vec::with_capacity(slaves.len());
        for slave in &slaves {
            let adapter = match registry.find(slave.vendor_id, slave.product_code) {
                Some(adapter) => {
                    info!(position = slave.position, adapter = adapter.name(),
                        "adapter selected");
                    adapter
                }
                None if config.fallback_standard => {
                    warn!(position = slave.position,
                        vendor_id = format_args!("{:#010x}", slave.vendor_id),
                        product_code = format_args!("{:#010x}", slave.product_code),
                        "no adapter registered, falling back on the standard adapter");
                    Arc::new(StandardAdapter) as Arc<dyn DriveAdapter>
                }
                None => return Err(ControllerError::Config(format!(
                    "no adapter for vendor {:#010x} product {:#010x}",
                    slave.vendor_id, slave.product_code))),
            };

            let handle = master.configure_slave(
                0, slave.position, slave.vendor_id, slave.product_code)?;

            write_init_parameters(&mut master, handle, &config, slave.position);

            // program sync managers from the file's descriptors when it carries some,
            // from the adapter's defaults otherwise
            let (rx_entries, tx_entries) =
                if ! slave.rx_pdos.is_empty() || ! slave.tx_pdos.is_empty() {
                    master.configure_pdos(handle, &eni_sync_managers(slave))?;
                    (flatten(&slave.rx_pdos), flatten(&slave.tx_pdos))
                } else {
                    adapter.configure_pdos(&mut master, handle)?;
                    (adapter.rx_pdo(), adapter.tx_pdo())
                };

            let mut identity = adapter.motor_info();
            identity.vendor_id = slave.vendor_id;
            identity.product_code = slave.product_code;
            identity.revision = slave.revision;
            identity.serial = slave.serial;
            identity.position = slave.position as i32;
            if ! slave.name.is_empty() {
                identity.name = slave.name.clone();
            }

            axes.push(Axis::new(identity, slave.position, adapter,
                AxisLayout::new(rx_entries, tx_entries)));
            handles.push(handle);
        }

        // one registration entry per non-gap PDO entry, outputs first, axis by axis
        let mut registration = Registration::new();
        for (index, axis) in axes.iter().enumerate() {
            registration.push_axis(index, axis.position,
                axis.identity.vendor_id, axis.identity.product_code, &axis.layout);
        }
        let offsets = master.register_pdo_entries(registration.entries())?;
        {
            let mut layouts: Vec<AxisLayout> = axes.iter_mut()
                .map(|axis| core::mem::take(&mut axis.layout))
                .collect();
            registration.bind(&offsets, &mut layouts)?;
            for (axis, layout) in axes.iter_mut().zip(layouts) {
                axis.layout = layout;
                axis.bind_offsets();
            }
        }

        master.select_reference_clock(handles[0])?;
        for handle in &handles {
            master.configure_dc(*handle, config.dc_assign_activate,
                config.sync0_period_ns(), 0)?;
        }

        let image_size = master.activate()?;
        check_image_bounds(&axes, image_size)?;

        info!(axes = axes.len(), image_size, cycle_us = config.cycle_us,
            "controller activated");
        let barrier = StartBarrier::new(config.barrier_delay_ns);
        Ok(Self {
            master,
            clock,
            axes,
            handles,
            barrier,
            command: Mutex::new(Command::default()),
            running: AtomicBool::new(true),
            released: false,
            cycles: 0,
            config,
        })
    }

    /**
        run exactly one cycle: receive, drive every axis one state-machine step, apply the
        start barrier, send

        Must be called at the configured period; the controller does not sleep. Cycle errors
        are recorded and never propagated, the next cycle is always attempted.
    */
    pub fn tick(&mut self) {
        if self.released {return}

        let now = self.clock.now_ns();
        self.master.application_time(now);
        self.master.receive();
        self.master.process();
        self.master.sync_slave_clocks();

        let command = *self.command.lock().unwrap();
        let raw_delta = if command.run {command.direction * command.step} else {0};
        let delta = raw_delta
            .clamp(-self.config.max_delta_per_cycle, self.config.max_delta_per_cycle);
        let motion_started = self.barrier.motion_started();
        self.cycles += 1;

        let warmup = self.config.csp_warmup_cycles;
        let pd = self.master.pd_mut();
        for axis in self.axes.iter_mut() {
            axis.read_inputs(pd);
            if ! axis.servo_enabled {
                axis.step_prelude(pd, warmup);
            } else if ! motion_started {
                axis.step_hold(pd);
            } else {
                axis.step_run(pd, delta);
            }
        }

        let all_enabled = ! self.axes.is_empty()
            && self.axes.iter().all(|axis| axis.seen_enabled);
        if self.barrier.step(command.run, all_enabled, now) {
            for axis in self.axes.iter_mut() {
                axis.seed_target(pd);
            }
        }

        if self.cycles % DIAG_CYCLE_PERIOD == 0 {
            for axis in &self.axes {
                debug!(position = axis.position,
                    status = format_args!("{:#06x}", axis.status_word),
                    target = axis.csp_target,
                    actual = axis.actual_position,
                    mode = axis.mode_display,
                    enabled = axis.servo_enabled,
                    "cycle state");
            }
        }

        self.master.queue();
        self.master.send();
    }

    /// update the motion intent; takes effect from the next tick
    pub fn set_command(&self, run: bool, direction: i32, step: i32) {
        let step = step.clamp(1, 100_000);
        let direction = if (-1 ..= 1).contains(&direction) {direction} else {0};
        *self.command.lock().unwrap() = Command {run, direction, step};
    }

    /// write the operation mode and the interpolation-buffer byte of one axis immediately
    pub fn set_opmode(&mut self, axis: usize, op_mode: i8, interpolation: u8) {
        let Some(slot) = self.axes.get_mut(axis) else {return};
        let pd = self.master.pd_mut();
        slot.out.write_op_mode(pd, op_mode);
        slot.out.write_interpolation_buffer(pd, interpolation);
        slot.op_mode = op_mode;
    }

    /// one-shot fault clear on one axis: 0x0080 written immediately, prelude restarted
    pub fn reset(&mut self, axis: usize) {
        let Some(slot) = self.axes.get_mut(axis) else {return};
        slot.reset(self.master.pd_mut());
    }

    /// status word of one axis, 0 on a bad index
    pub fn status(&self, axis: usize) -> u16 {
        self.axes.get(axis)
            .map(|slot| slot.inp.read_status_word(self.master.pd()))
            .unwrap_or(0)
    }

    /// actual position of one axis, 0 on a bad index
    pub fn actual_position(&self, axis: usize) -> i32 {
        self.axes.get(axis)
            .map(|slot| slot.inp.read_actual_position(self.master.pd()))
            .unwrap_or(0)
    }

    /// adapter name of one axis, empty on a bad index
    pub fn adapter_name(&self, axis: usize) -> String {
        self.axes.get(axis)
            .map(|slot| slot.adapter.name().to_string())
            .unwrap_or_default()
    }

    /// identity summary of one axis, empty on a bad index
    pub fn motor_info(&self, axis: usize) -> String {
        self.axes.get(axis)
            .map(|slot| format!("VID: {:#010X}, PID: {:#010X}",
                slot.identity.vendor_id, slot.identity.product_code))
            .unwrap_or_default()
    }

    /// diagnostic snapshot of one axis, all zero on a bad index
    pub fn diagnostics(&self, axis: usize) -> AxisDiag {
        self.axes.get(axis)
            .map(|slot| slot.diagnostics(self.master.pd()))
            .unwrap_or_default()
    }

    /// decoded input snapshot of one axis through its adapter, all zero on a bad index
    pub fn drive_status(&self, axis: usize) -> DriveStatus {
        self.axes.get(axis)
            .map(|slot| slot.adapter.read_status(self.master.pd(), &slot.inp))
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {self.axes.len()}

    pub fn running(&self) -> bool {self.running.load(Ordering::SeqCst)}

    /// ask the host loop to stop calling [Self::tick]; safe from a signal context
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// true once every axis currently reports operation-enabled
    pub fn all_enabled(&self) -> bool {
        ! self.axes.is_empty() && self.axes.iter().all(|axis| axis.seen_enabled)
    }

    pub fn motion_started(&self) -> bool {self.barrier.motion_started()}

    pub fn config(&self) -> &ControllerConfig {&self.config}

    /// axis slot access for host-side inspection
    pub fn axis(&self, axis: usize) -> Option<&Axis> {self.axes.get(axis)}

    /// slave configuration handles, in axis order
    pub fn slave_handles(&self) -> &[SlaveHandle] {&self.handles}

    /// stop cycling and release the master; the process image becomes inaccessible
    pub fn shutdown(&mut self) {
        if self.released {return}
        self.running.store(false, Ordering::SeqCst);
        self.released = true;
        self.master.release();
        info!("controller released");
    }
}

impl<M: FieldbusMaster> Drop for Controller<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}


/// startup parameter writes; failures are tolerated, the drive may simply not know the object
fn write_init_parameters<M: FieldbusMaster>(master: &mut M, handle: SlaveHandle,
        config: &ControllerConfig, position: u16) {
    let writes = [
        master.sdo_write_u8(handle, cia402::startup::interpolation_period, 2,
            config.interpolation_exponent as u8),
        master.sdo_write_u8(handle, cia402::startup::interpolation_period, 1,
            config.interpolation_base_ms()),
        master.sdo_write_u32(handle, cia402::startup::profile_velocity, 0,
            config.profile_velocity),
        master.sdo_write_u32(handle, cia402::startup::profile_acceleration, 0,
            config.profile_acceleration),
        master.sdo_write_u32(handle, cia402::startup::profile_deceleration, 0,
            config.profile_deceleration),
        ];
    for result in writes {
        if let Err(error) = result {
            warn!(position, %error, "startup parameter write failed");
        }
    }
}

/// the four sync-manager assignments built from a slave's file descriptors
fn eni_sync_managers(slave: &EniSlave) -> [SyncInfo; 4] {
    [
        SyncInfo {index: 0, direction: SyncDirection::Output, watchdog: Watchdog::Disable,
            pdos: vec![]},
        SyncInfo {index: 1, direction: SyncDirection::Input, watchdog: Watchdog::Disable,
            pdos: vec![]},
        SyncInfo {index: 2, direction: SyncDirection::Output, watchdog: Watchdog::Enable,
            pdos: slave.rx_pdos.clone()},
        SyncInfo {index: 3, direction: SyncDirection::Input, watchdog: Watchdog::Disable,
            pdos: slave.tx_pdos.clone()},
    ]
}

/// flatten a slave's PDO descriptors into one ordered entry list
fn flatten(pdos: &[PdoMapping]) -> Vec<crate::sdo::PdoEntry> {
    pdos.iter().flat_map(|pdo| pdo.entries.iter().copied()).collect()
}

/// every bound entry must land inside the activated process image
fn check_image_bounds(axes: &[Axis], image_size: usize) -> ControllerResult<()> {
    for axis in axes {
        for (entry, offset) in axis.layout.rx.iter().zip(&axis.layout.rx_offsets)
                .chain(axis.layout.tx.iter().zip(&axis.layout.tx_offsets)) {
            if let Some(offset) = offset {
                if *offset as usize + entry.bytes() > image_size {
                    return Err(ControllerError::Init("registered entry outside process image"));
                }
            }
        }
    }
    Ok(())
}
