/*!
    Drive adapters: the capability objects letting different vendor drives plug into the same
    state-machine surface.

    An adapter is deterministic and performs no bus I/O by itself: it publishes the drive's
    identity and PDO descriptors, programs sync managers through the master abstraction,
    decodes status fields from the process image, encodes control fields into it, and emits
    the per-cycle control word of the power state machine. The [StandardAdapter] implements
    the plain CiA-402 behavior, vendor types in [crate::vendors] override parts of it.
*/

use crate::{
    error::ControllerResult,
    mapping::{InputOffsets, OutputOffsets},
    master::{FieldbusMaster, SlaveHandle, SyncDirection, SyncInfo, Watchdog},
    sdo::{self, control, PdoEntry, PdoMapping},
    };
use std::sync::Arc;


/// identity of a drive as published by its adapter or discovered on the bus
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MotorIdentity {
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision: u32,
    pub serial: u32,
    pub name: String,
    /// whether the drive supports distributed clocks
    pub has_dc: bool,
    /// bus position, negative while unknown
    pub position: i32,
}

/// decoded input snapshot of one drive
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DriveStatus {
    pub status_word: u16,
    pub actual_position: i32,
    pub actual_velocity: i32,
    pub actual_torque: i16,
    pub op_mode: i8,
    pub error_code: u16,
}

/// output values to encode for one drive
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DriveControl {
    pub control_word: u16,
    pub target_position: i32,
    pub target_velocity: i32,
    pub target_torque: i16,
    pub op_mode: i8,
}

/**
    capability object for one drive family

    Adapters are shared between the axes they matched ([AdapterRegistry] hands out clones of
    the same instance), so implementations with internal state must guard it themselves.
*/
pub trait DriveAdapter: Send + Sync {
    /// identity of the drive family this adapter supports
    fn motor_info(&self) -> MotorIdentity;

    /// true if this adapter drives the given identity
    fn supports(&self, vendor_id: u32, product_code: u32) -> bool;

    fn name(&self) -> &str;

    /// output (controller -> drive) entries, in emission order, possibly with gaps
    fn rx_pdo(&self) -> Vec<PdoEntry>;

    /// input (drive -> controller) entries, in emission order, possibly with gaps
    fn tx_pdo(&self) -> Vec<PdoEntry>;

    /**
        program the drive's sync managers

        The default programming is the one every CiA-402 drive of this controller uses: two
        empty mailbox channels, the Rx PDO on SM2 with the watchdog armed, the Tx PDO on SM3.
    */
    fn configure_pdos(&self, bus: &mut dyn FieldbusMaster, slave: SlaveHandle)
            -> ControllerResult {
        bus.configure_pdos(slave, &[
            SyncInfo {index: 0, direction: SyncDirection::Output, watchdog: Watchdog::Disable,
                pdos: vec![]},
            SyncInfo {index: 1, direction: SyncDirection::Input, watchdog: Watchdog::Disable,
                pdos: vec![]},
            SyncInfo {index: 2, direction: SyncDirection::Output, watchdog: Watchdog::Enable,
                pdos: vec![PdoMapping::new(sdo::receive_pdos_start, self.rx_pdo())]},
            SyncInfo {index: 3, direction: SyncDirection::Input, watchdog: Watchdog::Disable,
                pdos: vec![PdoMapping::new(sdo::transmit_pdos_start, self.tx_pdo())]},
            ])
    }

    /// decode the drive's input objects from the process image
    fn read_status(&self, pd: &[u8], inp: &InputOffsets) -> DriveStatus {
        DriveStatus {
            status_word: inp.read_status_word(pd),
            actual_position: inp.read_actual_position(pd),
            actual_velocity: inp.read_actual_velocity(pd),
            actual_torque: inp.read_actual_torque(pd),
            op_mode: inp.read_mode_display(pd),
            error_code: inp.read_error_code(pd),
        }
    }

    /// encode the drive's output objects into the process image
    ///
    /// velocity and torque targets are only written on drives that map them
    fn write_control(&self, pd: &mut [u8], out: &OutputOffsets, control: &DriveControl) {
        out.write_control_word(pd, control.control_word);
        out.write_op_mode(pd, control.op_mode);
        out.write_target_position(pd, control.target_position);
        out.write_target_velocity(pd, control.target_velocity);
        out.write_target_torque(pd, control.target_torque);
    }

    /**
        per-cycle state machine step: derive the control word to emit from the status word

        `start_pos` may be updated by vendor implementations that latch a restart position,
        `run_enable` reports whether the drive is considered good to run. The standard
        implementation agrees byte for byte with the transition table of the cyclic driver.
    */
    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16;
}


/**
    plain CiA-402 adapter: default entry layout, standard power state machine

    Used directly as fallback for unrecognized drives, and reused by most vendor adapters for
    the states their drive does not treat specially.
*/
#[derive(Default)]
pub struct StandardAdapter;

impl StandardAdapter {
    /// the standard state step, callable by vendor adapters falling back on it
    pub fn standard_control(status: u16, _start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        let ready = status & 0x0001 != 0;
        let switched = status & 0x0002 != 0;
        let op_enabled = status & 0x0004 != 0;
        let fault = status & 0x0008 != 0;
        let switch_on_disabled = status & 0x0040 != 0;

        if fault {
            *run_enable = false;
            control::FAULT_RESET
        } else if switch_on_disabled {
            // leave switch-on-disabled towards ready-to-switch-on
            control::SHUTDOWN
        } else if ready && !switched {
            control::SWITCH_ON
        } else if ready && switched && !op_enabled {
            control::ENABLE_OPERATION
        } else if op_enabled {
            *run_enable = true;
            control::ENABLE_OPERATION
        } else {
            // not ready to switch on, or an unexpected state: fall back on shutdown
            control::SHUTDOWN
        }
    }
}

impl DriveAdapter for StandardAdapter {
    fn motor_info(&self) -> MotorIdentity {
        MotorIdentity {
            name: "Standard CiA-402 Drive".into(),
            has_dc: true,
            position: -1,
            .. Default::default()
        }
    }
    /// the standard adapter matches nothing by itself, it is only used as explicit fallback
    fn supports(&self, _vendor_id: u32, _product_code: u32) -> bool {false}

    fn name(&self) -> &str {"Standard Adapter"}

    fn rx_pdo(&self) -> Vec<PdoEntry> {sdo::DEFAULT_OUTPUT.to_vec()}
    fn tx_pdo(&self) -> Vec<PdoEntry> {sdo::DEFAULT_INPUT.to_vec()}

    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        Self::standard_control(status, start_pos, run_enable)
    }
}


/**
    ordered collection of adapters, queried by drive identity

    Registration order is insertion order, duplicates are allowed, the first adapter whose
    [DriveAdapter::supports] predicate answers true wins. The registry is a plain value
    handed to [crate::Controller::create], so tests can substitute their own.
*/
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn DriveAdapter>>,
}
impl AdapterRegistry {
    pub fn new() -> Self {Self::default()}

    /// registry pre-loaded with the built-in vendor adapters
    pub fn defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::vendors::EyouAdapter::default()));
        registry.register(Arc::new(crate::vendors::DeltaAdapter));
        registry.register(Arc::new(crate::vendors::YaskawaAdapter));
        registry.register(Arc::new(crate::vendors::PanasonicAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn DriveAdapter>) {
        self.adapters.push(adapter);
    }

    /// first registered adapter supporting the given identity
    pub fn find(&self, vendor_id: u32, product_code: u32) -> Option<Arc<dyn DriveAdapter>> {
        self.adapters.iter()
            .find(|adapter| adapter.supports(vendor_id, product_code))
            .cloned()
    }

    pub fn all(&self) -> &[Arc<dyn DriveAdapter>] {&self.adapters}

    pub fn len(&self) -> usize {self.adapters.len()}
    pub fn is_empty(&self) -> bool {self.adapters.is_empty()}

    /// drop every registered adapter (used by tests)
    pub fn clear(&mut self) {
        self.adapters.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdo::state;

    #[test]
    fn standard_control_follows_the_table() {
        let mut start = 0;
        let mut run = false;
        // (masked status, expected control word)
        for (status, expected) in [
                (state::NOT_READY, control::SHUTDOWN),
                (state::SWITCH_ON_DISABLED, control::SHUTDOWN),
                (state::READY_TO_SWITCH_ON, control::SWITCH_ON),
                (state::SWITCHED_ON, control::ENABLE_OPERATION),
                (state::OPERATION_ENABLED, control::ENABLE_OPERATION),
                (0x0060, control::SHUTDOWN),
                ] {
            assert_eq!(
                StandardAdapter::standard_control(status, &mut start, &mut run),
                expected, "status {:#06x}", status);
        }
        assert!(run);
    }

    #[test]
    fn fault_requests_reset_and_clears_run() {
        let mut start = 0;
        let mut run = true;
        assert_eq!(
            StandardAdapter::standard_control(0x0008, &mut start, &mut run),
            control::FAULT_RESET);
        assert!(! run);
    }

    #[test]
    fn registry_first_match_wins() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(StandardAdapter));
        registry.register(Arc::new(crate::vendors::EyouAdapter::default()));
        registry.register(Arc::new(crate::vendors::EyouAdapter::default()));

        let found = registry.find(0x0000_1097, 0x0000_2406).expect("eyou registered");
        assert_eq!(found.name(), "EYOU Adapter");
        // first match is the first registered eyou instance
        assert!(Arc::ptr_eq(
            &found,
            &registry.all()[1]));
        assert!(registry.find(0xdead, 0xbeef).is_none());

        registry.clear();
        assert!(registry.is_empty());
    }
}
