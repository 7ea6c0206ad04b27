/*!
    Per-axis state and the cyclic CiA-402 power-state step.

    One [Axis] exists per configured drive for the whole controller lifetime. Its runtime
    fields are touched only by the cycle thread; the bootstrap binds its process-image
    offsets before the first cycle runs.

    The power-state walk is: not-ready -> switch-on-disabled -> ready-to-switch-on ->
    switched-on -> operation-enabled, driven by the control words the adapter emits from the
    observed status. Once an axis has been seen operation-enabled it is `servo_enabled` and
    stays so (the prelude is never re-issued) until an explicit reset; from then on the axis
    runs in cyclic synchronous position, its target managed by the warmup / hold / advance
    policy of the cycle pipeline.
*/

use crate::{
    adapter::{DriveAdapter, DriveControl, MotorIdentity},
    mapping::{AxisLayout, InputOffsets, OutputOffsets},
    sdo::{control, state, OperationMode, STATE_MASK},
    };
use std::sync::Arc;
use tracing::{debug, info, warn};


/// consecutive faulted cycles after a reset attempt before the fault is reported persistent
pub const FAULT_PERSISTENT_CYCLES: u32 = 100;

/// diagnostic snapshot of one axis, read straight from the process image
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AxisDiag {
    pub status_word: u16,
    pub mode_display: i8,
    pub target_position: i32,
    pub actual_position: i32,
    pub following_error: i32,
    pub error_code: u16,
    pub servo_error: u16,
    pub digital_inputs: u32,
    pub probe_status: u16,
    pub probe_position: i32,
    /// the fault bit stayed set for more than [FAULT_PERSISTENT_CYCLES] after a reset
    pub fault_persistent: bool,
}

/// per-drive slot: identity, adapter, image offsets and cyclic runtime state
pub struct Axis {
    pub identity: MotorIdentity,
    pub position: u16,
    pub adapter: Arc<dyn DriveAdapter>,
    pub layout: AxisLayout,
    pub out: OutputOffsets,
    pub inp: InputOffsets,

    /// status word read this cycle
    pub status_word: u16,
    /// actual position read this cycle
    pub actual_position: i32,
    /// operation mode reported by the drive
    pub mode_display: i8,
    /// cached cyclic-synchronous-position target
    pub csp_target: i32,
    /// operation mode last written
    pub op_mode: i8,
    /// the adapter considers the drive good to run
    pub run_enable: bool,
    /// operation-enabled observed this cycle
    pub seen_enabled: bool,
    /// operation-enabled reached, the prelude is over (monotonic until reset)
    pub servo_enabled: bool,
    /// cycles left holding the target to the actual position after enabling
    pub csp_warmup: i32,
    pub last_actual_pos: i32,
    /// cycles spent servo-enabled
    pub time_cnt: u32,
    /// restart position latched by vendor adapters
    pub start_pos: i32,
    /// consecutive cycles the fault bit stayed set after a reset attempt
    fault_cycles: u32,
    fault_reported: bool,
}

impl Axis {
    pub fn new(identity: MotorIdentity, position: u16, adapter: Arc<dyn DriveAdapter>,
            layout: AxisLayout) -> Self {
        Self {
            identity, position, adapter, layout,
            out: OutputOffsets::default(),
            inp: InputOffsets::default(),
            status_word: 0,
            actual_position: 0,
            mode_display: 0,
            csp_target: 0,
            op_mode: 0,
            run_enable: false,
            seen_enabled: false,
            servo_enabled: false,
            csp_warmup: 0,
            last_actual_pos: 0,
            time_cnt: 0,
            start_pos: 0,
            fault_cycles: 0,
            fault_reported: false,
        }
    }

    /// resolve the named offset tables once registration has bound the entry slots
    pub fn bind_offsets(&mut self) {
        self.out = OutputOffsets::resolve(&self.layout.rx, &self.layout.rx_offsets);
        self.inp = InputOffsets::resolve(&self.layout.tx, &self.layout.tx_offsets);
    }

    /// refresh the cyclic input snapshot at the start of a cycle
    pub fn read_inputs(&mut self, pd: &[u8]) {
        self.status_word = self.inp.read_status_word(pd);
        self.actual_position = self.inp.read_actual_position(pd);
        self.mode_display = self.inp.read_mode_display(pd);
        self.seen_enabled = self.status_word & STATE_MASK == state::OPERATION_ENABLED;
    }

    /**
        power-state prelude, run while the axis is not yet servo-enabled

        The control word comes from the adapter's state step; on ready-to-switch-on and on
        operation-enabled the target is seeded to the actual position so the drive never
        receives a stale setpoint. A detected fault emits the reset pulse (0x0000 then
        0x0080) strictly before the main control write.
    */
    pub fn step_prelude(&mut self, pd: &mut [u8], warmup_cycles: i32) {
        let status = self.status_word;
        let control_word = self.adapter
            .make_control(status, &mut self.start_pos, &mut self.run_enable);

        match status & STATE_MASK {
            state::READY_TO_SWITCH_ON => {
                self.csp_target = self.actual_position;
                self.out.write_target_position(pd, self.csp_target);
            }
            state::OPERATION_ENABLED => {
                if ! self.servo_enabled {
                    self.servo_enabled = true;
                    info!(position = self.position,
                        status = format_args!("{:#06x}", status),
                        actual = self.actual_position,
                        "axis enabled");
                }
                self.csp_warmup = warmup_cycles;
                self.csp_target = self.actual_position;
                self.out.write_target_position(pd, self.csp_target);
            }
            _ => {}
        }

        let fault = status & 0x0008 != 0 && status & 0x0001 == 0;
        if fault {
            self.out.write_control_word(pd, control::HOLD);
            self.out.write_control_word(pd, control::FAULT_RESET);
            self.track_fault();
        } else {
            self.clear_fault_tracking();
        }

        self.out.write_control_word(pd, control_word);
        self.write_mode_csp(pd);
    }

    /// servo-enabled, motion not yet started: hold the target at the actual position
    pub fn step_hold(&mut self, pd: &mut [u8]) {
        self.time_cnt += 1;
        self.csp_target = self.actual_position;
        self.out.write_target_position(pd, self.csp_target);
        self.out.write_control_word(pd, control::ENABLE_OPERATION);
        self.write_mode_csp(pd);
        self.last_actual_pos = self.actual_position;
    }

    /**
        servo-enabled, motion started: advance the target by the pre-clamped delta

        While the warmup counter runs the target still follows the actual position, so the
        first real setpoint step starts from wherever the drive settled.
    */
    pub fn step_run(&mut self, pd: &mut [u8], delta: i32) {
        self.time_cnt += 1;
        if self.csp_warmup > 0 {
            self.csp_target = self.actual_position;
            self.csp_warmup -= 1;
        } else {
            self.csp_target = self.csp_target.wrapping_add(delta);
        }
        self.out.write_target_position(pd, self.csp_target);
        self.out.write_control_word(pd, control::ENABLE_OPERATION);
        self.write_mode_csp(pd);
        self.last_actual_pos = self.actual_position;
    }

    /// re-seed the target to the actual position (used the cycle the start barrier fires)
    pub fn seed_target(&mut self, pd: &mut [u8]) {
        self.csp_target = self.actual_position;
        let control = DriveControl {
            control_word: control::ENABLE_OPERATION,
            target_position: self.csp_target,
            target_velocity: 0,
            target_torque: 0,
            op_mode: u8::from(OperationMode::SynchronousPosition) as i8,
        };
        self.adapter.write_control(pd, &self.out, &control);
        self.op_mode = control.op_mode;
    }

    /// one-shot fault clear: emit 0x0080 immediately and restart the prelude
    pub fn reset(&mut self, pd: &mut [u8]) {
        self.out.write_control_word(pd, control::FAULT_RESET);
        self.servo_enabled = false;
        self.seen_enabled = false;
        self.run_enable = false;
        self.csp_warmup = 0;
        self.clear_fault_tracking();
    }

    /// diagnostic snapshot from the current image
    pub fn diagnostics(&self, pd: &[u8]) -> AxisDiag {
        AxisDiag {
            status_word: self.inp.read_status_word(pd),
            mode_display: self.inp.read_mode_display(pd),
            target_position: self.out.read_target_position(pd),
            actual_position: self.inp.read_actual_position(pd),
            following_error: self.inp.read_following_error(pd),
            error_code: self.inp.read_error_code(pd),
            servo_error: self.inp.read_servo_error(pd),
            digital_inputs: self.inp.read_digital_inputs(pd),
            probe_status: self.inp.read_probe_status(pd),
            probe_position: self.inp.read_probe_position(pd),
            fault_persistent: self.fault_cycles > FAULT_PERSISTENT_CYCLES,
        }
    }

    fn write_mode_csp(&mut self, pd: &mut [u8]) {
        let mode = u8::from(OperationMode::SynchronousPosition) as i8;
        self.out.write_op_mode(pd, mode);
        self.op_mode = mode;
    }

    fn track_fault(&mut self) {
        self.fault_cycles = self.fault_cycles.saturating_add(1);
        if self.fault_cycles > FAULT_PERSISTENT_CYCLES && ! self.fault_reported {
            self.fault_reported = true;
            warn!(position = self.position,
                status = format_args!("{:#06x}", self.status_word),
                cycles = self.fault_cycles,
                "fault persists after reset attempts");
        } else if self.fault_cycles <= FAULT_PERSISTENT_CYCLES {
            debug!(position = self.position, cycles = self.fault_cycles, "fault reset pulse");
        }
    }

    fn clear_fault_tracking(&mut self) {
        self.fault_cycles = 0;
        self.fault_reported = false;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::StandardAdapter,
        mapping::{AxisLayout, Registration},
        sdo::{DEFAULT_INPUT, DEFAULT_OUTPUT},
        };

    fn bound_axis() -> Axis {
        let layout = AxisLayout::new(DEFAULT_OUTPUT.to_vec(), DEFAULT_INPUT.to_vec());
        let mut axis = Axis::new(
            MotorIdentity::default(), 0, Arc::new(StandardAdapter), layout);
        let mut registration = Registration::new();
        registration.push_axis(0, 0, 1, 2, &axis.layout);
        // pack back to back, outputs first
        let mut offsets = Vec::new();
        let mut cursor = 0u32;
        for entry in DEFAULT_OUTPUT.iter().chain(&DEFAULT_INPUT) {
            offsets.push(cursor);
            cursor += entry.bytes() as u32;
        }
        let mut layouts = [core::mem::take(&mut axis.layout)];
        registration.bind(&offsets, &mut layouts).unwrap();
        axis.layout = core::mem::replace(&mut layouts[0], AxisLayout::default());
        axis.bind_offsets();
        axis
    }

    fn set_status(axis: &Axis, pd: &mut [u8], status: u16) {
        let offset = axis.inp.status_word.unwrap() as usize;
        crate::data::write_le_u16(&mut pd[offset ..], status);
    }
    fn control_word(axis: &Axis, pd: &[u8]) -> u16 {
        crate::data::read_le_u16(&pd[axis.out.control_word.unwrap() as usize ..])
    }

    #[test]
    fn prelude_walks_the_power_states() {
        let mut axis = bound_axis();
        let mut pd = vec![0u8; 64];
        for (status, expected) in [
                (0x0240u16, control::SHUTDOWN),
                (0x0240, control::SHUTDOWN),
                (0x0221, control::SWITCH_ON),
                (0x0223, control::ENABLE_OPERATION),
                (0x0227, control::ENABLE_OPERATION),
                ] {
            set_status(&axis, &mut pd, status);
            axis.read_inputs(&pd);
            axis.step_prelude(&mut pd, 10);
            assert_eq!(control_word(&axis, &pd), expected, "status {:#06x}", status);
        }
        assert!(axis.servo_enabled);
        assert!(axis.seen_enabled);
        assert_eq!(axis.csp_warmup, 10);
        assert_eq!(axis.op_mode, 8);
    }

    #[test]
    fn warmup_then_delta() {
        let mut axis = bound_axis();
        axis.servo_enabled = true;
        axis.csp_warmup = 2;
        let mut pd = vec![0u8; 64];
        // actual position reads zero, warmup keeps the target there
        axis.read_inputs(&pd);
        axis.step_run(&mut pd, 1000);
        assert_eq!(axis.csp_target, 0);
        axis.step_run(&mut pd, 1000);
        assert_eq!(axis.csp_target, 0);
        axis.step_run(&mut pd, 1000);
        assert_eq!(axis.csp_target, 1000);
        axis.step_run(&mut pd, -1000);
        assert_eq!(axis.csp_target, 0);
    }

    #[test]
    fn reset_restarts_the_prelude() {
        let mut axis = bound_axis();
        axis.servo_enabled = true;
        let mut pd = vec![0u8; 64];
        axis.reset(&mut pd);
        assert_eq!(control_word(&axis, &pd), control::FAULT_RESET);
        assert!(! axis.servo_enabled);
    }
}
