/*!
    Vendor-specific drive adapters.

    Every adapter here reuses the standard CiA-402 step for the states its drive handles
    normally, and overrides the states the vendor firmware treats specially. The EYOU drives
    need the most care: their fault codes surface in the status word high byte and the drive
    reacts badly to fast control-word changes, so the adapter damps its transitions and runs
    a bounded fault-reset policy.
*/

use crate::{
    adapter::{DriveAdapter, MotorIdentity, StandardAdapter},
    config::EyouTunables,
    sdo::{cia402, control, PdoEntry},
    };
use std::sync::Mutex;
use tracing::{debug, warn};


/// state-change damping and fault-retry counters of one EYOU adapter instance
#[derive(Default)]
struct EyouState {
    last_status: u16,
    change_delay: u32,
    fault_resets: u32,
}

/**
    adapter for EYOU servo drives (vendor 0x00001097, product 0x00002406)

    Counters are per adapter instance; axes matched to the same registry entry share them,
    which matches the drives being brought up together. The damping window and the reset
    threshold are tunables, see [EyouTunables].
*/
pub struct EyouAdapter {
    tunables: EyouTunables,
    state: Mutex<EyouState>,
}
impl Default for EyouAdapter {
    fn default() -> Self {Self::with_tunables(EyouTunables::default())}
}
impl EyouAdapter {
    pub fn with_tunables(tunables: EyouTunables) -> Self {
        Self {tunables, state: Mutex::new(EyouState::default())}
    }
}
impl DriveAdapter for EyouAdapter {
    fn motor_info(&self) -> MotorIdentity {
        MotorIdentity {
            vendor_id: 0x0000_1097,
            product_code: 0x0000_2406,
            name: "EYOU Servo Motor".into(),
            has_dc: true,
            position: -1,
            .. Default::default()
        }
    }
    fn supports(&self, vendor_id: u32, product_code: u32) -> bool {
        vendor_id == 0x0000_1097 && product_code == 0x0000_2406
    }
    fn name(&self) -> &str {"EYOU Adapter"}

    fn rx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_OUTPUT.to_vec()}
    fn tx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_INPUT.to_vec()}

    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        let mut state = self.state.lock().unwrap();

        // the drive misbehaves on fast control-word changes, hold after every transition
        if status != state.last_status {
            state.change_delay = 0;
            state.last_status = status;
            debug!(status = format_args!("{:#06x}", status), "eyou status changed");
        } else {
            state.change_delay += 1;
        }
        if state.change_delay < self.tunables.damping_cycles {
            return control::HOLD;
        }

        let ready = status & 0x0001 != 0;
        let switched = status & 0x0002 != 0;
        let op_enabled = status & 0x0004 != 0;
        let fault = status & 0x0008 != 0;
        let quick_stop = status & 0x0020 != 0;
        let warning = status & 0x0080 != 0;

        if fault {
            // the firmware reports its fault code in the status word high byte
            let fault_code = (status >> 8) & 0xff;
            if fault_code == 0x08 || fault_code == 0x09 {
                warn!(fault_code, "eyou position following error, halting axis");
                *run_enable = false;
                state.fault_resets = 0;
                return control::FAULT_RESET;
            }
            state.fault_resets += 1;
            if state.fault_resets < self.tunables.fault_reset_limit {
                *run_enable = false;
                return control::FAULT_RESET;
            }
            if self.tunables.force_recover {
                warn!(attempts = state.fault_resets, "eyou fault persists, forcing restart");
                state.fault_resets = 0;
                *run_enable = true;
                return control::SHUTDOWN;
            }
            // stay in bounded reset retries when forced recovery is disabled
            state.fault_resets = self.tunables.fault_reset_limit;
            *run_enable = false;
            return control::FAULT_RESET;
        }

        if warning {
            *run_enable = true;
            return if ready && switched && !op_enabled {
                control::ENABLE_OPERATION
            } else if ready && !switched {
                control::SWITCH_ON
            } else {
                control::SHUTDOWN
            };
        }

        if quick_stop {
            return if ready && !switched {
                *run_enable = true;
                control::SWITCH_ON
            } else if ready && switched {
                *run_enable = true;
                control::QUICKSTOP_DISABLE
            } else {
                *run_enable = false;
                control::QUICKSTOP_DISABLE
            };
        }

        if !ready && !switched && !op_enabled {
            // fresh power-up reports an all-zero status, nudge it towards ready
            *run_enable = true;
            return control::SHUTDOWN;
        }

        if ready && switched && !op_enabled {
            *run_enable = true;
            return control::ENABLE_OPERATION;
        }

        StandardAdapter::standard_control(status, start_pos, run_enable)
    }
}


/// adapter for Delta servo drives, standard CiA-402 behavior
pub struct DeltaAdapter;
impl DriveAdapter for DeltaAdapter {
    fn motor_info(&self) -> MotorIdentity {
        MotorIdentity {
            vendor_id: 0x0000_0001,
            product_code: 0x1234_5678,
            name: "Delta Servo Motor".into(),
            has_dc: true,
            position: -1,
            .. Default::default()
        }
    }
    fn supports(&self, vendor_id: u32, product_code: u32) -> bool {
        vendor_id == 0x0000_0001 && product_code == 0x1234_5678
    }
    fn name(&self) -> &str {"Delta Adapter"}
    fn rx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_OUTPUT.to_vec()}
    fn tx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_INPUT.to_vec()}
    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        StandardAdapter::standard_control(status, start_pos, run_enable)
    }
}

/// adapter for Yaskawa servo drives, standard CiA-402 behavior
pub struct YaskawaAdapter;
impl DriveAdapter for YaskawaAdapter {
    fn motor_info(&self) -> MotorIdentity {
        MotorIdentity {
            vendor_id: 0x0000_0002,
            product_code: 0x8765_4321,
            name: "Yaskawa Servo Motor".into(),
            has_dc: true,
            position: -1,
            .. Default::default()
        }
    }
    fn supports(&self, vendor_id: u32, product_code: u32) -> bool {
        vendor_id == 0x0000_0002 && product_code == 0x8765_4321
    }
    fn name(&self) -> &str {"Yaskawa Adapter"}
    fn rx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_OUTPUT.to_vec()}
    fn tx_pdo(&self) -> Vec<PdoEntry> {crate::sdo::DEFAULT_INPUT.to_vec()}
    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        StandardAdapter::standard_control(status, start_pos, run_enable)
    }
}

/**
    adapter for Panasonic servo drives

    Publishes the widened velocity/torque entry set; the trailing gap entries pad the
    mapping to the fixed size the drive firmware expects and are never registered.
*/
pub struct PanasonicAdapter;
impl DriveAdapter for PanasonicAdapter {
    fn motor_info(&self) -> MotorIdentity {
        MotorIdentity {
            vendor_id: 0x0000_0003,
            product_code: 0x1122_3344,
            name: "Panasonic Servo Motor".into(),
            has_dc: true,
            position: -1,
            .. Default::default()
        }
    }
    fn supports(&self, vendor_id: u32, product_code: u32) -> bool {
        vendor_id == 0x0000_0003 && product_code == 0x1122_3344
    }
    fn name(&self) -> &str {"Panasonic Adapter"}
    fn rx_pdo(&self) -> Vec<PdoEntry> {
        vec![
            cia402::controlword,
            cia402::target::position,
            cia402::target::velocity,
            cia402::target::torque,
            cia402::target::mode,
            PdoEntry::GAP,
            PdoEntry::GAP,
        ]
    }
    fn tx_pdo(&self) -> Vec<PdoEntry> {
        vec![
            cia402::statusword,
            cia402::current::position,
            cia402::current::velocity,
            cia402::current::torque,
            cia402::current::mode,
            cia402::error,
            PdoEntry::GAP,
            PdoEntry::GAP,
        ]
    }
    fn make_control(&self, status: u16, start_pos: &mut i32, run_enable: &mut bool) -> u16 {
        StandardAdapter::standard_control(status, start_pos, run_enable)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn settled(adapter: &EyouAdapter, status: u16) -> u16 {
        // repeat until the damping window is passed, keeping the last emission
        let mut control = control::HOLD;
        for _ in 0 ..= adapter.tunables.damping_cycles {
            let (mut start, mut run) = (0, false);
            control = adapter.make_control(status, &mut start, &mut run);
        }
        control
    }

    #[test]
    fn damping_holds_after_a_change() {
        let adapter = EyouAdapter::default();
        let (mut start, mut run) = (0, false);
        for _ in 0 .. 5 {
            assert_eq!(adapter.make_control(0x0250, &mut start, &mut run), control::HOLD);
        }
        assert_eq!(adapter.make_control(0x0250, &mut start, &mut run), control::SHUTDOWN);
    }

    #[test]
    fn following_error_fault_halts() {
        let adapter = EyouAdapter::default();
        let mut start = 0;
        let mut run = true;
        for _ in 0 .. 6 {
            adapter.make_control(0x0808, &mut start, &mut run);
        }
        run = true;
        assert_eq!(adapter.make_control(0x0808, &mut start, &mut run), control::FAULT_RESET);
        assert!(! run);
    }

    #[test]
    fn persistent_fault_forces_restart_after_limit() {
        let adapter = EyouAdapter::default();
        // settle the damping window on a plain fault status
        assert_eq!(settled(&adapter, 0x0108), control::FAULT_RESET);
        let mut control_word = 0;
        for _ in 0 .. 20 {
            let (mut start, mut run) = (0, false);
            control_word = adapter.make_control(0x0108, &mut start, &mut run);
            if control_word == control::SHUTDOWN {break}
        }
        assert_eq!(control_word, control::SHUTDOWN);
    }

    #[test]
    fn quick_stop_clears_by_state() {
        let adapter = EyouAdapter::default();
        assert_eq!(settled(&adapter, 0x0221), control::SWITCH_ON);
        let adapter = EyouAdapter::default();
        assert_eq!(settled(&adapter, 0x0223), control::QUICKSTOP_DISABLE);
    }
}
