/*!
    Catalog of the CiA-402 dictionary objects exchanged by this controller.

    The goal is to gather every standard object index used for process data in one place, so
    no other module hardcodes a dictionary address. Objects are described as [PdoEntry] values
    (index, subindex, bit length) ready to be placed in a PDO mapping, programmed into the
    drive's sync managers, and registered in the master's domain.

    CiA-402 is the standard for controlling servodrives and stepperdrives in ethercat and
    canopen. Entries of the [cia402] module will not be present on devices not supporting it,
    and may not all be present on devices implementing only a subset.
*/

use bilge::prelude::*;
use core::fmt;


/**
    one entry of a PDO mapping: a dictionary object with its subindex and bit width

    An entry with `index == 0` is a padding gap: it reserves room in the mapping but does not
    point to any object and is never registered in the domain.
*/
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PdoEntry {
    /// index of the object in the drive's dictionary
    pub index: u16,
    /// subindex in the object
    pub sub: u8,
    /// bit length of the mapped value
    pub bitlen: u8,
}
impl PdoEntry {
    pub const fn new(index: u16, sub: u8, bitlen: u8) -> Self {
        Self {index, sub, bitlen}
    }
    /// padding entry, reserves space without pointing to an object
    pub const GAP: PdoEntry = PdoEntry::new(0, 0, 0);

    /// true for padding entries that must not be registered
    pub const fn is_gap(&self) -> bool {self.index == 0}
    /// byte size occupied in the process image
    pub const fn bytes(&self) -> usize {(self.bitlen as usize + 7) / 8}
}
impl fmt::Debug for PdoEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_gap() {write!(f, "PdoEntry{{gap}}")}
        else {write!(f, "PdoEntry{{{:#06x}:{} {}bit}}", self.index, self.sub, self.bitlen)}
    }
}

/**
    a complete PDO: its own dictionary index and the ordered entries it carries

    Rx PDOs (controller -> drive) live in the 0x1600 range, Tx PDOs (drive -> controller) in
    the 0x1a00 range.
*/
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PdoMapping {
    pub index: u16,
    pub entries: Vec<PdoEntry>,
}
impl PdoMapping {
    pub fn new(index: u16, entries: Vec<PdoEntry>) -> Self {
        Self {index, entries}
    }
    /// true if the PDO index designates a drive-to-controller (input) PDO
    pub const fn is_transmit(index: u16) -> bool {index >= transmit_pdos_start}
}

/// first dictionary index of receive (output) PDOs
pub const receive_pdos_start: u16 = 0x1600;
/// first dictionary index of transmit (input) PDOs
pub const transmit_pdos_start: u16 = 0x1a00;


/// dictionary entries defined for devices supporting CIA.402, defined in ETG.6010
pub mod cia402 {
    use super::PdoEntry;

    pub const controlword: PdoEntry = PdoEntry::new(0x6040, 0, 16);
    pub const statusword: PdoEntry = PdoEntry::new(0x6041, 0, 16);
    /// current error in control operations (first error if multiple errors active)
    pub const error: PdoEntry = PdoEntry::new(0x603f, 0, 16);
    /// deviation between demanded and actual position
    pub const following_error: PdoEntry = PdoEntry::new(0x60f4, 0, 32);
    /// state of the drive's digital input pins
    pub const digital_inputs: PdoEntry = PdoEntry::new(0x60fd, 0, 32);
    /// manufacturer-specific servo error register
    pub const servo_error: PdoEntry = PdoEntry::new(0x213f, 0, 16);
    /// interpolation data record (also configured at startup through service data)
    pub const interpolation_buffer: PdoEntry = PdoEntry::new(0x60c2, 0, 8);

    pub mod target {
        use super::PdoEntry;

        /// the operation mode can be switched by writing this
        pub const mode: PdoEntry = PdoEntry::new(0x6060, 0, 8);
        pub const position: PdoEntry = PdoEntry::new(0x607a, 0, 32);
        pub const velocity: PdoEntry = PdoEntry::new(0x60ff, 0, 32);
        pub const torque: PdoEntry = PdoEntry::new(0x6071, 0, 16);
    }
    pub mod current {
        use super::PdoEntry;

        pub const mode: PdoEntry = PdoEntry::new(0x6061, 0, 8);
        pub const position: PdoEntry = PdoEntry::new(0x6064, 0, 32);
        pub const velocity: PdoEntry = PdoEntry::new(0x606c, 0, 32);
        pub const torque: PdoEntry = PdoEntry::new(0x6077, 0, 16);
    }
    /// touch probe objects
    pub mod probe {
        use super::PdoEntry;

        pub const function: PdoEntry = PdoEntry::new(0x60b8, 0, 16);
        pub const status: PdoEntry = PdoEntry::new(0x60b9, 0, 16);
        pub const position: PdoEntry = PdoEntry::new(0x60ba, 0, 32);
    }

    /// startup parameters written through service data, not mapped in PDOs
    pub mod startup {
        /// interpolation time period record (sub 1: base, sub 2: exponent)
        pub const interpolation_period: u16 = 0x60c2;
        pub const profile_velocity: u16 = 0x6081;
        pub const profile_acceleration: u16 = 0x6083;
        pub const profile_deceleration: u16 = 0x6084;
    }
}

/// the default output (controller -> drive) entry set, in emission order
pub const DEFAULT_OUTPUT: [PdoEntry; 4] = [
    cia402::controlword,
    cia402::target::mode,
    cia402::target::position,
    cia402::probe::function,
];
/// the default input (drive -> controller) entry set, in emission order
pub const DEFAULT_INPUT: [PdoEntry; 9] = [
    cia402::error,
    cia402::statusword,
    cia402::current::position,
    cia402::current::mode,
    cia402::probe::status,
    cia402::probe::position,
    cia402::following_error,
    cia402::digital_inputs,
    cia402::servo_error,
];


/// mask extracting the power-state relevant bits of a status word
pub const STATE_MASK: u16 = 0x6f;

/// `status & STATE_MASK` values of the CiA-402 power states the controller walks through
pub mod state {
    pub const NOT_READY: u16 = 0x00;
    pub const SWITCH_ON_DISABLED: u16 = 0x40;
    pub const READY_TO_SWITCH_ON: u16 = 0x21;
    pub const SWITCHED_ON: u16 = 0x23;
    pub const OPERATION_ENABLED: u16 = 0x27;
}

/// control word commands of the CiA-402 power state machine
pub mod control {
    /// hold, used only as a pulse before a fault reset
    pub const HOLD: u16 = 0x0000;
    /// disable quick-stop
    pub const QUICKSTOP_DISABLE: u16 = 0x0002;
    /// shutdown, prepare to switch on
    pub const SHUTDOWN: u16 = 0x0006;
    /// switch on
    pub const SWITCH_ON: u16 = 0x0007;
    /// enable operation, the steady-state write in cyclic synchronous modes
    pub const ENABLE_OPERATION: u16 = 0x000f;
    /// one-shot fault reset
    pub const FAULT_RESET: u16 = 0x0080;
}


/**
bit structure of a status word

| Bit |  Meaning | Presence |
|-----|----------|----------|
| 0	| Ready to switch on	| M
| 1	| Switched on	| M
| 2	| Operation enabled	| M
| 3	| Fault	| M
| 4	| Voltage enabled	| O
| 5	| Quick stop	| O
| 6	| Switch on disabled	| M
| 7	| Warning	| O
| 8	| Manufacturer specific	| O
| 9	| Remote	| O
| 10	| Target reached	| O
| 11	| Internal limit active	| C
| 12	| Set-point acknowledge (csp)	| O
| 13	| Following error	| O
| 14-15	| Manufacturer specific	| O
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct StatusWord {
    pub ready_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    reserved: u1,
    pub remote: bool,
    pub target_reached: bool,
    pub limit_active: bool,
    pub setpoint_ack: bool,
    pub following_error: bool,
    reserved: u2,
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StatusWord{{")?;
        for (active, mark) in [ (self.ready_switch_on(), "rtso"),
                                (self.switched_on(), "so"),
                                (self.operation_enabled(), "oe"),
                                (self.fault(), "f"),
                                (self.voltage_enabled(), "ve"),
                                (self.quick_stop(), "qs"),
                                (self.switch_on_disabled(), "sod"),
                                (self.warning(), "w"),
                                (self.remote(), "r"),
                                (self.target_reached(), "tr"),
                                (self.limit_active(), "la"),
                                (self.setpoint_ack(), "sa"),
                                ] {
            write!(f, " ")?;
            if active {
                write!(f, "{}", mark)?;
            } else {
                for _ in 0 .. mark.len() {write!(f, " ")?;}
            }
        }
        write!(f, "}}")?;
        Ok(())
    }
}

/**
Control word of a servo drive

| Bit	|	Category	|   Meaning	|
|-------|---------------|-----------|
| 0	|	M	|	Switch on |
| 1	|	M	|	Enable voltage |
| 2	|	O	|	Quick stop |
| 3	|	M	|	Enable operation |
| 4 – 6	|	O	|	Operation mode specific |
| 7	|	M	|	Fault reset |
| 8	|	O	|	Halt |
| 9	|	O	|	Operation mode specific |
| 10	|	O	|	reserved |
| 11 – 15	|	O	|	Manufacturer specific |
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct ControlWord {
    pub switch_on: bool,
    pub enable_voltage: bool,
    pub quick_stop: bool,
    pub enable_operation: bool,
    reserved: u3,
    pub reset_fault: bool,
    pub halt: bool,
    pub specific: bool,
    reserved: u1,
    reserved: u5,
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ControlWord{{")?;
        for (active, mark) in [ (self.switch_on(), "so"),
                                (self.enable_voltage(), "ev"),
                                (self.quick_stop(), "qs"),
                                (self.enable_operation(), "eo"),
                                (self.reset_fault(), "rf"),
                                (self.halt(), "h"),
                                ] {
            write!(f, " ")?;
            if active {
                write!(f, "{}", mark)?;
            } else {
                for _ in 0 .. mark.len() {write!(f, " ")?;}
            }
        }
        write!(f, "}}")?;
        Ok(())
    }
}

/// servodrive control-loop type
#[bitsize(8)]
#[derive(TryFromBits, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OperationMode {
    /// actuator power disabled
    #[default]
    Off = 0,
    /// PP
    ProfilePosition = 1,
    /// VL
    Velocity = 2,
    /// PV
    ProfileVelocity = 3,
    /// TQ
    TorqueProfile = 4,
    /// HM
    Homing = 6,
    /// IP
    InterpolatedPosition = 7,
    /// CSP, the default mode of this controller
    SynchronousPosition = 8,
    /// CSV
    SynchronousVelocity = 9,
    /// CST
    SynchronousTorque = 10,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mask_selects_power_state() {
        assert_eq!(0x0627 & STATE_MASK, state::OPERATION_ENABLED);
        assert_eq!(0x0250 & STATE_MASK, 0x40);
        assert_eq!(0x0008 & STATE_MASK, 0x08);
    }

    #[test]
    fn words_round_trip_raw() {
        let status = StatusWord::from(0x0027);
        assert!(status.ready_switch_on());
        assert!(status.switched_on());
        assert!(status.operation_enabled());
        assert!(status.quick_stop());
        assert!(! status.fault());

        let control = ControlWord::from(control::ENABLE_OPERATION);
        assert!(control.switch_on());
        assert!(control.enable_voltage());
        assert!(control.quick_stop());
        assert!(control.enable_operation());
        assert_eq!(u16::from(control), 0x000f);
    }

    #[test]
    fn default_sets_match_wire_layout() {
        // output block: control word, mode, target position, probe function
        let out_bytes: usize = DEFAULT_OUTPUT.iter().map(|e| e.bytes()).sum();
        assert_eq!(out_bytes, 9);
        // input block ends with the servo error register at byte 23
        let in_offset: usize = DEFAULT_INPUT[.. 8].iter().map(|e| e.bytes()).sum();
        assert_eq!(in_offset, 23);
        assert_eq!(DEFAULT_INPUT[8], cia402::servo_error);
        assert!(DEFAULT_OUTPUT.iter().all(|e| ! e.is_gap()));
    }
}
