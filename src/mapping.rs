/*!
    Helpers to build the domain registration list and locate each axis' objects in the
    process image.

    The master assigns byte offsets at registration time, one per non-gap PDO entry, in
    registration order. This module owns that order: entries are emitted axis by axis,
    outputs first, inputs second, gaps skipped. Once the master has answered, the offsets are
    bound back onto each axis' entry slots and resolved into the named offset tables the
    cyclic path works with.

    ## Principles

    - a gap entry (`index == 0`) reserves space in the drive's mapping but is never passed to
      the master and never receives an offset
    - an entry slot stays `None` until registration binds it, so a cycle can never touch an
      offset that was not assigned
    - bound entries must not overlap in the image, binding fails otherwise
*/

use crate::{
    data,
    error::{ControllerError, ControllerResult},
    master::PdoEntryReg,
    sdo::{cia402, PdoEntry},
    };


/// PDO entry lists of one axis, with their image offsets once bound
#[derive(Clone, Debug, Default)]
pub struct AxisLayout {
    /// output (controller -> drive) entries, in emission order, gaps included
    pub rx: Vec<PdoEntry>,
    /// input (drive -> controller) entries, in emission order, gaps included
    pub tx: Vec<PdoEntry>,
    /// one offset slot per rx entry, gap slots stay `None`
    pub rx_offsets: Vec<Option<u32>>,
    /// one offset slot per tx entry, gap slots stay `None`
    pub tx_offsets: Vec<Option<u32>>,
}
impl AxisLayout {
    pub fn new(rx: Vec<PdoEntry>, tx: Vec<PdoEntry>) -> Self {
        let rx_offsets = vec![None; rx.len()];
        let tx_offsets = vec![None; tx.len()];
        Self {rx, tx, rx_offsets, tx_offsets}
    }
}

/// which entry slot of which axis a registration entry belongs to
#[derive(Copy, Clone, Debug)]
enum Slot {
    Rx(usize, usize),
    Tx(usize, usize),
}

/**
    accumulates the registration list for the whole axis set

    One [PdoEntryReg] is emitted per non-gap entry, recording (alias 0, bus position, vendor
    id, product code, object index, subindex). The parallel slot list remembers where each
    answered offset must be bound.
*/
#[derive(Default)]
pub struct Registration {
    entries: Vec<PdoEntryReg>,
    slots: Vec<Slot>,
}
impl Registration {
    pub fn new() -> Self {Self::default()}

    /// emit the registration entries of one axis, outputs first
    pub fn push_axis(&mut self, axis: usize, position: u16, vendor_id: u32, product_code: u32,
            layout: &AxisLayout) {
        for (slot, entry) in layout.rx.iter().enumerate() {
            if entry.is_gap() {continue}
            self.entries.push(PdoEntryReg {
                alias: 0, position, vendor_id, product_code,
                index: entry.index, sub: entry.sub,
                });
            self.slots.push(Slot::Rx(axis, slot));
        }
        for (slot, entry) in layout.tx.iter().enumerate() {
            if entry.is_gap() {continue}
            self.entries.push(PdoEntryReg {
                alias: 0, position, vendor_id, product_code,
                index: entry.index, sub: entry.sub,
                });
            self.slots.push(Slot::Tx(axis, slot));
        }
    }

    /// the list to hand to [crate::master::FieldbusMaster::register_pdo_entries]
    pub fn entries(&self) -> &[PdoEntryReg] {&self.entries}

    /// bind the offsets answered by the master back onto the axis layouts
    pub fn bind(&self, offsets: &[u32], layouts: &mut [AxisLayout]) -> ControllerResult {
        if offsets.len() != self.slots.len() {
            return Err(ControllerError::Config(format!(
                "registration answered {} offsets for {} entries",
                offsets.len(), self.slots.len())));
        }
        for (slot, &offset) in self.slots.iter().zip(offsets) {
            match *slot {
                Slot::Rx(axis, i) => layouts[axis].rx_offsets[i] = Some(offset),
                Slot::Tx(axis, i) => layouts[axis].tx_offsets[i] = Some(offset),
            }
        }
        check_overlap(layouts)
    }
}

/// verify that no two bound entries share bytes of the process image
fn check_overlap(layouts: &[AxisLayout]) -> ControllerResult {
    let mut ranges = Vec::new();
    for layout in layouts {
        for (entry, offset) in layout.rx.iter().zip(&layout.rx_offsets)
                .chain(layout.tx.iter().zip(&layout.tx_offsets)) {
            if let Some(offset) = offset {
                ranges.push((*offset as usize, *offset as usize + entry.bytes()));
            }
        }
    }
    ranges.sort();
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(ControllerError::Config(format!(
                "overlapping registered entries at image bytes {} and {}",
                pair[0].0, pair[1].0)));
        }
    }
    Ok(())
}


/// image offsets of the output objects of one axis, `None` when the drive does not map them
#[derive(Copy, Clone, Debug, Default)]
pub struct OutputOffsets {
    pub control_word: Option<u32>,
    pub op_mode: Option<u32>,
    pub target_position: Option<u32>,
    pub target_velocity: Option<u32>,
    pub target_torque: Option<u32>,
    pub probe_function: Option<u32>,
    pub interpolation_buffer: Option<u32>,
}
impl OutputOffsets {
    /// locate the known output objects in a bound entry list
    pub fn resolve(entries: &[PdoEntry], offsets: &[Option<u32>]) -> Self {
        let mut out = Self::default();
        for (entry, offset) in entries.iter().zip(offsets) {
            let offset = match offset {Some(o) => Some(*o), None => continue};
            match entry.index {
                i if i == cia402::controlword.index => out.control_word = offset,
                i if i == cia402::target::mode.index => out.op_mode = offset,
                i if i == cia402::target::position.index => out.target_position = offset,
                i if i == cia402::target::velocity.index => out.target_velocity = offset,
                i if i == cia402::target::torque.index => out.target_torque = offset,
                i if i == cia402::probe::function.index => out.probe_function = offset,
                i if i == cia402::interpolation_buffer.index => out.interpolation_buffer = offset,
                _ => {},
            }
        }
        out
    }

    pub fn write_control_word(&self, pd: &mut [u8], value: u16) {
        if let Some(offset) = self.control_word {
            data::write_le_u16(&mut pd[offset as usize ..], value);
        }
    }
    pub fn write_op_mode(&self, pd: &mut [u8], value: i8) {
        if let Some(offset) = self.op_mode {
            pd[offset as usize] = value as u8;
        }
    }
    pub fn write_target_position(&self, pd: &mut [u8], value: i32) {
        if let Some(offset) = self.target_position {
            data::write_le_i32(&mut pd[offset as usize ..], value);
        }
    }
    pub fn write_target_velocity(&self, pd: &mut [u8], value: i32) {
        if let Some(offset) = self.target_velocity {
            data::write_le_i32(&mut pd[offset as usize ..], value);
        }
    }
    pub fn write_target_torque(&self, pd: &mut [u8], value: i16) {
        if let Some(offset) = self.target_torque {
            data::write_le_i16(&mut pd[offset as usize ..], value);
        }
    }
    pub fn write_interpolation_buffer(&self, pd: &mut [u8], value: u8) {
        if let Some(offset) = self.interpolation_buffer {
            pd[offset as usize] = value;
        }
    }
    pub fn read_target_position(&self, pd: &[u8]) -> i32 {
        self.target_position
            .map(|offset| data::read_le_i32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
}

/// image offsets of the input objects of one axis, `None` when the drive does not map them
#[derive(Copy, Clone, Debug, Default)]
pub struct InputOffsets {
    pub status_word: Option<u32>,
    pub actual_position: Option<u32>,
    pub actual_velocity: Option<u32>,
    pub actual_torque: Option<u32>,
    pub mode_display: Option<u32>,
    pub error_code: Option<u32>,
    pub following_error: Option<u32>,
    pub digital_inputs: Option<u32>,
    pub probe_status: Option<u32>,
    pub probe_position: Option<u32>,
    pub servo_error: Option<u32>,
}
impl InputOffsets {
    /// locate the known input objects in a bound entry list
    pub fn resolve(entries: &[PdoEntry], offsets: &[Option<u32>]) -> Self {
        let mut inp = Self::default();
        for (entry, offset) in entries.iter().zip(offsets) {
            let offset = match offset {Some(o) => Some(*o), None => continue};
            match entry.index {
                i if i == cia402::statusword.index => inp.status_word = offset,
                i if i == cia402::current::position.index => inp.actual_position = offset,
                i if i == cia402::current::velocity.index => inp.actual_velocity = offset,
                i if i == cia402::current::torque.index => inp.actual_torque = offset,
                i if i == cia402::current::mode.index => inp.mode_display = offset,
                i if i == cia402::error.index => inp.error_code = offset,
                i if i == cia402::following_error.index => inp.following_error = offset,
                i if i == cia402::digital_inputs.index => inp.digital_inputs = offset,
                i if i == cia402::probe::status.index => inp.probe_status = offset,
                i if i == cia402::probe::position.index => inp.probe_position = offset,
                i if i == cia402::servo_error.index => inp.servo_error = offset,
                _ => {},
            }
        }
        inp
    }

    pub fn read_status_word(&self, pd: &[u8]) -> u16 {
        self.status_word
            .map(|offset| data::read_le_u16(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_actual_position(&self, pd: &[u8]) -> i32 {
        self.actual_position
            .map(|offset| data::read_le_i32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_mode_display(&self, pd: &[u8]) -> i8 {
        self.mode_display
            .map(|offset| pd[offset as usize] as i8)
            .unwrap_or(0)
    }
    pub fn read_error_code(&self, pd: &[u8]) -> u16 {
        self.error_code
            .map(|offset| data::read_le_u16(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_following_error(&self, pd: &[u8]) -> i32 {
        self.following_error
            .map(|offset| data::read_le_i32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_digital_inputs(&self, pd: &[u8]) -> u32 {
        self.digital_inputs
            .map(|offset| data::read_le_u32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_probe_status(&self, pd: &[u8]) -> u16 {
        self.probe_status
            .map(|offset| data::read_le_u16(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_probe_position(&self, pd: &[u8]) -> i32 {
        self.probe_position
            .map(|offset| data::read_le_i32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_servo_error(&self, pd: &[u8]) -> u16 {
        self.servo_error
            .map(|offset| data::read_le_u16(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_actual_velocity(&self, pd: &[u8]) -> i32 {
        self.actual_velocity
            .map(|offset| data::read_le_i32(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
    pub fn read_actual_torque(&self, pd: &[u8]) -> i16 {
        self.actual_torque
            .map(|offset| data::read_le_i16(&pd[offset as usize ..]))
            .unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdo::{DEFAULT_INPUT, DEFAULT_OUTPUT};

    fn default_layout() -> AxisLayout {
        AxisLayout::new(DEFAULT_OUTPUT.to_vec(), DEFAULT_INPUT.to_vec())
    }

    #[test]
    fn gaps_are_not_registered() {
        let mut layout = default_layout();
        layout.rx.push(PdoEntry::GAP);
        layout.rx_offsets.push(None);

        let mut registration = Registration::new();
        registration.push_axis(0, 2, 0x1097, 0x2406, &layout);
        assert_eq!(registration.entries().len(), DEFAULT_OUTPUT.len() + DEFAULT_INPUT.len());
        assert!(registration.entries().iter().all(|reg| reg.index != 0));
    }

    #[test]
    fn bind_fills_slots_in_order() {
        let mut layouts = vec![default_layout()];
        let mut registration = Registration::new();
        registration.push_axis(0, 0, 1, 2, &layouts[0]);

        let offsets: Vec<u32> = {
            // pack entries back to back, outputs first
            let mut cursor = 0u32;
            registration.entries().iter().map(|reg| {
                let entry = DEFAULT_OUTPUT.iter().chain(&DEFAULT_INPUT)
                    .find(|e| e.index == reg.index).unwrap();
                let offset = cursor;
                cursor += entry.bytes() as u32;
                offset
            }).collect()
        };
        registration.bind(&offsets, &mut layouts).unwrap();

        let out = OutputOffsets::resolve(&layouts[0].rx, &layouts[0].rx_offsets);
        let inp = InputOffsets::resolve(&layouts[0].tx, &layouts[0].tx_offsets);
        assert_eq!(out.control_word, Some(0));
        assert_eq!(out.op_mode, Some(2));
        assert_eq!(out.target_position, Some(3));
        assert_eq!(out.probe_function, Some(7));
        assert_eq!(inp.error_code, Some(9));
        assert_eq!(inp.status_word, Some(11));
        assert_eq!(inp.actual_position, Some(13));
        assert_eq!(inp.servo_error, Some(32));
    }

    #[test]
    fn overlap_is_rejected() {
        let mut layouts = vec![default_layout()];
        let mut registration = Registration::new();
        registration.push_axis(0, 0, 1, 2, &layouts[0]);

        let overlapping: Vec<u32> = (0 .. registration.entries().len() as u32).collect();
        assert!(matches!(
            registration.bind(&overlapping, &mut layouts),
            Err(ControllerError::Config(_))));
    }
}
