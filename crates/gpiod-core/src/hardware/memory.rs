//! Simulated board kept entirely in memory.
//!
//! Useful when developing clients on a machine without the I/O board:
//! outputs and relays remember what was last written, and inputs can be
//! driven from code with [`MemoryHardware::set_input`].

use std::sync::Mutex;

use super::{Hardware, HardwareError, PinKind};

#[derive(Debug)]
struct Board {
    inputs: Vec<bool>,
    outputs: Vec<bool>,
    relays: Vec<bool>,
}

/// Simulated board with `pin_count` inputs, outputs and relays.
#[derive(Debug)]
pub struct MemoryHardware {
    pin_count: u16,
    board: Mutex<Board>,
}

impl MemoryHardware {
    /// Create a board with every pin low.
    pub fn new(pin_count: u16) -> Self {
        let len = usize::from(pin_count);
        Self {
            pin_count,
            board: Mutex::new(Board {
                inputs: vec![false; len],
                outputs: vec![false; len],
                relays: vec![false; len],
            }),
        }
    }

    /// Set the raw level seen on input `index`.
    pub fn set_input(&self, index: u8, level: bool) -> Result<(), HardwareError> {
        self.with_pin(PinKind::Input, index, |pin| *pin = level)
    }

    /// Current level of output `index`.
    pub fn output(&self, index: u8) -> Result<bool, HardwareError> {
        self.with_pin(PinKind::Output, index, |pin| *pin)
    }

    /// Current state of relay `index`.
    pub fn relay(&self, index: u8) -> Result<bool, HardwareError> {
        self.with_pin(PinKind::Relay, index, |pin| *pin)
    }

    fn with_pin<T>(
        &self,
        kind: PinKind,
        index: u8,
        f: impl FnOnce(&mut bool) -> T,
    ) -> Result<T, HardwareError> {
        let mut board = self
            .board
            .lock()
            .map_err(|_| HardwareError::Fault("simulated board lock poisoned".to_string()))?;
        let bank = match kind {
            PinKind::Input => &mut board.inputs,
            PinKind::Output => &mut board.outputs,
            PinKind::Relay => &mut board.relays,
        };
        bank.get_mut(usize::from(index))
            .map(f)
            .ok_or(HardwareError::PinOutOfRange {
                kind,
                index,
                count: self.pin_count,
            })
    }
}

impl Hardware for MemoryHardware {
    fn name(&self) -> &str {
        "memory"
    }

    fn read_input(&self, index: u8) -> Result<bool, HardwareError> {
        self.with_pin(PinKind::Input, index, |pin| *pin)
    }

    fn write_output(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        self.with_pin(PinKind::Output, index, |pin| *pin = state)
    }

    fn write_relay(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        self.with_pin(PinKind::Relay, index, |pin| *pin = state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_starts_low() {
        let hw = MemoryHardware::new(8);
        assert!(!hw.read_input(0).unwrap());
        assert!(!hw.output(7).unwrap());
        assert!(!hw.relay(3).unwrap());
    }

    #[test]
    fn test_writes_are_remembered() {
        let hw = MemoryHardware::new(8);
        hw.write_output(1, true).unwrap();
        hw.write_relay(0, true).unwrap();
        hw.write_relay(0, false).unwrap();
        assert!(hw.output(1).unwrap());
        assert!(!hw.output(0).unwrap());
        assert!(!hw.relay(0).unwrap());
    }

    #[test]
    fn test_inputs_are_settable() {
        let hw = MemoryHardware::new(2);
        hw.set_input(1, true).unwrap();
        assert!(hw.read_input(1).unwrap());
        assert!(!hw.read_input(0).unwrap());
    }

    #[test]
    fn test_out_of_range_pins_fail() {
        let hw = MemoryHardware::new(2);
        let err = hw.write_relay(2, true).unwrap_err();
        assert!(matches!(
            err,
            HardwareError::PinOutOfRange {
                kind: PinKind::Relay,
                index: 2,
                count: 2
            }
        ));
        assert!(hw.read_input(200).is_err());
    }
}
