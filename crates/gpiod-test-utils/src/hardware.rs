//! A [`Hardware`] double that records every call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use gpiod_core::hardware::{Hardware, HardwareError};

/// One call made on a [`RecordingHardware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCall {
    ReadInput(u8),
    WriteOutput(u8, bool),
    WriteRelay(u8, bool),
}

/// How a [`RecordingHardware`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    #[default]
    None,
    /// Every call returns [`HardwareError::Fault`].
    Error,
    /// Every call panics.
    Panic,
}

/// Records calls in order. Inputs read `false` unless set.
///
/// Calls are recorded before the fault mode applies, so a failing call still
/// shows up in [`calls`](Self::calls).
#[derive(Debug, Default)]
pub struct RecordingHardware {
    inputs: Mutex<HashMap<u8, bool>>,
    calls: Mutex<Vec<HardwareCall>>,
    fault: Mutex<FaultMode>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw level input `index` reads as.
    pub fn set_input(&self, index: u8, raw: bool) {
        lock(&self.inputs).insert(index, raw);
    }

    pub fn set_fault(&self, mode: FaultMode) {
        *lock(&self.fault) = mode;
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<HardwareCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: HardwareCall) -> Result<(), HardwareError> {
        lock(&self.calls).push(call);
        let mode = *lock(&self.fault);
        match mode {
            FaultMode::None => Ok(()),
            FaultMode::Error => Err(HardwareError::Fault(format!("injected fault on {call:?}"))),
            FaultMode::Panic => panic!("injected panic on {call:?}"),
        }
    }
}

impl Hardware for RecordingHardware {
    fn name(&self) -> &str {
        "recording"
    }

    fn read_input(&self, index: u8) -> Result<bool, HardwareError> {
        self.record(HardwareCall::ReadInput(index))?;
        Ok(lock(&self.inputs).get(&index).copied().unwrap_or(false))
    }

    fn write_output(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::WriteOutput(index, state))
    }

    fn write_relay(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::WriteRelay(index, state))
    }
}
