//! Routes decoded commands to the hardware capability.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::hardware::{Hardware, HardwareError};
use crate::protocol::{Command, ErrorKind, ProtocolError, Reply};

/// Executes [`Command`]s against one [`Hardware`] backend.
///
/// Inputs are wired active-low: a query reports `!raw`. Output and relay
/// writes report `true` once the backend accepts them.
#[derive(Clone)]
pub struct Dispatcher {
    hardware: Arc<dyn Hardware>,
}

impl Dispatcher {
    pub fn new(hardware: Arc<dyn Hardware>) -> Self {
        Self { hardware }
    }

    /// The backend commands are routed to.
    pub fn hardware(&self) -> &Arc<dyn Hardware> {
        &self.hardware
    }

    /// Run one command and produce its result.
    pub fn execute(&self, command: Command) -> Reply {
        let outcome = match command {
            Command::QueryInput { index } => self.hardware.read_input(index).map(|raw| {
                let state = !raw;
                info!(index, raw, state, "Queried input");
                state
            }),
            Command::SetOutput { index, state } => {
                info!(index, state, "Setting output");
                self.hardware.write_output(index, state).map(|()| true)
            }
            Command::SetRelay { index, state } => {
                info!(index, state, "Setting relay");
                self.hardware.write_relay(index, state).map(|()| true)
            }
        };

        outcome
            .map(Reply::State)
            .unwrap_or_else(|err| hardware_fault(&command, &err))
    }

    /// Decode a framed value and run it, turning protocol errors into error results.
    pub fn handle_frame(&self, frame: Result<Value, ProtocolError>) -> Reply {
        match frame.and_then(|value| Command::from_value(&value)) {
            Ok(command) => self.execute(command),
            Err(err) => {
                warn!(kind = ?err.kind(), error = %err, "Rejected message");
                Reply::from(err)
            }
        }
    }
}

fn hardware_fault(command: &Command, err: &HardwareError) -> Reply {
    warn!(?command, error = %err, "Hardware operation failed");
    Reply::error(ErrorKind::HardwareFault, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MemoryHardware, NoopHardware};
    use pretty_assertions::assert_eq;

    fn memory_dispatcher() -> (Arc<MemoryHardware>, Dispatcher) {
        let hw = Arc::new(MemoryHardware::new(8));
        (Arc::clone(&hw), Dispatcher::new(hw))
    }

    #[test]
    fn test_query_inverts_raw_level() {
        let (hw, dispatcher) = memory_dispatcher();

        assert_eq!(
            dispatcher.execute(Command::QueryInput { index: 0 }),
            Reply::State(true)
        );
        hw.set_input(0, true).unwrap();
        assert_eq!(
            dispatcher.execute(Command::QueryInput { index: 0 }),
            Reply::State(false)
        );
    }

    #[test]
    fn test_writes_report_true_and_reach_board() {
        let (hw, dispatcher) = memory_dispatcher();

        let reply = dispatcher.execute(Command::SetOutput {
            index: 1,
            state: true,
        });
        assert_eq!(reply, Reply::State(true));
        assert!(hw.output(1).unwrap());

        let reply = dispatcher.execute(Command::SetRelay {
            index: 0,
            state: false,
        });
        assert_eq!(reply, Reply::State(true));
        assert!(!hw.relay(0).unwrap());
    }

    #[test]
    fn test_noop_backend_keeps_contract() {
        let dispatcher = Dispatcher::new(Arc::new(NoopHardware));
        assert_eq!(
            dispatcher.execute(Command::QueryInput { index: 0 }),
            Reply::State(true)
        );
        assert_eq!(
            dispatcher.execute(Command::SetRelay {
                index: 1,
                state: true
            }),
            Reply::State(true)
        );
    }

    #[test]
    fn test_hardware_error_becomes_fault_reply() {
        let (_hw, dispatcher) = memory_dispatcher();
        let reply = dispatcher.execute(Command::SetOutput {
            index: 9,
            state: true,
        });
        match reply {
            Reply::Error { error } => {
                assert_eq!(error.kind, ErrorKind::HardwareFault);
                assert!(error.message.contains("output 9"));
            }
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[test]
    fn test_handle_frame_reports_protocol_errors() {
        let (_hw, dispatcher) = memory_dispatcher();

        let reply = dispatcher.handle_frame(Ok(serde_json::json!({"blink": 1})));
        assert!(matches!(
            reply,
            Reply::Error { ref error } if error.kind == ErrorKind::UnknownCommand
        ));

        let reply = dispatcher.handle_frame(Err(ProtocolError::Malformed("bad".into())));
        assert!(matches!(
            reply,
            Reply::Error { ref error } if error.kind == ErrorKind::MalformedMessage
        ));

        let reply = dispatcher.handle_frame(Ok(serde_json::json!({"input": 2})));
        assert_eq!(reply, Reply::State(true));
    }
}
