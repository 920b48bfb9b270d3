use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::device::transport::Transport;
use crate::device::types::ConnectionState;
use crate::error::{DispatchError, TransportError};
use crate::event_log::EventLog;
use crate::protocol::packet::{encode_powers, hex};
use crate::protocol::types::ChannelPowers;

/// The only path from channel powers to bytes on the transport.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    log: EventLog,
    write_deadline: Duration,
    consecutive_failures: u32,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, log: EventLog, write_deadline: Duration) -> Self {
        Dispatcher {
            transport,
            log,
            write_deadline,
            consecutive_failures: 0,
        }
    }

    /// Failed writes since the last successful one. Read by the health check, never acted on here.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    pub async fn send(&mut self, state: &ConnectionState, powers: ChannelPowers) -> Result<(), DispatchError> {
        match state {
            ConnectionState::Connected { .. } => {},
            ConnectionState::Connecting { .. } if state.is_link_up() => {
                self.log.warn("Command dropped: the vehicle has not accepted a credential yet");
                return Err(DispatchError::NotAuthorized);
            },
            _ => {
                self.log.warn("Command dropped: not connected");
                return Err(DispatchError::NotConnected);
            },
        }

        let frame = encode_powers(&powers);
        let result = match timeout(self.write_deadline, self.transport.send(&frame)).await {
            Err(_) => Err(DispatchError::TransportFailure { reason: "write took too long".to_string() }),
            Ok(Err(TransportError::NotConnected)) => Err(DispatchError::NotConnected),
            Ok(Err(err)) => Err(DispatchError::TransportFailure { reason: err.to_string() }),
            Ok(Ok(())) => Ok(()),
        };

        match &result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.log.tx(hex(&frame));
            },
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.log.err(format!("Failed to send {}: {}", hex(&frame), err));
            },
        }

        result
    }
}
