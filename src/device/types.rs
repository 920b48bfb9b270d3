use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.clone())
    }
}

/// What a transport pushes to the core, independent of any command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Vec<u8>),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Linking,
    AwaitingCredential,
    Authenticating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning {
        found: Vec<DiscoveredDevice>,
    },
    Connecting {
        target_id: String,
        stage: ConnectStage,
    },
    Connected {
        device_id: String,
        device_name: String,
    },
    Error {
        reason: ConnectionError,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// True when the transport-level link is up, whether or not authentication finished.
    pub fn is_link_up(&self) -> bool {
        match self {
            ConnectionState::Connected { .. } => true,
            ConnectionState::Connecting { stage, .. } => *stage != ConnectStage::Linking,
            _ => false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ConnectionState::Scanning { .. } | ConnectionState::Connecting { .. })
    }
}

/// Reports from a scan/connect attempt task. Tagged with the attempt generation by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    DevicesFound(Vec<DiscoveredDevice>),
    DeviceChosen(DiscoveredDevice),
    Established(DiscoveredDevice),
    Failed(ConnectionError),
}

/// Internal events consumed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Attempt { generation: u64, event: AttemptEvent },
    AuthResponse { accepted: bool },
    LinkLost,
}
