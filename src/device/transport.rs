use async_trait::async_trait;
use futures::channel::mpsc::{channel, Receiver, Sender};

use crate::device::types::{DiscoveredDevice, TransportEvent};
use crate::error::TransportError;

pub const TRANSPORT_EVENT_CAPACITY: usize = 128;

/// The wireless link primitives the core depends on.
///
/// Inbound data and lifecycle events are not returned from these calls: implementations push
/// them as [`TransportEvent`]s into the channel created by [`transport_channel`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn start_scan(&self) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Devices seen since the last `start_scan`.
    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError>;

    async fn connect(&self, device_id: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    async fn is_connected(&self) -> Result<bool, TransportError>;
}

pub fn transport_channel() -> (Sender<TransportEvent>, Receiver<TransportEvent>) {
    channel::<TransportEvent>(TRANSPORT_EVENT_CAPACITY)
}
