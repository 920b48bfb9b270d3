use futures::channel::mpsc::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::types::{LinkEvent, TransportEvent};
use crate::event_log::EventLog;
use crate::protocol::packet::{decode_inbound, hex};
use crate::protocol::types::{InboundFrame, TelemetrySnapshot};

/// Reads everything the transport pushes. Telemetry is published to `snapshots` (last writer wins),
/// auth responses and link loss are forwarded to the controller.
pub fn telemetry_sink_task(
    cancel: CancellationToken,
    mut inbound: Receiver<TransportEvent>,
    mut link_events: Sender<LinkEvent>,
    snapshots: watch::Sender<TelemetrySnapshot>,
    log: EventLog,
) -> JoinHandle<()> {
    spawn(async move {
        'mainloop: loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = inbound.next() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Transport event channel closed");
                        break 'mainloop;
                    },
                },
            };

            let forward = match event {
                TransportEvent::Disconnected => Some(LinkEvent::LinkLost),
                TransportEvent::Data(bytes) => match decode_inbound(&bytes) {
                    Ok(InboundFrame::Telemetry(snapshot)) => {
                        log.rx(hex(&bytes));
                        // send_replace never waits and works without receivers
                        snapshots.send_replace(snapshot);
                        None
                    },
                    Ok(InboundFrame::AuthResponse { accepted }) => {
                        log.rx(hex(&bytes));
                        Some(LinkEvent::AuthResponse { accepted })
                    },
                    Err(err) => {
                        // keep the previous snapshot
                        log.warn(format!("Ignoring inbound frame {}: {}", hex(&bytes), err));
                        None
                    },
                },
            };

            if let Some(link_event) = forward {
                if link_events.send(link_event).await.is_err() {
                    debug!("Controller is gone, stopping telemetry sink");
                    break 'mainloop;
                }
            }
        }
    })
}
