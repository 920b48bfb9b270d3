use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use futures::channel::mpsc::{Receiver, Sender};
use log::{debug, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::transport::{transport_channel, Transport};
use crate::device::types::{DiscoveredDevice, TransportEvent};
use crate::error::TransportError;
use crate::protocol::packet::{encode_auth_response, encode_telemetry, CAR_PACKET_TAG, CREDENTIAL_TAG, DRIVE_PACKET_TAG};
use crate::protocol::types::TelemetrySnapshot;

/// A frame the simulated vehicle accepted, stamped with the (tokio) time it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

impl SentFrame {
    pub fn is_command(&self) -> bool {
        matches!(self.bytes.first(), Some(&CAR_PACKET_TAG) | Some(&DRIVE_PACKET_TAG))
    }
}

#[derive(Debug)]
struct SimState {
    devices: Vec<DiscoveredDevice>,
    scanning: bool,
    scan_starts: usize,
    link: Option<String>,
    // None accepts any credential
    credential: Option<String>,
    answer_credentials: bool,
    fail_writes: bool,
    drop_after_commands: Option<usize>,
    connect_delay: Duration,
    sent: Vec<SentFrame>,
    last_powers: [i8; 4],
}

/// In-process stand-in for the vehicle and its radio link.
///
/// Behaves like the real firmware: command frames are swallowed, a credential frame is answered
/// with an auth response and telemetry can be pushed at any time. Faults can be injected to
/// exercise the failure paths of the connection machine and the replay engine.
#[derive(Clone)]
pub struct SimVehicle {
    state: Arc<Mutex<SimState>>,
    events: Sender<TransportEvent>,
}

impl SimVehicle {
    pub fn new(devices: Vec<DiscoveredDevice>) -> (Self, Receiver<TransportEvent>) {
        let (events, inbound) = transport_channel();
        let state = SimState {
            devices,
            scanning: false,
            scan_starts: 0,
            link: None,
            credential: None,
            answer_credentials: true,
            fail_writes: false,
            drop_after_commands: None,
            connect_delay: Duration::from_millis(100),
            sent: Vec::new(),
            last_powers: [0; 4],
        };

        (SimVehicle { state: Arc::new(Mutex::new(state)), events }, inbound)
    }

    /// A single vehicle named `name`, the usual setup.
    pub fn single(name: &str) -> (Self, Receiver<TransportEvent>) {
        SimVehicle::new(vec![DiscoveredDevice {
            id: format!("sim-{}", name.to_lowercase()),
            name: Some(name.to_string()),
        }])
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: TransportEvent) {
        if let Err(err) = self.events.clone().try_send(event) {
            debug!("Dropping simulated transport event: {:?}", err);
        }
    }

    pub fn with_credential(self, secret: &str) -> Self {
        self.state().credential = Some(secret.to_string());
        self
    }

    /// When false the vehicle never answers credential frames.
    pub fn set_answer_credentials(&self, answer: bool) {
        self.state().answer_credentials = answer;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// The link goes down right after the `n`th command frame was accepted.
    pub fn drop_link_after_commands(&self, n: usize) {
        self.state().drop_after_commands = Some(n);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = delay;
    }

    /// Unsolicited link loss, as if the vehicle was switched off.
    pub fn drop_link(&self) {
        let was_up = self.state().link.take().is_some();
        if was_up {
            self.emit(TransportEvent::Disconnected);
        }
    }

    pub fn push_telemetry(&self, snapshot: TelemetrySnapshot) {
        self.push_raw(encode_telemetry(&snapshot).to_vec());
    }

    pub fn push_raw(&self, bytes: Vec<u8>) {
        self.emit(TransportEvent::Data(bytes));
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    pub fn command_frames(&self) -> Vec<SentFrame> {
        self.state().sent.iter().filter(|frame| frame.is_command()).cloned().collect()
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    pub fn is_link_up(&self) -> bool {
        self.state().link.is_some()
    }

    /// Echoes the last commanded powers back as telemetry every `period` while the link is up.
    pub fn telemetry_task(&self, cancel: CancellationToken, period: Duration) -> JoinHandle<()> {
        let vehicle = self.clone();

        spawn(async move {
            let mut ticks = interval(period);

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = ticks.tick() => {
                        let powers = {
                            let state = vehicle.state();
                            state.link.as_ref().map(|_| state.last_powers)
                        };

                        if let Some([p1, p2, p3, p4]) = powers {
                            vehicle.push_telemetry(TelemetrySnapshot {
                                p1: p1 as i16,
                                p2: p2 as i16,
                                p3: p3 as i16,
                                p4: p4 as i16,
                            });
                        }
                    },
                }
            }
        })
    }
}

#[async_trait]
impl Transport for SimVehicle {
    async fn start_scan(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.scanning = true;
        state.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state().scanning = false;
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let state = self.state();
        Ok(if state.scanning { state.devices.clone() } else { Vec::new() })
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let delay = self.state().connect_delay;
        sleep(delay).await;

        let mut state = self.state();
        if !state.devices.iter().any(|device| device.id == device_id) {
            return Err(TransportError::UnknownDevice { device_id: device_id.to_string() });
        }

        info!("Simulated vehicle {} connected", device_id);
        state.link = Some(device_id.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state().link = None;
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut reply = None;
        let mut dropped = false;

        {
            let mut state = self.state();
            if state.link.is_none() {
                return Err(TransportError::NotConnected);
            }
            if state.fail_writes {
                return Err(TransportError::WriteRejected { reason: "simulated write failure".to_string() });
            }

            state.sent.push(SentFrame { at: Instant::now(), bytes: frame.to_vec() });

            match frame.split_first() {
                Some((&CREDENTIAL_TAG, secret)) => {
                    if state.answer_credentials {
                        let accepted = match &state.credential {
                            Some(expected) => expected.as_bytes() == secret,
                            None => true,
                        };
                        reply = Some(encode_auth_response(accepted).to_vec());
                    }
                },
                Some((&CAR_PACKET_TAG, &[left, right])) => {
                    state.last_powers = [left as i8, right as i8, 0, 0];
                },
                Some((&DRIVE_PACKET_TAG, &[m1, m2, m3, m4])) => {
                    state.last_powers = [m1 as i8, m2 as i8, m3 as i8, m4 as i8];
                },
                _ => {},
            }

            let commands = state.sent.iter().filter(|frame| frame.is_command()).count();
            if state.drop_after_commands.is_some_and(|n| commands >= n) {
                state.drop_after_commands = None;
                state.link = None;
                dropped = true;
            }
        }

        if let Some(bytes) = reply {
            self.emit(TransportEvent::Data(bytes));
        }
        if dropped {
            self.emit(TransportEvent::Disconnected);
        }
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.state().link.is_some())
    }
}
