use std::sync::Arc;
use futures::channel::mpsc::Sender;
use futures::SinkExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::constants::{IS_CONNECTED_DEADLINE, MAX_CONSECUTIVE_WRITE_FAILURES, SCAN_POLL_DELAY};
use crate::device::transport::Transport;
use crate::device::types::{AttemptEvent, ConnectStage, ConnectionState, DiscoveredDevice, LinkEvent};
use crate::error::{ConnectionError, CredentialError};
use crate::event_log::EventLog;
use crate::protocol::packet::encode_credential;

#[derive(Debug, Clone)]
enum AttemptTarget {
    Scan,
    Device(DiscoveredDevice),
}

struct Attempt {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

async fn report(cancel: &CancellationToken, link_events: &mut Sender<LinkEvent>, generation: u64, event: AttemptEvent) {
    tokio::select! {
        _ = cancel.cancelled() => {},
        result = link_events.send(LinkEvent::Attempt { generation, event }) => {
            if result.is_err() {
                debug!("Controller is gone, dropping attempt event");
            }
        },
    }
}

async fn scan_for_vehicle(
    cancel: &CancellationToken,
    generation: u64,
    transport: &dyn Transport,
    config: &Config,
    link_events: &mut Sender<LinkEvent>,
) -> Result<DiscoveredDevice, ConnectionError> {
    transport.start_scan().await
        .map_err(|err| ConnectionError::ScanFailed { reason: err.to_string() })?;

    let deadline = Instant::now() + config.timeouts.scan();
    let mut reported: Vec<DiscoveredDevice> = Vec::new();

    loop {
        match transport.discovered().await {
            Ok(devices) => {
                let candidates: Vec<DiscoveredDevice> = devices
                    .into_iter()
                    .filter(|device| config.matches_device_name(device.name.as_deref()))
                    .collect();

                if config.auto_connect {
                    if let Some(device) = candidates.into_iter().next() {
                        return Ok(device);
                    }
                } else if candidates != reported {
                    reported = candidates.clone();
                    report(cancel, link_events, generation, AttemptEvent::DevicesFound(candidates)).await;
                }
            },
            Err(err) => {
                warn!("Finding peripheral failed: {:?}", err);
            },
        }

        // with manual selection the scan keeps running once something was found
        if reported.is_empty() && Instant::now() >= deadline {
            return Err(ConnectionError::ScanTimeout);
        }

        sleep(Duration::from_millis(SCAN_POLL_DELAY)).await;
    }
}

async fn connect_vehicle(transport: &dyn Transport, config: &Config, device: DiscoveredDevice) -> AttemptEvent {
    if let Err(err) = transport.stop_scan().await {
        warn!("Failed to stop scanning: {:?}", err);
    }

    match timeout(config.timeouts.connect(), transport.connect(&device.id)).await {
        Err(_) => AttemptEvent::Failed(ConnectionError::ConnectTimeout),
        Ok(Err(err)) => AttemptEvent::Failed(ConnectionError::ConnectFailed { reason: err.to_string() }),
        Ok(Ok(())) => AttemptEvent::Established(device),
    }
}

async fn run_attempt(
    cancel: &CancellationToken,
    generation: u64,
    target: AttemptTarget,
    transport: &dyn Transport,
    config: &Config,
    link_events: &mut Sender<LinkEvent>,
) -> AttemptEvent {
    let device = match target {
        AttemptTarget::Device(device) => device,
        AttemptTarget::Scan => match scan_for_vehicle(cancel, generation, transport, config, link_events).await {
            Ok(device) => {
                report(cancel, link_events, generation, AttemptEvent::DeviceChosen(device.clone())).await;
                device
            },
            Err(err) => return AttemptEvent::Failed(err),
        },
    };

    connect_vehicle(transport, config, device).await
}

fn connection_attempt_task(
    cancel: CancellationToken,
    generation: u64,
    target: AttemptTarget,
    transport: Arc<dyn Transport>,
    config: Config,
    mut link_events: Sender<LinkEvent>,
) -> JoinHandle<()> {
    spawn(async move {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection attempt {} cancelled", generation);
                return;
            },
            event = run_attempt(&cancel, generation, target, &*transport, &config, &mut link_events) => event,
        };

        report(&cancel, &mut link_events, generation, event).await;
    })
}

/// Owns `ConnectionState`. Scans and connects run as spawned attempts; only the attempt with the
/// current generation may move the state forward.
pub struct ConnectionMachine {
    config: Config,
    transport: Arc<dyn Transport>,
    link_events: Sender<LinkEvent>,
    log: EventLog,
    cancel: CancellationToken,

    current: ConnectionState,
    published: watch::Sender<ConnectionState>,

    generation: u64,
    attempt: Option<Attempt>,
    pending_device: Option<DiscoveredDevice>,
    auth_deadline: Option<Instant>,
}

impl ConnectionMachine {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        link_events: Sender<LinkEvent>,
        log: EventLog,
        cancel: CancellationToken,
    ) -> Self {
        let (published, _) = watch::channel(ConnectionState::Disconnected);

        ConnectionMachine {
            config,
            transport,
            link_events,
            log,
            cancel,
            current: ConnectionState::Disconnected,
            published,
            generation: 0,
            attempt: None,
            pending_device: None,
            auth_deadline: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.current
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.published.subscribe()
    }

    pub fn auth_deadline(&self) -> Option<Instant> {
        self.auth_deadline
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.current == state {
            return;
        }

        match &state {
            ConnectionState::Disconnected => self.log.info("Disconnected"),
            ConnectionState::Scanning { found } if found.is_empty() => self.log.info("Scanning..."),
            ConnectionState::Scanning { found } => self.log.info(format!("Found {} vehicle(s)", found.len())),
            ConnectionState::Connecting { target_id, stage: ConnectStage::Linking } => self.log.info(format!("Connecting to {}...", target_id)),
            ConnectionState::Connecting { stage: ConnectStage::AwaitingCredential, .. } => self.log.info("Link up, waiting for a credential"),
            ConnectionState::Connecting { stage: ConnectStage::Authenticating, .. } => self.log.info("Credential sent"),
            ConnectionState::Connected { device_name, .. } => self.log.info(format!("Connected to {}", device_name)),
            ConnectionState::Error { reason } => self.log.err(reason.to_string()),
        }

        self.current = state;
        self.published.send_replace(self.current.clone());
    }

    fn spawn_attempt(&mut self, target: AttemptTarget) {
        self.generation += 1;
        let cancel = self.cancel.child_token();
        let handle = connection_attempt_task(
            cancel.clone(),
            self.generation,
            target,
            self.transport.clone(),
            self.config.clone(),
            self.link_events.clone(),
        );
        self.attempt = Some(Attempt { cancel, handle });
    }

    async fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            if let Err(err) = attempt.handle.await {
                warn!("Failed to join connection attempt: {:?}", err);
            }
        }
        // events still queued from the cancelled attempt carry an old generation
        self.generation += 1;
    }

    async fn release_transport(&self) {
        if let Err(err) = self.transport.stop_scan().await {
            debug!("Failed to stop scanning: {:?}", err);
        }
        if let Err(err) = self.transport.disconnect().await {
            warn!("Failed to disconnect: {:?}", err);
        }
    }

    async fn fail(&mut self, reason: ConnectionError) {
        self.cancel_attempt().await;
        self.release_transport().await;
        self.auth_deadline = None;
        self.pending_device = None;
        self.set_state(ConnectionState::Error { reason });
    }

    pub async fn start_scan(&mut self) {
        self.cancel_attempt().await;
        self.pending_device = None;
        self.auth_deadline = None;
        self.spawn_attempt(AttemptTarget::Scan);
        self.set_state(ConnectionState::Scanning { found: Vec::new() });
    }

    /// Disconnected/Error: scan. Scanning/Connecting: cancel. Connected: disconnect.
    pub async fn request_connect_or_disconnect(&mut self) {
        match &self.current {
            ConnectionState::Disconnected | ConnectionState::Error { .. } => self.start_scan().await,
            ConnectionState::Scanning { .. } | ConnectionState::Connecting { .. } => {
                self.log.info("Connection attempt cancelled");
                self.disconnect().await;
            },
            ConnectionState::Connected { .. } => self.disconnect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        self.cancel_attempt().await;
        self.release_transport().await;
        self.auth_deadline = None;
        self.pending_device = None;
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn acknowledge_error(&mut self) {
        if let ConnectionState::Error { .. } = self.current {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    pub async fn select_device(&mut self, device_id: &str) -> Result<(), ConnectionError> {
        let device = match &self.current {
            ConnectionState::Scanning { found } => found
                .iter()
                .find(|device| device.id == device_id)
                .cloned()
                .ok_or_else(|| ConnectionError::UnknownDevice { device_id: device_id.to_string() })?,
            _ => return Err(ConnectionError::NotScanning),
        };

        self.cancel_attempt().await;
        self.pending_device = Some(device.clone());
        self.set_state(ConnectionState::Connecting { target_id: device.id.clone(), stage: ConnectStage::Linking });
        self.spawn_attempt(AttemptTarget::Device(device));
        Ok(())
    }

    pub async fn on_attempt_event(&mut self, generation: u64, event: AttemptEvent) {
        if generation != self.generation || self.attempt.is_none() {
            debug!("Ignoring event from stale connection attempt {}: {:?}", generation, event);
            return;
        }

        match event {
            AttemptEvent::DevicesFound(found) => {
                if let ConnectionState::Scanning { .. } = self.current {
                    self.set_state(ConnectionState::Scanning { found });
                }
            },
            AttemptEvent::DeviceChosen(device) => {
                self.set_state(ConnectionState::Connecting { target_id: device.id.clone(), stage: ConnectStage::Linking });
                self.pending_device = Some(device);
            },
            AttemptEvent::Established(device) => {
                self.attempt = None;

                if self.config.require_credential {
                    self.auth_deadline = Some(Instant::now() + self.config.timeouts.auth());
                    self.set_state(ConnectionState::Connecting { target_id: device.id.clone(), stage: ConnectStage::AwaitingCredential });
                    self.pending_device = Some(device);
                } else {
                    self.pending_device = None;
                    self.set_state(ConnectionState::Connected { device_id: device.id.clone(), device_name: device.display_name() });
                }
            },
            AttemptEvent::Failed(reason) => {
                self.attempt = None;
                self.fail(reason).await;
            },
        }
    }

    pub async fn send_credential(&mut self, secret: &str) -> Result<(), CredentialError> {
        let target_id = match &self.current {
            ConnectionState::Connecting { target_id, stage: ConnectStage::AwaitingCredential } => target_id.clone(),
            _ => return Err(CredentialError::NotAwaitingCredential),
        };

        let frame = encode_credential(secret)?;
        match timeout(self.config.timeouts.write(), self.transport.send(&frame)).await {
            Err(_) => Err(CredentialError::SendFailed { reason: "write took too long".to_string() }),
            Ok(Err(err)) => Err(CredentialError::SendFailed { reason: err.to_string() }),
            Ok(Ok(())) => {
                // the secret itself never goes to the log
                self.log.tx(format!("credential ({} bytes)", frame.len() - 1));
                self.set_state(ConnectionState::Connecting { target_id, stage: ConnectStage::Authenticating });
                Ok(())
            },
        }
    }

    pub async fn on_auth_response(&mut self, accepted: bool) {
        let target_id = match &self.current {
            ConnectionState::Connecting { target_id, stage: ConnectStage::Authenticating } => target_id.clone(),
            _ => {
                self.log.warn("Unexpected authentication response");
                return;
            },
        };

        if !accepted {
            self.fail(ConnectionError::AuthRejected).await;
            return;
        }

        self.auth_deadline = None;
        let device_name = self.pending_device
            .take()
            .map(|device| device.display_name())
            .unwrap_or_else(|| target_id.clone());
        self.set_state(ConnectionState::Connected { device_id: target_id, device_name });
    }

    pub async fn on_auth_timeout(&mut self) {
        match self.auth_deadline {
            Some(deadline) if Instant::now() >= deadline => {},
            _ => return,
        }

        if let ConnectionState::Connecting { stage: ConnectStage::AwaitingCredential | ConnectStage::Authenticating, .. } = self.current {
            self.fail(ConnectionError::AuthTimeout).await;
        } else {
            self.auth_deadline = None;
        }
    }

    pub async fn on_link_lost(&mut self) {
        if self.current.is_link_up() {
            self.fail(ConnectionError::LinkLost).await;
        } else {
            debug!("Link lost event while the link was not up");
        }
    }

    /// Periodic transport health signal: sustained write failures or a failed liveness check end the link.
    pub async fn check_health(&mut self, consecutive_write_failures: u32) {
        if !self.current.is_link_up() {
            return;
        }

        if consecutive_write_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
            self.fail(ConnectionError::TransportUnhealthy { failures: consecutive_write_failures }).await;
            return;
        }

        match timeout(Duration::from_millis(IS_CONNECTED_DEADLINE), self.transport.is_connected()).await {
            Err(_) => {
                warn!("Checking for connection status took too long");
                self.fail(ConnectionError::LinkLost).await;
            },
            Ok(Err(err)) => {
                warn!("Error checking for connection state: {:?}", err);
                self.fail(ConnectionError::LinkLost).await;
            },
            Ok(Ok(false)) => {
                warn!("Connection lost");
                self.fail(ConnectionError::LinkLost).await;
            },
            Ok(Ok(true)) => {},
        }
    }

    pub async fn shutdown(&mut self) {
        info!("Shutting down connection");
        self.cancel_attempt().await;
        if self.current.is_link_up() || self.current.is_in_flight() {
            self.release_transport().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
