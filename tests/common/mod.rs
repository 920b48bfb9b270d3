#![allow(dead_code)]

use std::sync::Arc;
use futures::channel::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use robocar_remote::config::types::Config;
use robocar_remote::control::controller::controller_task;
use robocar_remote::control::handle::ControllerHandle;
use robocar_remote::device::transport::Transport;
use robocar_remote::device::types::{ConnectionState, DiscoveredDevice, TransportEvent};
use robocar_remote::sim::vehicle::SimVehicle;

pub const VEHICLE_ID: &str = "sim-robocar";

pub struct Rig {
    pub cancel: CancellationToken,
    pub vehicle: SimVehicle,
    pub handle: ControllerHandle,
    controller: JoinHandle<()>,
}

impl Rig {
    pub fn start(config: Config, vehicle: SimVehicle, inbound: Receiver<TransportEvent>) -> Self {
        let cancel = CancellationToken::new();
        let transport: Arc<dyn Transport> = Arc::new(vehicle.clone());
        let (handle, controller) = controller_task(cancel.clone(), config, transport, inbound);
        Rig { cancel, vehicle, handle, controller }
    }

    pub fn with_config(config: Config) -> Self {
        let (vehicle, inbound) = SimVehicle::single("Robocar");
        Rig::start(config, vehicle, inbound)
    }

    pub fn new() -> Self {
        Rig::with_config(Config::default())
    }

    pub async fn connected() -> Self {
        let rig = Rig::new();
        rig.connect().await;
        rig
    }

    pub async fn connect(&self) {
        self.handle.request_connect_or_disconnect().await.unwrap();
        self.wait_for(ConnectionState::is_connected).await;
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&ConnectionState) -> bool) -> ConnectionState {
        self.handle.wait_for_state(predicate).await.unwrap()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.controller.await.unwrap();
    }
}

pub fn device(id: &str, name: &str) -> DiscoveredDevice {
    DiscoveredDevice { id: id.to_string(), name: Some(name.to_string()) }
}

/// Polls `condition` on the (paused) tokio clock.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
