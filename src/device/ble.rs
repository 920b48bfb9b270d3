use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::constants::{make_vehicle_data_uuid, make_vehicle_service_uuid};
use crate::device::transport::Transport;
use crate::device::types::{DiscoveredDevice, TransportEvent};
use crate::error::TransportError;

struct BleLink {
    peripheral: Peripheral,
    data_char: Characteristic,
    notifications_cancel: CancellationToken,
    notifications_handle: JoinHandle<Result<(), TransportError>>,
}

/// [`Transport`] over a BLE UART-style characteristic, using btleplug.
pub struct BleTransport {
    manager: Manager,
    adapters: Mutex<Vec<Adapter>>,
    link: Mutex<Option<BleLink>>,
    events: Sender<TransportEvent>,
}

fn peripheral_id(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

async fn find_peripherals(adapters: &[Adapter]) -> Vec<(DiscoveredDevice, Peripheral)> {
    let vehicle_service_uuid = make_vehicle_service_uuid();
    let mut found = Vec::new();

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    // Some environments ignore the filter, so make sure to check the service uuid again
                    if properties.services.contains(&vehicle_service_uuid) {
                        let device = DiscoveredDevice {
                            id: peripheral_id(&peripheral),
                            name: properties.local_name,
                        };
                        found.push((device, peripheral));
                    }
                }
            }
        }
    }

    found
}

async fn connect_peripheral(peripheral: &Peripheral) -> Result<Characteristic, TransportError> {
    let vehicle_service_uuid = make_vehicle_service_uuid();
    let vehicle_data_uuid = make_vehicle_data_uuid();

    info!("Connecting to peripheral...");
    peripheral.connect().await?;

    info!("Connected; Discovering services...");
    peripheral.discover_services().await?;

    for service in peripheral.services() {
        if !service.uuid.eq(&vehicle_service_uuid) {
            continue;
        }

        for characteristic in &service.characteristics {
            if !characteristic.uuid.eq(&vehicle_data_uuid) {
                continue;
            }

            info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
            peripheral.subscribe(characteristic).await?;
            return Ok(characteristic.clone());
        }
    }

    Err(TransportError::MissingCharacteristic)
}

fn read_notifications_task(cancel: CancellationToken, peripheral: &Peripheral, mut events: Sender<TransportEvent>) -> JoinHandle<Result<(), TransportError>> {
    let peripheral_clone = peripheral.clone();
    let vehicle_data_uuid = make_vehicle_data_uuid();

    spawn(async move {
        let mut notification_stream = peripheral_clone.notifications().await?;

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = notification_stream.next() => match next {
                    Some(data) => {
                        if data.uuid.eq(&vehicle_data_uuid) && events.send(TransportEvent::Data(data.value)).await.is_err() {
                            debug!("Transport event receiver dropped");
                            break 'mainloop;
                        }
                    },
                    None => {
                        // the stream ends when the peripheral goes away
                        warn!("Notification stream ended");
                        if events.send(TransportEvent::Disconnected).await.is_err() {
                            debug!("Transport event receiver dropped");
                        }
                        break 'mainloop;
                    },
                },
            }
        }

        Ok(())
    })
}

impl BleTransport {
    pub async fn new(events: Sender<TransportEvent>) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;

        Ok(BleTransport {
            manager,
            adapters: Mutex::new(Vec::new()),
            link: Mutex::new(None),
            events,
        })
    }

    async fn close_link(link: BleLink) {
        link.notifications_cancel.cancel();

        if let Err(err) = link.peripheral.disconnect().await {
            warn!("Failed to disconnect peripheral: {:?}", err);
        }

        match link.notifications_handle.await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => warn!("Error during read notifications task: {:?}", err),
            Err(err) => warn!("Failed to join read notifications task: {:?}", err),
        }
        info!("Read notifications task stopped");
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self) -> Result<(), TransportError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(TransportError::NoAdapter);
        }

        let filter = ScanFilter {
            services: vec![make_vehicle_service_uuid()],
        };

        for adapter in &adapters {
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(filter.clone()).await?;
        }

        *self.adapters.lock().await = adapters;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        for adapter in self.adapters.lock().await.iter() {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let adapters = self.adapters.lock().await;
        Ok(find_peripherals(&adapters).await.into_iter().map(|(device, _)| device).collect())
    }

    async fn connect(&self, device_id: &str) -> Result<(), TransportError> {
        let peripheral = {
            let adapters = self.adapters.lock().await;
            find_peripherals(&adapters).await
                .into_iter()
                .find(|(device, _)| device.id == device_id)
                .map(|(_, peripheral)| peripheral)
                .ok_or_else(|| TransportError::UnknownDevice { device_id: device_id.to_string() })?
        };

        let mut link = self.link.lock().await;
        if let Some(previous) = link.take() {
            Self::close_link(previous).await;
        }

        let data_char = match connect_peripheral(&peripheral).await {
            Ok(data_char) => data_char,
            Err(err) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    debug!("Failed to disconnect after a failed setup: {:?}", disconnect_err);
                }
                return Err(err);
            },
        };
        let notifications_cancel = CancellationToken::new();
        let notifications_handle = read_notifications_task(notifications_cancel.clone(), &peripheral, self.events.clone());

        info!("Peripheral ready");
        *link = Some(BleLink { peripheral, data_char, notifications_cancel, notifications_handle });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(link) = self.link.lock().await.take() {
            Self::close_link(link).await;
        }
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;

        link.peripheral.write(&link.data_char, frame, WriteType::WithoutResponse).await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        let link = self.link.lock().await;
        match link.as_ref() {
            None => Ok(false),
            Some(link) => Ok(link.peripheral.is_connected().await?),
        }
    }
}
