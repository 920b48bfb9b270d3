use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use futures::channel::mpsc::Receiver;
use log::{error, info, warn, LevelFilter};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::console::run_console;
use crate::control::controller::controller_task;
use crate::device::ble::BleTransport;
use crate::device::transport::{transport_channel, Transport};
use crate::device::types::TransportEvent;
use crate::error::AppRunError;
use crate::sim::vehicle::SimVehicle;

pub mod config;
pub mod console;
pub mod control;
pub mod device;
pub mod error;
pub mod event_log;
pub mod protocol;
pub mod sim;

const SIM_TELEMETRY_PERIOD: u64 = 500;

/// Remote control for an HM-10 based robot car.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Settings file; defaults to <exe>.json next to the executable or the OS config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Drive an in-process simulated vehicle instead of a bluetooth one
    #[arg(long)]
    pub simulate: bool,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

pub fn init_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                // this is probably the first start of the app
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {:?}", &err);
            }
            Config::default()
        },
    }
}

async fn make_transport(
    cancel: &CancellationToken,
    simulate: bool,
) -> Result<(Arc<dyn Transport>, Receiver<TransportEvent>, Option<JoinHandle<()>>), AppRunError> {
    if simulate {
        info!("Using the simulated vehicle");
        let (vehicle, inbound) = SimVehicle::single("Robocar");
        let telemetry = vehicle.telemetry_task(cancel.clone(), Duration::from_millis(SIM_TELEMETRY_PERIOD));
        let transport: Arc<dyn Transport> = Arc::new(vehicle);
        return Ok((transport, inbound, Some(telemetry)));
    }

    let (events, inbound) = transport_channel();
    let transport: Arc<dyn Transport> = Arc::new(BleTransport::new(events).await?);
    Ok((transport, inbound, None))
}

pub async fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(args.config.clone())?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let config = load_config(&config_io).await;
    let cancel = CancellationToken::new();

    let (transport, inbound, sim_task) = make_transport(&cancel, args.simulate).await?;
    let (handle, controller) = controller_task(cancel.clone(), config, transport, inbound);

    let result = run_console(cancel.clone(), handle).await;

    cancel.cancel();
    if let Err(err) = controller.await {
        warn!("Failed to join controller task: {:?}", err);
    }
    if let Some(sim_task) = sim_task {
        if let Err(err) = sim_task.await {
            warn!("Failed to join simulated telemetry task: {:?}", err);
        }
    }

    result
}
