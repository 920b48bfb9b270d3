use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use robocar_remote::{init_logging, run, Args};
use robocar_remote::error::{AppRunError, ConfigError};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_logging(args.log_level) {
        eprintln!("Failed to initialize logging: {}", err);
        return ExitCode::FAILURE;
    }
    info!(concat!("Robocar Remote ", env!("CARGO_PKG_VERSION")));

    match run(args).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("Robocar Remote has already been started");
            ExitCode::FAILURE
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            ExitCode::FAILURE
        },
        Ok(()) => ExitCode::SUCCESS,
    }
}
