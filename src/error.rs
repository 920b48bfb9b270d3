use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (transport): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Failed to read console input: {source}")]
    Console { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("The transport is not connected to a device")]
    NotConnected,

    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Write rejected by the device: {reason}")]
    WriteRejected { reason: String },
}

/// Lifecycle failures. These are carried inside `ConnectionState::Error`, so they only hold plain data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No vehicle found before the scan timed out")]
    ScanTimeout,

    #[error("Scanning failed: {reason}")]
    ScanFailed { reason: String },

    #[error("Connecting to the vehicle timed out")]
    ConnectTimeout,

    #[error("Connecting to the vehicle failed: {reason}")]
    ConnectFailed { reason: String },

    #[error("The connection to the vehicle was lost")]
    LinkLost,

    #[error("The transport failed {failures} consecutive writes")]
    TransportUnhealthy { failures: u32 },

    #[error("The vehicle did not acknowledge the credential in time")]
    AuthTimeout,

    #[error("The vehicle rejected the credential")]
    AuthRejected,

    #[error("A device can only be selected while scanning")]
    NotScanning,

    #[error("Device {device_id} has not been discovered")]
    UnknownDevice { device_id: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("The vehicle is not waiting for a credential")]
    NotAwaitingCredential,

    #[error("The credential must not be empty")]
    Empty,

    #[error("The credential is {len} bytes long, at most {max} bytes fit in one frame")]
    TooLong { len: usize, max: usize },

    #[error("Failed to send the credential: {reason}")]
    SendFailed { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Not connected to a vehicle")]
    NotConnected,

    #[error("The vehicle has not accepted a credential yet")]
    NotAuthorized,

    #[error("Failed to write to the vehicle: {reason}")]
    TransportFailure { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("Not recording")]
    NotRecording,

    #[error("A replay is in progress")]
    ReplayInProgress,

    #[error("Invalid wait of {seconds} seconds")]
    InvalidWait { seconds: f64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Nothing to replay")]
    NothingToReplay,

    #[error("The recorder is busy recording or replaying")]
    Busy,

    #[error("The vehicle disconnected during the replay")]
    DisconnectedMidReplay,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TuningError {
    #[error("Trim {0} is outside [-50, 50]")]
    TrimOutOfRange(i32),

    #[error("Turn sensitivity {0} is outside [10, 100]")]
    TurnSensitivityOutOfRange(i32),

    #[error("Speed limit {0} is outside [10, 100]")]
    SpeedOutOfRange(i32),

    #[error("Input {0} is outside [-100, 100]")]
    InputOutOfRange(i32),
}

/// Everything a `ControllerHandle` call can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("The controller has stopped")]
    Stopped,

    #[error("{source}")]
    Connection { #[from] source: ConnectionError },

    #[error("{source}")]
    Credential { #[from] source: CredentialError },

    #[error("{source}")]
    Dispatch { #[from] source: DispatchError },

    #[error("{source}")]
    Recorder { #[from] source: RecorderError },

    #[error("{source}")]
    Replay { #[from] source: ReplayError },

    #[error("{source}")]
    Tuning { #[from] source: TuningError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("Usage: {usage}")]
    Usage { usage: &'static str },

    #[error("Invalid number: {value}")]
    InvalidNumber { value: String },
}
