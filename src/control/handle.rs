use futures::channel::mpsc::Sender;
use futures::channel::oneshot;
use futures::SinkExt;
use tokio::sync::watch;

use crate::control::recorder::{RecordedAction, RecorderStatus, ReplayOutcome};
use crate::control::tuning::TuningProfile;
use crate::device::types::ConnectionState;
use crate::error::ControllerError;
use crate::event_log::{EventLog, LogEntry};
use crate::protocol::types::{ChannelPowers, TelemetrySnapshot};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ControllerError>>;

pub(crate) enum Command {
    RequestConnectOrDisconnect(Reply<()>),
    Disconnect(Reply<()>),
    AcknowledgeError(Reply<()>),
    SelectDevice { device_id: String, reply: Reply<()> },
    SendCredential { secret: String, reply: Reply<()> },
    SetJoystick { axis_x: i32, axis_y: i32, reply: Reply<ChannelPowers> },
    ReleaseJoystick(Reply<ChannelPowers>),
    SetSpeedLimit { percent: i32, reply: Reply<()> },
    CurrentPowers(Reply<ChannelPowers>),
    SetTuningProfile { profile: TuningProfile, reply: Reply<()> },
    TuningProfile(Reply<TuningProfile>),
    SendRawChannels { m: [i32; 4], reply: Reply<ChannelPowers> },
    SendRawPair { left: i32, right: i32, reply: Reply<ChannelPowers> },
    StartRecording(Reply<()>),
    StopRecording(Reply<()>),
    RecordMove { m: [i32; 4], reply: Reply<()> },
    RecordWait { seconds: f64, reply: Reply<()> },
    ReplayTrack { times: u32, reply: Reply<ReplayOutcome> },
    CancelReplay(Reply<bool>),
    RecorderStatus(Reply<RecorderStatus>),
    RecordedTrack(Reply<Vec<RecordedAction>>),
}

/// The capability surface offered to the UI and the scripting sandbox.
/// Every call is serialized through the controller task.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: Sender<Command>,
    states: watch::Receiver<ConnectionState>,
    telemetry: watch::Receiver<TelemetrySnapshot>,
    log: EventLog,
}

impl ControllerHandle {
    pub(crate) fn new(
        commands: Sender<Command>,
        states: watch::Receiver<ConnectionState>,
        telemetry: watch::Receiver<TelemetrySnapshot>,
        log: EventLog,
    ) -> Self {
        ControllerHandle { commands, states, telemetry, log }
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        let mut commands = self.commands.clone();

        commands.send(make(reply)).await.map_err(|_| ControllerError::Stopped)?;
        response.await.map_err(|_| ControllerError::Stopped)?
    }

    pub async fn request_connect_or_disconnect(&self) -> Result<(), ControllerError> {
        self.call(Command::RequestConnectOrDisconnect).await
    }

    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.call(Command::Disconnect).await
    }

    pub async fn acknowledge_error(&self) -> Result<(), ControllerError> {
        self.call(Command::AcknowledgeError).await
    }

    pub async fn select_device(&self, device_id: impl Into<String>) -> Result<(), ControllerError> {
        let device_id = device_id.into();
        self.call(|reply| Command::SelectDevice { device_id, reply }).await
    }

    pub async fn send_credential(&self, secret: impl Into<String>) -> Result<(), ControllerError> {
        let secret = secret.into();
        self.call(|reply| Command::SendCredential { secret, reply }).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.states.borrow().clone()
    }

    pub fn connection_states(&self) -> watch::Receiver<ConnectionState> {
        self.states.clone()
    }

    /// Resolves with the first state (current included) that matches `predicate`.
    pub async fn wait_for_state(&self, predicate: impl FnMut(&ConnectionState) -> bool) -> Result<ConnectionState, ControllerError> {
        let mut states = self.states.clone();
        let state = states.wait_for(predicate).await.map_err(|_| ControllerError::Stopped)?;
        Ok(state.clone())
    }

    pub async fn set_joystick(&self, axis_x: i32, axis_y: i32) -> Result<ChannelPowers, ControllerError> {
        self.call(|reply| Command::SetJoystick { axis_x, axis_y, reply }).await
    }

    pub async fn release_joystick(&self) -> Result<ChannelPowers, ControllerError> {
        self.call(Command::ReleaseJoystick).await
    }

    pub async fn set_speed_limit(&self, percent: i32) -> Result<(), ControllerError> {
        self.call(|reply| Command::SetSpeedLimit { percent, reply }).await
    }

    pub async fn current_powers(&self) -> Result<ChannelPowers, ControllerError> {
        self.call(Command::CurrentPowers).await
    }

    pub async fn set_tuning_profile(&self, profile: TuningProfile) -> Result<(), ControllerError> {
        self.call(|reply| Command::SetTuningProfile { profile, reply }).await
    }

    pub async fn tuning_profile(&self) -> Result<TuningProfile, ControllerError> {
        self.call(Command::TuningProfile).await
    }

    pub async fn send_raw_channels(&self, m1: i32, m2: i32, m3: i32, m4: i32) -> Result<ChannelPowers, ControllerError> {
        self.call(|reply| Command::SendRawChannels { m: [m1, m2, m3, m4], reply }).await
    }

    /// Sends a car packet with per-side tuning but without joystick mixing.
    pub async fn send_raw_pair(&self, left: i32, right: i32) -> Result<ChannelPowers, ControllerError> {
        self.call(|reply| Command::SendRawPair { left, right, reply }).await
    }

    pub async fn start_recording(&self) -> Result<(), ControllerError> {
        self.call(Command::StartRecording).await
    }

    pub async fn stop_recording(&self) -> Result<(), ControllerError> {
        self.call(Command::StopRecording).await
    }

    pub async fn record_move(&self, m1: i32, m2: i32, m3: i32, m4: i32) -> Result<(), ControllerError> {
        self.call(|reply| Command::RecordMove { m: [m1, m2, m3, m4], reply }).await
    }

    pub async fn record_wait(&self, seconds: f64) -> Result<(), ControllerError> {
        self.call(|reply| Command::RecordWait { seconds, reply }).await
    }

    /// Resolves once the replay completed, was cancelled or aborted.
    pub async fn replay_track(&self, times: u32) -> Result<ReplayOutcome, ControllerError> {
        self.call(|reply| Command::ReplayTrack { times, reply }).await
    }

    /// Returns false when no replay was running.
    pub async fn cancel_replay(&self) -> Result<bool, ControllerError> {
        self.call(Command::CancelReplay).await
    }

    pub async fn recorder_status(&self) -> Result<RecorderStatus, ControllerError> {
        self.call(Command::RecorderStatus).await
    }

    pub async fn recorded_track(&self) -> Result<Vec<RecordedAction>, ControllerError> {
        self.call(Command::RecordedTrack).await
    }

    pub fn latest_telemetry(&self) -> TelemetrySnapshot {
        *self.telemetry.borrow()
    }

    pub fn telemetry_updates(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.clone()
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }
}
