use std::future::pending;
use std::sync::Arc;
use futures::channel::mpsc::{channel, Receiver};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::control::dispatcher::Dispatcher;
use crate::control::handle::{Command, ControllerHandle, Reply};
use crate::control::recorder::{RecordedAction, Recorder, ReplayCursor, ReplayOutcome};
use crate::control::telemetry::telemetry_sink_task;
use crate::control::tuning::{apply, apply2, apply4, check_input, check_speed, scale_by_speed, TuningProfile, SPEED_MAX};
use crate::device::connection::ConnectionMachine;
use crate::device::transport::Transport;
use crate::device::types::{LinkEvent, TransportEvent};
use crate::error::{ControllerError, DispatchError, ReplayError};
use crate::event_log::EventLog;
use crate::protocol::types::{ChannelPowers, TelemetrySnapshot};

const COMMAND_CAPACITY: usize = 32;
const LINK_EVENT_CAPACITY: usize = 32;

struct ActiveReplay {
    cursor: ReplayCursor,
    // set while suspended on a Wait
    resume_at: Option<Instant>,
    moves: usize,
    reply: Reply<ReplayOutcome>,
}

enum ReplayStep {
    Continue,
    Done(Result<ReplayOutcome, ControllerError>),
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

/// Single owner of the connection machine, dispatcher, recorder and live control state.
struct Controller {
    config: Config,
    log: EventLog,
    connection: ConnectionMachine,
    dispatcher: Dispatcher,
    recorder: Recorder,
    replay: Option<ActiveReplay>,
    profile: TuningProfile,
    speed: i32,
    powers: ChannelPowers,
}

impl Controller {
    fn stopped_powers(&self) -> ChannelPowers {
        self.config.chassis.widen(ChannelPowers::pair(0, 0))
    }

    fn respond<T>(&self, reply: Reply<T>, result: Result<T, ControllerError>) {
        match &result {
            // the dispatcher already logged these
            Err(ControllerError::Dispatch { .. }) => {},
            Err(err) => self.log.warn(err.to_string()),
            Ok(_) => {},
        }

        if reply.send(result).is_err() {
            debug!("Caller dropped the reply channel");
        }
    }

    async fn drive(&mut self, powers: ChannelPowers) -> Result<ChannelPowers, ControllerError> {
        self.powers = powers;
        self.dispatcher.send(self.connection.state(), powers).await?;
        Ok(powers)
    }

    async fn set_joystick(&mut self, axis_x: i32, axis_y: i32) -> Result<ChannelPowers, ControllerError> {
        let axis_x = scale_by_speed(check_input(axis_x)?, self.speed);
        let axis_y = scale_by_speed(check_input(axis_y)?, self.speed);

        let powers = self.config.chassis.widen(apply(&self.profile, axis_x, axis_y));
        self.drive(powers).await
    }

    async fn release_joystick(&mut self) -> Result<ChannelPowers, ControllerError> {
        let powers = self.stopped_powers();
        if self.connection.state().is_connected() {
            self.drive(powers).await
        } else {
            self.powers = powers;
            Ok(powers)
        }
    }

    fn check_channels(m: [i32; 4]) -> Result<[i32; 4], ControllerError> {
        for value in m {
            check_input(value)?;
        }
        Ok(m)
    }

    async fn send_raw_channels(&mut self, m: [i32; 4]) -> Result<ChannelPowers, ControllerError> {
        let m = Self::check_channels(m)?;
        let powers = apply4(&self.profile, m);
        self.drive(powers).await
    }

    async fn send_raw_pair(&mut self, left: i32, right: i32) -> Result<ChannelPowers, ControllerError> {
        let powers = apply2(&self.profile, check_input(left)?, check_input(right)?);
        self.drive(powers).await
    }

    fn record_move(&mut self, m: [i32; 4]) -> Result<(), ControllerError> {
        let m = Self::check_channels(m)?;
        // tracks hold already-tuned values, replay does not tune again
        let scaled = match apply4(&self.profile, m) {
            ChannelPowers::Quad(scaled) => scaled,
            ChannelPowers::Pair { left, right } => [left, right, left, right],
        };
        Ok(self.recorder.record_move(scaled)?)
    }

    fn begin_replay(&mut self, times: u32, reply: Reply<ReplayOutcome>) {
        match self.recorder.begin_replay(times) {
            Ok(cursor) => {
                self.log.info(format!("Replaying track {} time(s)", cursor.times()));
                self.replay = Some(ActiveReplay { cursor, resume_at: None, moves: 0, reply });
            },
            Err(err) => self.respond(reply, Err(err.into())),
        }
    }

    fn replay_deadline(&self) -> Option<Instant> {
        self.replay.as_ref().map(|replay| replay.resume_at.unwrap_or_else(Instant::now))
    }

    fn finish_replay(&mut self, result: Result<ReplayOutcome, ControllerError>) {
        if let Some(replay) = self.replay.take() {
            self.recorder.finish_replay();

            match &result {
                Ok(ReplayOutcome::Completed { moves }) => self.log.info(format!("Replay finished, {} move(s) sent", moves)),
                Ok(ReplayOutcome::Cancelled { moves }) => self.log.info(format!("Replay cancelled after {} move(s)", moves)),
                Err(_) => {},
            }
            self.respond(replay.reply, result);
        }
    }

    /// A cancelled replay must not leave the last move running. Uses the frame shape the replay was sending.
    async fn stop_after_cancel(&mut self) {
        let powers = self.powers.stopped();
        self.powers = powers;
        if self.connection.state().is_connected() {
            // failures are logged by the dispatcher, the cancel itself already succeeded
            let _ = self.dispatcher.send(self.connection.state(), powers).await;
        }
    }

    /// Processes exactly one action so commands and link events are observed between actions.
    async fn advance_replay(&mut self) {
        let step = {
            let Some(replay) = self.replay.as_mut() else { return };
            replay.resume_at = None;

            match replay.cursor.next() {
                None => ReplayStep::Done(Ok(ReplayOutcome::Completed { moves: replay.moves })),
                Some(RecordedAction::Wait { seconds }) => {
                    replay.resume_at = Some(Instant::now() + Duration::from_secs_f64(seconds));
                    ReplayStep::Continue
                },
                Some(RecordedAction::Move { m1, m2, m3, m4 }) => {
                    let powers = apply4(&TuningProfile::neutral(), [m1, m2, m3, m4]);

                    match self.dispatcher.send(self.connection.state(), powers).await {
                        Ok(()) => {
                            replay.moves += 1;
                            self.powers = powers;
                            ReplayStep::Continue
                        },
                        Err(DispatchError::NotConnected | DispatchError::NotAuthorized) => {
                            ReplayStep::Done(Err(ReplayError::DisconnectedMidReplay.into()))
                        },
                        Err(DispatchError::TransportFailure { .. }) => {
                            // transient, the health check decides whether the link is gone
                            debug!("Write failed during replay pass {}, continuing", replay.cursor.pass() + 1);
                            ReplayStep::Continue
                        },
                    }
                },
            }
        };

        if let ReplayStep::Done(result) = step {
            self.finish_replay(result);
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Attempt { generation, event } => self.connection.on_attempt_event(generation, event).await,
            LinkEvent::AuthResponse { accepted } => self.connection.on_auth_response(accepted).await,
            LinkEvent::LinkLost => self.connection.on_link_lost().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestConnectOrDisconnect(reply) => {
                self.connection.request_connect_or_disconnect().await;
                self.respond(reply, Ok(()));
            },
            Command::Disconnect(reply) => {
                self.connection.disconnect().await;
                self.respond(reply, Ok(()));
            },
            Command::AcknowledgeError(reply) => {
                self.connection.acknowledge_error();
                self.respond(reply, Ok(()));
            },
            Command::SelectDevice { device_id, reply } => {
                let result = self.connection.select_device(&device_id).await.map_err(ControllerError::from);
                self.respond(reply, result);
            },
            Command::SendCredential { secret, reply } => {
                let result = self.connection.send_credential(&secret).await.map_err(ControllerError::from);
                self.respond(reply, result);
            },
            Command::SetJoystick { axis_x, axis_y, reply } => {
                let result = self.set_joystick(axis_x, axis_y).await;
                self.respond(reply, result);
            },
            Command::ReleaseJoystick(reply) => {
                let result = self.release_joystick().await;
                self.respond(reply, result);
            },
            Command::SetSpeedLimit { percent, reply } => {
                let result = check_speed(percent)
                    .map(|percent| self.speed = percent)
                    .map_err(ControllerError::from);
                self.respond(reply, result);
            },
            Command::CurrentPowers(reply) => {
                self.respond(reply, Ok(self.powers));
            },
            Command::SetTuningProfile { profile, reply } => {
                let result = profile.validate().map_err(ControllerError::from);
                if result.is_ok() {
                    self.profile = profile;
                    self.log.info(format!("Tuning profile updated: {:?}", profile));
                }
                self.respond(reply, result);
            },
            Command::TuningProfile(reply) => {
                self.respond(reply, Ok(self.profile));
            },
            Command::SendRawChannels { m, reply } => {
                let result = self.send_raw_channels(m).await;
                self.respond(reply, result);
            },
            Command::SendRawPair { left, right, reply } => {
                let result = self.send_raw_pair(left, right).await;
                self.respond(reply, result);
            },
            Command::StartRecording(reply) => {
                let result = self.recorder.start()
                    .map(|started| if started { self.log.info("Recording started") })
                    .map_err(ControllerError::from);
                self.respond(reply, result);
            },
            Command::StopRecording(reply) => {
                if let Some(len) = self.recorder.stop() {
                    self.log.info(format!("Recording stopped, {} action(s)", len));
                }
                self.respond(reply, Ok(()));
            },
            Command::RecordMove { m, reply } => {
                let result = self.record_move(m);
                self.respond(reply, result);
            },
            Command::RecordWait { seconds, reply } => {
                let result = self.recorder.record_wait(seconds).map_err(ControllerError::from);
                self.respond(reply, result);
            },
            Command::ReplayTrack { times, reply } => {
                self.begin_replay(times, reply);
            },
            Command::CancelReplay(reply) => {
                let running = match self.replay.as_ref() {
                    Some(replay) => {
                        let moves = replay.moves;
                        self.finish_replay(Ok(ReplayOutcome::Cancelled { moves }));
                        self.stop_after_cancel().await;
                        true
                    },
                    None => false,
                };
                self.respond(reply, Ok(running));
            },
            Command::RecorderStatus(reply) => {
                self.respond(reply, Ok(self.recorder.status()));
            },
            Command::RecordedTrack(reply) => {
                self.respond(reply, Ok(self.recorder.track()));
            },
        }
    }

    async fn run(mut self, cancel: CancellationToken, mut commands: Receiver<Command>, mut link_events: Receiver<LinkEvent>) {
        let mut health = interval(self.config.timeouts.health_check());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'mainloop: loop {
            let was_connected = self.connection.state().is_connected();
            let was_link_up = self.connection.state().is_link_up();

            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                command = commands.next() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All controller handles dropped");
                        break 'mainloop;
                    },
                },
                Some(event) = link_events.next() => {
                    self.handle_link_event(event).await;
                },
                _ = until(self.replay_deadline()) => {
                    self.advance_replay().await;
                },
                _ = until(self.connection.auth_deadline()) => {
                    self.connection.on_auth_timeout().await;
                },
                _ = health.tick() => {
                    let failures = self.dispatcher.consecutive_failures();
                    self.connection.check_health(failures).await;
                },
            }

            let state = self.connection.state();
            if !was_link_up && state.is_link_up() {
                self.dispatcher.reset_failures();
            }
            if was_connected && !state.is_connected() {
                self.powers = self.stopped_powers();
                self.finish_replay(Err(ReplayError::DisconnectedMidReplay.into()));
            }
        }

        // pending replay callers see `Stopped` when the reply channel is dropped
        self.replay = None;
        self.recorder.finish_replay();
        self.connection.shutdown().await;
        info!("Controller stopped");
    }
}

/// Spawns the controller and the telemetry sink. Both stop when `cancel` is cancelled.
pub fn controller_task(
    cancel: CancellationToken,
    config: Config,
    transport: Arc<dyn Transport>,
    inbound: Receiver<TransportEvent>,
) -> (ControllerHandle, JoinHandle<()>) {
    let log = EventLog::new(config.log_capacity);
    let (command_tx, command_rx) = channel::<Command>(COMMAND_CAPACITY);
    let (link_tx, link_rx) = channel::<LinkEvent>(LINK_EVENT_CAPACITY);
    let (telemetry_tx, telemetry_rx) = watch::channel(TelemetrySnapshot::default());

    let sink_cancel = cancel.child_token();
    let sink_handle = telemetry_sink_task(sink_cancel.clone(), inbound, link_tx.clone(), telemetry_tx, log.clone());

    let connection = ConnectionMachine::new(config.clone(), transport.clone(), link_tx, log.clone(), cancel.clone());
    let states = connection.subscribe();

    let controller = Controller {
        dispatcher: Dispatcher::new(transport, log.clone(), config.timeouts.write()),
        powers: config.chassis.widen(ChannelPowers::pair(0, 0)),
        config,
        log: log.clone(),
        connection,
        recorder: Recorder::new(),
        replay: None,
        profile: TuningProfile::default(),
        speed: SPEED_MAX,
    };

    let handle = spawn(async move {
        controller.run(cancel, command_rx, link_rx).await;

        sink_cancel.cancel();
        if let Err(err) = sink_handle.await {
            warn!("Failed to join telemetry sink task: {:?}", err);
        }
    });

    (ControllerHandle::new(command_tx, states, telemetry_rx, log), handle)
}
