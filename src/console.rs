use std::str::FromStr;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::control::handle::ControllerHandle;
use crate::control::tuning::TuningProfile;
use crate::device::types::ConnectionState;
use crate::error::{AppRunError, CommandParseError};

const HELP: &str = "\
connect                     scan and connect, or cancel/disconnect
disconnect                  drop the link
ack                         acknowledge an error
select <device id>          pick a vehicle found by the scan
password <secret>           send the credential
joy <x> <y>                 drive with the joystick, axes in -100..100
release                     stop driving
speed <10..100>             speed limit in percent
tune <invL 0|1> <invR 0|1> <trim> <turn>
raw <m1> <m2> <m3> <m4>     send channel powers directly
pair <left> <right>         send a car packet directly
rec start|stop              record a track
move <m1> <m2> <m3> <m4>    append a move to the track
wait <seconds>              append a wait to the track
replay [times]              replay the track
cancel                      cancel the replay
status                      connection, recorder and powers
telemetry                   latest telemetry
log                         diagnostic log
clear-log                   clear the diagnostic log
quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Connect,
    Disconnect,
    Ack,
    Select { device_id: String },
    Password { secret: String },
    Joy { axis_x: i32, axis_y: i32 },
    Release,
    Speed { percent: i32 },
    Tune { profile: TuningProfile },
    Raw { m: [i32; 4] },
    Pair { left: i32, right: i32 },
    RecordStart,
    RecordStop,
    Move { m: [i32; 4] },
    Wait { seconds: f64 },
    Replay { times: u32 },
    Cancel,
    Status,
    Telemetry,
    Log,
    ClearLog,
    Quit,
}

fn number<T: FromStr>(value: &str) -> Result<T, CommandParseError> {
    value.parse().map_err(|_| CommandParseError::InvalidNumber { value: value.to_string() })
}

fn flag(value: &str) -> Result<bool, CommandParseError> {
    match value {
        "0" | "false" | "off" => Ok(false),
        "1" | "true" | "on" => Ok(true),
        _ => Err(CommandParseError::InvalidNumber { value: value.to_string() }),
    }
}

fn channels(args: &[&str], usage: &'static str) -> Result<[i32; 4], CommandParseError> {
    match args {
        [m1, m2, m3, m4] => Ok([number(m1)?, number(m2)?, number(m3)?, number(m4)?]),
        _ => Err(CommandParseError::Usage { usage }),
    }
}

/// Parses one console line. Returns `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, CommandParseError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = words.split_first() else {
        return Ok(None);
    };

    let parsed = match (command, args) {
        ("help" | "?", []) => ConsoleCommand::Help,
        ("connect", []) => ConsoleCommand::Connect,
        ("disconnect", []) => ConsoleCommand::Disconnect,
        ("ack", []) => ConsoleCommand::Ack,
        ("select", [device_id]) => ConsoleCommand::Select { device_id: device_id.to_string() },
        ("select", _) => return Err(CommandParseError::Usage { usage: "select <device id>" }),
        // secrets may contain spaces
        ("password", [_, ..]) => ConsoleCommand::Password { secret: args.join(" ") },
        ("password", []) => return Err(CommandParseError::Usage { usage: "password <secret>" }),
        ("joy", [x, y]) => ConsoleCommand::Joy { axis_x: number(x)?, axis_y: number(y)? },
        ("joy", _) => return Err(CommandParseError::Usage { usage: "joy <x> <y>" }),
        ("release", []) => ConsoleCommand::Release,
        ("speed", [percent]) => ConsoleCommand::Speed { percent: number(percent)? },
        ("speed", _) => return Err(CommandParseError::Usage { usage: "speed <10..100>" }),
        ("tune", [invert_l, invert_r, trim, turn]) => ConsoleCommand::Tune {
            profile: TuningProfile {
                invert_l: flag(invert_l)?,
                invert_r: flag(invert_r)?,
                trim: number(trim)?,
                turn_sensitivity: number(turn)?,
            },
        },
        ("tune", _) => return Err(CommandParseError::Usage { usage: "tune <invL 0|1> <invR 0|1> <trim> <turn>" }),
        ("raw", _) => ConsoleCommand::Raw { m: channels(args, "raw <m1> <m2> <m3> <m4>")? },
        ("pair", [left, right]) => ConsoleCommand::Pair { left: number(left)?, right: number(right)? },
        ("pair", _) => return Err(CommandParseError::Usage { usage: "pair <left> <right>" }),
        ("rec", ["start"]) => ConsoleCommand::RecordStart,
        ("rec", ["stop"]) => ConsoleCommand::RecordStop,
        ("rec", _) => return Err(CommandParseError::Usage { usage: "rec start|stop" }),
        ("move", _) => ConsoleCommand::Move { m: channels(args, "move <m1> <m2> <m3> <m4>")? },
        ("wait", [seconds]) => ConsoleCommand::Wait { seconds: number(seconds)? },
        ("wait", _) => return Err(CommandParseError::Usage { usage: "wait <seconds>" }),
        ("replay", []) => ConsoleCommand::Replay { times: 1 },
        ("replay", [times]) => ConsoleCommand::Replay { times: number(times)? },
        ("replay", _) => return Err(CommandParseError::Usage { usage: "replay [times]" }),
        ("cancel", []) => ConsoleCommand::Cancel,
        ("status", []) => ConsoleCommand::Status,
        ("telemetry", []) => ConsoleCommand::Telemetry,
        ("log", []) => ConsoleCommand::Log,
        ("clear-log", []) => ConsoleCommand::ClearLog,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => return Err(CommandParseError::UnknownCommand { command: line.trim().to_string() }),
    };

    Ok(Some(parsed))
}

fn describe_state(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Scanning { found } if found.is_empty() => "scanning".to_string(),
        ConnectionState::Scanning { found } => {
            let devices: Vec<String> = found.iter()
                .map(|device| format!("  {} ({})", device.id, device.display_name()))
                .collect();
            format!("scanning, use `select <device id>`:\n{}", devices.join("\n"))
        },
        ConnectionState::Connecting { target_id, stage } => format!("connecting to {} ({:?})", target_id, stage),
        ConnectionState::Connected { device_name, .. } => format!("connected to {}", device_name),
        ConnectionState::Error { reason } => format!("error: {} (use `ack`)", reason),
    }
}

pub enum Flow {
    Continue,
    Quit,
}

/// Runs one command against the controller and prints the result.
pub async fn execute(handle: &ControllerHandle, command: ConsoleCommand) -> Flow {
    let result = match command {
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        },
        ConsoleCommand::Connect => handle.request_connect_or_disconnect().await,
        ConsoleCommand::Disconnect => handle.disconnect().await,
        ConsoleCommand::Ack => handle.acknowledge_error().await,
        ConsoleCommand::Select { device_id } => handle.select_device(device_id).await,
        ConsoleCommand::Password { secret } => handle.send_credential(secret).await,
        ConsoleCommand::Joy { axis_x, axis_y } => handle.set_joystick(axis_x, axis_y).await
            .map(|powers| println!("{:?}", powers)),
        ConsoleCommand::Release => handle.release_joystick().await.map(|_| ()),
        ConsoleCommand::Speed { percent } => handle.set_speed_limit(percent).await,
        ConsoleCommand::Tune { profile } => handle.set_tuning_profile(profile).await,
        ConsoleCommand::Raw { m: [m1, m2, m3, m4] } => handle.send_raw_channels(m1, m2, m3, m4).await
            .map(|powers| println!("{:?}", powers)),
        ConsoleCommand::Pair { left, right } => handle.send_raw_pair(left, right).await
            .map(|powers| println!("{:?}", powers)),
        ConsoleCommand::RecordStart => handle.start_recording().await,
        ConsoleCommand::RecordStop => handle.stop_recording().await,
        ConsoleCommand::Move { m: [m1, m2, m3, m4] } => handle.record_move(m1, m2, m3, m4).await,
        ConsoleCommand::Wait { seconds } => handle.record_wait(seconds).await,
        ConsoleCommand::Replay { times } => {
            // the replay runs in the background so `cancel` can still be typed
            let handle = handle.clone();
            spawn(async move {
                match handle.replay_track(times).await {
                    Ok(outcome) => println!("replay: {:?}", outcome),
                    Err(err) => println!("replay failed: {}", err),
                }
            });
            Ok(())
        },
        ConsoleCommand::Cancel => handle.cancel_replay().await.map(|running| {
            if !running {
                println!("no replay running");
            }
        }),
        ConsoleCommand::Status => {
            println!("connection: {}", describe_state(&handle.connection_state()));
            handle.recorder_status().await
                .map(|status| println!("recorder: {:?}", status))
                .and(handle.current_powers().await)
                .map(|powers| println!("powers: {:?}", powers))
        },
        ConsoleCommand::Telemetry => {
            println!("{:?}", handle.latest_telemetry());
            Ok(())
        },
        ConsoleCommand::Log => {
            for entry in handle.log_entries() {
                println!("[{}] {}", entry.category, entry.message);
            }
            Ok(())
        },
        ConsoleCommand::ClearLog => {
            handle.clear_log();
            Ok(())
        },
        ConsoleCommand::Quit => return Flow::Quit,
    };

    if let Err(err) = result {
        println!("error: {}", err);
    }
    Flow::Continue
}

/// Reads commands from stdin until `quit`, end of input or cancellation.
/// Connection state changes are printed as they happen.
pub async fn run_console(cancel: CancellationToken, handle: ControllerHandle) -> Result<(), AppRunError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = handle.connection_states();
    println!("Type `help` for a list of commands");

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            changed = states.changed() => {
                if changed.is_err() {
                    debug!("Controller stopped publishing state");
                    break 'mainloop;
                }
                let state = states.borrow_and_update().clone();
                println!("* {}", describe_state(&state));
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break 'mainloop;
                };

                match parse_line(&line) {
                    Ok(None) => {},
                    Ok(Some(command)) => {
                        if let Flow::Quit = execute(&handle, command).await {
                            break 'mainloop;
                        }
                    },
                    Err(err) => {
                        warn!("Invalid console input: {:?}", line);
                        println!("{}", err);
                    },
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   \t").unwrap(), None);
    }

    #[test]
    fn parses_driving_commands() {
        assert_eq!(parse("joy -20 80"), ConsoleCommand::Joy { axis_x: -20, axis_y: 80 });
        assert_eq!(parse("  raw 1 2 3 4 "), ConsoleCommand::Raw { m: [1, 2, 3, 4] });
        assert_eq!(parse("pair -40 60"), ConsoleCommand::Pair { left: -40, right: 60 });
        assert_eq!(parse("speed 50"), ConsoleCommand::Speed { percent: 50 });
        assert_eq!(parse("release"), ConsoleCommand::Release);
    }

    #[test]
    fn parses_tuning_profile() {
        assert_eq!(parse("tune 1 off -10 60"), ConsoleCommand::Tune {
            profile: TuningProfile { invert_l: true, invert_r: false, trim: -10, turn_sensitivity: 60 },
        });
    }

    #[test]
    fn parses_recorder_commands() {
        assert_eq!(parse("rec start"), ConsoleCommand::RecordStart);
        assert_eq!(parse("rec stop"), ConsoleCommand::RecordStop);
        assert_eq!(parse("move 10 10 -10 -10"), ConsoleCommand::Move { m: [10, 10, -10, -10] });
        assert_eq!(parse("wait 0.5"), ConsoleCommand::Wait { seconds: 0.5 });
        assert_eq!(parse("replay"), ConsoleCommand::Replay { times: 1 });
        assert_eq!(parse("replay 3"), ConsoleCommand::Replay { times: 3 });
    }

    #[test]
    fn password_keeps_spaces() {
        assert_eq!(parse("password open sesame"), ConsoleCommand::Password { secret: "open sesame".to_string() });
    }

    #[test]
    fn reports_usage_errors() {
        assert_eq!(parse_line("joy 1"), Err(CommandParseError::Usage { usage: "joy <x> <y>" }));
        assert_eq!(parse_line("rec pause"), Err(CommandParseError::Usage { usage: "rec start|stop" }));
        assert_eq!(parse_line("move 1 2 x 4"), Err(CommandParseError::InvalidNumber { value: "x".to_string() }));
        assert_eq!(parse_line("replay -1"), Err(CommandParseError::InvalidNumber { value: "-1".to_string() }));
        assert_eq!(parse_line("fly away"), Err(CommandParseError::UnknownCommand { command: "fly away".to_string() }));
    }
}
