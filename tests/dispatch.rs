mod common;

use common::Rig;
use robocar_remote::config::types::{ChassisMode, Config};
use robocar_remote::control::tuning::TuningProfile;
use robocar_remote::error::{ControllerError, DispatchError, TuningError};
use robocar_remote::event_log::LogCategory;
use robocar_remote::protocol::packet::{encode_car_packet, encode_drive_packet, hex};
use robocar_remote::protocol::types::ChannelPowers;

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_does_no_io() {
    let rig = Rig::new();

    let result = rig.handle.set_joystick(0, 50).await;
    assert_eq!(result, Err(ControllerError::Dispatch { source: DispatchError::NotConnected }));
    let result = rig.handle.send_raw_channels(10, 10, 10, 10).await;
    assert_eq!(result, Err(ControllerError::Dispatch { source: DispatchError::NotConnected }));

    assert!(rig.vehicle.sent_frames().is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn joystick_sends_car_packet() {
    let rig = Rig::connected().await;

    let powers = rig.handle.set_joystick(20, 50).await.unwrap();
    assert_eq!(powers, ChannelPowers::Pair { left: 70, right: 30 });
    assert_eq!(rig.handle.current_powers().await.unwrap(), powers);

    let frames = rig.vehicle.command_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].bytes, encode_car_packet(70, 30).to_vec());

    let expected = hex(&frames[0].bytes);
    assert!(rig.handle.log_entries().iter().any(|entry| entry.category == LogCategory::Tx && entry.message == expected));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn four_channel_chassis_widens_joystick() {
    let rig = Rig::with_config(Config { chassis: ChassisMode::FourChannel, ..Config::default() });
    rig.connect().await;

    let powers = rig.handle.set_joystick(0, 40).await.unwrap();
    assert_eq!(powers, ChannelPowers::Quad([40, 40, 40, 40]));
    assert_eq!(rig.vehicle.command_frames()[0].bytes, encode_drive_packet(40, 40, 40, 40).to_vec());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn speed_limit_scales_axes() {
    let rig = Rig::connected().await;
    rig.handle.set_speed_limit(50).await.unwrap();

    let powers = rig.handle.set_joystick(0, 100).await.unwrap();
    assert_eq!(powers, ChannelPowers::Pair { left: 50, right: 50 });

    let result = rig.handle.set_speed_limit(5).await;
    assert_eq!(result, Err(ControllerError::Tuning { source: TuningError::SpeedOutOfRange(5) }));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn out_of_range_input_is_rejected() {
    let rig = Rig::connected().await;

    let result = rig.handle.set_joystick(101, 0).await;
    assert_eq!(result, Err(ControllerError::Tuning { source: TuningError::InputOutOfRange(101) }));
    let result = rig.handle.send_raw_channels(0, 0, -120, 0).await;
    assert_eq!(result, Err(ControllerError::Tuning { source: TuningError::InputOutOfRange(-120) }));

    assert!(rig.vehicle.command_frames().is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tuning_profile_applies_to_raw_channels() {
    let rig = Rig::connected().await;
    let profile = TuningProfile { invert_r: true, trim: 20, ..TuningProfile::neutral() };
    rig.handle.set_tuning_profile(profile).await.unwrap();
    assert_eq!(rig.handle.tuning_profile().await.unwrap(), profile);

    let powers = rig.handle.send_raw_channels(50, 50, 50, 50).await.unwrap();
    assert_eq!(powers, ChannelPowers::Quad([50, -40, 50, -40]));

    let invalid = TuningProfile { trim: 90, ..TuningProfile::neutral() };
    let result = rig.handle.set_tuning_profile(invalid).await;
    assert_eq!(result, Err(ControllerError::Tuning { source: TuningError::TrimOutOfRange(90) }));
    assert_eq!(rig.handle.tuning_profile().await.unwrap(), profile);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn release_stops_the_vehicle() {
    let rig = Rig::connected().await;
    rig.handle.set_joystick(0, 80).await.unwrap();

    let powers = rig.handle.release_joystick().await.unwrap();
    assert_eq!(powers, ChannelPowers::Pair { left: 0, right: 0 });
    let frames = rig.vehicle.command_frames();
    assert_eq!(frames.last().map(|frame| frame.bytes.clone()), Some(encode_car_packet(0, 0).to_vec()));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn release_while_disconnected_only_resets_locally() {
    let rig = Rig::new();

    let powers = rig.handle.release_joystick().await.unwrap();
    assert_eq!(powers, ChannelPowers::Pair { left: 0, right: 0 });
    assert!(rig.vehicle.sent_frames().is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn raw_pair_sends_car_packet_with_per_side_tuning() {
    let rig = Rig::with_config(Config { chassis: ChassisMode::FourChannel, ..Config::default() });
    rig.connect().await;
    let profile = TuningProfile { invert_l: true, trim: -20, ..TuningProfile::neutral() };
    rig.handle.set_tuning_profile(profile).await.unwrap();

    // no mixing and no widening, even on a four channel chassis
    let powers = rig.handle.send_raw_pair(50, 50).await.unwrap();
    assert_eq!(powers, ChannelPowers::Pair { left: -40, right: 50 });
    assert_eq!(rig.vehicle.command_frames()[0].bytes, encode_car_packet(-40, 50).to_vec());

    let result = rig.handle.send_raw_pair(0, 150).await;
    assert_eq!(result, Err(ControllerError::Tuning { source: TuningError::InputOutOfRange(150) }));
    assert_eq!(rig.vehicle.command_frames().len(), 1);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn raw_pair_requires_connection() {
    let rig = Rig::new();

    let result = rig.handle.send_raw_pair(10, 10).await;
    assert_eq!(result, Err(ControllerError::Dispatch { source: DispatchError::NotConnected }));
    assert!(rig.vehicle.sent_frames().is_empty());
    rig.shutdown().await;
}
