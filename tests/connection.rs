mod common;

use tokio::time::{sleep, Duration};

use common::{device, Rig, VEHICLE_ID};
use robocar_remote::config::types::Config;
use robocar_remote::device::types::{ConnectStage, ConnectionState};
use robocar_remote::error::{ConnectionError, ControllerError, CredentialError, DispatchError};
use robocar_remote::sim::vehicle::SimVehicle;

fn credential_config() -> Config {
    Config { require_credential: true, ..Config::default() }
}

fn credential_rig(secret: &str) -> Rig {
    let (vehicle, inbound) = SimVehicle::single("Robocar");
    Rig::start(credential_config(), vehicle.with_credential(secret), inbound)
}

fn awaiting_credential(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Connecting { stage: ConnectStage::AwaitingCredential, .. })
}

#[tokio::test(start_paused = true)]
async fn auto_connects_to_first_vehicle() {
    let rig = Rig::new();
    rig.connect().await;

    assert_eq!(rig.handle.connection_state(), ConnectionState::Connected {
        device_id: VEHICLE_ID.to_string(),
        device_name: "Robocar".to_string(),
    });
    assert!(rig.vehicle.is_link_up());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn quick_double_toggle_cancels_the_scan() {
    let (vehicle, inbound) = SimVehicle::new(Vec::new());
    let rig = Rig::start(Config::default(), vehicle, inbound);

    rig.handle.request_connect_or_disconnect().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    rig.handle.request_connect_or_disconnect().await.unwrap();
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);

    // well past the scan timeout, a stale attempt must not revive the state
    sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);
    assert_eq!(rig.vehicle.scan_starts(), 1);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn toggle_while_connected_disconnects() {
    let rig = Rig::connected().await;

    rig.handle.request_connect_or_disconnect().await.unwrap();
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);
    assert!(!rig.vehicle.is_link_up());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_connect_times_out() {
    let rig = Rig::new();
    rig.vehicle.set_connect_delay(Duration::from_secs(60));

    rig.handle.request_connect_or_disconnect().await.unwrap();
    let state = rig.wait_for(|state| matches!(state, ConnectionState::Error { .. })).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::ConnectTimeout });
    assert!(!rig.vehicle.is_link_up());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn toggle_while_connecting_cancels_the_connect() {
    let rig = Rig::new();
    rig.vehicle.set_connect_delay(Duration::from_secs(5));

    rig.handle.request_connect_or_disconnect().await.unwrap();
    rig.wait_for(|state| matches!(state, ConnectionState::Connecting { .. })).await;

    rig.handle.request_connect_or_disconnect().await.unwrap();
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);
    assert!(!rig.vehicle.is_link_up());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scan_times_out_without_vehicles() {
    let (vehicle, inbound) = SimVehicle::new(Vec::new());
    let rig = Rig::start(Config::default(), vehicle, inbound);

    rig.handle.request_connect_or_disconnect().await.unwrap();
    let state = rig.wait_for(|state| matches!(state, ConnectionState::Error { .. })).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::ScanTimeout });

    rig.handle.acknowledge_error().await.unwrap();
    assert_eq!(rig.handle.connection_state(), ConnectionState::Disconnected);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_device_selection() {
    let (vehicle, inbound) = SimVehicle::new(vec![device("sim-a", "Robocar A"), device("sim-b", "Robocar B")]);
    let rig = Rig::start(Config { auto_connect: false, ..Config::default() }, vehicle, inbound);

    rig.handle.request_connect_or_disconnect().await.unwrap();
    let state = rig.wait_for(|state| matches!(state, ConnectionState::Scanning { found } if !found.is_empty())).await;
    assert_eq!(state, ConnectionState::Scanning { found: vec![device("sim-a", "Robocar A"), device("sim-b", "Robocar B")] });

    let unknown = rig.handle.select_device("sim-c").await;
    assert_eq!(unknown, Err(ControllerError::Connection {
        source: ConnectionError::UnknownDevice { device_id: "sim-c".to_string() },
    }));

    // manual selection keeps scanning past the scan timeout once something was found
    sleep(Duration::from_secs(20)).await;
    assert!(matches!(rig.handle.connection_state(), ConnectionState::Scanning { .. }));

    rig.handle.select_device("sim-b").await.unwrap();
    let state = rig.wait_for(ConnectionState::is_connected).await;
    assert_eq!(state, ConnectionState::Connected { device_id: "sim-b".to_string(), device_name: "Robocar B".to_string() });
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn select_requires_scanning() {
    let rig = Rig::new();
    let result = rig.handle.select_device(VEHICLE_ID).await;
    assert_eq!(result, Err(ControllerError::Connection { source: ConnectionError::NotScanning }));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn accepted_credential_connects() {
    let rig = credential_rig("1234");
    rig.handle.request_connect_or_disconnect().await.unwrap();
    rig.wait_for(awaiting_credential).await;

    let result = rig.handle.set_joystick(0, 50).await;
    assert_eq!(result, Err(ControllerError::Dispatch { source: DispatchError::NotAuthorized }));

    rig.handle.send_credential("1234").await.unwrap();
    rig.wait_for(ConnectionState::is_connected).await;

    rig.handle.set_joystick(0, 50).await.unwrap();
    assert_eq!(rig.vehicle.command_frames().len(), 1);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_fails() {
    let rig = credential_rig("1234");
    rig.handle.request_connect_or_disconnect().await.unwrap();
    rig.wait_for(awaiting_credential).await;

    rig.handle.send_credential("4321").await.unwrap();
    let state = rig.wait_for(|state| matches!(state, ConnectionState::Error { .. })).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::AuthRejected });
    assert!(!rig.vehicle.is_link_up());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_credential_times_out() {
    let rig = credential_rig("1234");
    rig.vehicle.set_answer_credentials(false);
    rig.handle.request_connect_or_disconnect().await.unwrap();
    rig.wait_for(awaiting_credential).await;

    rig.handle.send_credential("1234").await.unwrap();
    let state = rig.wait_for(|state| matches!(state, ConnectionState::Error { .. })).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::AuthTimeout });
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn credential_checks() {
    let rig = credential_rig("1234");

    let result = rig.handle.send_credential("1234").await;
    assert_eq!(result, Err(ControllerError::Credential { source: CredentialError::NotAwaitingCredential }));

    rig.handle.request_connect_or_disconnect().await.unwrap();
    rig.wait_for(awaiting_credential).await;

    let result = rig.handle.send_credential("").await;
    assert_eq!(result, Err(ControllerError::Credential { source: CredentialError::Empty }));
    let result = rig.handle.send_credential("x".repeat(19)).await;
    assert_eq!(result, Err(ControllerError::Credential { source: CredentialError::TooLong { len: 19, max: 18 } }));
    assert!(rig.vehicle.sent_frames().is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn link_loss_while_connected() {
    let rig = Rig::connected().await;
    rig.vehicle.drop_link();

    let state = rig.wait_for(|state| !state.is_connected()).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::LinkLost });
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sustained_write_failures_end_the_link() {
    let rig = Rig::connected().await;
    rig.vehicle.set_fail_writes(true);

    for _ in 0..3 {
        let result = rig.handle.set_joystick(0, 30).await;
        assert!(matches!(result, Err(ControllerError::Dispatch { source: DispatchError::TransportFailure { .. } })));
    }

    let state = rig.wait_for(|state| !state.is_connected()).await;
    assert_eq!(state, ConnectionState::Error { reason: ConnectionError::TransportUnhealthy { failures: 3 } });
    rig.shutdown().await;
}
