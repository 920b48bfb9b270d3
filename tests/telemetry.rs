mod common;

use common::{eventually, Rig};
use robocar_remote::event_log::LogCategory;
use robocar_remote::protocol::types::TelemetrySnapshot;

#[tokio::test(start_paused = true)]
async fn latest_snapshot_wins() {
    let rig = Rig::connected().await;
    let mut updates = rig.handle.telemetry_updates();

    let first = TelemetrySnapshot { p1: 1, p2: -2, p3: 300, p4: -32768 };
    let second = TelemetrySnapshot { p1: 5, p2: 6, p3: 7, p4: 32767 };
    rig.vehicle.push_telemetry(first);
    rig.vehicle.push_telemetry(second);

    updates.wait_for(|snapshot| *snapshot == second).await.unwrap();
    assert_eq!(rig.handle.latest_telemetry(), second);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_keeps_previous_snapshot() {
    let rig = Rig::connected().await;
    let mut updates = rig.handle.telemetry_updates();

    let good = TelemetrySnapshot { p1: 10, p2: 20, p3: 30, p4: 40 };
    rig.vehicle.push_telemetry(good);
    updates.wait_for(|snapshot| *snapshot == good).await.unwrap();

    rig.vehicle.push_raw(vec![0x01, 0x02, 0x03]);
    let handle = rig.handle.clone();
    eventually(|| handle.log_entries().iter().any(|entry| entry.category == LogCategory::Warn)).await;

    assert_eq!(rig.handle.latest_telemetry(), good);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn log_can_be_cleared() {
    let rig = Rig::connected().await;
    assert!(!rig.handle.log_entries().is_empty());

    rig.handle.clear_log();
    assert!(rig.handle.log_entries().is_empty());
    rig.shutdown().await;
}
