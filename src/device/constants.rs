use uuid::Uuid;

/**
 * How often (milliseconds) to poll the transport for discovered devices while scanning.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) a scan may run without finding a vehicle.
 */
pub const SCAN_TIMEOUT: u64 = 15000;

/**
 * How long (milliseconds) establishing the link to a selected vehicle may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) the vehicle has to accept a credential once the link is up.
 */
pub const AUTH_TIMEOUT: u64 = 10000;

/**
 * How long (milliseconds) a write to the characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to check if the link is still up.
 */
pub const HEALTH_CHECK_INTERVAL: u64 = 1000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * Consecutive failed writes after which the link is considered unusable.
 */
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

/**
 * The UUID of the UART-style BLE service exposed by the vehicle (HM-10 compatible modules).
 */
pub const VEHICLE_SERVICE: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/**
 * The UUID of the characteristic used for both command writes and telemetry notifications.
 */
pub const VEHICLE_DATA_CHARACTERISTIC: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

pub fn make_vehicle_service_uuid() -> Uuid {
    Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb)
}

pub fn make_vehicle_data_uuid() -> Uuid {
    Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_their_string_form() {
        assert_eq!(make_vehicle_service_uuid().to_string(), VEHICLE_SERVICE);
        assert_eq!(make_vehicle_data_uuid().to_string(), VEHICLE_DATA_CHARACTERISTIC);
    }
}
