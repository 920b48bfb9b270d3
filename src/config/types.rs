use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{AUTH_TIMEOUT, CONNECT_TIMEOUT, HEALTH_CHECK_INTERVAL, SCAN_TIMEOUT, WRITE_DEADLINE};
use crate::protocol::types::ChannelPowers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChassisMode {
    TwoChannel,
    FourChannel,
}

impl ChassisMode {
    /// Joystick output is a pair; a four motor chassis drives m1/m3 from the left and m2/m4 from the right.
    pub fn widen(&self, powers: ChannelPowers) -> ChannelPowers {
        match (self, powers) {
            (ChassisMode::FourChannel, ChannelPowers::Pair { left, right }) => ChannelPowers::Quad([left, right, left, right]),
            (_, powers) => powers,
        }
    }
}

/// All values in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub scan: u64,
    pub connect: u64,
    pub auth: u64,
    pub write: u64,
    pub health_check: u64,
}

impl Timeouts {
    pub fn scan(&self) -> Duration {
        Duration::from_millis(self.scan)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect)
    }

    pub fn auth(&self) -> Duration {
        Duration::from_millis(self.auth)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check.max(1))
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            scan: SCAN_TIMEOUT,
            connect: CONNECT_TIMEOUT,
            auth: AUTH_TIMEOUT,
            write: WRITE_DEADLINE,
            health_check: HEALTH_CHECK_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    // connect to the first matching vehicle instead of waiting for a selection
    pub auto_connect: bool,
    pub device_name_filter: Option<String>,
    pub require_credential: bool,
    pub chassis: ChassisMode,
    pub timeouts: Timeouts,
    pub log_capacity: usize,
}

impl Config {
    pub fn matches_device_name(&self, name: Option<&str>) -> bool {
        match (&self.device_name_filter, name) {
            (None, _) => true,
            (Some(filter), Some(name)) => name.to_lowercase().contains(&filter.to_lowercase()),
            (Some(_), None) => false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auto_connect: true,
            device_name_filter: None,
            require_credential: false,
            chassis: ChassisMode::TwoChannel,
            timeouts: Timeouts::default(),
            log_capacity: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"requireCredential": true, "timeouts": {"auth": 500}}"#).unwrap();
        assert!(config.require_credential);
        assert!(config.auto_connect);
        assert_eq!(config.timeouts.auth, 500);
        assert_eq!(config.timeouts.scan, SCAN_TIMEOUT);
        assert_eq!(config.chassis, ChassisMode::TwoChannel);
    }

    #[test]
    fn chassis_mode_from_json() {
        let config: Config = serde_json::from_str(r#"{"chassis": "FourChannel"}"#).unwrap();
        assert_eq!(config.chassis, ChassisMode::FourChannel);
    }

    #[test]
    fn device_name_filter_is_case_insensitive() {
        let config = Config { device_name_filter: Some("robo".into()), ..Config::default() };
        assert!(config.matches_device_name(Some("RoboCar-7")));
        assert!(!config.matches_device_name(Some("Headphones")));
        assert!(!config.matches_device_name(None));
        assert!(Config::default().matches_device_name(None));
    }

    #[test]
    fn widen_pair_for_four_channels() {
        assert_eq!(
            ChassisMode::FourChannel.widen(ChannelPowers::pair(30, -20)),
            ChannelPowers::Quad([30, -20, 30, -20])
        );
        assert_eq!(ChassisMode::TwoChannel.widen(ChannelPowers::pair(30, -20)), ChannelPowers::pair(30, -20));
    }
}
