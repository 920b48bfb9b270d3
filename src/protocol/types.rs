use serde::{Deserialize, Serialize};

/**
 * Lowest and highest semantic channel power, in percent.
 */
pub const POWER_MIN: i32 = -100;
pub const POWER_MAX: i32 = 100;

/// Output of the tuning transform; every value lies in [POWER_MIN, POWER_MAX].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPowers {
    Pair { left: i32, right: i32 },
    Quad([i32; 4]),
}

impl ChannelPowers {
    pub fn pair(left: i32, right: i32) -> Self {
        ChannelPowers::Pair { left: clamp_power(left), right: clamp_power(right) }
    }

    pub fn quad(m: [i32; 4]) -> Self {
        ChannelPowers::Quad(m.map(clamp_power))
    }

    pub fn stopped(&self) -> Self {
        match self {
            ChannelPowers::Pair { .. } => ChannelPowers::Pair { left: 0, right: 0 },
            ChannelPowers::Quad(_) => ChannelPowers::Quad([0; 4]),
        }
    }
}

impl Default for ChannelPowers {
    fn default() -> Self {
        ChannelPowers::Pair { left: 0, right: 0 }
    }
}

pub fn clamp_power(value: i32) -> i32 {
    value.clamp(POWER_MIN, POWER_MAX)
}

/// Latest four sensor readings pushed by the vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub p1: i16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
}

/// A frame received from the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    Telemetry(TelemetrySnapshot),
    AuthResponse { accepted: bool },
}
