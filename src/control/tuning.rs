use serde::{Deserialize, Serialize};

use crate::error::TuningError;
use crate::protocol::types::{clamp_power, ChannelPowers, POWER_MAX, POWER_MIN};

pub const TRIM_MIN: i32 = -50;
pub const TRIM_MAX: i32 = 50;
pub const TURN_SENSITIVITY_MIN: i32 = 10;
pub const TURN_SENSITIVITY_MAX: i32 = 100;
pub const SPEED_MIN: i32 = 10;
pub const SPEED_MAX: i32 = 100;

/// User correction parameters for the chassis. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningProfile {
    pub invert_l: bool,
    pub invert_r: bool,
    pub trim: i32,
    pub turn_sensitivity: i32,
}

impl TuningProfile {
    /// No inversion, no trim and full turn sensitivity: `apply4` only clamps.
    pub fn neutral() -> Self {
        TuningProfile {
            invert_l: false,
            invert_r: false,
            trim: 0,
            turn_sensitivity: TURN_SENSITIVITY_MAX,
        }
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        if !(TRIM_MIN..=TRIM_MAX).contains(&self.trim) {
            return Err(TuningError::TrimOutOfRange(self.trim));
        }
        if !(TURN_SENSITIVITY_MIN..=TURN_SENSITIVITY_MAX).contains(&self.turn_sensitivity) {
            return Err(TuningError::TurnSensitivityOutOfRange(self.turn_sensitivity));
        }
        Ok(())
    }
}

impl Default for TuningProfile {
    fn default() -> Self {
        TuningProfile::neutral()
    }
}

/// Rejects axis and channel inputs outside [-100, 100].
pub fn check_input(value: i32) -> Result<i32, TuningError> {
    if (POWER_MIN..=POWER_MAX).contains(&value) {
        Ok(value)
    } else {
        Err(TuningError::InputOutOfRange(value))
    }
}

pub fn check_speed(percent: i32) -> Result<i32, TuningError> {
    if (SPEED_MIN..=SPEED_MAX).contains(&percent) {
        Ok(percent)
    } else {
        Err(TuningError::SpeedOutOfRange(percent))
    }
}

pub fn scale_by_speed(axis: i32, speed: i32) -> i32 {
    axis * speed / 100
}

fn invert_if(value: i32, invert: bool) -> i32 {
    if invert { -value } else { value }
}

/// Joystick path: forward/turn mixing, trim, inversion, then the clamp.
pub fn apply(profile: &TuningProfile, axis_x: i32, axis_y: i32) -> ChannelPowers {
    let turn = axis_x * profile.turn_sensitivity / 100;

    let left = axis_y + turn + profile.trim;
    let right = axis_y - turn - profile.trim;

    let left = invert_if(left, profile.invert_l);
    let right = invert_if(right, profile.invert_r);

    ChannelPowers::Pair { left: clamp_power(left), right: clamp_power(right) }
}

fn tune_side(profile: &TuningProfile, value: i32, left_side: bool) -> i32 {
    // trim scales the opposite side down instead of adding an offset, so a stopped channel stays stopped
    let (factor, invert) = if left_side {
        (100 + profile.trim.min(0), profile.invert_l)
    } else {
        (100 - profile.trim.max(0), profile.invert_r)
    };

    clamp_power(invert_if(value * factor / 100, invert))
}

/// Direct-channel path. m1 and m3 drive the left side, m2 and m4 the right side.
pub fn apply4(profile: &TuningProfile, m: [i32; 4]) -> ChannelPowers {
    let mut out = [0; 4];
    for (i, value) in m.iter().enumerate() {
        out[i] = tune_side(profile, *value, i % 2 == 0);
    }

    ChannelPowers::Quad(out)
}

/// Direct-channel path for a two motor chassis, no mixing.
pub fn apply2(profile: &TuningProfile, left: i32, right: i32) -> ChannelPowers {
    ChannelPowers::Pair {
        left: tune_side(profile, left, true),
        right: tune_side(profile, right, false),
    }
}
