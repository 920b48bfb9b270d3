use crate::error::{CredentialError, DecodeError};
use crate::protocol::types::{ChannelPowers, InboundFrame, TelemetrySnapshot};

pub const CAR_PACKET_TAG: u8 = 0x01;
pub const DRIVE_PACKET_TAG: u8 = 0x02;
pub const CREDENTIAL_TAG: u8 = 0x03;
pub const AUTH_RESPONSE_TAG: u8 = 0xA5;
pub const AUTH_ACCEPTED: u8 = 0x01;

pub const CAR_PACKET_LEN: usize = 3;
pub const DRIVE_PACKET_LEN: usize = 5;
pub const AUTH_RESPONSE_LEN: usize = 2;

/**
 * Four little-endian i16 readings.
 */
pub const TELEMETRY_FRAME_LEN: usize = 8;

/**
 * The credential has to fit in a single write with the default ATT MTU (20 byte payload),
 * minus the tag byte and one spare byte.
 */
pub const MAX_CREDENTIAL_LEN: usize = 18;

// last-resort clamp; the tuning transform already keeps values in [-100, 100]
fn channel_byte(value: i32) -> u8 {
    value.clamp(i8::MIN as i32, i8::MAX as i32) as i8 as u8
}

pub fn encode_car_packet(left: i32, right: i32) -> [u8; CAR_PACKET_LEN] {
    [CAR_PACKET_TAG, channel_byte(left), channel_byte(right)]
}

pub fn encode_drive_packet(m1: i32, m2: i32, m3: i32, m4: i32) -> [u8; DRIVE_PACKET_LEN] {
    [DRIVE_PACKET_TAG, channel_byte(m1), channel_byte(m2), channel_byte(m3), channel_byte(m4)]
}

pub fn encode_powers(powers: &ChannelPowers) -> Vec<u8> {
    match *powers {
        ChannelPowers::Pair { left, right } => encode_car_packet(left, right).to_vec(),
        ChannelPowers::Quad([m1, m2, m3, m4]) => encode_drive_packet(m1, m2, m3, m4).to_vec(),
    }
}

pub fn encode_credential(secret: &str) -> Result<Vec<u8>, CredentialError> {
    let bytes = secret.as_bytes();
    if bytes.is_empty() {
        return Err(CredentialError::Empty);
    }
    if bytes.len() > MAX_CREDENTIAL_LEN {
        return Err(CredentialError::TooLong { len: bytes.len(), max: MAX_CREDENTIAL_LEN });
    }

    let mut frame = Vec::with_capacity(bytes.len() + 1);
    frame.push(CREDENTIAL_TAG);
    frame.extend_from_slice(bytes);
    Ok(frame)
}

pub fn encode_auth_response(accepted: bool) -> [u8; AUTH_RESPONSE_LEN] {
    [AUTH_RESPONSE_TAG, if accepted { AUTH_ACCEPTED } else { 0x00 }]
}

pub fn encode_telemetry(snapshot: &TelemetrySnapshot) -> [u8; TELEMETRY_FRAME_LEN] {
    let mut frame = [0u8; TELEMETRY_FRAME_LEN];
    for (i, value) in [snapshot.p1, snapshot.p2, snapshot.p3, snapshot.p4].iter().enumerate() {
        frame[i * 2..i * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    frame
}

pub fn decode_telemetry(bytes: &[u8]) -> Result<TelemetrySnapshot, DecodeError> {
    if bytes.len() != TELEMETRY_FRAME_LEN {
        return Err(DecodeError::Malformed { expected: TELEMETRY_FRAME_LEN, actual: bytes.len() });
    }

    let reading = |i: usize| i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
    Ok(TelemetrySnapshot {
        p1: reading(0),
        p2: reading(1),
        p3: reading(2),
        p4: reading(3),
    })
}

pub fn decode_inbound(bytes: &[u8]) -> Result<InboundFrame, DecodeError> {
    if bytes.len() == AUTH_RESPONSE_LEN && bytes[0] == AUTH_RESPONSE_TAG {
        return Ok(InboundFrame::AuthResponse { accepted: bytes[1] == AUTH_ACCEPTED });
    }

    decode_telemetry(bytes).map(InboundFrame::Telemetry)
}

/// Upper case hex, space separated; used for the tx/rx log entries.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
