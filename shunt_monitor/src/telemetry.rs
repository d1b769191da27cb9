//! Telemetry record broadcast once per poll, and its fixed wire layout.
//!
//! Frame layout, little-endian, 69 bytes:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0  | 4  | message id (i32) |
//! | 4  | 1  | data changed (0/1) |
//! | 5  | 20 | voltage, current, power, SOC, capacity (f32 each) |
//! | 25 | 4  | battery state (i32) |
//! | 29 | 40 | run-flat text, NUL padded |

use crate::error::FrameError;
use crate::run_flat::{RunFlatText, RUN_FLAT_TEXT_LEN};

pub const TEXT_FIELD_LEN: usize = RUN_FLAT_TEXT_LEN + 1;
pub const FRAME_LEN: usize = 4 + 1 + 5 * 4 + 4 + TEXT_FIELD_LEN;

const STATE_OFFSET: usize = 25;
const TEXT_OFFSET: usize = 29;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum BatteryStatus {
    Normal = 0,
    /// Will be flat within the warning threshold
    Warning = 1,
    /// Load disconnected by protection
    Critical = 2,
    /// Sensor reading saturated
    Overflow = 3,
}

impl BatteryStatus {
    /// Overflow outranks a disconnect, which outranks a run-flat warning
    pub fn classify(overflow: bool, disconnected: bool, warning: bool) -> Self {
        if overflow {
            BatteryStatus::Overflow
        } else if disconnected {
            BatteryStatus::Critical
        } else if warning {
            BatteryStatus::Warning
        } else {
            BatteryStatus::Normal
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(BatteryStatus::Normal),
            1 => Some(BatteryStatus::Warning),
            2 => Some(BatteryStatus::Critical),
            3 => Some(BatteryStatus::Overflow),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub message_id: i32,
    pub data_changed: bool,
    /// Bus voltage (V)
    pub battery_voltage: f32,
    /// Calibrated current (A), positive when discharging
    pub battery_current: f32,
    /// W
    pub battery_power: f32,
    /// 0..1
    pub battery_soc: f32,
    /// Remaining Ah
    pub battery_capacity: f32,
    pub battery_state: BatteryStatus,
    pub run_flat_time: RunFlatText,
}

impl TelemetryRecord {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0..4].copy_from_slice(&self.message_id.to_le_bytes());
        frame[4] = self.data_changed as u8;
        let floats = [
            self.battery_voltage,
            self.battery_current,
            self.battery_power,
            self.battery_soc,
            self.battery_capacity,
        ];
        for (index, value) in floats.iter().enumerate() {
            let offset = 5 + index * 4;
            frame[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        frame[STATE_OFFSET..TEXT_OFFSET].copy_from_slice(&(self.battery_state as i32).to_le_bytes());
        let text = self.run_flat_time.as_bytes();
        frame[TEXT_OFFSET..TEXT_OFFSET + text.len()].copy_from_slice(text);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() != FRAME_LEN {
            return Err(FrameError::Length {
                expected: FRAME_LEN,
                actual: frame.len(),
            });
        }
        let state = i32::from_le_bytes(field(frame, STATE_OFFSET)?);
        let battery_state = BatteryStatus::from_i32(state).ok_or(FrameError::UnknownState(state))?;

        let text_field: [u8; TEXT_FIELD_LEN] = field(frame, TEXT_OFFSET)?;
        let text_len = text_field
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(FrameError::InvalidText)?;
        let text = core::str::from_utf8(&text_field[..text_len]).map_err(|_| FrameError::InvalidText)?;

        Ok(TelemetryRecord {
            message_id: i32::from_le_bytes(field(frame, 0)?),
            data_changed: frame[4] != 0,
            battery_voltage: f32::from_le_bytes(field(frame, 5)?),
            battery_current: f32::from_le_bytes(field(frame, 9)?),
            battery_power: f32::from_le_bytes(field(frame, 13)?),
            battery_soc: f32::from_le_bytes(field(frame, 17)?),
            battery_capacity: f32::from_le_bytes(field(frame, 21)?),
            battery_state,
            run_flat_time: RunFlatText::try_from(text).map_err(|_| FrameError::InvalidText)?,
        })
    }
}

fn field<const N: usize>(frame: &[u8], offset: usize) -> Result<[u8; N], FrameError> {
    frame
        .get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(FrameError::Length {
            expected: offset + N,
            actual: frame.len(),
        })
}

#[cfg(test)]
mod test {
    use crate::error::FrameError;
    use crate::run_flat::RunFlatText;
    use crate::telemetry::{BatteryStatus, TelemetryRecord, FRAME_LEN};

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            message_id: 1,
            data_changed: true,
            battery_voltage: 12.8,
            battery_current: 4.25,
            battery_power: 54.4,
            battery_soc: 0.5,
            battery_capacity: 50.0,
            battery_state: BatteryStatus::Warning,
            run_flat_time: RunFlatText::try_from("11 hours until flat").unwrap(),
        }
    }

    #[test]
    fn frame_is_69_bytes() {
        assert_eq!(FRAME_LEN, 69);
    }

    #[test]
    fn fields_are_little_endian_at_fixed_offsets() {
        let frame = record().encode();
        assert_eq!(&frame[0..4], &[1, 0, 0, 0]);
        assert_eq!(frame[4], 1);
        assert_eq!(&frame[5..9], &12.8f32.to_le_bytes());
        assert_eq!(&frame[25..29], &[1, 0, 0, 0]);
        assert_eq!(&frame[29..48], b"11 hours until flat");
        assert!(frame[48..].iter().all(|byte| *byte == 0));
    }

    #[test]
    fn decode_restores_the_record() {
        assert_eq!(TelemetryRecord::decode(&record().encode()), Ok(record()));
    }

    #[test]
    fn longest_text_keeps_terminator() {
        let mut long = record();
        long.run_flat_time = RunFlatText::try_from("123456789012345678901234567890123456789").unwrap();
        let frame = long.encode();
        assert_eq!(frame[FRAME_LEN - 1], 0);
        assert_eq!(TelemetryRecord::decode(&frame), Ok(long));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let frame = record().encode();
        assert_eq!(
            TelemetryRecord::decode(&frame[..60]),
            Err(FrameError::Length {
                expected: 69,
                actual: 60
            })
        );

        let mut bad_state = frame;
        bad_state[25] = 9;
        assert_eq!(
            TelemetryRecord::decode(&bad_state),
            Err(FrameError::UnknownState(9))
        );

        let mut unterminated = frame;
        unterminated[29..].fill(b'x');
        assert_eq!(
            TelemetryRecord::decode(&unterminated),
            Err(FrameError::InvalidText)
        );
    }

    #[test]
    fn status_precedence() {
        assert_eq!(BatteryStatus::classify(true, true, true), BatteryStatus::Overflow);
        assert_eq!(BatteryStatus::classify(false, true, true), BatteryStatus::Critical);
        assert_eq!(BatteryStatus::classify(false, false, true), BatteryStatus::Warning);
        assert_eq!(BatteryStatus::classify(false, false, false), BatteryStatus::Normal);
    }
}
