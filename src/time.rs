//! Sensing time handling.
//!
//! Packet annotations carry times as days since 2000-01-01 plus seconds and
//! microseconds of the day. Detector readouts are further offset by the
//! broadcast counter (1/16 s ticks) and a state dependent readout delay.
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bytes::Bytes;
use crate::error::DecodeError;

/// Broadcast counter ticks per second.
pub const BCPS_PER_SECOND: f64 = 16.0;

/// Time as stored in packet annotations; days are relative to 2000-01-01T00:00:00Z.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensingTime {
    pub days: i32,
    pub seconds: u32,
    pub micros: u32,
}

impl SensingTime {
    pub const LEN: usize = 12;

    /// # Errors
    /// [`DecodeError::NotEnoughData`] if fewer than [`SensingTime::LEN`] bytes remain.
    pub fn decode(bytes: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(SensingTime {
            days: bytes.i32()?,
            seconds: bytes.u32()?,
            micros: bytes.u32()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.days.to_be_bytes());
        out.extend_from_slice(&self.seconds.to_be_bytes());
        out.extend_from_slice(&self.micros.to_be_bytes());
    }

    /// True for the all-zero time written by the ground segment when the time
    /// was not available.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.days == 0 && self.seconds == 0 && self.micros == 0
    }

    /// Seconds since the start of the day including the fractional part.
    #[must_use]
    pub fn seconds_of_day(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.micros) / 1e6
    }

    /// Convert to UTC. Returns `None` if the result is not representable.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single()?;
        epoch
            .checked_add_signed(Duration::days(i64::from(self.days)))?
            .checked_add_signed(Duration::seconds(i64::from(self.seconds)))?
            .checked_add_signed(Duration::microseconds(i64::from(self.micros)))
    }
}

/// Readout delay of a state in 1/256 s units.
///
/// States with long integration sequences read out later than the default.
#[must_use]
pub fn readout_delay(state_id: u8) -> u16 {
    match state_id {
        59 | 69 => 111,
        61 | 70 => 303,
        _ => 86,
    }
}

/// Offset in seconds of a detector readout relative to the packet's sensing time.
#[must_use]
pub fn readout_offset(state_id: u8, bcps: u16) -> f64 {
    f64::from(readout_delay(state_id)) / 256.0 + f64::from(bcps) / BCPS_PER_SECOND
}

/// UTC time of a detector readout.
#[must_use]
pub fn readout_time(sensing: &SensingTime, state_id: u8, bcps: u16) -> Option<DateTime<Utc>> {
    let base = sensing.to_datetime()?;
    #[allow(clippy::cast_possible_truncation)]
    let micros = (readout_offset(state_id, bcps) * 1e6).round() as i64;
    base.checked_add_signed(Duration::microseconds(micros))
}

/// Replace unset days with the value of the nearest preceding record, or the
/// following one for leading records.
///
/// Returns the number of repaired records.
pub fn repair_unset_days(times: &mut [SensingTime]) -> usize {
    let mut repaired = 0;
    let Some(first_valid) = times.iter().position(|t| t.days != 0) else {
        return 0;
    };
    let mut last = times[first_valid].days;
    for t in times.iter_mut() {
        if t.days == 0 {
            t.days = last;
            repaired += 1;
        } else {
            last = t.days;
        }
    }
    repaired
}
