//! Versioned binary sidecar format for `meta_<handle>` (spec §9, §6):
//! magic `"V0"`, `queued_time` as little-endian `f64`, a 1-byte optional
//! tag, and `last_attempt` as little-endian `f64` when tagged present.

use crate::error::MixFatalError;

const MAGIC: &[u8; 2] = b"V0";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryState {
    pub queued_time: f64,
    pub last_attempt: Option<f64>,
}

impl DeliveryState {
    pub fn new(queued_time: f64) -> Self {
        Self {
            queued_time,
            last_attempt: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(19);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.queued_time.to_le_bytes());
        match self.last_attempt {
            None => buf.push(0),
            Some(t) => {
                buf.push(1);
                buf.extend_from_slice(&t.to_le_bytes());
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8], handle: &str) -> Result<Self, MixFatalError> {
        let fatal = || MixFatalError::UnrecognizedMetadataFormat {
            handle: handle.to_string(),
        };
        if bytes.len() < 11 || &bytes[0..2] != MAGIC {
            return Err(fatal());
        }
        let queued_time = f64::from_le_bytes(bytes[2..10].try_into().unwrap());
        let last_attempt = match bytes[10] {
            0 => None,
            1 => {
                if bytes.len() < 19 {
                    return Err(fatal());
                }
                Some(f64::from_le_bytes(bytes[11..19].try_into().unwrap()))
            }
            _ => return Err(fatal()),
        };
        Ok(Self {
            queued_time,
            last_attempt,
        })
    }
}

/// Derive the next scheduled attempt (spec §4.6): `None` if unset means
/// "try now"; otherwise the smallest `queued_time + prefix-sum(schedule)`
/// strictly greater than `last_attempt`, or `None` if no such prefix sum
/// exists.
pub fn next_attempt(state: &DeliveryState, schedule: &[f64], now: f64) -> Option<f64> {
    match state.last_attempt {
        None => Some(now),
        Some(last) => {
            let mut sum = 0.0;
            for &interval in schedule {
                sum += interval;
                let candidate = state.queued_time + sum;
                if candidate > last {
                    return Some(candidate);
                }
            }
            None
        }
    }
}
