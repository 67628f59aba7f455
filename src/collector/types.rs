//! Typed telemetry samples produced by the validation boundary.
//!
//! Everything downstream of [`crate::collector::validate`] consumes only these
//! types, never raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device id used when a payload carries no usable identity.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Heart rate substituted when a payload omits it (beats/min).
pub const NEUTRAL_HEART_RATE: u32 = 70;

/// SpO2 substituted when a payload omits it (percent).
pub const NEUTRAL_SPO2: u32 = 98;

/// Body temperature substituted when a payload omits it (°C).
pub const NEUTRAL_TEMPERATURE: f64 = 36.5;

/// Boolean flags carried by a single reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags {
    /// Fall detected by the wearable
    pub fall: bool,
    /// Wearable-side emergency heuristic fired
    pub emergency: bool,
    /// Manual call button pressed
    pub manual_call: bool,
    /// Medication reminder acknowledged / active on the device
    pub medication_ack: bool,
}

/// One validated reading from a wearable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Device identifier (or [`UNKNOWN_DEVICE_ID`])
    pub device_id: String,
    /// Heart rate in beats per minute
    pub heart_rate: u32,
    /// Blood-oxygen saturation in percent
    pub spo2: u32,
    /// Body temperature in °C
    pub temperature: f64,
    /// Event flags
    pub flags: SampleFlags,
    /// When the processor received the payload
    pub received_at: DateTime<Utc>,
}

impl SensorSample {
    /// Whether this sample carries a real device identity.
    pub fn has_identity(&self) -> bool {
        self.device_id != UNKNOWN_DEVICE_ID
    }
}
