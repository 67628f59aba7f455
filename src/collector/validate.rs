//! Validation boundary turning raw broker payloads into [`SensorSample`]s.
//!
//! Missing fields fall back to clinically neutral values so a partially
//! populated payload still contributes to aggregation. Payloads that are not
//! a well-formed JSON object are rejected.

use crate::collector::types::{
    SampleFlags, SensorSample, NEUTRAL_HEART_RATE, NEUTRAL_SPO2, NEUTRAL_TEMPERATURE,
    UNKNOWN_DEVICE_ID,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Reasons a payload is dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Not decodable as the expected record
    Malformed(String),
    /// Valid JSON, but not an object
    NotAnObject,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Malformed(e) => write!(f, "Malformed payload: {e}"),
            ValidationError::NotAnObject => write!(f, "Payload is not a JSON object"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Wire shape published by the wearable firmware.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    heart_rate: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    spo2: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    fall: Option<bool>,
    #[serde(default)]
    fall_detected: Option<bool>,
    #[serde(default)]
    emergency: Option<bool>,
    #[serde(default)]
    call: Option<bool>,
    #[serde(default)]
    medication_reminder: Option<bool>,
}

/// Accept integral readings sent as floats (`72.0`), rounding to the nearest
/// whole unit. Negative values clamp to zero.
fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|v| v.round().clamp(0.0, u32::MAX as f64) as u32))
}

/// Parse a raw payload received at `received_at`.
pub fn validate(payload: &[u8], received_at: DateTime<Utc>) -> Result<SensorSample, ValidationError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if !value.is_object() {
        return Err(ValidationError::NotAnObject);
    }

    let wire: WireMessage =
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let device_id = wire
        .device_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string());

    let temperature = wire
        .temperature
        .filter(|t| t.is_finite())
        .unwrap_or(NEUTRAL_TEMPERATURE);

    Ok(SensorSample {
        device_id,
        heart_rate: wire.heart_rate.unwrap_or(NEUTRAL_HEART_RATE),
        spo2: wire.spo2.unwrap_or(NEUTRAL_SPO2),
        temperature,
        flags: SampleFlags {
            fall: wire.fall.unwrap_or(false) || wire.fall_detected.unwrap_or(false),
            emergency: wire.emergency.unwrap_or(false),
            manual_call: wire.call.unwrap_or(false),
            medication_ack: wire.medication_reminder.unwrap_or(false),
        },
        received_at,
    })
}
