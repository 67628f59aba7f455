//! Inbound side of the agent.
//!
//! This module turns broker traffic into validated [`SensorSample`]s and
//! carries the outbound reminder publisher that shares the broker client.

pub mod mqtt;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use mqtt::{classify, connect, subscribe_data, BrokerEvent, MqttPublisher};
pub use types::{SampleFlags, SensorSample, UNKNOWN_DEVICE_ID};
pub use validate::{validate, ValidationError};
