//! Elderband Agent - streaming vital-sign processor for wearable telemetry.
//!
//! The agent consumes telemetry published by wrist-worn bands, aggregates
//! it per device into fixed-size windows, estimates systolic blood pressure,
//! and turns sustained emergency signals or a call-button press into a call
//! placed through an attached GSM peripheral. A remote record store is kept
//! informed of every aggregate and escalation.
//!
//! # Guarantees
//!
//! - **Per-device isolation**: each device has its own window, counters and
//!   cached identity; one device's traffic never affects another's
//! - **One command per crossing**: a crossed threshold resets its counter
//!   whether or not the call goes through
//! - **Never stalls**: identity lookups, actuation and reporting are bounded
//!   by timeouts and their failures are absorbed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Elderband Agent                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌──────────────────────────┐    │
//! │  │   MQTT    │──▶│ Validator │──▶│      SessionStore         │    │
//! │  │ collector │   │           │   │ window · escalation · id  │    │
//! │  └───────────┘   └───────────┘   └──────────────────────────┘    │
//! │        ▲                                   │ effects              │
//! │        │                                   ▼                      │
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐   │
//! │  │ Reminder  │   │ Identity  │   │ Actuation │   │  Backend  │   │
//! │  │ scheduler │   │   cache   │   │ dispatcher│   │ reporter  │   │
//! │  └───────────┘   └───────────┘   └───────────┘   └───────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use elderband_agent::core::{LinearSbpModel, SessionSettings, SessionStore};
//! use elderband_agent::collector::validate;
//!
//! let mut store = SessionStore::new(SessionSettings::default());
//! let model = LinearSbpModel::default();
//!
//! let sample = validate(br#"{"deviceId":"D1","heartRate":72}"#, chrono::Utc::now())
//!     .expect("valid payload");
//! let outcome = store.apply(sample, &model);
//! println!("{} effects", outcome.effects.len());
//! ```

pub mod actuator;
pub mod backend;
pub mod collector;
pub mod config;
pub mod core;
pub mod processor;
pub mod reminder;
pub mod reporting;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use actuator::{ActuationCommand, ActuationDispatcher, ActuationError, Peripheral, SerialPeripheral};
pub use backend::{BackendClient, BackendConfig, BackendError, HealthRecord, PatientRecord};
pub use collector::{SensorSample, ValidationError};
pub use config::{Config, ConfigError};
pub use core::{EscalationDecision, EscalationKind, LinearSbpModel, Predictor, SessionSettings, SessionStore};
pub use processor::{MessageOutcome, SessionProcessor};
pub use reminder::{ReminderSchedule, ReminderScheduler, ReminderSlot};
pub use reporting::BackendReporter;
pub use stats::{ProcessorStats, SharedProcessorStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
