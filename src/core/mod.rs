//! Core session logic for the Elderband agent.
//!
//! This module contains:
//! - Window management and vitals aggregation
//! - The blood-pressure predictor seam
//! - Hysteretic escalation counters
//! - Patient identity caching
//! - Per-device sessions and the pure message step

pub mod escalation;
pub mod features;
pub mod identity;
pub mod predictor;
pub mod session;
pub mod windowing;

// Re-export commonly used types
pub use escalation::{
    CounterDecay, EscalationDecision, EscalationKind, EscalationPolicy, EscalationTracker, Priority,
};
pub use features::{compute_vitals, WindowVitals};
pub use identity::{DeviceIdentityCache, IdentitySlot, PatientIdentity, Sex, DEFAULT_AGE};
pub use predictor::{LinearSbpModel, PredictionError, Predictor, NEUTRAL_SBP};
pub use session::{DeviceSession, Effect, SessionPhase, SessionSettings, SessionStore, StepOutcome};
pub use windowing::{AggregationWindow, PredictionResult, WindowAggregator};
