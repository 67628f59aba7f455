//! Per-device session state and the pure message step.
//!
//! [`SessionStore::apply`] folds one validated sample into its device's
//! session and returns the side effects to perform. It does no I/O, which
//! keeps every counter and window transition deterministic and testable.

use crate::backend::HealthRecord;
use crate::collector::types::SensorSample;
use crate::core::escalation::{EscalationKind, EscalationPolicy, EscalationTracker};
use crate::core::identity::{IdentitySlot, DEFAULT_AGE};
use crate::core::predictor::Predictor;
use crate::core::windowing::{AggregationWindow, PredictionResult, WindowAggregator, DEFAULT_WINDOW_CAPACITY};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session-wide tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub window_capacity: usize,
    pub policy: EscalationPolicy,
    pub default_age: u32,
    /// Minimum spacing between lazy identity lookups for unresolved sessions
    pub identity_retry: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            policy: EscalationPolicy::default(),
            default_age: DEFAULT_AGE,
            identity_retry: Duration::seconds(30),
        }
    }
}

/// Identity lifecycle of a session. Aggregation and escalation run in every
/// phase; the phase only decides whether actuation has a real number to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No lookup attempted yet
    Idle,
    /// Lookup attempted, no contact number obtained yet
    Resolving,
    /// Contact number known
    Active,
}

/// Durable state for one device.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    device_id: String,
    window: AggregationWindow,
    escalation: EscalationTracker,
    identity: IdentitySlot,
}

impl DeviceSession {
    pub fn new(device_id: impl Into<String>, settings: &SessionSettings) -> Self {
        Self {
            device_id: device_id.into(),
            window: AggregationWindow::new(settings.window_capacity),
            escalation: EscalationTracker::new(),
            identity: IdentitySlot::new(settings.default_age),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn window(&self) -> &AggregationWindow {
        &self.window
    }

    pub fn escalation(&self) -> &EscalationTracker {
        &self.escalation
    }

    pub fn identity(&self) -> &IdentitySlot {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut IdentitySlot {
        &mut self.identity
    }

    pub fn phase(&self) -> SessionPhase {
        if self.identity.is_resolved() {
            SessionPhase::Active
        } else if self.identity.last_attempt().is_some() {
            SessionPhase::Resolving
        } else {
            SessionPhase::Idle
        }
    }
}

/// Vitals of the sample that crossed an escalation threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationTrigger {
    pub device_id: String,
    pub kind: EscalationKind,
    pub sample: SensorSample,
}

/// Side effect requested by a session step.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch the patient identity for this device
    ResolveIdentity { device_id: String },
    /// Send an aggregation result to the record store
    Report(HealthRecord),
    /// Resolve a phone number, dispatch the actuation and report the event
    Escalate(EscalationTrigger),
}

/// Result of one step, kept for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub prediction: Option<PredictionResult>,
    pub escalation: Option<EscalationKind>,
    pub effects: Vec<Effect>,
}

/// All sessions, keyed by device id.
#[derive(Debug, Default)]
pub struct SessionStore {
    settings: SessionSettings,
    sessions: HashMap<String, DeviceSession>,
}

impl SessionStore {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            sessions: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceSession> {
        self.sessions.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(device_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fold `sample` into its session, creating the session on first sight.
    pub fn apply(&mut self, sample: SensorSample, predictor: &dyn Predictor) -> StepOutcome {
        let now = sample.received_at;
        let settings = self.settings;
        let session = self
            .sessions
            .entry(sample.device_id.clone())
            .or_insert_with(|| {
                tracing::info!(device = %sample.device_id, "new device session");
                DeviceSession::new(sample.device_id.clone(), &settings)
            });

        let mut effects = Vec::new();
        let escalation = session.escalation.update(&sample.flags, &settings.policy);

        // An escalating step forces its own lookup.
        if escalation.is_none()
            && sample.has_identity()
            && session.identity.lookup_due(now, settings.identity_retry)
        {
            // Marked here so a slow lookup is not re-requested by the next message.
            session.identity.mark_attempt(now);
            effects.push(Effect::ResolveIdentity {
                device_id: sample.device_id.clone(),
            });
        }

        let age = session.identity.identity().age;
        let prediction = WindowAggregator::new(predictor).ingest(&mut session.window, sample.clone(), age);

        if let Some(ref result) = prediction {
            effects.push(Effect::Report(aggregate_record(&sample.device_id, result)));
        }

        if let Some(kind) = escalation {
            effects.push(Effect::Escalate(EscalationTrigger {
                device_id: sample.device_id.clone(),
                kind,
                sample,
            }));
        }

        StepOutcome {
            prediction,
            escalation,
            effects,
        }
    }
}

/// Record-store payload for a completed window.
pub fn aggregate_record(device_id: &str, result: &PredictionResult) -> HealthRecord {
    HealthRecord {
        device_id: device_id.to_string(),
        heart_rate: result.vitals.mean_heart_rate.round() as u32,
        spo2: result.vitals.mean_spo2.round() as u32,
        body_temp: round2(result.vitals.mean_temperature),
        fall_detected: result.vitals.fall_detected,
        blood_pressure: Some(format!("{:.2}", result.predicted_sbp)),
        event: None,
        dispatched: None,
    }
}

/// Record-store payload for an escalation event.
pub fn escalation_record(trigger: &EscalationTrigger, dispatched: bool) -> HealthRecord {
    HealthRecord {
        device_id: trigger.device_id.clone(),
        heart_rate: trigger.sample.heart_rate,
        spo2: trigger.sample.spo2,
        body_temp: round2(trigger.sample.temperature),
        fall_detected: trigger.sample.flags.fall,
        blood_pressure: None,
        event: Some(trigger.kind),
        dispatched: Some(dispatched),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{SampleFlags, UNKNOWN_DEVICE_ID};
    use crate::core::predictor::LinearSbpModel;
    use chrono::Utc;

    fn sample(device: &str, hr: u32, emergency: bool) -> SensorSample {
        SensorSample {
            device_id: device.to_string(),
            heart_rate: hr,
            spo2: 97,
            temperature: 36.7,
            flags: SampleFlags {
                emergency,
                ..SampleFlags::default()
            },
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_message_requests_identity_once() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        let first = store.apply(sample("D1", 70, false), &model);
        assert_eq!(
            first.effects,
            vec![Effect::ResolveIdentity {
                device_id: "D1".to_string()
            }]
        );
        assert_eq!(store.get("D1").unwrap().phase(), SessionPhase::Resolving);

        let second = store.apply(sample("D1", 70, false), &model);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn test_escalating_first_message_skips_lazy_lookup() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        let mut press = sample("D1", 70, false);
        press.flags.manual_call = true;
        let outcome = store.apply(press, &model);

        assert_eq!(outcome.escalation, Some(EscalationKind::Call));
        assert_eq!(outcome.effects.len(), 1);
        assert!(matches!(outcome.effects[0], Effect::Escalate(_)));
        assert_eq!(store.get("D1").unwrap().phase(), SessionPhase::Idle);

        let next = store.apply(sample("D1", 70, false), &model);
        assert_eq!(
            next.effects,
            vec![Effect::ResolveIdentity {
                device_id: "D1".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_device_never_requests_identity() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        let outcome = store.apply(sample(UNKNOWN_DEVICE_ID, 70, false), &model);
        assert!(outcome.effects.is_empty());
        assert_eq!(store.get(UNKNOWN_DEVICE_ID).unwrap().phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_sessions_are_independent() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        for _ in 0..4 {
            store.apply(sample("A", 60, true), &model);
        }
        for _ in 0..2 {
            store.apply(sample("B", 90, true), &model);
        }

        let a = store.get("A").unwrap();
        let b = store.get("B").unwrap();
        assert_eq!(a.window().len(), 4);
        assert_eq!(b.window().len(), 2);
        assert_eq!(a.escalation().emergency_count(), 1);
        assert_eq!(b.escalation().emergency_count(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_full_window_emits_report() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        let outcomes: Vec<StepOutcome> = [60, 70, 80, 90, 100]
            .iter()
            .map(|&hr| store.apply(sample("D1", hr, false), &model))
            .collect();

        assert!(outcomes[..4].iter().all(|o| o.prediction.is_none()));
        let last = &outcomes[4];
        let report = last
            .effects
            .iter()
            .find_map(|e| match e {
                Effect::Report(r) => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(report.heart_rate, 80);
        assert!(report.blood_pressure.is_some());
        assert!(store.get("D1").unwrap().window().is_empty());
    }

    #[test]
    fn test_escalation_effect_carries_trigger_sample() {
        let model = LinearSbpModel::default();
        let mut store = SessionStore::new(SessionSettings::default());

        store.apply(sample("D1", 150, true), &model);
        store.apply(sample("D1", 150, true), &model);
        let outcome = store.apply(sample("D1", 151, true), &model);

        assert_eq!(outcome.escalation, Some(EscalationKind::Emergency));
        let trigger = outcome
            .effects
            .iter()
            .find_map(|e| match e {
                Effect::Escalate(t) => Some(t),
                _ => None,
            })
            .unwrap();
        assert_eq!(trigger.sample.heart_rate, 151);

        let record = escalation_record(trigger, false);
        assert_eq!(record.event, Some(EscalationKind::Emergency));
        assert_eq!(record.dispatched, Some(false));
    }
}
