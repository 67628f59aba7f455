//! Session processor: runs the pure session step and executes its effects.
//!
//! Messages are handled one at a time. Every collaborator call is bounded by
//! a timeout and every failure is absorbed here, so nothing a single message
//! does can stop the consumer loop or disturb another device's session.
//!
//! Lazy identity lookups run on background tasks. Their results are applied
//! at the start of a later step, or awaited by an escalation on the same
//! device, which then skips its own forced lookup.

use crate::actuator::{ActuationDispatcher, DispatchOutcome, Peripheral};
use crate::backend::{BackendError, IdentitySource, RecordStore};
use crate::collector::types::SensorSample;
use crate::collector::validate::validate;
use crate::core::escalation::{EscalationDecision, EscalationKind};
use crate::core::identity::{DeviceIdentityCache, PendingLookup};
use crate::core::predictor::Predictor;
use crate::core::session::{escalation_record, Effect, EscalationTrigger, SessionStore};
use crate::core::windowing::PredictionResult;
use crate::reporting::BackendReporter;
use crate::stats::SharedProcessorStats;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What one message led to.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    pub device_id: String,
    pub prediction: Option<PredictionResult>,
    pub escalation: Option<EscalationKind>,
    pub dispatch: Option<DispatchOutcome>,
}

/// Owns every device session and the collaborators that act on them.
pub struct SessionProcessor<S, R, P> {
    sessions: SessionStore,
    predictor: Box<dyn Predictor>,
    identities: DeviceIdentityCache<S>,
    lookups: HashMap<String, PendingLookup>,
    dispatcher: ActuationDispatcher<P>,
    reporter: BackendReporter<R>,
    stats: SharedProcessorStats,
}

impl<S, R, P> SessionProcessor<S, R, P>
where
    S: IdentitySource,
    R: RecordStore,
    P: Peripheral,
{
    pub fn new(
        sessions: SessionStore,
        predictor: Box<dyn Predictor>,
        identities: DeviceIdentityCache<S>,
        dispatcher: ActuationDispatcher<P>,
        reporter: BackendReporter<R>,
        stats: SharedProcessorStats,
    ) -> Self {
        Self {
            sessions,
            predictor,
            identities,
            lookups: HashMap::new(),
            dispatcher,
            reporter,
            stats,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> &SharedProcessorStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &ActuationDispatcher<P> {
        &self.dispatcher
    }

    /// Number of identity lookups still running in the background.
    pub fn pending_lookups(&self) -> usize {
        self.lookups.values().filter(|h| !h.is_finished()).count()
    }

    /// Validate a raw payload and process it. Malformed payloads are logged,
    /// counted and dropped.
    pub async fn handle_payload(&mut self, payload: &[u8]) -> Option<MessageOutcome> {
        self.stats.record_message_received();

        match validate(payload, Utc::now()) {
            Ok(sample) => Some(self.handle_sample(sample).await),
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "dropping malformed message");
                self.stats.record_message_dropped();
                None
            }
        }
    }

    /// Process one validated sample to completion.
    pub async fn handle_sample(&mut self, sample: SensorSample) -> MessageOutcome {
        let now = sample.received_at;
        let device_id = sample.device_id.clone();

        self.settle_finished_lookups(now).await;
        let step = self.sessions.apply(sample, self.predictor.as_ref());

        if let Some(ref prediction) = step.prediction {
            self.stats.record_window_completed();
            if prediction.defaulted {
                self.stats.record_prediction_defaulted();
            }
            tracing::info!(
                device = %device_id,
                heart_rate = prediction.vitals.mean_heart_rate,
                spo2 = prediction.vitals.mean_spo2,
                temperature = prediction.vitals.mean_temperature,
                sbp = prediction.predicted_sbp,
                fall = prediction.vitals.fall_detected,
                "window aggregated"
            );
        }

        let mut dispatch = None;
        for effect in step.effects {
            match effect {
                Effect::ResolveIdentity { device_id } => self.start_lookup(device_id),
                Effect::Report(record) => self.reporter.report(record),
                Effect::Escalate(trigger) => dispatch = Some(self.escalate(trigger, now).await),
            }
        }

        MessageOutcome {
            device_id,
            prediction: step.prediction,
            escalation: step.escalation,
            dispatch,
        }
    }

    fn start_lookup(&mut self, device_id: String) {
        if self.lookups.contains_key(&device_id) {
            return;
        }
        tracing::debug!(device = %device_id, "starting identity lookup");
        let handle = self.identities.spawn_lookup(&device_id);
        self.lookups.insert(device_id, handle);
    }

    async fn settle_finished_lookups(&mut self, now: DateTime<Utc>) {
        let finished: Vec<String> = self
            .lookups
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(device_id, _)| device_id.clone())
            .collect();

        for device_id in finished {
            if let Some(handle) = self.lookups.remove(&device_id) {
                self.settle_lookup(&device_id, handle, now).await;
            }
        }
    }

    async fn settle_lookup(&mut self, device_id: &str, handle: PendingLookup, now: DateTime<Utc>) {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(BackendError::Network(format!("lookup task failed: {e}"))),
        };

        let Some(session) = self.sessions.get_mut(device_id) else {
            return;
        };
        if session.identity_mut().settle(device_id, result, now).is_some() {
            self.stats.record_identity_lookup_failed();
        }
    }

    async fn escalate(&mut self, trigger: EscalationTrigger, now: DateTime<Utc>) -> DispatchOutcome {
        match trigger.kind {
            EscalationKind::Emergency => self.stats.record_emergency_triggered(),
            EscalationKind::Call => self.stats.record_call_triggered(),
        }
        tracing::warn!(device = %trigger.device_id, kind = %trigger.kind, "escalation triggered");

        // A lookup already in flight counts as this escalation's fresh attempt.
        let awaited = match self.lookups.remove(&trigger.device_id) {
            Some(handle) => {
                self.settle_lookup(&trigger.device_id, handle, now).await;
                true
            }
            None => false,
        };

        let identity = match self.sessions.get_mut(&trigger.device_id) {
            Some(session) if session.identity().is_resolved() => session.identity().identity().clone(),
            Some(session) if trigger.sample.has_identity() && !awaited => {
                let (identity, error) = self
                    .identities
                    .resolve(&trigger.device_id, session.identity_mut(), true, now)
                    .await;
                if error.is_some() {
                    self.stats.record_identity_lookup_failed();
                }
                identity
            }
            Some(session) => session.identity().identity().clone(),
            None => Default::default(),
        };

        let decision = EscalationDecision::for_identity(trigger.kind, &identity);
        let outcome = self.dispatcher.dispatch(&trigger.device_id, &decision).await;
        if outcome.is_sent() {
            self.stats.record_dispatch_sent();
        } else {
            self.stats.record_dispatch_failed();
        }

        self.reporter
            .report(escalation_record(&trigger, outcome.is_sent()));
        outcome
    }

    /// Wait for outstanding identity lookups and reports. Returns how many
    /// reports were delivered.
    pub async fn flush(&mut self) -> usize {
        let now = Utc::now();
        let pending: Vec<(String, PendingLookup)> = self.lookups.drain().collect();
        for (device_id, handle) in pending {
            self.settle_lookup(&device_id, handle, now).await;
        }
        self.reporter.flush().await
    }

    /// Abandon identity lookups, drain pending reports and release the
    /// peripheral.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.lookups.drain() {
            handle.abort();
        }

        let delivered = self.reporter.flush().await;
        tracing::info!(delivered, "pending reports flushed");

        if let Some(mut peripheral) = self.dispatcher.take_peripheral() {
            peripheral.close();
        }
    }
}
