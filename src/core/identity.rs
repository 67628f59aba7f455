//! Patient identity resolution with per-session caching.
//!
//! A session starts with default demographics and no contact numbers. The
//! cache fetches the real record lazily; a failed lookup degrades to the
//! defaults and leaves the session unresolved so a later message can retry.
//! Once a contact number is known the identity is not fetched again unless an
//! escalation explicitly forces it.

use crate::backend::{BackendError, IdentitySource, PatientRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Lookup running on its own task. The fetch is already bounded by the
/// cache timeout, so awaiting the handle is bounded too.
pub type PendingLookup = JoinHandle<Result<PatientRecord, BackendError>>;

/// Age assumed until the record store says otherwise.
pub const DEFAULT_AGE: u32 = 30;

/// Patient sex as reported by the record store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Sex {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "male" | "m" | "1" => Sex::Male,
            "female" | "f" | "0" => Sex::Female,
            _ => Sex::Unspecified,
        }
    }
}

/// Demographics and contact numbers for one monitored patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentity {
    pub age: u32,
    pub sex: Sex,
    pub emergency_contact_phone: Option<String>,
    pub doctor_phone: Option<String>,
}

impl Default for PatientIdentity {
    fn default() -> Self {
        Self {
            age: DEFAULT_AGE,
            sex: Sex::Unspecified,
            emergency_contact_phone: None,
            doctor_phone: None,
        }
    }
}

impl PatientIdentity {
    /// Defaults with a custom age.
    pub fn with_default_age(age: u32) -> Self {
        Self {
            age,
            ..Self::default()
        }
    }

    /// Merge a record-store response over `fallback_age`.
    pub fn from_record(record: PatientRecord, fallback_age: u32) -> Self {
        Self {
            age: record.patient_age.unwrap_or(fallback_age),
            sex: record.patient_sex.as_deref().map(Sex::parse).unwrap_or_default(),
            emergency_contact_phone: non_blank(record.emergency_contact_phone),
            doctor_phone: non_blank(record.doctor_phone),
        }
    }

    /// Emergency contact if on file, else the doctor.
    pub fn preferred_phone(&self) -> Option<&str> {
        self.emergency_contact_phone
            .as_deref()
            .or(self.doctor_phone.as_deref())
    }

    /// Whether any contact number is known.
    pub fn has_contact(&self) -> bool {
        self.preferred_phone().is_some()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Cached identity plus resolution bookkeeping, owned by one session.
#[derive(Debug, Clone)]
pub struct IdentitySlot {
    identity: PatientIdentity,
    resolved_at: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    default_age: u32,
}

impl IdentitySlot {
    pub fn new(default_age: u32) -> Self {
        Self {
            identity: PatientIdentity::with_default_age(default_age),
            resolved_at: None,
            last_attempt: None,
            default_age,
        }
    }

    pub fn identity(&self) -> &PatientIdentity {
        &self.identity
    }

    /// Resolved means a contact number has been obtained.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    /// Whether a lazy (non-forced) lookup should be attempted at `now`.
    pub fn lookup_due(&self, now: DateTime<Utc>, retry_interval: Duration) -> bool {
        if self.is_resolved() {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now - last >= retry_interval,
        }
    }

    /// Record that a lookup is being attempted.
    pub fn mark_attempt(&mut self, now: DateTime<Utc>) {
        self.last_attempt = Some(now);
    }

    /// Store a successful lookup. Without a contact number the slot stays
    /// unresolved even though demographics are updated.
    pub fn store(&mut self, record: PatientRecord, now: DateTime<Utc>) {
        self.identity = PatientIdentity::from_record(record, self.default_age);
        self.resolved_at = self.identity.has_contact().then_some(now);
    }

    /// Keep whatever is cached, or the defaults, and stay unresolved.
    pub fn degrade(&mut self) {
        self.resolved_at = None;
    }

    /// Apply the result of a lookup. Returns the error to account for, if
    /// the slot is still unresolved afterwards.
    pub fn settle(
        &mut self,
        device_id: &str,
        result: Result<PatientRecord, BackendError>,
        now: DateTime<Utc>,
    ) -> Option<BackendError> {
        match result {
            Ok(record) => {
                self.store(record, now);
                if self.is_resolved() {
                    tracing::info!(device = %device_id, "patient identity resolved");
                    None
                } else {
                    tracing::warn!(device = %device_id, "patient record has no contact numbers");
                    Some(BackendError::NotFound)
                }
            }
            Err(e) => {
                tracing::warn!(device = %device_id, error = %e, "identity lookup failed, using defaults");
                self.degrade();
                Some(e)
            }
        }
    }
}

/// Lazily resolves identities through an [`IdentitySource`].
pub struct DeviceIdentityCache<S> {
    source: Arc<S>,
    timeout: std::time::Duration,
    retry_interval: Duration,
}

impl<S: IdentitySource> DeviceIdentityCache<S> {
    pub fn new(source: S, timeout: std::time::Duration, retry_interval: Duration) -> Self {
        Self {
            source: Arc::new(source),
            timeout,
            retry_interval,
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    async fn fetch(
        source: &S,
        device_id: &str,
        timeout: std::time::Duration,
    ) -> Result<PatientRecord, BackendError> {
        match tokio::time::timeout(timeout, source.fetch_patient(device_id)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    /// Start a lookup on a background task. The caller applies the result
    /// with [`IdentitySlot::settle`] once the handle has finished.
    pub fn spawn_lookup(&self, device_id: &str) -> PendingLookup {
        let source = Arc::clone(&self.source);
        let device_id = device_id.to_string();
        let timeout = self.timeout;
        tokio::spawn(async move { Self::fetch(&source, &device_id, timeout).await })
    }

    /// Resolve the identity for `device_id` into `slot`, waiting for the
    /// lookup.
    ///
    /// Returns the cached identity when resolved and not `force`d. Lookup
    /// failures never propagate: the slot keeps its best-effort identity and
    /// remains unresolved. The error, if any, is returned alongside for
    /// accounting.
    pub async fn resolve(
        &self,
        device_id: &str,
        slot: &mut IdentitySlot,
        force: bool,
        now: DateTime<Utc>,
    ) -> (PatientIdentity, Option<BackendError>) {
        if slot.is_resolved() && !force {
            return (slot.identity().clone(), None);
        }

        slot.mark_attempt(now);
        let result = Self::fetch(&self.source, device_id, self.timeout).await;
        let error = slot.settle(device_id, result, now);
        (slot.identity().clone(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        result: Result<PatientRecord, BackendError>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(result: Result<PatientRecord, BackendError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl IdentitySource for FixedSource {
        fn fetch_patient(
            &self,
            _device_id: &str,
        ) -> impl Future<Output = Result<PatientRecord, BackendError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = self.result.clone();
            async move { result }
        }
    }

    fn cache(source: FixedSource) -> DeviceIdentityCache<FixedSource> {
        DeviceIdentityCache::new(source, std::time::Duration::from_secs(1), Duration::seconds(30))
    }

    fn record(contact: Option<&str>, doctor: Option<&str>) -> PatientRecord {
        PatientRecord {
            patient_age: Some(65),
            patient_sex: Some("male".to_string()),
            emergency_contact_phone: contact.map(str::to_string),
            doctor_phone: doctor.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_resolved_identity_is_cached() {
        let cache = cache(FixedSource::new(Ok(record(Some("+919778235268"), None))));
        let mut slot = IdentitySlot::new(DEFAULT_AGE);
        let now = Utc::now();

        let (identity, err) = cache.resolve("D1", &mut slot, false, now).await;
        assert!(err.is_none());
        assert_eq!(identity.age, 65);
        assert_eq!(identity.sex, Sex::Male);
        assert!(slot.is_resolved());

        let (again, _) = cache.resolve("D1", &mut slot, false, now).await;
        assert_eq!(again, identity);
        assert_eq!(cache.source.calls.load(Ordering::SeqCst), 1);
        assert!(!slot.lookup_due(now + Duration::hours(1), cache.retry_interval()));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_defaults() {
        let cache = cache(FixedSource::new(Err(BackendError::Network("refused".into()))));
        let mut slot = IdentitySlot::new(DEFAULT_AGE);
        let now = Utc::now();

        let (identity, err) = cache.resolve("D1", &mut slot, false, now).await;
        assert_eq!(identity, PatientIdentity::default());
        assert!(matches!(err, Some(BackendError::Network(_))));
        assert!(!slot.is_resolved());

        assert!(!slot.lookup_due(now + Duration::seconds(5), cache.retry_interval()));
        assert!(slot.lookup_due(now + Duration::seconds(30), cache.retry_interval()));
    }

    #[tokio::test]
    async fn test_record_without_contacts_stays_unresolved() {
        let cache = cache(FixedSource::new(Ok(record(None, Some("  ")))));
        let mut slot = IdentitySlot::new(DEFAULT_AGE);

        let (identity, err) = cache.resolve("D1", &mut slot, false, Utc::now()).await;
        assert_eq!(identity.age, 65);
        assert!(identity.doctor_phone.is_none());
        assert!(err.is_some());
        assert!(!slot.is_resolved());
    }

    #[tokio::test]
    async fn test_force_refetches() {
        let cache = cache(FixedSource::new(Ok(record(None, Some("+1555000")))));
        let mut slot = IdentitySlot::new(DEFAULT_AGE);
        let now = Utc::now();

        cache.resolve("D1", &mut slot, false, now).await;
        cache.resolve("D1", &mut slot, true, now).await;
        assert_eq!(cache.source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(slot.identity().preferred_phone(), Some("+1555000"));
    }

    struct HangingSource;

    impl IdentitySource for HangingSource {
        fn fetch_patient(
            &self,
            _device_id: &str,
        ) -> impl Future<Output = Result<PatientRecord, BackendError>> + Send {
            std::future::pending()
        }
    }

    #[tokio::test]
    async fn test_hanging_source_times_out_to_defaults() {
        let cache = DeviceIdentityCache::new(
            HangingSource,
            std::time::Duration::from_millis(50),
            Duration::seconds(30),
        );
        let mut slot = IdentitySlot::new(DEFAULT_AGE);

        let started = std::time::Instant::now();
        let (identity, err) = cache.resolve("D1", &mut slot, true, Utc::now()).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(err, Some(BackendError::Timeout));
        assert_eq!(identity, PatientIdentity::default());
        assert!(!slot.is_resolved());
        assert!(slot.last_attempt().is_some());
    }

    #[tokio::test]
    async fn test_spawned_lookup_settles_into_slot() {
        let cache = cache(FixedSource::new(Ok(record(Some("+919778235268"), None))));
        let mut slot = IdentitySlot::new(DEFAULT_AGE);

        let result = cache.spawn_lookup("D1").await.unwrap();
        assert!(slot.settle("D1", result, Utc::now()).is_none());
        assert!(slot.is_resolved());
        assert_eq!(slot.identity().preferred_phone(), Some("+919778235268"));

        let hanging = DeviceIdentityCache::new(
            HangingSource,
            std::time::Duration::from_millis(50),
            Duration::seconds(30),
        );
        let result = hanging.spawn_lookup("D2").await.unwrap();
        let mut other = IdentitySlot::new(DEFAULT_AGE);
        assert_eq!(other.settle("D2", result, Utc::now()), Some(BackendError::Timeout));
        assert!(!other.is_resolved());
    }

    #[test]
    fn test_sex_parsing() {
        assert_eq!(Sex::parse("Male"), Sex::Male);
        assert_eq!(Sex::parse("female"), Sex::Female);
        assert_eq!(Sex::parse("other"), Sex::Unspecified);
    }
}
