//! Client for the remote patient record store.
//!
//! Two calls are consumed: an identity lookup by device id and a health-event
//! POST. Both sit behind small traits so the session processor can be driven
//! by in-memory fakes in tests.

use crate::core::escalation::EscalationKind;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Record-store configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base API URL, e.g. `http://127.0.0.1:8000/api`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry the legacy single-patient endpoint when a device is not found
    pub legacy_contact_fallback: bool,
}

impl BackendConfig {
    /// Create a new backend configuration.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            legacy_contact_fallback: false,
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Get the identity endpoint URL for a device. The device id is
    /// percent-encoded as a single path segment.
    pub fn patient_url(&self, device_id: &str) -> Result<String, BackendError> {
        let mut url = reqwest::Url::parse(self.base())
            .map_err(|e| BackendError::Config(format!("Invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Config(format!("Base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["device", device_id, "patient", ""]);
        Ok(url.to_string())
    }

    /// Get the legacy contact list endpoint URL.
    pub fn legacy_contact_url(&self) -> String {
        format!("{}/patient-contact/", self.base())
    }

    /// Get the health-event endpoint URL.
    pub fn health_data_url(&self) -> String {
        format!("{}/health-data/", self.base())
    }
}

/// Record-store error types.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Configuration error
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// No record for the requested device
    NotFound,
    /// Server returned an error response
    Server { status: u16, message: String },
    /// JSON (de)serialization error
    Serialization(String),
    /// Request exceeded its time budget
    Timeout,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Config(msg) => write!(f, "Backend config error: {msg}"),
            BackendError::Network(msg) => write!(f, "Backend network error: {msg}"),
            BackendError::NotFound => write!(f, "Backend record not found"),
            BackendError::Server { status, message } => {
                write!(f, "Backend server error ({status}): {message}")
            }
            BackendError::Serialization(msg) => write!(f, "Backend serialization error: {msg}"),
            BackendError::Timeout => write!(f, "Backend request timed out"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Patient record as returned by the identity endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(default, alias = "age")]
    pub patient_age: Option<u32>,
    #[serde(default, alias = "sex")]
    pub patient_sex: Option<String>,
    #[serde(default, alias = "emergencyContactPhone")]
    pub emergency_contact_phone: Option<String>,
    #[serde(default, alias = "doctorPhone")]
    pub doctor_phone: Option<String>,
}

/// Health-event payload accepted by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub device_id: String,
    pub heart_rate: u32,
    pub spo2: u32,
    pub body_temp: f64,
    pub fall_detected: bool,
    /// Systolic estimate as text with two decimals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    /// Escalation that produced this record, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EscalationKind>,
    /// Whether the escalation's actuation command was delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched: Option<bool>,
}

/// Source of patient identity records.
pub trait IdentitySource: Send + Sync + 'static {
    fn fetch_patient(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<PatientRecord, BackendError>> + Send;
}

/// Sink for health-event records.
pub trait RecordStore: Send + Sync + 'static {
    fn post_health_record(
        &self,
        record: &HealthRecord,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// HTTP client for the record store.
#[derive(Debug, Clone)]
pub struct BackendClient {
    config: BackendConfig,
    client: reqwest::Client,
}

impl BackendClient {
    /// Create a new backend client.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Look up the patient bound to `device_id`.
    pub async fn fetch_patient_record(&self, device_id: &str) -> Result<PatientRecord, BackendError> {
        match self.get_json::<PatientRecord>(&self.config.patient_url(device_id)?).await {
            Err(BackendError::NotFound) if self.config.legacy_contact_fallback => {
                tracing::debug!(device = %device_id, "device not found, trying legacy contact endpoint");
                self.get_json::<Vec<PatientRecord>>(&self.config.legacy_contact_url())
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(BackendError::NotFound)
            }
            other => other,
        }
    }

    /// POST one health record.
    pub async fn send_health_record(&self, record: &HealthRecord) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.config.health_data_url())
            .header("Content-Type", "application/json")
            .json(record)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Serialization(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(e.to_string())
    }
}

impl IdentitySource for BackendClient {
    fn fetch_patient(
        &self,
        device_id: &str,
    ) -> impl Future<Output = Result<PatientRecord, BackendError>> + Send {
        self.fetch_patient_record(device_id)
    }
}

impl RecordStore for BackendClient {
    fn post_health_record(
        &self,
        record: &HealthRecord,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        self.send_health_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_urls() {
        let config = BackendConfig::new("http://127.0.0.1:8000/api/", Duration::from_secs(3));
        assert_eq!(
            config.patient_url("TEST:DEVICE:001").unwrap(),
            "http://127.0.0.1:8000/api/device/TEST:DEVICE:001/patient/"
        );
        assert_eq!(
            config.legacy_contact_url(),
            "http://127.0.0.1:8000/api/patient-contact/"
        );
        assert_eq!(
            config.health_data_url(),
            "http://127.0.0.1:8000/api/health-data/"
        );
    }

    #[test]
    fn test_patient_url_escapes_device_id() {
        let config = BackendConfig::new("http://127.0.0.1:8000/api", Duration::from_secs(3));
        assert_eq!(
            config.patient_url("a/b?c#d").unwrap(),
            "http://127.0.0.1:8000/api/device/a%2Fb%3Fc%23d/patient/"
        );

        let bare = BackendConfig::new("http://records.local", Duration::from_secs(3));
        assert_eq!(
            bare.patient_url("D 1").unwrap(),
            "http://records.local/device/D%201/patient/"
        );

        let broken = BackendConfig::new("no scheme here", Duration::from_secs(3));
        assert!(matches!(broken.patient_url("D1"), Err(BackendError::Config(_))));
    }

    #[test]
    fn test_patient_record_accepts_both_casings() {
        let snake: PatientRecord = serde_json::from_str(
            r#"{"patient_age":65,"patient_sex":"male","emergency_contact_phone":"+919778235268",
                "doctor_phone":"123-456-7890","patient_name":"Test Patient"}"#,
        )
        .unwrap();
        assert_eq!(snake.patient_age, Some(65));
        assert_eq!(snake.emergency_contact_phone.as_deref(), Some("+919778235268"));

        let camel: PatientRecord =
            serde_json::from_str(r#"{"age":70,"emergencyContactPhone":"+1555","doctorPhone":null}"#)
                .unwrap();
        assert_eq!(camel.patient_age, Some(70));
        assert_eq!(camel.emergency_contact_phone.as_deref(), Some("+1555"));
        assert!(camel.doctor_phone.is_none());
    }

    #[test]
    fn test_health_record_serialization() {
        let record = HealthRecord {
            device_id: "D9".to_string(),
            heart_rate: 150,
            spo2: 85,
            body_temp: 38.5,
            fall_detected: true,
            blood_pressure: None,
            event: Some(EscalationKind::Emergency),
            dispatched: Some(true),
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["device_id"], "D9");
        assert_eq!(json["fall_detected"], true);
        assert_eq!(json["event"], "emergency");
        assert!(json.get("blood_pressure").is_none());
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Server {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Backend server error (500): boom");
    }
}
