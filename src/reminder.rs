//! Fixed-time medication reminders.
//!
//! At each configured time of day the scheduler raises the band's reminder
//! flag and publishes an informational record naming the medicine. It only
//! produces outbound messages and never touches session state.

use crate::stats::SharedProcessorStats;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Default medicine rotation.
pub const DEFAULT_MEDICINES: &[&str] = &[
    "Amlodipine 5mg",
    "Metformin 500mg",
    "Atorvastatin 10mg",
    "Losartan 50mg",
    "Enalapril 10mg",
    "Paracetamol 500mg",
];

/// A labelled time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSlot {
    pub label: String,
    pub hour: u32,
    pub minute: u32,
}

impl ReminderSlot {
    pub fn new(label: impl Into<String>, hour: u32, minute: u32) -> Self {
        Self {
            label: label.into(),
            hour,
            minute,
        }
    }

    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }

    /// Morning 09:00 and night 21:00.
    pub fn defaults() -> Vec<Self> {
        vec![Self::new("morning", 9, 0), Self::new("night", 21, 0)]
    }
}

/// Parse an IANA timezone name such as `Asia/Kolkata`.
pub fn parse_timezone(name: &str) -> Result<Tz, String> {
    name.parse::<Tz>().map_err(|e| e.to_string())
}

/// Slots evaluated in one timezone.
#[derive(Debug, Clone)]
pub struct ReminderSchedule {
    timezone: Tz,
    slots: Vec<ReminderSlot>,
}

impl ReminderSchedule {
    pub fn new(timezone: Tz, slots: Vec<ReminderSlot>) -> Self {
        Self { timezone, slots }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn slots(&self) -> &[ReminderSlot] {
        &self.slots
    }

    /// The first slot occurrence strictly after `after`.
    ///
    /// Times that fall in a DST gap are skipped for that day; ambiguous
    /// times fire at their earlier instant.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<(ReminderSlot, DateTime<Utc>)> {
        let today = after.with_timezone(&self.timezone).date_naive();

        self.slots
            .iter()
            .filter_map(|slot| {
                let time = slot.time()?;
                (0..=2)
                    .filter_map(|offset| {
                        let day = today + Duration::days(offset);
                        self.timezone
                            .from_local_datetime(&day.and_time(time))
                            .earliest()
                            .map(|local| local.with_timezone(&Utc))
                    })
                    .find(|at| *at > after)
                    .map(|at| (slot.clone(), at))
            })
            .min_by_key(|(_, at)| *at)
    }
}

/// Informational record sent alongside the reminder flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationReminder {
    #[serde(rename = "type")]
    pub kind: String,
    pub medicine: String,
    /// Slot label, e.g. `morning`
    pub time: String,
    pub timestamp: DateTime<Utc>,
}

impl MedicationReminder {
    pub fn new(medicine: impl Into<String>, slot: &ReminderSlot, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: "medication".to_string(),
            medicine: medicine.into(),
            time: slot.label.clone(),
            timestamp,
        }
    }
}

/// Reminder publishing errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderError {
    Publish(String),
    Serialization(String),
}

impl std::fmt::Display for ReminderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderError::Publish(e) => write!(f, "Publish error: {e}"),
            ReminderError::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for ReminderError {}

/// Outbound channel for reminder messages.
pub trait ReminderPublisher: Send + Sync {
    fn publish_text(&self, topic: &str, payload: String) -> impl Future<Output = Result<(), ReminderError>> + Send;
}

/// Topics the scheduler publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderTopics {
    /// Receives `"true"`/`"false"`
    pub flag: String,
    /// Receives [`MedicationReminder`] JSON
    pub info: String,
}

/// Fires reminders at each scheduled slot.
pub struct ReminderScheduler<P> {
    schedule: ReminderSchedule,
    topics: ReminderTopics,
    medicines: Vec<String>,
    next_medicine: usize,
    dismiss_after: Option<std::time::Duration>,
    publisher: P,
    stats: SharedProcessorStats,
}

impl<P: ReminderPublisher> ReminderScheduler<P> {
    pub fn new(
        schedule: ReminderSchedule,
        topics: ReminderTopics,
        medicines: Vec<String>,
        dismiss_after: Option<std::time::Duration>,
        publisher: P,
        stats: SharedProcessorStats,
    ) -> Self {
        let medicines = if medicines.is_empty() {
            DEFAULT_MEDICINES.iter().map(|m| m.to_string()).collect()
        } else {
            medicines
        };

        Self {
            schedule,
            topics,
            medicines,
            next_medicine: 0,
            dismiss_after,
            publisher,
            stats,
        }
    }

    fn take_medicine(&mut self) -> String {
        let medicine = self.medicines[self.next_medicine % self.medicines.len()].clone();
        self.next_medicine = (self.next_medicine + 1) % self.medicines.len();
        medicine
    }

    /// Publish the reminder for `slot` right now.
    pub async fn fire(&mut self, slot: &ReminderSlot, now: DateTime<Utc>) -> Result<MedicationReminder, ReminderError> {
        let reminder = MedicationReminder::new(self.take_medicine(), slot, now);
        let info = serde_json::to_string(&reminder).map_err(|e| ReminderError::Serialization(e.to_string()))?;

        self.publisher
            .publish_text(&self.topics.flag, "true".to_string())
            .await?;
        self.publisher.publish_text(&self.topics.info, info).await?;
        self.stats.record_reminder_sent();

        tracing::info!(slot = %slot.label, medicine = %reminder.medicine, "medication reminder sent");
        Ok(reminder)
    }

    /// Clear the band's reminder flag.
    pub async fn dismiss(&self) -> Result<(), ReminderError> {
        self.publisher
            .publish_text(&self.topics.flag, "false".to_string())
            .await
    }

    /// Run until the task is aborted.
    pub async fn run(mut self) {
        loop {
            let now = Utc::now();
            let Some((slot, at)) = self.schedule.next_occurrence(now) else {
                tracing::warn!("no valid reminder slots configured, scheduler stopping");
                return;
            };

            tracing::debug!(slot = %slot.label, at = %at, "next medication reminder");
            let wait = (at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = self.fire(&slot, Utc::now()).await {
                tracing::error!(slot = %slot.label, error = %e, "failed to send medication reminder");
                continue;
            }

            if let Some(delay) = self.dismiss_after {
                tokio::time::sleep(delay).await;
                if let Err(e) = self.dismiss().await {
                    tracing::warn!(error = %e, "failed to dismiss medication reminder");
                }
            }
        }
    }
}
