//! Processor counters.
//!
//! Tracks what the agent has done since start (and cumulatively, when
//! persisted) without keeping any per-patient data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic counters shared between the consumer loop, report tasks, the
/// reminder task and the status endpoint.
#[derive(Debug)]
pub struct ProcessorStats {
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    windows_completed: AtomicU64,
    predictions_defaulted: AtomicU64,
    emergencies_triggered: AtomicU64,
    calls_triggered: AtomicU64,
    dispatches_sent: AtomicU64,
    dispatches_failed: AtomicU64,
    reports_sent: AtomicU64,
    reports_failed: AtomicU64,
    identity_lookups_failed: AtomicU64,
    reminders_sent: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

macro_rules! counter {
    ($($method:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $method(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            predictions_defaulted: AtomicU64::new(0),
            emergencies_triggered: AtomicU64::new(0),
            calls_triggered: AtomicU64::new(0),
            dispatches_sent: AtomicU64::new(0),
            dispatches_failed: AtomicU64::new(0),
            reports_sent: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
            identity_lookups_failed: AtomicU64::new(0),
            reminders_sent: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous processor stats");
        }

        stats
    }

    counter! {
        record_message_received => messages_received,
        record_message_dropped => messages_dropped,
        record_window_completed => windows_completed,
        record_prediction_defaulted => predictions_defaulted,
        record_emergency_triggered => emergencies_triggered,
        record_call_triggered => calls_triggered,
        record_dispatch_sent => dispatches_sent,
        record_dispatch_failed => dispatches_failed,
        record_report_sent => reports_sent,
        record_report_failed => reports_failed,
        record_identity_lookup_failed => identity_lookups_failed,
        record_reminder_sent => reminders_sent,
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            predictions_defaulted: self.predictions_defaulted.load(Ordering::Relaxed),
            emergencies_triggered: self.emergencies_triggered.load(Ordering::Relaxed),
            calls_triggered: self.calls_triggered.load(Ordering::Relaxed),
            dispatches_sent: self.dispatches_sent.load(Ordering::Relaxed),
            dispatches_failed: self.dispatches_failed.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            reports_failed: self.reports_failed.load(Ordering::Relaxed),
            identity_lookups_failed: self.identity_lookups_failed.load(Ordering::Relaxed),
            reminders_sent: self.reminders_sent.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let c = persisted.counters;

                self.messages_received.store(c.messages_received, Ordering::Relaxed);
                self.messages_dropped.store(c.messages_dropped, Ordering::Relaxed);
                self.windows_completed.store(c.windows_completed, Ordering::Relaxed);
                self.predictions_defaulted
                    .store(c.predictions_defaulted, Ordering::Relaxed);
                self.emergencies_triggered
                    .store(c.emergencies_triggered, Ordering::Relaxed);
                self.calls_triggered.store(c.calls_triggered, Ordering::Relaxed);
                self.dispatches_sent.store(c.dispatches_sent, Ordering::Relaxed);
                self.dispatches_failed.store(c.dispatches_failed, Ordering::Relaxed);
                self.reports_sent.store(c.reports_sent, Ordering::Relaxed);
                self.reports_failed.store(c.reports_failed, Ordering::Relaxed);
                self.identity_lookups_failed
                    .store(c.identity_lookups_failed, Ordering::Relaxed);
                self.reminders_sent.store(c.reminders_sent, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for ProcessorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of processor statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub windows_completed: u64,
    pub predictions_defaulted: u64,
    pub emergencies_triggered: u64,
    pub calls_triggered: u64,
    pub dispatches_sent: u64,
    pub dispatches_failed: u64,
    pub reports_sent: u64,
    pub reports_failed: u64,
    pub identity_lookups_failed: u64,
    pub reminders_sent: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Processor Statistics:\n\
             - Messages received: {}\n\
             - Messages dropped (malformed): {}\n\
             - Windows completed: {} ({} with default SBP)\n\
             - Escalations: {} emergency, {} call\n\
             - Actuation commands: {} sent, {} failed\n\
             - Backend reports: {} sent, {} failed\n\
             - Identity lookups failed: {}\n\
             - Medication reminders sent: {}\n\
             - Uptime: {} seconds",
            self.messages_received,
            self.messages_dropped,
            self.windows_completed,
            self.predictions_defaulted,
            self.emergencies_triggered,
            self.calls_triggered,
            self.dispatches_sent,
            self.dispatches_failed,
            self.reports_sent,
            self.reports_failed,
            self.identity_lookups_failed,
            self.reminders_sent,
            self.uptime_secs
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared counters.
pub type SharedProcessorStats = Arc<ProcessorStats>;

pub fn create_shared_stats() -> SharedProcessorStats {
    Arc::new(ProcessorStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedProcessorStats {
    Arc::new(ProcessorStats::with_persistence(path))
}
