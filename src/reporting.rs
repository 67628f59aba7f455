//! Fire-and-forget delivery of health records to the record store.
//!
//! Each submission runs on its own task under a bounded timeout, so backend
//! latency never stalls message handling. Failures are logged and counted,
//! never retried here.

use crate::backend::{BackendError, HealthRecord, RecordStore};
use crate::stats::SharedProcessorStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct BackendReporter<R> {
    store: Arc<R>,
    timeout: Duration,
    stats: SharedProcessorStats,
    pending: Vec<JoinHandle<bool>>,
}

impl<R: RecordStore> BackendReporter<R> {
    pub fn new(store: Arc<R>, timeout: Duration, stats: SharedProcessorStats) -> Self {
        Self {
            store,
            timeout,
            stats,
            pending: Vec::new(),
        }
    }

    /// Queue `record` for delivery and return immediately.
    pub fn report(&mut self, record: HealthRecord) {
        self.pending.retain(|handle| !handle.is_finished());

        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let timeout = self.timeout;
        self.pending.push(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, store.post_health_record(&record)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            };

            match result {
                Ok(()) => {
                    tracing::debug!(device = %record.device_id, event = ?record.event, "health record posted");
                    stats.record_report_sent();
                    true
                }
                Err(e) => {
                    tracing::warn!(device = %record.device_id, error = %e, "failed to post health record");
                    stats.record_report_failed();
                    false
                }
            }
        }));
    }

    /// Number of submissions that have not completed yet.
    pub fn pending(&self) -> usize {
        self.pending.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every outstanding submission. Returns how many of them
    /// succeeded; submissions already reaped by `report` are not counted.
    pub async fn flush(&mut self) -> usize {
        let mut delivered = 0;
        for handle in self.pending.drain(..) {
            match handle.await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "report task aborted"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;
    use std::future::Future;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<HealthRecord>>,
        fail: bool,
        delay: Option<Duration>,
    }

    impl RecordStore for MemoryStore {
        fn post_health_record(
            &self,
            record: &HealthRecord,
        ) -> impl Future<Output = Result<(), BackendError>> + Send {
            self.records.lock().unwrap().push(record.clone());
            let fail = self.fail;
            let delay = self.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if fail {
                    Err(BackendError::Network("connection refused".to_string()))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn record(device: &str) -> HealthRecord {
        HealthRecord {
            device_id: device.to_string(),
            heart_rate: 72,
            spo2: 98,
            body_temp: 36.5,
            fall_detected: false,
            blood_pressure: Some("120.00".to_string()),
            event: None,
            dispatched: None,
        }
    }

    #[tokio::test]
    async fn test_reports_are_delivered() {
        let store = Arc::new(MemoryStore::default());
        let stats = create_shared_stats();
        let mut reporter = BackendReporter::new(Arc::clone(&store), Duration::from_secs(1), Arc::clone(&stats));

        reporter.report(record("D1"));
        reporter.report(record("D2"));
        assert_eq!(reporter.flush().await, 2);

        assert_eq!(store.records.lock().unwrap().len(), 2);
        assert_eq!(stats.stats().reports_sent, 2);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..MemoryStore::default()
        });
        let stats = create_shared_stats();
        let mut reporter = BackendReporter::new(store, Duration::from_secs(1), Arc::clone(&stats));

        reporter.report(record("D1"));
        assert_eq!(reporter.flush().await, 0);
        assert_eq!(stats.stats().reports_failed, 1);
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let store = Arc::new(MemoryStore {
            delay: Some(Duration::from_secs(5)),
            ..MemoryStore::default()
        });
        let stats = create_shared_stats();
        let mut reporter = BackendReporter::new(store, Duration::from_millis(20), Arc::clone(&stats));

        reporter.report(record("D1"));
        assert_eq!(reporter.flush().await, 0);
        assert_eq!(stats.stats().reports_failed, 1);
    }
}
