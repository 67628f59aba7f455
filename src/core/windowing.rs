//! Fixed-capacity sample windows.
//!
//! A window is drain-and-reset rather than continuously sliding: samples
//! accumulate until the window is full, then the whole window is consumed by
//! one aggregation cycle and starts over empty.

use crate::collector::types::SensorSample;
use crate::core::features::{compute_vitals, WindowVitals};
use crate::core::predictor::{predict_or_neutral, Predictor};
use serde::{Deserialize, Serialize};

/// Default number of samples per aggregation cycle.
pub const DEFAULT_WINDOW_CAPACITY: usize = 5;

/// Bounded, insertion-ordered buffer of samples for one device.
#[derive(Debug, Clone)]
pub struct AggregationWindow {
    capacity: usize,
    samples: Vec<SensorSample>,
}

impl AggregationWindow {
    /// Create an empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Append a sample. Once the window reaches capacity all samples are
    /// drained and returned, leaving the window empty.
    pub fn push(&mut self, sample: SensorSample) -> Option<Vec<SensorSample>> {
        self.samples.push(sample);
        if self.samples.len() >= self.capacity {
            Some(std::mem::take(&mut self.samples))
        } else {
            None
        }
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the window has any samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Outcome of one completed aggregation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub vitals: WindowVitals,
    /// Estimated systolic blood pressure (mmHg)
    pub predicted_sbp: f64,
    /// Whether the neutral default replaced a failed prediction
    pub defaulted: bool,
}

/// Folds samples into a window and runs the predictor on each full window.
pub struct WindowAggregator<'a> {
    predictor: &'a dyn Predictor,
}

impl<'a> WindowAggregator<'a> {
    pub fn new(predictor: &'a dyn Predictor) -> Self {
        Self { predictor }
    }

    /// Add `sample` to `window`. When this completes the window, compute the
    /// vitals, estimate SBP for a patient of `age` and return the result.
    pub fn ingest(
        &self,
        window: &mut AggregationWindow,
        sample: SensorSample,
        age: u32,
    ) -> Option<PredictionResult> {
        let drained = window.push(sample)?;
        let vitals = compute_vitals(&drained)?;

        let features = [
            age as f64,
            vitals.mean_heart_rate,
            vitals.mean_spo2,
            vitals.mean_temperature,
        ];
        let (predicted_sbp, defaulted) = predict_or_neutral(self.predictor, &features);

        Some(PredictionResult {
            vitals,
            predicted_sbp,
            defaulted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::SampleFlags;
    use crate::core::predictor::{PredictionError, SbpFeatures, NEUTRAL_SBP};
    use chrono::Utc;
    use std::sync::Mutex;

    struct RecordingPredictor {
        calls: Mutex<Vec<SbpFeatures>>,
    }

    impl Predictor for RecordingPredictor {
        fn predict(&self, features: &SbpFeatures) -> Result<f64, PredictionError> {
            self.calls.lock().unwrap().push(*features);
            Ok(125.0)
        }
    }

    struct FailingPredictor;

    impl Predictor for FailingPredictor {
        fn predict(&self, _features: &SbpFeatures) -> Result<f64, PredictionError> {
            Err(PredictionError::NonFiniteOutput)
        }
    }

    fn sample(hr: u32) -> SensorSample {
        SensorSample {
            device_id: "D1".to_string(),
            heart_rate: hr,
            spo2: 97,
            temperature: 36.8,
            flags: SampleFlags::default(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_window_drains_at_capacity() {
        let mut window = AggregationWindow::new(3);
        assert!(window.push(sample(70)).is_none());
        assert!(window.push(sample(71)).is_none());
        assert_eq!(window.len(), 2);

        let drained = window.push(sample(72)).unwrap();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].heart_rate, 70);
        assert!(window.is_empty());
    }

    #[test]
    fn test_one_prediction_per_full_window() {
        let predictor = RecordingPredictor {
            calls: Mutex::new(Vec::new()),
        };
        let aggregator = WindowAggregator::new(&predictor);
        let mut window = AggregationWindow::new(DEFAULT_WINDOW_CAPACITY);

        let rates = [60, 65, 70, 75, 80, 85, 90, 95, 100, 105];
        let results: Vec<PredictionResult> = rates
            .iter()
            .filter_map(|&hr| aggregator.ingest(&mut window, sample(hr), 42))
            .collect();

        assert_eq!(results.len(), 2);
        assert!((results[0].vitals.mean_heart_rate - 70.0).abs() < 1e-9);
        assert!((results[1].vitals.mean_heart_rate - 95.0).abs() < 1e-9);
        assert_eq!(results[0].predicted_sbp, 125.0);

        let calls = predictor.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][0], 42.0);
    }

    #[test]
    fn test_failed_prediction_uses_neutral_default() {
        let aggregator = WindowAggregator::new(&FailingPredictor);
        let mut window = AggregationWindow::new(1);

        let result = aggregator.ingest(&mut window, sample(80), 30).unwrap();
        assert_eq!(result.predicted_sbp, NEUTRAL_SBP);
        assert!(result.defaulted);
    }
}
