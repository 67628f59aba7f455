//! Vital-sign aggregates computed from a drained window.

use crate::collector::types::SensorSample;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Aggregates over one complete window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowVitals {
    /// Arithmetic mean heart rate (beats/min)
    pub mean_heart_rate: f64,
    /// Arithmetic mean SpO2 (percent)
    pub mean_spo2: f64,
    /// Arithmetic mean body temperature (°C)
    pub mean_temperature: f64,
    /// Whether any sample in the window reported a fall
    pub fall_detected: bool,
    /// Number of samples aggregated
    pub sample_count: usize,
}

/// Compute window vitals. Returns `None` for an empty slice.
pub fn compute_vitals(samples: &[SensorSample]) -> Option<WindowVitals> {
    if samples.is_empty() {
        return None;
    }

    let heart_rates: Vec<f64> = samples.iter().map(|s| s.heart_rate as f64).collect();
    let spo2: Vec<f64> = samples.iter().map(|s| s.spo2 as f64).collect();
    let temperatures: Vec<f64> = samples.iter().map(|s| s.temperature).collect();

    Some(WindowVitals {
        mean_heart_rate: heart_rates.iter().mean(),
        mean_spo2: spo2.iter().mean(),
        mean_temperature: temperatures.iter().mean(),
        fall_detected: samples.iter().any(|s| s.flags.fall),
        sample_count: samples.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::SampleFlags;
    use chrono::Utc;

    fn sample(hr: u32, spo2: u32, temp: f64, fall: bool) -> SensorSample {
        SensorSample {
            device_id: "D1".to_string(),
            heart_rate: hr,
            spo2,
            temperature: temp,
            flags: SampleFlags {
                fall,
                ..SampleFlags::default()
            },
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_window() {
        assert!(compute_vitals(&[]).is_none());
    }

    #[test]
    fn test_means_and_fall_or() {
        let samples = vec![
            sample(60, 95, 36.0, false),
            sample(70, 96, 36.5, false),
            sample(80, 97, 37.0, true),
            sample(90, 98, 37.5, false),
            sample(100, 99, 38.0, false),
        ];
        let vitals = compute_vitals(&samples).unwrap();

        assert!((vitals.mean_heart_rate - 80.0).abs() < 1e-9);
        assert!((vitals.mean_spo2 - 97.0).abs() < 1e-9);
        assert!((vitals.mean_temperature - 37.0).abs() < 1e-9);
        assert!(vitals.fall_detected);
        assert_eq!(vitals.sample_count, 5);
    }

    #[test]
    fn test_no_fall() {
        let samples = vec![sample(72, 98, 36.6, false); 3];
        let vitals = compute_vitals(&samples).unwrap();
        assert!(!vitals.fall_detected);
    }
}
