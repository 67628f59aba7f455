//! Systolic blood-pressure estimation seam.
//!
//! The model is a black box consuming `[age, mean_heart_rate, mean_spo2,
//! mean_temperature]` and returning one estimate in mmHg.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Estimate substituted when the predictor fails.
pub const NEUTRAL_SBP: f64 = 120.0;

/// Plausible systolic range; estimates outside it count as failures.
const SBP_RANGE: std::ops::RangeInclusive<f64> = 40.0..=300.0;

/// Feature vector fed to the predictor.
pub type SbpFeatures = [f64; 4];

/// Prediction failures.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionError {
    /// A feature was NaN or infinite
    NonFiniteInput,
    /// The model produced NaN or infinity
    NonFiniteOutput,
    /// The estimate is physiologically implausible
    OutOfRange(f64),
}

impl std::fmt::Display for PredictionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionError::NonFiniteInput => write!(f, "Non-finite feature value"),
            PredictionError::NonFiniteOutput => write!(f, "Non-finite prediction"),
            PredictionError::OutOfRange(v) => write!(f, "Prediction out of range: {v:.2}"),
        }
    }
}

impl std::error::Error for PredictionError {}

/// Anything that maps window features to a systolic estimate.
pub trait Predictor: Send + Sync {
    fn predict(&self, features: &SbpFeatures) -> Result<f64, PredictionError>;
}

/// Linear regression over the four features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSbpModel {
    pub intercept: f64,
    /// Weights for age, heart rate, SpO2 and temperature, in that order
    pub coefficients: [f64; 4],
}

impl Default for LinearSbpModel {
    fn default() -> Self {
        Self {
            intercept: 80.0,
            coefficients: [0.45, 0.25, -0.05, 0.3],
        }
    }
}

impl LinearSbpModel {
    /// Load coefficients from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

impl Predictor for LinearSbpModel {
    fn predict(&self, features: &SbpFeatures) -> Result<f64, PredictionError> {
        if features.iter().any(|f| !f.is_finite()) {
            return Err(PredictionError::NonFiniteInput);
        }

        let estimate = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();

        if !estimate.is_finite() {
            return Err(PredictionError::NonFiniteOutput);
        }
        if !SBP_RANGE.contains(&estimate) {
            return Err(PredictionError::OutOfRange(estimate));
        }
        Ok(estimate)
    }
}

/// Run the predictor, substituting [`NEUTRAL_SBP`] on failure.
///
/// Returns the estimate and whether the fallback was used.
pub fn predict_or_neutral(predictor: &dyn Predictor, features: &SbpFeatures) -> (f64, bool) {
    match predictor.predict(features) {
        Ok(sbp) => (sbp, false),
        Err(e) => {
            tracing::warn!(error = %e, "SBP prediction failed, using neutral default");
            (NEUTRAL_SBP, true)
        }
    }
}
