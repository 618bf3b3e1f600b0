use serde::{Deserialize, Serialize};

/// Person reported when no gallery entry matches the probe.
pub const INTRUDER_LABEL: &str = "Intruder";

/// Confidence reported when no comparison took place (empty gallery, or every
/// entry skipped). Distances are never negative, so this cannot collide with
/// a real score.
pub const NO_COMPARISON_CONFIDENCE: f32 = -1.0;

/// Face embedding vector produced by one forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is neither NaN nor infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Sum of squared component differences.
    ///
    /// Callers must check lengths first; extra components of the longer
    /// vector are ignored.
    pub fn squared_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }

    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn l2_normalized(self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Self {
                values: self.values.iter().map(|x| x / norm).collect(),
            }
        } else {
            self
        }
    }
}

/// Outcome of comparing one known embedding against the probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchDecision {
    pub is_match: bool,
    /// Squared Euclidean distance. Lower = more similar.
    pub confidence: f32,
}

/// Externally visible outcome of one identification session.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub identified: bool,
    pub person: String,
    pub confidence: f32,
    pub message: String,
}

impl InferenceResult {
    /// A gallery identity matched the probe.
    pub fn identified(label: &str, confidence: f32) -> Self {
        Self {
            identified: true,
            person: label.to_string(),
            confidence,
            message: format!("{label} Detected With Confidence {confidence}"),
        }
    }

    /// No gallery identity matched the probe.
    pub fn intruder(confidence: f32) -> Self {
        Self {
            identified: false,
            person: INTRUDER_LABEL.to_string(),
            confidence,
            message: format!("{INTRUDER_LABEL} Detected With Confidence {confidence}"),
        }
    }
}
