//! Distance-based comparison of a known embedding against a probe.

use crate::types::{Embedding, MatchDecision};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Squared-distance threshold for unit-length FaceNet-style embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: known has {known} values, probe has {probe}")]
    DimensionMismatch { known: usize, probe: usize },
    #[error("embedding contains NaN or infinite values")]
    InvalidEmbedding,
}

/// Strategy for deciding whether two embeddings belong to the same identity.
pub trait Matcher {
    fn compare(&self, known: &Embedding, probe: &Embedding) -> Result<MatchDecision, MatchError>;
}

/// Squared Euclidean distance matcher.
///
/// `is_match` holds when the distance is strictly below the threshold.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    threshold: f32,
}

impl DistanceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, known: &Embedding, probe: &Embedding) -> Result<MatchDecision, MatchError> {
        if known.len() != probe.len() {
            return Err(MatchError::DimensionMismatch {
                known: known.len(),
                probe: probe.len(),
            });
        }
        if !known.is_finite() || !probe.is_finite() {
            return Err(MatchError::InvalidEmbedding);
        }

        let confidence = known.squared_distance(probe);
        Ok(MatchDecision {
            is_match: confidence < self.threshold,
            confidence,
        })
    }
}

/// How a session picks the reported identity from the gallery scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Stop at the first entry (in enumeration order) that matches.
    #[default]
    FirstMatch,
    /// Compare every entry and report the closest match.
    BestMatch,
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::FirstMatch => f.write_str("first-match"),
            MatchPolicy::BestMatch => f.write_str("best-match"),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" | "first-match" => Ok(MatchPolicy::FirstMatch),
            "best" | "best-match" => Ok(MatchPolicy::BestMatch),
            other => Err(format!("unknown match policy: {other}")),
        }
    }
}
