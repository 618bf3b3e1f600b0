//! JSON wire format for identification responses.

use crate::types::InferenceResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RESPONSE_OK: &str = "OK";
const RESPONSE_FAILED: &str = "FAILED";

#[derive(Error, Debug)]
pub enum WireError {
    #[error("response status is {0:?}, expected \"OK\"")]
    NotOk(String),
    #[error("Results must be 0 or 1, got {0}")]
    InvalidResults(u8),
    #[error("Confidence is not a number: {0:?}")]
    InvalidConfidence(String),
}

/// Successful identification response body.
///
/// Confidence travels as a string; `f32`'s `Display` is the shortest text
/// that parses back to the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InferResponse {
    pub response: String,
    pub results: u8,
    pub person: String,
    pub confidence: String,
    pub response_message: String,
}

impl From<&InferenceResult> for InferResponse {
    fn from(result: &InferenceResult) -> Self {
        Self {
            response: RESPONSE_OK.to_string(),
            results: u8::from(result.identified),
            person: result.person.clone(),
            confidence: result.confidence.to_string(),
            response_message: result.message.clone(),
        }
    }
}

impl TryFrom<InferResponse> for InferenceResult {
    type Error = WireError;

    fn try_from(wire: InferResponse) -> Result<Self, Self::Error> {
        if wire.response != RESPONSE_OK {
            return Err(WireError::NotOk(wire.response));
        }
        let identified = match wire.results {
            0 => false,
            1 => true,
            other => return Err(WireError::InvalidResults(other)),
        };
        let confidence = wire
            .confidence
            .parse::<f32>()
            .map_err(|_| WireError::InvalidConfidence(wire.confidence.clone()))?;

        Ok(InferenceResult {
            identified,
            person: wire.person,
            confidence,
            message: wire.response_message,
        })
    }
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub response: String,
    pub response_message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            response: RESPONSE_FAILED.to_string(),
            response_message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identified_wire_fields() {
        let wire = InferResponse::from(&InferenceResult::identified("alice", 0.42));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["Response"], "OK");
        assert_eq!(json["Results"], 1);
        assert_eq!(json["Person"], "alice");
        assert_eq!(json["Confidence"], "0.42");
        assert_eq!(json["ResponseMessage"], "alice Detected With Confidence 0.42");
    }

    #[test]
    fn test_intruder_wire_fields() {
        let wire = InferResponse::from(&InferenceResult::intruder(1.87));
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["Results"], 0);
        assert_eq!(json["Person"], "Intruder");
        assert_eq!(json["Confidence"], "1.87");
        assert_eq!(json["ResponseMessage"], "Intruder Detected With Confidence 1.87");
    }

    #[test]
    fn test_result_survives_json_round_trip() {
        for original in [
            InferenceResult::identified("bob", 0.123_456_79),
            InferenceResult::intruder(1.3000001),
            InferenceResult::intruder(-1.0),
        ] {
            let text = serde_json::to_string(&InferResponse::from(&original)).unwrap();
            let wire: InferResponse = serde_json::from_str(&text).unwrap();
            let decoded = InferenceResult::try_from(wire).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_rejects_failed_response() {
        let wire = InferResponse {
            response: "FAILED".into(),
            results: 0,
            person: String::new(),
            confidence: "0".into(),
            response_message: String::new(),
        };
        assert!(matches!(InferenceResult::try_from(wire), Err(WireError::NotOk(_))));
    }

    #[test]
    fn test_rejects_bad_confidence() {
        let wire = InferResponse {
            response: "OK".into(),
            results: 1,
            person: "alice".into(),
            confidence: "high".into(),
            response_message: String::new(),
        };
        assert!(matches!(
            InferenceResult::try_from(wire),
            Err(WireError::InvalidConfidence(_))
        ));
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(ErrorResponse::new("bad image")).unwrap();
        assert_eq!(json["Response"], "FAILED");
        assert_eq!(json["ResponseMessage"], "bad image");
    }
}
