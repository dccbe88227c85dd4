//! Recognition and persistence outcomes

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded outcome of one frame
///
/// Fields the client does not know about are kept in `extra` so a result can
/// be sent back to the service for saving without losing data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whether the sheet was recognised
    #[serde(default)]
    pub success: bool,

    /// Student identifier read from the sheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,

    /// Student display name, if the service resolved one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,

    /// Student code as bubbled on the sheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_code: Option<String>,

    /// Detected answers (question number -> choice)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub answers: BTreeMap<String, String>,

    /// Score awarded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Maximum attainable score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,

    /// Annotated/aligned sheet image (encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligned_image: Option<String>,

    /// Free-text message from the recogniser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the result was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Unrecognised fields, preserved verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RecognitionResult {
    /// Number of questions with a detected answer
    pub fn answered(&self) -> usize {
        self.answers.len()
    }

    /// Score formatted as `score/max`, when known
    pub fn score_display(&self) -> Option<String> {
        match (self.score, self.max_score) {
            (Some(score), Some(max)) => Some(format!("{}/{}", score, max)),
            (Some(score), None) => Some(score.to_string()),
            _ => None,
        }
    }
}

/// Outcome of persisting a recognition result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedResult {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_fields_survive() {
        let json = r#"{"success":true,"student_id":"S-001","answers":{"1":"A"},"sheet_version":3}"#;
        let result: RecognitionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.student_id.as_deref(), Some("S-001"));
        assert_eq!(result.extra.get("sheet_version"), Some(&serde_json::json!(3)));

        let back = serde_json::to_value(&result).unwrap();
        assert_eq!(back["sheet_version"], 3);
        assert_eq!(back["answers"]["1"], "A");
    }

    #[test]
    fn test_score_display() {
        let result = RecognitionResult {
            score: Some(8.5),
            max_score: Some(10.0),
            ..Default::default()
        };
        assert_eq!(result.score_display().as_deref(), Some("8.5/10"));
        assert_eq!(RecognitionResult::default().score_display(), None);
    }
}
