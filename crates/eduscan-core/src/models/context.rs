//! Exam/template pairing bound to a scanning session

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// The exam and answer template a session scans against
///
/// Both identifiers are chosen elsewhere (exam and template management) and
/// may be unset while the operator is still picking them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanningContext {
    /// Exam identifier
    pub exam_id: Option<i64>,
    /// Answer-sheet template identifier
    pub template_id: Option<i64>,
}

impl ScanningContext {
    /// Context with both identifiers set
    pub fn new(exam_id: i64, template_id: i64) -> Self {
        Self {
            exam_id: Some(exam_id),
            template_id: Some(template_id),
        }
    }

    /// Returns both identifiers, or the name of the first one missing
    pub fn require(&self) -> ScanResult<(i64, i64)> {
        let exam_id = self.exam_id.ok_or(ScanError::MissingContext("exam"))?;
        let template_id = self
            .template_id
            .ok_or(ScanError::MissingContext("template"))?;
        Ok((exam_id, template_id))
    }

    /// Whether both identifiers are set
    pub fn is_complete(&self) -> bool {
        self.require().is_ok()
    }
}
