//! Candidate records and per-type scan outcomes.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::errors::BrecError;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Structured,
    Carved,
}

/// Trust tier attached to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "tier", rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium { score: f64 },
    Low,
}

impl Confidence {
    /// Short label for human output, e.g. `Medium (AI: 0.83)`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::High => "High".to_string(),
            Self::Medium { score } => format!("Medium (AI: {score:.2})"),
            Self::Low => "Low".to_string(),
        }
    }
}

/// One recovered item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub text: String,
    pub source: RecordSource,
    pub confidence: Confidence,
    /// Byte offset in the acquired file. Only carved records have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl CandidateRecord {
    /// Structured rows are always High.
    #[must_use]
    pub fn structured(text: String) -> Self {
        Self {
            text,
            source: RecordSource::Structured,
            confidence: Confidence::High,
            offset: None,
        }
    }

    /// Carved spans start out Low.
    #[must_use]
    pub fn carved(text: String, offset: u64) -> Self {
        Self {
            text,
            source: RecordSource::Carved,
            confidence: Confidence::Low,
            offset: Some(offset),
        }
    }
}

/// Pipeline stage a recorded issue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStage {
    Catalog,
    Acquisition,
    Structured,
    Carve,
    Classifier,
    Cancelled,
    /// A panic inside the type's pipeline.
    Internal,
}

/// A non-fatal failure captured alongside a type's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryIssue {
    pub stage: IssueStage,
    pub code: String,
    pub message: String,
}

impl RecoveryIssue {
    #[must_use]
    pub fn from_error(stage: IssueStage, err: &BrecError) -> Self {
        Self {
            stage,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// SHA-256 and size of the acquired file as the carver read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceDigest {
    pub sha256: String,
    pub bytes: u64,
}

/// Everything recovered for one artifact type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactRecovery {
    /// Structured candidates first, then carved.
    pub candidates: Vec<CandidateRecord>,
    pub issues: Vec<RecoveryIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceDigest>,
}

impl ArtifactRecovery {
    /// An entry holding only one issue.
    #[must_use]
    pub fn failed(stage: IssueStage, err: &BrecError) -> Self {
        Self {
            issues: vec![RecoveryIssue::from_error(stage, err)],
            ..Self::default()
        }
    }

    pub fn count_by_source(&self, source: RecordSource) -> usize {
        self.candidates.iter().filter(|c| c.source == source).count()
    }
}

/// Artifact-type name → recovery outcome. Built fresh per scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScanResult {
    pub artifacts: BTreeMap<String, ArtifactRecovery>,
}

impl ScanResult {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArtifactRecovery> {
        self.artifacts.get(name)
    }

    pub fn total_candidates(&self) -> usize {
        self.artifacts.values().map(|a| a.candidates.len()).sum()
    }

    /// True when at least one type recorded an issue.
    pub fn has_issues(&self) -> bool {
        self.artifacts.values().any(|a| !a.issues.is_empty())
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_serializes_with_tier_tag() {
        let high = serde_json::to_value(Confidence::High).unwrap();
        assert_eq!(high, serde_json::json!({"tier": "high"}));
        let medium = serde_json::to_value(Confidence::Medium { score: 0.75 }).unwrap();
        assert_eq!(medium, serde_json::json!({"tier": "medium", "score": 0.75}));
        let low = serde_json::to_value(Confidence::Low).unwrap();
        assert_eq!(low, serde_json::json!({"tier": "low"}));
    }

    #[test]
    fn structured_records_omit_offset() {
        let record = CandidateRecord::structured("[\"hi\"]".to_string());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("offset").is_none());
        assert_eq!(json["source"], "structured");
        assert_eq!(record.confidence, Confidence::High);
    }

    #[test]
    fn carved_records_start_low_with_offset() {
        let record = CandidateRecord::carved("call me later".to_string(), 42);
        assert_eq!(record.confidence, Confidence::Low);
        assert_eq!(record.offset, Some(42));
    }

    #[test]
    fn issue_captures_error_code() {
        let err = BrecError::QueryFailed {
            artifact: "Notes".to_string(),
            details: "no such table: ZNOTE".to_string(),
        };
        let issue = RecoveryIssue::from_error(IssueStage::Structured, &err);
        assert_eq!(issue.code, "BREC-2002");
        assert!(issue.message.contains("ZNOTE"));
    }

    #[test]
    fn scan_result_serializes_as_plain_map() {
        let mut result = ScanResult::default();
        result.artifacts.insert(
            "Messages".to_string(),
            ArtifactRecovery {
                candidates: vec![CandidateRecord::structured("[1]".to_string())],
                ..ArtifactRecovery::default()
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["Messages"]["candidates"][0]["text"], "[1]");
        assert_eq!(result.total_candidates(), 1);
        assert!(!result.has_issues());
    }

    #[test]
    fn medium_label_shows_score() {
        assert_eq!(Confidence::Medium { score: 0.834 }.label(), "Medium (AI: 0.83)");
    }
}
