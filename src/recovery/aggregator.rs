//! Per-type merge of structured and carved candidates.

#![allow(missing_docs)]

use crate::core::config::Config;
use crate::recovery::anchors::{self, AnchorSet};
use crate::recovery::carver::CarvedString;
use crate::recovery::classifier::RelevanceScorer;
use crate::recovery::features::extract_features;
use crate::recovery::record::{CandidateRecord, Confidence};

/// Acceptance and capping rules for carved candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationPolicy {
    /// Accept strictly above this score.
    pub accept_threshold: f64,
    /// Carved candidates kept when no scorer is available.
    pub fallback_limit: usize,
    pub detect_anchors: bool,
}

impl AggregationPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            accept_threshold: config.classifier.accept_threshold,
            fallback_limit: config.engine.fallback_carve_limit,
            detect_anchors: config.carving.detect_anchors,
        }
    }
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Structured records first, then carved records that pass the scorer.
///
/// With no scorer, the first `fallback_limit` carved strings are kept at Low.
pub fn merge(
    structured: Vec<CandidateRecord>,
    carved: Vec<CarvedString>,
    scorer: Option<&dyn RelevanceScorer>,
    policy: &AggregationPolicy,
) -> Vec<CandidateRecord> {
    let mut out = structured;
    match scorer {
        Some(scorer) => out.extend(carved.into_iter().filter_map(|c| classify(c, scorer, policy))),
        None => out.extend(
            carved
                .into_iter()
                .take(policy.fallback_limit)
                .map(|c| CandidateRecord::carved(c.text, c.offset)),
        ),
    }
    out
}

fn classify(
    carved: CarvedString,
    scorer: &dyn RelevanceScorer,
    policy: &AggregationPolicy,
) -> Option<CandidateRecord> {
    let anchors = if policy.detect_anchors {
        anchors::detect(&carved.text)
    } else {
        AnchorSet::new()
    };
    let score = scorer.score(&extract_features(&carved.text, &anchors));
    if score > policy.accept_threshold {
        let mut record = CandidateRecord::carved(carved.text, carved.offset);
        record.confidence = Confidence::Medium { score };
        Some(record)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::features::FeatureVector;
    use crate::recovery::record::RecordSource;

    fn carved(n: usize) -> Vec<CarvedString> {
        (0..n)
            .map(|i| CarvedString {
                text: format!("carved string number {i}"),
                offset: (i * 100) as u64,
            })
            .collect()
    }

    fn policy() -> AggregationPolicy {
        AggregationPolicy {
            accept_threshold: 0.6,
            fallback_limit: 50,
            detect_anchors: false,
        }
    }

    #[test]
    fn structured_records_always_come_first() {
        let structured = vec![CandidateRecord::structured("[\"a\"]".to_string())];
        let scorer = |_: &FeatureVector| 0.9;
        let merged = merge(structured, carved(3), Some(&scorer), &policy());
        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].source, RecordSource::Structured);
        assert!(merged[1..].iter().all(|r| r.source == RecordSource::Carved));
        assert_eq!(merged[1].confidence, Confidence::Medium { score: 0.9 });
    }

    #[test]
    fn threshold_is_strict() {
        let at = |_: &FeatureVector| 0.6;
        assert!(merge(Vec::new(), carved(5), Some(&at), &policy()).is_empty());
        let above = |_: &FeatureVector| 0.600_001;
        assert_eq!(merge(Vec::new(), carved(5), Some(&above), &policy()).len(), 5);
    }

    #[test]
    fn fallback_keeps_first_n_at_low() {
        let mut p = policy();
        p.fallback_limit = 2;
        let merged = merge(Vec::new(), carved(10), None, &p);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].offset, Some(0));
        assert_eq!(merged[1].offset, Some(100));
        assert!(merged.iter().all(|r| r.confidence == Confidence::Low));
    }

    #[test]
    fn anchor_detection_feeds_features() {
        let contact_only = |f: &FeatureVector| f.0[3];
        let text = vec![CarvedString {
            text: "reach me at +15550001111 tonight".to_string(),
            offset: 7,
        }];
        assert!(merge(Vec::new(), text.clone(), Some(&contact_only), &policy()).is_empty());

        let mut p = policy();
        p.detect_anchors = true;
        let merged = merge(Vec::new(), text, Some(&contact_only), &p);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].offset, Some(7));
    }
}
