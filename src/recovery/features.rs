//! Fixed-length feature vectors for carved text spans.

#![allow(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;

use crate::recovery::anchors::{AnchorSet, EMAIL, PHONE};

/// Number of features fed to a relevance scorer.
pub const FEATURE_COUNT: usize = 5;

const LENGTH_SATURATION: usize = 1000;
const ANCHOR_SATURATION: usize = 10;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date pattern is valid"));

/// Five components, each in [0, 1]:
/// length, anchor density, byte entropy / 8, contact anchor flag, date flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    #[must_use]
    pub const fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

/// Shannon entropy in bits per byte. `0.0` for empty input.
#[must_use]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0u64; 256];
    for &byte in data {
        freq[usize::from(byte)] += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / n;
            // p * log2(1/p) keeps every term non-negative.
            p * p.recip().log2()
        })
        .sum()
}

/// Derive the feature vector for one text span.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn extract_features(text: &str, anchors: &AnchorSet) -> FeatureVector {
    let length = text.len().min(LENGTH_SATURATION) as f64 / LENGTH_SATURATION as f64;
    let density = anchors.total().min(ANCHOR_SATURATION) as f64 / ANCHOR_SATURATION as f64;
    let entropy = (shannon_entropy(text.as_bytes()) / 8.0).clamp(0.0, 1.0);
    let contact = if anchors.has(PHONE) || anchors.has(EMAIL) {
        1.0
    } else {
        0.0
    };
    let date = if ISO_DATE_RE.is_match(text) { 1.0 } else { 0.0 };
    FeatureVector([length, density, entropy, contact, date])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_edge_cases() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[0x41; 64]), 0.0);
        let all: Vec<u8> = (0..=255).collect();
        assert!((shannon_entropy(&all) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn two_symbol_entropy_is_one_bit() {
        assert!((shannon_entropy(b"abababab") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn length_saturates_at_one_thousand() {
        let long = "a".repeat(5000);
        let FeatureVector(v) = extract_features(&long, &AnchorSet::new());
        assert_eq!(v[0], 1.0);
        let FeatureVector(v) = extract_features(&"a".repeat(250), &AnchorSet::new());
        assert!((v[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn anchors_drive_density_and_contact_flag() {
        let mut anchors = AnchorSet::new();
        for i in 0..12 {
            anchors.insert(PHONE, format!("+1555000{i:04}"));
        }
        let FeatureVector(v) = extract_features("call", &anchors);
        assert_eq!(v[1], 1.0);
        assert_eq!(v[3], 1.0);

        let mut other = AnchorSet::new();
        other.insert("url", "https://example.com");
        let FeatureVector(v) = extract_features("x", &other);
        assert!((v[1] - 0.1).abs() < 1e-12);
        assert_eq!(v[3], 0.0);
    }

    #[test]
    fn iso_date_flag() {
        let FeatureVector(v) = extract_features("due 2023-04-01 noon", &AnchorSet::new());
        assert_eq!(v[4], 1.0);
        let FeatureVector(v) = extract_features("due 2023/04/01", &AnchorSet::new());
        assert_eq!(v[4], 0.0);
    }

    #[test]
    fn empty_text_features() {
        let FeatureVector(v) = extract_features("", &AnchorSet::new());
        assert_eq!(v, [0.0; FEATURE_COUNT]);
    }
}
