//! Synthetic labeled text used to train the session classifier.

#![allow(missing_docs)]

use rand::Rng;

use crate::recovery::anchors::{AnchorSet, PHONE};
use crate::recovery::features::{FeatureVector, extract_features};

/// Tokens that make noise look like SQLite schema leftovers.
const SCHEMA_TOKENS: &[&str] = &[
    "sqlite_autoindex_",
    "sqlite_sequence",
    "CREATE INDEX ",
    "index_",
];

/// One training example.
#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub text: String,
    pub anchors: AnchorSet,
    /// 1.0 relevant, 0.0 noise.
    pub label: f64,
}

impl LabeledSample {
    #[must_use]
    pub fn features(&self) -> FeatureVector {
        extract_features(&self.text, &self.anchors)
    }
}

/// Message-like text with a time of day and a phone number.
pub fn positive<R: Rng>(rng: &mut R) -> LabeledSample {
    let hour: u32 = rng.random_range(10..=23);
    let number: u64 = rng.random_range(1_000_000_000..=9_999_999_999);
    let phone = format!("+1{number}");
    let mut anchors = AnchorSet::new();
    anchors.insert(PHONE, phone.clone());
    LabeledSample {
        text: format!("Hey, let's meet at {hour}:00. Call me at {phone}"),
        anchors,
        label: 1.0,
    }
}

/// 10 to 50 random printable characters, half the time behind a schema token.
pub fn negative<R: Rng>(rng: &mut R) -> LabeledSample {
    let len: usize = rng.random_range(10..=50);
    let noise: String = (0..len)
        .map(|_| char::from(rng.random_range(0x20u8..=0x7e)))
        .collect();
    let text = if rng.random_bool(0.5) {
        let token = SCHEMA_TOKENS[rng.random_range(0..SCHEMA_TOKENS.len())];
        format!("{token}{noise}")
    } else {
        noise
    };
    LabeledSample {
        text,
        anchors: AnchorSet::new(),
        label: 0.0,
    }
}

/// `samples_per_class` positive/negative pairs, interleaved.
pub fn generate<R: Rng>(samples_per_class: usize, rng: &mut R) -> Vec<LabeledSample> {
    let mut out = Vec::with_capacity(samples_per_class * 2);
    for _ in 0..samples_per_class {
        out.push(positive(rng));
        out.push(negative(rng));
    }
    out
}
