//! Anchor detection: phone numbers and email addresses inside carved text.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

pub const PHONE: &str = "phone";
pub const EMAIL: &str = "email";

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d{10,}").expect("phone pattern is valid"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern is valid")
});

/// Anchor kind → matched strings, in match order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorSet {
    by_kind: BTreeMap<String, Vec<String>>,
}

impl AnchorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: &str, value: impl Into<String>) {
        self.by_kind
            .entry(kind.to_string())
            .or_default()
            .push(value.into());
    }

    /// Total anchors across all kinds.
    pub fn total(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// At least one anchor of `kind`.
    pub fn has(&self, kind: &str) -> bool {
        self.by_kind.get(kind).is_some_and(|values| !values.is_empty())
    }

    pub fn get(&self, kind: &str) -> &[String] {
        self.by_kind.get(kind).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Scan `text` for phone and email anchors.
#[must_use]
pub fn detect(text: &str) -> AnchorSet {
    let mut anchors = AnchorSet::new();
    for m in PHONE_RE.find_iter(text) {
        anchors.insert(PHONE, m.as_str());
    }
    for m in EMAIL_RE.find_iter(text) {
        anchors.insert(EMAIL, m.as_str());
    }
    anchors
}
