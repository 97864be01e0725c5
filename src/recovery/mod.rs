//! Recovery pipeline: structured extraction, raw carving, relevance scoring
//! and per-type aggregation.

pub mod aggregator;
pub mod anchors;
pub mod carver;
pub mod classifier;
pub mod engine;
pub mod features;
pub mod record;
pub mod session;
pub mod structured;
pub mod synthetic;

/// Lowercase hex of `bytes`.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
