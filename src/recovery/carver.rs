//! Raw carving: printable ASCII runs pulled from untrusted file bytes.
//!
//! The whole file is read once. Runs are leftmost-longest, so results never
//! overlap and arrive in ascending offset order.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use memchr::memmem::Finder;
use regex::bytes::Regex;
use sha2::{Digest, Sha256};

use crate::core::config::CarvingConfig;
use crate::core::errors::{BrecError, Result};
use crate::recovery::hex_encode;
use crate::recovery::record::EvidenceDigest;

/// One printable run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarvedString {
    pub text: String,
    pub offset: u64,
}

/// Output of carving one file.
#[derive(Debug, Clone)]
pub struct CarveOutcome {
    /// Accepted runs only.
    pub strings: Vec<CarvedString>,
    pub evidence: EvidenceDigest,
}

/// Printable-run scanner bound to one artifact type's signatures.
pub struct RawCarver {
    run: Regex,
    signatures: Vec<Finder<'static>>,
    sentence_min_chars: usize,
}

impl RawCarver {
    pub fn new(signatures: &[String], config: &CarvingConfig) -> Result<Self> {
        if config.min_run_length == 0 {
            return Err(BrecError::InvalidConfig {
                details: "carving.min_run_length must be >= 1".to_string(),
            });
        }
        let pattern = format!(r"(?-u)[\x20-\x7E]{{{},}}", config.min_run_length);
        let run = Regex::new(&pattern).map_err(|e| BrecError::InvalidConfig {
            details: format!("carving pattern rejected: {e}"),
        })?;
        let signatures = signatures
            .iter()
            .filter(|sig| !sig.is_empty())
            .map(|sig| Finder::new(sig.to_ascii_lowercase().as_bytes()).into_owned())
            .collect();
        Ok(Self {
            run,
            signatures,
            sentence_min_chars: config.sentence_min_chars,
        })
    }

    /// Every maximal printable run of at least the minimum length.
    pub fn runs<'a>(&'a self, bytes: &'a [u8]) -> impl Iterator<Item = CarvedString> + 'a {
        self.run.find_iter(bytes).map(|m| CarvedString {
            // The match class is printable ASCII, so this never replaces anything.
            text: String::from_utf8_lossy(m.as_bytes()).into_owned(),
            offset: m.start() as u64,
        })
    }

    /// Signature match, or "looks like a sentence".
    pub fn is_relevant(&self, text: &str) -> bool {
        self.matches_signature(text)
            || (text.len() > self.sentence_min_chars && text.contains(' '))
    }

    fn matches_signature(&self, text: &str) -> bool {
        if self.signatures.is_empty() {
            return false;
        }
        let lowered = text.to_ascii_lowercase();
        self.signatures
            .iter()
            .any(|finder| finder.find(lowered.as_bytes()).is_some())
    }

    /// Accepted runs of an in-memory buffer.
    pub fn carve_bytes(&self, bytes: &[u8]) -> Vec<CarvedString> {
        self.runs(bytes)
            .filter(|carved| self.is_relevant(&carved.text))
            .collect()
    }

    /// Read `path` once, digest it and carve it.
    pub fn carve_file(&self, path: &Path) -> Result<CarveOutcome> {
        let bytes = fs::read(path).map_err(|source| BrecError::CarveIo {
            path: path.to_path_buf(),
            source,
        })?;
        let evidence = digest(&bytes);
        Ok(CarveOutcome {
            strings: self.carve_bytes(&bytes),
            evidence,
        })
    }
}

/// SHA-256 and length of `bytes`.
#[must_use]
pub fn digest(bytes: &[u8]) -> EvidenceDigest {
    EvidenceDigest {
        sha256: hex_encode(&Sha256::digest(bytes)),
        bytes: bytes.len() as u64,
    }
}

/// Digest a file without carving it.
pub fn digest_file(path: &Path) -> Result<EvidenceDigest> {
    fs::read(path)
        .map(|bytes| digest(&bytes))
        .map_err(|source| BrecError::CarveIo {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carver(signatures: &[&str]) -> RawCarver {
        let sigs: Vec<String> = signatures.iter().map(|s| (*s).to_string()).collect();
        RawCarver::new(&sigs, &CarvingConfig::default()).unwrap()
    }

    #[test]
    fn signature_match_accepts_whole_run() {
        let found = carver(&["foo"]).carve_bytes(b"xxx foo bar baz quux");
        assert_eq!(
            found,
            vec![CarvedString {
                text: "xxx foo bar baz quux".to_string(),
                offset: 0,
            }]
        );
    }

    #[test]
    fn short_run_without_signature_or_space_is_rejected() {
        assert!(carver(&["foo"]).carve_bytes(b"abcdefghij").is_empty());
    }

    #[test]
    fn single_run_reports_its_start_offset() {
        let mut bytes = vec![0u8; 37];
        bytes.extend_from_slice(b"message body here");
        bytes.extend_from_slice(&[0xff, 0x00, 0x01]);
        let runs: Vec<CarvedString> = carver(&["message"]).runs(&bytes).collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].offset, 37);
        assert_eq!(runs[0].text, "message body here");
    }

    #[test]
    fn runs_below_minimum_length_are_ignored() {
        let runs: Vec<CarvedString> = carver(&[]).runs(b"abc\x00defg\x01hi").collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "defg");
        assert_eq!(runs[0].offset, 4);
    }

    #[test]
    fn signature_match_is_case_insensitive() {
        let c = carver(&["whatsapp"]);
        assert!(c.is_relevant("WhatsApp"));
        assert!(!c.is_relevant("whats"));
    }

    #[test]
    fn sentence_rule_needs_length_over_threshold_and_a_space() {
        let c = carver(&[]);
        // 15 chars with a space: not strictly longer than 15.
        assert!(!c.is_relevant("abcdefg hijklmn"));
        assert!(c.is_relevant("abcdefg hijklmno"));
        assert!(!c.is_relevant("abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn zero_min_run_length_is_rejected() {
        let cfg = CarvingConfig {
            min_run_length: 0,
            ..CarvingConfig::default()
        };
        assert!(RawCarver::new(&[], &cfg).is_err());
    }

    #[test]
    fn carve_file_digests_what_it_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"").unwrap();
        let outcome = carver(&["x"]).carve_file(&path).unwrap();
        assert!(outcome.strings.is_empty());
        assert_eq!(outcome.evidence.bytes, 0);
        assert_eq!(
            outcome.evidence.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn carve_file_missing_path_is_carve_io() {
        let err = carver(&["x"])
            .carve_file(Path::new("/nonexistent/brec/evidence.db"))
            .unwrap_err();
        assert_eq!(err.code(), "BREC-2003");
    }
}
