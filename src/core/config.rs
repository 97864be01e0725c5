//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{ArtifactCatalog, CustomDescriptor};
use crate::core::errors::{BrecError, Result};

/// Full recovery-engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub carving: CarvingConfig,
    pub classifier: ClassifierConfig,
    pub engine: EngineConfig,
    pub catalog: CatalogConfig,
    pub paths: PathsConfig,
}

/// Raw string carving knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CarvingConfig {
    /// Shortest printable run worth reporting.
    pub min_run_length: usize,
    /// A run "looks like a sentence" when longer than this and containing a space.
    pub sentence_min_chars: usize,
    /// Populate phone/email anchors before feature extraction.
    pub detect_anchors: bool,
}

/// Session-local relevance classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// Fixed seed for synthetic data and weight init. `None` seeds from the OS.
    pub seed: Option<u64>,
    pub samples_per_class: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Carved candidates scoring strictly above this are promoted to Medium.
    pub accept_threshold: f64,
}

/// Per-session scheduling and result caps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub parallelism: usize,
    /// Carved candidates kept unfiltered when no classifier is available.
    pub fallback_carve_limit: usize,
}

/// User catalog extensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub custom: Vec<CustomDescriptor>,
}

/// Filesystem paths used by brec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub event_log: PathBuf,
}

impl Default for CarvingConfig {
    fn default() -> Self {
        Self {
            min_run_length: 4,
            sentence_min_chars: 15,
            detect_anchors: false,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: None,
            samples_per_class: 250,
            epochs: 20,
            batch_size: 16,
            learning_rate: 0.01,
            accept_threshold: 0.6,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            fallback_carve_limit: 50,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[BREC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("brec").join("config.toml"),
            event_log: home_dir
                .join(".local")
                .join("share")
                .join("brec")
                .join("events.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| BrecError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(BrecError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Built-in catalog merged with `[catalog.custom]`.
    pub fn build_catalog(&self) -> Result<ArtifactCatalog> {
        ArtifactCatalog::default().with_custom(&self.catalog.custom)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // carving
        if let Some(raw) = lookup("BREC_CARVING_MIN_RUN_LENGTH") {
            self.carving.min_run_length = parse_env_usize("BREC_CARVING_MIN_RUN_LENGTH", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CARVING_SENTENCE_MIN_CHARS") {
            self.carving.sentence_min_chars =
                parse_env_usize("BREC_CARVING_SENTENCE_MIN_CHARS", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CARVING_DETECT_ANCHORS") {
            self.carving.detect_anchors = parse_env_bool("BREC_CARVING_DETECT_ANCHORS", &raw)?;
        }

        // classifier
        if let Some(raw) = lookup("BREC_CLASSIFIER_ENABLED") {
            self.classifier.enabled = parse_env_bool("BREC_CLASSIFIER_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_SEED") {
            self.classifier.seed = Some(parse_env_u64("BREC_CLASSIFIER_SEED", &raw)?);
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_SAMPLES_PER_CLASS") {
            self.classifier.samples_per_class =
                parse_env_usize("BREC_CLASSIFIER_SAMPLES_PER_CLASS", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_EPOCHS") {
            self.classifier.epochs = parse_env_usize("BREC_CLASSIFIER_EPOCHS", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_BATCH_SIZE") {
            self.classifier.batch_size = parse_env_usize("BREC_CLASSIFIER_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_LEARNING_RATE") {
            self.classifier.learning_rate =
                parse_env_f64("BREC_CLASSIFIER_LEARNING_RATE", &raw)?;
        }
        if let Some(raw) = lookup("BREC_CLASSIFIER_ACCEPT_THRESHOLD") {
            self.classifier.accept_threshold =
                parse_env_f64("BREC_CLASSIFIER_ACCEPT_THRESHOLD", &raw)?;
        }

        // engine
        if let Some(raw) = lookup("BREC_ENGINE_PARALLELISM") {
            self.engine.parallelism = parse_env_usize("BREC_ENGINE_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("BREC_ENGINE_FALLBACK_CARVE_LIMIT") {
            self.engine.fallback_carve_limit =
                parse_env_usize("BREC_ENGINE_FALLBACK_CARVE_LIMIT", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("BREC_EVENT_LOG") {
            self.paths.event_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.carving.min_run_length == 0 {
            return Err(BrecError::InvalidConfig {
                details: "carving.min_run_length must be >= 1".to_string(),
            });
        }

        let classifier = &self.classifier;
        for (name, value) in [
            ("samples_per_class", classifier.samples_per_class),
            ("epochs", classifier.epochs),
            ("batch_size", classifier.batch_size),
        ] {
            if value == 0 {
                return Err(BrecError::InvalidConfig {
                    details: format!("classifier.{name} must be >= 1"),
                });
            }
        }
        if !(classifier.learning_rate.is_finite() && classifier.learning_rate > 0.0) {
            return Err(BrecError::InvalidConfig {
                details: format!(
                    "classifier.learning_rate must be a positive number, got {}",
                    classifier.learning_rate
                ),
            });
        }
        validate_prob("classifier.accept_threshold", classifier.accept_threshold)?;

        if self.engine.parallelism == 0 {
            return Err(BrecError::InvalidConfig {
                details: "engine.parallelism must be >= 1".to_string(),
            });
        }

        // Surfaces duplicate or malformed custom descriptors at load time.
        self.build_catalog()?;

        Ok(())
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(BrecError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_f64(name: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|error| BrecError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| BrecError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| BrecError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| BrecError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{BrecError, Config};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.carving.min_run_length, 4);
        assert_eq!(cfg.classifier.samples_per_class, 250);
        assert_eq!(cfg.classifier.epochs, 20);
        assert!((cfg.classifier.accept_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(cfg.engine.fallback_carve_limit, 50);
    }

    #[test]
    fn zero_min_run_length_rejected() {
        let mut cfg = Config::default();
        cfg.carving.min_run_length = 0;
        let err = cfg.validate().expect_err("expected invalid run length");
        match err {
            BrecError::InvalidConfig { details } => {
                assert!(details.contains("min_run_length"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn accept_threshold_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.classifier.accept_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_learning_rate_rejected() {
        let mut cfg = Config::default();
        cfg.classifier.learning_rate = 0.0;
        assert!(cfg.validate().is_err());
        cfg.classifier.learning_rate = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.engine.parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("BREC_CARVING_MIN_RUN_LENGTH", "6"),
            ("BREC_CARVING_DETECT_ANCHORS", "true"),
            ("BREC_CLASSIFIER_SEED", "42"),
            ("BREC_CLASSIFIER_ENABLED", "false"),
            ("BREC_ENGINE_FALLBACK_CARVE_LIMIT", "10"),
            ("BREC_EVENT_LOG", "/tmp/brec/events.jsonl"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.carving.min_run_length, 6);
        assert!(cfg.carving.detect_anchors);
        assert_eq!(cfg.classifier.seed, Some(42));
        assert!(!cfg.classifier.enabled);
        assert_eq!(cfg.engine.fallback_carve_limit, 10);
        assert_eq!(
            cfg.paths.event_log,
            PathBuf::from("/tmp/brec/events.jsonl")
        );
    }

    #[test]
    fn env_invalid_value_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("BREC_CLASSIFIER_EPOCHS", "many")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("non-numeric epochs should fail");
        assert_eq!(err.code(), "BREC-1003");
        assert!(err.to_string().contains("BREC_CLASSIFIER_EPOCHS"));
    }

    #[test]
    fn toml_sections_parse_with_defaults_for_missing_keys() {
        let cfg = Config::from_toml_str(
            r#"
            [classifier]
            seed = 7
            epochs = 5

            [[catalog.custom]]
            name = "Voicemail"
            acquisition_path = "Library/Voicemail/voicemail.db"
            primary_table = "voicemail"
            deleted_query = "SELECT sender FROM voicemail WHERE trashed_date > 0"
            carve_signatures = ["AMR", "voicemail"]
            "#,
        )
        .expect("valid toml");

        assert_eq!(cfg.classifier.seed, Some(7));
        assert_eq!(cfg.classifier.epochs, 5);
        assert_eq!(cfg.classifier.batch_size, 16);
        assert_eq!(cfg.carving.min_run_length, 4);
        let catalog = cfg.build_catalog().expect("catalog builds");
        assert_eq!(
            catalog.lookup("Voicemail").expect("custom").carve_signatures,
            vec!["amr", "voicemail"]
        );
    }

    #[test]
    fn duplicate_custom_descriptor_fails_validation() {
        let cfg = Config::from_toml_str(
            r#"
            [[catalog.custom]]
            name = "X"
            acquisition_path = "x.db"
            primary_table = "x"
            deleted_query = "SELECT 1"

            [[catalog.custom]]
            name = "X"
            acquisition_path = "y.db"
            primary_table = "y"
            deleted_query = "SELECT 2"
            "#,
        )
        .expect("valid toml");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/brec/config.toml")));
        assert!(matches!(result, Err(BrecError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nfallback_carve_limit = 3\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("config loads");
        assert_eq!(cfg.paths.config_file, path);
        assert_eq!(cfg.engine.fallback_carve_limit, 3);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut changed = cfg.clone();
        changed.classifier.epochs = 3;
        let after = changed.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash"));
    }
}
