//! Recovery engine: runs the per-type pipeline for every requested artifact
//! type on a small worker pool and assembles the `ScanResult`.
//!
//! Per type: acquire → structured query → raw carve → score → merge → release.
//! Failures are recorded on that type's entry and never stop other types.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel as channel;

use crate::acquisition::ArtifactSource;
use crate::catalog::{ArtifactCatalog, ArtifactTypeDescriptor};
use crate::core::config::Config;
use crate::core::errors::{BrecError, Result};
use crate::logger::events::{EventSink, NullSink, ScanEvent};
use crate::recovery::aggregator::{self, AggregationPolicy};
use crate::recovery::carver::{self, RawCarver};
use crate::recovery::classifier::RelevanceScorer;
use crate::recovery::record::{
    ArtifactRecovery, IssueStage, RecordSource, RecoveryIssue, ScanResult,
};
use crate::recovery::session::ScorerGate;
use crate::recovery::structured::extract_structured;

/// Cooperative cancellation flag, checked before each artifact type starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Session-scoped recovery engine.
pub struct RecoveryEngine {
    config: Config,
    catalog: ArtifactCatalog,
    policy: AggregationPolicy,
    events: Arc<dyn EventSink>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    cancel: CancelToken,
}

impl RecoveryEngine {
    /// Validate `config` and build the catalog it describes.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = config.build_catalog()?;
        Ok(Self {
            policy: AggregationPolicy::from_config(&config),
            config,
            catalog,
            events: Arc::new(NullSink),
            scorer: None,
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Use `scorer` instead of training the built-in classifier.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scorer gate for one session: injected, disabled, or trained.
    pub fn session_gate(&self) -> ScorerGate {
        let events = Arc::clone(&self.events);
        if let Some(scorer) = &self.scorer {
            ScorerGate::ready(Arc::clone(scorer), events)
        } else if self.config.classifier.enabled {
            ScorerGate::train(&self.config.classifier, events)
        } else {
            ScorerGate::unavailable("classifier disabled by configuration", events)
        }
    }

    /// Scan every requested type. Always returns an entry per distinct name.
    pub fn scan(&self, requested: &[String], source: &dyn ArtifactSource) -> ScanResult {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let names: Vec<&str> = requested
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect();

        self.events.emit(ScanEvent::SessionStarted {
            types: names.len(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
        });

        let mut result = ScanResult::default();
        let mut supported = Vec::new();
        for name in &names {
            if let Some(descriptor) = self.catalog.lookup(name) {
                supported.push(descriptor);
            } else {
                let err = BrecError::UnsupportedArtifact {
                    name: (*name).to_string(),
                };
                self.emit_issue(name, &RecoveryIssue::from_error(IssueStage::Catalog, &err));
                result
                    .artifacts
                    .insert((*name).to_string(), ArtifactRecovery::failed(IssueStage::Catalog, &err));
            }
        }

        if !supported.is_empty() {
            let gate = self.session_gate();
            for (name, recovery) in self.run_workers(&supported, source, &gate) {
                result.artifacts.insert(name, recovery);
            }
            // Join training even when nothing needed scoring.
            let _ = gate.wait();
        }

        self.events.emit(ScanEvent::SessionCompleted {
            types: result.len(),
            candidates: result.total_candidates(),
            duration_ms: elapsed_ms(started),
        });
        result
    }

    fn run_workers(
        &self,
        supported: &[&ArtifactTypeDescriptor],
        source: &dyn ArtifactSource,
        gate: &ScorerGate,
    ) -> Vec<(String, ArtifactRecovery)> {
        let workers = self.config.engine.parallelism.clamp(1, supported.len());
        let (work_tx, work_rx) = channel::bounded::<&ArtifactTypeDescriptor>(supported.len());
        let (result_tx, result_rx) = channel::unbounded::<(String, ArtifactRecovery)>();
        for &descriptor in supported {
            let _ = work_tx.send(descriptor);
        }
        drop(work_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for descriptor in work_rx.iter() {
                        let recovery = self.process_type_isolated(descriptor, source, gate);
                        let _ = result_tx.send((descriptor.name.clone(), recovery));
                    }
                });
            }
        });
        drop(result_tx);
        result_rx.iter().collect()
    }

    /// `process_type`, with a panic (e.g. from an injected scorer) recorded
    /// against this type only.
    fn process_type_isolated(
        &self,
        descriptor: &ArtifactTypeDescriptor,
        source: &dyn ArtifactSource,
        gate: &ScorerGate,
    ) -> ArtifactRecovery {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_type(descriptor, source, gate)
        }));
        outcome.unwrap_or_else(|payload| {
            let err = BrecError::Runtime {
                details: format!(
                    "{} pipeline panicked: {}",
                    descriptor.name,
                    panic_message(payload.as_ref())
                ),
            };
            let recovery = ArtifactRecovery::failed(IssueStage::Internal, &err);
            for issue in &recovery.issues {
                self.emit_issue(&descriptor.name, issue);
            }
            recovery
        })
    }

    fn process_type(
        &self,
        descriptor: &ArtifactTypeDescriptor,
        source: &dyn ArtifactSource,
        gate: &ScorerGate,
    ) -> ArtifactRecovery {
        let name = &descriptor.name;
        if self.cancel.is_cancelled() {
            let err = BrecError::Cancelled {
                artifact: name.clone(),
            };
            return ArtifactRecovery::failed(IssueStage::Cancelled, &err);
        }

        let started = Instant::now();
        self.events.emit(ScanEvent::ArtifactScanStarted {
            artifact: name.clone(),
        });

        let recovery = match source.acquire(descriptor) {
            Ok(acquired) => {
                let mut recovery = self.recover_file(acquired.path(), descriptor, gate);
                if let Err(err) = acquired.release() {
                    recovery
                        .issues
                        .push(RecoveryIssue::from_error(IssueStage::Acquisition, &err));
                }
                recovery
            }
            Err(err) => ArtifactRecovery::failed(IssueStage::Acquisition, &err),
        };

        for issue in &recovery.issues {
            self.emit_issue(name, issue);
        }
        self.events.emit(ScanEvent::ArtifactScanCompleted {
            artifact: name.clone(),
            structured: recovery.count_by_source(RecordSource::Structured),
            carved: recovery.count_by_source(RecordSource::Carved),
            duration_ms: elapsed_ms(started),
        });
        recovery
    }

    /// Run the pipeline for one already-acquired file.
    pub fn recover_file(
        &self,
        path: &Path,
        descriptor: &ArtifactTypeDescriptor,
        gate: &ScorerGate,
    ) -> ArtifactRecovery {
        let mut issues = Vec::new();

        let structured = extract_structured(path, descriptor).unwrap_or_else(|err| {
            issues.push(RecoveryIssue::from_error(IssueStage::Structured, &err));
            Vec::new()
        });

        let (carved, evidence) = if descriptor.is_carvable() {
            match RawCarver::new(&descriptor.carve_signatures, &self.config.carving)
                .and_then(|carver| carver.carve_file(path))
            {
                Ok(outcome) => (outcome.strings, Some(outcome.evidence)),
                Err(err) => {
                    issues.push(RecoveryIssue::from_error(IssueStage::Carve, &err));
                    (Vec::new(), None)
                }
            }
        } else {
            match carver::digest_file(path) {
                Ok(evidence) => (Vec::new(), Some(evidence)),
                Err(err) => {
                    issues.push(RecoveryIssue::from_error(IssueStage::Carve, &err));
                    (Vec::new(), None)
                }
            }
        };

        let candidates = if carved.is_empty() {
            structured
        } else {
            let state = gate.wait();
            if let Some(err) = gate.unavailable_error() {
                issues.push(RecoveryIssue::from_error(IssueStage::Classifier, &err));
            }
            aggregator::merge(structured, carved, state.scorer(), &self.policy)
        };

        ArtifactRecovery {
            candidates,
            issues,
            evidence,
        }
    }

    fn emit_issue(&self, artifact: &str, issue: &RecoveryIssue) {
        self.events.emit(ScanEvent::ArtifactError {
            artifact: artifact.to_string(),
            code: issue.code.clone(),
            message: issue.message.clone(),
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
