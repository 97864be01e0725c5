//! Session-scoped scorer: trained once in the background, read by every
//! per-type pipeline after training settles.

#![allow(missing_docs)]

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::core::config::ClassifierConfig;
use crate::core::errors::{BrecError, Result};
use crate::logger::events::{EventSink, ScanEvent};
use crate::recovery::classifier::{MlpClassifier, RelevanceScorer};
use crate::recovery::synthetic;

/// Settled scorer availability.
#[derive(Clone)]
pub enum ScorerState {
    Ready(Arc<dyn RelevanceScorer>),
    Unavailable(String),
}

impl ScorerState {
    pub fn scorer(&self) -> Option<&dyn RelevanceScorer> {
        match self {
            Self::Ready(scorer) => Some(scorer.as_ref()),
            Self::Unavailable(_) => None,
        }
    }

    /// Why no scorer is available, if one isn't.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }
}

enum Pending {
    Training(JoinHandle<Result<MlpClassifier>>),
    Ready(Arc<dyn RelevanceScorer>),
    Unavailable(String),
    Taken,
}

/// Blocks readers until the session scorer is settled, then hands out the
/// same read-only state to every caller.
pub struct ScorerGate {
    settled: OnceLock<ScorerState>,
    pending: Mutex<Pending>,
    events: Arc<dyn EventSink>,
}

impl ScorerGate {
    fn with_pending(pending: Pending, events: Arc<dyn EventSink>) -> Self {
        Self {
            settled: OnceLock::new(),
            pending: Mutex::new(pending),
            events,
        }
    }

    /// A caller-supplied scorer, available immediately.
    pub fn ready(scorer: Arc<dyn RelevanceScorer>, events: Arc<dyn EventSink>) -> Self {
        Self::with_pending(Pending::Ready(scorer), events)
    }

    /// No scorer this session. `ClassifierUnavailable` is emitted on first wait.
    pub fn unavailable(reason: impl Into<String>, events: Arc<dyn EventSink>) -> Self {
        Self::with_pending(Pending::Unavailable(reason.into()), events)
    }

    /// Start training the built-in classifier on a background thread.
    pub fn train(config: &ClassifierConfig, events: Arc<dyn EventSink>) -> Self {
        let config = config.clone();
        let thread_events = Arc::clone(&events);
        let spawned = thread::Builder::new()
            .name("brec-train".to_string())
            .spawn(move || train_session_classifier(&config, thread_events.as_ref()));
        match spawned {
            Ok(handle) => Self::with_pending(Pending::Training(handle), events),
            Err(e) => Self::unavailable(format!("failed to spawn training thread: {e}"), events),
        }
    }

    /// Wait for training to settle. Every caller sees the same state.
    pub fn wait(&self) -> &ScorerState {
        self.settled.get_or_init(|| {
            let pending = std::mem::replace(&mut *self.pending.lock(), Pending::Taken);
            let state = match pending {
                Pending::Training(handle) => match handle.join() {
                    Ok(Ok(model)) => ScorerState::Ready(Arc::new(model)),
                    Ok(Err(err)) => ScorerState::Unavailable(err.to_string()),
                    Err(_) => ScorerState::Unavailable("training thread panicked".to_string()),
                },
                Pending::Ready(scorer) => ScorerState::Ready(scorer),
                Pending::Unavailable(reason) => ScorerState::Unavailable(reason),
                Pending::Taken => ScorerState::Unavailable("scorer state lost".to_string()),
            };
            if let ScorerState::Unavailable(reason) = &state {
                self.events.emit(ScanEvent::ClassifierUnavailable {
                    reason: reason.clone(),
                });
            }
            state
        })
    }

    /// Error for recording against a type that fell back to the unfiltered path.
    pub fn unavailable_error(&self) -> Option<BrecError> {
        self.wait()
            .unavailable_reason()
            .map(|reason| BrecError::ClassifierUnavailable {
                reason: reason.to_string(),
            })
    }
}

/// Generate synthetic samples and train a fresh classifier.
pub fn train_session_classifier(
    config: &ClassifierConfig,
    events: &dyn EventSink,
) -> Result<MlpClassifier> {
    let started = Instant::now();
    events.emit(ScanEvent::ClassifierTrainingStarted {
        samples: config.samples_per_class.saturating_mul(2),
        epochs: config.epochs,
    });

    let mut rng = config
        .seed
        .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
    let data: Vec<_> = synthetic::generate(config.samples_per_class, &mut rng)
        .iter()
        .map(|sample| (sample.features(), sample.label))
        .collect();
    let (model, report) = MlpClassifier::train(&data, config, &mut rng)?;

    events.emit(ScanEvent::ClassifierTrainingCompleted {
        final_loss: report.final_loss,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    });
    Ok(model)
}
