//! Cue text sources.
//!
//! Arbitration asks a [`CueSource`] for the words of a cue. Two sources are
//! provided: [`TemplateCueSource`] answers from static templates, and
//! [`RemoteCueSource`] delegates to a [`CueTextGenerator`] (for example a
//! language-model service) and caches each answer by exercise, topic and
//! severity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use posecoach_core::Side;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cue::CueTopic;
use super::templates;
use crate::config::{ExerciseId, Severity};
use crate::fsm::{CoachEvent, EventKind, HintSuggestion};

/// Cue source failures. Never shown to the user.
#[derive(Debug, Error)]
pub enum CueSourceError {
    /// Backend could not be reached or refused the request
    #[error("Cue source unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with nothing usable
    #[error("Cue source returned empty text")]
    Empty,

    /// Render budget exhausted
    #[error("Cue source timed out after {0}ms")]
    Timeout(u64),
}

/// What a cue should say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueRequest {
    /// Exercise
    pub exercise: ExerciseId,
    /// Side for unilateral exercises
    pub side: Option<Side>,
    /// Topic
    pub topic: CueTopic,
    /// Severity, for issues
    pub severity: Option<Severity>,
    /// Reframe suggestion, for hints
    pub suggestion: Option<HintSuggestion>,
}

impl CueRequest {
    /// Build the request for an FSM event.
    pub fn from_event(event: &CoachEvent) -> Self {
        let (severity, suggestion) = match &event.kind {
            EventKind::CoachIssue { severity, .. } => (Some(*severity), None),
            EventKind::WaitingHint(hint) => (None, Some(hint.suggestion)),
            EventKind::HoldGood => (None, None),
        };
        Self {
            exercise: event.exercise,
            side: event.side,
            topic: CueTopic::of(&event.kind),
            severity,
            suggestion,
        }
    }

    /// Side-agnostic cache key.
    pub fn cache_key(&self) -> TemplateKey {
        TemplateKey {
            exercise: self.exercise,
            topic: self.topic,
            severity: self.severity,
            suggestion: self.suggestion,
        }
    }
}

/// Cache key for cue text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// Exercise
    pub exercise: ExerciseId,
    /// Topic
    pub topic: CueTopic,
    /// Severity, for issues
    pub severity: Option<Severity>,
    /// Reframe suggestion, for hints
    pub suggestion: Option<HintSuggestion>,
}

/// Provides cue text.
#[async_trait::async_trait]
pub trait CueSource: Send + Sync {
    /// Source name
    fn name(&self) -> &str;

    /// Text for a cue, side prefix included
    async fn cue_text(&self, request: &CueRequest) -> Result<String, CueSourceError>;

    /// Text available without waiting, if any
    fn ready_text(&self, _request: &CueRequest) -> Option<String> {
        None
    }
}

/// Static templates with optional per-key overrides.
#[derive(Debug, Default)]
pub struct TemplateCueSource {
    overrides: HashMap<TemplateKey, String>,
}

impl TemplateCueSource {
    /// Source with the built-in templates only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the text for one key.
    #[must_use]
    pub fn with_template(mut self, key: TemplateKey, text: impl Into<String>) -> Self {
        self.overrides.insert(key, text.into());
        self
    }

    fn text_for(&self, request: &CueRequest) -> String {
        match self.overrides.get(&request.cache_key()) {
            Some(text) => templates::with_side(text.as_str(), request.side),
            None => templates::canned(request),
        }
    }
}

#[async_trait::async_trait]
impl CueSource for TemplateCueSource {
    fn name(&self) -> &str {
        "template"
    }

    async fn cue_text(&self, request: &CueRequest) -> Result<String, CueSourceError> {
        Ok(self.text_for(request))
    }

    fn ready_text(&self, request: &CueRequest) -> Option<String> {
        Some(self.text_for(request))
    }
}

/// Generates free-form cue text, e.g. from a language model.
#[async_trait::async_trait]
pub trait CueTextGenerator: Send + Sync {
    /// Generator name
    fn name(&self) -> &str;

    /// Side-agnostic text for a request
    async fn generate(&self, request: &CueRequest) -> Result<String, CueSourceError>;
}

/// Delegates to a generator and caches answers.
pub struct RemoteCueSource {
    generator: Arc<dyn CueTextGenerator>,
    cache: RwLock<HashMap<TemplateKey, String>>,
}

impl RemoteCueSource {
    /// Wrap a generator.
    pub fn new(generator: Arc<dyn CueTextGenerator>) -> Self {
        Self {
            generator,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached answers.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Drop all cached answers.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

impl std::fmt::Debug for RemoteCueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCueSource")
            .field("generator", &self.generator.name())
            .field("cached", &self.cached())
            .finish()
    }
}

#[async_trait::async_trait]
impl CueSource for RemoteCueSource {
    fn name(&self) -> &str {
        self.generator.name()
    }

    async fn cue_text(&self, request: &CueRequest) -> Result<String, CueSourceError> {
        if let Some(text) = self.ready_text(request) {
            return Ok(text);
        }
        let key = request.cache_key();

        let text = self.generator.generate(request).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CueSourceError::Empty);
        }

        tracing::debug!(
            generator = %self.generator.name(),
            topic = %request.topic,
            "Caching generated cue text"
        );
        self.cache.write().insert(key, text.to_string());
        Ok(templates::with_side(text, request.side))
    }

    fn ready_text(&self, request: &CueRequest) -> Option<String> {
        let cached = self.cache.read().get(&request.cache_key()).cloned()?;
        Some(templates::with_side(cached, request.side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IssueKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGenerator {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait::async_trait]
    impl CueTextGenerator for CountingGenerator {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _request: &CueRequest) -> Result<String, CueSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    fn sag(side: Option<Side>) -> CueRequest {
        CueRequest {
            exercise: ExerciseId::Plank,
            side,
            topic: CueTopic::Issue(IssueKind::HipSag),
            severity: Some(Severity::Warning),
            suggestion: None,
        }
    }

    #[tokio::test]
    async fn test_template_override() {
        let source = TemplateCueSource::new().with_template(sag(None).cache_key(), "Hips up!");
        assert_eq!(source.cue_text(&sag(None)).await.unwrap(), "Hips up!");
        assert_eq!(
            source.cue_text(&sag(Some(Side::Right))).await.unwrap(),
            "Right side. Hips up!"
        );
    }

    #[tokio::test]
    async fn test_remote_caches_by_key() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            reply: " Raise those hips. ",
        });
        let source = RemoteCueSource::new(generator.clone());
        assert!(source.ready_text(&sag(None)).is_none());

        assert_eq!(source.cue_text(&sag(None)).await.unwrap(), "Raise those hips.");
        assert_eq!(
            source.ready_text(&sag(Some(Side::Right))).as_deref(),
            Some("Right side. Raise those hips.")
        );
        assert_eq!(
            source.cue_text(&sag(Some(Side::Left))).await.unwrap(),
            "Left side. Raise those hips."
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.cached(), 1);

        source.clear_cache();
        source.cue_text(&sag(None)).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remote_rejects_empty_text() {
        let source = RemoteCueSource::new(Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
            reply: "   ",
        }));
        assert!(matches!(
            source.cue_text(&sag(None)).await,
            Err(CueSourceError::Empty)
        ));
        assert_eq!(source.cached(), 0);
    }
}
