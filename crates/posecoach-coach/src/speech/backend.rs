//! Speech backends.

use parking_lot::Mutex;
use thiserror::Error;

/// Speech failures.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Backend could not speak the utterance
    #[error("Speech backend failed: {0}")]
    Backend(String),

    /// Playback was cancelled
    #[error("Speech interrupted")]
    Interrupted,

    /// Queue has been shut down
    #[error("Speech queue is closed")]
    Closed,

    /// No Tokio runtime to run the worker on
    #[error("Speech worker needs a Tokio runtime: {0}")]
    Runtime(String),
}

/// Speaks one utterance at a time.
#[async_trait::async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Speak `text`, returning when playback finished
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    /// Stop the current utterance, where supported
    async fn cancel(&self) {}
}

/// Logs utterances instead of playing them.
#[derive(Debug, Default)]
pub struct TracingSpeechBackend;

#[async_trait::async_trait]
impl SpeechBackend for TracingSpeechBackend {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        tracing::info!(text, "Speaking");
        Ok(())
    }
}

/// Keeps every utterance it is asked to speak.
#[derive(Debug, Default)]
pub struct RecordingSpeechBackend {
    spoken: Mutex<Vec<String>>,
}

impl RecordingSpeechBackend {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Utterances spoken so far, oldest first.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }
}

#[async_trait::async_trait]
impl SpeechBackend for RecordingSpeechBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().push(text.to_string());
        Ok(())
    }
}
