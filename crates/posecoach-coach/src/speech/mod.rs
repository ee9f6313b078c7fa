//! Speech output.

mod backend;
mod queue;

pub use backend::{RecordingSpeechBackend, SpeechBackend, SpeechError, TracingSpeechBackend};
pub use queue::{
    CompletionCallback, EnqueueOutcome, SpeechItem, SpeechOutcome, SpeechQueue,
    SpeechQueueConfig, SpeechQueueConfigBuilder,
};
