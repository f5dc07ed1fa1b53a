//! Speech recognizer abstraction.

use std::path::Path;

use anyhow::Result;
use tokio::sync::mpsc;

/// Speech recognition authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechAuthorization {
    NotDetermined,
    Denied,
    Authorized,
}

/// Recognizer-reported error.
///
/// Some engines report the natural end of an utterance through the error
/// channel rather than a final result. Those codes are benign and resolve a
/// segment with the best partial text seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerError {
    pub code: i32,
    pub message: String,
}

impl RecognizerError {
    /// Codes 203 ("no speech detected / retry") and 216 ("request canceled
    /// at completion") accompany an otherwise successful pass.
    pub fn is_benign_completion(&self) -> bool {
        matches!(self.code, 203 | 216)
    }
}

/// One event in a recognition stream.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    /// Rolling hypothesis; later partials supersede earlier ones.
    Partial(String),
    /// Authoritative transcript for the audio.
    Final(String),
    Error(RecognizerError),
}

/// Streaming speech-to-text engine.
#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn authorization(&self) -> SpeechAuthorization;

    /// Prompt for recognition permission. Returns the resulting state.
    async fn request_permission(&self) -> SpeechAuthorization;

    /// Whether the engine can take requests right now.
    fn is_available(&self) -> bool;

    /// Recognize one audio file, streaming events until the channel closes.
    async fn recognize(&self, path: &Path) -> Result<mpsc::Receiver<RecognitionEvent>>;
}
