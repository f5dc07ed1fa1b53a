pub mod pipeline;
pub mod recognizer;
pub mod remote;

pub use pipeline::{plan_segments, TranscriptionPipeline};
pub use recognizer::{RecognitionEvent, RecognizerError, SpeechAuthorization, SpeechRecognizer};
pub use remote::RemoteRecognizer;
