pub mod audio;
pub mod config;
pub mod orchestrator;
pub mod scoring;
pub mod store;
pub mod topics;
pub mod transcribe;
pub mod trend;

pub use audio::{AudioCapture, AudioFrame, AudioPlayback, CaptureBackend, FileBackend};
pub use config::Config;
pub use orchestrator::{RecordingOrchestrator, RecordingState};
pub use scoring::{ScoringClient, ScoringError};
pub use store::{FeedbackResult, PracticeSession, ScoreDimension, SessionStore, Topic, UserProgress};
pub use transcribe::TranscriptionPipeline;
pub use trend::TrendDirection;
