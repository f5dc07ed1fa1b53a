use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::audio::CaptureError;
use crate::store::{StoreError, Topic};

/// Recording flow state machine.
///
/// `Analyzing` always returns to `Finished`, whether scoring succeeded or
/// not; failures surface through the snapshot's `analysis_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordingState {
    Idle,
    Preparing,
    Recording,
    Finished,
    Analyzing,
}

/// A failed analysis attempt, kept for user-driven retry.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFailure {
    pub message: String,
    pub retryable: bool,
}

/// Point-in-time view of the orchestrator for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSnapshot {
    pub state: RecordingState,
    pub topic: Topic,
    /// Seconds left in the preparation countdown.
    pub countdown_remaining_secs: u64,
    pub can_skip_preparation: bool,
    /// Seconds recorded so far.
    pub elapsed_secs: u64,
    pub can_stop_recording: bool,
    pub current_level: f32,
    pub recent_levels: Vec<f32>,
    pub saved_waveform: Vec<f32>,
    pub session_id: Option<Uuid>,
    pub analysis_failure: Option<AnalysisFailure>,
    /// Topic generation fell back to the bundled catalog.
    pub fallback_notice: bool,
    /// A previous run ended with a recording in progress.
    pub recovery_notice: bool,
    pub streak_count: u32,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{action} not allowed in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: RecordingState,
    },
    #[error("a timer is already running")]
    TimerActive,
    #[error("cannot analyze without a saved recording")]
    NothingToAnalyze,
    #[error("recording must reach {0}s before it can be stopped")]
    StopNotAllowed(u64),
    #[error("session audio is missing, the record was removed")]
    SessionAudioMissing,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
