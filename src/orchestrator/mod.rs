pub mod app_state;
pub mod machine;
pub mod state;

pub use app_state::{AppState, AppStateFile};
pub use machine::{NoopReminder, RecordingOrchestrator, ReminderScheduler};
pub use state::{AnalysisFailure, OrchestratorError, OrchestratorSnapshot, RecordingState};
