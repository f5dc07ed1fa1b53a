pub mod models;
pub mod persist;
pub mod session_store;

pub use models::{
    BandScore, BandScores, FeedbackResult, PracticeSession, ScoreDimension, Topic, TopicHistory,
    UserProgress,
};
pub use session_store::{SessionStore, StorageUsage, StoreError};
