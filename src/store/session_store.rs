//! Crash-safe JSON session store.
//!
//! Three documents under `<data_dir>/persistence/` hold all structured state:
//! `sessions.json`, `topic_history.json`, `user_progress.json`. Recordings
//! live under `<data_dir>/recordings/` as `session_<uuid>.wav`. Documents are
//! loaded wholesale at construction and rewritten wholesale on every
//! mutation, via the atomic helpers in [`super::persist`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{FeedbackResult, PracticeSession, TopicHistory, UserProgress};
use super::persist::{load_json_or_none, save_json_atomic};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Total disk footprint of the store, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub recordings_bytes: u64,
    pub persistence_bytes: u64,
}

impl StorageUsage {
    pub fn total_bytes(&self) -> u64 {
        self.recordings_bytes + self.persistence_bytes
    }
}

pub struct SessionStore {
    persistence_dir: PathBuf,
    recordings_dir: PathBuf,
    sessions: Vec<PracticeSession>,
    topic_history: Vec<TopicHistory>,
    progress: UserProgress,
}

impl SessionStore {
    /// Open (or initialize) the store rooted at `data_dir`.
    ///
    /// `user_progress.json` is derivable state. When it is missing or
    /// unreadable while sessions exist, it is recomputed from the sessions
    /// collection and rewritten.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let persistence_dir = data_dir.join("persistence");
        let recordings_dir = data_dir.join("recordings");
        std::fs::create_dir_all(&persistence_dir)
            .with_context(|| format!("Failed to create {}", persistence_dir.display()))?;
        std::fs::create_dir_all(&recordings_dir)
            .with_context(|| format!("Failed to create {}", recordings_dir.display()))?;

        let sessions: Vec<PracticeSession> =
            load_json_or_none(&persistence_dir.join("sessions.json")).unwrap_or_default();
        let topic_history: Vec<TopicHistory> =
            load_json_or_none(&persistence_dir.join("topic_history.json")).unwrap_or_default();

        let progress = match load_json_or_none::<UserProgress>(
            &persistence_dir.join("user_progress.json"),
        ) {
            Some(progress) => progress,
            None => {
                let mut rebuilt = UserProgress::default();
                if !sessions.is_empty() {
                    info!("Rebuilding user progress from {} sessions", sessions.len());
                    rebuilt.recalculate(&sessions);
                    save_json_atomic(&persistence_dir.join("user_progress.json"), &rebuilt)?;
                }
                rebuilt
            }
        };

        Ok(Self {
            persistence_dir,
            recordings_dir,
            sessions,
            topic_history,
            progress,
        })
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Full path to a session's recording, rebuilt from the stored filename.
    pub fn audio_path(&self, session: &PracticeSession) -> PathBuf {
        self.recordings_dir.join(&session.audio_file_name)
    }

    /// Move a finalized recording into the store, transferring ownership.
    ///
    /// Returns the filename under the recordings directory.
    pub fn save_audio_file(&self, temp_path: &Path, session_id: Uuid) -> Result<String> {
        let file_name = format!("session_{session_id}.wav");
        let dest = self.recordings_dir.join(&file_name);

        // Rename fails across filesystems; fall back to copy + remove.
        if std::fs::rename(temp_path, &dest).is_err() {
            std::fs::copy(temp_path, &dest)
                .with_context(|| format!("Failed to copy recording to {}", dest.display()))?;
            std::fs::remove_file(temp_path)
                .with_context(|| format!("Failed to remove {}", temp_path.display()))?;
        }

        Ok(file_name)
    }

    /// Persist a new session and record the attempt in topic history. A
    /// session arriving with feedback already attached is folded into the
    /// progress averages immediately.
    pub fn create_session(&mut self, session: PracticeSession) -> Result<()> {
        match self
            .topic_history
            .iter_mut()
            .find(|h| h.topic_id == session.topic_id)
        {
            Some(history) => history.record_attempt(session.id, session.date),
            None => {
                let mut history = TopicHistory::new(session.topic_id, session.date);
                history.record_attempt(session.id, session.date);
                self.topic_history.push(history);
            }
        }

        let scored = session.feedback.is_some();
        if let Some(feedback) = &session.feedback {
            self.progress.update_with_feedback(feedback);
        }

        self.sessions.push(session);
        self.save_sessions()?;
        self.save_topic_history()?;
        if scored {
            self.save_progress()?;
        }
        Ok(())
    }

    /// Attach scoring feedback to an existing session and fold it into the
    /// running progress averages.
    pub fn attach_feedback(
        &mut self,
        session_id: Uuid,
        feedback: FeedbackResult,
    ) -> Result<(), StoreError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        session.feedback = Some(feedback.clone());
        self.progress.update_with_feedback(&feedback);

        self.save_sessions()?;
        self.save_progress()?;
        Ok(())
    }

    /// Attach a transcript. No aggregate impact.
    pub fn attach_transcript(
        &mut self,
        session_id: Uuid,
        transcript: String,
    ) -> Result<(), StoreError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        session.transcript = Some(transcript);
        self.save_sessions()?;
        Ok(())
    }

    /// Delete a session, its recording, and its topic-history entry.
    ///
    /// A failure to remove the audio file is logged and does not block the
    /// record deletion. Progress is fully recalculated afterwards since
    /// incremental removal from a running average is not exact.
    pub fn delete_session(&mut self, session_id: Uuid) -> Result<(), StoreError> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.id == session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        let session = self.sessions.remove(index);
        let audio_path = self.audio_path(&session);
        if audio_path.exists() {
            if let Err(e) = std::fs::remove_file(&audio_path) {
                warn!("Failed to delete {}: {}", audio_path.display(), e);
            }
        }

        if let Some(pos) = self
            .topic_history
            .iter()
            .position(|h| h.topic_id == session.topic_id)
        {
            let history = &mut self.topic_history[pos];
            history.session_ids.retain(|id| *id != session_id);
            history.attempt_count = history.session_ids.len();
            if history.session_ids.is_empty() {
                self.topic_history.remove(pos);
            } else {
                let last_date = self
                    .sessions
                    .iter()
                    .filter(|s| s.topic_id == session.topic_id)
                    .map(|s| s.date)
                    .max();
                if let Some(date) = last_date {
                    self.topic_history[pos].last_attempt_date = date;
                }
            }
        }

        self.progress.recalculate(&self.sessions);

        self.save_sessions()?;
        self.save_topic_history()?;
        self.save_progress()?;
        Ok(())
    }

    /// Remove every session, recording, and aggregate.
    pub fn clear_all(&mut self) -> Result<()> {
        for session in &self.sessions {
            let path = self.recordings_dir.join(&session.audio_file_name);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to delete {}: {}", path.display(), e);
                }
            }
        }

        self.sessions.clear();
        self.topic_history.clear();
        self.progress.reset();

        self.save_sessions()?;
        self.save_topic_history()?;
        self.save_progress()?;
        Ok(())
    }

    /// All sessions, newest first.
    pub fn all_sessions(&self) -> Vec<PracticeSession> {
        let mut sessions = self.sessions.clone();
        sessions.sort_by(|a, b| b.date.cmp(&a.date));
        sessions
    }

    pub fn session(&self, session_id: Uuid) -> Option<&PracticeSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn sessions_for_topic(&self, topic_id: Uuid) -> Vec<PracticeSession> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| s.topic_id == topic_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.date.cmp(&a.date));
        sessions
    }

    pub fn topic_histories(&self) -> &[TopicHistory] {
        &self.topic_history
    }

    pub fn progress(&self) -> &UserProgress {
        &self.progress
    }

    pub fn storage_usage(&self) -> StorageUsage {
        StorageUsage {
            recordings_bytes: dir_size(&self.recordings_dir),
            persistence_bytes: dir_size(&self.persistence_dir),
        }
    }

    fn save_sessions(&self) -> Result<()> {
        save_json_atomic(&self.persistence_dir.join("sessions.json"), &self.sessions)
    }

    fn save_topic_history(&self) -> Result<()> {
        save_json_atomic(
            &self.persistence_dir.join("topic_history.json"),
            &self.topic_history,
        )
    }

    fn save_progress(&self) -> Result<()> {
        save_json_atomic(
            &self.persistence_dir.join("user_progress.json"),
            &self.progress,
        )
    }
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}
