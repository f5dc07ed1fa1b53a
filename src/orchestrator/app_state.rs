//! Durable flags that outlive a process crash.
//!
//! `app_state.json` holds the little state that must survive interruption:
//! whether a recording was in progress, the practice streak, and the recent
//! topic titles used to steer generation away from repeats.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::persist::{load_json_or_none, save_json_atomic};

/// Depth of the recent-topic exclusion window.
const RECENT_TOPICS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppState {
    /// Set when capture starts, cleared on a normal stop. Found set at
    /// startup it means the previous run was interrupted mid-recording.
    pub active_recording: bool,
    /// FIFO of the latest practiced topic titles, newest last.
    pub recent_topic_titles: VecDeque<String>,
    pub streak_count: u32,
    pub last_practice_date: Option<NaiveDate>,
}

pub struct AppStateFile {
    path: PathBuf,
    pub state: AppState,
}

impl AppStateFile {
    /// Load from `dir/app_state.json`, validating that the streak has not
    /// lapsed (more than one day since the last practice resets it).
    pub fn load(dir: &Path, today: NaiveDate) -> Self {
        let path = dir.join("app_state.json");
        let mut state: AppState = load_json_or_none(&path).unwrap_or_default();

        if let Some(last) = state.last_practice_date {
            if (today - last).num_days() > 1 && state.streak_count > 0 {
                info!("Streak lapsed ({} -> today), resetting", last);
                state.streak_count = 0;
            }
        }

        Self { path, state }
    }

    pub fn save(&self) -> Result<()> {
        save_json_atomic(&self.path, &self.state)
    }

    /// Record a completed practice for streak purposes.
    ///
    /// Same-day practices don't double count; a one-day gap extends the
    /// streak, anything longer starts over at one.
    pub fn record_practice(&mut self, today: NaiveDate) -> Result<()> {
        match self.state.last_practice_date {
            Some(last) if last == today => return Ok(()),
            Some(last) if (today - last).num_days() == 1 => {
                self.state.streak_count += 1;
            }
            _ => self.state.streak_count = 1,
        }
        self.state.last_practice_date = Some(today);
        self.save()
    }

    pub fn push_recent_topic(&mut self, title: String) -> Result<()> {
        if self.state.recent_topic_titles.back() == Some(&title) {
            return Ok(());
        }
        if self.state.recent_topic_titles.len() == RECENT_TOPICS {
            self.state.recent_topic_titles.pop_front();
        }
        self.state.recent_topic_titles.push_back(title);
        self.save()
    }

    pub fn recent_topics(&self) -> Vec<String> {
        self.state.recent_topic_titles.iter().cloned().collect()
    }

    pub fn set_active_recording(&mut self, active: bool) -> Result<()> {
        self.state.active_recording = active;
        self.save()
    }

    pub fn reset_streak(&mut self) -> Result<()> {
        self.state.streak_count = 0;
        self.state.last_practice_date = None;
        self.save()
    }
}
