//! Bundled topic catalog, the offline fallback for topic generation.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::store::Topic;

const BUNDLED_CATALOG: &str = include_str!("../assets/topics.json");

pub struct TopicCatalog {
    topics: Vec<Topic>,
}

impl TopicCatalog {
    /// Load the catalog compiled into the binary.
    pub fn bundled() -> Result<Self> {
        let topics: Vec<Topic> =
            serde_json::from_str(BUNDLED_CATALOG).context("Failed to parse bundled catalog")?;
        Ok(Self { topics })
    }

    pub fn from_topics(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, id: Uuid) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn random_topic(&self) -> Option<&Topic> {
        if self.topics.is_empty() {
            return None;
        }
        Some(&self.topics[pick_index(self.topics.len())])
    }

    /// Random topic avoiding the given titles, falling back to any topic
    /// when every candidate is excluded.
    pub fn random_topic_excluding(&self, exclude_titles: &[String]) -> Option<&Topic> {
        let candidates: Vec<&Topic> = self
            .topics
            .iter()
            .filter(|t| !exclude_titles.iter().any(|e| e == &t.title))
            .collect();

        if candidates.is_empty() {
            return self.random_topic();
        }
        Some(candidates[pick_index(candidates.len())])
    }
}

fn pick_index(len: usize) -> usize {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos as usize % len
}
