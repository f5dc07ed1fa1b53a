use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A speaking topic: a title plus optional cue-card prompts.
///
/// Topics are immutable once loaded. They come from the bundled catalog or
/// from the remote generator; identity is the `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    /// Optional bullet points guiding the response (3-4 short lines).
    pub prompts: Option<Vec<String>>,
}

/// One sub-score of the structured speech assessment (0.0-9.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandScore {
    pub score: f64,
    pub comment: String,
}

/// The four assessment dimensions returned by the scoring service.
///
/// The wire name for the lexical band is `lexical_resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandScores {
    pub fluency: BandScore,
    #[serde(rename = "lexical_resource")]
    pub lexical: BandScore,
    pub grammar: BandScore,
    pub pronunciation: BandScore,
}

impl BandScores {
    /// All four scores lie within the valid 0.0-9.0 band range.
    pub fn all_in_range(&self) -> bool {
        [
            self.fluency.score,
            self.lexical.score,
            self.grammar.score,
            self.pronunciation.score,
        ]
        .iter()
        .all(|s| (0.0..=9.0).contains(s))
    }

    /// Mean of the four band scores.
    pub fn overall(&self) -> f64 {
        (self.fluency.score + self.lexical.score + self.grammar.score + self.pronunciation.score)
            / 4.0
    }
}

/// Structured feedback returned by the remote scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub summary: String,
    pub action_tip: String,
    pub bands: BandScores,
    pub quote: String,
}

/// A single recorded practice attempt.
///
/// `audio_file_name` stores the bare filename only; the full path is rebuilt
/// from the store's recordings directory so records survive data-directory
/// relocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub topic_id: Uuid,
    /// Denormalized topic title, avoids a catalog lookup on display.
    pub topic_title: String,
    pub audio_file_name: String,
    /// Recording duration in seconds.
    pub duration: f64,
    /// Absent until the remote scoring call succeeds.
    pub feedback: Option<FeedbackResult>,
    /// Absent until transcription succeeds or when it is disabled.
    pub transcript: Option<String>,
}

impl PracticeSession {
    pub fn has_feedback(&self) -> bool {
        self.feedback.is_some()
    }

    pub fn has_transcript(&self) -> bool {
        self.transcript.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Per-topic practice aggregate, created on the first session for a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicHistory {
    pub topic_id: Uuid,
    pub first_attempt_date: DateTime<Utc>,
    pub last_attempt_date: DateTime<Utc>,
    pub attempt_count: usize,
    pub session_ids: Vec<Uuid>,
}

impl TopicHistory {
    pub fn new(topic_id: Uuid, date: DateTime<Utc>) -> Self {
        Self {
            topic_id,
            first_attempt_date: date,
            last_attempt_date: date,
            attempt_count: 0,
            session_ids: Vec::new(),
        }
    }

    pub fn record_attempt(&mut self, session_id: Uuid, date: DateTime<Utc>) {
        self.session_ids.push(session_id);
        self.attempt_count += 1;
        self.last_attempt_date = date;
    }
}

/// Which score dimension a query or trend computation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreDimension {
    Fluency,
    Lexical,
    Grammar,
    Pronunciation,
    /// Mean of the four band categories.
    Overall,
}

impl ScoreDimension {
    pub fn extract(&self, bands: &BandScores) -> f64 {
        match self {
            ScoreDimension::Fluency => bands.fluency.score,
            ScoreDimension::Lexical => bands.lexical.score,
            ScoreDimension::Grammar => bands.grammar.score,
            ScoreDimension::Pronunciation => bands.pronunciation.score,
            ScoreDimension::Overall => bands.overall(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreDimension::Fluency => "Fluency",
            ScoreDimension::Lexical => "Lexical",
            ScoreDimension::Grammar => "Grammar",
            ScoreDimension::Pronunciation => "Pronunciation",
            ScoreDimension::Overall => "Overall",
        }
    }
}

/// Singleton running aggregate over all sessions that received feedback.
///
/// Averages are maintained incrementally on feedback attach (O(1) per
/// session) and recomputed from scratch only after a deletion, where
/// incremental removal would not be numerically equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub total_sessions: usize,
    pub average_fluency: f64,
    pub average_lexical: f64,
    pub average_grammar: f64,
    pub average_pronunciation: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            total_sessions: 0,
            average_fluency: 0.0,
            average_lexical: 0.0,
            average_grammar: 0.0,
            average_pronunciation: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl UserProgress {
    pub fn overall_average(&self) -> f64 {
        if self.total_sessions == 0 {
            return 0.0;
        }
        (self.average_fluency
            + self.average_lexical
            + self.average_grammar
            + self.average_pronunciation)
            / 4.0
    }

    /// Enough history for meaningful personalization (5 scored sessions).
    pub fn has_enough_data(&self) -> bool {
        self.total_sessions >= 5
    }

    pub fn weakest_category(&self) -> Option<ScoreDimension> {
        self.extreme_category(|a, b| a < b)
    }

    pub fn strongest_category(&self) -> Option<ScoreDimension> {
        self.extreme_category(|a, b| a > b)
    }

    fn extreme_category(&self, better: impl Fn(f64, f64) -> bool) -> Option<ScoreDimension> {
        if self.total_sessions == 0 {
            return None;
        }
        let mut best = (ScoreDimension::Fluency, self.average_fluency);
        for candidate in [
            (ScoreDimension::Lexical, self.average_lexical),
            (ScoreDimension::Grammar, self.average_grammar),
            (ScoreDimension::Pronunciation, self.average_pronunciation),
        ] {
            if better(candidate.1, best.1) {
                best = candidate;
            }
        }
        Some(best.0)
    }

    /// Coaching hint targeting the weakest band category.
    pub fn next_focus_hint(&self) -> Option<&'static str> {
        match self.weakest_category()? {
            ScoreDimension::Fluency => Some(
                "Next time, try linking your ideas with phrases like \"that reminds me of\" or \"speaking of which.\"",
            ),
            ScoreDimension::Lexical => Some(
                "Next time, try replacing one common word with a more specific one.",
            ),
            ScoreDimension::Grammar => Some(
                "Next time, try mixing in one complex sentence, such as a \"because\" or \"although\" clause.",
            ),
            ScoreDimension::Pronunciation => Some(
                "Next time, try slowing down slightly on key words to make your pronunciation clearer.",
            ),
            ScoreDimension::Overall => None,
        }
    }

    /// Incremental running-average update: `new_avg = (old_avg * n + x) / (n + 1)`.
    pub fn update_with_feedback(&mut self, feedback: &FeedbackResult) {
        let n = self.total_sessions as f64;
        let next = n + 1.0;

        self.average_fluency = (self.average_fluency * n + feedback.bands.fluency.score) / next;
        self.average_lexical = (self.average_lexical * n + feedback.bands.lexical.score) / next;
        self.average_grammar = (self.average_grammar * n + feedback.bands.grammar.score) / next;
        self.average_pronunciation =
            (self.average_pronunciation * n + feedback.bands.pronunciation.score) / next;

        self.total_sessions += 1;
        self.last_updated = Utc::now();
    }

    /// Full rescan over the given sessions, counting only those with feedback.
    pub fn recalculate(&mut self, sessions: &[PracticeSession]) {
        let scored: Vec<&BandScores> = sessions
            .iter()
            .filter_map(|s| s.feedback.as_ref())
            .map(|f| &f.bands)
            .collect();

        if scored.is_empty() {
            self.reset();
            return;
        }

        let count = scored.len() as f64;
        self.total_sessions = scored.len();
        self.average_fluency = scored.iter().map(|b| b.fluency.score).sum::<f64>() / count;
        self.average_lexical = scored.iter().map(|b| b.lexical.score).sum::<f64>() / count;
        self.average_grammar = scored.iter().map(|b| b.grammar.score).sum::<f64>() / count;
        self.average_pronunciation =
            scored.iter().map(|b| b.pronunciation.score).sum::<f64>() / count;
        self.last_updated = Utc::now();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
