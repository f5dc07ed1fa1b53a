//! Score trend classification over recent practice history.

use crate::store::{PracticeSession, ScoreDimension};

/// How many scored sessions are needed before a trend is reported.
const MIN_SCORED_SESSIONS: usize = 10;

/// Trend classification threshold on the window-average delta.
const TREND_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    /// Fewer than ten scored sessions on record.
    Insufficient,
}

impl TrendDirection {
    pub fn label(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "Improving",
            TrendDirection::Declining => "Declining",
            TrendDirection::Stable => "Stable",
            TrendDirection::Insufficient => "Not enough data",
        }
    }
}

/// Classify the recent trend for one score dimension.
///
/// Takes the last ten scored sessions in chronological order, averages the
/// older five and the newer five, and compares the delta against the ±0.3
/// half-band threshold (inclusive).
pub fn trend_for(sessions: &[PracticeSession], dimension: ScoreDimension) -> TrendDirection {
    let mut scored: Vec<_> = sessions.iter().filter(|s| s.feedback.is_some()).collect();
    if scored.len() < MIN_SCORED_SESSIONS {
        return TrendDirection::Insufficient;
    }

    scored.sort_by_key(|s| s.date);
    let window = &scored[scored.len() - MIN_SCORED_SESSIONS..];

    let avg = |slice: &[&PracticeSession]| -> f64 {
        slice
            .iter()
            .filter_map(|s| s.feedback.as_ref())
            .map(|f| dimension.extract(&f.bands))
            .sum::<f64>()
            / slice.len() as f64
    };

    let previous = avg(&window[..5]);
    let latest = avg(&window[5..]);
    let delta = latest - previous;

    if delta >= TREND_THRESHOLD {
        TrendDirection::Improving
    } else if delta <= -TREND_THRESHOLD {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

/// Chronological per-session scores for one dimension, for charting.
pub fn score_series(sessions: &[PracticeSession], dimension: ScoreDimension) -> Vec<f64> {
    let mut scored: Vec<_> = sessions.iter().filter(|s| s.feedback.is_some()).collect();
    scored.sort_by_key(|s| s.date);
    scored
        .iter()
        .filter_map(|s| s.feedback.as_ref())
        .map(|f| dimension.extract(&f.bands))
        .collect()
}
