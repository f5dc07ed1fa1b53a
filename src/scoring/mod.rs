pub mod client;

pub use client::{
    sanitize_quote, strip_code_fences, ScoringClient, ScoringError, SpeechScorer, TopicGenerator,
};
