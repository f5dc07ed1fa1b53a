//! Remote scoring backend client.
//!
//! Both endpoints speak a chat-completion envelope:
//! `{"choices": [{"message": {"content": ...}}]}` where `content` is either a
//! plain string or a list of typed parts. The inner content is itself JSON,
//! possibly wrapped in a Markdown code fence, which is stripped before
//! decoding.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::store::{FeedbackResult, Topic, UserProgress};

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited, try again shortly")]
    RateLimited,
    #[error("daily request limit reached")]
    DailyLimitReached,
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid response from scoring service")]
    InvalidResponse,
}

impl ScoringError {
    /// Whether a user-driven retry is worth offering.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScoringError::DailyLimitReached)
    }
}

/// Speech assessment provider, mockable for orchestrator tests.
#[async_trait::async_trait]
pub trait SpeechScorer: Send + Sync {
    async fn analyze_speech(
        &self,
        audio_path: &Path,
        duration_secs: f64,
    ) -> Result<FeedbackResult, ScoringError>;
}

/// Topic provider, mockable for orchestrator tests.
#[async_trait::async_trait]
pub trait TopicGenerator: Send + Sync {
    async fn generate_topic(
        &self,
        progress: Option<&UserProgress>,
        exclude_recent: &[String],
    ) -> Result<Topic, ScoringError>;
}

pub struct ScoringClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    device_id: String,
}

#[derive(Deserialize)]
struct Envelope {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Content,
}

/// `content` arrives as a plain string or a list of typed parts.
#[derive(Deserialize)]
#[serde(untagged)]
enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeneratedTopic {
    title: String,
    #[serde(default)]
    prompts: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl ScoringClient {
    pub fn new(config: &ScoringConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            device_id: config.device_id.clone(),
        })
    }

    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<String, ScoringError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-Device-ID", &self.device_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ScoringError::Timeout
                } else {
                    ScoringError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ScoringError::Network(e.to_string()))?;

        if status.is_success() {
            return Ok(text);
        }

        if status.as_u16() == 429 {
            // The backend reports its per-device daily cap through the same
            // status as upstream rate limiting; only the body tells them apart.
            if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
                if body.error == "dailyLimitReached" {
                    return Err(ScoringError::DailyLimitReached);
                }
            }
            return Err(ScoringError::RateLimited);
        }

        warn!("API error [{}]: {}", status.as_u16(), truncate(&text, 500));
        Err(ScoringError::Api {
            status: status.as_u16(),
            message: text,
        })
    }

    fn extract_content(raw: &str) -> Result<String, ScoringError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|_| ScoringError::InvalidResponse)?;
        let message = envelope
            .choices
            .into_iter()
            .next()
            .ok_or(ScoringError::InvalidResponse)?
            .message;

        let content = match message.content {
            Content::Text(text) => text,
            Content::Parts(parts) => parts
                .into_iter()
                .find(|p| p.kind == "text")
                .map(|p| p.text)
                .ok_or(ScoringError::InvalidResponse)?,
        };

        Ok(strip_code_fences(&content))
    }
}

#[async_trait::async_trait]
impl SpeechScorer for ScoringClient {
    async fn analyze_speech(
        &self,
        audio_path: &Path,
        duration_secs: f64,
    ) -> Result<FeedbackResult, ScoringError> {
        // Encode off the async runtime; recordings run to a couple of MB.
        let path = audio_path.to_path_buf();
        let base64_audio = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let audio = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(BASE64.encode(audio))
        })
        .await
        .map_err(|e| ScoringError::Network(e.to_string()))?
        .map_err(|e| {
            warn!("Failed to encode recording: {:#}", e);
            ScoringError::InvalidResponse
        })?;

        debug!("Encoded recording ({} chars base64)", base64_audio.len());

        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": analysis_prompt(duration_secs)},
                    {
                        "type": "input_audio",
                        "input_audio": {"data": base64_audio, "format": "wav"}
                    }
                ]
            }]
        });

        let raw = self.post("analyze-speech", body).await?;
        let content = Self::extract_content(&raw)?;

        let mut result: FeedbackResult =
            serde_json::from_str(&content).map_err(|_| ScoringError::InvalidResponse)?;

        if !result.bands.all_in_range() {
            warn!("Score out of band range in response");
            return Err(ScoringError::InvalidResponse);
        }

        result.quote = sanitize_quote(&result.quote, duration_secs);
        info!("Speech analysis complete (overall {:.1})", result.bands.overall());
        Ok(result)
    }
}

#[async_trait::async_trait]
impl TopicGenerator for ScoringClient {
    async fn generate_topic(
        &self,
        progress: Option<&UserProgress>,
        exclude_recent: &[String],
    ) -> Result<Topic, ScoringError> {
        let body = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [{
                "role": "user",
                "content": topic_prompt(progress, exclude_recent)
            }]
        });

        let raw = self.post("generate-topic", body).await?;
        let content = Self::extract_content(&raw)?;

        let generated: GeneratedTopic =
            serde_json::from_str(&content).map_err(|_| ScoringError::InvalidResponse)?;
        if generated.title.is_empty() {
            return Err(ScoringError::InvalidResponse);
        }

        info!("Topic generated: {}", generated.title);
        Ok(Topic {
            id: Uuid::new_v4(),
            title: generated.title,
            prompts: generated.prompts,
        })
    }
}

fn analysis_prompt(duration_secs: f64) -> String {
    format!(
        "You are a supportive speaking coach listening to a timed practice response.\n\n\
         The speaker recorded for about {} seconds. Candidates typically speak for \
         1-2 minutes (60-120 seconds) to allow full assessment across fluency, \
         vocabulary, grammar, and pronunciation.\n\n\
         Assess the response and reply in strict JSON with this shape:\n\
         {{\n\
           \"summary\": \"...\",\n\
           \"action_tip\": \"...\",\n\
           \"bands\": {{\n\
             \"fluency\": {{\"score\": 0.0, \"comment\": \"...\"}},\n\
             \"lexical_resource\": {{\"score\": 0.0, \"comment\": \"...\"}},\n\
             \"grammar\": {{\"score\": 0.0, \"comment\": \"...\"}},\n\
             \"pronunciation\": {{\"score\": 0.0, \"comment\": \"...\"}}\n\
           }},\n\
           \"quote\": \"...\"\n\
         }}\n\n\
         Scores are 0.0-9.0. Only quote a phrase you clearly heard in the audio; \
         when in doubt set \"quote\" to \"\". If the recording is under 12 seconds \
         always set \"quote\" to \"\". Output ONLY the JSON.",
        duration_secs as u64
    )
}

fn topic_prompt(progress: Option<&UserProgress>, exclude_recent: &[String]) -> String {
    let mut prompt = String::from("You are a speaking-practice topic generator.\n\n");

    if exclude_recent.is_empty() {
        prompt.push_str("Generate a DIVERSE and less common speaking topic.\n\n");
    } else {
        prompt.push_str(
            "IMPORTANT: Avoid generating any topic similar to these previously practiced ones:\n",
        );
        for title in exclude_recent {
            prompt.push_str("- ");
            prompt.push_str(title);
            prompt.push('\n');
        }
        prompt.push_str(
            "\nGenerate a NEW, DISTINCT topic that is meaningfully different from all the above.\n\n",
        );
    }

    if let Some(progress) = progress.filter(|p| p.has_enough_data()) {
        if let Some(weakest) = progress.weakest_category() {
            prompt.push_str(&format!(
                "The speaker's weakest area is {}. Prefer a topic that naturally exercises it.\n\n",
                weakest.label()
            ));
        }
    }

    prompt.push_str(
        "Generate ONE topic in strict JSON format:\n\n\
         {\n\
           \"title\": \"Describe a habit you developed recently\",\n\
           \"prompts\": [\n\
             \"What the habit is\",\n\
             \"How you started it\",\n\
             \"Why it benefits you\"\n\
           ]\n\
         }\n\n\
         RULES:\n\
         - \"title\": one sentence, imperative form, no ending punctuation\n\
         - \"prompts\": exactly 3-4 items, 5-10 words each\n\
         - Only return valid JSON, no explanations\n\n\
         Output ONLY the JSON.",
    );

    prompt
}

/// Strip a Markdown code fence (```json ... ``` or plain ``` ... ```).
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.starts_with("```json") {
        trimmed
            .replace("```json", "")
            .replace("```", "")
            .trim()
            .to_string()
    } else if trimmed.starts_with("```") {
        trimmed.replace("```", "").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

const FORBIDDEN_QUOTE_OPENINGS: [&str; 11] = [
    "i would like to describe",
    "today i'm going to talk about",
    "there was a time when",
    "let me tell you",
    "the thing i want to describe",
    "i want to talk about",
    "let me describe",
    "i'm going to tell you about",
    "one thing i'd like to talk about",
    "i'm going to describe",
    "i want to share",
];

/// Clean and validate a highlighted quote from the assessment.
///
/// Recordings under 12 seconds never carry a quote. The text is reduced to
/// the allowed character set, bounded to 5..=80 characters, and rejected
/// when it opens with formulaic template language.
pub fn sanitize_quote(quote: &str, duration_secs: f64) -> String {
    if duration_secs < 12.0 {
        return String::new();
    }

    let cleaned: String = quote
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || " ,.'?!-".contains(*c))
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.len() < 5 || cleaned.len() > 80 {
        return String::new();
    }

    let lowercased = cleaned.to_lowercase();
    if FORBIDDEN_QUOTE_OPENINGS
        .iter()
        .any(|opening| lowercased.starts_with(opening))
    {
        return String::new();
    }

    cleaned
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
