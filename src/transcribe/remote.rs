//! Remote recognizer for OpenAI-compatible transcription APIs.
//!
//! Uploads the WAV as a multipart form with `model` and `file` fields,
//! authorizes via Bearer token, and emits the `text` field of the JSON
//! response as a single final event.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::recognizer::{
    RecognitionEvent, RecognizerError, SpeechAuthorization, SpeechRecognizer,
};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct RemoteRecognizer {
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl RemoteRecognizer {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }
}

async fn run_transcription(
    client: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    path: PathBuf,
) -> Result<String> {
    let audio = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.wav".to_string());

    let form = reqwest::multipart::Form::new()
        .text("model", model)
        .part(
            "file",
            reqwest::multipart::Part::bytes(audio)
                .file_name(file_name)
                .mime_str("audio/wav")?,
        );

    let response = client
        .post(&api_url)
        .header("Authorization", format!("Bearer {api_key}"))
        .multipart(form)
        .send()
        .await
        .context("Failed to send request")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        anyhow::bail!("API error ({status}): {error_text}");
    }

    let text = response.text().await.context("Failed to get response text")?;
    let parsed: TranscriptionResponse =
        serde_json::from_str(&text).context("Failed to parse API response")?;

    Ok(parsed.text)
}

#[async_trait::async_trait]
impl SpeechRecognizer for RemoteRecognizer {
    fn authorization(&self) -> SpeechAuthorization {
        SpeechAuthorization::Authorized
    }

    async fn request_permission(&self) -> SpeechAuthorization {
        SpeechAuthorization::Authorized
    }

    fn is_available(&self) -> bool {
        !self.api_url.is_empty()
    }

    async fn recognize(&self, path: &Path) -> Result<mpsc::Receiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::channel(8);
        let client = self.client.clone();
        let api_url = self.api_url.clone();
        let model = self.model.clone();
        let api_key = self.api_key.clone();
        let path = path.to_path_buf();

        // The upload runs in its own task so the caller's deadline races a
        // genuinely in-flight recognition.
        tokio::spawn(async move {
            match run_transcription(client, api_url, model, api_key, path).await {
                Ok(transcript) => {
                    debug!("Remote recognition complete ({} chars)", transcript.len());
                    let _ = tx.send(RecognitionEvent::Final(transcript)).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(RecognitionEvent::Error(RecognizerError {
                            code: 0,
                            message: format!("{e:#}"),
                        }))
                        .await;
                }
            }
        });

        Ok(rx)
    }
}
