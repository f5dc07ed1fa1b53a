//! Segmented transcription with a bounded-time race per segment.
//!
//! Long recordings are split into contiguous segments under the recognizer
//! ceiling, each exported to a temp WAV and recognized independently. Every
//! segment resolves exactly once: on the final result, on a benign
//! completion error, or on the safety timeout, whichever comes first, with
//! the longest partial seen so far as fallback text. The pipeline surface is
//! infallible; any failure yields an empty transcript.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{WavReader, WavWriter};
use tracing::{debug, info, warn};

use super::recognizer::{RecognitionEvent, SpeechAuthorization, SpeechRecognizer};

pub struct TranscriptionPipeline {
    recognizer: Arc<dyn SpeechRecognizer>,
    segment_ceiling: Duration,
    safety_timeout: Duration,
}

impl TranscriptionPipeline {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        segment_ceiling: Duration,
        safety_timeout: Duration,
    ) -> Self {
        Self {
            recognizer,
            segment_ceiling,
            safety_timeout,
        }
    }

    /// Transcribe a recording. Never fails; any problem yields `""`.
    pub async fn transcribe(&self, path: &Path) -> String {
        match self.ensure_permission().await {
            Ok(true) => {}
            Ok(false) => {
                info!("Speech recognition not authorized, skipping transcription");
                return String::new();
            }
            Err(e) => {
                warn!("Permission check failed: {:#}", e);
                return String::new();
            }
        }

        if !self.recognizer.is_available() {
            info!("Recognizer unavailable, skipping transcription");
            return String::new();
        }

        let duration = match wav_duration(path) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Cannot read recording for transcription: {:#}", e);
                return String::new();
            }
        };

        if duration <= self.segment_ceiling {
            return self.recognize_segment(path).await;
        }

        // Temp segment files live in a scoped directory removed on every
        // exit path when the guard drops.
        let temp_dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Failed to create segment directory: {}", e);
                return String::new();
            }
        };

        let segments = plan_segments(duration.as_secs_f64(), self.segment_ceiling.as_secs_f64());
        info!(
            "Transcribing {:.1}s recording in {} segments",
            duration.as_secs_f64(),
            segments.len()
        );

        let mut texts = Vec::with_capacity(segments.len());
        for (index, &(start, end)) in segments.iter().enumerate() {
            let segment_path = temp_dir.path().join(format!("segment_{index}.wav"));
            if let Err(e) = export_segment(path, &segment_path, start, end) {
                warn!("Failed to export segment {}: {:#}", index, e);
                continue;
            }

            let text = self.recognize_segment(&segment_path).await;
            if !text.is_empty() {
                texts.push(text);
            }
        }

        texts.join(" ")
    }

    async fn ensure_permission(&self) -> Result<bool> {
        match self.recognizer.authorization() {
            SpeechAuthorization::Authorized => Ok(true),
            SpeechAuthorization::Denied => Ok(false),
            SpeechAuthorization::NotDetermined => {
                // One silent request, no retry on refusal.
                Ok(self.recognizer.request_permission().await == SpeechAuthorization::Authorized)
            }
        }
    }

    /// Run one recognition pass and resolve it exactly once.
    async fn recognize_segment(&self, path: &Path) -> String {
        let mut rx = match self.recognizer.recognize(path).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Recognition failed to start: {:#}", e);
                return String::new();
            }
        };

        let deadline = tokio::time::Instant::now() + self.safety_timeout;
        let mut best_partial = String::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("Recognition stream closed, using best partial");
                    return best_partial;
                }
                Err(_) => {
                    warn!("Recognition timed out, using best partial");
                    return best_partial;
                }
            };

            match event {
                RecognitionEvent::Partial(text) => {
                    if text.len() > best_partial.len() {
                        best_partial = text;
                    }
                }
                RecognitionEvent::Final(text) => {
                    // The longest transcript seen wins; a recognizer may
                    // emit a final shorter than its best hypothesis.
                    return if text.len() >= best_partial.len() {
                        text
                    } else {
                        best_partial
                    };
                }
                RecognitionEvent::Error(error) => {
                    if error.is_benign_completion() {
                        debug!("Recognition completed via code {}", error.code);
                    } else {
                        warn!(
                            "Recognition error {}: {}, using best partial",
                            error.code, error.message
                        );
                    }
                    return best_partial;
                }
            }
        }
    }
}

/// Contiguous non-overlapping segment bounds in seconds.
///
/// One segment when the recording fits under the ceiling, otherwise
/// `ceil(duration / ceiling)` equal spans covering the whole recording.
pub fn plan_segments(duration_secs: f64, ceiling_secs: f64) -> Vec<(f64, f64)> {
    if duration_secs <= 0.0 {
        return Vec::new();
    }
    if duration_secs <= ceiling_secs {
        return vec![(0.0, duration_secs)];
    }

    let count = (duration_secs / ceiling_secs).ceil() as usize;
    let span = duration_secs / count as f64;
    (0..count)
        .map(|i| {
            let start = i as f64 * span;
            let end = if i + 1 == count { duration_secs } else { start + span };
            (start, end)
        })
        .collect()
}

fn wav_duration(path: &Path) -> Result<Duration> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    Ok(Duration::from_secs_f64(
        reader.duration() as f64 / spec.sample_rate as f64,
    ))
}

/// Copy the `[start, end)` span of `source` into a new WAV at `dest`.
fn export_segment(source: &Path, dest: &PathBuf, start_secs: f64, end_secs: f64) -> Result<()> {
    let reader = WavReader::open(source)
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let spec = reader.spec();
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read samples")?;

    let per_sec = spec.sample_rate as f64 * spec.channels as f64;
    let start = ((start_secs * per_sec) as usize).min(samples.len());
    let end = ((end_secs * per_sec) as usize).min(samples.len());

    let mut writer =
        WavWriter::create(dest, spec).with_context(|| format!("Failed to create {}", dest.display()))?;
    for &sample in &samples[start..end] {
        writer.write_sample(sample).context("Failed to write sample")?;
    }
    writer.finalize().context("Failed to finalize segment")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_recording_is_one_segment() {
        assert_eq!(plan_segments(42.0, 55.0), vec![(0.0, 42.0)]);
        assert_eq!(plan_segments(55.0, 55.0), vec![(0.0, 55.0)]);
    }

    #[test]
    fn long_recording_splits_contiguously() {
        let segments = plan_segments(120.0, 55.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].0, 0.0);
        assert_eq!(segments.last().unwrap().1, 120.0);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        for &(start, end) in &segments {
            assert!(end - start <= 55.0 + 1e-9);
        }
    }

    #[test]
    fn empty_recording_has_no_segments() {
        assert!(plan_segments(0.0, 55.0).is_empty());
    }
}
