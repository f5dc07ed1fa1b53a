//! Microphone capture with live level metering.
//!
//! Frames stream from a [`CaptureBackend`] into a writer task that persists
//! 16-bit WAV via `hound` in the configured capture format, tracking one
//! normalized power level per configured metering interval. The full level
//! accumulator lives inside the writer task and is reduced to a fixed
//! 60-point waveform when capture stops; only the ring of the 30 most
//! recent levels is kept for live metering.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AudioConfig;

use super::backend::{AudioFrame, CaptureBackend};

/// Number of points in the saved waveform overview.
pub const WAVEFORM_POINTS: usize = 60;

/// Number of recent levels kept for live metering.
const RECENT_LEVELS: usize = 30;

/// Microphone authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophonePermission {
    NotDetermined,
    Denied,
    Authorized,
}

/// Platform permission hook.
#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn status(&self) -> MicrophonePermission;

    /// Prompt the user. Returns the resulting state.
    async fn request(&self) -> MicrophonePermission;
}

/// Permission provider that always grants. Used by tests and batch tooling
/// where no interactive prompt exists.
pub struct GrantedPermissions;

#[async_trait::async_trait]
impl PermissionProvider for GrantedPermissions {
    async fn status(&self) -> MicrophonePermission {
        MicrophonePermission::Authorized
    }

    async fn request(&self) -> MicrophonePermission {
        MicrophonePermission::Authorized
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),
    #[error("no capture in progress")]
    NotRecording,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

struct WriterOutcome {
    waveform: Vec<f32>,
    duration_secs: f64,
}

pub struct AudioCapture {
    backend: Box<dyn CaptureBackend>,
    permissions: Arc<dyn PermissionProvider>,
    format: AudioConfig,
    recent_levels: Arc<Mutex<VecDeque<f32>>>,
    writer_task: Option<JoinHandle<Result<WriterOutcome>>>,
    audio_path: Option<PathBuf>,
    saved_waveform: Vec<f32>,
    last_duration_secs: f64,
    recording: bool,
}

impl AudioCapture {
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        permissions: Arc<dyn PermissionProvider>,
        format: AudioConfig,
    ) -> Self {
        Self {
            backend,
            permissions,
            format,
            recent_levels: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LEVELS))),
            writer_task: None,
            audio_path: None,
            saved_waveform: Vec::new(),
            last_duration_secs: 0.0,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn audio_path(&self) -> Option<&Path> {
        self.audio_path.as_deref()
    }

    /// Waveform overview saved by the last completed capture.
    pub fn saved_waveform(&self) -> &[f32] {
        &self.saved_waveform
    }

    pub fn last_duration_secs(&self) -> f64 {
        self.last_duration_secs
    }

    /// Most recent metering levels, oldest first (up to 30).
    pub fn recent_levels(&self) -> Vec<f32> {
        self.recent_levels.lock().unwrap().iter().copied().collect()
    }

    pub fn current_level(&self) -> f32 {
        self.recent_levels
            .lock()
            .unwrap()
            .back()
            .copied()
            .unwrap_or(0.0)
    }

    /// Begin capturing to `path`.
    ///
    /// An undetermined permission triggers a single request; a denied
    /// permission fails. Any start failure leaves no partial state behind.
    pub async fn start(&mut self, path: &Path) -> Result<(), CaptureError> {
        match self.permissions.status().await {
            MicrophonePermission::Authorized => {}
            MicrophonePermission::NotDetermined => {
                if self.permissions.request().await != MicrophonePermission::Authorized {
                    return Err(CaptureError::PermissionDenied);
                }
            }
            MicrophonePermission::Denied => return Err(CaptureError::PermissionDenied),
        }

        let rx = match self.backend.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.clear_state();
                return Err(CaptureError::HardwareUnavailable(format!("{e:#}")));
            }
        };

        let path = path.to_path_buf();
        let recent_levels = Arc::clone(&self.recent_levels);
        recent_levels.lock().unwrap().clear();
        self.saved_waveform.clear();
        self.last_duration_secs = 0.0;

        let writer_path = path.clone();
        let format = self.format.clone();
        self.writer_task = Some(tokio::spawn(async move {
            run_writer(writer_path, rx, recent_levels, format).await
        }));
        self.audio_path = Some(path);
        self.recording = true;

        info!("Capture started: {}", self.backend.name());
        Ok(())
    }

    /// Stop capturing. Returns only after the WAV file is finalized, which
    /// is the completion signal downstream consumers wait on.
    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        let task = self.writer_task.take().ok_or(CaptureError::NotRecording)?;

        self.backend
            .stop()
            .await
            .context("Failed to stop capture backend")?;
        self.recording = false;

        let outcome = task
            .await
            .context("Capture writer task panicked")?
            .context("Capture writer failed")?;

        self.saved_waveform = outcome.waveform;
        self.last_duration_secs = outcome.duration_secs;

        info!(
            "Capture stopped: {:.1}s, {} waveform points",
            self.last_duration_secs,
            self.saved_waveform.len()
        );
        Ok(())
    }

    /// Delete the current recording file and clear all capture state.
    pub fn delete_recording(&mut self) {
        if let Some(path) = self.audio_path.take() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to delete recording {}: {}", path.display(), e);
                }
            }
        }
        self.clear_state();
    }

    /// Clear capture state without touching the file on disk. Used after the
    /// store has taken ownership of the recording.
    pub fn clear_state(&mut self) {
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        self.audio_path = None;
        self.saved_waveform.clear();
        self.last_duration_secs = 0.0;
        self.recording = false;
        self.recent_levels.lock().unwrap().clear();
    }

    /// Re-point the file reference after the store relocated the recording.
    pub fn update_audio_path(&mut self, path: PathBuf) {
        self.audio_path = Some(path);
    }
}

async fn run_writer(
    path: PathBuf,
    mut rx: tokio::sync::mpsc::Receiver<AudioFrame>,
    recent_levels: Arc<Mutex<VecDeque<f32>>>,
    format: AudioConfig,
) -> Result<WriterOutcome> {
    // The configured format is authoritative for the file header; frames
    // that disagree are logged once.
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples_per_level = ((format.sample_rate as u64
        * format.channels as u64
        * format.level_interval_ms)
        / 1000)
        .max(1) as usize;

    let mut writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>> = None;
    let mut all_levels: Vec<f32> = Vec::new();
    let mut level_chunk: Vec<i16> = Vec::with_capacity(samples_per_level);
    let mut sample_count = 0usize;
    let mut mismatch_logged = false;

    while let Some(frame) = rx.recv().await {
        if writer.is_none() {
            writer = Some(
                hound::WavWriter::create(&path, spec)
                    .with_context(|| format!("Failed to create WAV file: {}", path.display()))?,
            );
        }

        if !mismatch_logged
            && (frame.sample_rate != format.sample_rate || frame.channels != format.channels)
        {
            warn!(
                "Backend delivers {}Hz/{}ch, configured capture format is {}Hz/{}ch",
                frame.sample_rate, frame.channels, format.sample_rate, format.channels
            );
            mismatch_logged = true;
        }

        if let Some(w) = writer.as_mut() {
            for &sample in &frame.samples {
                w.write_sample(sample).context("Failed to write sample")?;
            }
            sample_count += frame.samples.len();
        }

        for &sample in &frame.samples {
            level_chunk.push(sample);
            if level_chunk.len() == samples_per_level {
                push_level(frame_level(&level_chunk), &mut all_levels, &recent_levels);
                level_chunk.clear();
            }
        }
    }

    if !level_chunk.is_empty() {
        push_level(frame_level(&level_chunk), &mut all_levels, &recent_levels);
    }

    if let Some(writer) = writer.take() {
        writer.finalize().context("Failed to finalize WAV file")?;
    }

    let per_sec = (format.sample_rate as f64 * format.channels as f64).max(1.0);
    let duration_secs = sample_count as f64 / per_sec;

    // The full accumulator is dropped with this task; only the 60-point
    // overview survives.
    Ok(WriterOutcome {
        waveform: downsample(&all_levels, WAVEFORM_POINTS),
        duration_secs,
    })
}

fn push_level(level: f32, all_levels: &mut Vec<f32>, ring: &Mutex<VecDeque<f32>>) {
    all_levels.push(level);
    let mut ring = ring.lock().unwrap();
    if ring.len() == RECENT_LEVELS {
        ring.pop_front();
    }
    ring.push_back(level);
}

/// Normalized RMS power of a sample window against full-scale i16, in [0, 1].
pub fn frame_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / i16::MAX as f64).clamp(0.0, 1.0) as f32
}

/// Reduce a level series to at most `points` values by window averaging.
/// Identity when the input is already short enough.
pub fn downsample(levels: &[f32], points: usize) -> Vec<f32> {
    if levels.len() <= points {
        return levels.to_vec();
    }

    let window = levels.len() as f64 / points as f64;
    (0..points)
        .map(|i| {
            let start = (i as f64 * window) as usize;
            let end = (((i + 1) as f64 * window) as usize).min(levels.len());
            let end = end.max(start + 1);
            let slice = &levels[start..end];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_identity_when_short() {
        let levels: Vec<f32> = (0..45).map(|i| i as f32 / 45.0).collect();
        assert_eq!(downsample(&levels, WAVEFORM_POINTS), levels);
    }

    #[test]
    fn downsample_reduces_to_exact_point_count() {
        let levels: Vec<f32> = (0..2400).map(|i| (i % 100) as f32 / 100.0).collect();
        let wave = downsample(&levels, WAVEFORM_POINTS);
        assert_eq!(wave.len(), WAVEFORM_POINTS);
        assert!(wave.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn downsample_preserves_constant_signal() {
        let levels = vec![0.5f32; 1000];
        let wave = downsample(&levels, WAVEFORM_POINTS);
        assert!(wave.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn frame_level_silence_and_full_scale() {
        assert_eq!(frame_level(&[0i16; 128]), 0.0);
        let loud = vec![i16::MAX; 128];
        assert!((frame_level(&loud) - 1.0).abs() < 1e-6);
        assert_eq!(frame_level(&[]), 0.0);
    }
}
