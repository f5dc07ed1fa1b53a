//! Playback transport state for recorded sessions.
//!
//! Position is clock-derived: while playing it is the offset at play time
//! plus wall-clock elapsed, polled via [`AudioPlayback::position`]. Natural
//! completion latches `finished`, which is distinct from being paused.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use hound::WavReader;
use tracing::{info, warn};

use super::capture::WAVEFORM_POINTS;

#[derive(Default)]
pub struct AudioPlayback {
    path: Option<PathBuf>,
    duration_secs: f64,
    waveform: Vec<f32>,
    /// Offset when paused, or offset at the instant playback started.
    base_offset_secs: f64,
    started_at: Option<Instant>,
    finished: bool,
}

impl AudioPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a recording, replacing any current playback.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open recording: {}", path.display()))?;
        let spec = reader.spec();
        let duration_secs = reader.duration() as f64 / spec.sample_rate as f64;

        let waveform = match read_waveform(path) {
            Ok(waveform) => waveform,
            Err(e) => {
                warn!("Waveform extraction failed, using placeholder: {:#}", e);
                vec![0.5; WAVEFORM_POINTS]
            }
        };

        info!("Loaded recording: {} ({:.1}s)", path.display(), duration_secs);

        self.path = Some(path.to_path_buf());
        self.duration_secs = duration_secs;
        self.waveform = waveform;
        self.base_offset_secs = 0.0;
        self.started_at = None;
        self.finished = false;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.path.is_some()
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Static 60-segment amplitude overview of the loaded recording.
    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    pub fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn has_finished(&self) -> bool {
        self.finished
    }

    /// Current position in seconds. Polling this drives completion: reaching
    /// the end latches `finished` and rewinds to zero.
    pub fn position(&mut self) -> f64 {
        let Some(started_at) = self.started_at else {
            return self.base_offset_secs;
        };

        let position = self.base_offset_secs + started_at.elapsed().as_secs_f64();
        if position >= self.duration_secs {
            self.started_at = None;
            self.base_offset_secs = 0.0;
            self.finished = true;
            return self.duration_secs;
        }
        position
    }

    /// Fraction of the recording played, in [0, 1].
    pub fn progress(&mut self) -> f64 {
        if self.duration_secs <= 0.0 {
            return 0.0;
        }
        (self.position() / self.duration_secs).clamp(0.0, 1.0)
    }

    pub fn play(&mut self) {
        if !self.is_loaded() || self.started_at.is_some() {
            return;
        }
        self.finished = false;
        self.started_at = Some(Instant::now());
    }

    pub fn pause(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.base_offset_secs =
                (self.base_offset_secs + started_at.elapsed().as_secs_f64()).min(self.duration_secs);
        }
    }

    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Stop and rewind without unloading.
    pub fn stop(&mut self) {
        self.started_at = None;
        self.base_offset_secs = 0.0;
        self.finished = false;
    }

    /// Seek to an absolute position, clamped to the recording bounds.
    pub fn seek(&mut self, secs: f64) {
        let secs = secs.clamp(0.0, self.duration_secs);
        let was_playing = self.started_at.is_some();
        self.base_offset_secs = secs;
        self.finished = false;
        self.started_at = if was_playing { Some(Instant::now()) } else { None };
    }

    /// Seek to a fraction of the recording, clamped to [0, 1].
    pub fn seek_progress(&mut self, fraction: f64) {
        self.seek(fraction.clamp(0.0, 1.0) * self.duration_secs);
    }
}

/// Average absolute amplitude per segment, normalized by the loudest segment.
fn read_waveform(path: &Path) -> Result<Vec<f32>> {
    let reader = WavReader::open(path).context("Failed to open WAV")?;
    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to read samples")?;

    if samples.is_empty() {
        anyhow::bail!("Recording contains no samples");
    }

    let segment_len = (samples.len() / WAVEFORM_POINTS).max(1);
    let mut segments: Vec<f32> = samples
        .chunks(segment_len)
        .take(WAVEFORM_POINTS)
        .map(|chunk| {
            chunk.iter().map(|&s| (s as f32).abs()).sum::<f32>() / chunk.len() as f32
        })
        .collect();

    let max = segments.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for value in &mut segments {
            *value /= max;
        }
    }
    Ok(segments)
}
