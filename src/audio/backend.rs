use std::path::PathBuf;

use anyhow::{Context, Result};
use hound::WavReader;
use tokio::sync::mpsc;
use tracing::info;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Audio capture backend trait
///
/// Implementations:
/// - File: replay a WAV file frame-by-frame (tests, batch processing)
/// - Device backends plug in behind the same interface
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Backend that replays a WAV file as a capture stream.
///
/// Frames are sized to `frame_ms` of audio and emitted as fast as the
/// consumer drains them.
pub struct FileBackend {
    path: PathBuf,
    frame_ms: u64,
    capturing: bool,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, frame_ms: u64) -> Self {
        Self {
            path: path.into(),
            frame_ms,
            capturing: false,
            stop_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let reader = WavReader::open(&self.path)
            .with_context(|| format!("Failed to open WAV file: {}", self.path.display()))?;
        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        info!(
            "File backend: {} ({}Hz, {}ch, {} samples)",
            self.path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        let frame_len =
            (spec.sample_rate as u64 * self.frame_ms / 1000) as usize * spec.channels as usize;
        let frame_len = frame_len.max(1);
        let frame_ms = self.frame_ms;

        let (tx, rx) = mpsc::channel(32);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        self.stop_tx = Some(stop_tx);
        self.capturing = true;

        tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            for chunk in samples.chunks(frame_len) {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    timestamp_ms,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                timestamp_ms += frame_ms;
            }
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(()).await;
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "file"
    }
}
