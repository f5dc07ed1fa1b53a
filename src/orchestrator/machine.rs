//! Recording flow orchestration.
//!
//! State lives behind one `Arc<Mutex<_>>`; countdown and elapsed timers are
//! spawned tokio tasks sharing that handle, with a single registered timer
//! at a time. The presentation layer polls [`RecordingOrchestrator::snapshot`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{AudioCapture, AudioPlayback};
use crate::config::{Config, RecordingConfig};
use crate::scoring::{SpeechScorer, TopicGenerator};
use crate::store::{PracticeSession, SessionStore, Topic};
use crate::topics::TopicCatalog;
use crate::transcribe::TranscriptionPipeline;

use super::app_state::AppStateFile;
use super::state::{
    AnalysisFailure, OrchestratorError, OrchestratorSnapshot, RecordingState,
};

/// How long the catalog-fallback notice stays up.
const FALLBACK_NOTICE_SECS: u64 = 3;

/// Attempts against the topic generator before falling back to the catalog.
const TOPIC_RETRIES: usize = 3;

/// Post-practice reminder hook.
#[async_trait::async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule_daily_reminder(&self, streak: u32) -> Result<()>;
}

pub struct NoopReminder;

#[async_trait::async_trait]
impl ReminderScheduler for NoopReminder {
    async fn schedule_daily_reminder(&self, _streak: u32) -> Result<()> {
        Ok(())
    }
}

struct Services {
    store: Arc<Mutex<SessionStore>>,
    scorer: Arc<dyn SpeechScorer>,
    topic_generator: Arc<dyn TopicGenerator>,
    pipeline: Option<Arc<TranscriptionPipeline>>,
    catalog: TopicCatalog,
    reminder: Arc<dyn ReminderScheduler>,
    recording: RecordingConfig,
    temp_dir: PathBuf,
}

struct Inner {
    state: RecordingState,
    topic: Topic,
    countdown_remaining: u64,
    elapsed_secs: u64,
    session_id: Option<Uuid>,
    analysis_failure: Option<AnalysisFailure>,
    fallback_notice: bool,
    fallback_seq: u64,
    recovery_notice: bool,
    timer: Option<JoinHandle<()>>,
    capture: AudioCapture,
    playback: AudioPlayback,
    app_state: AppStateFile,
}

#[derive(Clone)]
pub struct RecordingOrchestrator {
    inner: Arc<Mutex<Inner>>,
    services: Arc<Services>,
}

impl RecordingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        store: Arc<Mutex<SessionStore>>,
        capture: AudioCapture,
        scorer: Arc<dyn SpeechScorer>,
        topic_generator: Arc<dyn TopicGenerator>,
        pipeline: Option<Arc<TranscriptionPipeline>>,
        reminder: Arc<dyn ReminderScheduler>,
    ) -> Result<Self> {
        let data_dir = PathBuf::from(&config.storage.data_dir);
        let temp_dir = data_dir.join("tmp");
        std::fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;

        let mut app_state = AppStateFile::load(&data_dir, Utc::now().date_naive());
        let recovery_notice = app_state.state.active_recording;
        if recovery_notice {
            warn!("Previous run was interrupted mid-recording");
            app_state.set_active_recording(false)?;
        }

        let pipeline = if config.transcription.enabled {
            pipeline
        } else {
            if pipeline.is_some() {
                info!("Transcription disabled by configuration");
            }
            None
        };

        let catalog = TopicCatalog::bundled()?;
        let topic = catalog
            .random_topic()
            .context("Bundled topic catalog is empty")?
            .clone();

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RecordingState::Idle,
                topic,
                countdown_remaining: 0,
                elapsed_secs: 0,
                session_id: None,
                analysis_failure: None,
                fallback_notice: false,
                fallback_seq: 0,
                recovery_notice,
                timer: None,
                capture,
                playback: AudioPlayback::new(),
                app_state,
            })),
            services: Arc::new(Services {
                store,
                scorer,
                topic_generator,
                pipeline,
                catalog,
                reminder,
                recording: config.recording.clone(),
                temp_dir,
            }),
        })
    }

    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        let inner = self.inner.lock().await;
        let prep = self.services.recording.preparation_secs;
        let can_skip = inner.state == RecordingState::Preparing
            && prep.saturating_sub(inner.countdown_remaining)
                >= self.services.recording.skip_threshold_secs;
        let can_stop = inner.state == RecordingState::Recording
            && inner.elapsed_secs >= self.services.recording.stop_threshold_secs;

        OrchestratorSnapshot {
            state: inner.state,
            topic: inner.topic.clone(),
            countdown_remaining_secs: inner.countdown_remaining,
            can_skip_preparation: can_skip,
            elapsed_secs: inner.elapsed_secs,
            can_stop_recording: can_stop,
            current_level: inner.capture.current_level(),
            recent_levels: inner.capture.recent_levels(),
            saved_waveform: inner.capture.saved_waveform().to_vec(),
            session_id: inner.session_id,
            analysis_failure: inner.analysis_failure.clone(),
            fallback_notice: inner.fallback_notice,
            recovery_notice: inner.recovery_notice,
            streak_count: inner.app_state.state.streak_count,
        }
    }

    /// Begin the preparation countdown.
    pub async fn start_preparation(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Idle {
            return Err(OrchestratorError::InvalidState {
                action: "start_preparation",
                state: inner.state,
            });
        }
        if inner.timer.is_some() {
            warn!("Refusing to start countdown, a timer is already registered");
            return Err(OrchestratorError::TimerActive);
        }

        inner.state = RecordingState::Preparing;
        inner.countdown_remaining = self.services.recording.preparation_secs;
        inner.analysis_failure = None;

        let handle_inner = Arc::clone(&self.inner);
        let services = Arc::clone(&self.services);
        inner.timer = Some(tokio::spawn(async move {
            run_countdown(handle_inner, services).await;
        }));

        info!("Preparation started ({}s)", self.services.recording.preparation_secs);
        Ok(())
    }

    /// Skip the rest of the countdown. Allowed once the skip threshold of
    /// preparation time has elapsed.
    pub async fn skip_preparation(&self) -> Result<(), OrchestratorError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RecordingState::Preparing {
                return Err(OrchestratorError::InvalidState {
                    action: "skip_preparation",
                    state: inner.state,
                });
            }
            let elapsed = self
                .services
                .recording
                .preparation_secs
                .saturating_sub(inner.countdown_remaining);
            if elapsed < self.services.recording.skip_threshold_secs {
                return Err(OrchestratorError::InvalidState {
                    action: "skip_preparation",
                    state: inner.state,
                });
            }
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
        }

        begin_recording(&self.inner, &self.services).await
    }

    /// Stop recording manually. Allowed once the stop threshold is reached.
    pub async fn stop_recording(&self) -> Result<Uuid, OrchestratorError> {
        {
            let inner = self.inner.lock().await;
            if inner.state != RecordingState::Recording {
                return Err(OrchestratorError::InvalidState {
                    action: "stop_recording",
                    state: inner.state,
                });
            }
            if inner.elapsed_secs < self.services.recording.stop_threshold_secs {
                return Err(OrchestratorError::StopNotAllowed(
                    self.services.recording.stop_threshold_secs,
                ));
            }
        }
        finish_recording(&self.inner, &self.services).await
    }

    /// Score the saved recording. Scoring failures do not fail this call;
    /// they land in the snapshot for user-driven retry.
    pub async fn analyze(&self) -> Result<(), OrchestratorError> {
        let (session_id, audio_path, duration, topic_title) = {
            let mut inner = self.inner.lock().await;
            if inner.state != RecordingState::Finished {
                return Err(OrchestratorError::InvalidState {
                    action: "analyze",
                    state: inner.state,
                });
            }
            if inner.capture.saved_waveform().is_empty() {
                return Err(OrchestratorError::NothingToAnalyze);
            }
            let session_id = inner.session_id.ok_or(OrchestratorError::NothingToAnalyze)?;

            let store = self.services.store.lock().await;
            let session = store
                .session(session_id)
                .ok_or(OrchestratorError::NothingToAnalyze)?;
            let audio_path = store.audio_path(session);
            let duration = session.duration;
            drop(store);

            inner.state = RecordingState::Analyzing;
            inner.analysis_failure = None;
            (session_id, audio_path, duration, inner.topic.title.clone())
        };

        // Lock released while the scoring request is in flight.
        let result = self
            .services
            .scorer
            .analyze_speech(&audio_path, duration)
            .await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(feedback) => {
                self.services
                    .store
                    .lock()
                    .await
                    .attach_feedback(session_id, feedback)?;
                inner.app_state.record_practice(Utc::now().date_naive())?;
                inner.app_state.push_recent_topic(topic_title)?;
                let streak = inner.app_state.state.streak_count;
                inner.state = RecordingState::Finished;
                drop(inner);

                if let Err(e) = self
                    .services
                    .reminder
                    .schedule_daily_reminder(streak)
                    .await
                {
                    warn!("Failed to schedule reminder: {:#}", e);
                }
                info!("Analysis complete for session {}", session_id);
            }
            Err(e) => {
                warn!("Analysis failed: {}", e);
                inner.analysis_failure = Some(AnalysisFailure {
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                });
                inner.state = RecordingState::Finished;
            }
        }
        Ok(())
    }

    /// Reset for another attempt at the same topic.
    pub async fn practice_again(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        reset_round(&mut inner)?;
        Ok(())
    }

    /// Reset and fetch a different topic.
    pub async fn new_topic(&self) -> Result<(), OrchestratorError> {
        {
            let mut inner = self.inner.lock().await;
            reset_round(&mut inner)?;
        }
        self.request_new_topic().await
    }

    /// Ask the generator for a topic distinct from the current one and the
    /// recent history. Exhausted retries fall back to the bundled catalog.
    pub async fn request_new_topic(&self) -> Result<(), OrchestratorError> {
        let (exclude, progress) = {
            let inner = self.inner.lock().await;
            let mut exclude = inner.app_state.recent_topics();
            if !exclude.contains(&inner.topic.title) {
                exclude.push(inner.topic.title.clone());
            }
            let progress = self.services.store.lock().await.progress().clone();
            (exclude, progress)
        };

        for attempt in 1..=TOPIC_RETRIES {
            match self
                .services
                .topic_generator
                .generate_topic(Some(&progress), &exclude)
                .await
            {
                Ok(topic) if !exclude.contains(&topic.title) => {
                    let mut inner = self.inner.lock().await;
                    info!("New topic: {}", topic.title);
                    inner.topic = topic;
                    return Ok(());
                }
                Ok(topic) => {
                    debug!(
                        "Generator repeated a recent topic (attempt {}): {}",
                        attempt, topic.title
                    );
                }
                Err(e) => {
                    warn!("Topic generation failed (attempt {}): {}", attempt, e);
                }
            }
        }

        let fallback = self
            .services
            .catalog
            .random_topic_excluding(&exclude)
            .context("Bundled topic catalog is empty")?
            .clone();
        info!("Falling back to bundled topic: {}", fallback.title);

        let mut inner = self.inner.lock().await;
        inner.topic = fallback;
        inner.fallback_notice = true;
        inner.fallback_seq += 1;
        let seq = inner.fallback_seq;
        drop(inner);

        let handle_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(FALLBACK_NOTICE_SECS)).await;
            let mut inner = handle_inner.lock().await;
            if inner.fallback_seq == seq {
                inner.fallback_notice = false;
            }
        });
        Ok(())
    }

    /// Load a stored session for playback. A session whose audio file is
    /// gone is removed from the store and reported missing.
    pub async fn play_session(&self, session_id: Uuid) -> Result<(), OrchestratorError> {
        let mut store = self.services.store.lock().await;
        let session = store
            .session(session_id)
            .ok_or(OrchestratorError::Store(
                crate::store::StoreError::SessionNotFound(session_id),
            ))?
            .clone();
        let path = store.audio_path(&session);

        if !path.exists() {
            warn!("Audio missing for session {}, removing record", session_id);
            store.delete_session(session_id)?;
            return Err(OrchestratorError::SessionAudioMissing);
        }
        drop(store);

        let mut inner = self.inner.lock().await;
        inner.playback.load(&path).map_err(OrchestratorError::Other)?;
        Ok(())
    }

    pub async fn toggle_playback(&self) {
        self.inner.lock().await.playback.toggle();
    }

    pub async fn seek_playback(&self, fraction: f64) {
        self.inner.lock().await.playback.seek_progress(fraction);
    }

    pub async fn stop_playback(&self) {
        self.inner.lock().await.playback.stop();
    }

    pub async fn playback_position(&self) -> f64 {
        self.inner.lock().await.playback.position()
    }

    pub async fn playback_progress(&self) -> f64 {
        self.inner.lock().await.playback.progress()
    }

    pub async fn dismiss_recovery_notice(&self) {
        self.inner.lock().await.recovery_notice = false;
    }
}

/// Clear per-round state after a finished attempt. A recording the store
/// owns is preserved; an unsaved temp file is deleted.
fn reset_round(inner: &mut Inner) -> Result<(), OrchestratorError> {
    match inner.state {
        RecordingState::Finished | RecordingState::Idle => {}
        state => {
            return Err(OrchestratorError::InvalidState {
                action: "reset",
                state,
            });
        }
    }

    if inner.session_id.is_some() {
        inner.capture.clear_state();
    } else {
        inner.capture.delete_recording();
    }
    inner.session_id = None;
    inner.analysis_failure = None;
    inner.elapsed_secs = 0;
    inner.countdown_remaining = 0;
    inner.state = RecordingState::Idle;
    Ok(())
}

async fn run_countdown(inner: Arc<Mutex<Inner>>, services: Arc<Services>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await;
    loop {
        tick.tick().await;
        let mut guard = inner.lock().await;
        if guard.state != RecordingState::Preparing {
            return;
        }
        guard.countdown_remaining = guard.countdown_remaining.saturating_sub(1);
        if guard.countdown_remaining == 0 {
            // Dropping our own handle, not aborting it.
            let _ = guard.timer.take();
            drop(guard);
            if let Err(e) = begin_recording(&inner, &services).await {
                error!("Failed to start recording after countdown: {}", e);
                inner.lock().await.state = RecordingState::Idle;
            }
            return;
        }
    }
}

async fn run_elapsed(inner: Arc<Mutex<Inner>>, services: Arc<Services>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await;
    loop {
        tick.tick().await;
        let mut guard = inner.lock().await;
        if guard.state != RecordingState::Recording {
            return;
        }
        guard.elapsed_secs += 1;
        if guard.elapsed_secs >= services.recording.max_recording_secs {
            info!("Auto-stop at {}s", guard.elapsed_secs);
            let _ = guard.timer.take();
            drop(guard);
            if let Err(e) = finish_recording(&inner, &services).await {
                error!("Auto-stop failed: {}", e);
            }
            return;
        }
    }
}

/// Start capture, then raise the recording state. The hardware is running
/// before any transition cue can be shown.
async fn begin_recording(
    inner: &Arc<Mutex<Inner>>,
    services: &Arc<Services>,
) -> Result<(), OrchestratorError> {
    let mut guard = inner.lock().await;
    let path = services
        .temp_dir
        .join(format!("recording_{}.wav", Uuid::new_v4()));

    if let Err(e) = guard.capture.start(&path).await {
        guard.state = RecordingState::Idle;
        guard.countdown_remaining = 0;
        return Err(e.into());
    }

    guard.state = RecordingState::Recording;
    guard.elapsed_secs = 0;
    guard.session_id = None;
    guard.app_state.set_active_recording(true)?;

    if guard.timer.is_some() {
        warn!("Elapsed timer already registered, not spawning another");
    } else {
        let handle_inner = Arc::clone(inner);
        let handle_services = Arc::clone(services);
        guard.timer = Some(tokio::spawn(async move {
            run_elapsed(handle_inner, handle_services).await;
        }));
    }

    info!("Recording started: {}", path.display());
    Ok(())
}

/// Stop capture, persist the session stub, hand the file to the store, and
/// kick off best-effort transcription.
async fn finish_recording(
    inner: &Arc<Mutex<Inner>>,
    services: &Arc<Services>,
) -> Result<Uuid, OrchestratorError> {
    let mut guard = inner.lock().await;
    if guard.state != RecordingState::Recording {
        return Err(OrchestratorError::InvalidState {
            action: "stop_recording",
            state: guard.state,
        });
    }
    if let Some(timer) = guard.timer.take() {
        timer.abort();
    }

    // Returns only after the WAV is finalized on disk.
    if let Err(e) = guard.capture.stop().await {
        guard.capture.delete_recording();
        guard.app_state.set_active_recording(false)?;
        guard.state = RecordingState::Idle;
        return Err(e.into());
    }

    let duration = guard.capture.last_duration_secs();
    let temp_path = guard
        .capture
        .audio_path()
        .context("Capture has no file after stop")?
        .to_path_buf();

    let session_id = Uuid::new_v4();
    let mut store = services.store.lock().await;
    let file_name = store.save_audio_file(&temp_path, session_id)?;
    let stored_path = store.recordings_dir().join(&file_name);

    store.create_session(PracticeSession {
        id: session_id,
        date: Utc::now(),
        topic_id: guard.topic.id,
        topic_title: guard.topic.title.clone(),
        audio_file_name: file_name,
        duration,
        feedback: None,
        transcript: None,
    })?;
    drop(store);

    guard.capture.update_audio_path(stored_path.clone());
    guard.session_id = Some(session_id);
    guard.app_state.set_active_recording(false)?;
    guard.state = RecordingState::Finished;
    drop(guard);

    if let Some(pipeline) = services.pipeline.clone() {
        let store = Arc::clone(&services.store);
        tokio::spawn(async move {
            let transcript = pipeline.transcribe(&stored_path).await;
            if transcript.is_empty() {
                return;
            }
            if let Err(e) = store.lock().await.attach_transcript(session_id, transcript) {
                warn!("Failed to store transcript: {}", e);
            }
        });
    }

    info!("Recording saved as session {} ({:.1}s)", session_id, duration);
    Ok(session_id)
}
