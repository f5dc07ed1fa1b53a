// Integration tests for the recording orchestrator
//
// Timer-driven transitions run against shortened thresholds so tests finish
// in a couple of wall-clock seconds. Scoring and topic generation are
// scripted through the collaborator traits.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use speakcoach::audio::{AudioCapture, FileBackend, GrantedPermissions};
use speakcoach::config::Config;
use speakcoach::orchestrator::{
    NoopReminder, OrchestratorError, RecordingOrchestrator, RecordingState,
};
use speakcoach::scoring::{ScoringError, SpeechScorer, TopicGenerator};
use speakcoach::store::{
    BandScore, BandScores, FeedbackResult, SessionStore, Topic, UserProgress,
};
use speakcoach::transcribe::{
    RecognitionEvent, SpeechAuthorization, SpeechRecognizer, TranscriptionPipeline,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

struct QueueScorer {
    results: Mutex<VecDeque<Result<FeedbackResult, ScoringError>>>,
}

impl QueueScorer {
    fn new(results: Vec<Result<FeedbackResult, ScoringError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
        })
    }
}

#[async_trait::async_trait]
impl SpeechScorer for QueueScorer {
    async fn analyze_speech(
        &self,
        _audio_path: &Path,
        _duration_secs: f64,
    ) -> Result<FeedbackResult, ScoringError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ScoringError::Network("no scripted result".into())))
    }
}

struct QueueTopics {
    results: Mutex<VecDeque<Result<Topic, ScoringError>>>,
    calls: Mutex<usize>,
}

impl QueueTopics {
    fn new(results: Vec<Result<Topic, ScoringError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl TopicGenerator for QueueTopics {
    async fn generate_topic(
        &self,
        _progress: Option<&UserProgress>,
        _exclude_recent: &[String],
    ) -> Result<Topic, ScoringError> {
        *self.calls.lock().unwrap() += 1;
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ScoringError::Network("generator exhausted".into())))
    }
}

fn good_feedback() -> FeedbackResult {
    let band = |s: f64| BandScore {
        score: s,
        comment: "fine".to_string(),
    };
    FeedbackResult {
        summary: "solid attempt".to_string(),
        action_tip: "slow down on key words".to_string(),
        bands: BandScores {
            fluency: band(6.0),
            lexical: band(6.5),
            grammar: band(5.5),
            pronunciation: band(6.0),
        },
        quote: String::new(),
    }
}

fn generated_topic(title: &str) -> Topic {
    Topic {
        id: Uuid::new_v4(),
        title: title.to_string(),
        prompts: Some(vec!["one".into(), "two".into(), "three".into()]),
    }
}

/// Config with thresholds shortened for wall-clock tests.
fn fast_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.display().to_string();
    config.audio.sample_rate = 8000;
    config.recording.preparation_secs = 1;
    config.recording.skip_threshold_secs = 0;
    config.recording.stop_threshold_secs = 0;
    config.recording.max_recording_secs = 30;
    config
}

fn write_fixture(path: &Path, secs: f64) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..(8000.0 * secs) as usize {
        writer.write_sample(((i % 160) as i16 - 80) * 100)?;
    }
    writer.finalize()?;
    Ok(())
}

fn build(
    dir: &Path,
    config: &Config,
    scorer: Arc<QueueScorer>,
    topics: Arc<QueueTopics>,
) -> Result<(RecordingOrchestrator, Arc<tokio::sync::Mutex<SessionStore>>)> {
    let fixture = dir.join("fixture.wav");
    if !fixture.exists() {
        write_fixture(&fixture, 15.0)?;
    }

    let store = Arc::new(tokio::sync::Mutex::new(SessionStore::open(dir)?));
    let capture = AudioCapture::new(
        Box::new(FileBackend::new(&fixture, 50)),
        Arc::new(GrantedPermissions),
        config.audio.clone(),
    );
    let orchestrator = RecordingOrchestrator::new(
        config,
        Arc::clone(&store),
        capture,
        scorer,
        topics,
        None,
        Arc::new(NoopReminder),
    )?;
    Ok((orchestrator, store))
}

struct CountingRecognizer {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl SpeechRecognizer for CountingRecognizer {
    fn authorization(&self) -> SpeechAuthorization {
        SpeechAuthorization::Authorized
    }

    async fn request_permission(&self) -> SpeechAuthorization {
        SpeechAuthorization::Authorized
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(&self, _path: &Path) -> Result<mpsc::Receiver<RecognitionEvent>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx
                .send(RecognitionEvent::Final("a full practice answer".to_string()))
                .await;
        });
        Ok(rx)
    }
}

fn build_with_recognizer(
    dir: &Path,
    config: &Config,
    recognizer: Arc<CountingRecognizer>,
) -> Result<(RecordingOrchestrator, Arc<tokio::sync::Mutex<SessionStore>>)> {
    let fixture = dir.join("fixture.wav");
    if !fixture.exists() {
        write_fixture(&fixture, 15.0)?;
    }

    let store = Arc::new(tokio::sync::Mutex::new(SessionStore::open(dir)?));
    let capture = AudioCapture::new(
        Box::new(FileBackend::new(&fixture, 50)),
        Arc::new(GrantedPermissions),
        config.audio.clone(),
    );
    let pipeline = Arc::new(TranscriptionPipeline::new(
        recognizer,
        Duration::from_secs(config.transcription.segment_ceiling_secs),
        Duration::from_secs(config.transcription.safety_timeout_secs),
    ));
    let orchestrator = RecordingOrchestrator::new(
        config,
        Arc::clone(&store),
        capture,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
        Some(pipeline),
        Arc::new(NoopReminder),
    )?;
    Ok((orchestrator, store))
}

async fn wait_for_state(
    orchestrator: &RecordingOrchestrator,
    state: RecordingState,
) -> Result<()> {
    for _ in 0..100 {
        if orchestrator.snapshot().await.state == state {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("timed out waiting for {state:?}");
}

#[tokio::test]
async fn test_countdown_flows_into_recording_and_stop_saves_session() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    assert_eq!(orchestrator.snapshot().await.state, RecordingState::Idle);

    orchestrator.start_preparation().await?;
    assert_eq!(orchestrator.snapshot().await.state, RecordingState::Preparing);

    // The 1s countdown expires and capture starts on its own
    wait_for_state(&orchestrator, RecordingState::Recording).await?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.state, RecordingState::Finished);
    assert_eq!(snapshot.session_id, Some(session_id));
    assert!(!snapshot.saved_waveform.is_empty());

    // The session stub is persisted and the recording moved into the store
    let store = store.lock().await;
    let session = store.session(session_id).expect("session persisted");
    assert!(session.duration > 0.0);
    assert!(session.feedback.is_none());
    assert!(store.audio_path(session).exists());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_preparation_is_refused() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config(dir.path());
    config.recording.preparation_secs = 30;
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    let err = orchestrator.start_preparation().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState { .. }));
    Ok(())
}

#[tokio::test]
async fn test_skip_preparation_respects_threshold() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config(dir.path());
    config.recording.preparation_secs = 10;
    config.recording.skip_threshold_secs = 2;
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;

    // Too early: no countdown time has elapsed yet
    assert!(matches!(
        orchestrator.skip_preparation().await.unwrap_err(),
        OrchestratorError::InvalidState { .. }
    ));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(orchestrator.snapshot().await.can_skip_preparation);
    orchestrator.skip_preparation().await?;
    assert_eq!(orchestrator.snapshot().await.state, RecordingState::Recording);
    Ok(())
}

#[tokio::test]
async fn test_stop_refused_before_threshold() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config(dir.path());
    config.recording.stop_threshold_secs = 60;
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;

    assert!(matches!(
        orchestrator.stop_recording().await.unwrap_err(),
        OrchestratorError::StopNotAllowed(60)
    ));
    Ok(())
}

#[tokio::test]
async fn test_auto_stop_at_ceiling() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config(dir.path());
    config.recording.max_recording_secs = 1;
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    wait_for_state(&orchestrator, RecordingState::Finished).await?;

    assert!(orchestrator.snapshot().await.session_id.is_some());
    Ok(())
}

#[tokio::test]
async fn test_analyze_attaches_feedback_and_records_streak() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![Ok(good_feedback())]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    orchestrator.analyze().await?;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.state, RecordingState::Finished);
    assert!(snapshot.analysis_failure.is_none());
    assert_eq!(snapshot.streak_count, 1);

    let store = store.lock().await;
    let session = store.session(session_id).unwrap();
    assert!(session.feedback.is_some());
    assert_eq!(store.progress().total_sessions, 1);
    Ok(())
}

#[tokio::test]
async fn test_analysis_failure_is_stored_for_retry() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![Err(ScoringError::Timeout), Ok(good_feedback())]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    orchestrator.analyze().await?;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.state, RecordingState::Finished);
    let failure = snapshot.analysis_failure.expect("failure recorded");
    assert!(failure.retryable);
    assert_eq!(snapshot.streak_count, 0);

    // User-driven retry with the next scripted result succeeding
    orchestrator.analyze().await?;
    let snapshot = orchestrator.snapshot().await;
    assert!(snapshot.analysis_failure.is_none());
    assert!(store.lock().await.session(session_id).unwrap().feedback.is_some());
    Ok(())
}

#[tokio::test]
async fn test_daily_limit_failure_is_not_retryable() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![Err(ScoringError::DailyLimitReached)]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    orchestrator.stop_recording().await?;

    orchestrator.analyze().await?;
    let failure = orchestrator
        .snapshot()
        .await
        .analysis_failure
        .expect("failure recorded");
    assert!(!failure.retryable);
    Ok(())
}

#[tokio::test]
async fn test_practice_again_keeps_topic_and_saved_recording() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    let topic_before = orchestrator.snapshot().await.topic;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    orchestrator.practice_again().await?;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.state, RecordingState::Idle);
    assert_eq!(snapshot.topic.id, topic_before.id);
    assert!(snapshot.session_id.is_none());

    // The store-owned recording survives the reset
    let store = store.lock().await;
    let session = store.session(session_id).unwrap();
    assert!(store.audio_path(session).exists());
    Ok(())
}

#[tokio::test]
async fn test_new_topic_uses_generator_result() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let topics = QueueTopics::new(vec![Ok(generated_topic("Describe a sound you find calming"))]);
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        Arc::clone(&topics),
    )?;

    orchestrator.request_new_topic().await?;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.topic.title, "Describe a sound you find calming");
    assert!(!snapshot.fallback_notice);
    assert_eq!(topics.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_topic_generation_falls_back_after_three_failures() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let topics = QueueTopics::new(vec![
        Err(ScoringError::Timeout),
        Err(ScoringError::Network("down".into())),
        Err(ScoringError::Network("down".into())),
    ]);
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        Arc::clone(&topics),
    )?;

    let before = orchestrator.snapshot().await.topic;
    orchestrator.request_new_topic().await?;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(topics.calls(), 3);
    assert!(snapshot.fallback_notice, "fallback notice should be raised");
    assert_ne!(snapshot.topic.title, before.title);
    Ok(())
}

#[tokio::test]
async fn test_repeated_titles_from_generator_trigger_fallback() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    // First request installs "Describe an echo"; the second keeps returning
    // that same title, which is now excluded, until retries run out.
    let topics = QueueTopics::new(vec![
        Ok(generated_topic("Describe an echo")),
        Ok(generated_topic("Describe an echo")),
        Ok(generated_topic("Describe an echo")),
        Ok(generated_topic("Describe an echo")),
    ]);
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        Arc::clone(&topics),
    )?;

    orchestrator.request_new_topic().await?;
    assert_eq!(orchestrator.snapshot().await.topic.title, "Describe an echo");
    assert_eq!(topics.calls(), 1);

    orchestrator.request_new_topic().await?;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(topics.calls(), 4);
    assert!(snapshot.fallback_notice);
    assert_ne!(snapshot.topic.title, "Describe an echo");
    Ok(())
}

#[tokio::test]
async fn test_play_session_with_missing_audio_removes_record() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    // Remove the audio behind the store's back
    {
        let store = store.lock().await;
        let session = store.session(session_id).unwrap().clone();
        std::fs::remove_file(store.audio_path(&session))?;
    }

    let err = orchestrator.play_session(session_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::SessionAudioMissing));
    assert!(store.lock().await.session(session_id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_interrupted_recording_raises_recovery_notice() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    // Reach Recording and never stop, simulating a crash mid-session
    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    drop(orchestrator);

    let (recovered, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;
    let snapshot = recovered.snapshot().await;
    assert!(snapshot.recovery_notice);

    recovered.dismiss_recovery_notice().await;
    assert!(!recovered.snapshot().await.recovery_notice);

    // The flag is consumed; a third startup sees a clean state
    let (clean, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;
    assert!(!clean.snapshot().await.recovery_notice);
    Ok(())
}

#[tokio::test]
async fn test_transcript_attached_in_background_when_enabled() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let recognizer = Arc::new(CountingRecognizer {
        calls: AtomicUsize::new(0),
    });
    let (orchestrator, store) = build_with_recognizer(dir.path(), &config, Arc::clone(&recognizer))?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    // Transcription runs best-effort after the session is saved
    let mut transcript = None;
    for _ in 0..100 {
        transcript = store.lock().await.session(session_id).unwrap().transcript.clone();
        if transcript.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(transcript.as_deref(), Some("a full practice answer"));
    assert!(recognizer.calls.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_transcription_disabled_by_config() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config(dir.path());
    config.transcription.enabled = false;
    let recognizer = Arc::new(CountingRecognizer {
        calls: AtomicUsize::new(0),
    });
    let (orchestrator, store) = build_with_recognizer(dir.path(), &config, Arc::clone(&recognizer))?;

    orchestrator.start_preparation().await?;
    wait_for_state(&orchestrator, RecordingState::Recording).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let session_id = orchestrator.stop_recording().await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(store.lock().await.session(session_id).unwrap().transcript.is_none());
    Ok(())
}

#[tokio::test]
async fn test_analyze_refused_outside_finished() -> Result<()> {
    let dir = TempDir::new()?;
    let config = fast_config(dir.path());
    let (orchestrator, _store) = build(
        dir.path(),
        &config,
        QueueScorer::new(vec![]),
        QueueTopics::new(vec![]),
    )?;

    assert!(matches!(
        orchestrator.analyze().await.unwrap_err(),
        OrchestratorError::InvalidState { .. }
    ));
    Ok(())
}
