use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use speakcoach::store::ScoreDimension;
use speakcoach::transcribe::RemoteRecognizer;
use speakcoach::{Config, SessionStore, TranscriptionPipeline};

#[derive(Parser)]
#[command(name = "speakcoach", about = "Speaking practice coach core")]
struct Cli {
    /// Config file path (without extension)
    #[arg(long, default_value = "config/speakcoach")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List stored practice sessions
    Sessions,
    /// Show progress averages and score trends
    Progress,
    /// Show disk usage of stored data
    Storage,
    /// Transcribe a WAV file through the remote recognizer
    Transcribe {
        path: PathBuf,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        api_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).unwrap_or_else(|_| {
        info!("No config file at {}, using defaults", cli.config);
        Config::default()
    });

    match cli.command {
        Command::Sessions => {
            let store = SessionStore::open(&PathBuf::from(&config.storage.data_dir))?;
            let sessions = store.all_sessions();
            info!("{} sessions on record", sessions.len());
            for session in sessions {
                let overall = session
                    .feedback
                    .as_ref()
                    .map(|f| format!("{:.1}", f.bands.overall()))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:.0}s  overall {}  {}",
                    session.date.format("%Y-%m-%d %H:%M"),
                    session.duration,
                    overall,
                    session.topic_title
                );
            }
        }
        Command::Progress => {
            let store = SessionStore::open(&PathBuf::from(&config.storage.data_dir))?;
            let progress = store.progress();
            println!("Scored sessions: {}", progress.total_sessions);
            println!("Overall average: {:.2}", progress.overall_average());
            println!("  Fluency:       {:.2}", progress.average_fluency);
            println!("  Lexical:       {:.2}", progress.average_lexical);
            println!("  Grammar:       {:.2}", progress.average_grammar);
            println!("  Pronunciation: {:.2}", progress.average_pronunciation);

            let sessions = store.all_sessions();
            for dimension in [
                ScoreDimension::Overall,
                ScoreDimension::Fluency,
                ScoreDimension::Lexical,
                ScoreDimension::Grammar,
                ScoreDimension::Pronunciation,
            ] {
                let trend = speakcoach::trend::trend_for(&sessions, dimension);
                println!("{:<14} {}", dimension.label(), trend.label());
            }
        }
        Command::Storage => {
            let store = SessionStore::open(&PathBuf::from(&config.storage.data_dir))?;
            let usage = store.storage_usage();
            println!("Recordings:  {} bytes", usage.recordings_bytes);
            println!("Persistence: {} bytes", usage.persistence_bytes);
            println!("Total:       {} bytes", usage.total_bytes());
        }
        Command::Transcribe { path, api_key, api_url } => {
            let recognizer = Arc::new(RemoteRecognizer::new(
                api_url,
                config.scoring.model.clone(),
                api_key,
            )?);
            let pipeline = TranscriptionPipeline::new(
                recognizer,
                Duration::from_secs(config.transcription.segment_ceiling_secs),
                Duration::from_secs(config.transcription.safety_timeout_secs),
            );
            let transcript = pipeline.transcribe(&path).await;
            if transcript.is_empty() {
                info!("No transcript produced");
            } else {
                println!("{transcript}");
            }
        }
    }

    Ok(())
}
