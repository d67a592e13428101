use anyhow::{anyhow, Result};
use bedtime_story::core::config::Config;
use bedtime_story::core::io::{NativeStorage, Storage};
use bedtime_story::services::backend::{HttpBackend, StaticToken};
use bedtime_story::services::cancel::CancelToken;
use bedtime_story::services::library::StoryLibrary;
use bedtime_story::services::setup;
use bedtime_story::services::telemetry::LogTelemetry;
use bedtime_story::services::transport::Transport;
use bedtime_story::services::workflow::{PipelineEvent, StoryPipeline};
use bedtime_story::{ErrorKind, StoryExperience};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists with a backend base_url.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("list") => {
            let library = StoryLibrary::new(storage, &config.library_folder);
            for story in library.list().await? {
                println!(
                    "{}  [{}]  {}{}",
                    story.session_id(),
                    story.theme(),
                    story.story_text().chars().take(60).collect::<String>(),
                    if story.is_fallback() { "  (offline)" } else { "" }
                );
            }
            return Ok(());
        }
        Some("remove") => {
            let id = args
                .get(1)
                .ok_or_else(|| anyhow!("usage: bedtime-story remove <session_id>"))?;
            let library = StoryLibrary::new(storage, &config.library_folder);
            if library.remove(id).await? {
                println!("Removed {}", id);
            } else {
                println!("No saved story {}", id);
            }
            return Ok(());
        }
        _ => {}
    }

    let input = setup::collect_input(&config)?;

    let tokens = Arc::new(StaticToken::new(config.backend.resolve_token()));
    let backend = Arc::new(HttpBackend::new(&config.backend, tokens)?);
    let (tx, rx) = unbounded_channel();
    let pipeline = StoryPipeline::new(&config, backend, Arc::new(LogTelemetry))
        .with_library(StoryLibrary::new(storage, &config.library_folder))
        .with_progress(tx);

    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let spinner = tokio::spawn(show_progress(rx));
    let result = pipeline.generate_from_input(&input, &cancel).await;
    drop(pipeline);
    let _ = spinner.await;

    match result {
        Ok(story) => {
            print_story(&story);
            Ok(())
        }
        Err(ErrorKind::Cancelled) => {
            println!("Cancelled.");
            Ok(())
        }
        Err(e) if e.is_user_facing() => {
            match &e {
                ErrorKind::InvalidInput { .. } => eprintln!("Please check your answers: {}", e),
                _ => eprintln!("Could not create a story right now. Please try again."),
            }
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn show_progress(mut rx: UnboundedReceiver<PipelineEvent>) {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Checking the story server...");

    let mut chars = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::TransportSelected(Transport::Direct) => pb.set_message("Writing story..."),
            PipelineEvent::TransportSelected(Transport::Stream) => pb.set_message("Connecting..."),
            PipelineEvent::TransportSelected(Transport::Fallback(_)) => {}
            PipelineEvent::StreamStarted => pb.set_message("Writing story..."),
            PipelineEvent::TextDelta(delta) => {
                chars += delta.chars().count();
                pb.set_message(format!("Writing story... {} characters", chars));
            }
            PipelineEvent::FetchingAssets => pb.set_message("Fetching narration and pictures..."),
            PipelineEvent::FallbackUsed(_) => pb.set_message("Server unavailable, telling a story from memory..."),
            PipelineEvent::Completed { .. } => pb.set_message("Done"),
        }
    }
    pb.finish_and_clear();
}

fn print_story(story: &StoryExperience) {
    println!("\n=== {} ===\n", story.theme());
    if story.bilingual_pairs().is_empty() {
        println!("{}", story.story_text());
    } else {
        for pair in story.bilingual_pairs() {
            println!("{}", pair.primary);
            if !pair.secondary.is_empty() {
                println!("  {}", pair.secondary);
            }
        }
    }
    println!();
    if !story.audio_url().is_empty() {
        println!("Narration: {}", story.audio_url());
    }
    for (i, frame) in story.frames().iter().enumerate() {
        println!("Scene {}: {}", i + 1, frame);
    }
    if story.is_fallback() {
        println!("(Told offline; the story server could not be reached.)");
    }
    println!("Saved as {}", story.session_id());
}
