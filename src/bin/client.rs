//! Character Client Demo
//!
//! Connects to a character, says hello, optionally streams a test tone as
//! voice input, and logs everything the character sends back.
//!
//! Usage: `character-client [config.toml] [--say TEXT] [--tone SECONDS]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use character_voice_client::{
    audio::{FrameSink, ToneHandle, ToneSource},
    constants::PLAYBACK_SAMPLE_RATE,
    CharacterClient, ClientConfig, ClientEvent, WebSocketConnector,
};

struct Args {
    config_path: Option<PathBuf>,
    greeting: String,
    tone_secs: u64,
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args {
        config_path: None,
        greeting: "Hello!".to_string(),
        tone_secs: 0,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--say" => parsed.greeting = args.next().context("--say needs text")?,
            "--tone" => {
                parsed.tone_secs = args
                    .next()
                    .context("--tone needs a duration in seconds")?
                    .parse()
                    .context("Invalid --tone duration")?;
            }
            path => parsed.config_path = Some(PathBuf::from(path)),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting character client");

    let args = parse_args()?;
    let config = match &args.config_path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::load_default()?,
    };
    config.validate()?;
    tracing::debug!("Configuration: {:?}", config);

    let (mut client, mut events) =
        CharacterClient::new(config, Arc::new(WebSocketConnector::new()));
    client.connect();

    // Tone frames arrive from a paced thread; playback is drained into a
    // scratch buffer since this demo has no output device
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let mut tone: Option<ToneHandle> = None;
    let mut voice_deadline: Option<Instant> = None;
    let mut render_buffer = vec![0.0f32; PLAYBACK_SAMPLE_RATE as usize / 50];
    let mut tick = tokio::time::interval(Duration::from_millis(20));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut shutting_down = false;
    let mut greeted = false;

    tracing::info!("Running - press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Connected(session) => {
                        tracing::info!("Connected, session {}", session.session_id);
                        if !greeted {
                            greeted = true;
                            client.send_text(&args.greeting);
                            if args.tone_secs > 0 {
                                client.start_voice_session();
                                tone = Some(ToneSource::default().spawn(frame_tx.clone())?);
                                voice_deadline =
                                    Some(Instant::now() + Duration::from_secs(args.tone_secs));
                                tracing::info!("Streaming test tone for {}s", args.tone_secs);
                            }
                        }
                    }
                    ClientEvent::BotResponse(update) if update.is_final => {
                        tracing::info!("Character: {}", update.text);
                    }
                    ClientEvent::Transcript(update) if update.is_final => {
                        tracing::info!("Heard: {}", update.text);
                    }
                    ClientEvent::BotResponse(_) | ClientEvent::Transcript(_) => {}
                    ClientEvent::VoiceReceived(segment) => {
                        tracing::debug!(
                            "Audio segment {} ({} samples)",
                            segment.sequence,
                            segment.samples.len()
                        );
                    }
                    ClientEvent::PlaybackStarted => tracing::info!("Playback started"),
                    ClientEvent::PlaybackComplete => tracing::info!("Playback complete"),
                    ClientEvent::Backpressure { dropped } => {
                        tracing::warn!("Outbound queue full, {} packets dropped", dropped);
                    }
                    ClientEvent::Error(message) => tracing::error!("{}", message),
                    ClientEvent::Disconnected => {
                        tracing::info!("Disconnected");
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                for frame in frame_rx.try_iter() {
                    client.supply(&frame);
                }
                if voice_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    voice_deadline = None;
                    if let Some(mut handle) = tone.take() {
                        handle.stop();
                    }
                    for frame in frame_rx.try_iter() {
                        client.supply(&frame);
                    }
                    if let Err(e) = client.end_voice_session() {
                        tracing::warn!("Failed to end voice session: {}", e);
                    }
                }
                client.render(&mut render_buffer);
            }
            _ = &mut ctrl_c, if !shutting_down => {
                tracing::info!("Shutting down");
                shutting_down = true;
                if let Some(mut handle) = tone.take() {
                    handle.stop();
                }
                client.disconnect();
            }
        }
    }

    let stats = client.encoder_stats();
    let playback = client.playback_stats();
    tracing::info!(
        "Stats: {} chunks sent ({:.1} KB), {} underruns, {} interrupts",
        stats.frames_encoded,
        stats.bytes_produced as f64 / 1024.0,
        playback.underrun_count,
        playback.interrupt_count
    );

    Ok(())
}
