pub mod audio;
pub mod auth;
pub mod client;
pub mod config;
pub mod error; // contains api, channel, config, recording submodules
pub mod types;
pub mod voice;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use crate::audio::capture::MicrophoneCapture;
use crate::audio::output::SpeakerOutput;
use crate::client::api::FunctionsClient;
use crate::client::realtime::{RealtimeConnector, WsConnector};
use crate::config::AppConfig;
use crate::types::thread::Sender;
use crate::voice::controller::{
    Collaborators, ControllerSettings, Devices, Notice, UiUpdate, VoiceController,
};

#[derive(Parser, Debug)]
#[command(name = "mojo-voice")]
#[command(about = "Voice assistant client for Moms Fitness Mojo", long_about = None)]
struct Args {
    /// Base URL of the callable functions
    #[arg(long)]
    base_url: Option<String>,

    /// WebSocket URL for streaming transcription
    #[arg(long)]
    realtime_url: Option<String>,

    /// Language code for speech recognition and synthesis
    #[arg(short, long)]
    language: Option<String>,

    /// Speak answers aloud and keep the conversation going hands-free
    #[arg(long)]
    auto_speak: Option<bool>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mojo_voice=debug"
    } else {
        "mojo_voice=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_args(config: &mut AppConfig, args: &Args) {
    if let Some(url) = &args.base_url {
        config.server.functions_base_url = url.clone();
    }
    if let Some(url) = &args.realtime_url {
        config.server.realtime_url = Some(url.clone());
    }
    if let Some(language) = &args.language {
        config.voice.language_code = language.clone();
    }
    if let Some(auto_speak) = args.auto_speak {
        config.voice.auto_speak = auto_speak;
    }
}

fn render(update: UiUpdate) {
    match update {
        UiUpdate::ThreadAppended(item) => {
            let who = match item.sender {
                Sender::User => "you",
                Sender::Assistant => "mojo",
            };
            println!("{who}> {}", item.text);
            for (i, citation) in item.citations.iter().enumerate() {
                match &citation.url {
                    Some(url) => println!("    [{}] {} ({url})", i + 1, citation.title),
                    None => println!("    [{}] {}", i + 1, citation.title),
                }
            }
        }
        UiUpdate::ThreadRemoved(_) => println!("(last question withdrawn)"),
        UiUpdate::Recording(true) => println!("🎙 listening..."),
        UiUpdate::Recording(false) => println!("🎙 stopped"),
        UiUpdate::Transcript { partial } => println!("   … {partial}"),
        UiUpdate::Speaking(true) => println!("🔊 speaking"),
        UiUpdate::Speaking(false) => {}
        UiUpdate::ConversationMode(on) => {
            println!("conversation mode {}", if on { "on" } else { "off" })
        }
        UiUpdate::Notice(notice) => match notice {
            Notice::PermissionDenied(msg) => println!("⚠ microphone unavailable: {msg}"),
            Notice::RecordingFailed(msg) => println!("⚠ recording failed: {msg}"),
            Notice::CouldNotUnderstand => println!("⚠ sorry, I couldn't understand that"),
            Notice::RequestFailed(msg) => println!("⚠ assistant unavailable: {msg}"),
            Notice::SpeechFailed(msg) => println!("⚠ could not play the answer: {msg}"),
            Notice::ConversationEnded(reason) => println!("conversation ended ({reason})"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    auth::load_env();

    let mut config = AppConfig::load();
    apply_args(&mut config, &args);
    if args.save_config {
        config.save()?;
    }

    let mut client = FunctionsClient::new(&config.server, &config.voice.language_code)?;
    if let Some(id_token) = auth::id_token() {
        client.set_id_token(id_token.token);
    }
    let client = Arc::new(client);
    let realtime = config
        .server
        .realtime_url
        .as_ref()
        .map(|url| Arc::new(WsConnector::new(url.clone())) as Arc<dyn RealtimeConnector>);

    let collaborators = Collaborators {
        assistant: client.clone(),
        stt: client.clone(),
        tts: client,
        realtime,
    };
    let devices = Devices {
        capture: Box::new(MicrophoneCapture::new()),
        output: Box::new(SpeakerOutput::new()),
    };
    let (handle, mut ui, controller) =
        VoiceController::spawn(collaborators, devices, ControllerSettings::from(&config));

    tokio::spawn(async move {
        while let Some(update) = ui.recv().await {
            render(update);
        }
    });

    println!("Ask a question, or /mic to talk. /stop silences playback, /speak on|off, /quit exits.");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/mic" => {
                handle.toggle_recording();
            }
            "/stop" => {
                handle.stop_playback();
            }
            "/speak on" => {
                handle.set_auto_speak(true);
            }
            "/speak off" => {
                handle.set_auto_speak(false);
            }
            text => {
                handle.send_text(text);
            }
        }
    }

    handle.shutdown();
    controller.await?;
    Ok(())
}
