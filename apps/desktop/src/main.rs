use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{
    transcript::{TranscriptRow, TranscriptView},
    ChatSession, ClientEvent,
};
use peer_transport::{
    loopback::{FixedMediaProvider, LoopbackNetwork},
    IceConfig,
};
use shared::domain::MessageDirection;
use storage::{JsonFileStore, MemoryStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

mod config;

/// Two-party chat and video-call demo over the in-process loopback
/// transport. Your history and theme persist under the data directory; the
/// scripted remote peer echoes whatever you type.
#[derive(Parser, Debug)]
struct Args {
    /// Directory for persisted chat history and theme preference.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Optional TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = config::load_settings(args.config.as_deref());
    let data_dir = args.data_dir.unwrap_or_else(|| settings.data_dir.clone());

    let network = LoopbackNetwork::new();
    let ice = IceConfig {
        stun_servers: vec![settings.stun_server.clone()],
    };

    let local = ChatSession::new(
        Arc::new(network.clone()),
        Arc::new(FixedMediaProvider::default()),
        Arc::new(JsonFileStore::new(&data_dir)),
        ice.clone(),
    );
    // The scripted remote peer lives in the same process; its history is
    // ephemeral.
    let remote = ChatSession::new(
        Arc::new(network.clone()),
        Arc::new(FixedMediaProvider::default()),
        Arc::new(MemoryStore::default()),
        ice,
    );

    let mut local_events = local.subscribe_events();
    let mut remote_events = remote.subscribe_events();

    let code = local.open().await?;
    println!("Your Code: {code}  [online]");
    remote.open().await?;

    let mut transcript = TranscriptView::new(settings.transcript_limit);

    // The remote peer dials us, which also exercises the auto-answer path.
    remote.connect(code.as_str()).await?;

    // Wait until our side has bound the inbound channel before the scripted
    // peer speaks, then let the event loop take over.
    while let Ok(event) = local_events.recv().await {
        let connected = matches!(event, ClientEvent::PeerConnected { .. });
        handle_local_event(event, &mut transcript);
        if connected {
            break;
        }
    }
    remote.send_message("hey, good to see you again").await?;

    println!(
        "Type a message and press Enter to send; /connect <code> dials, /theme toggles, /quit exits."
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = local_events.recv() => {
                match event {
                    Ok(event) => handle_local_event(event, &mut transcript),
                    Err(_) => break,
                }
            }
            event = remote_events.recv() => {
                if let Ok(ClientEvent::MessageAppended(record)) = event {
                    if record.direction == MessageDirection::Received {
                        let _ = remote.send_message(&format!("echo: {}", record.text)).await;
                    }
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) if line.trim() == "/theme" => {
                        let theme = local.toggle_theme().await?;
                        println!("[theme] control now shows '{}'", theme.toggle_label());
                    }
                    Some(line) if line.trim().starts_with("/connect") => {
                        let target = line.trim().trim_start_matches("/connect").trim().to_string();
                        match local.connect(&target).await {
                            Ok(remote) => println!("[peer {remote}] dialing"),
                            Err(err) => warn!("connect rejected: {err}"),
                        }
                    }
                    Some(line) => {
                        if let Err(err) = local.send_message(&line).await {
                            warn!("send rejected: {err}");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    local.close().await?;
    remote.close().await?;
    Ok(())
}

fn handle_local_event(event: ClientEvent, transcript: &mut TranscriptView) {
    match event {
        ClientEvent::HistoryLoaded { messages, fault } => {
            if fault.is_some() {
                println!("[history] previous log was unreadable; starting fresh");
            }
            transcript.seed_from_history(&messages);
            for row in transcript.rows() {
                print_row(row);
            }
        }
        ClientEvent::MessageAppended(record) => {
            transcript.push_message(record.clone());
            if transcript.is_following() {
                print_row(&TranscriptRow::Message(record));
            }
        }
        ClientEvent::PeerConnected { remote } => println!("[peer {remote}] connected"),
        ClientEvent::PeerDisconnected { remote } => println!("[peer {remote}] disconnected"),
        ClientEvent::LocalStreamReady(stream) => {
            println!("[media] local stream {}", stream.stream_id);
        }
        ClientEvent::RemoteStreamReady(stream) => {
            println!("[media] remote stream {}", stream.stream_id);
        }
        ClientEvent::MediaFailed(err) => println!("[media] unavailable: {err}"),
        ClientEvent::CallEnded => println!("[media] call ended"),
        ClientEvent::IdentityReady { .. } | ClientEvent::ThemeChanged(_) => {}
        ClientEvent::Error(message) => eprintln!("[error] {message}"),
    }
}

fn print_row(row: &TranscriptRow) {
    match row {
        TranscriptRow::Divider(label) => println!("--- {label} ---"),
        TranscriptRow::Message(record) => {
            let marker = match record.direction {
                MessageDirection::Sent => ">",
                MessageDirection::Received => "<",
            };
            println!("{marker} [{}] {}", record.time, record.text);
        }
    }
}
