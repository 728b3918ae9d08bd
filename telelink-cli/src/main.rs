use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::{Input, Select};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use telelink::peer::{
    ChatMessage, LocalSignalingHub, Measurement, PeerConnectionState, PeerSession,
    SessionConfig, SessionHandle, SessionObserver,
};
use telelink::{BusinessRole, ClientId, PeerIdentity, RoomId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "telelink")]
#[command(about = "Peer-to-peer consultation sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a patient and a practitioner in this process and connect them.
    Loopback {
        #[arg(long, default_value = "loopback-room")]
        room: String,

        /// JSON file with session settings; missing fields keep their defaults.
        #[arg(short, long)]
        config: Option<String>,

        /// Reset the practitioner's connection once it is up.
        #[arg(long)]
        reset: bool,

        /// Chat between the two sessions from the terminal.
        #[arg(short, long)]
        interactive: bool,

        /// Seconds to wait for the data channel to open.
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Print the default session configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match Cli::parse().command {
        Commands::Loopback {
            room,
            config,
            reset,
            interactive,
            timeout,
        } => {
            let config = load_config(config.as_deref())?;
            run_loopback(RoomId::new(room), config, reset, interactive, Duration::from_secs(timeout)).await?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&SessionConfig::default())?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::local());
    };
    let text = fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read config file {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid session config in {path}"))
}

/// Prints what a session reports, tagged with the participant's role.
struct ConsoleObserver {
    tag: ColoredString,
}

impl ConsoleObserver {
    fn new(role: BusinessRole) -> Self {
        let tag = match role {
            BusinessRole::Patient => format!("[{role}]").cyan(),
            BusinessRole::Practitioner => format!("[{role}]").magenta(),
        };
        Self { tag }
    }
}

#[async_trait]
impl SessionObserver for ConsoleObserver {
    async fn on_connection_state_change(&self, state: PeerConnectionState) {
        let state = format!("{state:?}").to_lowercase();
        println!("{} connection {}", self.tag, state.yellow());
    }

    async fn on_room_ready(&self, ready: bool) {
        let text = if ready { "room ready".green() } else { "waiting for the other participant".dimmed() };
        println!("{} {}", self.tag, text);
    }

    async fn on_chat_message(&self, message: ChatMessage) {
        println!(
            "{} {} {}",
            self.tag,
            format!("<{}>", message.sender_role).bold(),
            message.content
        );
    }

    async fn on_measurement(&self, measurement: Measurement) {
        println!(
            "{} measurement {}/{} ({} bytes)",
            self.tag,
            measurement.device,
            measurement.kind,
            measurement.data.len()
        );
    }

    async fn on_data_channel_state(&self, available: bool) {
        let text = if available { "data channel open".green() } else { "data channel closed".red() };
        println!("{} {}", self.tag, text);
    }
}

fn spawn_session(
    hub: &LocalSignalingHub,
    room: &RoomId,
    config: &SessionConfig,
    role: BusinessRole,
) -> SessionHandle {
    let identity = PeerIdentity::new(ClientId::generate(), role);
    let signaling = hub.channel(room.clone(), identity.clone());
    PeerSession::builder(identity, room.clone(), Arc::new(signaling))
        .config(config.clone())
        .observer(Arc::new(ConsoleObserver::new(role)))
        .spawn()
}

async fn wait_for_channel(handle: &SessionHandle, role: BusinessRole, timeout: Duration) -> Result<()> {
    let mut status = handle.subscribe_status();
    tokio::time::timeout(timeout, status.wait_for(|s| s.data_channel_available))
        .await
        .with_context(|| format!("{role}: data channel did not open within {timeout:?}"))?
        .with_context(|| format!("{role}: session stopped"))?;
    Ok(())
}

async fn run_loopback(
    room: RoomId,
    config: SessionConfig,
    reset: bool,
    interactive: bool,
    timeout: Duration,
) -> Result<()> {
    println!("{}", format!("🩺 Starting loopback consultation in {room}").green().bold());
    let hub = LocalSignalingHub::new();
    let patient = spawn_session(&hub, &room, &config, BusinessRole::Patient);
    let practitioner = spawn_session(&hub, &room, &config, BusinessRole::Practitioner);

    patient.connect().await.context("Patient failed to connect")?;
    practitioner
        .connect()
        .await
        .context("Practitioner failed to connect")?;

    wait_for_channel(&patient, BusinessRole::Patient, timeout).await?;
    wait_for_channel(&practitioner, BusinessRole::Practitioner, timeout).await?;
    println!("{}", "✨ Consultation connected".green().bold());

    if reset {
        println!("{}", "🔄 Resetting the practitioner's connection...".cyan());
        practitioner.reset_peer_connection().await?;
        let mut status = practitioner.subscribe_status();
        tokio::time::timeout(
            timeout,
            status.wait_for(|s| s.reset_count > 0 && s.data_channel_available),
        )
        .await
        .context("Connection did not recover after reset")?
        .context("Practitioner session stopped")?;
        wait_for_channel(&patient, BusinessRole::Patient, timeout).await?;
        println!("{}", "✨ Connection recovered".green().bold());
    }

    if interactive {
        chat(&patient, &practitioner).await?;
    } else {
        practitioner.send_chat_message("Good morning, how are you feeling?").await;
        patient.send_chat_message("Better than yesterday.").await;
        patient
            .send_measurement("pulse-oximeter", "spo2", vec![97])
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    for (role, handle) in [("patient", &patient), ("practitioner", &practitioner)] {
        if let Some(diagnostics) = handle.connection_diagnostics().await {
            println!("{}", format!("📋 {role} diagnostics").cyan());
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }
    }

    patient.disconnect().await;
    practitioner.disconnect().await;
    info!("loopback finished");
    Ok(())
}

async fn chat(patient: &SessionHandle, practitioner: &SessionHandle) -> Result<()> {
    let speaker = tokio::task::spawn_blocking(|| {
        Select::new()
            .with_prompt("Chat as")
            .items(&["patient", "practitioner"])
            .default(0)
            .interact()
    })
    .await??;
    let (sender, label) = match speaker {
        0 => (patient, "patient"),
        _ => (practitioner, "practitioner"),
    };
    println!("{}", "Type a message; /reset rebuilds the connection, empty line quits.".dimmed());

    loop {
        let line = tokio::task::spawn_blocking(move || {
            Input::<String>::new()
                .with_prompt(label)
                .allow_empty(true)
                .interact_text()
        })
        .await??;

        match line.trim() {
            "" => break,
            "/reset" => sender.reset_peer_connection().await?,
            text => {
                if !sender.send_chat_message(text).await {
                    println!("{}", "data channel not open, message dropped".red());
                }
            }
        }
        // Let the receiving side print before the next prompt.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}
