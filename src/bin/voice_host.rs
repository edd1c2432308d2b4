//! Console host for a live care-coordination voice session.
//!
//! Tracing goes to stderr; status and transcript lines go to stdout.

use anyhow::Context;
use care_voice::audio::capture::CpalCapture;
use care_voice::audio::device::CpalDevices;
use care_voice::audio::playback::CpalPlayback;
use care_voice::tools::{ParameterSpec, ToolDeclaration};
use care_voice::transport::LiveConnector;
use care_voice::{
    ActionCall, CapabilitySet, HandlerCell, RuntimeEvent, SessionConfig, StartRequest, Status,
    VoiceSession,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CARE_INSTRUCTIONS: &str = "You are the Clearwater Ridge Voice AI. \
Your goal is to help coordinate care in under 5 turns.
1. When you hear a patient's name, immediately use getPatientInfo.
2. Once you have the data, give a 1-sentence summary of their status (Next visit, ride status, or alerts).
3. Be warm, professional, and clear.
4. If they need a ride or help, use the tools.
Keep your spoken responses brief so the user can respond quickly.";

/// Live voice sessions with a remote care-coordination agent.
#[derive(Parser)]
#[command(name = "care-voice-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role context for the agent.
    #[arg(long, env = "CARE_VOICE_ROLE", default_value = "PATIENT")]
    role: String,

    /// Voice persona (overrides the configured default).
    #[arg(long)]
    voice: Option<String>,

    /// TOML file with tool declarations and instructions.
    #[arg(long)]
    capabilities: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session.
    Chat,

    /// List available audio devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("care_voice=info,care_voice_host=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Command::Devices) => list_devices(),
        Some(Command::Chat) | None => {
            let capabilities = match cli.capabilities {
                Some(ref path) => load_capabilities(path)?,
                None => care_capabilities(),
            };
            let mut request = StartRequest::new(cli.role, capabilities);
            if let Some(voice) = cli.voice {
                request = request.with_voice(voice);
            }
            run_chat(config, request).await
        }
    }
}

/// Explicit `--config`, else the per-user file if present, else defaults.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<SessionConfig> {
    if let Some(path) = explicit {
        return Ok(SessionConfig::from_file(path)?);
    }
    let path = SessionConfig::default_config_path();
    if path.is_file() {
        info!("loading config from {}", path.display());
        Ok(SessionConfig::from_file(&path)?)
    } else {
        Ok(SessionConfig::default())
    }
}

async fn run_chat(config: SessionConfig, request: StartRequest) -> anyhow::Result<()> {
    println!("Care Voice v{}", env!("CARGO_PKG_VERSION"));

    let connector = Arc::new(LiveConnector::new(&config));
    let session = VoiceSession::new(
        config,
        Arc::new(CpalDevices),
        connector,
        HandlerCell::new(handle_action),
    );

    let mut events = session.subscribe_events();
    let info = session.start(request).await?;
    println!(
        "\nSession {} open as {} (voice {}). Speak into your microphone. Press Ctrl+C to stop.\n",
        info.id, info.role, info.voice
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                session.stop().await;
                break;
            }
            event = events.recv() => match event {
                Ok(RuntimeEvent::StatusChanged(status)) => {
                    if status != Status::Idle {
                        println!("[{status}]");
                    }
                }
                Ok(RuntimeEvent::Transcript(fragment)) => {
                    println!("{:?}: {}", fragment.speaker, fragment.text);
                }
                Ok(RuntimeEvent::Interrupted { flushed }) => {
                    println!("(interrupted, {flushed} buffers dropped)");
                }
                Ok(RuntimeEvent::SessionEnded { reason }) => {
                    println!("\nSession ended: {reason:?}");
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("skipped {n} runtime events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let transcript = session.transcript();
    if !transcript.is_empty() {
        println!("\nYou said: {}\nAgent said: {}", transcript.user, transcript.agent);
    }
    Ok(())
}

/// Console stand-in for the care application's action handler.
fn handle_action(call: &ActionCall) -> anyhow::Result<Option<String>> {
    info!(action = %call.action, args = ?call.args, "agent action");
    let reply = match call.action.as_str() {
        "GETPATIENTINFO" => {
            let name = call.arg_str("patientName").unwrap_or_default();
            format!("Patient {name} was not found.")
        }
        "NAVIGATE" => {
            let target = call
                .arg_str("target")
                .context("navigate needs a target")?;
            println!("-> navigate to {target}");
            "Navigating now.".to_owned()
        }
        "REPORTMEDICALHELP" => {
            let patient = call.arg_str("patientId").unwrap_or("unknown");
            println!("!! medical help requested for patient {patient}");
            "Help alert sent to the nurse station.".to_owned()
        }
        _ => return Ok(None),
    };
    Ok(Some(reply))
}

fn care_capabilities() -> CapabilitySet {
    CapabilitySet {
        tools: vec![
            ToolDeclaration::new(
                "getPatientInfo",
                "Retrieve status, appointments, and transportation details for a patient by name.",
            )
            .with_parameter(
                "patientName",
                ParameterSpec::string("Full name of the patient.").required(),
            ),
            ToolDeclaration::new(
                "navigate",
                "Move to a different view: home, inbox, nurse, driver, doctor.",
            )
            .with_parameter(
                "target",
                ParameterSpec::one_of(["home", "inbox", "nurse", "driver", "doctor"]).required(),
            ),
            ToolDeclaration::new("reportMedicalHelp", "Trigger urgent medical alert for a patient.")
                .with_parameter(
                    "patientId",
                    ParameterSpec::string("Identifier of the patient.").required(),
                ),
        ],
        instructions: CARE_INSTRUCTIONS.to_owned(),
    }
}

fn load_capabilities(path: &Path) -> anyhow::Result<CapabilitySet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid capabilities in {}", path.display()))
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalPlayback::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}
