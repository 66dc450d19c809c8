use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    device::BridgeSet,
    events::RecorderEvent,
    flow::{generate_session_flow, parse_flow},
    models::Platform,
    recording::{RecordingController, StartRequest, StoppedRecording},
    settings::RecorderSettings,
    store::{list_sessions, read_session_metadata},
};

#[derive(Debug, Parser)]
#[command(name = "flowcap", version, about = "Record mobile sessions into Maestro flows")]
pub struct Cli {
    /// Settings file (JSON). Defaults to the per-user config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where sessions and the pending snapshot live.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices visible to adb and simctl.
    Devices,
    /// Record a session until Ctrl-C.
    Record {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        device: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        app_id: Option<String>,
    },
    /// Finalise a session interrupted by a crash.
    Recover,
    /// List recorded sessions, newest first.
    Sessions {
        #[arg(long)]
        json: bool,
    },
    /// Print the actions of a flow file as JSON.
    Parse { file: PathBuf },
    /// Print the flow of a recorded session's session.json.
    Generate { session: PathBuf },
    /// Tap a device once.
    Tap {
        #[arg(long)]
        platform: Platform,
        #[arg(long)]
        device: String,
        x: i32,
        y: i32,
    },
}

fn load_settings(cli: &Cli) -> Result<RecorderSettings> {
    let config = cli.config.clone().or_else(|| {
        dirs::config_dir().map(|dir| dir.join("flowcap").join("settings.json"))
    });
    let settings = RecorderSettings::load(config.as_deref())?;
    Ok(match &cli.data_dir {
        Some(dir) => settings.with_data_dir(dir.clone()),
        None => settings,
    })
}

pub async fn execute(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;

    match cli.command {
        Command::Devices => {
            let controller = controller(settings);
            let devices = controller.list_devices().await;
            if devices.is_empty() {
                println!("no devices found");
            }
            for device in devices {
                println!("{:<8} {:<40} {}", device.platform.as_str(), device.id, device.name);
            }
        }
        Command::Record {
            platform,
            device,
            name,
            app_id,
        } => {
            let controller = controller(settings);
            if let Some(pending) = controller.recover_pending().await? {
                println!("finalising interrupted session {} first", pending.id);
                report(&controller.stop_recording().await?);
            }
            record(&controller, platform, device, name, app_id).await?;
        }
        Command::Recover => {
            let controller = controller(settings);
            match controller.recover_pending().await? {
                Some(_) => report(&controller.stop_recording().await?),
                None => println!("nothing to recover"),
            }
        }
        Command::Sessions { json } => {
            let sessions = list_sessions(&settings.sessions_dir())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                for session in sessions {
                    println!(
                        "{}  {:<9} {:<7} {:>4} actions  {}",
                        session.started_at.format("%Y-%m-%d %H:%M"),
                        session.status.as_str(),
                        session.capture_mode.as_str(),
                        session.action_count,
                        session.name
                    );
                }
            }
        }
        Command::Parse { file } => {
            let script = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&parse_flow(&script))?);
        }
        Command::Generate { session } => {
            let session = read_session_metadata(&session)?;
            print!("{}", generate_session_flow(&session));
        }
        Command::Tap {
            platform,
            device,
            x,
            y,
        } => {
            let controller = controller(settings);
            controller.inject_tap(platform, &device, x, y).await?;
            println!("tapped {x},{y} on {device}");
        }
    }

    Ok(())
}

fn controller(settings: RecorderSettings) -> RecordingController {
    let bridges = BridgeSet::system(&settings);
    RecordingController::new(settings, bridges)
}

async fn record(
    controller: &RecordingController,
    platform: Platform,
    device_id: String,
    name: Option<String>,
    app_id: Option<String>,
) -> Result<()> {
    let mut events = controller.subscribe();
    let session = controller
        .start_recording(StartRequest {
            platform,
            device_id,
            device_name: None,
            name,
            app_id,
        })
        .await?;

    println!(
        "recording {} in {} mode, Ctrl-C to stop",
        session.id,
        session.capture_mode.as_str()
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => log::warn!("skipped {skipped} recorder events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("stopping...");
    report(&controller.stop_recording().await?);
    Ok(())
}

fn print_event(event: &RecorderEvent) {
    match event {
        RecorderEvent::ActionRecorded { action, .. } => {
            println!("  {} {}", action.id, action.kind.label())
        }
        RecorderEvent::CaptureModeChanged { capture_mode, .. } => {
            println!("  capture switched to {} mode", capture_mode.as_str())
        }
        _ => log::debug!("{}", serde_json::to_string(event).unwrap_or_default()),
    }
}

fn report(stopped: &StoppedRecording) {
    let session = &stopped.session;
    println!(
        "session {} stopped with {} actions",
        session.id,
        session.actions.len()
    );
    if let Some(flow_path) = &session.flow_path {
        println!("flow: {}", flow_path.display());
    }
    if let Some(video_path) = &session.video_path {
        println!("video: {}", video_path.display());
    }
}
