use crate::config::Config;
use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod control_client;

pub use control_client::ControlClient;

#[derive(Parser, Debug)]
#[command(name = "meetscribe")]
#[command(about = "Record browser meetings and ship them for transcription", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Port of the local API (default: from config)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Start recording the current meeting tab, or stop the running recording
    Toggle,
    /// Show the current session
    Status,
    /// Capture the meeting tab into the session
    Screenshot,
    /// Print version information
    Version,
}

/// Port of the running daemon: the flag, else the configured one.
pub fn resolve_port(flag: Option<u16>) -> Result<u16> {
    match flag {
        Some(port) => Ok(port),
        None => Ok(Config::load()?.api.port),
    }
}

pub async fn handle_toggle_command(port: u16) -> Result<()> {
    let response = ControlClient::local(port).toggle().await?;
    if response.recording {
        println!("Recording started");
    } else {
        println!("Recording stopped, uploading");
    }
    Ok(())
}

pub async fn handle_status_command(port: u16) -> Result<()> {
    let snapshot = ControlClient::local(port).session().await?;

    println!("State: {}", snapshot.state);
    if !snapshot.recording {
        return Ok(());
    }
    println!(
        "Platform: {}",
        snapshot.platform.as_deref().unwrap_or("unknown")
    );
    if let Some(title) = snapshot.title.as_deref() {
        println!("Title: {}", title);
    }
    if let Some(started) = snapshot.start_time {
        let elapsed = (chrono::Utc::now() - started).num_seconds().max(0);
        println!(
            "Recording for: {}m {}s (since {})",
            elapsed / 60,
            elapsed % 60,
            started.format("%H:%M:%S")
        );
    }
    println!("Screenshots: {}", snapshot.screenshot_count);
    if snapshot.participants.is_empty() {
        println!("Participants: none reported");
    } else {
        println!("Participants: {}", snapshot.participants.join(", "));
    }
    Ok(())
}

pub async fn handle_screenshot_command(port: u16) -> Result<()> {
    let response = ControlClient::local(port).screenshot().await?;
    println!("Screenshot taken ({} in session)", response.screenshot_count);
    Ok(())
}
