//! VRCNotif Monitor - VRChat log and notification watcher.
//!
//! This binary follows the VRChat client log to mute the game and loop an
//! ambience track while out of a room, chimes when players join or leave, and
//! chimes for push notifications received from the VRChat pipeline.
//!
//! # Commands
//!
//! - `vrcnotif run`: Start the monitor (default)
//! - `vrcnotif login`: Log in interactively and store the session
//! - `vrcnotif logout`: Remove stored credentials and session
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vrcnotif_monitor::audio::{AudioBackend, ClipLibrary, TracingAudio};
use vrcnotif_monitor::auth::SecondFactorKind;
use vrcnotif_monitor::config::Config;
use vrcnotif_monitor::credentials::{CredentialStore, Credentials, FileCredentialStore};
use vrcnotif_monitor::login::SessionManager;
use vrcnotif_monitor::monitor::Monitor;

/// VRCNotif Monitor - VRChat log and notification watcher.
///
/// Plays sounds for VRChat room transitions, player joins and leaves, and
/// push notifications.
#[derive(Parser, Debug)]
#[command(name = "vrcnotif")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    VRCNOTIF_LOG_DIR           VRChat log directory (default: platform location)
    VRCNOTIF_AUDIO_DIR         Directory with Join.wav, Leave.wav, ... (default: ./Audio)
    VRCNOTIF_DATA_DIR          Credential and session storage (default: platform data dir)
    VRCNOTIF_API_URL           VRChat API base URL
    VRCNOTIF_PIPELINE_URL      VRChat notification pipeline URL
    VRCNOTIF_USER_AGENT        User-Agent for API and pipeline requests
    VRCNOTIF_SCAN_INTERVAL_MS  Log poll period in milliseconds (default: 250)
    VRCNOTIF_MAX_EMPTY_SCANS   Empty scans before log discovery stops (default: 10)
    VRCNOTIF_RECONNECT_SECS    Pipeline reconnect delay in seconds (default: 5)

EXAMPLES:
    # Log in once to enable notification chimes
    vrcnotif login

    # Start the monitor
    vrcnotif

    # Start with verbose logging
    RUST_LOG=vrcnotif_monitor=debug vrcnotif run
")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the monitor.
    ///
    /// Follows the VRChat log and, when a session is stored, the
    /// notification pipeline.
    Run,

    /// Log in to VRChat.
    ///
    /// Prompts for username, password and, if required, a two-factor code.
    /// Stores the credentials and session token in the data directory.
    Login,

    /// Remove stored credentials and session token.
    Logout,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();
    let config = Config::from_env().context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => runtime.block_on(run_monitor(config)),
        Command::Login => runtime.block_on(run_login(config)),
        Command::Logout => run_logout(&config),
    }
}

/// Runs the monitor until a shutdown signal.
async fn run_monitor(config: Config) -> Result<()> {
    info!("Starting VRCNotif Monitor");
    info!(
        log_dir = ?config.log_dir,
        audio_dir = %config.audio_dir.display(),
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    let sessions = SessionManager::new(
        config.api_url.as_str(),
        config.user_agent.as_str(),
        FileCredentialStore::new(&config.data_dir),
    );
    let token = match sessions.restore(|kind| prompt(code_label(kind), false)).await {
        Ok(session) => session.map(|session| session.token),
        Err(e) => {
            warn!(error = %e, "Could not restore VRChat session");
            None
        }
    };

    let audio = build_audio(&config);
    let monitor = Monitor::new(config, audio);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    info!("Monitor running. Press Ctrl+C to stop.");
    monitor.run(token, cancel).await;

    Ok(())
}

/// Runs the interactive login command.
async fn run_login(config: Config) -> Result<()> {
    let sessions = SessionManager::new(
        config.api_url.as_str(),
        config.user_agent.as_str(),
        FileCredentialStore::new(&config.data_dir),
    );

    let username = prompt("Username: ", false)
        .await
        .context("Failed to read username")?;
    let password = prompt("Password: ", true)
        .await
        .context("Failed to read password")?;
    let credentials = Credentials::new(username, password);

    let session = sessions
        .login(&credentials, |kind| prompt(code_label(kind), false))
        .await
        .context("Login failed")?;

    match session {
        Some(_) => {
            println!("Logged in. Session saved to {}", sessions.store().dir().display());
            Ok(())
        }
        None => {
            eprintln!("Login failed.");
            std::process::exit(1);
        }
    }
}

/// Runs the logout command.
fn run_logout(config: &Config) -> Result<()> {
    let store = FileCredentialStore::new(&config.data_dir);
    store.clear().context("Failed to remove stored credentials")?;
    println!("Stored credentials removed from {}", store.dir().display());
    Ok(())
}

/// Prompt shown for a second-factor code.
fn code_label(kind: SecondFactorKind) -> &'static str {
    match kind {
        SecondFactorKind::Email => "Email 2FA Code: ",
        SecondFactorKind::Totp => "2FA Code: ",
    }
}

/// Reads one line from the terminal after printing `label`.
///
/// With `hidden`, typed characters are not echoed.
async fn prompt(label: &'static str, hidden: bool) -> io::Result<String> {
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        eprint!("{label}");
        io::stderr().flush()?;

        if hidden && io::stdin().is_terminal() {
            let input = {
                let _raw = RawMode::enable()?;
                read_keys()?
            };
            eprintln!();
            return Ok(input);
        }

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    })
    .await
    .map_err(io::Error::other)?
}

/// Raw terminal mode, restored on drop.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Reads key presses from the terminal up to Enter.
fn read_keys() -> io::Result<String> {
    collect_keys(std::iter::repeat_with(event::read))
}

/// Collects typed characters up to Enter. Backspace deletes, Ctrl+C aborts.
fn collect_keys(events: impl IntoIterator<Item = io::Result<Event>>) -> io::Result<String> {
    let mut input = String::new();
    for event in events {
        let Event::Key(key) = event? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(input),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "input cancelled"));
            }
            KeyCode::Char(c) => input.push(c),
            _ => {}
        }
    }
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "terminal input closed"))
}

/// Picks the audio backend: a real output device when compiled with
/// `playback` and available, otherwise logging only.
fn build_audio(config: &Config) -> Arc<dyn AudioBackend> {
    let library = ClipLibrary::new(&config.audio_dir);

    let missing = library.missing();
    if !missing.is_empty() {
        warn!(
            dir = %library.dir().display(),
            missing = ?missing,
            "Some audio clips are missing"
        );
    }

    #[cfg(feature = "playback")]
    {
        match vrcnotif_monitor::audio::CpalAudio::open(library.clone()) {
            Ok(audio) => return Arc::new(audio),
            Err(e) => warn!(error = %e, "Audio output unavailable, logging sounds instead"),
        }
    }

    Arc::new(TracingAudio::new(library))
}

/// Initializes the tracing subscriber for logging.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
