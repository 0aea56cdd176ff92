//! docdesk - headless terminal driver for the dashboard session lifecycle.
//!
//! Wires the session core exactly as the dashboard does at startup and lets
//! an operator exercise it from a terminal: each input line counts as a key
//! press, and notifications and session events are printed as they happen.

mod commands;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use docdesk_core::{
    ActivityMonitor, ActivitySignal, AuthBackend, Config, CredentialStore, FileStorage,
    HttpAuthBackend, KeyringStorage, LoginCredentials, Notification, NotificationQueue,
    SessionEvent, SessionOrchestrator, StorageBackend,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, HELP};

/// Log file name prefix in the cache directory (rotated daily)
const LOG_FILE_PREFIX: &str = "docdesk.log";

type InputLines = Lines<BufReader<Stdin>>;

/// Initialize the tracing subscriber for logging.
///
/// Logs go to a file so they do not interleave with the interactive output.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    if let Ok(url) = std::env::var("DOCDESK_API_URL") {
        config.api_base_url = url;
    }

    let cache_dir = config
        .cache_dir()
        .unwrap_or_else(|_| PathBuf::from("./cache"));
    std::fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;
    let _log_guard = init_tracing(&cache_dir);
    info!(api = %config.api_base_url, storage = ?config.storage, "docdesk starting");

    let backend: Arc<dyn AuthBackend> = Arc::new(HttpAuthBackend::new(&config.api_base_url)?);
    let refresh_buffer = config.session.refresh_buffer;
    let store = match config.storage {
        StorageBackend::File => {
            CredentialStore::new(backend, FileStorage::new(cache_dir.clone()), refresh_buffer)
        }
        StorageBackend::Keyring => {
            CredentialStore::new(backend, KeyringStorage::new(), refresh_buffer)
        }
    };
    store.restore();

    let monitor = Arc::new(ActivityMonitor::new(config.session.activity_signals.clone()));
    let orchestrator = SessionOrchestrator::new(
        config.session.clone(),
        Arc::new(store),
        monitor,
        NotificationQueue::new(),
    )?;
    orchestrator.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if orchestrator.current_session().is_authenticated() {
        println!("Resumed saved session.");
    } else {
        login(&orchestrator, &mut config, &mut lines).await?;
    }
    println!("{}\n", HELP);

    let result = run(&orchestrator, &mut config, &mut lines).await;

    orchestrator.shutdown();
    info!("docdesk shutting down");
    result
}

async fn run(
    orchestrator: &SessionOrchestrator,
    config: &mut Config,
    lines: &mut InputLines,
) -> Result<()> {
    let mut notifications = orchestrator.notifications();
    let mut events = orchestrator.events();
    let mut last_printed = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Command::Activity => {
                        orchestrator.record_signal(ActivitySignal::KeyPress);
                    }
                    Command::Stay => {
                        if !orchestrator.stay_logged_in() {
                            println!("No active session.");
                        }
                    }
                    Command::Refresh => match orchestrator.refresh().await {
                        Ok(session) => println!("Token refreshed, expires {}", format_expiry(session.expires_at)),
                        Err(e) => println!("Refresh failed: {}", e),
                    },
                    Command::Login => {
                        if orchestrator.current_session().is_authenticated() {
                            println!("Already signed in.");
                        } else {
                            login(orchestrator, config, lines).await?;
                        }
                    }
                    Command::Logout => {
                        if !orchestrator.logout() {
                            println!("Not signed in.");
                        }
                    }
                    Command::Status => print_status(orchestrator),
                    Command::Dismiss(n) => {
                        let target = orchestrator
                            .visible_notifications()
                            .into_iter()
                            .find(|note| note.id.value() == n);
                        match target {
                            Some(note) => {
                                orchestrator.dismiss(note.id);
                            }
                            None => println!("No notification #{}", n),
                        }
                    }
                    Command::Help => println!("{}", HELP),
                    Command::Quit => break,
                }
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let visible = notifications.borrow_and_update().clone();
                for note in unseen(&visible, last_printed) {
                    println!("[{:?}] {} {}", note.kind, note.id, note.message);
                    last_printed = note.id.value();
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::ExpiringSoon { remaining }) => {
                    println!(
                        "!! Session expires in {}s without activity. Type 'stay' to remain signed in.",
                        remaining.as_secs()
                    );
                }
                Ok(SessionEvent::LoggedOut { reason }) => {
                    println!("Signed out ({:?}). Type 'login' to sign in again.", reason);
                }
                Ok(SessionEvent::LoggedIn { .. }) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}

async fn login(
    orchestrator: &SessionOrchestrator,
    config: &mut Config,
    lines: &mut InputLines,
) -> Result<()> {
    println!("\n=== docdesk Login ===\n");

    let default_username = std::env::var("DOCDESK_USERNAME")
        .ok()
        .or_else(|| config.last_username.clone());

    let username = match default_username {
        Some(ref last) => {
            print!("Username [{}]: ", last);
            io::stdout().flush()?;
            let input = lines.next_line().await?.unwrap_or_default();
            let input = input.trim();
            if input.is_empty() {
                last.clone()
            } else {
                input.to_string()
            }
        }
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            lines.next_line().await?.unwrap_or_default().trim().to_string()
        }
    };

    let password = match std::env::var("DOCDESK_PASSWORD") {
        Ok(password) => password,
        Err(_) => tokio::task::spawn_blocking(|| rpassword::prompt_password("Password: "))
            .await
            .context("Password prompt task failed")??,
    };

    if username.is_empty() || password.is_empty() {
        println!("Username and password required.");
        return Ok(());
    }

    println!("\nAuthenticating...");
    match orchestrator
        .login(&LoginCredentials::new(username.clone(), password))
        .await
    {
        Ok(_) => {
            config.last_username = Some(username);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Login successful!\n");
        }
        Err(e) => println!("{}", e.user_message()),
    }
    Ok(())
}

/// Notifications newer than `last_seen`, in queue order.
fn unseen(visible: &[Notification], last_seen: u64) -> impl Iterator<Item = &Notification> {
    visible.iter().filter(move |note| note.id.value() > last_seen)
}

fn print_status(orchestrator: &SessionOrchestrator) {
    let session = orchestrator.current_session();
    println!("Session:  {:?}", session.status);
    if let Some(ref username) = session.username {
        println!("User:     {}", username);
    }
    println!("Expires:  {}", format_expiry(session.expires_at));
    match orchestrator.watchdog_state() {
        Some(state) => println!("Watchdog: {:?}", state),
        None => println!("Watchdog: stopped"),
    }
    let visible = orchestrator.visible_notifications();
    if !visible.is_empty() {
        println!("Notifications:");
        for note in visible {
            println!("  {} [{:?}] {}", note.id, note.kind, note.message);
        }
    }
}

fn format_expiry(expires_at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    match expires_at {
        Some(at) => at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}
