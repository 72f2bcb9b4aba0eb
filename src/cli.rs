//! oclab - command-line surface for the validation lab.
//!
//! Subcommands mirror the lab's screens: `login`/`whoami` are the gate,
//! `sessions`/`run` are the laboratory, `review`/`export` are results.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{ApiClient, SessionRecord, ValidationBackend};
use crate::auth::{AuthSession, CredentialStore, FilesystemCredentialStore};
use crate::config::LabConfig;
use crate::detail::DetailLoader;
use crate::directory::SessionDirectory;
use crate::playback::PlaybackCorrelator;
use crate::report;
use crate::run::{BeginOutcome, RunController, RunEvent};

/// Cadence of the run drive loop; every stored deadline is far coarser.
const DRIVE_LOOP_STEP: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "oclab", about = "Occupancy validation lab client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in to the counting backend and persist the bearer token
    Login {
        /// Account email; defaults to the remembered one
        #[arg(long)]
        email: Option<String>,
        /// Password; prompted interactively when omitted
        #[arg(long)]
        password: Option<String>,
        /// Remember the email for the next login
        #[arg(long)]
        remember: bool,
    },

    /// Forget the stored bearer token
    Logout,

    /// Show the logged-in account
    Whoami,

    /// List validation sessions
    Sessions,

    /// Upload footage and drive a validation run to completion
    Run {
        /// Test footage to upload
        #[arg(long)]
        video: PathBuf,
        /// Declared maximum capacity; defaults to the configured value
        #[arg(long)]
        capacity: Option<u32>,
        /// Vehicle to associate with the session
        #[arg(long)]
        bus: Option<i64>,
    },

    /// Review detection results for a session (latest completed when omitted)
    Review {
        #[arg(long)]
        session: Option<i64>,
        /// Playhead positions to correlate, in seconds; repeatable
        #[arg(long = "at")]
        at: Vec<f64>,
    },

    /// Export validation reports as JSON
    Export {
        #[arg(long, conflicts_with = "all")]
        session: Option<i64>,
        /// Export every session in the directory
        #[arg(long)]
        all: bool,
        #[arg(long, default_value = "validation-report.json")]
        out: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = LabConfig::load()?;
    let store: Arc<dyn CredentialStore> =
        Arc::new(FilesystemCredentialStore::in_dir(&config.state_dir));
    let client = ApiClient::new(config.api_base_url.clone(), Arc::clone(&store))?;

    match args.command {
        Command::Login {
            email,
            password,
            remember,
        } => cmd_login(&client, &store, email, password, remember),
        Command::Logout => cmd_logout(&store),
        Command::Whoami => cmd_whoami(&client, &store),
        Command::Sessions => cmd_sessions(&client),
        Command::Run {
            video,
            capacity,
            bus,
        } => cmd_run(&config, &client, video, capacity, bus),
        Command::Review { session, at } => cmd_review(&config, &client, session, &at),
        Command::Export { session, all, out } => cmd_export(&client, session, all, &out),
    }
}

fn backend_of(client: &ApiClient) -> Arc<dyn ValidationBackend> {
    Arc::new(client.clone())
}

fn cmd_login(
    client: &ApiClient,
    store: &Arc<dyn CredentialStore>,
    email: Option<String>,
    password: Option<String>,
    remember: bool,
) -> Result<()> {
    let auth = AuthSession::new(Arc::clone(store));
    let email = email
        .or_else(|| auth.remembered_email())
        .ok_or_else(|| anyhow!("no email given and none remembered; pass --email"))?;
    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };

    let credentials = auth.login(client, &email, &password, remember)?;
    match credentials.user_email {
        Some(account) => println!("logged in as {account}"),
        None => println!("logged in"),
    }
    Ok(())
}

fn cmd_logout(store: &Arc<dyn CredentialStore>) -> Result<()> {
    AuthSession::new(Arc::clone(store)).logout()?;
    println!("logged out");
    Ok(())
}

fn cmd_whoami(client: &ApiClient, store: &Arc<dyn CredentialStore>) -> Result<()> {
    match client.get_current_user() {
        Ok(profile) => {
            println!("{}", profile.email);
            Ok(())
        }
        Err(err) => {
            // Offline or expired token: fall back to the cached header email.
            if let Some(cached) = store.load().ok().and_then(|c| c.user_email) {
                log::debug!("profile fetch failed, using cached email: {err}");
                println!("{cached} (cached)");
                Ok(())
            } else {
                Err(anyhow!(err.user_message("Could not fetch the current user.")))
            }
        }
    }
}

fn cmd_sessions(client: &ApiClient) -> Result<()> {
    let mut directory = SessionDirectory::new(backend_of(client));
    directory.refresh();
    if let Some(message) = directory.error() {
        return Err(anyhow!(message.to_string()));
    }

    let rows = directory.rows();
    if rows.is_empty() {
        println!("no validation sessions yet");
        return Ok(());
    }

    println!(
        "{:>5}  {:<32} {:<10} {:>9} {:>9} {:>9} {:<16}",
        "id", "file", "status", "detected", "capacity", "duration", "created"
    );
    for row in rows {
        let duration = row
            .duration_secs
            .map(|secs| format!("{}s", secs))
            .unwrap_or_else(|| "-".to_string());
        let created = row
            .recorded_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:<32} {:<10} {:>9} {:>9} {:>9} {:<16}",
            row.id, row.filename, row.status, row.detected_count, row.max_capacity, duration, created
        );
    }
    Ok(())
}

fn cmd_run(
    config: &LabConfig,
    client: &ApiClient,
    video: PathBuf,
    capacity: Option<u32>,
    bus: Option<i64>,
) -> Result<()> {
    let backend = backend_of(client);
    let mut directory = SessionDirectory::new(Arc::clone(&backend));
    let mut controller = RunController::new(Arc::clone(&backend), config.run.clone());
    let capacity = capacity.unwrap_or(config.default_max_capacity);

    let cancelled = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancelled);
    ctrlc::set_handler(move || cancel_flag.store(true, Ordering::SeqCst))?;

    let session_id = match controller.begin(&video, capacity, bus, Instant::now()) {
        BeginOutcome::Started { session_id } => session_id,
        BeginOutcome::Invalid { message } | BeginOutcome::Failed { message } => {
            return Err(anyhow!(message));
        }
    };
    directory.refresh();
    println!("session {session_id} created, footage uploaded");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        if cancelled.load(Ordering::SeqCst) {
            controller.cancel();
            bar.abandon_with_message("cancelled");
            println!("run cancelled; session {session_id} stays in the directory");
            return Ok(());
        }

        for event in controller.tick(Instant::now()) {
            match event {
                RunEvent::DirectoryRefreshRequested => directory.refresh(),
                RunEvent::RunFailed { message, .. } => {
                    bar.abandon_with_message("failed");
                    return Err(anyhow!(message));
                }
                RunEvent::ResultsReady {
                    session_id,
                    session,
                } => {
                    bar.finish_with_message("done");
                    return review_session(config, client, session_id, &[], session);
                }
            }
        }

        let status = controller.status();
        bar.set_position(u64::from(status.progress));
        bar.set_message(format!(
            "{} (est. {})",
            status.stage,
            format_countdown(status.countdown_remaining)
        ));

        std::thread::sleep(DRIVE_LOOP_STEP);
    }
}

fn cmd_review(
    config: &LabConfig,
    client: &ApiClient,
    session: Option<i64>,
    at: &[f64],
) -> Result<()> {
    let session_id = match session {
        Some(id) => id,
        None => {
            let mut directory = SessionDirectory::new(backend_of(client));
            directory.refresh();
            if let Some(message) = directory.error() {
                return Err(anyhow!(message.to_string()));
            }
            directory
                .latest_completed()
                .map(|s| s.id)
                .ok_or_else(|| anyhow!("no completed validation session to review"))?
        }
    };
    review_session(config, client, session_id, at, None)
}

/// The results screen: session summary, then occupancy correlated either at
/// the requested playheads or across the whole timeline.
fn review_session(
    config: &LabConfig,
    client: &ApiClient,
    session_id: i64,
    at: &[f64],
    session_hint: Option<SessionRecord>,
) -> Result<()> {
    let mut loader = DetailLoader::new(backend_of(client));
    loader.load(session_id);
    if let Some(message) = loader.error() {
        return Err(anyhow!(message.to_string()));
    }
    let session = loader
        .session()
        .cloned()
        .or(session_hint)
        .ok_or_else(|| anyhow!("session {session_id} not found"))?;

    println!("session {}: {}", session.id, session.status());
    println!(
        "  declared capacity {}, detected max {}",
        session.max_capacity_declared,
        session
            .detected_max_occupancy
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    if let Some(path) = session.video_path() {
        println!("  video: {path}");
    }

    let frames = loader.frames().to_vec();
    if frames.is_empty() {
        println!("  no detection frames recorded");
        return Ok(());
    }

    let mut correlator = PlaybackCorrelator::new(frames, session.max_capacity_declared);
    if let Some(window) = config.detection_window_secs {
        correlator = correlator.with_window(window);
    }

    let playheads: Vec<f64> = if at.is_empty() {
        correlator.frames().iter().map(|f| f.timestamp).collect()
    } else {
        at.to_vec()
    };

    println!("{:>9}  {:>6} {:>11}", "time", "count", "confidence");
    for playhead in playheads {
        let obs = correlator.seek(playhead);
        let confidence = obs
            .confidence
            .map(|c| format!("{c:.2}"))
            .unwrap_or_else(|| "-".to_string());
        let flag = if obs.capacity_exceeded {
            "  CAPACITY EXCEEDED"
        } else {
            ""
        };
        println!("{playhead:>8.1}s  {:>6} {confidence:>11}{flag}", obs.count);
    }
    Ok(())
}

fn cmd_export(
    client: &ApiClient,
    session: Option<i64>,
    all: bool,
    out: &std::path::Path,
) -> Result<()> {
    let backend = backend_of(client);
    if all {
        let mut directory = SessionDirectory::new(Arc::clone(&backend));
        directory.refresh();
        if let Some(message) = directory.error() {
            return Err(anyhow!(message.to_string()));
        }
        let fleet = report::build_fleet_report(&backend, directory.sessions())
            .map_err(|err| anyhow!(err.user_message("Could not build the fleet report.")))?;
        report::write_report(out, &fleet)?;
        println!(
            "wrote {} session reports to {}",
            fleet.sessions.len(),
            out.display()
        );
        return Ok(());
    }

    let session_id = session.ok_or_else(|| anyhow!("pass --session <id> or --all"))?;
    let single = report::build_session_report(&backend, session_id)
        .map_err(|err| anyhow!(err.user_message("Could not build the session report.")))?;
    report::write_report(out, &single)?;
    println!("wrote report for session {session_id} to {}", out.display());
    Ok(())
}

fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_formats_as_minutes_seconds() {
        assert_eq!(format_countdown(180), "3:00");
        assert_eq!(format_countdown(61), "1:01");
        assert_eq!(format_countdown(0), "0:00");
    }
}
