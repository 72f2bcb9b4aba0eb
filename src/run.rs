//! Upload-and-processing run controller.
//!
//! Drives a single validation run from file selection to results handoff:
//! create the backend session, upload the footage, keep the progress display
//! moving, and poll the backend until it confirms the outcome.
//!
//! Two kinds of timing feed the display:
//!
//! 1. cosmetic - a countdown estimate and a staged progress simulator on
//!    fixed schedules, with no relation to real backend timing;
//! 2. authoritative - the status poll. Only a poll reply with status
//!    `completed` finishes the run; the simulator can never complete it.
//!
//! The controller never sleeps. Every timer is a stored deadline, and all
//! behavior happens inside [`RunController::begin`], [`RunController::tick`],
//! and [`RunController::cancel`], which take the current instant from the
//! caller. That keeps the whole lifecycle drivable with fabricated instants
//! in tests, and makes cancellation exact: dropping the run state drops every
//! deadline, so nothing can fire afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{SessionRecord, SessionStatus, ValidationBackend};

/// Milestones for the cosmetic progress simulator, in order.
const STAGE_MILESTONES: &[(u8, &str)] = &[
    (30, "Analyzing video frames..."),
    (55, "Applying detection algorithms..."),
    (75, "Counting detected passengers..."),
    (90, "Generating metrics and reports..."),
];

const STAGE_UPLOADING: &str = "Uploading video to the server...";
const STAGE_PROCESSING: &str = "The video is being processed...";
const STAGE_COMPLETED: &str = "Video processed successfully";

const PROGRESS_AFTER_UPLOAD: u8 = 10;
const PROGRESS_PROCESSING_FLOOR: u8 = 20;

/// Timing knobs for a run. The countdown is display-only; the poll interval
/// is the authoritative cadence.
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Seed for the countdown display, in seconds.
    pub countdown_secs: u64,
    pub countdown_tick: Duration,
    pub stage_interval: Duration,
    pub poll_interval: Duration,
    /// How long the success stage stays on screen before the results handoff.
    pub handoff_delay: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            countdown_secs: 180,
            countdown_tick: Duration::from_secs(1),
            stage_interval: Duration::from_millis(2500),
            poll_interval: Duration::from_secs(3),
            handoff_delay: Duration::from_millis(2500),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Uploading,
    Processing,
    Completed,
}

/// Result of a [`RunController::begin`] attempt. Backend failures come back
/// as values, not errors: an upload that fails must degrade, never crash the
/// screen.
#[derive(Debug)]
pub enum BeginOutcome {
    Started { session_id: i64 },
    /// Precondition not met; nothing was sent to the backend.
    Invalid { message: String },
    /// Session creation or upload failed; the run was abandoned and the
    /// controller is idle again.
    Failed { message: String },
}

/// Side effects a tick asks its driver to perform.
#[derive(Clone, Debug)]
pub enum RunEvent {
    /// The session directory should refetch its list.
    DirectoryRefreshRequested,
    /// Authoritative completion was confirmed and the display delay elapsed;
    /// the driver should show the results for this session.
    ResultsReady {
        session_id: i64,
        session: Option<SessionRecord>,
    },
    /// The backend reported the session failed; the run was abandoned.
    RunFailed { session_id: i64, message: String },
}

/// Display snapshot of the controller.
#[derive(Clone, Debug)]
pub struct RunStatus {
    pub phase: RunPhase,
    pub progress: u8,
    pub stage: String,
    pub countdown_remaining: u64,
    pub session_id: Option<i64>,
}

/// Fixed-interval deadline. `fire` reports how many schedule points passed
/// and advances beyond them, so a late tick catches up instead of drifting.
#[derive(Clone, Copy, Debug)]
struct Ticker {
    next_at: Instant,
    every: Duration,
}

impl Ticker {
    fn starting_at(next_at: Instant, every: Duration) -> Self {
        debug_assert!(!every.is_zero());
        Self { next_at, every }
    }

    fn fire(&mut self, now: Instant) -> u32 {
        let mut fired = 0;
        while self.next_at <= now {
            self.next_at += self.every;
            fired += 1;
        }
        fired
    }
}

struct StageTicker {
    ticker: Ticker,
    next_index: usize,
}

struct Handoff {
    due_at: Instant,
    session: Option<SessionRecord>,
}

/// State of the active run. Holding the session id here for the whole run
/// means completion and cancellation always have it, whatever the interleaving.
struct ActiveRun {
    session_id: i64,
    video: PathBuf,
    phase: RunPhase,
    progress: u8,
    stage: String,
    countdown_remaining: u64,
    countdown: Option<Ticker>,
    stages: Option<StageTicker>,
    poll: Option<Ticker>,
    handoff: Option<Handoff>,
}

pub struct RunController {
    backend: Arc<dyn ValidationBackend>,
    settings: RunSettings,
    run: Option<ActiveRun>,
}

impl RunController {
    pub fn new(backend: Arc<dyn ValidationBackend>, settings: RunSettings) -> Self {
        Self {
            backend,
            settings,
            run: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.run.as_ref().map_or(RunPhase::Idle, |run| run.phase)
    }

    pub fn session_id(&self) -> Option<i64> {
        self.run.as_ref().map(|run| run.session_id)
    }

    pub fn status(&self) -> RunStatus {
        match &self.run {
            None => RunStatus {
                phase: RunPhase::Idle,
                progress: 0,
                stage: String::new(),
                countdown_remaining: 0,
                session_id: None,
            },
            Some(run) => RunStatus {
                phase: run.phase,
                progress: run.progress,
                stage: run.stage.clone(),
                countdown_remaining: run.countdown_remaining,
                session_id: Some(run.session_id),
            },
        }
    }

    /// Starts a run for the selected video: creates the backend session,
    /// uploads the file, and arms the processing timers.
    ///
    /// On success the caller should refresh the session directory; the new
    /// session is already in it.
    pub fn begin(
        &mut self,
        video: &Path,
        max_capacity: u32,
        bus_id: Option<i64>,
        now: Instant,
    ) -> BeginOutcome {
        if self.run.is_some() {
            return BeginOutcome::Invalid {
                message: "a validation run is already in progress".to_string(),
            };
        }
        if max_capacity == 0 {
            return BeginOutcome::Invalid {
                message: "configure a maximum capacity before uploading a video".to_string(),
            };
        }

        let session = match self.backend.create_session(max_capacity, bus_id) {
            Ok(session) => session,
            Err(err) => {
                log::error!("could not create validation session: {err}");
                return BeginOutcome::Failed {
                    message: err.user_message("Could not create the validation session."),
                };
            }
        };
        let session_id = session.id;

        let mut run = ActiveRun {
            session_id,
            video: video.to_path_buf(),
            phase: RunPhase::Uploading,
            progress: PROGRESS_AFTER_UPLOAD,
            stage: STAGE_UPLOADING.to_string(),
            countdown_remaining: self.settings.countdown_secs,
            countdown: None,
            stages: None,
            poll: None,
            handoff: None,
        };

        if let Err(err) = self.backend.upload_video(session_id, video) {
            log::error!("video upload for session {session_id} failed: {err}");
            return BeginOutcome::Failed {
                message: err.user_message("Could not upload the video."),
            };
        }

        // Processing: arm the countdown, the stage simulator, and the
        // authoritative poll. The first poll is due immediately.
        run.phase = RunPhase::Processing;
        run.progress = run.progress.max(PROGRESS_PROCESSING_FLOOR);
        run.stage = STAGE_PROCESSING.to_string();
        run.countdown = Some(Ticker::starting_at(
            now + self.settings.countdown_tick,
            self.settings.countdown_tick,
        ));
        run.stages = Some(StageTicker {
            ticker: Ticker::starting_at(
                now + self.settings.stage_interval,
                self.settings.stage_interval,
            ),
            next_index: 0,
        });
        run.poll = Some(Ticker::starting_at(now, self.settings.poll_interval));
        self.run = Some(run);

        BeginOutcome::Started { session_id }
    }

    /// Services every due deadline. Call at any cadence; deadlines that fell
    /// between calls are caught up.
    pub fn tick(&mut self, now: Instant) -> Vec<RunEvent> {
        let mut events = Vec::new();
        let Some(mut run) = self.run.take() else {
            return events;
        };

        // Handoff first: once due, the run is over whatever else is pending.
        if let Some(handoff) = run.handoff.take() {
            if now >= handoff.due_at {
                events.push(RunEvent::ResultsReady {
                    session_id: run.session_id,
                    session: handoff.session,
                });
                return events;
            }
            run.handoff = Some(handoff);
        }

        // Authoritative signal before the cosmetic ones: a completion seen in
        // this tick silences simulator updates that were also due.
        if run.poll.as_mut().map_or(0, |t| t.fire(now)) > 0 {
            match self.backend.get_session(run.session_id) {
                Ok(session) => match session.status() {
                    SessionStatus::Completed => {
                        run.phase = RunPhase::Completed;
                        run.progress = 100;
                        run.stage = STAGE_COMPLETED.to_string();
                        run.countdown_remaining = 0;
                        run.countdown = None;
                        run.stages = None;
                        run.poll = None;
                        run.handoff = Some(Handoff {
                            due_at: now + self.settings.handoff_delay,
                            session: Some(session),
                        });
                        events.push(RunEvent::DirectoryRefreshRequested);
                    }
                    SessionStatus::Failed => {
                        log::error!(
                            "backend reported session {} failed during processing",
                            run.session_id
                        );
                        events.push(RunEvent::RunFailed {
                            session_id: run.session_id,
                            message: "The backend could not process the video.".to_string(),
                        });
                        return events;
                    }
                    SessionStatus::Pending | SessionStatus::Processing => {}
                },
                // Transient poll failures are swallowed; the next poll retries.
                Err(err) => {
                    log::warn!("status poll for session {} failed: {err}", run.session_id)
                }
            }
        }

        if let Some(ticker) = run.countdown.as_mut() {
            let fired = u64::from(ticker.fire(now));
            if fired > 0 {
                run.countdown_remaining = run.countdown_remaining.saturating_sub(fired);
                if run.countdown_remaining == 0 {
                    run.countdown = None;
                }
            }
        }

        let mut stages_exhausted = false;
        if let Some(stages) = run.stages.as_mut() {
            for _ in 0..stages.ticker.fire(now) {
                if let Some(&(progress, label)) = STAGE_MILESTONES.get(stages.next_index) {
                    run.progress = progress;
                    run.stage = label.to_string();
                    stages.next_index += 1;
                } else {
                    stages_exhausted = true;
                    break;
                }
            }
        }
        if stages_exhausted {
            run.stages = None;
        }

        self.run = Some(run);
        events
    }

    /// Abandons the active run. Every stored deadline is dropped before this
    /// returns, so no further tick can mutate state for the cancelled run.
    /// The backend session is left as-is; it stays in the directory.
    pub fn cancel(&mut self) {
        if let Some(run) = self.run.take() {
            log::info!(
                "validation run for session {} cancelled ({})",
                run.session_id,
                run.video.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_catches_up_after_a_late_tick() {
        let start = Instant::now();
        let mut ticker = Ticker::starting_at(start, Duration::from_secs(1));
        assert_eq!(ticker.fire(start), 1);
        assert_eq!(ticker.fire(start), 0);
        assert_eq!(ticker.fire(start + Duration::from_millis(3500)), 3);
        assert_eq!(ticker.fire(start + Duration::from_secs(4)), 1);
    }

    #[test]
    fn idle_status_is_empty() {
        struct NoBackend;
        impl ValidationBackend for NoBackend {
            fn login(
                &self,
                _: &str,
                _: &str,
            ) -> Result<crate::api::LoginResponse, crate::api::ClientError> {
                unimplemented!()
            }
            fn get_current_user(
                &self,
            ) -> Result<crate::api::UserProfile, crate::api::ClientError> {
                unimplemented!()
            }
            fn list_sessions(&self) -> Result<Vec<SessionRecord>, crate::api::ClientError> {
                unimplemented!()
            }
            fn create_session(
                &self,
                _: u32,
                _: Option<i64>,
            ) -> Result<SessionRecord, crate::api::ClientError> {
                unimplemented!()
            }
            fn upload_video(&self, _: i64, _: &Path) -> Result<(), crate::api::ClientError> {
                unimplemented!()
            }
            fn get_session(&self, _: i64) -> Result<SessionRecord, crate::api::ClientError> {
                unimplemented!()
            }
            fn get_frame_stats(
                &self,
                _: i64,
            ) -> Result<Vec<crate::api::FrameStatRecord>, crate::api::ClientError> {
                unimplemented!()
            }
        }

        let controller = RunController::new(Arc::new(NoBackend), RunSettings::default());
        let status = controller.status();
        assert_eq!(status.phase, RunPhase::Idle);
        assert_eq!(status.progress, 0);
        assert!(status.stage.is_empty());
        assert!(status.session_id.is_none());
    }
}
