//! Validation-session directory.
//!
//! Fetches the full session list and derives the display-friendly fields the
//! table shows. A fetch failure never propagates: the directory captures a
//! user-visible message and resets to an empty list so the screen stays
//! alive.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::{SessionRecord, SessionStatus, ValidationBackend};

/// Frame rate assumed when approximating a duration from the frame count.
pub(crate) const ASSUMED_FPS: f64 = 30.0;

const FETCH_FALLBACK: &str = "Could not load the validation session list.";

/// Display projection of one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRow {
    pub id: i64,
    pub filename: String,
    pub recorded_at: Option<DateTime<Utc>>,
    /// Approximate, derived from the frame count; `None` until processed.
    pub duration_secs: Option<u64>,
    pub detected_count: u32,
    pub max_capacity: u32,
    pub status: SessionStatus,
}

pub struct SessionDirectory {
    backend: Arc<dyn ValidationBackend>,
    sessions: Vec<SessionRecord>,
    error: Option<String>,
}

impl SessionDirectory {
    pub fn new(backend: Arc<dyn ValidationBackend>) -> Self {
        Self {
            backend,
            sessions: Vec::new(),
            error: None,
        }
    }

    /// Refetches the list. On failure the previous rows are dropped rather
    /// than left stale behind an error banner.
    pub fn refresh(&mut self) {
        match self.backend.list_sessions() {
            Ok(sessions) => {
                self.sessions = sessions;
                self.error = None;
            }
            Err(err) => {
                log::error!("session list fetch failed: {err}");
                self.error = Some(err.user_message(FETCH_FALLBACK));
                self.sessions.clear();
            }
        }
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn rows(&self) -> Vec<SessionRow> {
        self.sessions.iter().map(display_row).collect()
    }

    pub fn find(&self, session_id: i64) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Most recently created completed session, for jumping straight into
    /// review.
    pub fn latest_completed(&self) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .filter(|s| s.status() == SessionStatus::Completed)
            .max_by_key(|s| s.created_at)
    }
}

pub fn display_row(session: &SessionRecord) -> SessionRow {
    SessionRow {
        id: session.id,
        filename: filename_for(session),
        recorded_at: session.created_at,
        duration_secs: session
            .total_frames
            .map(|frames| (frames as f64 / ASSUMED_FPS).round() as u64),
        detected_count: session.detected_max_occupancy.unwrap_or(0),
        max_capacity: session.max_capacity_declared,
        status: session.status(),
    }
}

/// Final segment of the processed-else-original storage path.
fn filename_for(session: &SessionRecord) -> String {
    session
        .video_path()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("session-{}", session.id))
}
