//! Per-session detail loading.
//!
//! The review screen needs the session record and its frame stats together;
//! both are fetched concurrently and joined before any state is applied, so a
//! half-loaded view is never observable. Failure of either fetch resets the
//! loader to its empty shape with a user-visible message.

use std::sync::Arc;
use std::thread;

use crate::api::{ClientError, FrameStatRecord, SessionRecord, ValidationBackend};
use crate::frames::{self, DetectionSample};

const DETAIL_FALLBACK: &str = "Could not load the session data.";

/// Fetches the session record and its frame stats concurrently. Both must
/// succeed; the first error wins.
pub fn fetch_session_and_frames(
    backend: &Arc<dyn ValidationBackend>,
    session_id: i64,
) -> Result<(SessionRecord, Vec<FrameStatRecord>), ClientError> {
    thread::scope(|scope| {
        let session = scope.spawn(|| backend.get_session(session_id));
        let frame_stats = scope.spawn(|| backend.get_frame_stats(session_id));

        let session = session
            .join()
            .map_err(|_| ClientError::Decode("session fetch thread panicked".to_string()))??;
        let frame_stats = frame_stats
            .join()
            .map_err(|_| ClientError::Decode("frame-stats fetch thread panicked".to_string()))??;
        Ok((session, frame_stats))
    })
}

pub struct DetailLoader {
    backend: Arc<dyn ValidationBackend>,
    session_id: Option<i64>,
    session: Option<SessionRecord>,
    frames: Vec<DetectionSample>,
    error: Option<String>,
}

impl DetailLoader {
    pub fn new(backend: Arc<dyn ValidationBackend>) -> Self {
        Self {
            backend,
            session_id: None,
            session: None,
            frames: Vec::new(),
            error: None,
        }
    }

    /// Switching sessions drops everything loaded for the previous id; the
    /// next `refresh` fetches the new one. No caching beyond the current id.
    pub fn set_session(&mut self, session_id: Option<i64>) {
        if self.session_id == session_id {
            return;
        }
        self.session_id = session_id;
        self.session = None;
        self.frames.clear();
        self.error = None;
    }

    pub fn refresh(&mut self) {
        let Some(session_id) = self.session_id else {
            return;
        };
        match fetch_session_and_frames(&self.backend, session_id) {
            Ok((session, frame_stats)) => {
                self.frames = frames::normalize_frames(&frame_stats);
                self.session = Some(session);
                self.error = None;
            }
            Err(err) => {
                log::error!("detail fetch for session {session_id} failed: {err}");
                self.error = Some(err.user_message(DETAIL_FALLBACK));
                self.session = None;
                self.frames.clear();
            }
        }
    }

    /// `set_session` + `refresh` in one step.
    pub fn load(&mut self, session_id: i64) {
        self.set_session(Some(session_id));
        self.refresh();
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    pub fn session(&self) -> Option<&SessionRecord> {
        self.session.as_ref()
    }

    pub fn frames(&self) -> &[DetectionSample] {
        &self.frames
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
