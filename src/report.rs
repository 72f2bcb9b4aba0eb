//! Validation report export.
//!
//! Builds the JSON payload the lab hands to operators: the session record,
//! the headline metrics, and the raw frame rows, stamped with a generation
//! time. Reports can cover one session or the whole directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::api::{ClientError, FrameStatRecord, SessionRecord, ValidationBackend};
use crate::detail;

#[derive(Debug, Serialize)]
pub struct ReportMetrics {
    pub detected_max_occupancy: Option<u32>,
    pub max_capacity_declared: u32,
    pub total_frames: Option<u64>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session: SessionRecord,
    pub metrics: ReportMetrics,
    pub frames: Vec<FrameStatRecord>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FleetReport {
    pub generated_at: DateTime<Utc>,
    pub sessions: Vec<SessionReport>,
}

pub fn build_session_report(
    backend: &Arc<dyn ValidationBackend>,
    session_id: i64,
) -> Result<SessionReport, ClientError> {
    let (session, frames) = detail::fetch_session_and_frames(backend, session_id)?;
    Ok(report_from(session, frames))
}

pub fn build_fleet_report(
    backend: &Arc<dyn ValidationBackend>,
    sessions: &[SessionRecord],
) -> Result<FleetReport, ClientError> {
    let mut reports = Vec::with_capacity(sessions.len());
    for session in sessions {
        reports.push(build_session_report(backend, session.id)?);
    }
    Ok(FleetReport {
        generated_at: Utc::now(),
        sessions: reports,
    })
}

fn report_from(session: SessionRecord, frames: Vec<FrameStatRecord>) -> SessionReport {
    let metrics = ReportMetrics {
        detected_max_occupancy: session.detected_max_occupancy,
        max_capacity_declared: session.max_capacity_declared,
        total_frames: session.total_frames,
        status: session.status().to_string(),
    };
    SessionReport {
        session,
        metrics,
        frames,
        generated_at: Utc::now(),
    }
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
