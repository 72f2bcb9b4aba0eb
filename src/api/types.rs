//! Wire records for the counting backend's REST contract.
//!
//! Field names follow the backend's JSON exactly. Everything the backend may
//! omit or null is optional here; display defaults are applied by the
//! directory and detail layers, not during decoding.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a validation session as reported by the backend.
///
/// Status only ever moves forward: `pending -> processing -> completed`, or
/// `-> failed`. The client never writes a status; it re-fetches the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Backend rows carry the status as free-case text ("PENDING",
    /// "completed"). Unknown values are treated as pending.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "processing" => SessionStatus::Processing,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One validation session row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    #[serde(default)]
    pub bus_id: Option<i64>,
    pub max_capacity_declared: u32,
    #[serde(default)]
    pub original_video_path: Option<String>,
    #[serde(default)]
    pub original_video_url: Option<String>,
    #[serde(default)]
    pub processed_video_path: Option<String>,
    #[serde(default)]
    pub processed_video_url: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total_frames: Option<u64>,
    #[serde(default)]
    pub detected_max_occupancy: Option<u32>,
    #[serde(default, with = "flexible_time")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_time")]
    pub processing_finished_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_time")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "flexible_time")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn status(&self) -> SessionStatus {
        SessionStatus::parse(&self.status)
    }

    /// Processed video location when available, falling back to the original
    /// upload.
    pub fn video_path(&self) -> Option<&str> {
        self.processed_video_path
            .as_deref()
            .or(self.processed_video_url.as_deref())
            .or(self.original_video_path.as_deref())
            .or(self.original_video_url.as_deref())
    }
}

/// One per-frame detection row as stored by the backend.
///
/// `raw_metadata_json` is free-shape; see `frames` for the normalization
/// rules.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameStatRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub frame_index: Option<u64>,
    #[serde(default)]
    pub timestamp_relative: Option<f64>,
    #[serde(default)]
    pub detected_passengers: Option<u32>,
    #[serde(default)]
    pub raw_metadata_json: Option<serde_json::Value>,
    #[serde(default, with = "flexible_time")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionRequest {
    pub max_capacity_declared: u32,
    pub bus_id: Option<i64>,
}

/// The backend serializes timestamps either as RFC 3339 or as naive ISO 8601
/// (no offset, implicitly UTC). Unparseable values decode as `None` rather
/// than failing the whole record.
mod flexible_time {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_any_casing() {
        assert_eq!(SessionStatus::parse("COMPLETED"), SessionStatus::Completed);
        assert_eq!(SessionStatus::parse("completed"), SessionStatus::Completed);
        assert_eq!(SessionStatus::parse(" Processing "), SessionStatus::Processing);
        assert_eq!(SessionStatus::parse("FAILED"), SessionStatus::Failed);
    }

    #[test]
    fn unknown_status_is_pending() {
        assert_eq!(SessionStatus::parse("queued"), SessionStatus::Pending);
        assert_eq!(SessionStatus::parse(""), SessionStatus::Pending);
    }

    #[test]
    fn session_decodes_naive_timestamps() {
        let session: SessionRecord = serde_json::from_value(serde_json::json!({
            "id": 7,
            "max_capacity_declared": 50,
            "status": "PENDING",
            "created_at": "2025-03-14T09:26:53.589793",
        }))
        .unwrap();
        assert!(session.created_at.is_some());
        assert_eq!(session.status(), SessionStatus::Pending);
        assert!(session.total_frames.is_none());
    }

    #[test]
    fn video_path_prefers_processed() {
        let mut session: SessionRecord = serde_json::from_value(serde_json::json!({
            "id": 1,
            "max_capacity_declared": 40,
            "status": "completed",
            "original_video_path": "/media/raw/run1.mp4",
            "processed_video_path": "/media/processed/run1.mp4",
        }))
        .unwrap();
        assert_eq!(session.video_path(), Some("/media/processed/run1.mp4"));

        session.processed_video_path = None;
        assert_eq!(session.video_path(), Some("/media/raw/run1.mp4"));
    }
}
