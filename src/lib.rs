//! Occupancy validation lab client.
//!
//! Client side of a passenger-counting transit-monitoring product. The hard
//! work (video decoding, person detection, occupancy inference) happens in an
//! external backend; this crate is everything the operator touches in front
//! of it: authentication, the validation-session directory, the
//! upload-and-processing run lifecycle, and frame-by-frame results review.
//!
//! # Module Structure
//!
//! - `api`: typed REST gateway with per-request bearer injection
//! - `auth`: persisted credentials and the login flow
//! - `config`: file + environment configuration
//! - `directory`: the validation-session list and its display rows
//! - `detail`: concurrent session + frame-stats loading
//! - `frames`: raw detection-metadata normalization
//! - `run`: the upload-and-processing run controller
//! - `playback`: playhead-to-frame correlation for review
//! - `report`: JSON report export
//! - `cli`: the `oclab` command-line surface
//!
//! Two rules hold everywhere:
//!
//! 1. Backend state is authoritative. Local timers only decorate the display;
//!    a run completes when the backend says `completed`, never before.
//! 2. Fetch failures degrade, they do not crash. Lists reset to empty with a
//!    user-visible message; an upload failure returns the lab to idle.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod detail;
pub mod directory;
pub mod frames;
pub mod playback;
pub mod report;
pub mod run;

pub use api::{
    ApiClient, ClientError, FrameStatRecord, LoginResponse, SessionRecord, SessionStatus,
    UserProfile, ValidationBackend,
};
pub use auth::{
    AuthSession, CredentialStore, FilesystemCredentialStore, MemoryCredentialStore,
    StoredCredentials,
};
pub use config::LabConfig;
pub use detail::DetailLoader;
pub use directory::{SessionDirectory, SessionRow};
pub use frames::{normalize_frame, normalize_frames, DetectionBox, DetectionSample};
pub use playback::{HistoryEntry, Observation, PlaybackCorrelator, DETECTION_HISTORY_LIMIT};
pub use report::{FleetReport, SessionReport};
pub use run::{
    BeginOutcome, RunController, RunEvent, RunPhase, RunSettings, RunStatus,
};
