//! HTTP gateway to the counting backend.
//!
//! `ApiClient` wraps the REST contract behind typed operations and attaches
//! the stored bearer token to every request (the token is re-read from the
//! credential store per request, so a fresh login is picked up immediately).
//!
//! The session-facing operations are also exposed as the
//! [`ValidationBackend`] trait so the run controller and the loaders can be
//! exercised against an in-memory backend in tests.

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::CredentialStore;

pub mod error;
pub mod types;

pub use error::{user_message, ClientError};
pub use types::{
    CreateSessionRequest, FrameStatRecord, LoginResponse, SessionRecord, SessionStatus,
    UserProfile,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Video uploads get a much longer per-request timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Backend operations consumed by the lab screens.
pub trait ValidationBackend: Send + Sync {
    fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError>;
    fn get_current_user(&self) -> Result<UserProfile, ClientError>;
    fn list_sessions(&self) -> Result<Vec<SessionRecord>, ClientError>;
    fn create_session(
        &self,
        max_capacity: u32,
        bus_id: Option<i64>,
    ) -> Result<SessionRecord, ClientError>;
    fn upload_video(&self, session_id: i64, video: &Path) -> Result<(), ClientError>;
    fn get_session(&self, session_id: i64) -> Result<SessionRecord, ClientError>;
    fn get_frame_stats(&self, session_id: i64) -> Result<Vec<FrameStatRecord>, ClientError>;
}

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    http: Client,
    store: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(base: Url, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base, http, store })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Joins by plain concatenation so a base of `.../api/v1` keeps its
    /// prefix (Url::join would drop it for absolute paths).
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.store.load() {
            Ok(credentials) => match credentials.access_token {
                Some(token) if !token.is_empty() => request.bearer_auth(token),
                _ => request,
            },
            Err(err) => {
                log::warn!("credential store unreadable, sending unauthenticated: {err}");
                request
            }
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let request = self.authorize(self.http.get(self.endpoint(path)));
        read_json(request.send()?)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let form = [("username", email), ("password", password)];
        let request = self
            .authorize(self.http.post(self.endpoint("/auth/login")))
            .form(&form);
        read_json(request.send()?)
    }

    pub fn get_current_user(&self) -> Result<UserProfile, ClientError> {
        self.get_json("/users/me")
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>, ClientError> {
        let value: serde_json::Value = self.get_json("/validation/sessions")?;
        Ok(coerce_list(value, "session"))
    }

    pub fn create_session(
        &self,
        max_capacity: u32,
        bus_id: Option<i64>,
    ) -> Result<SessionRecord, ClientError> {
        let body = CreateSessionRequest {
            max_capacity_declared: max_capacity,
            bus_id,
        };
        let request = self
            .authorize(self.http.post(self.endpoint("/validation/sessions")))
            .json(&body);
        read_json(request.send()?)
    }

    pub fn upload_video(&self, session_id: i64, video: &Path) -> Result<(), ClientError> {
        let form = multipart::Form::new()
            .file("file", video)
            .map_err(|err| ClientError::Io {
                path: video.display().to_string(),
                source: err,
            })?;
        let path = format!("/validation/sessions/{session_id}/upload-video");
        let request = self
            .authorize(self.http.post(self.endpoint(&path)))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form);
        let response = request.send()?;
        check_status(response).map(|_| ())
    }

    pub fn get_session(&self, session_id: i64) -> Result<SessionRecord, ClientError> {
        self.get_json(&format!("/validation/sessions/{session_id}"))
    }

    pub fn get_frame_stats(&self, session_id: i64) -> Result<Vec<FrameStatRecord>, ClientError> {
        let path = format!("/validation/sessions/{session_id}/frame-stats");
        let value: serde_json::Value = self.get_json(&path)?;
        Ok(coerce_list(value, "frame stat"))
    }
}

impl ValidationBackend for ApiClient {
    fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        ApiClient::login(self, email, password)
    }

    fn get_current_user(&self) -> Result<UserProfile, ClientError> {
        ApiClient::get_current_user(self)
    }

    fn list_sessions(&self) -> Result<Vec<SessionRecord>, ClientError> {
        ApiClient::list_sessions(self)
    }

    fn create_session(
        &self,
        max_capacity: u32,
        bus_id: Option<i64>,
    ) -> Result<SessionRecord, ClientError> {
        ApiClient::create_session(self, max_capacity, bus_id)
    }

    fn upload_video(&self, session_id: i64, video: &Path) -> Result<(), ClientError> {
        ApiClient::upload_video(self, session_id, video)
    }

    fn get_session(&self, session_id: i64) -> Result<SessionRecord, ClientError> {
        ApiClient::get_session(self, session_id)
    }

    fn get_frame_stats(&self, session_id: i64) -> Result<Vec<FrameStatRecord>, ClientError> {
        ApiClient::get_frame_stats(self, session_id)
    }
}

fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(api_error(status, response))
}

fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let response = check_status(response)?;
    response
        .json::<T>()
        .map_err(|err| ClientError::Decode(err.to_string()))
}

/// Extracts the backend's `{"detail": ...}` message when the failure body has
/// one; validation errors may carry a non-string detail, serialized compactly.
fn api_error(status: StatusCode, response: Response) -> ClientError {
    let detail = response
        .json::<serde_json::Value>()
        .ok()
        .and_then(|body| body.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });
    ClientError::Api {
        status: status.as_u16(),
        detail,
    }
}

/// The list endpoints occasionally answer with `null` or an object; treat
/// anything that is not an array as empty rather than failing the screen, and
/// skip individual rows that do not parse.
fn coerce_list<T: DeserializeOwned>(value: serde_json::Value, kind: &str) -> Vec<T> {
    let serde_json::Value::Array(items) = value else {
        log::warn!("{kind} list reply was not an array; treating as empty");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(err) => {
                log::warn!("skipping malformed {kind} row: {err}");
                None
            }
        })
        .collect()
}
