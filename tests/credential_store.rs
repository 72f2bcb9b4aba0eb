//! Credential persistence and login-flow tests.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use occupancy_lab::{
    AuthSession, ClientError, CredentialStore, FilesystemCredentialStore, FrameStatRecord,
    LoginResponse, MemoryCredentialStore, SessionRecord, StoredCredentials, UserProfile,
    ValidationBackend,
};

/// Gateway double for the auth flow: a fixed token and profile, with a switch
/// to make the profile fetch fail.
struct AuthOnlyBackend {
    token: &'static str,
    profile_fails: bool,
    login_calls: Mutex<u32>,
}

impl AuthOnlyBackend {
    fn new(token: &'static str) -> Self {
        Self {
            token,
            profile_fails: false,
            login_calls: Mutex::new(0),
        }
    }
}

impl ValidationBackend for AuthOnlyBackend {
    fn login(&self, _email: &str, _password: &str) -> Result<LoginResponse, ClientError> {
        *self.login_calls.lock().unwrap() += 1;
        serde_json::from_value(serde_json::json!({
            "access_token": self.token,
            "token_type": "bearer",
        }))
        .map_err(|err| ClientError::Decode(err.to_string()))
    }

    fn get_current_user(&self) -> Result<UserProfile, ClientError> {
        if self.profile_fails {
            return Err(ClientError::Api {
                status: 401,
                detail: Some("token expired".to_string()),
            });
        }
        serde_json::from_value(serde_json::json!({"email": "op@fleet.example"}))
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    fn list_sessions(&self) -> Result<Vec<SessionRecord>, ClientError> {
        unimplemented!("not an auth concern")
    }

    fn create_session(
        &self,
        _max_capacity: u32,
        _bus_id: Option<i64>,
    ) -> Result<SessionRecord, ClientError> {
        unimplemented!("not an auth concern")
    }

    fn upload_video(&self, _session_id: i64, _video: &Path) -> Result<(), ClientError> {
        unimplemented!("not an auth concern")
    }

    fn get_session(&self, _session_id: i64) -> Result<SessionRecord, ClientError> {
        unimplemented!("not an auth concern")
    }

    fn get_frame_stats(&self, _session_id: i64) -> Result<Vec<FrameStatRecord>, ClientError> {
        unimplemented!("not an auth concern")
    }
}

#[test]
fn filesystem_store_round_trips() {
    let dir = tempdir().unwrap();
    let store = FilesystemCredentialStore::in_dir(dir.path());

    // missing file reads as empty credentials
    assert_eq!(store.load().unwrap(), StoredCredentials::default());

    let credentials = StoredCredentials {
        access_token: Some("tok-123".to_string()),
        token_type: Some("bearer".to_string()),
        remembered_email: Some("op@fleet.example".to_string()),
        user_email: Some("op@fleet.example".to_string()),
    };
    store.save(&credentials).unwrap();
    assert_eq!(store.load().unwrap(), credentials);
}

#[cfg(unix)]
#[test]
fn credential_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let store = FilesystemCredentialStore::in_dir(dir.path());
    store.save(&StoredCredentials::default()).unwrap();

    let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn login_persists_token_and_profile_email() {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
    let auth = AuthSession::new(Arc::clone(&store));
    let backend = AuthOnlyBackend::new("tok-abc");

    auth.login(&backend, "op@fleet.example", "secret", true)
        .unwrap();

    let stored = store.load().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("tok-abc"));
    assert_eq!(stored.token_type.as_deref(), Some("bearer"));
    assert_eq!(stored.remembered_email.as_deref(), Some("op@fleet.example"));
    assert_eq!(stored.user_email.as_deref(), Some("op@fleet.example"));
}

#[test]
fn login_without_remember_clears_previous_email() {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(StoredCredentials {
        remembered_email: Some("old@fleet.example".to_string()),
        ..StoredCredentials::default()
    }));
    let auth = AuthSession::new(Arc::clone(&store));
    let backend = AuthOnlyBackend::new("tok-abc");

    auth.login(&backend, "new@fleet.example", "secret", false)
        .unwrap();

    assert!(store.load().unwrap().remembered_email.is_none());
}

#[test]
fn login_survives_a_failing_profile_fetch() {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
    let auth = AuthSession::new(Arc::clone(&store));
    let mut backend = AuthOnlyBackend::new("tok-abc");
    backend.profile_fails = true;

    auth.login(&backend, "op@fleet.example", "secret", false)
        .unwrap();

    let stored = store.load().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("tok-abc"));
    assert!(stored.user_email.is_none());
}

#[test]
fn logout_clears_token_but_not_remembered_email() {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
    let auth = AuthSession::new(Arc::clone(&store));
    let backend = AuthOnlyBackend::new("tok-abc");

    auth.login(&backend, "op@fleet.example", "secret", true)
        .unwrap();
    auth.logout().unwrap();

    let stored = store.load().unwrap();
    assert!(stored.access_token.is_none());
    assert!(stored.token_type.is_none());
    assert!(stored.user_email.is_none());
    assert_eq!(stored.remembered_email.as_deref(), Some("op@fleet.example"));
}
