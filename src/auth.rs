//! Persisted client credentials and the login flow.
//!
//! The backend issues bearer tokens; this module owns where they live between
//! invocations. Storage is behind the [`CredentialStore`] trait so the rest of
//! the crate (and the tests) never touch the filesystem directly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::api::{ClientError, ValidationBackend};

const CREDENTIALS_FILE: &str = "credentials.json";

/// Everything the client persists between invocations: the bearer token, its
/// type, the remember-me email, and the profile email shown in headers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub remembered_email: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<StoredCredentials>;
    fn save(&self, credentials: &StoredCredentials) -> Result<()>;
}

/// JSON credential file under the state directory, written with owner-only
/// permissions.
pub struct FilesystemCredentialStore {
    path: PathBuf,
}

impl FilesystemCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FilesystemCredentialStore {
    fn load(&self) -> Result<StoredCredentials> {
        if !self.path.exists() {
            return Ok(StoredCredentials::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid credential file {}", self.path.display()))
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredCredentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: StoredCredentials) -> Self {
        Self {
            inner: Mutex::new(credentials),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<StoredCredentials> {
        Ok(self.inner.lock().expect("credential lock poisoned").clone())
    }

    fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        *self.inner.lock().expect("credential lock poisoned") = credentials.clone();
        Ok(())
    }
}

pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
}

impl AuthSession {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Logs in and persists the resulting token.
    ///
    /// The token is saved before the profile fetch so the gateway attaches it
    /// to `/users/me`. `remember` keeps the email for the next login; logging
    /// in without it clears any previously remembered email.
    pub fn login(
        &self,
        gateway: &dyn ValidationBackend,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<StoredCredentials> {
        let reply = gateway.login(email, password)?;
        if reply.access_token.is_empty() {
            return Err(ClientError::Decode("login reply carried no access token".to_string()).into());
        }

        let mut credentials = self.store.load().unwrap_or_else(|err| {
            log::warn!("starting from empty credentials: {err}");
            StoredCredentials::default()
        });
        credentials.access_token = Some(reply.access_token);
        credentials.token_type = reply.token_type;
        credentials.remembered_email = remember.then(|| email.to_string());
        self.store.save(&credentials)?;

        match gateway.get_current_user() {
            Ok(profile) => {
                credentials.user_email = Some(profile.email);
                self.store.save(&credentials)?;
            }
            Err(err) => log::warn!("logged in, but the profile fetch failed: {err}"),
        }

        Ok(credentials)
    }

    /// Clears the token and cached profile; the remembered email survives.
    pub fn logout(&self) -> Result<()> {
        let mut credentials = self.store.load().unwrap_or_default();
        credentials.access_token = None;
        credentials.token_type = None;
        credentials.user_email = None;
        self.store.save(&credentials)
    }

    pub fn current(&self) -> Result<StoredCredentials> {
        self.store.load()
    }

    pub fn remembered_email(&self) -> Option<String> {
        self.store.load().ok().and_then(|c| c.remembered_email)
    }
}
