use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the persisted auth record inside the state directory.
pub const AUTH_RECORD_FILE: &str = "auth-storage.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: crate::order::RecordId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Everything that survives a restart: the bundle plus the auth flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    #[serde(flatten)]
    pub credentials: CredentialBundle,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl AuthRecord {
    fn holds_anything(&self) -> bool {
        self.is_authenticated
            || self.credentials.access_token.is_some()
            || self.credentials.refresh_token.is_some()
    }
}

/// Shared credential state. Only login, refresh and logout write to it;
/// every reader sees the latest value.
#[derive(Clone)]
pub struct CredentialStore {
    record: Arc<RwLock<AuthRecord>>,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Opens the store rooted at `state_dir`, loading any persisted record.
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create {}", state_dir.display()))?;
        let path = state_dir.join(AUTH_RECORD_FILE);
        let record = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "discarding unreadable auth record");
                    AuthRecord::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => AuthRecord::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Ok(Self {
            record: Arc::new(RwLock::new(record)),
            path: Some(path),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            record: Arc::new(RwLock::new(AuthRecord::default())),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> AuthRecord {
        self.record.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.record.read().credentials.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.record.read().credentials.refresh_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        let record = self.record.read();
        record.is_authenticated && record.credentials.access_token.is_some()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.record.read().user.clone()
    }

    pub fn establish(&self, credentials: CredentialBundle, user: Option<UserProfile>) {
        self.write(|record| {
            *record = AuthRecord {
                credentials,
                is_authenticated: true,
                user,
            };
        });
    }

    /// Installs a refreshed access token, and a rotated refresh token when the
    /// server issued one.
    pub fn replace_access_token(&self, access_token: String, refresh_token: Option<String>) {
        self.write(|record| {
            record.credentials.access_token = Some(access_token);
            if let Some(refresh_token) = refresh_token {
                record.credentials.refresh_token = Some(refresh_token);
            }
        });
    }

    /// Drops every credential. Returns whether anything was held.
    pub fn clear(&self) -> bool {
        let mut held = false;
        self.write(|record| {
            held = record.holds_anything();
            *record = AuthRecord::default();
        });
        held
    }

    fn write(&self, mutate: impl FnOnce(&mut AuthRecord)) {
        let mut record = self.record.write();
        mutate(&mut *record);
        // Persisted under the lock so the file never trails a newer record.
        // The record is a few hundred bytes, so the blocking write is brief.
        if let Err(err) = self.persist(&record) {
            tracing::warn!(%err, "failed to persist auth record");
        }
    }

    fn persist(&self, record: &AuthRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_vec_pretty(record)?;
        fs::write(path, serialized).with_context(|| format!("failed to write {}", path.display()))
    }
}
