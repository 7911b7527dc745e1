use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Credential file name in the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Keychain service name
const SERVICE_NAME: &str = "destinyhub";

/// Keychain account the token pair is stored under
const KEYRING_ACCOUNT: &str = "bungie-oauth";

/// Buffer before the provider's stated expiry at which the access token is
/// treated as expired (seconds).
const EXPIRY_BUFFER_SECS: i64 = 60;

/// File permissions for the credential file (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored credentials are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Keychain accepted the credentials but did not keep them")]
    NotPersisted,
}

/// Token pair issued by the identity provider.
///
/// Both tokens are always present; an anonymous session has no record at all.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub obtained_at: DateTime<Utc>,
    /// Access token lifetime in seconds, as reported by the token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<u64>,
    /// Bungie.net membership the tokens were issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_id: Option<String>,
}

impl CredentialRecord {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            obtained_at: Utc::now(),
            expires_in: None,
            refresh_expires_in: None,
            membership_id: None,
        }
    }

    /// When the access token stops being accepted, if the provider said.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| self.obtained_at + Duration::seconds(secs as i64))
    }

    /// True once the access token is within the expiry buffer.
    /// Records without a known lifetime never expire locally; the server decides.
    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(expiry) => Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) >= expiry,
            None => false,
        }
    }

    /// Carry over fields a refresh response may omit.
    pub fn inherit(&mut self, previous: &CredentialRecord) {
        if self.membership_id.is_none() {
            self.membership_id = previous.membership_id.clone();
        }
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("membership_id", &self.membership_id)
            .finish()
    }
}

/// Persistence for the credential record. Pure I/O, no session logic.
pub trait CredentialStore: Send + Sync {
    /// Replace any stored record. Must never leave a half-written record behind.
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing is stored.
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Remove the stored record. Idempotent.
    fn clear(&self) -> Result<(), StoreError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        (**self).save(record)
    }
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        (**self).load()
    }
    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// JSON file store. Writes go to a temp file that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store `credentials.json` inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(record)?;
        let temp_path = self.temp_path();
        {
            use std::io::Write;

            let mut options = std::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(FILE_MODE);
            }
            let mut file = options.open(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "Credentials saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Credentials removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// OS keychain store. The record is kept as one JSON secret.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::for_account(KEYRING_ACCOUNT)
    }

    pub fn for_account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(SERVICE_NAME, &self.account)?)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let secret = serde_json::to_string(record)?;
        self.entry()?.set_password(&secret)?;

        // Read back through a fresh entry. A backend without persistence
        // (keyring's mock fallback) accepts the write and then loses it.
        match self.entry()?.get_password() {
            Ok(stored) if stored == secret => Ok(()),
            Ok(_) | Err(keyring::Error::NoEntry) => Err(StoreError::NotPersisted),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.record.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CredentialRecord {
        CredentialRecord {
            access_token: "access-123".to_string(),
            refresh_token: "refresh-456".to_string(),
            obtained_at: Utc::now(),
            expires_in: Some(3600),
            refresh_expires_in: Some(7_776_000),
            membership_id: Some("4611686018467284386".to_string()),
        }
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let record = sample_record();

        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn test_file_store_round_trip_minimal_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let record = CredentialRecord::new("a", "r");

        store.save(&record).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.expires_in.is_none());
    }

    #[test]
    fn test_file_store_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_empty_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(store.path(), "{\"access_token\": ").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_file_store_overwrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        store.save(&CredentialRecord::new("first", "r1")).unwrap();
        store.save(&CredentialRecord::new("second", "r2")).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "second");
        assert_eq!(loaded.refresh_token, "r2");
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&sample_record()).unwrap();

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&sample_record()).unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_keyring_store_without_persistence_fails_loudly() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeyringCredentialStore::for_account("destinyhub-test-mock");

        let err = store.save(&CredentialRecord::new("a", "r")).unwrap_err();
        assert!(matches!(err, StoreError::NotPersisted));
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().unwrap().is_none());

        let record = sample_record();
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_record_expiry() {
        let mut record = CredentialRecord::new("a", "r");
        assert!(!record.is_expired(), "unknown lifetime never expires locally");

        record.expires_in = Some(3600);
        assert!(!record.is_expired());

        record.obtained_at = Utc::now() - Duration::seconds(3590);
        assert!(record.is_expired(), "inside the expiry buffer");

        record.obtained_at = Utc::now() - Duration::hours(2);
        assert!(record.is_expired());
    }

    #[test]
    fn test_record_inherit_keeps_membership() {
        let previous = sample_record();
        let mut refreshed = CredentialRecord::new("new-access", "refresh-456");
        refreshed.inherit(&previous);
        assert_eq!(refreshed.membership_id, previous.membership_id);

        let mut other = CredentialRecord::new("x", "y");
        other.membership_id = Some("42".to_string());
        other.inherit(&previous);
        assert_eq!(other.membership_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_record_debug_is_redacted() {
        let debug = format!("{:?}", sample_record());
        assert!(!debug.contains("access-123"));
        assert!(!debug.contains("refresh-456"));
        assert!(debug.contains("membership_id"));
    }
}
