//! Per-user session records persisted as JSON files.
//!
//! One file per test user under a project-scoped directory. A new
//! [`start_session`](SessionStore::start_session) overwrites the previous record for
//! that user. Records are only physically deleted by
//! [`cleanup_expired_sessions`](SessionStore::cleanup_expired_sessions).
//!
//! Concurrent operations on the same user are not serialized; the last write wins.

use crate::error::{Error, Result};
use crate::model::{TestUser, UserSession};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Directory, relative to a project root, holding session records.
pub const PROJECT_SESSION_DIR: &str = ".email-auth/sessions";

const RECORD_EXTENSION: &str = "json";

/// File-backed store of [`UserSession`] records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| Error::Storage {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Opens the store of a project: `<root>/.email-auth/sessions`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn for_project(root: impl AsRef<Path>) -> Result<Self> {
        Self::open(root.as_ref().join(PROJECT_SESSION_DIR))
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a fresh active session for `user`, replacing any previous record.
    ///
    /// Expiry follows [`AuthType::session_expiry`](crate::AuthType::session_expiry).
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    #[instrument(name = "SessionStore::start_session", skip_all, fields(user_id = %user.id, auth_type = %user.auth_type))]
    pub fn start_session(&self, user: &TestUser) -> Result<UserSession> {
        let now = Utc::now();
        let session = UserSession {
            user_id: user.id.clone(),
            environment: user.environment.clone(),
            auth_type: user.auth_type,
            started_at: now,
            last_used_at: now,
            expires_at: Some(user.auth_type.session_expiry(now, user.token_expires_at)),
            cookies: Vec::new(),
            headers: BTreeMap::new(),
            local_storage: BTreeMap::new(),
            session_data: BTreeMap::new(),
            active: true,
        };
        self.save(&session)?;
        info!(expires_at = ?session.expires_at, "Session started");
        Ok(session)
    }

    /// Loads the session of `user_id`.
    ///
    /// An expired record is marked inactive and persisted before
    /// [`Error::SessionExpired`] is returned with it, so later reads never see it
    /// active again.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] when no record exists, [`Error::SessionExpired`]
    /// when it has expired, or a storage error.
    #[instrument(name = "SessionStore::get_session", skip(self))]
    pub fn get_session(&self, user_id: &str) -> Result<UserSession> {
        let mut session = self.load(user_id)?;

        if session.is_expired_at(Utc::now()) {
            if session.active {
                session.active = false;
                self.save(&session)?;
                info!("Session expired, marked inactive");
            }
            return Err(Error::SessionExpired {
                user_id: user_id.to_string(),
                session: Box::new(session),
            });
        }

        Ok(session)
    }

    /// Refreshes `last_used_at` and persists the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    #[instrument(name = "SessionStore::update_session", skip_all, fields(user_id = %session.user_id))]
    pub fn update_session(&self, session: &mut UserSession) -> Result<()> {
        session.last_used_at = Utc::now();
        self.save(session)
    }

    /// Marks the session of `user_id` inactive. The record is kept.
    ///
    /// # Errors
    ///
    /// [`Error::SessionNotFound`] when no record exists, or a storage error.
    #[instrument(name = "SessionStore::end_session", skip(self))]
    pub fn end_session(&self, user_id: &str) -> Result<()> {
        let mut session = self.load(user_id)?;
        session.active = false;
        self.save(&session)?;
        info!("Session ended");
        Ok(())
    }

    /// Deletes every record whose expiry has passed and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or a file cannot be removed.
    #[instrument(name = "SessionStore::cleanup_expired_sessions", skip(self))]
    pub fn cleanup_expired_sessions(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        for (path, session) in self.records()? {
            if session.is_expired_at(now) {
                fs::remove_file(&path).map_err(|source| Error::Storage {
                    path: path.clone(),
                    source,
                })?;
                debug!(user_id = %session.user_id, "Removed expired session");
                removed += 1;
            }
        }

        info!(removed, "Expired sessions cleaned up");
        Ok(removed)
    }

    /// Active, unexpired sessions, ordered by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    #[instrument(name = "SessionStore::list_active_sessions", skip(self))]
    pub fn list_active_sessions(&self) -> Result<Vec<UserSession>> {
        let now = Utc::now();
        let mut sessions: Vec<UserSession> = self
            .records()?
            .into_iter()
            .map(|(_, session)| session)
            .filter(|session| session.is_usable_at(now))
            .collect();
        sessions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(sessions)
    }

    /// Writes `session` as-is, atomically replacing the previous record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn save(&self, session: &UserSession) -> Result<()> {
        let path = self.record_path(&session.user_id);
        let json = serde_json::to_vec_pretty(session).map_err(|source| Error::SessionFormat {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| Error::Storage {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| Error::Storage {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "Session record written");
        Ok(())
    }

    /// Loads the record of `user_id` regardless of expiry.
    fn load(&self, user_id: &str) -> Result<UserSession> {
        let path = self.record_path(user_id);
        match fs::read(&path) {
            Ok(bytes) => {
                let session: UserSession = serde_json::from_slice(&bytes)
                    .map_err(|source| Error::SessionFormat { path: path.clone(), source })?;
                if session.user_id != user_id {
                    warn!(path = %path.display(), stored = %session.user_id, "Record belongs to another user");
                    return Err(Error::SessionNotFound {
                        user_id: user_id.to_string(),
                    });
                }
                Ok(session)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::SessionNotFound {
                user_id: user_id.to_string(),
            }),
            Err(source) => Err(Error::Storage { path, source }),
        }
    }

    /// All readable records. Unreadable ones are logged and skipped.
    fn records(&self) -> Result<Vec<(PathBuf, UserSession)>> {
        let entries = fs::read_dir(&self.dir).map_err(|source| Error::Storage {
            path: self.dir.clone(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<UserSession>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(session) if path != self.record_path(&session.user_id) => {
                    warn!(path = %path.display(), user_id = %session.user_id, "Skipping misplaced session record");
                }
                Ok(session) => records.push((path, session)),
                Err(error) => warn!(path = %path.display(), %error, "Skipping unreadable session record"),
            }
        }
        Ok(records)
    }

    fn record_path(&self, user_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", sanitize_user_id(user_id)))
    }
}

/// Maps a user id to a file stem, one stem per id. ASCII alphanumerics, `-`
/// and `_` are kept; every other byte becomes `%XX`. The empty id maps to `%`,
/// which no other id produces.
fn sanitize_user_id(user_id: &str) -> String {
    if user_id.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_user_id() {
        assert_eq!(sanitize_user_id("alice"), "alice");
        assert_eq!(sanitize_user_id("qa-user_01"), "qa-user_01");
        assert_eq!(sanitize_user_id("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(sanitize_user_id("a@b.com"), "a%40b%2Ecom");
        assert_eq!(sanitize_user_id("a%40b%2Ecom"), "a%2540b%252Ecom");
        assert_eq!(sanitize_user_id("é"), "%C3%A9");
        assert_eq!(sanitize_user_id(""), "%");
    }

    #[test]
    fn test_for_project_layout() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::for_project(root.path()).unwrap();
        assert_eq!(store.dir(), root.path().join(".email-auth").join("sessions"));
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::open(root.path()).unwrap();
        let user = TestUser::new("u1", "staging", crate::model::AuthType::Bearer);
        store.start_session(&user).unwrap();

        let names: Vec<String> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["u1.json".to_string()]);
    }
}
