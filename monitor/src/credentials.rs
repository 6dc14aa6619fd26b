//! Stored login credentials and session cookies.
//!
//! [`FileCredentialStore`] keeps two files in the data directory:
//!
//! | File | Content |
//! |------|---------|
//! | `credentials` | username on the first line, password on the second |
//! | `session` | the `auth` cookie, then the `twoFactorAuth` cookie if any |
//!
//! Both are written with mode `0600` on Unix.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// File name for stored credentials.
pub const CREDENTIALS_FILE: &str = "credentials";

/// File name for the cached session cookies.
pub const SESSION_FILE: &str = "session";

/// Errors from the credential store.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// I/O error while reading or writing a store file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A store file exists but does not have the expected layout.
    #[error("malformed credential file {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Username and password for the VRChat API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Cookies of a logged-in API session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// The `auth` cookie, also the pipeline access token.
    pub token: String,

    /// The `twoFactorAuth` cookie of a device that passed two-factor
    /// verification. Lets a later password login skip the code prompt.
    pub two_factor: Option<String>,
}

impl Session {
    /// Creates a session with only an `auth` token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            two_factor: None,
        }
    }

    /// Sets the `twoFactorAuth` cookie.
    #[must_use]
    pub fn with_two_factor(mut self, value: impl Into<String>) -> Self {
        self.two_factor = Some(value.into());
        self
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("two_factor", &self.two_factor.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Persistence for credentials and the session cookies.
pub trait CredentialStore: Send + Sync {
    /// Returns stored credentials, if any.
    fn load(&self) -> Result<Option<Credentials>, CredentialError>;

    /// Stores credentials, replacing any previous ones.
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError>;

    /// Removes stored credentials and the session.
    fn clear(&self) -> Result<(), CredentialError>;

    /// Returns the cached session, if any.
    fn load_session(&self) -> Result<Option<Session>, CredentialError>;

    /// Caches a session, replacing any previous one.
    fn save_session(&self, session: &Session) -> Result<(), CredentialError>;
}

/// Credential store backed by files in a directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        let path = self.credentials_path();
        let Some(content) = read_optional(&path)? else {
            return Ok(None);
        };
        let content = Zeroizing::new(content);

        let mut lines = content.lines();
        let username = lines.next().map(str::trim).unwrap_or_default();
        let password = lines.next().map(str::trim).unwrap_or_default();

        if username.is_empty() || password.is_empty() {
            return Err(CredentialError::Malformed {
                path,
                message: "expected username and password on separate lines".to_string(),
            });
        }

        Ok(Some(Credentials::new(username, password)))
    }

    fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let content = Zeroizing::new(format!(
            "{}\n{}\n",
            credentials.username,
            credentials.password.as_str()
        ));
        write_private(&self.dir, &self.credentials_path(), content.as_bytes())?;
        debug!(dir = %self.dir.display(), "Credentials saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        for path in [self.credentials_path(), self.session_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn load_session(&self) -> Result<Option<Session>, CredentialError> {
        let Some(content) = read_optional(&self.session_path())? else {
            return Ok(None);
        };

        let mut values = content
            .lines()
            .map(|line| line.trim().trim_matches('"'))
            .filter(|value| !value.is_empty());

        let Some(token) = values.next() else {
            return Ok(None);
        };
        Ok(Some(Session {
            token: token.to_string(),
            two_factor: values.next().map(str::to_string),
        }))
    }

    fn save_session(&self, session: &Session) -> Result<(), CredentialError> {
        let content = match &session.two_factor {
            Some(two_factor) => format!("{}\n{two_factor}\n", session.token),
            None => format!("{}\n", session.token),
        };
        write_private(&self.dir, &self.session_path(), content.as_bytes())?;
        debug!(
            dir = %self.dir.display(),
            two_factor = session.two_factor.is_some(),
            "Session saved"
        );
        Ok(())
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Writes `content` to `path`, readable only by the owner.
fn write_private(dir: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let mut file = File::create(path)?;
    file.write_all(content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_credentials() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested"));

        store.save(&Credentials::new("alice", "hunter2")).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.password.as_str(), "hunter2");
    }

    #[test]
    fn test_load_accepts_crlf_and_whitespace() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CREDENTIALS_FILE), " bob \r\n pass word\r\n").unwrap();

        let loaded = FileCredentialStore::new(dir.path()).load().unwrap().unwrap();
        assert_eq!(loaded.username, "bob");
        assert_eq!(loaded.password.as_str(), "pass word");
    }

    #[test]
    fn test_load_malformed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CREDENTIALS_FILE), "only-a-username\n").unwrap();

        let err = FileCredentialStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, CredentialError::Malformed { .. }));
    }

    #[test]
    fn test_session_keeps_two_factor_cookie() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());

        let session = Session::new("authcookie_123").with_two_factor("tf_123");
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session));

        store.save_session(&Session::new("authcookie_456")).unwrap();
        assert_eq!(
            store.load_session().unwrap(),
            Some(Session::new("authcookie_456"))
        );
    }

    #[test]
    fn test_load_session_strips_quotes_and_crlf() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SESSION_FILE),
            "\"authcookie_456\"\r\n\"tf_456\"\r\n",
        )
        .unwrap();

        let session = FileCredentialStore::new(dir.path()).load_session().unwrap();
        assert_eq!(session, Some(Session::new("authcookie_456").with_two_factor("tf_456")));
    }

    #[test]
    fn test_empty_session_is_none() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SESSION_FILE), "\n").unwrap();
        assert!(FileCredentialStore::new(dir.path()).load_session().unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_both_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&Credentials::new("alice", "pw")).unwrap();
        store.save_session(&Session::new("t")).unwrap();

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.load_session().unwrap().is_none());

        // Clearing an empty store is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save(&Credentials::new("alice", "pw")).unwrap();
        store.save_session(&Session::new("t")).unwrap();

        for name in [CREDENTIALS_FILE, SESSION_FILE] {
            let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "file: {name}");
        }
    }
}
