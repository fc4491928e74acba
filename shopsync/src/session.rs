use anyhow::Context;
use anyhow::Result;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable storage key holding the access token.
pub const TOKEN_KEY: &str = "token";
/// Durable storage key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Backends send user ids either as numbers or as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{n}"),
            UserId::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Identity of the authenticated user, as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "username", alias = "displayName")]
    pub name: Option<String>,
}

impl User {
    /// Best human-readable label: name, then email, then id.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// A fully authenticated session.
///
/// An access token can only be held together with the user it was issued for, so there is no
/// "token but no user" state to guard against.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: User,
}

// tokens are credentials; keep them out of debug output and logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("user", &self.user)
            .finish()
    }
}

/// Client-local persistent key/value storage for tokens.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Applies several updates; `None` removes the key. Backends that can write all entries in
    /// one go should override this.
    fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        for (key, value) in entries {
            match value {
                Some(v) => self.set(key, v)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Stores tokens as a flat JSON object in a single file.
///
/// A missing file is an empty store. Writes go to a sibling temp file which is then renamed over
/// the original.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileStorage {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(HashMap::new()),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing session file {}", self.path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("reading session file {}", self.path.display())),
        }
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("tmp");
        // a leftover temp file would keep its old permissions
        let _ = fs::remove_file(&tmp_path);
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        // tokens are credentials: owner-only
        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
        options
            .open(&tmp_path)
            .and_then(|mut f| f.write_all(contents.as_bytes()))
            .with_context(|| format!("writing session file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_all(&[(key, Some(value))])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.set_all(&[(key, None)])
    }

    fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<()> {
        let _guard = self.lock.lock();
        // an unreadable file gets replaced rather than blocking every future write
        let mut current = self.load().unwrap_or_default();
        for (key, value) in entries {
            match value {
                Some(v) => current.insert(key.to_string(), v.to_string()),
                None => current.remove(*key),
            };
        }
        self.save(&current)
    }
}

/// Single source of truth for authentication state.
///
/// The in-memory session is replaced whole by [`SessionStore::set_session`] or dropped by
/// [`SessionStore::clear`]; nothing mutates individual fields. Storage failures are logged and
/// otherwise treated as "no session".
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        SessionStore {
            storage,
            current: RwLock::new(None),
        }
    }

    /// Tokens left in durable storage by an earlier run, if both reads succeed and an access
    /// token is present.
    pub fn persisted_tokens(&self) -> Option<(String, Option<String>)> {
        let token = match self.storage.get(TOKEN_KEY) {
            Ok(Some(t)) if !t.is_empty() => t,
            Ok(_) => return None,
            Err(e) => {
                warn!("could not read persisted access token: {e:#}");
                return None;
            }
        };
        let refresh_token = match self.storage.get(REFRESH_TOKEN_KEY) {
            Ok(t) => t.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("could not read persisted refresh token: {e:#}");
                None
            }
        };
        Some((token, refresh_token))
    }

    pub fn set_session(&self, session: Session) {
        let mut current = self.current.write();
        if let Err(e) = self.storage.set_all(&[
            (TOKEN_KEY, Some(session.access_token.as_str())),
            (REFRESH_TOKEN_KEY, session.refresh_token.as_deref()),
        ]) {
            warn!("could not persist session, it will not survive a restart: {e:#}");
        }
        debug!("session set for user {}", session.user.id);
        *current = Some(session);
    }

    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.current.read().as_ref().map(|s| s.user.clone())
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Forgets the session in memory and in durable storage. Calling this on an empty store is
    /// fine.
    pub fn clear(&self) {
        let mut current = self.current.write();
        if let Err(e) = self
            .storage
            .set_all(&[(TOKEN_KEY, None), (REFRESH_TOKEN_KEY, None)])
        {
            warn!("could not remove persisted session: {e:#}");
        }
        if current.take().is_some() {
            debug!("session cleared");
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("current", &*self.current.read())
            .finish()
    }
}

#[test]
fn test_user_shapes() {
    let user: User =
        serde_json::from_str(r#"{"id": 7, "email": "ana@loja.com", "name": "Ana"}"#).unwrap();
    assert_eq!(user.id, UserId::Number(7));
    assert_eq!(user.display_name(), "Ana");

    let user: User = serde_json::from_str(r#"{"id": "u-1", "username": "caixa01"}"#).unwrap();
    assert_eq!(user.id, UserId::Text("u-1".to_string()));
    assert_eq!(user.name.as_deref(), Some("caixa01"));
    assert_eq!(user.email, None);

    let user: User = serde_json::from_str(r#"{"id": 3, "role": "admin"}"#).unwrap();
    assert_eq!(user.display_name(), "3");

    assert!(serde_json::from_str::<User>(r#"{"email": "x@y.z"}"#).is_err());
}

#[test]
fn test_session_debug_redacts_tokens() {
    let session = Session {
        access_token: "secret-access".to_string(),
        refresh_token: Some("secret-refresh".to_string()),
        user: User {
            id: UserId::Number(1),
            email: None,
            name: None,
        },
    };
    let out = format!("{session:?}");
    assert!(!out.contains("secret-access"));
    assert!(!out.contains("secret-refresh"));
}
