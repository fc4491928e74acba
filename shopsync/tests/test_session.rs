mod common;

use anyhow::anyhow;
use common::*;
use serde_json::json;
use shopsync::session::{REFRESH_TOKEN_KEY, TOKEN_KEY};
use shopsync::{FileStorage, MemoryStorage, Session, SessionStore, TokenStorage};
use std::sync::Arc;

struct BrokenStorage;

impl TokenStorage for BrokenStorage {
    fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        Err(anyhow!("storage unavailable"))
    }
    fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        Err(anyhow!("storage unavailable"))
    }
    fn remove(&self, _key: &str) -> anyhow::Result<()> {
        Err(anyhow!("storage unavailable"))
    }
}

fn session(token: &str, refresh: Option<&str>) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: refresh.map(|s| s.to_string()),
        user: test_user(),
    }
}

#[test]
fn test_set_session_visible_immediately() {
    let storage = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(storage.clone());
    assert!(!store.is_authenticated());
    assert_eq!(store.access_token(), None);
    assert_eq!(store.user(), None);

    store.set_session(session("abc", Some("r1")));
    assert_eq!(store.access_token().as_deref(), Some("abc"));
    assert_eq!(store.user(), Some(test_user()));
    assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));

    // a later session without a refresh token must not leave the old one behind
    store.set_session(session("def", None));
    assert_eq!(store.access_token().as_deref(), Some("def"));
    assert_eq!(store.refresh_token(), None);
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
}

#[test]
fn test_clear_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let store = SessionStore::new(storage.clone());
    store.clear();
    assert!(!store.is_authenticated());

    store.set_session(session("abc", Some("r1")));
    store.clear();
    store.clear();
    assert!(!store.is_authenticated());
    assert_eq!(store.snapshot(), None);
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
}

#[test]
fn test_broken_storage_degrades_to_memory_only() {
    let store = SessionStore::new(Arc::new(BrokenStorage));
    assert_eq!(store.persisted_tokens(), None);
    store.set_session(session("abc", None));
    assert_eq!(store.access_token().as_deref(), Some("abc"));
    store.clear();
    assert!(!store.is_authenticated());
}

#[tokio::test]
async fn test_restore_verified_token() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "persisted").unwrap();
    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    let h = Harness::with_storage(storage);
    h.transport.respond(200, user_json());

    // nothing is published before the identity check
    assert_eq!(h.session().access_token(), None);
    assert!(h.client.restore().await);

    assert_eq!(h.transport.paths(), vec!["/auth/me"]);
    assert_eq!(h.transport.requests()[0].bearer(), Some("persisted"));
    assert_eq!(h.session().access_token().as_deref(), Some("persisted"));
    assert_eq!(h.session().refresh_token().as_deref(), Some("r1"));
    assert_eq!(h.session().user(), Some(test_user()));
    h.assert_consistent();
}

#[tokio::test]
async fn test_restore_rejected_token() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "revoked").unwrap();
    let h = Harness::with_storage(storage.clone());
    h.transport.respond(401, json!({"message": "invalid token"}));

    assert!(!h.client.restore().await);
    assert!(!h.session().is_authenticated());
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    // nothing to refresh with, and restoring is allowed to end up anonymous without a redirect
    assert_eq!(h.transport.paths(), vec!["/auth/me"]);
    assert!(h.navigator.redirects().is_empty());
    h.assert_consistent();
}

#[tokio::test]
async fn test_restore_refreshes_expired_token() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "expired").unwrap();
    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    let h = Harness::with_storage(storage.clone());
    h.transport.respond(401, json!({"message": "jwt expired"}));
    h.transport.respond(200, json!({"token": "fresh"}));
    h.transport.respond(200, user_json());

    assert!(h.client.restore().await);
    assert_eq!(h.transport.paths(), vec!["/auth/me", "/auth/refresh", "/auth/me"]);
    let reqs = h.transport.requests();
    assert_eq!(reqs[0].bearer(), Some("expired"));
    assert_eq!(reqs[1].body, Some(json!({"refreshToken": "r1"})));
    assert_eq!(reqs[2].bearer(), Some("fresh"));

    assert_eq!(h.session().access_token().as_deref(), Some("fresh"));
    assert_eq!(h.session().refresh_token().as_deref(), Some("r1"));
    assert_eq!(h.session().user(), Some(test_user()));
    assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
    assert!(h.navigator.redirects().is_empty());
    h.assert_consistent();
}

#[tokio::test]
async fn test_restore_refresh_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "expired").unwrap();
    storage.set(REFRESH_TOKEN_KEY, "r-old").unwrap();
    let h = Harness::with_storage(storage.clone());
    h.transport.respond(401, json!({}));
    h.transport.respond(401, json!({"message": "invalid refresh token"}));

    assert!(!h.client.restore().await);
    assert_eq!(h.transport.paths(), vec!["/auth/me", "/auth/refresh"]);
    assert!(!h.session().is_authenticated());
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert!(h.navigator.redirects().is_empty());
    h.assert_consistent();
}

#[tokio::test]
async fn test_restore_server_error_does_not_refresh() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "persisted").unwrap();
    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    let h = Harness::with_storage(storage);
    h.transport.respond(500, json!({"message": "boom"}));

    assert!(!h.client.restore().await);
    assert_eq!(h.transport.paths(), vec!["/auth/me"]);
    assert!(!h.session().is_authenticated());
}

#[tokio::test]
async fn test_restore_unreachable_backend() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set(TOKEN_KEY, "persisted").unwrap();
    let h = Harness::with_storage(storage);
    h.transport.fail("connection refused");

    assert!(!h.client.restore().await);
    assert!(!h.session().is_authenticated());
}

#[tokio::test]
async fn test_restore_without_persisted_token() {
    let storage = Arc::new(MemoryStorage::new());
    // a refresh token on its own is not a session
    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    let h = Harness::with_storage(storage);

    assert!(!h.client.restore().await);
    assert!(h.transport.requests().is_empty());
    assert!(!h.session().is_authenticated());
}

#[test]
fn test_file_storage_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let storage = FileStorage::new(&path);
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    storage.set(TOKEN_KEY, "abc").unwrap();
    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    assert!(path.exists());

    let other = FileStorage::new(&path);
    assert_eq!(other.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
    assert_eq!(other.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r1"));

    other.remove(TOKEN_KEY).unwrap();
    other.remove(REFRESH_TOKEN_KEY).unwrap();
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
    assert!(!path.exists());
    // removing from an empty store is fine
    other.remove(TOKEN_KEY).unwrap();
}

#[test]
fn test_file_storage_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json").unwrap();

    let store = SessionStore::new(Arc::new(FileStorage::new(&path)));
    assert_eq!(store.persisted_tokens(), None);

    // the next write replaces the corrupt file
    store.set_session(session("abc", None));
    let storage = FileStorage::new(&path);
    assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
}

#[test]
fn test_file_session_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    {
        let store = SessionStore::new(Arc::new(FileStorage::new(&path)));
        store.set_session(session("abc", Some("r1")));
    }

    let store = SessionStore::new(Arc::new(FileStorage::new(&path)));
    assert!(!store.is_authenticated());
    assert_eq!(
        store.persisted_tokens(),
        Some(("abc".to_string(), Some("r1".to_string())))
    );
}

#[cfg(unix)]
#[test]
fn test_file_storage_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    // a stale temp file with open permissions must not leak into the session file
    std::fs::write(path.with_extension("tmp"), "{}").unwrap();
    std::fs::set_permissions(
        path.with_extension("tmp"),
        std::fs::Permissions::from_mode(0o644),
    )
    .unwrap();

    let storage = FileStorage::new(&path);
    storage.set(TOKEN_KEY, "abc").unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
