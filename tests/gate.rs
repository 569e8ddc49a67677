use chrono::Duration;
use std::sync::Arc;

use rax_dav_server::auth::UserDirectory;
use rax_dav_server::clock::{ManualClock, from_unix};
use rax_dav_server::config::CoreConfig;
use rax_dav_server::database::Database;
use rax_dav_server::error::{DavError, ErrorKind, SessionError};
use rax_dav_server::gate::{AccessGate, Destination};
use rax_dav_server::middleware::ChannelThumbnailSink;
use rax_dav_server::quota::QuotaLedger;
use rax_dav_server::session::SessionManager;
use rax_dav_server::storage::{PathResolver, STAGING_DIR, StorageStore};

const SECRET: &str = "integration-secret-key";

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    db: Arc<Database>,
    gate: Arc<AccessGate>,
}

impl Harness {
    fn storage_root(&self, user: &str) -> std::path::PathBuf {
        self.dir.path().join("storage").join(user)
    }

    async fn login(&self, user: &str) -> String {
        self.gate
            .authenticate(user, &format!("{user}-password"))
            .await
            .unwrap()
            .token
    }
}

fn core_config(dir: &tempfile::TempDir) -> CoreConfig {
    CoreConfig {
        storage_path_template: format!("{}/storage/%s", dir.path().display()),
        secret_key: SECRET.to_string(),
        session_timeout_secs: 3600,
        password_hash_iterations: 1_000,
        ..CoreConfig::default()
    }
}

async fn harness_with(core: CoreConfig, dir: tempfile::TempDir) -> Harness {
    let clock = Arc::new(ManualClock::new(from_unix(1_700_000_000)));
    let db = Arc::new(Database::open(&dir.path().join("db.sqlite")).unwrap());
    let resolver = PathResolver::new(&core.storage_path_template).unwrap();
    let ledger = Arc::new(QuotaLedger::new());
    let users = Arc::new(UserDirectory::new(
        db.clone(),
        ledger.clone(),
        resolver.clone(),
        &core,
    ));
    let sessions = Arc::new(SessionManager::new(
        users.clone(),
        db.clone(),
        clock.clone(),
        &core,
    ));
    let store = Arc::new(StorageStore::new(
        resolver,
        db.clone(),
        clock.clone(),
        core.max_upload_bytes,
    ));
    let gate = Arc::new(AccessGate::new(sessions, users, ledger, store));

    for user in ["alice", "bob"] {
        gate.create_user(user, &format!("{user}-password"))
            .await
            .unwrap();
    }

    Harness {
        dir,
        clock,
        db,
        gate,
    }
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let core = core_config(&dir);
    harness_with(core, dir).await
}

#[tokio::test]
async fn quota_rejects_growth_past_limit() {
    let h = harness().await;
    h.gate.users().set_quota("alice", 1000).await.unwrap();
    let token = h.login("alice").await;

    h.gate
        .write_bytes(&token, "/base.bin", &[0u8; 900], None)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 900);

    let err = h
        .gate
        .write_bytes(&token, "/big.bin", &[0u8; 150], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 900);
    assert!(!h.storage_root("alice").join("big.bin").exists());

    h.gate
        .write_bytes(&token, "/small.bin", &[0u8; 50], None)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 950);
    assert_eq!(h.gate.ledger().pending_count(), 0);

    let record = h.db.get_user("alice").await.unwrap().unwrap();
    assert_eq!(record.quota_used, 950);
}

#[tokio::test]
async fn overwrite_charges_only_the_difference() {
    let h = harness().await;
    h.gate.users().set_quota("alice", 100).await.unwrap();
    let token = h.login("alice").await;

    h.gate
        .write_bytes(&token, "/f", &[1u8; 80], None)
        .await
        .unwrap();
    // 80 -> 100 needs 20 more bytes, which fit.
    h.gate
        .write_bytes(&token, "/f", &[2u8; 100], None)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 100);

    h.gate
        .write_bytes(&token, "/f", &[3u8; 10], None)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 10);
}

#[tokio::test]
async fn delete_returns_quota() {
    let h = harness().await;
    let token = h.login("alice").await;

    h.gate.mkdir(&token, "/docs").await.unwrap();
    h.gate
        .write_bytes(&token, "/docs/a", b"12345", None)
        .await
        .unwrap();
    h.gate
        .write_bytes(&token, "/docs/b", b"123", None)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 8);

    let deleted = h.gate.delete(&token, "/docs", None).await.unwrap();
    assert_eq!(deleted.freed_bytes, 8);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 0);
}

#[tokio::test]
async fn concurrent_writers_never_interleave() {
    let h = harness().await;
    let token = h.login("alice").await;
    let a = vec![b'a'; 64 * 1024];
    let b = vec![b'b'; 64 * 1024];

    let (ra, rb) = tokio::join!(
        h.gate.write_bytes(&token, "/shared.bin", &a, None),
        h.gate.write_bytes(&token, "/shared.bin", &b, None),
    );
    ra.unwrap();
    rb.unwrap();

    let content = h.gate.read(&token, "/shared.bin").await.unwrap().content;
    assert!(content == a || content == b);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 64 * 1024);
}

#[tokio::test]
async fn concurrent_writers_respect_limit() {
    let h = harness().await;
    h.gate.users().set_quota("alice", 1000).await.unwrap();
    let token = h.login("alice").await;

    let writes = (0..20).map(|i| {
        let gate = h.gate.clone();
        let token = token.clone();
        tokio::spawn(async move {
            gate.write_bytes(&token, &format!("/f{i}"), &[0u8; 100], None)
                .await
        })
    });

    let mut succeeded = 0;
    for write in writes {
        if write.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 1000);
}

#[tokio::test]
async fn traversal_is_invalid_path() {
    let h = harness().await;
    let token = h.login("alice").await;
    let err = h.gate.read(&token, "../../etc/passwd").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);

    let err = h
        .gate
        .write_bytes(&token, "/%2e%2e/%2e%2e/bob/x", b"x", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
}

#[tokio::test]
async fn cross_owner_move_is_forbidden() {
    let h = harness().await;
    let token = h.login("alice").await;
    let original = h
        .gate
        .write_bytes(&token, "/a.txt", b"alice data", None)
        .await
        .unwrap();

    let err = h
        .gate
        .move_entry(&token, "/a.txt", &Destination::owned_by("bob", "/a.txt"), false, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = h
        .gate
        .copy_entry(&token, "/a.txt", &Destination::owned_by("bob", "/a.txt"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(!h.storage_root("bob").join("a.txt").exists());

    let moved = h
        .gate
        .move_entry(&token, "/a.txt", &Destination::local("/b.txt"), false, None)
        .await
        .unwrap();
    assert_ne!(moved.entry.version, original.version);
    assert_eq!(
        h.gate.read(&token, "/b.txt").await.unwrap().content,
        b"alice data"
    );
}

#[tokio::test]
async fn copy_is_charged_against_quota() {
    let h = harness().await;
    h.gate.users().set_quota("alice", 150).await.unwrap();
    let token = h.login("alice").await;

    h.gate
        .write_bytes(&token, "/a", &[0u8; 100], None)
        .await
        .unwrap();
    let err = h
        .gate
        .copy_entry(&token, "/a", &Destination::local("/b"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 100);

    h.gate.users().set_quota("alice", 0).await.unwrap();
    h.gate
        .copy_entry(&token, "/a", &Destination::local("/b"), false)
        .await
        .unwrap();
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 200);
}

fn staging_leftovers(h: &Harness, user: &str) -> usize {
    std::fs::read_dir(h.storage_root(user).join(STAGING_DIR))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn failed_overwriting_move_keeps_destination() {
    let h = harness().await;
    let token = h.login("alice").await;
    h.gate
        .write_bytes(&token, "/src.txt", b"source", None)
        .await
        .unwrap();
    h.gate
        .write_bytes(&token, "/dst.txt", &[7u8; 20], None)
        .await
        .unwrap();
    std::fs::remove_file(h.storage_root("alice").join("src.txt")).unwrap();

    let err = h
        .gate
        .move_entry(&token, "/src.txt", &Destination::local("/dst.txt"), true, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageIoFailure);

    let read = h.gate.read(&token, "/dst.txt").await.unwrap();
    assert_eq!(read.entry.size, 20);
    assert_eq!(read.content, vec![7u8; 20]);
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 26);
    assert_eq!(staging_leftovers(&h, "alice"), 0);
}

#[tokio::test]
async fn failed_overwriting_copy_keeps_destination() {
    let h = harness().await;
    let token = h.login("alice").await;
    h.gate.mkdir(&token, "/src").await.unwrap();
    h.gate
        .write_bytes(&token, "/src/a", b"aaaa", None)
        .await
        .unwrap();
    h.gate
        .write_bytes(&token, "/src/b", b"bbbb", None)
        .await
        .unwrap();
    h.gate
        .write_bytes(&token, "/dst", &[9u8; 20], None)
        .await
        .unwrap();
    std::fs::remove_file(h.storage_root("alice").join("src").join("b")).unwrap();

    let err = h
        .gate
        .copy_entry(&token, "/src", &Destination::local("/dst"), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageIoFailure);

    let read = h.gate.read(&token, "/dst").await.unwrap();
    assert_eq!(read.content, vec![9u8; 20]);
    assert!(h.storage_root("alice").join("dst").is_file());
    assert_eq!(h.gate.quota(&token).await.unwrap().used, 28);
    assert_eq!(h.gate.ledger().pending_count(), 0);
    assert_eq!(staging_leftovers(&h, "alice"), 0);
}

#[tokio::test]
async fn stale_version_is_conflict() {
    let h = harness().await;
    let token = h.login("alice").await;
    let first = h
        .gate
        .write_bytes(&token, "/doc", b"v1", None)
        .await
        .unwrap();
    h.gate
        .write_bytes(&token, "/doc", b"v2", Some(&first.version))
        .await
        .unwrap();

    let err = h
        .gate
        .write_bytes(&token, "/doc", b"v3", Some(&first.version))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .gate
        .delete(&token, "/doc", Some(&first.version))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn session_expires_at_deadline() {
    let h = harness().await;
    let token = h.login("alice").await;

    h.clock.advance(Duration::seconds(3599));
    assert!(h.gate.list(&token, "/").await.is_ok());

    h.clock.advance(Duration::seconds(1));
    let err = h.gate.list(&token, "/").await.unwrap_err();
    assert!(matches!(
        err,
        DavError::Session(SessionError::SessionExpired)
    ));
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn logout_invalidates_token() {
    let h = harness().await;
    let token = h.login("alice").await;
    h.gate.logout(&token).await.unwrap();

    let err = h.gate.stat(&token, "/").await.unwrap_err();
    assert!(matches!(err, DavError::Session(SessionError::NoSuchSession)));
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let h = harness().await;
    let err = h.gate.authenticate("alice", "guess").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn rotated_key_keeps_sessions_valid() {
    let dir = tempfile::tempdir().unwrap();
    let old_core = core_config(&dir);
    let h = harness_with(old_core, dir).await;
    let token = h.login("alice").await;

    let mut rotated = core_config(&h.dir);
    rotated.secret_key = "a-brand-new-secret-key".to_string();
    rotated.previous_secret_keys = vec![SECRET.to_string()];

    let resolver = PathResolver::new(&rotated.storage_path_template).unwrap();
    let users = Arc::new(UserDirectory::new(
        h.db.clone(),
        Arc::new(QuotaLedger::new()),
        resolver,
        &rotated,
    ));
    let sessions = SessionManager::new(users, h.db.clone(), h.clock.clone(), &rotated);
    sessions.load().await.unwrap();

    assert_eq!(sessions.validate(&token).await.unwrap(), "alice");
}

#[tokio::test]
async fn aborted_upload_leaves_nothing_behind() {
    let h = harness().await;
    h.gate.users().set_quota("alice", 1000).await.unwrap();
    let token = h.login("alice").await;

    let mut truncated: &[u8] = &[7u8; 100];
    let err = h
        .gate
        .write(&token, "/partial.bin", &mut truncated, 500, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageIoFailure);

    assert_eq!(h.gate.quota(&token).await.unwrap().used, 0);
    assert_eq!(h.gate.ledger().pending_count(), 0);
    assert!(!h.storage_root("alice").join("partial.bin").exists());

    let staging = h.storage_root("alice").join(STAGING_DIR);
    let leftovers = std::fs::read_dir(&staging)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn staging_never_listed_or_reachable() {
    let h = harness().await;
    let token = h.login("alice").await;
    h.gate
        .write_bytes(&token, "/visible", b"x", None)
        .await
        .unwrap();

    let names: Vec<_> = h
        .gate
        .list(&token, "/")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.path)
        .collect();
    assert_eq!(names, vec!["/visible"]);

    let err = h
        .gate
        .list(&token, &format!("/{STAGING_DIR}"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
}

#[tokio::test]
async fn deleting_user_cascades() {
    let h = harness().await;
    let token = h.login("bob").await;
    h.gate
        .write_bytes(&token, "/keep.txt", b"bob", None)
        .await
        .unwrap();

    h.gate.delete_user("bob").await.unwrap();

    let err = h.gate.stat(&token, "/keep.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(!h.storage_root("bob").exists());
    assert!(h.db.get_user("bob").await.unwrap().is_none());
    assert!(h.gate.authenticate("bob", "bob-password").await.is_err());
}

#[tokio::test]
async fn logins_racing_user_deletion_leave_no_session() {
    let h = harness().await;

    let logins: Vec<_> = (0..8)
        .map(|_| {
            let gate = h.gate.clone();
            tokio::spawn(async move { gate.authenticate("bob", "bob-password").await })
        })
        .collect();
    h.gate.delete_user("bob").await.unwrap();

    for login in logins {
        if let Ok(session) = login.await.unwrap() {
            let err = h.gate.authorize(&session.token).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthorized);
        }
    }
    assert_eq!(h.gate.sessions().active_count(), 0);
}

#[tokio::test]
async fn image_writes_emit_thumbnail_requests() {
    let dir = tempfile::tempdir().unwrap();
    let core = core_config(&dir);
    let resolver = PathResolver::new(&core.storage_path_template).unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(from_unix(1_700_000_000)));
    let ledger = Arc::new(QuotaLedger::new());
    let users = Arc::new(UserDirectory::new(
        db.clone(),
        ledger.clone(),
        resolver.clone(),
        &core,
    ));
    let sessions = Arc::new(SessionManager::new(
        users.clone(),
        db.clone(),
        clock.clone(),
        &core,
    ));
    let store = Arc::new(StorageStore::new(resolver, db, clock, 0));
    let (sink, mut rx) = ChannelThumbnailSink::channel(8);
    let gate = AccessGate::new(sessions, users, ledger, store).with_thumbnails(Arc::new(sink));

    gate.create_user("alice", "alice-password").await.unwrap();
    let token = gate
        .authenticate("alice", "alice-password")
        .await
        .unwrap()
        .token;

    gate.write_bytes(&token, "/notes.txt", b"text", None)
        .await
        .unwrap();
    let photo = gate
        .write_bytes(&token, "/photo.jpg", b"jpeg", None)
        .await
        .unwrap();

    let request = rx.recv().await.unwrap();
    assert_eq!(request.path, "/photo.jpg");
    assert_eq!(request.version, photo.version);
    assert!(rx.try_recv().is_err());
}
