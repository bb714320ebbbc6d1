#![forbid(unsafe_code)]

//! SQLite (libsql) persistence shared by every engagement component.
//!
//! The database file is the only shared state: each unit of work opens its
//! own connection through [`Store::connect`] and every write path runs inside
//! a `BEGIN IMMEDIATE` transaction, so concurrent writers are serialized by
//! SQLite itself rather than by in-process locks.

use std::{future::Future, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database, Transaction, TransactionBehavior};

use crate::{
    config::DEFAULT_BUSY_TIMEOUT_MS,
    error::{EngagementError, EngagementResult},
};

/// Upper bound on attempts for a write that keeps hitting SQLITE_BUSY or an
/// internal conflict.
pub const MAX_WRITE_ATTEMPTS: u32 = 8;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS videos (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        thumbnail_url TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS profiles (
        user_id INTEGER PRIMARY KEY,
        channel_name TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        icon_url TEXT NOT NULL DEFAULT '',
        banner_url TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL,
        parent_id INTEGER REFERENCES comments(id) ON DELETE CASCADE,
        body TEXT NOT NULL CHECK (length(trim(body)) > 0),
        like_count INTEGER NOT NULL DEFAULT 0 CHECK (like_count >= 0),
        is_pinned INTEGER NOT NULL DEFAULT 0,
        is_creator_liked INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (parent_id IS NULL OR is_pinned = 0)
    );

    CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id, parent_id);
    CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id);

    CREATE TRIGGER IF NOT EXISTS trg_comments_reply_depth
    BEFORE INSERT ON comments
    WHEN NEW.parent_id IS NOT NULL
    BEGIN
        SELECT RAISE(ABORT, 'cannot reply to a reply')
        WHERE (SELECT parent_id FROM comments WHERE id = NEW.parent_id) IS NOT NULL;
        SELECT RAISE(ABORT, 'reply must belong to the parent video')
        WHERE (SELECT video_id FROM comments WHERE id = NEW.parent_id) IS NOT NEW.video_id;
    END;

    CREATE TRIGGER IF NOT EXISTS trg_comments_thread_immutable
    BEFORE UPDATE OF parent_id, video_id ON comments
    WHEN NEW.parent_id IS NOT OLD.parent_id OR NEW.video_id IS NOT OLD.video_id
    BEGIN
        SELECT RAISE(ABORT, 'comment threading is immutable');
    END;

    CREATE TABLE IF NOT EXISTS comment_votes (
        comment_id INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
        voter_id INTEGER NOT NULL,
        kind TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (comment_id, voter_id)
    );

    CREATE INDEX IF NOT EXISTS idx_comment_votes_voter ON comment_votes(voter_id);

    CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        title TEXT NOT NULL CHECK (length(trim(title)) > 0),
        description TEXT NOT NULL DEFAULT '',
        visibility TEXT NOT NULL DEFAULT 'private'
            CHECK (visibility IN ('public', 'unlisted', 'private')),
        kind TEXT NOT NULL DEFAULT 'standard' CHECK (kind IN ('standard', 'liked')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (kind = 'standard' OR title = 'Liked videos')
    );

    CREATE INDEX IF NOT EXISTS idx_playlists_owner ON playlists(owner_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_playlists_reserved
        ON playlists(owner_id, title) WHERE kind = 'liked';

    CREATE TABLE IF NOT EXISTS playlist_videos (
        playlist_id INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
        video_id INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
        position INTEGER NOT NULL CHECK (position >= 0),
        created_at TEXT NOT NULL,
        PRIMARY KEY (playlist_id, video_id),
        UNIQUE (playlist_id, position)
    );
"#;

/// Pragmas that report their new value come back as a row, which
/// `execute_batch` refuses; run them as queries and drain the result.
async fn set_reporting_pragma(conn: &Connection, pragma: &str) -> Result<()> {
    let mut rows = conn
        .query(pragma, ())
        .await
        .with_context(|| format!("applying `{pragma}`"))?;
    while rows.next().await?.is_some() {}
    Ok(())
}

async fn configure_connection(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    // busy_timeout goes first so the remaining pragmas wait for locks too.
    set_reporting_pragma(
        conn,
        &format!("PRAGMA busy_timeout = {}", busy_timeout.as_millis()),
    )
    .await?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    set_reporting_pragma(conn, "PRAGMA journal_mode = WAL").await?;
    conn.execute_batch(SCHEMA).await?;
    Ok(())
}

/// Cloneable handle to the engagement database.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    busy_timeout: Duration,
}

impl Store {
    /// Opens (and if necessary creates) the database with the default busy
    /// timeout.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)).await
    }

    pub async fn open_with(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening engagement DB {}", path.display()))?;

        let store = Self {
            db: Arc::new(db),
            busy_timeout,
        };
        let conn = store.connect().await?;
        ensure_schema(&conn)
            .await
            .context("creating engagement schema")?;
        Ok(store)
    }

    /// Opens a fresh, fully configured connection for one unit of work.
    pub async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect().context("connecting to engagement DB")?;
        configure_connection(&conn, self.busy_timeout).await?;
        Ok(conn)
    }

    /// Starts a write transaction that takes the database write lock up front.
    /// Dropping the returned transaction without committing rolls it back.
    pub async fn begin_write(conn: &Connection) -> Result<Transaction> {
        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .context("starting write transaction")
    }
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or
/// [`MAX_WRITE_ATTEMPTS`] is reached.
pub async fn retry_transient<T, F, Fut>(operation: &'static str, mut attempt: F) -> EngagementResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngagementResult<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(err) if err.is_transient() && tries < MAX_WRITE_ATTEMPTS => {
                tracing::warn!(operation, attempt = tries, error = ?err, "retrying transient failure");
                tokio::time::sleep(Duration::from_millis(5 * u64::from(tries))).await;
            }
            Err(EngagementError::Internal(err)) => {
                tracing::error!(operation, error = ?err, "storage failure");
                return Err(EngagementError::Internal(err));
            }
            other => return other,
        }
    }
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parsing stored timestamp `{raw}`"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// SQLite stores booleans as INTEGER; normalize them when reading rows.
pub fn int_flag(value: i64) -> bool {
    value != 0
}
