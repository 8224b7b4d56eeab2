//! `SQLite` storage for the group archive.
//!
//! One `messages` row per upstream message, keyed on its id, with owned rows in
//! `attachments` and `favorited_by`, plus a standalone FTS5 table whose rowid is
//! pinned to the primary row's rowid. Every write goes through
//! [`Storage::upsert_message`], which touches all four tables in one
//! transaction so the index never disagrees with the primary table.

use crate::error::{Result, VaultError};
use crate::model::{ArchiveStats, Attachment, Charmap, FtsConsistency, HydrationWarning, Message, MessageView};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i32 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Columns selected for a [`MessageView`], in the order [`view_from_row`] reads them.
/// Expects the messages table aliased as `m`.
pub(crate) const VIEW_COLUMNS: &str = "m.id, m.created_at, m.user_id, m.name, m.avatar_url, m.text, m.system,
       (SELECT COUNT(*) FROM favorited_by f WHERE f.message_id = m.id) AS favorite_count";

/// `SQLite` storage manager.
///
/// The connection sits behind a mutex so a single handle can be shared by the
/// ingestor and by concurrent HTTP requests.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Schema`] if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            VaultError::schema(format!("failed to open database at {}: {e}", path.display()))
        })?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| VaultError::schema(e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| VaultError::schema(e.to_string()))?;

        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate()?;
        debug!("Database opened at {}", path.display());
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| VaultError::schema(e.to_string()))?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            ",
        )
        .map_err(|e| VaultError::schema(e.to_string()))?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate()?;
        Ok(storage)
    }

    /// Run a closure against the shared connection.
    ///
    /// # Errors
    ///
    /// Returns whatever the closure returns.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        let current_version = schema_version(&conn);

        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            create_schema(&conn).map_err(|e| VaultError::schema(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )
            .map_err(|e| VaultError::schema(e.to_string()))?;
        } else if current_version > SCHEMA_VERSION {
            return Err(VaultError::schema(format!(
                "database schema version {current_version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        Ok(())
    }

    /// Insert or overwrite a message, its attachments, its favorites and its
    /// index entry as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::StoreWrite`] if any part of the write fails; in
    /// that case nothing from this call is visible.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let mut conn = self.conn.lock();
        let store_err = |source| VaultError::StoreWrite {
            id: message.id.clone(),
            source,
        };

        let tx = conn.transaction().map_err(store_err)?;
        write_message(&tx, message).map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(())
    }

    /// Fetch the hydrated view of a message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_message(&self, id: &str) -> Result<Option<MessageView>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {VIEW_COLUMNS} FROM messages m WHERE m.id = ?1");
            let view = conn
                .query_row(&sql, params![id], view_from_row)
                .optional()?;
            match view {
                Some(view) => Ok(Some(hydrate(conn, view)?)),
                None => Ok(None),
            }
        })
    }

    /// Reassemble the stored [`Message`] exactly as it was last written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn load_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    r"
                    SELECT id, source_guid, created_at, user_id, group_id, name,
                           avatar_url, text, system
                    FROM messages WHERE id = ?1
                    ",
                    params![id],
                    |row| {
                        Ok(Message {
                            id: row.get(0)?,
                            source_guid: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                            created_at: row.get(2)?,
                            user_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                            group_id: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                            name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                            avatar_url: row.get(6)?,
                            text: row.get(7)?,
                            system: row.get(8)?,
                            favorited_by: Vec::new(),
                            attachments: Vec::new(),
                        })
                    },
                )
                .optional()?;

            let Some(mut message) = row else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT user_id FROM favorited_by WHERE message_id = ?1 ORDER BY rowid",
            )?;
            message.favorited_by = stmt
                .query_map(params![id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            message.attachments = load_attachments(conn, id)?.0;

            Ok(Some(message))
        })
    }

    /// Ordered attachments of a message.
    ///
    /// A charmap that no longer decodes comes back empty; the rest of the
    /// attachment is still returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_attachments(&self, message_id: &str) -> Result<Vec<Attachment>> {
        self.with_conn(|conn| {
            let (attachments, warnings) = load_attachments(conn, message_id)?;
            for w in &warnings {
                warn!(message_id = %w.message_id, field = %w.field, "{}", w.reason);
            }
            Ok(attachments)
        })
    }

    /// Number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn message_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })
    }

    /// Get archive statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics queries fail.
    pub fn get_stats(&self) -> Result<ArchiveStats> {
        self.with_conn(|conn| {
            let query = r"
                SELECT
                    (SELECT COUNT(*) FROM messages) AS messages_count,
                    (SELECT COUNT(*) FROM attachments) AS attachments_count,
                    (SELECT COUNT(*) FROM favorited_by) AS favorites_count,
                    (SELECT COUNT(*) FROM messages_fts) AS fts_count,
                    (SELECT MIN(created_at) FROM messages) AS first_message_at,
                    (SELECT MAX(created_at) FROM messages) AS last_message_at
            ";

            Ok(conn.query_row(query, [], |row| {
                Ok(ArchiveStats {
                    messages_count: row.get(0)?,
                    attachments_count: row.get(1)?,
                    favorites_count: row.get(2)?,
                    fts_count: row.get(3)?,
                    first_message_at: epoch_opt(row.get(4)?),
                    last_message_at: epoch_opt(row.get(5)?),
                })
            })?)
        })
    }

    /// Count messages without an index row and index rows without a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn fts_consistency(&self) -> Result<FtsConsistency> {
        self.with_conn(|conn| {
            let missing = conn.query_row(
                r"
                SELECT COUNT(*) FROM messages m
                WHERE NOT EXISTS (
                    SELECT 1 FROM messages_fts f WHERE f.rowid = m.rowid AND f.id = m.id
                )
                ",
                [],
                |row| row.get(0),
            )?;
            let orphaned = conn.query_row(
                r"
                SELECT COUNT(*) FROM messages_fts f
                WHERE NOT EXISTS (
                    SELECT 1 FROM messages m WHERE m.rowid = f.rowid AND m.id = f.id
                )
                ",
                [],
                |row| row.get(0),
            )?;
            Ok(FtsConsistency { missing, orphaned })
        })
    }

    /// Rebuild the full-text index from the messages table.
    ///
    /// Safe and idempotent because the index is derived data.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild fails.
    pub fn rebuild_fts(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages_fts", [])?;
        let rebuilt = tx.execute(
            r"
            INSERT INTO messages_fts (rowid, id, name, text, user_id)
            SELECT rowid, id, name, text, user_id FROM messages
            ",
            [],
        )?;
        tx.commit()?;
        info!("Rebuilt full-text index for {} messages", rebuilt);
        Ok(rebuilt)
    }

    /// Apply safe, idempotent database optimizations.
    ///
    /// # Errors
    ///
    /// Returns an error if any pragma fails.
    pub fn optimize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                INSERT INTO messages_fts(messages_fts) VALUES('optimize');
                PRAGMA optimize;
                ",
            )?;
            Ok(())
        })
    }
}

fn schema_version(conn: &Connection) -> i32 {
    let result: rusqlite::Result<i32> = conn.query_row(
        "SELECT value FROM meta WHERE key = 'schema_version'",
        [],
        |row| {
            let value: String = row.get(0)?;
            Ok(value.parse().unwrap_or(0))
        },
    );

    // Treat missing meta table as version 0.
    result.unwrap_or_default()
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            source_guid TEXT,
            created_at INTEGER NOT NULL,
            user_id TEXT,
            group_id TEXT,
            name TEXT,
            avatar_url TEXT,
            text TEXT,
            system INTEGER NOT NULL DEFAULT 0,
            attachments TEXT,
            favorited_by TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);

        CREATE TABLE IF NOT EXISTS attachments (
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            type TEXT NOT NULL,
            url TEXT,
            lat TEXT,
            lng TEXT,
            name TEXT,
            placeholder TEXT,
            charmap TEXT,
            PRIMARY KEY (message_id, position)
        );

        CREATE TABLE IF NOT EXISTS favorited_by (
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        -- Standalone FTS table; rowid mirrors messages.rowid.
        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
            id UNINDEXED,
            name,
            text,
            user_id
        );
        ",
    )
}

fn write_message(tx: &Transaction<'_>, message: &Message) -> rusqlite::Result<()> {
    let attachments_json = serde_json::to_string(&message.attachments)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let favorited_json = serde_json::to_string(&message.favorited_by)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    // ON CONFLICT keeps the rowid stable, which the FTS row is keyed on.
    tx.execute(
        r"
        INSERT INTO messages
            (id, source_guid, created_at, user_id, group_id, name, avatar_url, text,
             system, attachments, favorited_by)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(id) DO UPDATE SET
            source_guid = excluded.source_guid,
            created_at = excluded.created_at,
            user_id = excluded.user_id,
            group_id = excluded.group_id,
            name = excluded.name,
            avatar_url = excluded.avatar_url,
            text = excluded.text,
            system = excluded.system,
            attachments = excluded.attachments,
            favorited_by = excluded.favorited_by
        ",
        params![
            message.id,
            message.source_guid,
            message.created_at,
            message.user_id,
            message.group_id,
            message.name,
            message.avatar_url,
            message.text,
            message.system,
            attachments_json,
            favorited_json,
        ],
    )?;

    let rowid: i64 = tx.query_row(
        "SELECT rowid FROM messages WHERE id = ?1",
        params![message.id],
        |row| row.get(0),
    )?;

    tx.execute(
        "DELETE FROM attachments WHERE message_id = ?1",
        params![message.id],
    )?;
    {
        let mut stmt = tx.prepare_cached(
            r"
            INSERT INTO attachments
                (message_id, position, type, url, lat, lng, name, placeholder, charmap)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )?;
        for (position, att) in message.attachments.iter().enumerate() {
            let charmap = if att.charmap.is_empty() {
                None
            } else {
                Some(
                    serde_json::to_string(&att.charmap)
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
                )
            };
            stmt.execute(params![
                message.id,
                i64::try_from(position).unwrap_or(i64::MAX),
                att.kind,
                att.url,
                att.lat,
                att.lng,
                att.name,
                att.placeholder,
                charmap,
            ])?;
        }
    }

    tx.execute(
        "DELETE FROM favorited_by WHERE message_id = ?1",
        params![message.id],
    )?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO favorited_by (message_id, user_id) VALUES (?1, ?2)",
        )?;
        for user_id in &message.favorited_by {
            stmt.execute(params![message.id, user_id])?;
        }
    }

    // FTS5 doesn't support INSERT OR REPLACE, so delete the old entry first.
    tx.execute("DELETE FROM messages_fts WHERE rowid = ?1", params![rowid])?;
    tx.execute(
        "INSERT INTO messages_fts (rowid, id, name, text, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![rowid, message.id, message.name, message.text, message.user_id],
    )?;

    Ok(())
}

/// Map a row selected with [`VIEW_COLUMNS`] to an unhydrated view.
pub(crate) fn view_from_row(row: &Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: row.get(0)?,
        created_at: row.get(1)?,
        user_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        avatar_url: row.get(4)?,
        text: row.get(5)?,
        system: row.get(6)?,
        favorite_count: row.get(7)?,
        attachments: Vec::new(),
        warnings: Vec::new(),
    })
}

/// Attach the attachment list (and any decode warnings) to a view.
pub(crate) fn hydrate(conn: &Connection, mut view: MessageView) -> Result<MessageView> {
    let (attachments, warnings) = load_attachments(conn, &view.id)?;
    view.attachments = attachments;
    view.warnings = warnings;
    Ok(view)
}

pub(crate) fn load_attachments(
    conn: &Connection,
    message_id: &str,
) -> rusqlite::Result<(Vec<Attachment>, Vec<HydrationWarning>)> {
    let mut stmt = conn.prepare_cached(
        r"
        SELECT type, url, lat, lng, name, placeholder, charmap
        FROM attachments
        WHERE message_id = ?1
        ORDER BY position
        ",
    )?;

    let mut warnings = Vec::new();
    let rows = stmt.query_map(params![message_id], |row| {
        Ok((
            Attachment {
                kind: row.get(0)?,
                url: row.get(1)?,
                lat: row.get(2)?,
                lng: row.get(3)?,
                name: row.get(4)?,
                placeholder: row.get(5)?,
                charmap: Vec::new(),
            },
            row.get::<_, Option<String>>(6)?,
        ))
    })?;

    let mut attachments = Vec::new();
    for row in rows {
        let (mut attachment, raw_charmap) = row?;
        if let Some(raw) = raw_charmap.filter(|s| !s.trim().is_empty()) {
            match serde_json::from_str::<Charmap>(&raw) {
                Ok(charmap) => attachment.charmap = charmap,
                Err(e) => warnings.push(HydrationWarning {
                    message_id: message_id.to_string(),
                    field: "charmap".to_string(),
                    reason: format!("malformed charmap on {} attachment: {e}", attachment.kind),
                }),
            }
        }
        attachments.push(attachment);
    }

    Ok((attachments, warnings))
}

fn epoch_opt(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}
