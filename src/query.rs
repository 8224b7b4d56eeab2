//! Read side of the archive: anchor-relative pagination, full-text search
//! and the message detail composite.
//!
//! Message ids are opaque; `created_at` is the only ordering key. Pagination
//! therefore runs in two phases: first find the anchor's temporal neighbor on
//! the requested side, then range-scan by id from that neighbor while ordering
//! by `created_at`.

use crate::error::{Result, VaultError};
use crate::model::{Direction, MessageDetail, MessageView};
use crate::storage::{Storage, VIEW_COLUMNS, hydrate, view_from_row};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Default number of search hits.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
/// Window size on each side of the detail view.
pub const DEFAULT_DETAIL_WINDOW: usize = 50;
/// Largest page served by the before/after endpoints.
pub const DEFAULT_MAX_PAGE: usize = 100;

/// Size caps for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub search_limit: usize,
    pub detail_window: usize,
    pub max_page: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            detail_window: DEFAULT_DETAIL_WINDOW,
            max_page: DEFAULT_MAX_PAGE,
        }
    }
}

/// Stateless query engine over a shared [`Storage`] handle.
pub struct QueryEngine<'s> {
    storage: &'s Storage,
    limits: QueryLimits,
}

impl<'s> QueryEngine<'s> {
    #[must_use]
    pub fn new(storage: &'s Storage) -> Self {
        Self::with_limits(storage, QueryLimits::default())
    }

    #[must_use]
    pub const fn with_limits(storage: &'s Storage, limits: QueryLimits) -> Self {
        Self { storage, limits }
    }

    /// Find the message temporally adjacent to `anchor` on the given side.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn resolve_neighbor(&self, anchor: &str, direction: Direction) -> Result<Option<String>> {
        self.storage
            .with_conn(|conn| Ok(neighbor_of(conn, anchor, direction)?))
    }

    /// Up to `limit` messages on one side of `anchor`, nearest first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NoNeighbor`] when the anchor is the oldest (for
    /// `Before`) or newest (for `After`) message, or a database error.
    pub fn window(
        &self,
        anchor: &str,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<MessageView>> {
        self.storage.with_conn(|conn| {
            let neighbor = neighbor_of(conn, anchor, direction)?
                .ok_or_else(|| VaultError::no_neighbor(anchor, direction))?;
            if limit == 0 {
                return Ok(Vec::new());
            }

            // The neighbor itself is the first row of the window.
            let sql = match direction {
                Direction::Before => format!(
                    "SELECT {VIEW_COLUMNS} FROM messages m
                     WHERE m.id <= ?1
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?2"
                ),
                Direction::After => format!(
                    "SELECT {VIEW_COLUMNS} FROM messages m
                     WHERE m.id >= ?1
                     ORDER BY m.created_at ASC, m.id ASC
                     LIMIT ?2"
                ),
            };

            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![neighbor, limit_to_i64(limit)], view_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            debug!(anchor, %direction, %neighbor, rows = rows.len(), "Resolved window");

            hydrate_all(conn, rows)
        })
    }

    /// Messages before `anchor`, newest first. Empty at the start of history.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn before(&self, anchor: &str, limit: usize) -> Result<Vec<MessageView>> {
        empty_at_boundary(self.window(anchor, Direction::Before, limit))
    }

    /// Messages after `anchor`, oldest first. Empty at the end of history.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn after(&self, anchor: &str, limit: usize) -> Result<Vec<MessageView>> {
        empty_at_boundary(self.window(anchor, Direction::After, limit))
    }

    /// Full-text search capped at the configured search limit.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidQuery`] for malformed query syntax, or a
    /// database error.
    pub fn search(&self, query: &str) -> Result<Vec<MessageView>> {
        self.search_with_limit(query, self.limits.search_limit)
    }

    /// Full-text search over name, text and user id.
    ///
    /// Results are ordered by relevance, then newest first. A blank query
    /// matches nothing.
    ///
    /// The query uses FTS5 syntax. When it fails to parse and contains no
    /// double quotes, it is retried with every term quoted, so plain chat
    /// text such as `don't` or `re: lunch` still searches.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidQuery`] for malformed query syntax that
    /// quoting cannot repair, or a database error.
    pub fn search_with_limit(&self, query: &str, limit: usize) -> Result<Vec<MessageView>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        self.storage.with_conn(|conn| {
            let rows = match run_match(conn, query, limit) {
                Err(VaultError::InvalidQuery { reason }) => match quote_terms(query) {
                    Some(quoted) => {
                        debug!(query, %quoted, "Retrying search with quoted terms");
                        run_match(conn, &quoted, limit)?
                    }
                    None => return Err(VaultError::InvalidQuery { reason }),
                },
                other => other?,
            };
            debug!(query, hits = rows.len(), "Search complete");

            hydrate_all(conn, rows)
        })
    }

    /// A single hydrated message.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] if no message has this id.
    pub fn message(&self, id: &str) -> Result<MessageView> {
        self.storage
            .get_message(id)?
            .ok_or_else(|| VaultError::not_found("Message", id))
    }

    /// A message plus the windows on either side of it.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotFound`] only when the message itself is absent;
    /// empty windows at history boundaries are not errors.
    pub fn detail(&self, id: &str) -> Result<MessageDetail> {
        let message = self.message(id)?;
        let window = self.limits.detail_window;
        Ok(MessageDetail {
            before_messages: self.before(id, window)?,
            after_messages: self.after(id, window)?,
            message,
        })
    }
}

fn neighbor_of(
    conn: &Connection,
    anchor: &str,
    direction: Direction,
) -> rusqlite::Result<Option<String>> {
    // Timestamps are whole seconds; the id breaks ties toward the anchor.
    let sql = match direction {
        Direction::Before => {
            "SELECT id FROM messages WHERE id < ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
        }
        Direction::After => {
            "SELECT id FROM messages WHERE id > ?1 ORDER BY created_at ASC, id ASC LIMIT 1"
        }
    };
    conn.query_row(sql, params![anchor], |row| row.get(0))
        .optional()
}

fn run_match(conn: &Connection, query: &str, limit: usize) -> Result<Vec<MessageView>> {
    let sql = format!(
        "SELECT {VIEW_COLUMNS}
         FROM messages_fts
         JOIN messages m ON m.rowid = messages_fts.rowid
         WHERE messages_fts MATCH ?1
         ORDER BY messages_fts.rank, m.created_at DESC, m.id
         LIMIT ?2"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.query_map(params![query, limit_to_i64(limit)], view_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(classify_match_error)
}

/// Quote each whitespace-separated term as an FTS5 string. `None` when the
/// query already uses quotes, since its phrases cannot be split safely.
fn quote_terms(query: &str) -> Option<String> {
    if query.contains('"') {
        return None;
    }
    let quoted: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{term}\""))
        .collect();
    Some(quoted.join(" "))
}

fn hydrate_all(conn: &Connection, rows: Vec<MessageView>) -> Result<Vec<MessageView>> {
    rows.into_iter().map(|view| hydrate(conn, view)).collect()
}

fn empty_at_boundary(result: Result<Vec<MessageView>>) -> Result<Vec<MessageView>> {
    match result {
        Err(VaultError::NoNeighbor { .. }) => Ok(Vec::new()),
        other => other,
    }
}

/// FTS5 reports query syntax problems as generic SQLite failures.
fn classify_match_error(err: rusqlite::Error) -> VaultError {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        let lowered = message.to_lowercase();
        if lowered.contains("fts5") || lowered.contains("syntax error") || lowered.contains("no such column")
        {
            return VaultError::invalid_query(message.clone());
        }
    }
    VaultError::Database(err)
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
