//! SQLite persistence layer.
//!
//! RULES:
//!   - Only store/ talks to the database. The engine reaches it through the
//!     collaborator traits in `integration`.
//!   - Writes go through the anchor connection. Every read opens its own
//!     connection so concurrent sub-queries never share one.
//!   - Every connection carries the `convert_tz(text, from, to)` function.

use crate::{
    error::{EngineError, EngineResult},
    integration::SqlExecutor,
    result::{Cell, QueryResult},
    tz::convert_tz_text,
};
use rusqlite::{
    functions::FunctionFlags, params_from_iter, types::Value as SqlValue, Connection, OpenFlags,
};
use std::sync::{Mutex, MutexGuard};

mod documents;
mod events;
mod records;
mod settings;

pub use documents::ChannelDocument;

pub struct AnalyticsStore {
    /// Keeps shared in-memory databases alive and serializes writes.
    anchor: Mutex<Connection>,
    uri: String,
    default_timezone: String,
}

impl AnalyticsStore {
    /// Open (or create) the analytics database at `path`. `path` may be a
    /// `file:` URI.
    pub fn open(path: &str) -> EngineResult<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let conn = connect_uri(path)?;
        // WAL mode only for real files (shared-memory URIs ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self {
            anchor: Mutex::new(conn),
            uri: path.to_string(),
            default_timezone: "UTC".to_string(),
        })
    }

    /// Private shared-cache in-memory database (used in tests). Each call
    /// gets a fresh database.
    pub fn in_memory() -> EngineResult<Self> {
        let uri = format!(
            "file:analytics_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let conn = connect_uri(&uri)?;
        Ok(Self {
            anchor: Mutex::new(conn),
            uri,
            default_timezone: "UTC".to_string(),
        })
    }

    /// Zone reported for tenants without a settings row.
    pub fn with_default_timezone(mut self, timezone: &str) -> Self {
        self.default_timezone = timezone.to_string();
        self
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        let conn = self.anchor()?;
        conn.execute_batch(include_str!("../../../migrations/001_channel_documents.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_tenant_settings.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/003_events.sql"))?;
        Ok(())
    }

    pub(crate) fn anchor(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.anchor
            .lock()
            .map_err(|_| EngineError::Other(anyhow::anyhow!("store anchor connection poisoned")))
    }

    /// New connection to the same database.
    pub(crate) fn connect(&self) -> EngineResult<Connection> {
        connect_uri(&self.uri)
    }
}

fn connect_uri(uri: &str) -> EngineResult<Connection> {
    let conn = Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    register_functions(&conn)?;
    Ok(conn)
}

fn register_functions(conn: &Connection) -> EngineResult<()> {
    conn.create_scalar_function(
        "convert_tz",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            let from: String = ctx.get(1)?;
            let to: String = ctx.get(2)?;
            Ok(value.and_then(|v| convert_tz_text(&v, &from, &to)))
        },
    )?;
    Ok(())
}

impl SqlExecutor for AnalyticsStore {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> EngineResult<QueryResult> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = headers.len();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(Cell::from(row.get_ref(i)?));
            }
            out.push(cells);
        }
        Ok(QueryResult::new(headers, out))
    }
}
