//! The connection broker: handle-based access to engine sessions and
//! prepared statements.
//!
//! Callers never hold a session or statement object, only opaque `i64`
//! handles issued by the broker's registries. Every engine touch for a given
//! connection is funneled through that connection's [`SessionWorker`], so
//! concurrent callers of the same handle serialize in submission order while
//! distinct connections proceed in parallel.
//!
//! Statements are logical: the broker records the SQL text, the bound
//! parameter values, and the execution cursor position, and re-resolves the
//! compiled statement from the session's statement cache on the worker for
//! each operation. That keeps every compiled-statement lifetime confined to
//! the worker thread. Row-producing operations replay the engine cursor to
//! the recorded position and advance it one row; completion operations run
//! the statement to exhaustion and rewind it.

use std::sync::Arc;
use std::sync::LazyLock;

use ersatzlite_error::{codes, translate_engine_error, ErsatzError, Result};
use ersatzlite_types::{HandleTable, Value};
use ersatzlite_window::WindowStore;
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle};
use tracing::{debug, info, warn};

use crate::engine;
use crate::worker::SessionWorker;

/// Path sentinel selecting a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Statement handle issued for [`REINDEX_LOCALIZED_SQL`].
///
/// The emulated binding has no LOCALIZED collation to reindex, so the
/// statement is accepted but never compiled; every operation on this handle
/// is a no-op with a neutral result.
pub const IGNORED_REINDEX_STATEMENT: i64 = -2;

const REINDEX_LOCALIZED_SQL: &str = "REINDEX LOCALIZED";

const NO_ROWS_MESSAGE: &str = "No rows returned from query";
const MISUSE_QUERY_MESSAGE: &str =
    "Queries can be performed using SQLiteDatabase query or rawQuery methods only.";

struct ConnectionEntry {
    path: String,
    worker: SessionWorker,
    interrupt: InterruptHandle,
    /// Statement handles prepared on this connection, invalidated at close.
    statements: Mutex<Vec<i64>>,
}

struct StatementEntry {
    connection: i64,
    sql: String,
    parameter_count: usize,
    read_only: bool,
    bindings: Mutex<Vec<Value>>,
    /// Rows already consumed by `step`-family operations. The compiled form
    /// is re-resolved per operation, so the engine cursor is replayed to
    /// this position before producing the next row. Only touched on the
    /// owning worker thread.
    position: Mutex<usize>,
}

/// The broker owning the connection and statement registries.
pub struct Broker {
    connections: HandleTable<ConnectionEntry>,
    statements: HandleTable<StatementEntry>,
}

static GLOBAL: LazyLock<Broker> = LazyLock::new(Broker::new);

impl Broker {
    /// An empty, private broker (tests use this for isolation).
    pub fn new() -> Self {
        Self {
            connections: HandleTable::new("connection"),
            statements: HandleTable::new("statement"),
        }
    }

    /// The process-wide broker.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Open a connection and issue its handle.
    ///
    /// [`IN_MEMORY_PATH`] opens a private in-memory database; any other path
    /// is a file on disk, created if absent. The session is opened on its
    /// worker thread and never exists on the calling thread.
    pub fn open(&self, path: &str) -> Result<i64> {
        let target = path.to_owned();
        let label = if path == IN_MEMORY_PATH {
            "memory".to_owned()
        } else {
            target.clone()
        };
        let (worker, interrupt) = SessionWorker::spawn(&label, move || {
            if target == IN_MEMORY_PATH {
                Connection::open_in_memory().map_err(engine::map_engine_error)
            } else {
                Connection::open(&target).map_err(engine::map_engine_error)
            }
        })?;
        let handle = self.connections.insert(ConnectionEntry {
            path: path.to_owned(),
            worker,
            interrupt,
            statements: Mutex::new(Vec::new()),
        });
        info!(handle, path, "opened connection");
        Ok(handle)
    }

    /// Compile a statement and issue its handle.
    ///
    /// `COLLATE LOCALIZED` and `COLLATE UNICODE` clauses are rewritten to
    /// `COLLATE NOCASE` before compilation. The exact text
    /// `REINDEX LOCALIZED` gets the [`IGNORED_REINDEX_STATEMENT`] sentinel
    /// without touching the engine.
    pub fn prepare(&self, connection: i64, sql: &str) -> Result<i64> {
        if sql == REINDEX_LOCALIZED_SQL {
            debug!(connection, "ignoring localized reindex");
            return Ok(IGNORED_REINDEX_STATEMENT);
        }
        let owner = self.connections.get(connection)?;
        let rewritten = engine::rewrite_localized_collators(sql).into_owned();
        let compile_sql = rewritten.clone();
        let (parameter_count, read_only) = owner.worker.submit(move |conn| {
            let stmt = conn
                .prepare_cached(&compile_sql)
                .map_err(engine::map_engine_error)?;
            Ok((stmt.parameter_count(), stmt.readonly()))
        })?;
        let handle = self.statements.insert(StatementEntry {
            connection,
            sql: rewritten,
            parameter_count,
            read_only,
            bindings: Mutex::new(vec![Value::Null; parameter_count]),
            position: Mutex::new(0),
        });
        owner.statements.lock().push(handle);
        debug!(connection, statement = handle, parameter_count, "prepared statement");
        Ok(handle)
    }

    /// Number of bind parameters the statement declares.
    pub fn parameter_count(&self, statement: i64) -> Result<usize> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(0);
        }
        Ok(self.statements.get(statement)?.parameter_count)
    }

    /// Whether the statement can modify the database.
    pub fn is_read_only(&self, statement: i64) -> Result<bool> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(true);
        }
        Ok(self.statements.get(statement)?.read_only)
    }

    /// Number of result columns the statement produces.
    pub fn column_count(&self, statement: i64) -> Result<usize> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(0);
        }
        self.run_statement(statement, |stmt, _, _| Ok(stmt.column_count()))
    }

    /// Name of a result column, by zero-based index.
    pub fn column_name(&self, statement: i64, index: usize) -> Result<Option<String>> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(None);
        }
        self.run_statement(statement, move |stmt, _, _| {
            let name = stmt
                .column_name(index)
                .map_err(engine::map_engine_error)?
                .to_owned();
            Ok(Some(name))
        })
    }

    pub fn bind_null(&self, statement: i64, index: usize) -> Result<()> {
        self.bind(statement, index, Value::Null)
    }

    pub fn bind_long(&self, statement: i64, index: usize, value: i64) -> Result<()> {
        self.bind(statement, index, Value::Integer(value))
    }

    pub fn bind_double(&self, statement: i64, index: usize, value: f64) -> Result<()> {
        self.bind(statement, index, Value::Float(value))
    }

    pub fn bind_string(&self, statement: i64, index: usize, value: &str) -> Result<()> {
        self.bind(statement, index, Value::Text(value.to_owned()))
    }

    pub fn bind_blob(&self, statement: i64, index: usize, value: &[u8]) -> Result<()> {
        self.bind(statement, index, Value::Blob(value.to_vec()))
    }

    /// Record a parameter binding. `index` is one-based, as in the engine's
    /// bind API.
    fn bind(&self, statement: i64, index: usize, value: Value) -> Result<()> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(());
        }
        let entry = self.statements.get(statement)?;
        if index == 0 || index > entry.parameter_count {
            return Err(translate_engine_error(
                codes::SQLITE_RANGE,
                &format!(
                    "bind or column index out of range: index {index}, parameter count {}",
                    entry.parameter_count
                ),
            ));
        }
        entry.bindings.lock()[index - 1] = value;
        Ok(())
    }

    /// Forget all bindings, returning every parameter to NULL, and rewind
    /// the execution cursor to before the first row.
    pub fn reset_and_clear_bindings(&self, statement: i64) -> Result<()> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(());
        }
        let entry = self.statements.get(statement)?;
        let mut bindings = entry.bindings.lock();
        bindings.clear();
        bindings.resize(entry.parameter_count, Value::Null);
        *entry.position.lock() = 0;
        Ok(())
    }

    /// Advance the execution cursor one row, reporting whether a result row
    /// was produced. Once the result set is exhausted this keeps returning
    /// false until the cursor is rewound.
    pub fn step(&self, statement: i64) -> Result<bool> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(false);
        }
        self.run_statement(statement, |stmt, _, entry| {
            Ok(advance_cursor(stmt, entry)?.is_some())
        })
    }

    /// Execute a statement to completion, ignoring any result rows, and
    /// rewind the cursor.
    pub fn execute(&self, statement: i64) -> Result<()> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(());
        }
        self.run_statement(statement, |stmt, _, entry| {
            let mut rows = stmt.raw_query();
            while rows.next().map_err(engine::map_engine_error)?.is_some() {}
            drop(rows);
            *entry.position.lock() = 0;
            Ok(())
        })
    }

    /// Advance the cursor one row and return its first column as a long.
    ///
    /// Producing no row is an error; the value coercion follows the engine's
    /// column rules (NULL and unparsable text become 0).
    pub fn execute_for_long(&self, statement: i64) -> Result<i64> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(0);
        }
        self.run_statement(statement, |stmt, _, entry| {
            match advance_cursor(stmt, entry)? {
                Some(cells) => Ok(cells.into_iter().next().unwrap_or(Value::Null).to_integer()),
                None => Err(translate_engine_error(codes::SQLITE_DONE, NO_ROWS_MESSAGE)),
            }
        })
    }

    /// Advance the cursor one row and return its first column as text.
    /// A NULL cell is absent rather than an error.
    pub fn execute_for_string(&self, statement: i64) -> Result<Option<String>> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(None);
        }
        self.run_statement(statement, |stmt, _, entry| {
            match advance_cursor(stmt, entry)? {
                Some(cells) => Ok(cells.into_iter().next().unwrap_or(Value::Null).to_text()),
                None => Err(translate_engine_error(codes::SQLITE_DONE, NO_ROWS_MESSAGE)),
            }
        })
    }

    /// Execute a write and return the number of rows it changed.
    ///
    /// A statement that produces result rows does not belong here; that is
    /// reported as misuse rather than silently draining the rows.
    #[allow(clippy::cast_possible_wrap)]
    pub fn execute_for_changed_row_count(&self, statement: i64) -> Result<i64> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(0);
        }
        self.run_statement(statement, |stmt, conn, entry| {
            let mut rows = stmt.raw_query();
            if rows.next().map_err(engine::map_engine_error)?.is_some() {
                return Err(ErsatzError::misuse(MISUSE_QUERY_MESSAGE));
            }
            drop(rows);
            *entry.position.lock() = 0;
            Ok(conn.changes() as i64)
        })
    }

    /// Execute an insert and return the new rowid, or -1 if no row was
    /// actually inserted (e.g. `INSERT OR IGNORE` hitting a conflict).
    pub fn execute_for_last_inserted_row_id(&self, statement: i64) -> Result<i64> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(-1);
        }
        self.run_statement(statement, |stmt, conn, entry| {
            let mut rows = stmt.raw_query();
            while rows.next().map_err(engine::map_engine_error)?.is_some() {}
            drop(rows);
            *entry.position.lock() = 0;
            if conn.changes() > 0 {
                Ok(conn.last_insert_rowid())
            } else {
                Ok(-1)
            }
        })
    }

    /// Execute a query and materialize the entire result set into a cursor
    /// window, returning the number of rows written.
    ///
    /// The window is cleared first, its column count set to the statement's,
    /// and every row appended in order. The whole result set is cached so a
    /// cursor over the window can move backwards as well as forwards.
    pub fn execute_for_cursor_window(&self, statement: i64, window: i64) -> Result<i64> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(0);
        }
        // Resolve the window before submitting so a stale window handle
        // fails without occupying the worker.
        let target = WindowStore::global().get(window)?;
        self.run_statement(statement, move |stmt, _, entry| {
            let written = fill_window(&target, stmt)?;
            *entry.position.lock() = 0;
            Ok(written)
        })
    }

    /// Interrupt whatever the connection is currently executing.
    ///
    /// This goes through the session's interrupt handle, not the worker
    /// queue, so it reaches an in-flight operation instead of waiting in
    /// line behind it.
    pub fn cancel(&self, connection: i64) -> Result<()> {
        let entry = self.connections.get(connection)?;
        entry.interrupt.interrupt();
        debug!(handle = connection, "requested cancel");
        Ok(())
    }

    /// Release a statement handle. The sentinel handle is accepted and
    /// ignored; a real handle never resolves again.
    pub fn finalize(&self, statement: i64) -> Result<()> {
        if statement == IGNORED_REINDEX_STATEMENT {
            return Ok(());
        }
        let entry = self.statements.remove(statement)?;
        if let Ok(owner) = self.connections.get(entry.connection) {
            owner.statements.lock().retain(|&h| h != statement);
        }
        debug!(statement, "finalized statement");
        Ok(())
    }

    /// Close a connection: invalidate its statement handles, drain pending
    /// work, and drop the session.
    pub fn close(&self, connection: i64) -> Result<()> {
        let entry = self.connections.remove(connection)?;
        let derived = std::mem::take(&mut *entry.statements.lock());
        for statement in derived {
            let _ = self.statements.remove(statement);
        }
        entry.worker.shutdown()?;
        info!(handle = connection, path = %entry.path, "closed connection");
        Ok(())
    }

    /// Drop every connection and statement at once.
    ///
    /// Both registries are emptied first so no new work can resolve a
    /// handle, then every worker is shut down. Shutdown is attempted for all
    /// workers even if one fails; the first failure is reported. Handles
    /// issued after a reset are still distinct from every earlier handle.
    pub fn reset(&self) -> Result<()> {
        let statements = self.statements.drain();
        let connections = self.connections.drain();
        debug!(
            connections = connections.len(),
            statements = statements.len(),
            "resetting broker"
        );
        let mut first_error = None;
        for (handle, entry) in connections {
            if let Err(err) = entry.worker.shutdown() {
                warn!(handle, %err, "worker failed to shut down during reset");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of live connection handles.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live statement handles.
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Re-resolve the statement on its connection's worker, apply the
    /// recorded bindings, and run `op` against it.
    fn run_statement<T, F>(&self, statement: i64, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&mut rusqlite::Statement<'c>, &'c Connection, &StatementEntry) -> Result<T>
            + Send
            + 'static,
    {
        let entry = self.statements.get(statement)?;
        let owner = self.connections.get(entry.connection)?;
        owner.worker.submit(move |conn| {
            let conn = &*conn;
            let mut cached = conn
                .prepare_cached(&entry.sql)
                .map_err(engine::map_engine_error)?;
            let bindings = entry.bindings.lock().clone();
            for (i, value) in bindings.iter().enumerate() {
                cached
                    .raw_bind_parameter(i + 1, engine::engine_value(value))
                    .map_err(engine::map_engine_error)?;
            }
            op(&mut *cached, conn, &entry)
        })
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Advance the statement's execution cursor one row.
///
/// The compiled form only lives for the current operation, so the engine
/// cursor is replayed past the rows already consumed before taking the next
/// one. A produced row is returned as value cells and the recorded position
/// moves forward; exhaustion leaves the position where it is, so further
/// calls keep reporting exhaustion until the cursor is rewound.
fn advance_cursor(
    stmt: &mut rusqlite::Statement<'_>,
    entry: &StatementEntry,
) -> Result<Option<Vec<Value>>> {
    let columns = stmt.column_count();
    let mut position = entry.position.lock();
    let mut rows = stmt.raw_query();
    for _ in 0..*position {
        if rows.next().map_err(engine::map_engine_error)?.is_none() {
            return Ok(None);
        }
    }
    match rows.next().map_err(engine::map_engine_error)? {
        Some(row) => {
            let mut cells = Vec::with_capacity(columns);
            for col in 0..columns {
                let cell = row.get_ref(col).map_err(engine::map_engine_error)?;
                cells.push(engine::value_from_engine(cell));
            }
            *position += 1;
            Ok(Some(cells))
        }
        None => Ok(None),
    }
}

fn fill_window(target: &Arc<ersatzlite_window::Window>, stmt: &mut rusqlite::Statement<'_>) -> Result<i64> {
    let columns = stmt.column_count();
    target.clear();
    if !target.set_num_columns(columns) {
        return Err(ErsatzError::misuse(format!(
            "cursor window already holds rows of a different width than {columns}"
        )));
    }
    let mut written = 0i64;
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next().map_err(engine::map_engine_error)? {
        let mut cells = Vec::with_capacity(columns);
        for col in 0..columns {
            let cell = row.get_ref(col).map_err(engine::map_engine_error)?;
            cells.push(engine::value_from_engine(cell));
        }
        target.append_row(cells)?;
        written += 1;
    }
    Ok(written)
}
