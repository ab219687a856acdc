///
/// Database connection.
///
/// Wraps a `rusqlite::Connection` and exposes the raw handle to the typed
/// statement layer. Connection-level state is read straight from the
/// engine:
/// - last_insert_id / changes: overwritten by every completing statement on
///   this connection, so read them right after the call that set them
/// - error_code / error_message: the most recent failure on the connection
///
/// A connection and its statements belong to one thread at a time.
///

use std::ffi::{CStr, c_int};
use std::ptr;
use std::time::Duration;

use rusqlite::{InterruptHandle, OpenFlags, ffi};
use tracing::{debug, info};

use crate::binder::{BindPolicy, ParameterSource};
use crate::collation;
use crate::columnar::{Column, Gathered};
use crate::config::ConnectionConfig;
use crate::decode::{Row, StorageClass};
use crate::error::{Error, Result};
use crate::statement::{Statement, Step};
use crate::value::Bindable;

/// Engine limits adjustable per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Length,
    SqlLength,
    Column,
    ExprDepth,
    CompoundSelect,
    VdbeOp,
    FunctionArg,
    Attached,
    LikePatternLength,
    VariableNumber,
    TriggerDepth,
    WorkerThreads,
}

impl Limit {
    fn id(self) -> c_int {
        match self {
            Limit::Length => ffi::SQLITE_LIMIT_LENGTH,
            Limit::SqlLength => ffi::SQLITE_LIMIT_SQL_LENGTH,
            Limit::Column => ffi::SQLITE_LIMIT_COLUMN,
            Limit::ExprDepth => ffi::SQLITE_LIMIT_EXPR_DEPTH,
            Limit::CompoundSelect => ffi::SQLITE_LIMIT_COMPOUND_SELECT,
            Limit::VdbeOp => ffi::SQLITE_LIMIT_VDBE_OP,
            Limit::FunctionArg => ffi::SQLITE_LIMIT_FUNCTION_ARG,
            Limit::Attached => ffi::SQLITE_LIMIT_ATTACHED,
            Limit::LikePatternLength => ffi::SQLITE_LIMIT_LIKE_PATTERN_LENGTH,
            Limit::VariableNumber => ffi::SQLITE_LIMIT_VARIABLE_NUMBER,
            Limit::TriggerDepth => ffi::SQLITE_LIMIT_TRIGGER_DEPTH,
            Limit::WorkerThreads => ffi::SQLITE_LIMIT_WORKER_THREADS,
        }
    }
}

/// Locking behavior requested by `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionKind {
    #[default]
    Default,
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionKind {
    fn keyword(self) -> &'static str {
        match self {
            TransactionKind::Default => "",
            TransactionKind::Deferred => " deferred",
            TransactionKind::Immediate => " immediate",
            TransactionKind::Exclusive => " exclusive",
        }
    }
}

pub struct Connection {
    inner: rusqlite::Connection,
}

impl Connection {
    /// Open a database at `location`.
    ///
    /// An empty location is a private in-memory database. A location with
    /// a `:` is opened as a URI. `read_only` opens without create and is
    /// ignored for in-memory databases.
    pub fn open(location: &str, read_only: bool) -> Result<Self> {
        Self::open_with(&ConnectionConfig {
            location: location.to_string(),
            read_only,
            ..ConnectionConfig::default()
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open("", false)
    }

    /// Open and configure a connection as described by `config`.
    pub fn open_with(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let location = config.location.as_str();
        let flags = open_flags(location, config.read_only);
        let inner = if location.is_empty() {
            rusqlite::Connection::open_in_memory_with_flags(flags)
        } else {
            rusqlite::Connection::open_with_flags(location, flags)
        }
        .map_err(|err| engine_failure(err, location))?;

        let mut conn = Self { inner };
        if config.install_collations {
            conn.install_collations()?;
        }
        if let Some(ms) = config.busy_timeout_ms {
            conn.set_busy_timeout(ms)?;
        }
        if config.trace {
            conn.trace_execution(true);
        }
        if config.profile {
            conn.profile_execution(true);
        }
        debug!(location, read_only = config.read_only, "opened connection");
        Ok(conn)
    }

    pub(crate) fn handle(&self) -> *mut ffi::sqlite3 {
        unsafe { self.inner.handle() }
    }

    /// The wrapped rusqlite connection, for calls this crate does not cover.
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.inner
    }

    fn install_collations(&self) -> Result<()> {
        let code = collation::install(self.handle());
        if code != ffi::SQLITE_OK {
            return Err(Error::engine(code, self.error_description(code), "collation_needed"));
        }
        Ok(())
    }

    /// Compile the first statement in `sql`.
    pub(crate) fn prepare_raw(&self, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
        let len = c_int::try_from(sql.len())
            .map_err(|_| Error::engine(ffi::SQLITE_TOOBIG, "statement too long", sql))?;
        let mut raw = ptr::null_mut();
        let code = unsafe {
            ffi::sqlite3_prepare_v2(
                self.handle(),
                sql.as_ptr().cast(),
                len,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if code != ffi::SQLITE_OK {
            return Err(Error::engine(code, self.error_description(code), sql));
        }
        if raw.is_null() {
            return Err(Error::misuse("no statement in sql text", sql));
        }
        Ok(raw)
    }

    /// Message for `code`: the connection's own message when it reports
    /// the same failure, otherwise the engine's generic text.
    pub fn error_description(&self, code: c_int) -> String {
        let handle = self.handle();
        let current = unsafe { ffi::sqlite3_errcode(handle) };
        let message = if current != ffi::SQLITE_OK && (current & 0xff) == (code & 0xff) {
            unsafe { ffi::sqlite3_errmsg(handle) }
        } else {
            unsafe { ffi::sqlite3_errstr(code) }
        };
        if message.is_null() {
            return format!("error {}", code);
        }
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }

    // Statement factories

    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Statement::prepare(self, sql)
    }

    /// Prepare and strictly bind every parameter slot.
    pub fn prepare_bound(&self, sql: &str, values: &[&dyn Bindable]) -> Result<Statement<'_>> {
        let mut stmt = Statement::prepare(self, sql)?;
        stmt.bind(values, -1)?;
        Ok(stmt)
    }

    /// Prepare and bind every slot by name, requiring a value for each.
    pub fn prepare_named<P>(&self, sql: &str, values: &P) -> Result<Statement<'_>>
    where
        P: ParameterSource + ?Sized,
    {
        let mut stmt = Statement::prepare(self, sql)?;
        stmt.bind_named(values, BindPolicy::ReportMissing)?;
        Ok(stmt)
    }

    // Convenience execution

    /// Run one statement; true when it completed without producing a row.
    pub fn execute(&self, sql: &str, values: &[&dyn Bindable]) -> Result<bool> {
        let mut stmt = self.prepare_bound(sql, values)?;
        Ok(stmt.execute()? == Step::Done)
    }

    pub fn insert(&self, sql: &str, values: &[&dyn Bindable]) -> Result<i64> {
        self.prepare_bound(sql, values)?.execute_insert()
    }

    pub fn insert_named<P>(&self, sql: &str, values: &P) -> Result<i64>
    where
        P: ParameterSource + ?Sized,
    {
        self.prepare_named(sql, values)?.execute_insert()
    }

    pub fn update(&self, sql: &str, values: &[&dyn Bindable]) -> Result<usize> {
        self.prepare_bound(sql, values)?.execute_update()
    }

    pub fn update_named<P>(&self, sql: &str, values: &P) -> Result<usize>
    where
        P: ParameterSource + ?Sized,
    {
        self.prepare_named(sql, values)?.execute_update()
    }

    pub fn select<T, F>(&self, sql: &str, values: &[&dyn Bindable], transform: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> T,
    {
        self.prepare_bound(sql, values)?.map_rows(transform)
    }

    pub fn filter_select<T, F>(
        &self,
        sql: &str,
        values: &[&dyn Bindable],
        transform: F,
    ) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> Option<T>,
    {
        self.prepare_bound(sql, values)?.filter_map_rows(transform)
    }

    /// Run a query and return its untyped column-major results.
    pub fn gather(&self, sql: &str, values: &[&dyn Bindable]) -> Result<Gathered> {
        let mut stmt = self.prepare_bound(sql, values)?;
        let names = stmt.column_names().to_vec();
        let columns = stmt.column_major_results()?;
        Ok(Gathered { names, columns })
    }

    /// Run a query and project it into typed columns.
    pub fn gather_into(
        &self,
        sql: &str,
        values: &[&dyn Bindable],
        columns: &mut Vec<Column>,
        prefer: &[Option<StorageClass>],
    ) -> Result<()> {
        self.prepare_bound(sql, values)?.project_columns(columns, prefer)
    }

    /// Run every statement in `sql`, discarding results.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.inner
            .execute_batch(sql)
            .map_err(|err| engine_failure(err, sql))
    }

    // Connection information

    /// True while any statement on this connection is still prepared.
    pub fn has_statements(&self) -> bool {
        !unsafe { ffi::sqlite3_next_stmt(self.handle(), ptr::null_mut()) }.is_null()
    }

    pub fn has_transaction(&self) -> bool {
        !self.inner.is_autocommit()
    }

    pub fn last_insert_id(&self) -> i64 {
        unsafe { ffi::sqlite3_last_insert_rowid(self.handle()) }
    }

    /// Rows changed by the most recently completed statement.
    pub fn changes(&self) -> usize {
        unsafe { ffi::sqlite3_changes(self.handle()) }.max(0) as usize
    }

    /// Rows changed since the connection was opened.
    pub fn total_changes(&self) -> usize {
        unsafe { ffi::sqlite3_total_changes(self.handle()) }.max(0) as usize
    }

    pub fn error_code(&self) -> c_int {
        unsafe { ffi::sqlite3_extended_errcode(self.handle()) }
    }

    pub fn error_message(&self) -> Option<String> {
        let message = unsafe { ffi::sqlite3_errmsg(self.handle()) };
        if message.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
        }
    }

    /// File backing the main database; `None` for in-memory databases.
    pub fn path(&self) -> Option<String> {
        let path = unsafe { ffi::sqlite3_db_filename(self.handle(), c"main".as_ptr()) };
        if path.is_null() {
            return None;
        }
        let path = unsafe { CStr::from_ptr(path) }.to_string_lossy();
        if path.is_empty() {
            None
        } else {
            Some(path.into_owned())
        }
    }

    // Options

    /// Ask running statements to stop. The next step of each fails with
    /// an interrupt error.
    pub fn abort(&self) {
        unsafe { ffi::sqlite3_interrupt(self.handle()) }
    }

    /// A handle that can interrupt this connection from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.inner.get_interrupt_handle()
    }

    /// How long the engine retries a locked database before giving up.
    pub fn set_busy_timeout(&self, milliseconds: u64) -> Result<()> {
        self.inner.busy_timeout(Duration::from_millis(milliseconds))?;
        Ok(())
    }

    /// Set a limit, returning its previous value. A negative `value` only
    /// reads the current limit.
    pub fn limit(&self, limit: Limit, value: i32) -> i32 {
        unsafe { ffi::sqlite3_limit(self.handle(), limit.id(), value) }
    }

    /// Free as much cache memory as possible.
    pub fn release_memory(&self) -> Result<()> {
        let code = unsafe { ffi::sqlite3_db_release_memory(self.handle()) };
        if code != ffi::SQLITE_OK {
            return Err(Error::engine(code, self.error_description(code), "release memory"));
        }
        Ok(())
    }

    /// Log every statement the engine runs at info level.
    pub fn trace_execution(&mut self, enabled: bool) {
        self.inner.trace(enabled.then_some(log_trace as fn(&str)));
    }

    /// Log every completed statement with its run time at info level.
    pub fn profile_execution(&mut self, enabled: bool) {
        self.inner
            .profile(enabled.then_some(log_profile as fn(&str, Duration)));
    }

    // Transactions

    pub fn begin(&self, kind: TransactionKind) -> Result<bool> {
        self.execute(&format!("begin{} transaction", kind.keyword()), &[])
    }

    pub fn commit(&self) -> Result<bool> {
        self.execute("commit transaction", &[])
    }

    /// Roll back the transaction, or only back to `savepoint`.
    pub fn rollback(&self, savepoint: Option<&str>) -> Result<bool> {
        match savepoint {
            Some(name) => self.execute(&format!("rollback transaction to savepoint {}", name), &[]),
            None => self.execute("rollback transaction", &[]),
        }
    }

    pub fn savepoint(&self, name: &str) -> Result<bool> {
        self.execute(&format!("savepoint {}", name), &[])
    }

    pub fn release_savepoint(&self, name: &str) -> Result<bool> {
        self.execute(&format!("release savepoint {}", name), &[])
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path())
            .field("has_transaction", &self.has_transaction())
            .finish()
    }
}

fn open_flags(location: &str, read_only: bool) -> OpenFlags {
    let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if location.is_empty() {
        flags |= OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_MEMORY;
    } else if read_only {
        flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
    } else {
        flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    }
    if location.contains(':') {
        flags |= OpenFlags::SQLITE_OPEN_URI;
    }
    flags
}

/// Engine failures reported through rusqlite keep their code and message.
fn engine_failure(err: rusqlite::Error, detail: &str) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => Error::engine(
            failure.extended_code,
            message.unwrap_or_else(|| failure.to_string()),
            detail,
        ),
        other => Error::Sqlite(other),
    }
}

fn log_trace(sql: &str) {
    info!(target: "litebind::trace", sql, "SQLITE-TRACE");
}

fn log_profile(sql: &str, elapsed: Duration) {
    info!(
        target: "litebind::profile",
        sql,
        seconds = elapsed.as_secs_f64(),
        "SQLITE-PROFILE"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_open_flags() {
        let memory = open_flags("", true);
        assert!(memory.contains(OpenFlags::SQLITE_OPEN_MEMORY));
        assert!(memory.contains(OpenFlags::SQLITE_OPEN_READ_WRITE));

        let read_only = open_flags("data.db", true);
        assert!(read_only.contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!read_only.contains(OpenFlags::SQLITE_OPEN_CREATE));

        let uri = open_flags("file:data.db?mode=ro", false);
        assert!(uri.contains(OpenFlags::SQLITE_OPEN_URI));
        assert!(uri.contains(OpenFlags::SQLITE_OPEN_CREATE));
    }

    #[test]
    fn test_open_in_memory_has_no_path() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(conn.path(), None);
        assert!(!conn.has_transaction());
        assert!(!conn.has_statements());
    }

    #[test]
    fn test_execute_insert_update_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(conn.execute("create table t ( id integer primary key, name text )", params![]).unwrap());
        assert_eq!(conn.insert("insert into t ( name ) values ( ? )", params!["a"]).unwrap(), 1);
        assert_eq!(conn.insert("insert into t ( name ) values ( ? )", params!["b"]).unwrap(), 2);
        assert_eq!(conn.last_insert_id(), 2);
        assert_eq!(conn.update("update t set name = upper(name)", params![]).unwrap(), 2);
        assert_eq!(conn.changes(), 2);
        assert!(conn.total_changes() >= 4);

        let names = conn
            .select("select name from t order by id", params![], |row| row.as_text(0))
            .unwrap();
        assert_eq!(names, vec![Some("A".to_string()), Some("B".to_string())]);

        let odd = conn
            .filter_select("select id from t", params![], |row| {
                let id = row.as_long(0);
                (id % 2 == 1).then_some(id)
            })
            .unwrap();
        assert_eq!(odd, vec![1]);
    }

    #[test]
    fn test_execute_reports_rows() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!conn.execute("select 1", params![]).unwrap());
    }

    #[test]
    fn test_prepare_bound_is_strict() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.prepare_bound("select ?, ?", params![1]).unwrap_err();
        assert!(matches!(err, Error::BindMismatch { .. }));
    }

    #[test]
    fn test_prepare_error_carries_sql() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.prepare("select * from missing").unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_ERROR));
        assert!(err.to_string().contains("no such table: missing"));
        assert_eq!(err.context(), Some("select * from missing"));
        assert_eq!(conn.error_code(), ffi::SQLITE_ERROR);

        let err = conn.prepare("   ").unwrap_err();
        assert!(matches!(err, Error::Misuse { .. }));
    }

    #[test]
    fn test_error_description_falls_back_to_generic_text() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(conn.error_description(ffi::SQLITE_BUSY), "database is locked");
    }

    #[test]
    fn test_transactions_and_savepoints() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("create table t ( a integer )").unwrap();
        conn.begin(TransactionKind::Immediate).unwrap();
        assert!(conn.has_transaction());
        conn.execute("insert into t values ( 1 )", params![]).unwrap();
        conn.savepoint("inner").unwrap();
        conn.execute("insert into t values ( 2 )", params![]).unwrap();
        conn.rollback(Some("inner")).unwrap();
        conn.release_savepoint("inner").unwrap();
        conn.commit().unwrap();
        assert!(!conn.has_transaction());

        let mut stmt = conn.prepare("select count(*) from t").unwrap();
        assert_eq!(stmt.collect_column::<i64>().unwrap(), vec![1]);

        conn.begin(TransactionKind::Default).unwrap();
        conn.execute("delete from t", params![]).unwrap();
        conn.rollback(None).unwrap();
        let mut stmt = conn.prepare("select count(*) from t").unwrap();
        assert_eq!(stmt.collect_column::<i64>().unwrap(), vec![1]);
    }

    #[test]
    fn test_gather_column_major() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("create table t ( a integer, b text ); insert into t values ( 1, 'x' ), ( 2, 'y' );")
            .unwrap();
        let gathered = conn.gather("select a, b from t order by a", params![]).unwrap();
        assert_eq!(gathered.names, vec!["a", "b"]);
        assert_eq!(gathered.row_count(), 2);
        assert_eq!(gathered.column("a").unwrap()[1], crate::Value::Long(2));

        let mut columns = Vec::new();
        conn.gather_into("select a from t where a > ?", params![1], &mut columns, &[])
            .unwrap();
        assert_eq!(columns, vec![Column::Long(vec![Some(2)])]);
    }

    #[test]
    fn test_abort_interrupts_next_step() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("with recursive n(i) as ( select 1 union all select i + 1 from n ) select i from n")
            .unwrap();
        assert!(stmt.step().unwrap().is_row());
        conn.abort();
        let err = loop {
            match stmt.step() {
                Ok(_) => continue,
                Err(err) => break err,
            }
        };
        assert!(err.is_interrupt());
    }

    #[test]
    fn test_limits_and_options() {
        let conn = Connection::open_in_memory().unwrap();
        let previous = conn.limit(Limit::VariableNumber, 10);
        assert!(previous > 10);
        assert_eq!(conn.limit(Limit::VariableNumber, -1), 10);
        conn.set_busy_timeout(250).unwrap();
        conn.release_memory().unwrap();
    }

    #[test]
    fn test_tracing_toggles() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.trace_execution(true);
        conn.profile_execution(true);
        conn.execute("select 1", params![]).unwrap();
        conn.trace_execution(false);
        conn.profile_execution(false);
    }
}
