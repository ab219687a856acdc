///
/// Prepared statement lifecycle.
///
/// A `Statement` exclusively owns one compiled program and drives it
/// through `prepare -> bind -> step -> (row | done) -> reset -> finalize`.
///
/// State machine:
/// - Ready: freshly prepared, rewound or reset; parameters may be bound
/// - Row: the last step produced a row, readable through `Row`
/// - Done: the last step completed (or failed); stepping again without
///   `reset`/`rewind` is a misuse
/// - Finalized: the program has been released; every operation except
///   `finalize` is a misuse
///
/// `row_index` counts consumed steps, starting at -1 before the first.
/// Column names are computed once and kept until `reprepare`; `reset`
/// does not invalidate them.
///

use std::cell::OnceCell;
use std::ffi::{CStr, c_int};
use std::ptr;

use rusqlite::ffi;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::decode::Row;
use crate::error::{Error, Result, is_advisory};

/// Outcome of one successful `step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Row,
    Done,
    Notice(String),
    Warning(String),
}

impl Step {
    pub fn is_row(&self) -> bool {
        matches!(self, Step::Row)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Row,
    Done,
    Finalized,
}

pub struct Statement<'conn> {
    pub(crate) raw: *mut ffi::sqlite3_stmt,
    pub(crate) conn: &'conn Connection,
    pub(crate) sql: String,
    pub(crate) status: c_int,
    pub(crate) message: Option<String>,
    row: i64,
    state: State,
    column_names: OnceCell<Vec<String>>,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn prepare(conn: &'conn Connection, sql: &str) -> Result<Self> {
        let raw = conn.prepare_raw(sql)?;
        debug!(sql, "prepared statement");
        Ok(Self {
            raw,
            conn,
            sql: sql.to_string(),
            status: ffi::SQLITE_OK,
            message: None,
            row: -1,
            state: State::Ready,
            column_names: OnceCell::new(),
        })
    }

    /// Replace the compiled program with one compiled from `sql`.
    pub fn reprepare(&mut self, sql: &str) -> Result<()> {
        self.finalize();
        self.raw = self.conn.prepare_raw(sql)?;
        self.sql = sql.to_string();
        self.status = ffi::SQLITE_OK;
        self.message = None;
        self.row = -1;
        self.state = State::Ready;
        self.column_names = OnceCell::new();
        debug!(sql, "re-prepared statement");
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.raw.is_null() {
            return Err(Error::misuse("statement is finalized", &self.sql));
        }
        Ok(())
    }

    /// Advance the program by one step.
    pub fn step(&mut self) -> Result<Step> {
        match self.state {
            State::Finalized => return Err(Error::misuse("statement is finalized", &self.sql)),
            State::Done => {
                return Err(Error::misuse(
                    "statement already completed; reset before stepping again",
                    &self.sql,
                ));
            }
            State::Ready | State::Row => {}
        }

        let code = unsafe { ffi::sqlite3_step(self.raw) };
        self.status = code;

        match code {
            ffi::SQLITE_ROW => {
                self.row += 1;
                self.state = State::Row;
                self.message = None;
                trace!(row = self.row, "step produced row");
                Ok(Step::Row)
            }
            ffi::SQLITE_DONE => {
                self.row += 1;
                self.state = State::Done;
                self.message = None;
                trace!(row = self.row, "step completed");
                Ok(Step::Done)
            }
            _ => {
                let message = self.conn.error_description(code);
                self.message = Some(message.clone());
                if is_advisory(code) {
                    warn!(code, message = %message, sql = %self.sql, "advisory status from step");
                    if code & 0xff == ffi::SQLITE_NOTICE {
                        return Ok(Step::Notice(message));
                    }
                    return Ok(Step::Warning(message));
                }
                self.state = State::Done;
                Err(Error::engine(code, message, &self.sql))
            }
        }
    }

    /// Step and report whether a row is available.
    pub fn advance(&mut self) -> Result<bool> {
        Ok(self.step()?.is_row())
    }

    /// First step of a statement that has not produced a row yet.
    pub fn execute(&mut self) -> Result<Step> {
        if self.row >= 0 {
            return Err(Error::misuse("statement already executed", &self.sql));
        }
        self.step()
    }

    /// Execute once and read back the connection's last inserted row id.
    ///
    /// The id is connection-wide state: it reflects whichever statement on
    /// this connection completed last.
    pub fn execute_insert(&mut self) -> Result<i64> {
        self.execute_to_completion()?;
        Ok(self.conn.last_insert_id())
    }

    /// Execute once and read back the connection's affected-row count.
    pub fn execute_update(&mut self) -> Result<usize> {
        self.execute_to_completion()?;
        Ok(self.conn.changes())
    }

    fn execute_to_completion(&mut self) -> Result<()> {
        match self.execute()? {
            Step::Row => Err(Error::misuse("statement produced a result row", &self.sql)),
            Step::Done | Step::Notice(_) | Step::Warning(_) => Ok(()),
        }
    }

    /// Rewind to before the first row and clear every bound value.
    pub fn reset(&mut self) {
        self.rewind();
        self.clear_bindings();
    }

    /// Rewind to before the first row, keeping bound values.
    pub fn rewind(&mut self) {
        if !self.raw.is_null() {
            self.status = unsafe { ffi::sqlite3_reset(self.raw) };
            self.row = -1;
            self.state = State::Ready;
        }
    }

    pub fn clear_bindings(&mut self) {
        if !self.raw.is_null() {
            self.status = unsafe { ffi::sqlite3_clear_bindings(self.raw) };
        }
    }

    /// Release the compiled program. Calling this again has no effect.
    pub fn finalize(&mut self) {
        if !self.raw.is_null() {
            self.status = unsafe { ffi::sqlite3_finalize(self.raw) };
            self.raw = ptr::null_mut();
            self.state = State::Finalized;
            debug!(sql = %self.sql, "finalized statement");
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.raw.is_null()
    }

    /// Last engine status code seen by this statement.
    pub fn status(&self) -> c_int {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Zero-based index of the last consumed step, -1 before the first.
    pub fn row_index(&self) -> i64 {
        self.row
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn has_row(&self) -> bool {
        self.state == State::Row && unsafe { ffi::sqlite3_data_count(self.raw) } > 0
    }

    pub fn can_advance(&self) -> bool {
        self.state == State::Row || (self.row < 0 && !self.raw.is_null())
    }

    pub fn is_readonly(&self) -> bool {
        !self.raw.is_null() && unsafe { ffi::sqlite3_stmt_readonly(self.raw) } != 0
    }

    pub fn is_busy(&self) -> bool {
        !self.raw.is_null() && unsafe { ffi::sqlite3_stmt_busy(self.raw) } != 0
    }

    // Parameter slots are numbered 1..=parameter_count.

    pub fn parameter_count(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        unsafe { ffi::sqlite3_bind_parameter_count(self.raw) }.max(0) as usize
    }

    /// Declared name of a slot including its marker (`:a`, `$a`, `@a`, `?1`),
    /// or `None` for an anonymous `?` slot.
    pub fn parameter_name(&self, order: usize) -> Option<String> {
        if self.raw.is_null() {
            return None;
        }
        let order = c_int::try_from(order).ok()?;
        let name = unsafe { ffi::sqlite3_bind_parameter_name(self.raw, order) };
        if name.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
        if name.is_empty() {
            None
        } else {
            Some(name.into_owned())
        }
    }

    // Columns are numbered 0..column_count.

    pub fn column_count(&self) -> usize {
        if self.raw.is_null() {
            return 0;
        }
        unsafe { ffi::sqlite3_column_count(self.raw) }.max(0) as usize
    }

    pub fn column_names(&self) -> &[String] {
        self.column_names.get_or_init(|| {
            (0..self.column_count())
                .map(|index| {
                    let name = unsafe { ffi::sqlite3_column_name(self.raw, index as c_int) };
                    if name.is_null() {
                        (index + 1).to_string()
                    } else {
                        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
                    }
                })
                .collect()
        })
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.column_names().get(column).map(String::as_str)
    }

    /// Type name from the schema for a result column, when it has one.
    pub fn declared_type(&self, column: usize) -> Option<String> {
        if self.raw.is_null() {
            return None;
        }
        let column = c_int::try_from(column).ok()?;
        let declared = unsafe { ffi::sqlite3_column_decltype(self.raw, column) };
        if declared.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(declared) }.to_string_lossy().into_owned())
        }
    }

    /// The current row, when the last step produced one.
    pub fn current_row(&self) -> Option<Row<'_>> {
        if self.state == State::Row {
            Some(Row::new(self))
        } else {
            None
        }
    }

    /// Step and return the produced row, or `None` once the results end.
    pub fn next_row(&mut self) -> Result<Option<Row<'_>>> {
        if self.advance()? {
            Ok(Some(Row::new(self)))
        } else {
            Ok(None)
        }
    }

    pub fn for_each_row<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Row<'_>) -> Result<()>,
    {
        while let Some(row) = self.next_row()? {
            f(&row)?;
        }
        Ok(())
    }

    pub fn map_rows<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> T,
    {
        let mut result = Vec::new();
        while let Some(row) = self.next_row()? {
            result.push(f(&row));
        }
        Ok(result)
    }

    pub fn filter_map_rows<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> Option<T>,
    {
        let mut result = Vec::new();
        while let Some(row) = self.next_row()? {
            if let Some(value) = f(&row) {
                result.push(value);
            }
        }
        Ok(result)
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("row", &self.row)
            .field("status", &self.status)
            .finish()
    }
}
