//! Prepared statement and cursor handle.
//!
//! A [`Statement`] walks through `prepare -> bind -> exec -> next/value ->
//! reset` and can repeat the bind/exec part any number of times:
//!
//! ```text
//! Unprepared --prepare--> Prepared --exec--> Executed --reset--> Prepared
//! ```
//!
//! Row access (`next`, `value`) is only valid in `Executed`. Every operation
//! on a statement whose handle could not be allocated fails with a state
//! error instead of reaching the driver.

use crate::connection::Connection;
use sqlcall_core::diag::{gather_diagnostics, text_from_buffer};
use sqlcall_core::{
    Driver, Error, HandleType, NO_TOTAL, NULL_DATA, Operation, QueryError, RawHandle, Result,
    SqlReturn, StateErrorKind,
};
use std::collections::BTreeMap;

/// Initial buffer for column values; larger values are read in further chunks.
const VALUE_BUFFER_LEN: usize = 256;

/// Initial buffer for column names; longer names are re-read with an exact buffer.
const NAME_BUFFER_LEN: usize = 256;

/// Outcome of advancing the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// The cursor is positioned on a new row
    Row,
    /// No more rows
    Done,
}

impl Fetch {
    pub fn is_row(self) -> bool {
        self == Fetch::Row
    }
}

/// A text parameter buffer owned by the statement.
///
/// The driver holds raw pointers into both boxes from bind until the
/// parameter is rebound or the statement handle is freed.
struct BoundText {
    value: Box<[u8]>,
    indicator: Box<isize>,
}

/// A statement allocated on a [`Connection`].
pub struct Statement<'conn, D: Driver> {
    connection: &'conn Connection<D>,
    handle: RawHandle,
    allocation_error: Option<Error>,
    executed: bool,
    num_columns: usize,
    sql: Option<String>,
    parameters: BTreeMap<u16, BoundText>,
}

impl<'conn, D: Driver> Statement<'conn, D> {
    /// Allocate a statement handle on `connection`.
    ///
    /// Allocation failure does not fail construction: the statement is left
    /// inert and every operation reports `NotAllocated`. The cause is kept in
    /// [`Statement::allocation_error`].
    pub fn new(connection: &'conn Connection<D>) -> Self {
        let dbc = connection.raw_handle();
        let mut handle = RawHandle::NULL;

        let rc = if dbc.is_null() {
            SqlReturn::INVALID_HANDLE
        } else {
            // SAFETY: dbc is the connection's live handle and stays live for 'conn.
            unsafe {
                connection
                    .driver()
                    .allocate_handle(HandleType::Statement, dbc, &mut handle)
            }
        };

        let allocation_error = if rc.succeeded() {
            tracing::debug!(?handle, "Statement handle allocated");
            None
        } else {
            // SAFETY: dbc is null or live.
            let diagnostics = unsafe {
                gather_diagnostics(
                    connection.driver(),
                    HandleType::Connection,
                    dbc,
                    Operation::AllocateStatement,
                    rc,
                )
            };
            handle = RawHandle::NULL;
            Some(
                QueryError::from_diagnostics(Operation::AllocateStatement, None, rc, diagnostics)
                    .into(),
            )
        };

        Self {
            connection,
            handle,
            allocation_error,
            executed: false,
            num_columns: 0,
            sql: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Was the statement handle allocated?
    pub fn is_allocated(&self) -> bool {
        !self.handle.is_null()
    }

    /// Why the statement handle could not be allocated, if it wasn't.
    pub fn allocation_error(&self) -> Option<&Error> {
        self.allocation_error.as_ref()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// SQL text of the last successful prepare.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    /// Number of result columns of the prepared statement (0 for non-queries).
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Prepare `sql` for execution, caching its result column count.
    ///
    /// Any open cursor is closed first. On failure the statement counts as
    /// unprepared.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        let handle = self.live_handle()?;
        if self.executed {
            self.reset();
        }
        self.sql = None;
        self.num_columns = 0;
        self.executed = false;

        // SAFETY: handle is live for as long as self.
        let rc = unsafe { self.driver().prepare(handle, sql) };
        if !rc.succeeded() {
            return Err(self.query_error(Operation::Prepare, Some(sql), rc));
        }

        let mut count: i16 = 0;
        // SAFETY: handle is live and prepared.
        let rc = unsafe { self.driver().num_result_cols(handle, &mut count) };
        if !rc.succeeded() {
            return Err(self.query_error(Operation::NumResultColumns, Some(sql), rc));
        }

        self.num_columns = usize::try_from(count).unwrap_or(0);
        self.sql = Some(sql.to_string());
        tracing::debug!(columns = self.num_columns, "Statement prepared");
        Ok(())
    }

    /// Bind `value` as text to the 1-based parameter position `index`.
    ///
    /// The position is passed to the driver as is. The statement keeps its
    /// own copy of the value alive for every later `exec()`.
    pub fn bind_parameter(&mut self, index: u16, value: &str) -> Result<()> {
        let handle = self.live_handle()?;
        let mut bound = BoundText {
            value: value.as_bytes().into(),
            indicator: Box::new(value.len() as isize),
        };

        // SAFETY: both boxes are stored in self.parameters on success and are
        // not dropped before the parameter is rebound or the handle is freed.
        let rc = unsafe {
            self.driver().bind_text_parameter(
                handle,
                index,
                bound.value.as_ptr(),
                bound.value.len(),
                &raw mut *bound.indicator,
            )
        };
        if !rc.succeeded() {
            return Err(self.query_error(Operation::BindParameter, None, rc));
        }

        // The driver now points at the new buffers; the old ones can go.
        self.parameters.insert(index, bound);
        Ok(())
    }

    /// Bind `values` to parameter positions 1..=n.
    pub fn bind_parameters<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            let index = u16::try_from(i + 1).unwrap_or(u16::MAX);
            self.bind_parameter(index, value.as_ref())?;
        }
        Ok(())
    }

    /// Execute the prepared statement with the current bindings.
    #[tracing::instrument(level = "debug", skip(self), fields(sql = self.sql.as_deref().unwrap_or("")))]
    pub fn exec(&mut self) -> Result<()> {
        let handle = self.live_handle()?;

        // SAFETY: handle is live; every bound buffer is owned by self.parameters.
        let rc = unsafe { self.driver().execute(handle) };
        // NO_DATA: a searched UPDATE/DELETE that touched no rows.
        if !rc.succeeded() && rc != SqlReturn::NO_DATA {
            return Err(self.query_error(Operation::Execute, None, rc));
        }

        self.executed = true;
        Ok(())
    }

    /// Advance the cursor by one row.
    ///
    /// Returns `Fetch::Done` at the end of the result set; a failing fetch
    /// is an error, never `Done`.
    pub fn next(&mut self) -> Result<Fetch> {
        let handle = self.live_handle()?;
        if !self.executed {
            tracing::warn!("Query not executed");
            return Err(StateErrorKind::NotExecuted.into());
        }

        // SAFETY: handle is live.
        let rc = unsafe { self.driver().fetch(handle) };
        if rc == SqlReturn::NO_DATA {
            tracing::trace!("End of result set");
            return Ok(Fetch::Done);
        }
        if !rc.succeeded() {
            return Err(self.query_error(Operation::Fetch, None, rc));
        }
        tracing::trace!("Fetched row");
        Ok(Fetch::Row)
    }

    /// Text of the 0-based `column` in the current row. NULL reads as `""`.
    pub fn value(&mut self, column: usize) -> Result<String> {
        Ok(self.value_opt(column)?.unwrap_or_default())
    }

    /// Text of the 0-based `column` in the current row, `None` for NULL.
    pub fn value_opt(&mut self, column: usize) -> Result<Option<String>> {
        let handle = self.live_handle()?;
        if !self.executed {
            tracing::warn!("Query not executed");
            return Err(StateErrorKind::NotExecuted.into());
        }
        let column_number = driver_column(column);

        let mut chunk = vec![0u8; VALUE_BUFFER_LEN];
        let mut text = Vec::new();
        let mut first = true;

        loop {
            let mut indicator: isize = 0;
            // SAFETY: handle is live; chunk and indicator outlive the call.
            let rc = unsafe {
                self.driver()
                    .get_text_data(handle, column_number, &mut chunk, &mut indicator)
            };
            if rc == SqlReturn::NO_DATA && !first {
                break;
            }
            if !rc.succeeded() {
                return Err(self.query_error(Operation::GetData, None, rc));
            }
            first = false;

            if indicator == NULL_DATA {
                return Ok(None);
            }

            // One byte of every chunk is the terminator.
            let capacity = chunk.len() - 1;
            let remaining = usize::try_from(indicator).ok();
            let truncated = rc == SqlReturn::SUCCESS_WITH_INFO
                && (indicator == NO_TOTAL || remaining.is_some_and(|len| len > capacity));
            if truncated {
                text.extend_from_slice(&chunk[..capacity]);
                let needed = match remaining {
                    Some(len) => len - capacity + 1,
                    None => chunk.len() * 2,
                };
                if needed > chunk.len() {
                    chunk.resize(needed, 0);
                }
                continue;
            }

            let len = remaining.unwrap_or(0).min(capacity);
            text.extend_from_slice(&chunk[..len]);
            break;
        }

        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }

    /// Declared name of the 0-based `column`. Valid once prepared.
    pub fn column_name(&self, column: usize) -> Result<String> {
        let handle = self.live_handle()?;
        let column_number = driver_column(column);
        let mut buffer = vec![0u8; NAME_BUFFER_LEN];

        loop {
            let mut name_length: i16 = 0;
            // SAFETY: handle is live; buffer and name_length outlive the call.
            let rc = unsafe {
                self.driver()
                    .describe_column_name(handle, column_number, &mut buffer, &mut name_length)
            };
            if !rc.succeeded() {
                tracing::warn!(column, "Error obtaining column name");
                return Err(self.query_error(Operation::DescribeColumn, None, rc));
            }

            let len = usize::try_from(name_length).unwrap_or(0);
            if len >= buffer.len() {
                buffer.resize(len + 1, 0);
                continue;
            }
            return Ok(text_from_buffer(&buffer, len));
        }
    }

    /// Names of all result columns.
    pub fn column_names(&self) -> Result<Vec<String>> {
        (0..self.num_columns)
            .map(|column| self.column_name(column))
            .collect()
    }

    /// Every column value of the current row, in order.
    pub fn row_values(&mut self) -> Result<Vec<String>> {
        (0..self.num_columns)
            .map(|column| self.value(column))
            .collect()
    }

    /// Close the cursor so the statement can be executed again.
    ///
    /// The prepared text and parameter bindings stay in place.
    pub fn reset(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: handle is live.
            let rc = unsafe { self.driver().close_cursor(self.handle) };
            if rc.succeeded() {
                tracing::debug!("Cursor closed");
            } else {
                // Logged only; the executed flag is cleared regardless.
                // SAFETY: handle is live.
                unsafe {
                    gather_diagnostics(
                        self.driver(),
                        HandleType::Statement,
                        self.handle,
                        Operation::CloseCursor,
                        rc,
                    );
                }
            }
        }
        self.executed = false;
    }

    fn driver(&self) -> &'conn D {
        self.connection.driver()
    }

    fn live_handle(&self) -> Result<RawHandle> {
        if self.handle.is_null() {
            tracing::warn!("Statement handle not allocated");
            return Err(StateErrorKind::NotAllocated.into());
        }
        Ok(self.handle)
    }

    fn query_error(&self, operation: Operation, sql: Option<&str>, rc: SqlReturn) -> Error {
        // SAFETY: self.handle is live whenever a driver call was made.
        let diagnostics = unsafe {
            gather_diagnostics(self.driver(), HandleType::Statement, self.handle, operation, rc)
        };
        let sql = sql.or(self.sql.as_deref()).map(str::to_string);
        QueryError::from_diagnostics(operation, sql, rc, diagnostics).into()
    }
}

impl<D: Driver> Drop for Statement<'_, D> {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // SAFETY: handle is live and nulled right after; bound buffers are
            // dropped only after this body runs.
            let rc = unsafe { self.driver().free_handle(HandleType::Statement, self.handle) };
            if !rc.succeeded() {
                tracing::warn!(ret = %rc, "Failed to free statement handle");
            }
            self.handle = RawHandle::NULL;
        }
    }
}

impl<D: Driver> std::fmt::Debug for Statement<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("handle", &self.handle)
            .field("executed", &self.executed)
            .field("num_columns", &self.num_columns)
            .field("sql", &self.sql)
            .field("parameters", &self.parameters.len())
            .finish_non_exhaustive()
    }
}

/// 0-based API column to the driver's 1-based column number.
fn driver_column(column: usize) -> u16 {
    u16::try_from(column.saturating_add(1)).unwrap_or(u16::MAX)
}
