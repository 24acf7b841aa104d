//! Scripted in-memory driver for exercising connections and statements
//! without a driver manager.
//!
//! It behaves like a strict ODBC driver where it matters to the handles:
//! handles are numbered and tracked (so leaks and double frees show up),
//! parent/child ordering is enforced on free, cursor state is enforced on
//! prepare/execute/fetch, and bound parameter buffers are read through
//! their raw pointers only when the statement executes.
//!
//! The "database" is a single table `t(name)` understood through a handful
//! of statement shapes:
//!
//! - `INSERT INTO t(name) VALUES (?)`
//! - `SELECT <cols> FROM t [WHERE name = ?]` (`name` yields the row value,
//!   any other column yields NULL)
//! - `DELETE FROM t WHERE id=?` (no result set, touches nothing)
//!
//! Anything else fails to prepare with SQLSTATE 42000.

#![allow(dead_code)]
#![allow(unsafe_code)]

use sqlcall::{Connection, Driver, HandleType, RawHandle, SqlReturn};
use sqlcall_core::{ConnectionConfig, DriverCompletion, NO_TOTAL, NULL_DATA};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ptr;
use std::rc::Rc;

#[derive(Debug, Clone)]
struct Diag {
    state: String,
    native: i32,
    message: String,
}

struct Param {
    value: *const u8,
    length: usize,
    indicator: *mut isize,
}

enum Shape {
    Insert,
    Select { columns: Vec<String>, filtered: bool },
    Delete,
}

struct Cursor {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    position: Option<usize>,
    /// Bytes already handed out per column of the current row.
    read: HashMap<u16, usize>,
}

#[derive(Default)]
struct StmtState {
    shape: Option<Shape>,
    placeholders: u16,
    params: BTreeMap<u16, Param>,
    cursor: Option<Cursor>,
}

struct HandleState {
    kind: HandleType,
    parent: usize,
}

#[derive(Default)]
struct State {
    next_id: usize,
    handles: BTreeMap<usize, HandleState>,
    versions: HashMap<usize, i32>,
    connected: HashMap<usize, String>,
    statements: HashMap<usize, StmtState>,
    diags: HashMap<usize, Vec<Diag>>,
    calls: Vec<String>,
    /// Pending failures: calls to let through first, then the diagnostic.
    failures: HashMap<String, (usize, Diag)>,
    required_password: Option<String>,
    table: Vec<Option<String>>,
    freed: usize,
    /// Report `SQL_NO_TOTAL` instead of the length on the next truncated read.
    hide_next_total: bool,
}

/// Cloneable handle to one shared fake driver; clones see the same state.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Rc<RefCell<State>>,
}

pub const PASSWORD: &str = "s3cret";

/// Route driver logs to the test harness; `RUST_LOG=sqlcall=trace` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new("db.internal", "inventory", "app", PASSWORD)
}

/// A driver that accepts [`PASSWORD`] and a connection already opened on it.
pub fn open_connection() -> (ScriptedDriver, Connection<ScriptedDriver>) {
    init_tracing();
    let driver = ScriptedDriver::new();
    driver.require_password(PASSWORD);
    let mut conn = Connection::with_config(driver.clone(), test_config());
    conn.open().expect("open scripted connection");
    (driver, conn)
}

fn id(handle: RawHandle) -> usize {
    handle.as_ptr().addr()
}

fn diag(state: &str, message: &str) -> Diag {
    Diag {
        state: state.to_string(),
        native: 0,
        message: message.to_string(),
    }
}

/// Copy `text` into an ODBC output buffer, NUL-terminated and truncated to fit.
fn write_text(buffer: &mut [u8], text: &[u8]) -> bool {
    if buffer.is_empty() {
        return !text.is_empty();
    }
    let n = text.len().min(buffer.len() - 1);
    buffer[..n].copy_from_slice(&text[..n]);
    buffer[n] = 0;
    n < text.len()
}

fn parse(sql: &str) -> Option<Shape> {
    let compact = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact == "INSERT INTO t(name) VALUES (?)" {
        return Some(Shape::Insert);
    }
    if compact == "DELETE FROM t WHERE id=?" {
        return Some(Shape::Delete);
    }
    let rest = compact.strip_prefix("SELECT ")?;
    let (columns, tail) = rest.split_once(" FROM t")?;
    let filtered = match tail {
        "" => false,
        " WHERE name = ?" => true,
        _ => return None,
    };
    let columns = columns
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>();
    if columns.is_empty() {
        return None;
    }
    Some(Shape::Select { columns, filtered })
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject connects whose `PWD` differs from `password`.
    pub fn require_password(&self, password: &str) {
        self.state.borrow_mut().required_password = Some(password.to_string());
    }

    /// Make the next call to `function` (e.g. "SQLFetch") fail with `state`.
    pub fn fail_next(&self, function: &str, state: &str, message: &str) {
        self.fail_after(function, 0, state, message);
    }

    /// Let `skip` calls to `function` succeed, then fail the one after.
    pub fn fail_after(&self, function: &str, skip: usize, state: &str, message: &str) {
        self.state
            .borrow_mut()
            .failures
            .insert(function.to_string(), (skip, diag(state, message)));
    }

    /// The next truncated `SQLGetData` reports `SQL_NO_TOTAL` as its length,
    /// like drivers streaming long data of unknown size.
    pub fn hide_next_total(&self) {
        self.state.borrow_mut().hide_next_total = true;
    }

    /// Add a row directly, bypassing SQL (the only way to store a NULL).
    pub fn seed_row(&self, name: Option<&str>) {
        self.state.borrow_mut().table.push(name.map(str::to_string));
    }

    pub fn rows(&self) -> Vec<Option<String>> {
        self.state.borrow().table.clone()
    }

    pub fn live_handles(&self) -> usize {
        self.state.borrow().handles.len()
    }

    pub fn live_handles_of(&self, kind: HandleType) -> usize {
        self.state
            .borrow()
            .handles
            .values()
            .filter(|h| h.kind == kind)
            .count()
    }

    pub fn freed_handles(&self) -> usize {
        self.state.borrow().freed
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn call_count(&self, function: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.as_str() == function)
            .count()
    }

    pub fn last_connection_string(&self) -> Option<String> {
        self.state.borrow().connected.values().next().cloned()
    }

    /// Record the call, clear the handle's diagnostics, and consume an
    /// injected failure for it if one is pending.
    fn enter(&self, function: &str, handle: usize) -> Option<SqlReturn> {
        let mut state = self.state.borrow_mut();
        state.calls.push(function.to_string());
        state.diags.remove(&handle);
        let due = state.failures.get_mut(function).is_some_and(|(skip, _)| {
            let due = *skip == 0;
            *skip = skip.saturating_sub(1);
            due
        });
        if !due {
            return None;
        }
        let (_, failure) = state.failures.remove(function)?;
        state.diags.insert(handle, vec![failure]);
        Some(SqlReturn::ERROR)
    }

    fn error(&self, handle: usize, state: &str, message: &str) -> SqlReturn {
        self.state
            .borrow_mut()
            .diags
            .entry(handle)
            .or_default()
            .push(diag(state, message));
        SqlReturn::ERROR
    }

    fn is_live(&self, handle: usize, kind: HandleType) -> bool {
        self.state
            .borrow()
            .handles
            .get(&handle)
            .is_some_and(|h| h.kind == kind)
    }
}

impl Driver for ScriptedDriver {
    unsafe fn allocate_handle(
        &self,
        handle_type: HandleType,
        parent: RawHandle,
        output: &mut RawHandle,
    ) -> SqlReturn {
        *output = RawHandle::NULL;
        let parent = id(parent);
        if let Some(rc) = self.enter("SQLAllocHandle", parent) {
            return rc;
        }

        match handle_type {
            HandleType::Environment => {
                if parent != 0 {
                    return SqlReturn::INVALID_HANDLE;
                }
            }
            HandleType::Connection => {
                if !self.is_live(parent, HandleType::Environment) {
                    return SqlReturn::INVALID_HANDLE;
                }
                if !self.state.borrow().versions.contains_key(&parent) {
                    return self.error(parent, "HY010", "Function sequence error");
                }
            }
            HandleType::Statement => {
                if !self.is_live(parent, HandleType::Connection) {
                    return SqlReturn::INVALID_HANDLE;
                }
                if !self.state.borrow().connected.contains_key(&parent) {
                    return self.error(parent, "08003", "Connection not open");
                }
            }
        }

        let mut state = self.state.borrow_mut();
        state.next_id += 8;
        let new_id = state.next_id;
        state.handles.insert(
            new_id,
            HandleState {
                kind: handle_type,
                parent,
            },
        );
        if handle_type == HandleType::Statement {
            state.statements.insert(new_id, StmtState::default());
        }
        *output = RawHandle::from_ptr(ptr::without_provenance_mut(new_id));
        SqlReturn::SUCCESS
    }

    unsafe fn free_handle(&self, handle_type: HandleType, handle: RawHandle) -> SqlReturn {
        let handle = id(handle);
        if let Some(rc) = self.enter("SQLFreeHandle", handle) {
            return rc;
        }
        if !self.is_live(handle, handle_type) {
            return SqlReturn::INVALID_HANDLE;
        }
        let has_children = self
            .state
            .borrow()
            .handles
            .values()
            .any(|h| h.parent == handle);
        if has_children || self.state.borrow().connected.contains_key(&handle) {
            return self.error(handle, "HY010", "Function sequence error");
        }

        let mut state = self.state.borrow_mut();
        state.handles.remove(&handle);
        state.statements.remove(&handle);
        state.versions.remove(&handle);
        state.diags.remove(&handle);
        state.freed += 1;
        SqlReturn::SUCCESS
    }

    unsafe fn set_odbc_version(&self, environment: RawHandle, version: i32) -> SqlReturn {
        let environment = id(environment);
        if let Some(rc) = self.enter("SQLSetEnvAttr", environment) {
            return rc;
        }
        if !self.is_live(environment, HandleType::Environment) {
            return SqlReturn::INVALID_HANDLE;
        }
        self.state.borrow_mut().versions.insert(environment, version);
        SqlReturn::SUCCESS
    }

    unsafe fn driver_connect(
        &self,
        connection: RawHandle,
        connection_string: &str,
        completion: DriverCompletion,
    ) -> SqlReturn {
        let connection = id(connection);
        if let Some(rc) = self.enter("SQLDriverConnect", connection) {
            return rc;
        }
        if !self.is_live(connection, HandleType::Connection) {
            return SqlReturn::INVALID_HANDLE;
        }
        if completion != DriverCompletion::Complete {
            return self.error(connection, "HY110", "Invalid driver completion");
        }
        if self.state.borrow().connected.contains_key(&connection) {
            return self.error(connection, "08002", "Connection name in use");
        }

        let attributes: HashMap<String, String> = connection_string
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_ascii_uppercase(), v.to_string()))
            .collect();
        if attributes.get("SERVER").is_none_or(|s| s.is_empty()) {
            return self.error(
                connection,
                "08001",
                "Client unable to establish connection",
            );
        }
        let required = self.state.borrow().required_password.clone();
        if let Some(required) = required {
            if attributes.get("PWD") != Some(&required) {
                let user = attributes.get("UID").cloned().unwrap_or_default();
                return self.error(
                    connection,
                    "28000",
                    &format!("Login failed for user '{}'.", user),
                );
            }
        }

        self.state
            .borrow_mut()
            .connected
            .insert(connection, connection_string.to_string());
        SqlReturn::SUCCESS
    }

    unsafe fn disconnect(&self, connection: RawHandle) -> SqlReturn {
        let connection = id(connection);
        if let Some(rc) = self.enter("SQLDisconnect", connection) {
            return rc;
        }
        if !self.is_live(connection, HandleType::Connection) {
            return SqlReturn::INVALID_HANDLE;
        }
        if self.state.borrow_mut().connected.remove(&connection).is_none() {
            return self.error(connection, "08003", "Connection not open");
        }
        SqlReturn::SUCCESS
    }

    unsafe fn prepare(&self, statement: RawHandle, sql: &str) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLPrepare", statement) {
            return rc;
        }
        if !self.is_live(statement, HandleType::Statement) {
            return SqlReturn::INVALID_HANDLE;
        }
        let mut state = self.state.borrow_mut();
        let stmt = state.statements.entry(statement).or_default();
        if stmt.cursor.is_some() {
            drop(state);
            return self.error(statement, "24000", "Invalid cursor state");
        }
        let Some(shape) = parse(sql) else {
            stmt.shape = None;
            drop(state);
            return self.error(
                statement,
                "42000",
                &format!("Syntax error or access violation near '{}'", sql),
            );
        };
        stmt.placeholders = sql.matches('?').count() as u16;
        stmt.shape = Some(shape);
        SqlReturn::SUCCESS
    }

    unsafe fn num_result_cols(&self, statement: RawHandle, count: &mut i16) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLNumResultCols", statement) {
            return rc;
        }
        let state = self.state.borrow();
        let Some(stmt) = state.statements.get(&statement) else {
            return SqlReturn::INVALID_HANDLE;
        };
        *count = match &stmt.shape {
            Some(Shape::Select { columns, .. }) => columns.len() as i16,
            Some(_) => 0,
            None => {
                drop(state);
                return self.error(statement, "HY010", "Function sequence error");
            }
        };
        SqlReturn::SUCCESS
    }

    unsafe fn bind_text_parameter(
        &self,
        statement: RawHandle,
        parameter_number: u16,
        value: *const u8,
        length: usize,
        indicator: *mut isize,
    ) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLBindParameter", statement) {
            return rc;
        }
        if !self.is_live(statement, HandleType::Statement) {
            return SqlReturn::INVALID_HANDLE;
        }
        let mut state = self.state.borrow_mut();
        let stmt = state.statements.entry(statement).or_default();
        if parameter_number == 0 || parameter_number > stmt.placeholders {
            drop(state);
            return self.error(statement, "07009", "Invalid descriptor index");
        }
        stmt.params.insert(
            parameter_number,
            Param {
                value,
                length,
                indicator,
            },
        );
        SqlReturn::SUCCESS
    }

    unsafe fn execute(&self, statement: RawHandle) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLExecute", statement) {
            return rc;
        }
        if !self.is_live(statement, HandleType::Statement) {
            return SqlReturn::INVALID_HANDLE;
        }

        let mut state = self.state.borrow_mut();
        let State {
            statements, table, ..
        } = &mut *state;
        let stmt = statements.entry(statement).or_default();
        if stmt.cursor.is_some() {
            drop(state);
            return self.error(statement, "24000", "Invalid cursor state");
        }

        let mut values = Vec::new();
        for number in 1..=stmt.placeholders {
            let Some(param) = stmt.params.get(&number) else {
                drop(state);
                return self.error(statement, "07002", "COUNT field incorrect");
            };
            // SAFETY: the bind contract keeps both pointers valid until execute.
            let text = unsafe {
                let len = usize::try_from(*param.indicator).unwrap_or(0);
                assert_eq!(len, param.length, "indicator does not match bound length");
                let bytes = std::slice::from_raw_parts(param.value, len);
                String::from_utf8_lossy(bytes).into_owned()
            };
            values.push(text);
        }

        match &stmt.shape {
            Some(Shape::Insert) => {
                table.push(values.into_iter().next());
                SqlReturn::SUCCESS
            }
            Some(Shape::Delete) => SqlReturn::NO_DATA,
            Some(Shape::Select { columns, filtered }) => {
                let filter = if *filtered { values.first() } else { None };
                let rows = table
                    .iter()
                    .filter(|name| filter.is_none_or(|f| name.as_ref() == Some(f)))
                    .map(|name| {
                        columns
                            .iter()
                            .map(|c| if c == "name" { name.clone() } else { None })
                            .collect()
                    })
                    .collect();
                stmt.cursor = Some(Cursor {
                    columns: columns.clone(),
                    rows,
                    position: None,
                    read: HashMap::new(),
                });
                SqlReturn::SUCCESS
            }
            None => {
                drop(state);
                self.error(statement, "HY010", "Function sequence error")
            }
        }
    }

    unsafe fn fetch(&self, statement: RawHandle) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLFetch", statement) {
            return rc;
        }
        let mut state = self.state.borrow_mut();
        let Some(stmt) = state.statements.get_mut(&statement) else {
            return SqlReturn::INVALID_HANDLE;
        };
        let Some(cursor) = stmt.cursor.as_mut() else {
            drop(state);
            return self.error(statement, "24000", "Invalid cursor state");
        };
        let next = cursor.position.map_or(0, |p| p + 1);
        cursor.read.clear();
        if next >= cursor.rows.len() {
            cursor.position = Some(cursor.rows.len());
            return SqlReturn::NO_DATA;
        }
        cursor.position = Some(next);
        SqlReturn::SUCCESS
    }

    unsafe fn get_text_data(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        indicator: &mut isize,
    ) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLGetData", statement) {
            return rc;
        }
        let mut state = self.state.borrow_mut();
        let Some(stmt) = state.statements.get_mut(&statement) else {
            return SqlReturn::INVALID_HANDLE;
        };
        let Some(cursor) = stmt.cursor.as_mut() else {
            drop(state);
            return self.error(statement, "24000", "Invalid cursor state");
        };
        let Some(row) = cursor.position.and_then(|p| cursor.rows.get(p)) else {
            drop(state);
            return self.error(statement, "24000", "Invalid cursor state");
        };
        let index = usize::from(column_number);
        if index == 0 || index > cursor.columns.len() {
            drop(state);
            return self.error(statement, "07009", "Invalid descriptor index");
        }

        let Some(text) = row[index - 1].clone() else {
            *indicator = NULL_DATA;
            return SqlReturn::SUCCESS;
        };
        let offset = cursor.read.get(&column_number).copied();
        if offset == Some(text.len()) {
            return SqlReturn::NO_DATA;
        }
        let remaining = &text.as_bytes()[offset.unwrap_or(0)..];
        *indicator = remaining.len() as isize;
        let truncated = write_text(buffer, remaining);
        let written = remaining.len().min(buffer.len().saturating_sub(1));
        cursor
            .read
            .insert(column_number, offset.unwrap_or(0) + written);
        if truncated {
            drop(state);
            let mut state = self.state.borrow_mut();
            if std::mem::take(&mut state.hide_next_total) {
                *indicator = NO_TOTAL;
            }
            state
                .diags
                .insert(statement, vec![diag("01004", "String data, right truncated")]);
            return SqlReturn::SUCCESS_WITH_INFO;
        }
        SqlReturn::SUCCESS
    }

    unsafe fn describe_column_name(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        name_length: &mut i16,
    ) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLDescribeCol", statement) {
            return rc;
        }
        let state = self.state.borrow();
        let Some(stmt) = state.statements.get(&statement) else {
            return SqlReturn::INVALID_HANDLE;
        };
        let columns = match &stmt.shape {
            Some(Shape::Select { columns, .. }) => columns.clone(),
            Some(_) => Vec::new(),
            None => {
                drop(state);
                return self.error(statement, "HY010", "Function sequence error");
            }
        };
        drop(state);

        let index = usize::from(column_number);
        if index == 0 || index > columns.len() {
            return self.error(statement, "07009", "Invalid descriptor index");
        }
        let name = columns[index - 1].as_bytes();
        *name_length = name.len() as i16;
        if write_text(buffer, name) {
            return SqlReturn::SUCCESS_WITH_INFO;
        }
        SqlReturn::SUCCESS
    }

    unsafe fn close_cursor(&self, statement: RawHandle) -> SqlReturn {
        let statement = id(statement);
        if let Some(rc) = self.enter("SQLFreeStmt", statement) {
            return rc;
        }
        let mut state = self.state.borrow_mut();
        let Some(stmt) = state.statements.get_mut(&statement) else {
            return SqlReturn::INVALID_HANDLE;
        };
        stmt.cursor = None;
        SqlReturn::SUCCESS
    }

    unsafe fn get_diag_rec(
        &self,
        _handle_type: HandleType,
        handle: RawHandle,
        record_number: i16,
        state: &mut [u8; 6],
        native_error: &mut i32,
        message: &mut [u8],
        text_length: &mut i16,
    ) -> SqlReturn {
        let driver_state = self.state.borrow();
        let Some(records) = driver_state.diags.get(&id(handle)) else {
            return SqlReturn::NO_DATA;
        };
        let Some(record) = usize::try_from(record_number)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| records.get(n))
        else {
            return SqlReturn::NO_DATA;
        };

        write_text(state, record.state.as_bytes());
        *native_error = record.native;
        *text_length = record.message.len() as i16;
        if write_text(message, record.message.as_bytes()) {
            return SqlReturn::SUCCESS_WITH_INFO;
        }
        SqlReturn::SUCCESS
    }
}
