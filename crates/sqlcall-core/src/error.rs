//! Error types for connection and statement operations.

use crate::diag::DiagnosticRecord;
use crate::driver::SqlReturn;
use std::fmt;

/// The primary error type for all sqlcall operations.
#[derive(Debug)]
pub enum Error {
    /// Environment/connection allocation and connect failures
    Connection(ConnectionError),
    /// Statement allocation, prepare, bind, execute, fetch and column access failures
    Query(QueryError),
    /// An operation was called in the wrong state (no driver call was made)
    State(StateError),
    /// Invalid connection configuration
    Config(ConfigError),
}

/// The call-level function that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AllocateEnvironment,
    SetEnvironmentAttribute,
    AllocateConnection,
    Connect,
    Disconnect,
    AllocateStatement,
    Prepare,
    NumResultColumns,
    BindParameter,
    Execute,
    Fetch,
    GetData,
    DescribeColumn,
    CloseCursor,
    FreeHandle,
}

impl Operation {
    /// The driver-manager function behind this operation.
    pub const fn function_name(self) -> &'static str {
        match self {
            Operation::AllocateEnvironment
            | Operation::AllocateConnection
            | Operation::AllocateStatement => "SQLAllocHandle",
            Operation::SetEnvironmentAttribute => "SQLSetEnvAttr",
            Operation::Connect => "SQLDriverConnect",
            Operation::Disconnect => "SQLDisconnect",
            Operation::Prepare => "SQLPrepare",
            Operation::NumResultColumns => "SQLNumResultCols",
            Operation::BindParameter => "SQLBindParameter",
            Operation::Execute => "SQLExecute",
            Operation::Fetch => "SQLFetch",
            Operation::GetData => "SQLGetData",
            Operation::DescribeColumn => "SQLDescribeCol",
            Operation::CloseCursor => "SQLFreeStmt",
            Operation::FreeHandle => "SQLFreeHandle",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub operation: Operation,
    pub sqlstate: Option<String>,
    pub message: String,
    pub diagnostics: Vec<DiagnosticRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Environment or connection handle could not be allocated/configured
    Allocate,
    /// Credentials rejected (SQLSTATE class 28)
    Authentication,
    /// Server unreachable (SQLSTATE 08001)
    Refused,
    /// Any other connect failure
    Connect,
}

impl ConnectionErrorKind {
    fn classify(operation: Operation, sqlstate: Option<&str>) -> Self {
        match operation {
            Operation::AllocateEnvironment
            | Operation::SetEnvironmentAttribute
            | Operation::AllocateConnection => return ConnectionErrorKind::Allocate,
            _ => {}
        }
        match sqlstate {
            Some(s) if s.starts_with("28") => ConnectionErrorKind::Authentication,
            Some("08001") => ConnectionErrorKind::Refused,
            _ => ConnectionErrorKind::Connect,
        }
    }
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub operation: Operation,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub diagnostics: Vec<DiagnosticRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error or access rule violation (SQLSTATE class 42)
    Syntax,
    /// Integrity constraint violation (class 23)
    Constraint,
    /// Table or column not found (42S02, 42S22)
    NotFound,
    /// Permission denied (42501)
    Permission,
    /// Data too large for the target (22001)
    DataTruncation,
    /// Serialization failure or deadlock victim, retry may succeed (40001)
    Serialization,
    /// Timeout expired (HYT00, HYT01)
    Timeout,
    /// Other database error
    Database,
}

impl QueryErrorKind {
    /// Classify an error by its SQLSTATE.
    pub fn from_sqlstate(sqlstate: Option<&str>) -> Self {
        let Some(state) = sqlstate else {
            return QueryErrorKind::Database;
        };
        match state {
            "42S02" | "42S22" | "42S12" => QueryErrorKind::NotFound,
            "42501" => QueryErrorKind::Permission,
            "40001" => QueryErrorKind::Serialization,
            "HYT00" | "HYT01" => QueryErrorKind::Timeout,
            "22001" => QueryErrorKind::DataTruncation,
            s if s.starts_with("23") => QueryErrorKind::Constraint,
            s if s.starts_with("42") || s == "37000" => QueryErrorKind::Syntax,
            _ => QueryErrorKind::Database,
        }
    }
}

#[derive(Debug)]
pub struct StateError {
    pub kind: StateErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// `open` on a connection that is already open
    AlreadyOpen,
    /// Statement handle was never allocated
    NotAllocated,
    /// Row access before a successful execute
    NotExecuted,
}

impl StateErrorKind {
    pub const fn message(self) -> &'static str {
        match self {
            StateErrorKind::AlreadyOpen => "There is already an open connection",
            StateErrorKind::NotAllocated => "Statement handle not allocated",
            StateErrorKind::NotExecuted => "Query not executed",
        }
    }
}

impl StateError {
    pub fn new(kind: StateErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    /// The offending configuration field, if any
    pub field: Option<&'static str>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Message for a failed call: the first diagnostic, or the bare return code.
fn failure_message(operation: Operation, ret: SqlReturn, diagnostics: &[DiagnosticRecord]) -> String {
    if ret == SqlReturn::INVALID_HANDLE {
        return format!("{} failed: Invalid handle", operation);
    }
    match diagnostics.first() {
        Some(record) => record.message.clone(),
        None => format!("{} returned {}", operation, ret),
    }
}

impl ConnectionError {
    /// Build from the diagnostics gathered for a failed call.
    pub fn from_diagnostics(
        operation: Operation,
        ret: SqlReturn,
        diagnostics: Vec<DiagnosticRecord>,
    ) -> Self {
        let sqlstate = diagnostics.first().map(|r| r.state.clone());
        Self {
            kind: ConnectionErrorKind::classify(operation, sqlstate.as_deref()),
            operation,
            message: failure_message(operation, ret, &diagnostics),
            sqlstate,
            diagnostics,
        }
    }
}

impl QueryError {
    /// Build from the diagnostics gathered for a failed call.
    pub fn from_diagnostics(
        operation: Operation,
        sql: Option<String>,
        ret: SqlReturn,
        diagnostics: Vec<DiagnosticRecord>,
    ) -> Self {
        let sqlstate = diagnostics.first().map(|r| r.state.clone());
        Self {
            kind: QueryErrorKind::from_sqlstate(sqlstate.as_deref()),
            operation,
            sql,
            message: failure_message(operation, ret, &diagnostics),
            sqlstate,
            diagnostics,
        }
    }
}

impl ConfigError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field),
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Get SQLSTATE if available (e.g., "42S02" for a missing table)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Connection(c) => c.sqlstate.as_deref(),
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Every diagnostic record the driver reported for the failed call.
    pub fn diagnostics(&self) -> &[DiagnosticRecord] {
        match self {
            Error::Connection(c) => &c.diagnostics,
            Error::Query(q) => &q.diagnostics,
            _ => &[],
        }
    }

    /// The failed call-level operation, for driver-originated errors.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::Connection(c) => Some(c.operation),
            Error::Query(q) => Some(q.operation),
            _ => None,
        }
    }

    /// Was this a precondition failure rather than a driver failure?
    pub fn is_state_error(&self) -> bool {
        matches!(self, Error::State(_))
    }

    /// Is this an error establishing the connection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::State(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<StateErrorKind> for Error {
    fn from(kind: StateErrorKind) -> Self {
        Error::State(StateError::new(kind))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlcall operations.
pub type Result<T> = std::result::Result<T, Error>;
