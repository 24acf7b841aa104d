//! Core types for sqlcall.
//!
//! This crate holds everything the connection and statement handles are
//! built from, independent of any particular driver manager:
//!
//! - `Driver` trait: the call-level protocol (allocate handle, connect,
//!   prepare, bind, execute, fetch, get data, describe column, diagnostics)
//! - `DiagnosticRecord` and diagnostic gathering from a failing handle
//! - `Error` taxonomy for allocation, connect, query and state failures
//! - `ConnectionConfig` and connection-string building

// The driver boundary is raw handles and pointers
#![allow(unsafe_code)]

pub mod config;
pub mod diag;
pub mod driver;
pub mod error;

pub use config::{ConnectionConfig, escape_attribute_value};
pub use diag::{DiagnosticRecord, gather_diagnostics};
pub use driver::{
    Driver, DriverCompletion, HandleType, NO_TOTAL, NULL_DATA, ODBC_VERSION_3, RawHandle, SqlReturn,
};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, Operation, QueryError,
    QueryErrorKind, Result, StateError, StateErrorKind,
};
