//! Connection and prepared-statement handles over a call-level database interface.
//!
// Driver calls take raw handles and are unsafe by contract
#![allow(unsafe_code)]
//!
//! Two types do all the work:
//!
//! - [`Connection`] owns the environment and connection handles. It is
//!   configured with host, database, user and password, opened once, and
//!   closed explicitly or on drop.
//! - [`Statement`] owns one statement handle and borrows its connection for
//!   its whole lifetime, so a connection cannot be closed or dropped while a
//!   statement built on it is still alive.
//!
//! Values flow as text in both directions. Parameter positions are 1-based
//! (the driver's numbering); column positions are 0-based.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlcall::{Connection, Fetch, OdbcDriver};
//!
//! let mut conn = Connection::new(OdbcDriver::new());
//! conn.set_host("your-server");
//! conn.set_database_name("your-database");
//! conn.set_user("your-username");
//! conn.set_password("your-password");
//! conn.open()?;
//!
//! let mut stmt = conn.statement();
//! stmt.prepare("SELECT name FROM users WHERE name = ?")?;
//! stmt.bind_parameter(1, "Alice")?;
//! stmt.exec()?;
//! while stmt.next()? == Fetch::Row {
//!     for i in 0..stmt.num_columns() {
//!         println!("{} : {}", stmt.column_name(i)?, stmt.value(i)?);
//!     }
//! }
//! stmt.reset();
//! ```
//!
//! # Backends
//!
//! The driver manager is reached through the [`Driver`] trait. With the
//! `odbc` feature, [`OdbcDriver`] forwards every call to the platform ODBC
//! driver manager via `odbc-sys`.

pub mod connection;
#[cfg(feature = "odbc")]
pub mod odbc;
pub mod statement;

pub use connection::Connection;
#[cfg(feature = "odbc")]
pub use odbc::OdbcDriver;
pub use statement::{Fetch, Statement};

pub use sqlcall_core::{
    ConnectionConfig, DiagnosticRecord, Driver, Error, HandleType, RawHandle, Result, SqlReturn,
    error,
};
