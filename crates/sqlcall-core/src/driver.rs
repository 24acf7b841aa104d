//! The call-level protocol consumed by connections and statements.
//!
//! A [`Driver`] is whatever answers the driver-manager calls: the platform
//! ODBC driver manager in production, or a scripted stand-in under test.
//! Method shapes follow the ODBC conventions exactly (handle types, 1-based
//! column and parameter numbers, length indicators) so a backend can forward
//! each call unchanged.

#![allow(clippy::upper_case_acronyms)]

use std::ffi::c_void;
use std::fmt;
use std::ptr;

/// `SQL_ATTR_ODBC_VERSION` value requesting ODBC 3.x behaviour.
pub const ODBC_VERSION_3: i32 = 3;

/// Length indicator meaning the column value is NULL (`SQL_NULL_DATA`).
pub const NULL_DATA: isize = -1;

/// Length indicator meaning the driver cannot tell the remaining length (`SQL_NO_TOTAL`).
pub const NO_TOTAL: isize = -4;

/// The kind of handle a call operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    /// Environment handle (`SQL_HANDLE_ENV`)
    Environment,
    /// Connection handle (`SQL_HANDLE_DBC`)
    Connection,
    /// Statement handle (`SQL_HANDLE_STMT`)
    Statement,
}

impl HandleType {
    /// The numeric `SQL_HANDLE_*` value.
    pub const fn as_raw(self) -> i16 {
        match self {
            HandleType::Environment => 1,
            HandleType::Connection => 2,
            HandleType::Statement => 3,
        }
    }

    /// Short name used in log output.
    pub const fn label(self) -> &'static str {
        match self {
            HandleType::Environment => "ENV",
            HandleType::Connection => "DBC",
            HandleType::Statement => "STMT",
        }
    }
}

/// An opaque handle handed out by the driver manager.
///
/// `RawHandle` carries no ownership. The connection and statement types own
/// the handles they allocate and free them exactly once.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(*mut c_void);

impl RawHandle {
    /// The null handle (`SQL_NULL_HANDLE`).
    pub const NULL: Self = Self(ptr::null_mut());

    /// Wrap a pointer returned by the driver manager.
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// The underlying pointer.
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for RawHandle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:p})", self.0)
    }
}

/// Return code of a call-level function (`SQLRETURN`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlReturn(pub i16);

impl SqlReturn {
    pub const SUCCESS: Self = Self(0);
    pub const SUCCESS_WITH_INFO: Self = Self(1);
    pub const STILL_EXECUTING: Self = Self(2);
    pub const NEED_DATA: Self = Self(99);
    pub const NO_DATA: Self = Self(100);
    pub const ERROR: Self = Self(-1);
    pub const INVALID_HANDLE: Self = Self(-2);

    /// `SQL_SUCCEEDED`: success, with or without diagnostic information.
    pub const fn succeeded(self) -> bool {
        self.0 == 0 || self.0 == 1
    }

    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "SQL_SUCCESS",
            1 => "SQL_SUCCESS_WITH_INFO",
            2 => "SQL_STILL_EXECUTING",
            99 => "SQL_NEED_DATA",
            100 => "SQL_NO_DATA",
            -1 => "SQL_ERROR",
            -2 => "SQL_INVALID_HANDLE",
            _ => "SQL_UNKNOWN",
        }
    }
}

impl fmt::Debug for SqlReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for SqlReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How much the driver may complete a connection string on its own
/// (`SQLDriverConnect`'s `DriverCompletion` argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverCompletion {
    /// `SQL_DRIVER_NOPROMPT`
    NoPrompt,
    /// `SQL_DRIVER_COMPLETE`
    #[default]
    Complete,
    /// `SQL_DRIVER_PROMPT`
    Prompt,
    /// `SQL_DRIVER_COMPLETE_REQUIRED`
    CompleteRequired,
}

impl DriverCompletion {
    pub const fn as_raw(self) -> u16 {
        match self {
            DriverCompletion::NoPrompt => 0,
            DriverCompletion::Complete => 1,
            DriverCompletion::Prompt => 2,
            DriverCompletion::CompleteRequired => 3,
        }
    }
}

/// The call-level database interface.
///
/// One method per driver-manager call the handles need. Every method is
/// `unsafe`: handles passed in must be null or live handles of the stated
/// type that were allocated by this driver and not yet freed.
///
/// All text is passed with an explicit byte length; nothing relies on NUL
/// termination on the way in. Output buffers receive NUL-terminated text and
/// the untruncated length is reported through the length argument.
pub trait Driver {
    /// `SQLAllocHandle`. `parent` is null for environments.
    ///
    /// # Safety
    /// `parent` must be null or a live handle of the parent type.
    unsafe fn allocate_handle(
        &self,
        handle_type: HandleType,
        parent: RawHandle,
        output: &mut RawHandle,
    ) -> SqlReturn;

    /// `SQLFreeHandle`.
    ///
    /// # Safety
    /// `handle` must be a live handle of `handle_type`; it is invalid afterwards.
    unsafe fn free_handle(&self, handle_type: HandleType, handle: RawHandle) -> SqlReturn;

    /// `SQLSetEnvAttr(SQL_ATTR_ODBC_VERSION)`.
    ///
    /// # Safety
    /// `environment` must be a live environment handle.
    unsafe fn set_odbc_version(&self, environment: RawHandle, version: i32) -> SqlReturn;

    /// `SQLDriverConnect` without a parent window and without an output string.
    ///
    /// # Safety
    /// `connection` must be a live connection handle.
    unsafe fn driver_connect(
        &self,
        connection: RawHandle,
        connection_string: &str,
        completion: DriverCompletion,
    ) -> SqlReturn;

    /// `SQLDisconnect`.
    ///
    /// # Safety
    /// `connection` must be a live connection handle.
    unsafe fn disconnect(&self, connection: RawHandle) -> SqlReturn;

    /// `SQLPrepare`.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn prepare(&self, statement: RawHandle, sql: &str) -> SqlReturn;

    /// `SQLNumResultCols`.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn num_result_cols(&self, statement: RawHandle, count: &mut i16) -> SqlReturn;

    /// `SQLBindParameter` as an input `SQL_C_CHAR` / `SQL_CHAR` parameter.
    ///
    /// The driver keeps both pointers and reads them when the statement is
    /// executed.
    ///
    /// # Safety
    /// `statement` must be a live statement handle. `value` must point at
    /// `length` readable bytes and `indicator` at a writable `isize` holding
    /// `length`; both must stay valid and unmoved until the parameter is
    /// rebound or the statement is freed.
    unsafe fn bind_text_parameter(
        &self,
        statement: RawHandle,
        parameter_number: u16,
        value: *const u8,
        length: usize,
        indicator: *mut isize,
    ) -> SqlReturn;

    /// `SQLExecute`.
    ///
    /// # Safety
    /// `statement` must be a live statement handle whose bound parameter
    /// buffers are still valid.
    unsafe fn execute(&self, statement: RawHandle) -> SqlReturn;

    /// `SQLFetch`.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn fetch(&self, statement: RawHandle) -> SqlReturn;

    /// `SQLGetData` into a `SQL_C_CHAR` buffer.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn get_text_data(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        indicator: &mut isize,
    ) -> SqlReturn;

    /// `SQLDescribeCol`, name only.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn describe_column_name(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        name_length: &mut i16,
    ) -> SqlReturn;

    /// `SQLFreeStmt(SQL_CLOSE)`: close the cursor and discard pending results.
    ///
    /// # Safety
    /// `statement` must be a live statement handle.
    unsafe fn close_cursor(&self, statement: RawHandle) -> SqlReturn;

    /// `SQLGetDiagRec`. `record_number` is 1-based.
    ///
    /// # Safety
    /// `handle` must be a live handle of `handle_type`.
    unsafe fn get_diag_rec(
        &self,
        handle_type: HandleType,
        handle: RawHandle,
        record_number: i16,
        state: &mut [u8; 6],
        native_error: &mut i32,
        message: &mut [u8],
        text_length: &mut i16,
    ) -> SqlReturn;
}
