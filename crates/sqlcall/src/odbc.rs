//! [`Driver`] backed by the platform ODBC driver manager.
//!
//! Each method forwards to the matching `odbc-sys` function. Only the
//! narrow (8-bit) entry points are used; text goes in with explicit lengths.

#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use odbc_sys as sys;
use sqlcall_core::{Driver, DriverCompletion, HandleType, RawHandle, SqlReturn};
use std::ptr;

/// The platform driver manager (unixODBC, iODBC or odbc32).
#[derive(Debug, Clone, Copy, Default)]
pub struct OdbcDriver;

impl OdbcDriver {
    pub const fn new() -> Self {
        Self
    }
}

fn handle_type(handle_type: HandleType) -> sys::HandleType {
    match handle_type {
        HandleType::Environment => sys::HandleType::Env,
        HandleType::Connection => sys::HandleType::Dbc,
        HandleType::Statement => sys::HandleType::Stmt,
    }
}

fn completion(completion: DriverCompletion) -> sys::DriverConnectOption {
    match completion {
        DriverCompletion::NoPrompt => sys::DriverConnectOption::NoPrompt,
        DriverCompletion::Complete => sys::DriverConnectOption::Complete,
        DriverCompletion::Prompt => sys::DriverConnectOption::Prompt,
        DriverCompletion::CompleteRequired => sys::DriverConnectOption::CompleteRequired,
    }
}

fn ret(rc: sys::SqlReturn) -> SqlReturn {
    SqlReturn(rc.0)
}

fn any(handle: RawHandle) -> sys::Handle {
    handle.as_ptr().cast()
}

fn env(handle: RawHandle) -> sys::HEnv {
    handle.as_ptr().cast()
}

fn dbc(handle: RawHandle) -> sys::HDbc {
    handle.as_ptr().cast()
}

fn stmt(handle: RawHandle) -> sys::HStmt {
    handle.as_ptr().cast()
}

/// Buffer length as the driver's 16-bit length, saturating.
fn small_len(len: usize) -> sys::SmallInt {
    sys::SmallInt::try_from(len).unwrap_or(sys::SmallInt::MAX)
}

impl Driver for OdbcDriver {
    unsafe fn allocate_handle(
        &self,
        kind: HandleType,
        parent: RawHandle,
        output: &mut RawHandle,
    ) -> SqlReturn {
        let mut raw: sys::Handle = ptr::null_mut();
        // SAFETY: parent is null or live (caller contract); raw is a valid out pointer.
        let rc = unsafe { sys::SQLAllocHandle(handle_type(kind), any(parent), &mut raw) };
        *output = RawHandle::from_ptr(raw.cast());
        ret(rc)
    }

    unsafe fn free_handle(&self, kind: HandleType, handle: RawHandle) -> SqlReturn {
        // SAFETY: handle is live (caller contract).
        ret(unsafe { sys::SQLFreeHandle(handle_type(kind), any(handle)) })
    }

    unsafe fn set_odbc_version(&self, environment: RawHandle, version: i32) -> SqlReturn {
        // Integer attributes travel in the pointer argument.
        let value: sys::Pointer = ptr::without_provenance_mut(version as usize);
        // SAFETY: environment is live (caller contract).
        ret(unsafe {
            sys::SQLSetEnvAttr(
                env(environment),
                sys::EnvironmentAttribute::OdbcVersion,
                value,
                0,
            )
        })
    }

    unsafe fn driver_connect(
        &self,
        connection: RawHandle,
        connection_string: &str,
        option: DriverCompletion,
    ) -> SqlReturn {
        let Ok(len) = sys::SmallInt::try_from(connection_string.len()) else {
            return SqlReturn::ERROR;
        };
        // SAFETY: connection is live; the string is read only during the call
        // and no output buffer is requested.
        ret(unsafe {
            sys::SQLDriverConnect(
                dbc(connection),
                ptr::null_mut(),
                connection_string.as_ptr(),
                len,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                completion(option),
            )
        })
    }

    unsafe fn disconnect(&self, connection: RawHandle) -> SqlReturn {
        // SAFETY: connection is live (caller contract).
        ret(unsafe { sys::SQLDisconnect(dbc(connection)) })
    }

    unsafe fn prepare(&self, statement: RawHandle, sql: &str) -> SqlReturn {
        let Ok(len) = sys::Integer::try_from(sql.len()) else {
            return SqlReturn::ERROR;
        };
        // SAFETY: statement is live; the text is read only during the call.
        ret(unsafe { sys::SQLPrepare(stmt(statement), sql.as_ptr(), len) })
    }

    unsafe fn num_result_cols(&self, statement: RawHandle, count: &mut i16) -> SqlReturn {
        // SAFETY: statement is live; count is a valid out pointer.
        ret(unsafe { sys::SQLNumResultCols(stmt(statement), count) })
    }

    unsafe fn bind_text_parameter(
        &self,
        statement: RawHandle,
        parameter_number: u16,
        value: *const u8,
        length: usize,
        indicator: *mut isize,
    ) -> SqlReturn {
        // SAFETY: value and indicator stay valid until rebind or free (caller contract).
        ret(unsafe {
            sys::SQLBindParameter(
                stmt(statement),
                parameter_number,
                sys::ParamType::Input,
                sys::CDataType::Char,
                sys::SqlDataType::CHAR,
                // Zero is not a valid CHAR column size; empty text still binds.
                length.max(1),
                0,
                value.cast_mut().cast(),
                length as sys::Len,
                indicator,
            )
        })
    }

    unsafe fn execute(&self, statement: RawHandle) -> SqlReturn {
        // SAFETY: statement is live and its bound buffers are valid (caller contract).
        ret(unsafe { sys::SQLExecute(stmt(statement)) })
    }

    unsafe fn fetch(&self, statement: RawHandle) -> SqlReturn {
        // SAFETY: statement is live (caller contract).
        ret(unsafe { sys::SQLFetch(stmt(statement)) })
    }

    unsafe fn get_text_data(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        indicator: &mut isize,
    ) -> SqlReturn {
        // SAFETY: statement is live; buffer and indicator outlive the call.
        ret(unsafe {
            sys::SQLGetData(
                stmt(statement),
                column_number,
                sys::CDataType::Char,
                buffer.as_mut_ptr().cast(),
                buffer.len() as sys::Len,
                indicator,
            )
        })
    }

    unsafe fn describe_column_name(
        &self,
        statement: RawHandle,
        column_number: u16,
        buffer: &mut [u8],
        name_length: &mut i16,
    ) -> SqlReturn {
        // SAFETY: statement is live; the optional outputs may be null.
        ret(unsafe {
            sys::SQLDescribeCol(
                stmt(statement),
                column_number,
                buffer.as_mut_ptr(),
                small_len(buffer.len()),
                name_length,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        })
    }

    unsafe fn close_cursor(&self, statement: RawHandle) -> SqlReturn {
        // SAFETY: statement is live (caller contract).
        ret(unsafe { sys::SQLFreeStmt(stmt(statement), sys::FreeStmtOption::Close) })
    }

    unsafe fn get_diag_rec(
        &self,
        kind: HandleType,
        handle: RawHandle,
        record_number: i16,
        state: &mut [u8; 6],
        native_error: &mut i32,
        message: &mut [u8],
        text_length: &mut i16,
    ) -> SqlReturn {
        // SAFETY: handle is live; every output buffer outlives the call.
        ret(unsafe {
            sys::SQLGetDiagRec(
                handle_type(kind),
                any(handle),
                record_number,
                state.as_mut_ptr(),
                native_error,
                message.as_mut_ptr(),
                small_len(message.len()),
                text_length,
            )
        })
    }
}
