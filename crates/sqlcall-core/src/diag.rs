//! Diagnostic records reported by the driver for a failing call.

use crate::driver::{Driver, HandleType, RawHandle, SqlReturn};
use crate::error::Operation;
use std::fmt;

/// Initial message buffer size; longer messages are re-read with an exact buffer.
const MESSAGE_BUFFER_LEN: usize = 1024;

/// One `SQLGetDiagRec` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    /// Five-character SQLSTATE, e.g. "42S02"
    pub state: String,
    /// Driver/data-source specific error code
    pub native_error: i32,
    pub message: String,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (native error {})",
            self.state, self.message, self.native_error
        )
    }
}

/// Decode NUL-terminated driver text, stopping at `len` or the first NUL.
pub fn text_from_buffer(buffer: &[u8], len: usize) -> String {
    let bytes = &buffer[..len.min(buffer.len())];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Collect every diagnostic record available on `handle` after `operation`
/// returned `ret`, logging each one.
///
/// Records are read from number 1 upwards until the driver stops returning
/// success. An `SQL_INVALID_HANDLE` return (or a null handle) has nothing to
/// query, so it yields no records.
///
/// # Safety
/// `handle` must be null or a live handle of `handle_type` allocated by `driver`.
pub unsafe fn gather_diagnostics<D: Driver + ?Sized>(
    driver: &D,
    handle_type: HandleType,
    handle: RawHandle,
    operation: Operation,
    ret: SqlReturn,
) -> Vec<DiagnosticRecord> {
    if ret == SqlReturn::INVALID_HANDLE || handle.is_null() {
        tracing::warn!(
            operation = operation.function_name(),
            handle_type = handle_type.label(),
            "Invalid handle"
        );
        return Vec::new();
    }

    let mut records = Vec::new();
    let mut message = vec![0u8; MESSAGE_BUFFER_LEN];
    let mut record_number: i16 = 1;

    loop {
        let mut state = [0u8; 6];
        let mut native_error = 0;
        let mut text_length: i16 = 0;

        // SAFETY: handle is live (caller contract) and every output buffer
        // outlives the call.
        let rc = unsafe {
            driver.get_diag_rec(
                handle_type,
                handle,
                record_number,
                &mut state,
                &mut native_error,
                &mut message,
                &mut text_length,
            )
        };
        if !rc.succeeded() {
            break;
        }

        let needed = usize::try_from(text_length).unwrap_or(0);
        if rc == SqlReturn::SUCCESS_WITH_INFO && needed >= message.len() {
            // Message truncated: read the same record again with room for all of it.
            message.resize(needed + 1, 0);
            continue;
        }

        let record = DiagnosticRecord {
            state: text_from_buffer(&state, 5),
            native_error,
            message: text_from_buffer(&message, needed),
        };
        tracing::warn!(
            operation = operation.function_name(),
            sqlstate = %record.state,
            native_error = record.native_error,
            "{}",
            record.message
        );
        records.push(record);

        match record_number.checked_add(1) {
            Some(next) => record_number = next,
            None => break,
        }
    }

    if records.is_empty() {
        tracing::warn!(
            operation = operation.function_name(),
            ret = %ret,
            "Call failed without diagnostic records"
        );
    }

    records
}
