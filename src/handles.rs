//! Owning wrappers around valid (i.e. successfully allocated) ODBC handles.
//!
//! Two decisions are baked into this module:
//!
//! * Warnings are reported by logging them with `log`.
//! * Handles keep a strong reference to their parent handle, so a child can never outlive the
//!   environment or connection it was allocated on.

mod as_handle;
mod buffer;
mod connection;
mod descriptor;
mod diagnostics;
mod environment;
mod logging;
mod sql_char;
mod sql_result;
mod statement;

pub use self::{
    as_handle::AsHandle,
    connection::ConnectionHandle,
    descriptor::Descriptor,
    diagnostics::{diagnostics, DiagnosticRecord, State},
    environment::{DataSourceInfo, EnvironmentHandle, OdbcVersion},
    logging::log_diagnostics,
    sql_char::{slice_to_cow_utf8, slice_to_utf8, OutputStringBuffer, SqlChar, SqlText, SzBuffer},
    sql_result::{ReturnCode, SqlResult},
    statement::{ParameterDescription, StatementHandle},
};

use log::{debug, error};
use odbc_sys::{Handle, HandleType, SQLFreeHandle, SqlReturn};

/// Frees a handle at the end of its owner's lifetime. Never panics: drops must not block stack
/// unwinding, so failures are logged and execution continues.
///
/// # Safety
///
/// `handle` must be a valid ODBC handle and `handle_type` must match its type.
unsafe fn drop_handle(handle: Handle, handle_type: HandleType) {
    match SQLFreeHandle(handle_type, handle) {
        SqlReturn::SUCCESS => {
            debug!("SQLFreeHandle dropped {handle:?} of type {handle_type:?}.");
        }
        SqlReturn::INVALID_HANDLE => {
            // The handle is gone already, nothing left to release.
            error!(
                "SQLFreeHandle for {handle:?} of type {handle_type:?} returned \
                 SQL_INVALID_HANDLE. The handle is forgotten."
            );
        }
        other => {
            error!(
                "SQLFreeHandle for {handle:?} of type {handle_type:?} failed with {other:?}. \
                 The handle remains allocated and is leaked."
            );
        }
    }
}
