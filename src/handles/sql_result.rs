use std::fmt;

use odbc_sys::SqlReturn;

use super::{as_handle::AsHandle, diagnostics::diagnostics, logging::log_diagnostics};
use crate::error::Error;

/// Classification of an ODBC return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The function has been executed successfully.
    Success,
    /// The function has been executed successfully, there have been warnings.
    SuccessWithInfo,
    /// No more data was available. This is how the driver signals the end of a result set, or
    /// that an update or delete affected no rows. Distinct from an error.
    NoData,
    /// The function failed. Diagnostics can be retrieved from the involved handle.
    Error,
    /// The handle passed to the function was invalid. No diagnostics are available.
    InvalidHandle,
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Success => "SQL_SUCCESS",
            ReturnCode::SuccessWithInfo => "SQL_SUCCESS_WITH_INFO",
            ReturnCode::NoData => "SQL_NO_DATA",
            ReturnCode::Error => "SQL_ERROR",
            ReturnCode::InvalidHandle => "SQL_INVALID_HANDLE",
        };
        write!(f, "{text}")
    }
}

/// Result of an ODBC function call. Variants hold the same meaning as the constants associated
/// with [`SqlReturn`]. This type remembers the name of the ODBC function which produced it, so
/// diagnostics can be associated with the call once the result is turned into a [`Result`].
#[derive(Debug)]
#[must_use]
pub enum SqlResult<T> {
    /// The function has been executed successfully.
    Success(T),
    /// The function has been executed successfully. There have been warnings.
    SuccessWithInfo(T),
    /// The function ran to the end of the data it operates on.
    NoData { function: &'static str },
    /// The function returned an error state. Check diagnostics.
    Error { function: &'static str },
    /// The handle involved in the call was invalid. The CLI offers no diagnostics for this case.
    InvalidHandle { function: &'static str },
}

impl SqlResult<()> {
    /// Append a return value to a successful result.
    pub fn on_success<F, T>(self, f: F) -> SqlResult<T>
    where
        F: FnOnce() -> T,
    {
        self.map(|()| f())
    }
}

impl<T> SqlResult<T> {
    /// Applies `f` to any value wrapped in `Success` or `SuccessWithInfo`.
    pub fn map<U, F>(self, f: F) -> SqlResult<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            SqlResult::Success(v) => SqlResult::Success(f(v)),
            SqlResult::SuccessWithInfo(v) => SqlResult::SuccessWithInfo(f(v)),
            SqlResult::NoData { function } => SqlResult::NoData { function },
            SqlResult::Error { function } => SqlResult::Error { function },
            SqlResult::InvalidHandle { function } => SqlResult::InvalidHandle { function },
        }
    }

    /// Turns this into a [`Result`], extracting diagnostics from `handle` in case of an error.
    /// `NoData` is treated as an error here; use [`Self::into_result_bool`] where the end of data
    /// is an expected outcome.
    pub fn into_result(self, handle: &dyn AsHandle) -> Result<T, Error> {
        match self {
            SqlResult::Success(value) => Ok(value),
            SqlResult::SuccessWithInfo(value) => {
                log_diagnostics(handle);
                Ok(value)
            }
            SqlResult::NoData { function } => Err(Error::SqlResult {
                function,
                code: ReturnCode::NoData,
                records: Vec::new(),
            }),
            SqlResult::Error { function } => {
                let records = diagnostics(handle);
                log_diagnostics(handle);
                Err(Error::SqlResult {
                    function,
                    code: ReturnCode::Error,
                    records,
                })
            }
            SqlResult::InvalidHandle { function } => Err(Error::SqlResult {
                function,
                code: ReturnCode::InvalidHandle,
                records: Vec::new(),
            }),
        }
    }
}

impl SqlResult<()> {
    /// Turns this into a [`Result`] over a boolean indicating whether data had been available.
    /// `NoData` maps to `Ok(false)`, success to `Ok(true)`. Fetch loops and executes of
    /// statements which may affect zero rows use this.
    pub fn into_result_bool(self, handle: &dyn AsHandle) -> Result<bool, Error> {
        match self {
            SqlResult::NoData { .. } => Ok(false),
            other => other.into_result(handle).map(|()| true),
        }
    }
}

pub trait ExtSqlReturn {
    fn into_sql_result(self, function: &'static str) -> SqlResult<()>;
}

impl ExtSqlReturn for SqlReturn {
    fn into_sql_result(self, function: &'static str) -> SqlResult<()> {
        match self {
            SqlReturn::SUCCESS => SqlResult::Success(()),
            SqlReturn::SUCCESS_WITH_INFO => SqlResult::SuccessWithInfo(()),
            SqlReturn::NO_DATA => SqlResult::NoData { function },
            SqlReturn::INVALID_HANDLE => SqlResult::InvalidHandle { function },
            _ => SqlResult::Error { function },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_of_return_codes() {
        assert!(matches!(
            SqlReturn::SUCCESS.into_sql_result("SQLFetch"),
            SqlResult::Success(())
        ));
        assert!(matches!(
            SqlReturn::NO_DATA.into_sql_result("SQLFetch"),
            SqlResult::NoData { .. }
        ));
        assert!(matches!(
            SqlReturn::ERROR.into_sql_result("SQLFetch"),
            SqlResult::Error { .. }
        ));
        assert!(matches!(
            SqlReturn::INVALID_HANDLE.into_sql_result("SQLFetch"),
            SqlResult::InvalidHandle { .. }
        ));
    }
}
