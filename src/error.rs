use std::fmt;

use odbc_sys::SqlDataType;
use thiserror::Error as ThisError;

use crate::handles::{DiagnosticRecord, ReturnCode};

/// Direction of a text conversion between the public UTF-8 API and the encoding used in calls to
/// the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionDirection {
    /// Converting an UTF-8 argument into the encoding expected by the data source.
    ToDataSource,
    /// Converting text received from the data source into UTF-8.
    FromDataSource,
}

impl fmt::Display for ConversionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionDirection::ToDataSource => write!(f, "utf-8 to utf-16"),
            ConversionDirection::FromDataSource => write!(f, "utf-16 to utf-8"),
        }
    }
}

/// Error type covering all failure modes of this crate.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A low level ODBC function call returned with a non success code. Carries the name of the
    /// function, the classified return code and the diagnostic records extracted from the involved
    /// handle. The records are preserved in order, the first record is the principal cause.
    #[error("ODBC emitted an error calling '{function}' ({code}):\n{}", format_records(.records))]
    SqlResult {
        /// ODBC API call which produced the diagnostic records.
        function: &'static str,
        /// Classified return code of the call.
        code: ReturnCode,
        /// Diagnostic records returned by the ODBC driver manager or driver. May be empty in case
        /// the handle had been invalid.
        records: Vec<DiagnosticRecord>,
    },
    /// A precondition of an operation did not hold. This hints at an error in the calling code.
    #[error("assertion failed at {file}:{line}: {condition}{}", format_assertion_message(.message))]
    Assertion {
        /// The condition which did not hold, stringified.
        condition: &'static str,
        file: &'static str,
        line: u32,
        message: Option<String>,
    },
    /// A SQL type was encountered for which no column buffer variant exists.
    #[error("no column buffer exists for SQL type {sql_type:?}")]
    UnsupportedSqlType { sql_type: SqlDataType },
    /// Text could not be converted between UTF-8 and the data source encoding.
    #[error("text conversion failed ({direction})")]
    Conversion { direction: ConversionDirection },
    /// A non optional value was requested from a buffer whose length indicator signals null.
    #[error("column '{query_name}' is null")]
    NullValue { query_name: String },
    /// A catalog lookup found no row.
    #[error("no table found matching '{table}'")]
    TableNotFound { table: String },
    /// A catalog lookup meant to identify one table found more than one.
    #[error("search for table '{table}' matched {count} tables, expected exactly one")]
    TableNotUnique { table: String, count: usize },
    /// Catch all for client side programming errors.
    #[error("illegal argument: {description}")]
    IllegalArgument { description: String },
}

impl Error {
    /// `true` if this error is a [`Error::SqlResult`] whose return code is
    /// [`ReturnCode::NoData`]. Deletes and updates affecting no rows surface this way and callers
    /// may elect to tolerate it.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            Error::SqlResult {
                code: ReturnCode::NoData,
                ..
            }
        )
    }
}

fn format_records(records: &[DiagnosticRecord]) -> String {
    if records.is_empty() {
        return "No diagnostics available.".to_owned();
    }
    records
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_assertion_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(" ({message})"),
        None => String::new(),
    }
}

/// Returns [`Error::Assertion`] from the current function if the condition does not hold.
macro_rules! assertion {
    ($cond:expr) => {
        if !($cond) {
            return Err($crate::error::Error::Assertion {
                condition: stringify!($cond),
                file: file!(),
                line: line!(),
                message: None,
            });
        }
    };
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::error::Error::Assertion {
                condition: stringify!($cond),
                file: file!(),
                line: line!(),
                message: Some($msg.to_string()),
            });
        }
    };
}

pub(crate) use assertion;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::State;

    fn fail_if_negative(value: i32) -> Result<(), Error> {
        assertion!(value >= 0, "value must not be negative");
        Ok(())
    }

    #[test]
    fn assertion_carries_condition_and_location() {
        let error = fail_if_negative(-1).unwrap_err();
        match &error {
            Error::Assertion {
                condition, message, ..
            } => {
                assert_eq!(*condition, "value >= 0");
                assert_eq!(message.as_deref(), Some("value must not be negative"));
            }
            _ => panic!("expected assertion error"),
        }
    }

    #[test]
    fn no_data_predicate() {
        let no_data = Error::SqlResult {
            function: "SQLExecute",
            code: ReturnCode::NoData,
            records: Vec::new(),
        };
        let hard_error = Error::SqlResult {
            function: "SQLExecute",
            code: ReturnCode::Error,
            records: Vec::new(),
        };
        assert!(no_data.is_no_data());
        assert!(!hard_error.is_no_data());
    }

    #[test]
    fn sql_result_formatting_lists_records() {
        let error = Error::SqlResult {
            function: "SQLConnect",
            code: ReturnCode::Error,
            records: vec![DiagnosticRecord {
                handle_type: odbc_sys::HandleType::Dbc,
                state: State(*b"08001"),
                native_error: 101,
                message: "Client unable to establish connection".to_owned(),
            }],
        };
        let text = error.to_string();
        assert!(text.contains("SQLConnect"));
        assert!(text.contains("08001"));
        assert!(text.contains("Client unable to establish connection"));
    }
}
