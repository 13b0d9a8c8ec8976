use super::{
    as_handle::AsHandle,
    buffer::{clamp_small_int, mut_buf_ptr},
    sql_char::{slice_to_cow_utf8, SqlChar},
};
use odbc_sys::{HandleType, SqlReturn, SQLSTATE_SIZE};
use std::fmt;

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use odbc_sys::SQLGetDiagRecW as sql_get_diag_rec;

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use odbc_sys::SQLGetDiagRec as sql_get_diag_rec;

/// A buffer large enough to hold an SQLSTATE for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct State(pub [u8; SQLSTATE_SIZE]);

impl State {
    /// The driver does not implement an optional feature. Drivers report this e.g. for catalog
    /// functions they do not support, like querying primary keys. Higher layers test for this
    /// state to detect driver limitations.
    pub const OPTIONAL_FEATURE_NOT_IMPLEMENTED: State = State(*b"HYC00");
    /// Can be returned from SQLDisconnect if a transaction is still open.
    pub const INVALID_STATE_TRANSACTION: State = State(*b"25000");
    /// Returned when closing a cursor on a statement which has none open.
    pub const INVALID_CURSOR_STATE: State = State(*b"24000");

    /// Drops the terminating zero and changes the character type, if required.
    pub fn from_chars_with_nul(code: &[SqlChar; SQLSTATE_SIZE + 1]) -> Self {
        // `SQLGetDiagRecW` returns the ODBC state as wide characters. ODBC states always consist
        // of ASCII characters, so a plain narrowing conversion is loss free.
        let mut ascii = [0; SQLSTATE_SIZE];
        for (index, letter) in code[..SQLSTATE_SIZE].iter().copied().enumerate() {
            ascii[index] = letter as u8;
        }
        State(ascii)
    }

    /// View the status code as a string slice for displaying. Must always succeed as ODBC status
    /// codes always consist of ASCII characters.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap()
    }
}

/// A diagnostic record extracted from an ODBC handle after a function call.
#[derive(Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    /// Type of the handle the record was extracted from.
    pub handle_type: HandleType,
    /// Five character SQLSTATE code. The first two characters indicate the class, the next three
    /// the subclass.
    pub state: State,
    /// Error code specific to the data source.
    pub native_error: i32,
    /// Message text, converted to UTF-8. Characters which could not be converted are replaced.
    pub message: String,
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State: {}, Native error: {}, Message: {}",
            self.state.as_str(),
            self.native_error,
            self.message,
        )
    }
}

impl fmt::Debug for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Fetches all diagnostic records associated with `handle` after the last function call on it.
///
/// Extraction itself never fails. Should the driver misbehave while reporting diagnostics, a
/// single pseudo record describing the extraction failure is returned instead.
pub fn diagnostics(handle: &dyn AsHandle) -> Vec<DiagnosticRecord> {
    let mut records = Vec::new();
    let mut rec_number = 1;
    let mut message_buffer: Vec<SqlChar> = vec![0; 512];
    loop {
        match diagnostic_record(handle, rec_number, &mut message_buffer) {
            FetchRecord::Record(record) => records.push(record),
            FetchRecord::NoData => break,
            FetchRecord::ExtractionFailure(return_code) => {
                records.push(DiagnosticRecord {
                    handle_type: handle.handle_type(),
                    state: State::default(),
                    native_error: 0,
                    message: format!(
                        "SQLGetDiagRec returned {:?} while extracting record {} from a {:?} \
                         handle. No further diagnostic information is available.",
                        return_code,
                        rec_number,
                        handle.handle_type(),
                    ),
                });
                break;
            }
        }
        rec_number += 1;
    }
    records
}

enum FetchRecord {
    Record(DiagnosticRecord),
    NoData,
    ExtractionFailure(SqlReturn),
}

fn diagnostic_record(
    handle: &dyn AsHandle,
    rec_number: i16,
    message_buffer: &mut Vec<SqlChar>,
) -> FetchRecord {
    let mut state = [0; SQLSTATE_SIZE + 1];
    let mut native_error = 0;
    let mut text_length = 0;
    let mut ret = unsafe {
        sql_get_diag_rec(
            handle.handle_type(),
            handle.as_handle(),
            rec_number,
            state.as_mut_ptr(),
            &mut native_error,
            mut_buf_ptr(message_buffer),
            clamp_small_int(message_buffer.len()),
            &mut text_length,
        )
    };

    // Grow the buffer and extract again in case the message did not fit.
    if matches!(ret, SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO)
        && text_length as usize >= message_buffer.len()
    {
        message_buffer.resize(text_length as usize + 1, 0);
        ret = unsafe {
            sql_get_diag_rec(
                handle.handle_type(),
                handle.as_handle(),
                rec_number,
                state.as_mut_ptr(),
                &mut native_error,
                mut_buf_ptr(message_buffer),
                clamp_small_int(message_buffer.len()),
                &mut text_length,
            )
        };
    }

    match ret {
        SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO => {
            // Some drivers pad the message with nul characters. Exclude those and everything
            // beyond the reported length.
            let mut text_length = (text_length.max(0) as usize).min(message_buffer.len());
            while text_length > 0 && message_buffer[text_length - 1] == 0 {
                text_length -= 1;
            }
            FetchRecord::Record(DiagnosticRecord {
                handle_type: handle.handle_type(),
                state: State::from_chars_with_nul(&state),
                native_error,
                message: slice_to_cow_utf8(&message_buffer[..text_length]).into_owned(),
            })
        }
        SqlReturn::NO_DATA => FetchRecord::NoData,
        other => FetchRecord::ExtractionFailure(other),
    }
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticRecord, State};
    use odbc_sys::HandleType;

    #[test]
    fn formatting() {
        let rec = DiagnosticRecord {
            handle_type: HandleType::Stmt,
            state: State(*b"HY010"),
            native_error: 0,
            message: "[Microsoft][ODBC Driver Manager] Function sequence error".to_owned(),
        };

        assert_eq!(
            format!("{rec}"),
            "State: HY010, Native error: 0, Message: [Microsoft][ODBC Driver Manager] \
             Function sequence error"
        );
    }

    #[test]
    fn well_known_states() {
        assert_eq!("HYC00", State::OPTIONAL_FEATURE_NOT_IMPLEMENTED.as_str());
        assert_eq!("24000", State::INVALID_CURSOR_STATE.as_str());
    }
}
