use super::{as_handle::AsHandle, diagnostics::diagnostics};
use log::{warn, Level};

/// Inspects all diagnostics of an ODBC handle and logs their text messages. Placeholder
/// characters are printed for messages which cannot be converted to UTF-8.
pub fn log_diagnostics(handle: &dyn AsHandle) {
    if log::max_level() < Level::Warn {
        // Early return to save the work of creating all these records in case we would not log
        // anything.
        return;
    }

    for record in diagnostics(handle) {
        warn!("{record}");
    }
}
