use std::cell::UnsafeCell;

use odbc_sys::{Len, NO_TOTAL, NTS, NULL_DATA};

/// The length indicator cell of one bound buffer. The driver communicates "bytes available",
/// "null" or "null terminated string" through it, the client reads and writes it through the
/// accessors.
///
/// The cell is heap allocated so its address stays stable for as long as the buffer lives, no
/// matter how the owning buffer is moved around. While a fetch or execute is in flight the driver
/// aliases the cell, which is why all accessors work on a shared reference.
pub struct LengthIndicator {
    cb: Box<UnsafeCell<Len>>,
}

impl LengthIndicator {
    /// A fresh indicator signalling null, matching a buffer which has not received a value yet.
    pub fn new() -> Self {
        Self {
            cb: Box::new(UnsafeCell::new(NULL_DATA)),
        }
    }

    /// Pointer handed to the driver when binding.
    pub(crate) fn ptr(&self) -> *mut Len {
        self.cb.get()
    }

    /// Set the indicator to an explicit number of bytes.
    pub fn set_cb(&self, cb: Len) {
        unsafe { *self.cb.get() = cb }
    }

    /// The current indicator value.
    pub fn cb(&self) -> Len {
        unsafe { *self.cb.get() }
    }

    /// Flag the buffer value as null.
    pub fn set_null(&self) {
        self.set_cb(NULL_DATA)
    }

    /// `true` if the buffer value is null.
    pub fn is_null(&self) -> bool {
        self.cb() == NULL_DATA
    }

    /// Flag the buffer as holding a zero terminated string.
    pub fn set_nts(&self) {
        self.set_cb(NTS)
    }

    /// `true` if the buffer holds a zero terminated string.
    pub fn is_nts(&self) -> bool {
        self.cb() == NTS
    }

    /// `true` if the driver could not determine the length of the value.
    pub fn is_no_total(&self) -> bool {
        self.cb() == NO_TOTAL
    }
}

impl Default for LengthIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::LengthIndicator;

    #[test]
    fn fresh_indicator_is_null() {
        let indicator = LengthIndicator::new();
        assert!(indicator.is_null());
    }

    #[test]
    fn explicit_length_clears_null() {
        let indicator = LengthIndicator::new();
        indicator.set_cb(4);
        assert!(!indicator.is_null());
        assert_eq!(4, indicator.cb());
        indicator.set_null();
        assert!(indicator.is_null());
    }

    #[test]
    fn null_terminated_strings() {
        let indicator = LengthIndicator::new();
        indicator.set_nts();
        assert!(indicator.is_nts());
        assert!(!indicator.is_null());
    }
}
