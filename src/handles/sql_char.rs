//! The idea is to handle most of the conditional compilation around different SQL character types
//! in this module, so the rest of the crate doesn't have to.
//!
//! On windows systems the wide ('W') variants of the ODBC function calls are used, which speak
//! UTF-16. Everywhere else the narrow variants are used and the payload is assumed to be UTF-8.
//! The `narrow` and `wide` cargo features overwrite the platform default.

use crate::error::{ConversionDirection, Error};

use super::buffer::{buf_ptr, mut_buf_ptr};

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use std::str;

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use std::{char::decode_utf16, marker::PhantomData};

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use widestring::{U16CStr, U16String};

use std::borrow::Cow;

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
pub type SqlChar = u8;
#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
pub type SqlChar = u16;

/// Convert a slice of `SqlChar` characters received from the data source into an owned UTF-8
/// string. Fails with [`Error::Conversion`] if the data is not valid in the source encoding.
#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
pub fn slice_to_utf8(text: &[u8]) -> Result<String, Error> {
    str::from_utf8(text)
        .map(|s| s.to_owned())
        .map_err(|_| Error::Conversion {
            direction: ConversionDirection::FromDataSource,
        })
}
/// Convert a slice of `SqlChar` characters received from the data source into an owned UTF-8
/// string. Fails with [`Error::Conversion`] if the data is not valid in the source encoding.
#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
pub fn slice_to_utf8(text: &[u16]) -> Result<String, Error> {
    decode_utf16(text.iter().copied())
        .collect::<Result<String, _>>()
        .map_err(|_| Error::Conversion {
            direction: ConversionDirection::FromDataSource,
        })
}

/// Lossy conversion for contexts which must not fail, like rendering diagnostic messages.
#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
pub fn slice_to_cow_utf8(text: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(text)
}
/// Lossy conversion for contexts which must not fail, like rendering diagnostic messages.
#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
pub fn slice_to_cow_utf8(text: &[u16]) -> Cow<'_, str> {
    let text: String = decode_utf16(text.iter().copied())
        .map(|result| result.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    text.into()
}

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
fn sz_to_utf8(buffer: &[u16]) -> Result<String, Error> {
    let c_str = U16CStr::from_slice_truncate(buffer).map_err(|_| Error::Conversion {
        direction: ConversionDirection::FromDataSource,
    })?;
    c_str.to_string().map_err(|_| Error::Conversion {
        direction: ConversionDirection::FromDataSource,
    })
}
#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
fn sz_to_utf8(buffer: &[u8]) -> Result<String, Error> {
    // Truncate the slice at the first terminating zero.
    let end = buffer
        .iter()
        .position(|&character| character == b'\0')
        .unwrap_or(buffer.len());
    slice_to_utf8(&buffer[..end])
}

/// Handles conversion from UTF-8 string slices to the ODBC SQL char encoding. Depending on the
/// conditional compilation due to feature flags, the UTF-8 strings are either passed without
/// conversion to narrow method calls, or they are converted to UTF-16, before passed to the wide
/// methods.
pub struct SqlText<'a> {
    /// In case we use wide methods we need to convert to UTF-16. We'll take ownership of the
    /// buffer here.
    #[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
    text: U16String,
    /// We include the lifetime in the declaration of the type still, so the borrow checker
    /// complains, if we would mess up the compilation for narrow methods.
    #[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
    _ref: PhantomData<&'a str>,
    /// In the case of narrow compilation we just forward the string slice unchanged
    #[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
    text: &'a str,
}

impl<'a> SqlText<'a> {
    #[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
    /// Create an SqlText buffer from an UTF-8 string slice
    pub fn new(text: &'a str) -> Self {
        Self {
            text: U16String::from_str(text),
            _ref: PhantomData,
        }
    }
    #[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
    /// Create an SqlText buffer from an UTF-8 string slice
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    #[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
    pub fn ptr(&self) -> *const u16 {
        buf_ptr(self.text.as_slice())
    }
    #[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
    pub fn ptr(&self) -> *const u8 {
        buf_ptr(self.text.as_bytes())
    }

    /// Length in characters
    pub fn len_char(&self) -> usize {
        self.text.len()
    }
}

/// Use this buffer type to fetch zero terminated strings from the ODBC API. Either allocates a
/// buffer for wide or narrow strings dependent on the feature set.
pub struct SzBuffer {
    buffer: Vec<SqlChar>,
}

impl SzBuffer {
    /// Creates a buffer which can hold at least `capacity` characters, excluding the terminating
    /// zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            // Allocate +1 character extra for terminating zero
            buffer: vec![0; capacity + 1],
        }
    }

    pub fn mut_buf(&mut self) -> &mut [SqlChar] {
        // Use full capacity
        self.buffer.resize(self.buffer.capacity(), 0);
        &mut self.buffer
    }

    /// Create an owned utf-8 string from the internal buffer representation.
    pub fn to_utf8(&self) -> Result<String, Error> {
        sz_to_utf8(&self.buffer)
    }
}

/// We use this as an output buffer for strings. Allows for detecting truncation.
pub struct OutputStringBuffer {
    /// Buffer holding the string. Must also contain space for a terminating zero.
    buffer: Vec<SqlChar>,
    /// After the buffer has been filled, this should contain the actual length of the string. Can
    /// be used to detect truncation.
    actual_length: i16,
}

impl OutputStringBuffer {
    /// Creates an empty string buffer. Useful if the completed string is of no interest, e.g. a
    /// completed connection string after connecting.
    pub fn empty() -> Self {
        Self::with_buffer_size(0)
    }

    /// Creates a new instance of an output string buffer which can hold strings up to a size of
    /// `max_str_len - 1` characters. `-1` because one place is needed for the terminating zero.
    pub fn with_buffer_size(max_str_len: usize) -> Self {
        Self {
            buffer: vec![0; max_str_len],
            actual_length: 0,
        }
    }

    /// Ptr to the internal buffer. Used by ODBC API calls to fill the buffer.
    pub fn mut_buf_ptr(&mut self) -> *mut SqlChar {
        mut_buf_ptr(&mut self.buffer)
    }

    /// Length of the internal buffer in characters including the terminating zero.
    pub fn buf_len(&self) -> i16 {
        self.buffer.len().try_into().unwrap()
    }

    /// Mutable pointer to the actual output string length. Used by ODBC API calls to report
    /// truncation.
    pub fn mut_actual_len_ptr(&mut self) -> *mut i16 {
        &mut self.actual_length as *mut i16
    }

    /// Call this method to extract the string from the buffer after ODBC has filled it.
    pub fn to_utf8(&self) -> Result<String, Error> {
        if self.buffer.is_empty() {
            return Ok(String::new());
        }

        if self.is_truncated() {
            // If the string is truncated we return the entire buffer excluding the terminating
            // zero.
            slice_to_utf8(&self.buffer[0..(self.buffer.len() - 1)])
        } else {
            // If the string is not truncated, we return not the entire buffer, but only the slice
            // containing the actual string.
            let actual_length: usize = self.actual_length.try_into().unwrap();
            slice_to_utf8(&self.buffer[0..actual_length])
        }
    }

    /// True if the buffer had not been large enough to hold the string.
    pub fn is_truncated(&self) -> bool {
        self.actual_length >= self.buffer.len().try_into().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::{slice_to_utf8, SqlText};

    #[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
    fn to_vec_sql_char(text: &str) -> Vec<u16> {
        text.encode_utf16().collect()
    }

    #[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
    fn to_vec_sql_char(text: &str) -> Vec<u8> {
        text.bytes().collect()
    }

    #[test]
    fn roundtrip_text_through_sql_encoding() {
        let encoded = to_vec_sql_char("integertypes");
        assert_eq!("integertypes", slice_to_utf8(&encoded).unwrap());
    }

    #[test]
    fn sql_text_reports_length_in_characters() {
        let text = SqlText::new("SELECT 1");
        assert_eq!(8, text.len_char());
    }
}
