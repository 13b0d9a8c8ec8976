use std::{cell::UnsafeCell, mem::size_of, rc::Rc};

use odbc_sys::{CDataType, Len, Pointer};

use super::{
    bind::BindingKind,
    column_buffer::{ColumnFlags, ColumnMeta, ColumnProperties},
};
use crate::{
    error::{ConversionDirection, Error},
    handles::StatementHandle,
};

/// Character array buffer bound with `SQL_C_CHAR`. Holds a fixed number of narrow characters.
/// Values are exchanged as UTF-8.
pub struct TextBuffer {
    data: UnsafeCell<Vec<u8>>,
    pub(crate) meta: ColumnMeta,
}

impl TextBuffer {
    /// Creates a buffer able to hold `element_count` characters, including the terminating zero.
    pub fn new(
        query_name: impl Into<String>,
        element_count: usize,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            data: UnsafeCell::new(vec![0; element_count]),
            meta: ColumnMeta::new(query_name, flags, properties),
        }
    }

    /// Number of elements this buffer was constructed with, including the space for a terminating
    /// zero.
    pub fn element_count(&self) -> usize {
        unsafe { (*self.data.get()).len() }
    }

    /// Copies `text` into the buffer, terminates it with a zero and sets the length indicator to
    /// the zero terminated string sentinel. Fails if the text does not fit the buffer together
    /// with its terminating zero.
    pub fn set_text(&self, text: &str) -> Result<(), Error> {
        let bytes = text.as_bytes();
        let data = unsafe { &mut *self.data.get() };
        if bytes.len() + 1 > data.len() {
            return Err(Error::IllegalArgument {
                description: format!(
                    "value of {} bytes does not fit column '{}' buffer of {} elements",
                    bytes.len(),
                    self.meta.query_name(),
                    data.len()
                ),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        data[bytes.len()] = 0;
        self.meta.indicator.set_nts();
        Ok(())
    }

    /// Reads the current value as an owned UTF-8 string. Fails with [`Error::NullValue`] if the
    /// buffer is flagged null.
    pub fn text(&self) -> Result<String, Error> {
        if self.meta.indicator.is_null() {
            return Err(self.meta.null_value_error());
        }
        let data = unsafe { &*self.data.get() };
        let len = if self.meta.indicator.is_nts() || self.meta.indicator.is_no_total() {
            data.iter().position(|&b| b == 0).unwrap_or(data.len())
        } else {
            (self.meta.indicator.cb() as usize).min(data.len())
        };
        String::from_utf8(data[..len].to_vec()).map_err(|_| Error::Conversion {
            direction: ConversionDirection::FromDataSource,
        })
    }

    /// Flags the buffer value as null.
    pub fn set_null(&self) {
        self.meta.indicator.set_null()
    }

    /// `true` if the buffer value is null.
    pub fn is_null(&self) -> bool {
        self.meta.indicator.is_null()
    }

    pub(crate) fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    fn value_ptr(&self) -> Pointer {
        unsafe { (*self.data.get()).as_mut_ptr() as Pointer }
    }

    fn byte_len(&self) -> Len {
        self.element_count() as Len
    }

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        unsafe {
            stmt.bind_col(
                column_nr,
                CDataType::Char,
                self.value_ptr(),
                self.byte_len(),
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, CDataType::Char);
        Ok(())
    }

    /// Registers this buffer as the value of parameter marker `param_nr` (1-based) of `stmt`.
    pub fn bind_parameter(
        &self,
        stmt: &Rc<StatementHandle>,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(), Error> {
        let (sql_type, column_size, decimal_digits) =
            self.meta
                .resolve_parameter_properties(stmt, param_nr, use_describe_param)?;
        unsafe {
            stmt.bind_input_parameter(
                param_nr,
                CDataType::Char,
                sql_type,
                column_size,
                decimal_digits,
                self.value_ptr(),
                self.byte_len(),
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, CDataType::Char);
        Ok(())
    }
}

/// Wide character array buffer bound with `SQL_C_WCHAR`. Holds a fixed number of UTF-16 code
/// units. Values are exchanged as UTF-8 at the API boundary.
pub struct WTextBuffer {
    data: UnsafeCell<Vec<u16>>,
    pub(crate) meta: ColumnMeta,
}

impl WTextBuffer {
    /// Creates a buffer able to hold `element_count` UTF-16 code units, including the terminating
    /// zero.
    pub fn new(
        query_name: impl Into<String>,
        element_count: usize,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            data: UnsafeCell::new(vec![0; element_count]),
            meta: ColumnMeta::new(query_name, flags, properties),
        }
    }

    /// Number of elements this buffer was constructed with, including the space for a terminating
    /// zero.
    pub fn element_count(&self) -> usize {
        unsafe { (*self.data.get()).len() }
    }

    /// Copies `text` into the buffer, terminates it with a zero and sets the length indicator to
    /// the zero terminated string sentinel. Fails if the text does not fit the buffer together
    /// with its terminating zero.
    pub fn set_text(&self, text: &str) -> Result<(), Error> {
        let units: Vec<u16> = text.encode_utf16().collect();
        let data = unsafe { &mut *self.data.get() };
        if units.len() + 1 > data.len() {
            return Err(Error::IllegalArgument {
                description: format!(
                    "value of {} utf-16 units does not fit column '{}' buffer of {} elements",
                    units.len(),
                    self.meta.query_name(),
                    data.len()
                ),
            });
        }
        data[..units.len()].copy_from_slice(&units);
        data[units.len()] = 0;
        self.meta.indicator.set_nts();
        Ok(())
    }

    /// Reads the current value as an owned UTF-8 string. Fails with [`Error::NullValue`] if the
    /// buffer is flagged null.
    pub fn text(&self) -> Result<String, Error> {
        if self.meta.indicator.is_null() {
            return Err(self.meta.null_value_error());
        }
        let data = unsafe { &*self.data.get() };
        let len = if self.meta.indicator.is_nts() || self.meta.indicator.is_no_total() {
            data.iter().position(|&u| u == 0).unwrap_or(data.len())
        } else {
            ((self.meta.indicator.cb() as usize) / size_of::<u16>()).min(data.len())
        };
        char::decode_utf16(data[..len].iter().copied())
            .collect::<Result<String, _>>()
            .map_err(|_| Error::Conversion {
                direction: ConversionDirection::FromDataSource,
            })
    }

    /// Flags the buffer value as null.
    pub fn set_null(&self) {
        self.meta.indicator.set_null()
    }

    /// `true` if the buffer value is null.
    pub fn is_null(&self) -> bool {
        self.meta.indicator.is_null()
    }

    pub(crate) fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    fn value_ptr(&self) -> Pointer {
        unsafe { (*self.data.get()).as_mut_ptr() as Pointer }
    }

    fn byte_len(&self) -> Len {
        (self.element_count() * size_of::<u16>()) as Len
    }

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        unsafe {
            stmt.bind_col(
                column_nr,
                CDataType::WChar,
                self.value_ptr(),
                self.byte_len(),
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, CDataType::WChar);
        Ok(())
    }

    /// Registers this buffer as the value of parameter marker `param_nr` (1-based) of `stmt`.
    pub fn bind_parameter(
        &self,
        stmt: &Rc<StatementHandle>,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(), Error> {
        let (sql_type, column_size, decimal_digits) =
            self.meta
                .resolve_parameter_properties(stmt, param_nr, use_describe_param)?;
        unsafe {
            stmt.bind_input_parameter(
                param_nr,
                CDataType::WChar,
                sql_type,
                column_size,
                decimal_digits,
                self.value_ptr(),
                self.byte_len(),
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, CDataType::WChar);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TextBuffer, WTextBuffer};
    use crate::buffers::{ColumnFlags, ColumnProperties};
    use crate::error::Error;

    #[test]
    fn text_roundtrip_sets_nts() {
        let buffer = TextBuffer::new("name", 10, ColumnFlags::READ, ColumnProperties::default());
        buffer.set_text("abc").unwrap();
        assert!(buffer.meta.indicator.is_nts());
        assert_eq!("abc", buffer.text().unwrap());
    }

    #[test]
    fn text_which_does_not_fit_fails() {
        let buffer = TextBuffer::new("name", 4, ColumnFlags::READ, ColumnProperties::default());
        // Four bytes of text would leave no space for the terminating zero.
        let result = buffer.set_text("abcd");
        assert!(matches!(result, Err(Error::IllegalArgument { .. })));
        // Three bytes and the terminating zero fit exactly.
        buffer.set_text("abc").unwrap();
    }

    #[test]
    fn null_text_carries_query_name() {
        let buffer = TextBuffer::new("name", 8, ColumnFlags::READ, ColumnProperties::default());
        match buffer.text() {
            Err(Error::NullValue { query_name }) => assert_eq!("name", query_name),
            other => panic!("expected null value error, got {other:?}"),
        }
    }

    #[test]
    fn wide_text_roundtrip() {
        let buffer = WTextBuffer::new("label", 6, ColumnFlags::READ, ColumnProperties::default());
        buffer.set_text("héllo").unwrap();
        assert_eq!("héllo", buffer.text().unwrap());
    }
}
