use std::{cell::UnsafeCell, rc::Rc};

use odbc_sys::{CDataType, Len, Pointer};

use super::{
    bind::BindingKind,
    column_buffer::{ColumnFlags, ColumnMeta, ColumnProperties},
};
use crate::{error::Error, handles::StatementHandle};

/// Byte array buffer bound with `SQL_C_BINARY`. Holds a fixed number of bytes.
pub struct BinaryBuffer {
    data: UnsafeCell<Vec<u8>>,
    pub(crate) meta: ColumnMeta,
}

impl BinaryBuffer {
    /// Creates a buffer able to hold `element_count` bytes.
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

    /// Number of bytes this buffer was constructed with.
    pub fn element_count(&self) -> usize {
        unsafe { (*self.data.get()).len() }
    }

    /// Copies `bytes` into the buffer and sets the length indicator accordingly. Fails if the
    /// value does not fit the buffer.
    pub fn set_bytes(&self, bytes: &[u8]) -> Result<(), Error> {
        let data = unsafe { &mut *self.data.get() };
        if bytes.len() > data.len() {
            return Err(Error::IllegalArgument {
                description: format!(
                    "value of {} bytes does not fit column '{}' buffer of {} bytes",
                    bytes.len(),
                    self.meta.query_name(),
                    data.len()
                ),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        self.meta.indicator.set_cb(bytes.len() as Len);
        Ok(())
    }

    /// Reads the current value. The returned slice is as long as the length indicator reports.
    /// Fails with [`Error::NullValue`] if the buffer is flagged null.
    pub fn bytes(&self) -> Result<Vec<u8>, Error> {
        if self.meta.indicator.is_null() {
            return Err(self.meta.null_value_error());
        }
        let data = unsafe { &*self.data.get() };
        let len = if self.meta.indicator.is_no_total() {
            data.len()
        } else {
            (self.meta.indicator.cb() as usize).min(data.len())
        };
        Ok(data[..len].to_vec())
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

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        unsafe {
            stmt.bind_col(
                column_nr,
                CDataType::Binary,
                self.value_ptr(),
                self.element_count() as Len,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, CDataType::Binary);
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
                CDataType::Binary,
                sql_type,
                column_size,
                decimal_digits,
                self.value_ptr(),
                self.element_count() as Len,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, CDataType::Binary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::BinaryBuffer;
    use crate::buffers::{ColumnFlags, ColumnProperties};
    use crate::error::Error;

    #[test]
    fn bytes_roundtrip() {
        let buffer = BinaryBuffer::new("blob", 8, ColumnFlags::READ, ColumnProperties::default());
        buffer.set_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(vec![1, 2, 3], buffer.bytes().unwrap());
    }

    #[test]
    fn overlong_value_fails() {
        let buffer = BinaryBuffer::new("blob", 2, ColumnFlags::READ, ColumnProperties::default());
        assert!(matches!(
            buffer.set_bytes(&[1, 2, 3]),
            Err(Error::IllegalArgument { .. })
        ));
    }
}
