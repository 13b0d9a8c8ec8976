use std::rc::Rc;

use odbc_sys::{CDataType, Len, Pointer};

use super::{
    bind::BindingKind,
    column_buffer::{ColumnFlags, ColumnMeta, ColumnProperties},
};
use crate::{error::Error, handles::StatementHandle};

/// A buffer over client owned storage. The client declares the C type, byte length and column
/// properties of the memory it hands in; the buffer contributes the length indicator and the
/// binding bookkeeping, but never reads, writes or frees the storage itself.
///
/// Like all other column buffers it tracks its bindings and unbinds itself from every still live
/// statement when dropped.
pub struct PointerBuffer {
    data: Pointer,
    c_type: CDataType,
    buffer_length: Len,
    pub(crate) meta: ColumnMeta,
}

impl PointerBuffer {
    /// # Safety
    ///
    /// `data` must point to storage of at least `buffer_length` bytes matching `c_type`, and the
    /// storage must stay valid and pinned for as long as this buffer is bound to any statement.
    pub unsafe fn new(
        query_name: impl Into<String>,
        data: Pointer,
        c_type: CDataType,
        buffer_length: Len,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            data,
            c_type,
            buffer_length,
            meta: ColumnMeta::new(query_name, flags, properties),
        }
    }

    /// The C data type the client declared for the storage.
    pub fn c_data_type(&self) -> CDataType {
        self.c_type
    }

    /// Flags the buffer value as null.
    pub fn set_null(&self) {
        self.meta.indicator.set_null()
    }

    /// `true` if the buffer value is null.
    pub fn is_null(&self) -> bool {
        self.meta.indicator.is_null()
    }

    /// Set the length indicator to an explicit number of bytes. The client manages the storage,
    /// so it also signals how much of it is valid.
    pub fn set_cb(&self, cb: Len) {
        self.meta.indicator.set_cb(cb)
    }

    /// The current length indicator value.
    pub fn cb(&self) -> Len {
        self.meta.indicator.cb()
    }

    pub(crate) fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        unsafe {
            stmt.bind_col(
                column_nr,
                self.c_type,
                self.data,
                self.buffer_length,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, self.c_type);
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
                self.c_type,
                sql_type,
                column_size,
                decimal_digits,
                self.data,
                self.buffer_length,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, self.c_type);
        Ok(())
    }
}
