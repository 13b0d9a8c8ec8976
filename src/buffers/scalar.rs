use std::{cell::UnsafeCell, mem::size_of, rc::Rc};

use odbc_sys::{CDataType, Date, Len, Pointer, Time, Timestamp};

use super::{
    bind::BindingKind,
    column_buffer::{ColumnFlags, ColumnMeta, ColumnProperties},
};
use crate::{error::Error, handles::StatementHandle};

/// A fixed size type with a known ODBC C data type, which can be transferred between driver and
/// application without any conversion.
///
/// # Safety
///
/// `C_DATA_TYPE` must describe the memory layout of the implementing type exactly, as the driver
/// writes into buffers of this type based on it.
pub unsafe trait CFixed: Copy + Default + 'static {
    /// ODBC C data type used to bind values of this type to a statement.
    const C_DATA_TYPE: CDataType;
}

macro_rules! impl_c_fixed {
    ($t:ty, $c_data_type:expr) => {
        unsafe impl CFixed for $t {
            const C_DATA_TYPE: CDataType = $c_data_type;
        }
    };
}

impl_c_fixed!(i16, CDataType::SShort);
impl_c_fixed!(u16, CDataType::UShort);
impl_c_fixed!(i32, CDataType::SLong);
impl_c_fixed!(u32, CDataType::ULong);
impl_c_fixed!(i64, CDataType::SBigInt);
impl_c_fixed!(u64, CDataType::UBigInt);
impl_c_fixed!(f32, CDataType::Float);
impl_c_fixed!(f64, CDataType::Double);
impl_c_fixed!(Date, CDataType::TypeDate);
impl_c_fixed!(Time, CDataType::TypeTime);
impl_c_fixed!(Timestamp, CDataType::TypeTimestamp);

/// Owns a single value of a fixed size C type together with its length indicator. Can be bound
/// as the receiver of a result column or as the value of a parameter marker.
///
/// The value cell is heap allocated, so the address handed to the driver stays stable while the
/// buffer is moved. A fresh buffer is null.
pub struct ScalarBuffer<T: CFixed> {
    value: Box<UnsafeCell<T>>,
    pub(crate) meta: ColumnMeta,
}

impl<T: CFixed> ScalarBuffer<T> {
    pub fn new(
        query_name: impl Into<String>,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            value: Box::new(UnsafeCell::new(T::default())),
            meta: ColumnMeta::new(query_name, flags, properties),
        }
    }

    /// Sets the value and flags the buffer as not null.
    pub fn set_value(&self, value: T) {
        unsafe {
            *self.value.get() = value;
        }
        self.meta.indicator.set_cb(size_of::<T>() as Len);
    }

    /// Reads the current value. Fails with [`Error::NullValue`] if the buffer is flagged null.
    pub fn value(&self) -> Result<T, Error> {
        if self.meta.indicator.is_null() {
            return Err(self.meta.null_value_error());
        }
        Ok(unsafe { *self.value.get() })
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
        self.value.get() as Pointer
    }

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        unsafe {
            stmt.bind_col(
                column_nr,
                T::C_DATA_TYPE,
                self.value_ptr(),
                size_of::<T>() as Len,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, T::C_DATA_TYPE);
        Ok(())
    }

    /// Registers this buffer as the value of parameter marker `param_nr` (1-based) of `stmt`. If
    /// `use_describe_param` is set the driver is asked to describe the parameter, otherwise the
    /// properties set on this buffer are used.
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
                T::C_DATA_TYPE,
                sql_type,
                column_size,
                decimal_digits,
                self.value_ptr(),
                size_of::<T>() as Len,
                self.meta.indicator.ptr(),
            )?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, T::C_DATA_TYPE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ScalarBuffer;
    use crate::buffers::{ColumnFlags, ColumnProperties};
    use crate::error::Error;

    #[test]
    fn fresh_buffer_is_null() {
        let buffer: ScalarBuffer<i32> =
            ScalarBuffer::new("id", ColumnFlags::READ_WRITE, ColumnProperties::default());
        match buffer.value() {
            Err(Error::NullValue { query_name }) => assert_eq!("id", query_name),
            other => panic!("expected null value error, got {other:?}"),
        }
    }

    #[test]
    fn set_value_clears_null() {
        let buffer: ScalarBuffer<i64> =
            ScalarBuffer::new("b", ColumnFlags::READ_WRITE, ColumnProperties::default());
        buffer.set_value(-9_223_372_036_854_775_807);
        assert_eq!(-9_223_372_036_854_775_807, buffer.value().unwrap());
        buffer.set_null();
        assert!(buffer.value().is_err());
    }
}
