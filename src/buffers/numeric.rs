use std::{cell::UnsafeCell, mem::size_of, rc::Rc};

use odbc_sys::{CDataType, Len, Numeric, Pointer};

use super::{
    bind::BindingKind,
    column_buffer::{ColumnFlags, ColumnMeta, ColumnProperties},
};
use crate::{
    error::{assertion, Error},
    handles::StatementHandle,
};

/// Owns a single exact decimal value in the fixed `SQL_NUMERIC_STRUCT` representation the driver
/// exchanges: precision, scale, sign and a 16 byte little endian magnitude.
///
/// The ordinary bind calls do not carry precision and scale for NUMERIC, so binding additionally
/// manipulates the record of the statement's application row (or parameter) descriptor. The
/// descriptor fields must be set in the order TYPE, PRECISION, SCALE, DATA_PTR, INDICATOR_PTR,
/// OCTET_LENGTH_PTR: setting TYPE resets precision and scale, so it has to come first, and
/// setting the data pointer validates the record, so it has to come after the shape is complete.
pub struct NumericBuffer {
    value: Box<UnsafeCell<Numeric>>,
    pub(crate) meta: ColumnMeta,
}

impl NumericBuffer {
    /// `properties` must carry the column size (precision) and decimal digits (scale) of the
    /// column. They are required for binding; there is no way to transport them through the
    /// ordinary bind calls.
    pub fn new(
        query_name: impl Into<String>,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            value: Box::new(UnsafeCell::new(Numeric::default())),
            meta: ColumnMeta::new(query_name, flags, properties),
        }
    }

    /// Sets the value and flags the buffer as not null. Precision and scale of `value` are
    /// preserved exactly as given.
    pub fn set_value(&self, value: Numeric) {
        unsafe {
            *self.value.get() = value;
        }
        self.meta.indicator.set_cb(size_of::<Numeric>() as Len);
    }

    /// Reads the current value. Fails with [`Error::NullValue`] if the buffer is flagged null.
    pub fn value(&self) -> Result<Numeric, Error> {
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
    /// produced on `stmt`, fixing up the application row descriptor with precision and scale.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        let properties = self.meta.properties();
        assertion!(
            properties.column_size > 0,
            format!(
                "column size (precision) must be set to bind NUMERIC column '{}'",
                self.meta.query_name()
            )
        );
        assertion!(
            properties.decimal_digits >= 0,
            format!(
                "decimal digits (scale) must not be negative for NUMERIC column '{}'",
                self.meta.query_name()
            )
        );

        let mut ard = stmt.application_row_descriptor()?;
        let rec = column_nr as i16;
        unsafe {
            ard.set_type(rec, CDataType::Numeric)?;
            ard.set_precision(rec, properties.column_size as i16)?;
            ard.set_scale(rec, properties.decimal_digits)?;
            ard.set_data_ptr(rec, self.value_ptr())?;
            ard.set_indicator_ptr(rec, self.meta.indicator.ptr())?;
            ard.set_octet_length_ptr(rec, self.meta.indicator.ptr())?;
        }
        self.meta
            .bindings
            .register(stmt, column_nr, BindingKind::Column, CDataType::Numeric);
        Ok(())
    }

    /// Registers this buffer as the value of parameter marker `param_nr` (1-based) of `stmt`.
    pub fn bind_parameter(
        &self,
        stmt: &Rc<StatementHandle>,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(), Error> {
        if !use_describe_param {
            let properties = self.meta.properties();
            assertion!(
                properties.column_size > 0,
                format!(
                    "column size (precision) must be set to bind NUMERIC column '{}'",
                    self.meta.query_name()
                )
            );
            assertion!(
                properties.decimal_digits >= 0,
                format!(
                    "decimal digits (scale) must not be negative for NUMERIC column '{}'",
                    self.meta.query_name()
                )
            );
        }
        let (sql_type, column_size, decimal_digits) =
            self.meta
                .resolve_parameter_properties(stmt, param_nr, use_describe_param)?;
        unsafe {
            stmt.bind_input_parameter(
                param_nr,
                CDataType::Numeric,
                sql_type,
                column_size,
                decimal_digits,
                self.value_ptr(),
                size_of::<Numeric>() as Len,
                self.meta.indicator.ptr(),
            )?;
        }

        // The bind call transports precision and scale only as column properties. The descriptor
        // record needs them as well, otherwise the driver reads the value with default precision.
        let mut apd = stmt.application_param_descriptor()?;
        let rec = param_nr as i16;
        unsafe {
            apd.set_type(rec, CDataType::Numeric)?;
            apd.set_precision(rec, column_size as i16)?;
            apd.set_scale(rec, decimal_digits)?;
            apd.set_data_ptr(rec, self.value_ptr())?;
            apd.set_indicator_ptr(rec, self.meta.indicator.ptr())?;
            apd.set_octet_length_ptr(rec, self.meta.indicator.ptr())?;
        }
        self.meta
            .bindings
            .register(stmt, param_nr, BindingKind::Parameter, CDataType::Numeric);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use odbc_sys::Numeric;

    use super::NumericBuffer;
    use crate::buffers::{ColumnFlags, ColumnProperties};

    #[test]
    fn value_preserves_precision_and_scale() {
        let buffer = NumericBuffer::new(
            "amount",
            ColumnFlags::READ_WRITE,
            ColumnProperties {
                sql_type: Some(odbc_sys::SqlDataType::NUMERIC),
                column_size: 18,
                decimal_digits: 10,
            },
        );
        let mut value = Numeric::default();
        value.precision = 18;
        value.scale = 10;
        value.sign = 1;
        value.val[0] = 42;
        buffer.set_value(value);
        let read_back = buffer.value().unwrap();
        assert_eq!(18, read_back.precision);
        assert_eq!(10, read_back.scale);
        assert_eq!(1, read_back.sign);
        assert_eq!(42, read_back.val[0]);
    }
}
