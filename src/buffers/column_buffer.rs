use std::{
    cell::Cell,
    fmt,
    ops::{BitOr, BitOrAssign},
    rc::Rc,
};

use odbc_sys::{CDataType, Len, Nullability, SqlDataType};

use super::{
    binary::BinaryBuffer,
    bind::SharedBindings,
    indicator::LengthIndicator,
    numeric::NumericBuffer,
    pointer::PointerBuffer,
    scalar::ScalarBuffer,
    text::{TextBuffer, WTextBuffer},
};
use crate::{
    error::{assertion, Error},
    handles::StatementHandle,
};

/// Flags describing how a column participates in the statements generated for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnFlags(u16);

impl ColumnFlags {
    pub const NONE: ColumnFlags = ColumnFlags(0);
    /// Include the column in selects.
    pub const SELECT: ColumnFlags = ColumnFlags(0x1);
    /// Include the column in updates.
    pub const UPDATE: ColumnFlags = ColumnFlags(0x2);
    /// Include the column in inserts.
    pub const INSERT: ColumnFlags = ColumnFlags(0x4);
    /// The column is nullable.
    pub const NULLABLE: ColumnFlags = ColumnFlags(0x8);
    /// The column is part of the primary key.
    pub const PRIMARY_KEY: ColumnFlags = ColumnFlags(0x10);

    pub const READ: ColumnFlags = ColumnFlags(Self::SELECT.0);
    pub const WRITE: ColumnFlags = ColumnFlags(Self::UPDATE.0 | Self::INSERT.0);
    pub const READ_WRITE: ColumnFlags =
        ColumnFlags(Self::SELECT.0 | Self::UPDATE.0 | Self::INSERT.0);

    /// `true` if all flags in `other` are set in `self`.
    pub fn contains(self, other: ColumnFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ColumnFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ColumnFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for ColumnFlags {
    type Output = ColumnFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ColumnFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ColumnFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// SQL type properties of a column. Required for NUMERIC columns, and for parameter binding
/// against drivers which cannot describe parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnProperties {
    /// SQL type of the column in the data source. Must be known to bind the buffer as a
    /// parameter without asking the driver to describe it.
    pub sql_type: Option<SqlDataType>,
    /// Size of the column: character count for strings, precision for exact numeric types.
    pub column_size: usize,
    /// Decimal digits of the column: scale for exact numeric types.
    pub decimal_digits: i16,
}

/// State shared by all column buffer variants: query name, flags, properties, the length
/// indicator and the binding registry.
pub(crate) struct ColumnMeta {
    query_name: String,
    flags: Cell<ColumnFlags>,
    properties: Cell<ColumnProperties>,
    pub(crate) indicator: LengthIndicator,
    pub(crate) bindings: Rc<SharedBindings>,
}

impl ColumnMeta {
    pub fn new(
        query_name: impl Into<String>,
        flags: ColumnFlags,
        properties: ColumnProperties,
    ) -> Self {
        Self {
            query_name: query_name.into(),
            flags: Cell::new(flags),
            properties: Cell::new(properties),
            indicator: LengthIndicator::new(),
            bindings: SharedBindings::new(),
        }
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags.get()
    }

    pub fn set_flags(&self, flags: ColumnFlags) {
        self.flags.set(flags)
    }

    pub fn properties(&self) -> ColumnProperties {
        self.properties.get()
    }

    pub fn set_properties(&self, properties: ColumnProperties) {
        self.properties.set(properties)
    }

    pub fn null_value_error(&self) -> Error {
        Error::NullValue {
            query_name: self.query_name.clone(),
        }
    }

    /// Determines SQL type, column size and decimal digits for a parameter binding. Either the
    /// driver describes the parameter, or the properties set on the buffer are used. Verifies
    /// that a column flagged nullable is not bound to a parameter the driver reports as not
    /// nullable.
    pub fn resolve_parameter_properties(
        &self,
        stmt: &StatementHandle,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(SqlDataType, usize, i16), Error> {
        if use_describe_param {
            let description = stmt.describe_param(param_nr)?;
            if self.flags().contains(ColumnFlags::NULLABLE)
                && description.nullability == Nullability::NO_NULLS
            {
                return Err(Error::IllegalArgument {
                    description: format!(
                        "column '{}' is flagged nullable, but the driver reports parameter {} \
                         as not nullable",
                        self.query_name, param_nr
                    ),
                });
            }
            Ok((
                description.sql_type,
                description.column_size,
                description.decimal_digits,
            ))
        } else {
            let properties = self.properties();
            assertion!(
                properties.sql_type.is_some(),
                format!(
                    "the SQL type of column '{}' must be known to bind it as a parameter",
                    self.query_name
                )
            );
            Ok((
                properties.sql_type.unwrap(),
                properties.column_size,
                properties.decimal_digits,
            ))
        }
    }
}

/// The family of C types a column buffer stores its values in. A
/// [`crate::Sql2BufferTypeMap`] picks one of these for every SQL type it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Date,
    Time,
    Timestamp,
    Numeric,
    Text,
    WText,
    Binary,
}

/// A column buffer: host memory for a single value, its length indicator, column flags and
/// properties, plus the bookkeeping of every statement it is currently bound to.
///
/// One variant exists per C type family. Operations common to all variants are available
/// directly on this type; value access goes through the `as_*` accessors, as the stored type is
/// only known to the caller.
pub enum ColumnBuffer {
    SmallInt(ScalarBuffer<i16>),
    USmallInt(ScalarBuffer<u16>),
    Integer(ScalarBuffer<i32>),
    UInteger(ScalarBuffer<u32>),
    BigInt(ScalarBuffer<i64>),
    UBigInt(ScalarBuffer<u64>),
    Real(ScalarBuffer<f32>),
    Double(ScalarBuffer<f64>),
    Date(ScalarBuffer<odbc_sys::Date>),
    Time(ScalarBuffer<odbc_sys::Time>),
    Timestamp(ScalarBuffer<odbc_sys::Timestamp>),
    Numeric(NumericBuffer),
    Text(TextBuffer),
    WText(WTextBuffer),
    Binary(BinaryBuffer),
    Pointer(PointerBuffer),
}

macro_rules! dispatch {
    ($self:expr, $buf:pat => $body:expr) => {
        match $self {
            ColumnBuffer::SmallInt($buf) => $body,
            ColumnBuffer::USmallInt($buf) => $body,
            ColumnBuffer::Integer($buf) => $body,
            ColumnBuffer::UInteger($buf) => $body,
            ColumnBuffer::BigInt($buf) => $body,
            ColumnBuffer::UBigInt($buf) => $body,
            ColumnBuffer::Real($buf) => $body,
            ColumnBuffer::Double($buf) => $body,
            ColumnBuffer::Date($buf) => $body,
            ColumnBuffer::Time($buf) => $body,
            ColumnBuffer::Timestamp($buf) => $body,
            ColumnBuffer::Numeric($buf) => $body,
            ColumnBuffer::Text($buf) => $body,
            ColumnBuffer::WText($buf) => $body,
            ColumnBuffer::Binary($buf) => $body,
            ColumnBuffer::Pointer($buf) => $body,
        }
    };
}

impl ColumnBuffer {
    /// Creates a buffer of the variant matching `kind`. `element_count` is only relevant for the
    /// array kinds and includes the space for a terminating zero.
    pub fn from_buffer_kind(
        kind: BufferKind,
        query_name: impl Into<String>,
        flags: ColumnFlags,
        properties: ColumnProperties,
        element_count: usize,
    ) -> Self {
        let query_name = query_name.into();
        match kind {
            BufferKind::I16 => {
                ColumnBuffer::SmallInt(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::U16 => {
                ColumnBuffer::USmallInt(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::I32 => {
                ColumnBuffer::Integer(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::U32 => {
                ColumnBuffer::UInteger(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::I64 => {
                ColumnBuffer::BigInt(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::U64 => {
                ColumnBuffer::UBigInt(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::F32 => ColumnBuffer::Real(ScalarBuffer::new(query_name, flags, properties)),
            BufferKind::F64 => {
                ColumnBuffer::Double(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::Date => {
                ColumnBuffer::Date(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::Time => {
                ColumnBuffer::Time(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::Timestamp => {
                ColumnBuffer::Timestamp(ScalarBuffer::new(query_name, flags, properties))
            }
            BufferKind::Numeric => {
                ColumnBuffer::Numeric(NumericBuffer::new(query_name, flags, properties))
            }
            BufferKind::Text => {
                ColumnBuffer::Text(TextBuffer::new(query_name, element_count, flags, properties))
            }
            BufferKind::WText => ColumnBuffer::WText(WTextBuffer::new(
                query_name,
                element_count,
                flags,
                properties,
            )),
            BufferKind::Binary => ColumnBuffer::Binary(BinaryBuffer::new(
                query_name,
                element_count,
                flags,
                properties,
            )),
        }
    }

    pub(crate) fn meta(&self) -> &ColumnMeta {
        dispatch!(self, buf => buf.meta())
    }

    /// The identifier by which this column is referred to in generated SQL.
    pub fn query_name(&self) -> &str {
        self.meta().query_name()
    }

    pub fn flags(&self) -> ColumnFlags {
        self.meta().flags()
    }

    pub fn set_flags(&self, flags: ColumnFlags) {
        self.meta().set_flags(flags)
    }

    pub fn properties(&self) -> ColumnProperties {
        self.meta().properties()
    }

    pub fn set_properties(&self, properties: ColumnProperties) {
        self.meta().set_properties(properties)
    }

    /// Flags the buffer value as null.
    pub fn set_null(&self) {
        self.meta().indicator.set_null()
    }

    /// `true` if the buffer value is null.
    pub fn is_null(&self) -> bool {
        self.meta().indicator.is_null()
    }

    /// The current length indicator value.
    pub fn cb(&self) -> Len {
        self.meta().indicator.cb()
    }

    /// Set the length indicator to an explicit number of bytes.
    pub fn set_cb(&self, cb: Len) {
        self.meta().indicator.set_cb(cb)
    }

    /// `true` if this buffer is currently bound to at least one statement.
    pub fn is_bound(&self) -> bool {
        self.meta().bindings.is_bound()
    }

    /// The ODBC C data type values of this buffer are exchanged as.
    pub fn c_data_type(&self) -> CDataType {
        match self {
            ColumnBuffer::SmallInt(_) => CDataType::SShort,
            ColumnBuffer::USmallInt(_) => CDataType::UShort,
            ColumnBuffer::Integer(_) => CDataType::SLong,
            ColumnBuffer::UInteger(_) => CDataType::ULong,
            ColumnBuffer::BigInt(_) => CDataType::SBigInt,
            ColumnBuffer::UBigInt(_) => CDataType::UBigInt,
            ColumnBuffer::Real(_) => CDataType::Float,
            ColumnBuffer::Double(_) => CDataType::Double,
            ColumnBuffer::Date(_) => CDataType::TypeDate,
            ColumnBuffer::Time(_) => CDataType::TypeTime,
            ColumnBuffer::Timestamp(_) => CDataType::TypeTimestamp,
            ColumnBuffer::Numeric(_) => CDataType::Numeric,
            ColumnBuffer::Text(_) => CDataType::Char,
            ColumnBuffer::WText(_) => CDataType::WChar,
            ColumnBuffer::Binary(_) => CDataType::Binary,
            ColumnBuffer::Pointer(buffer) => buffer.c_data_type(),
        }
    }

    /// Registers this buffer as the receiver of column `column_nr` (1-based) of the result sets
    /// produced on `stmt`.
    pub fn bind_select(&self, stmt: &Rc<StatementHandle>, column_nr: u16) -> Result<(), Error> {
        dispatch!(self, buf => buf.bind_select(stmt, column_nr))
    }

    /// Registers this buffer as the value of parameter marker `param_nr` (1-based) of `stmt`.
    pub fn bind_parameter(
        &self,
        stmt: &Rc<StatementHandle>,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(), Error> {
        dispatch!(self, buf => buf.bind_parameter(stmt, param_nr, use_describe_param))
    }

    pub fn as_i16(&self) -> Option<&ScalarBuffer<i16>> {
        match self {
            ColumnBuffer::SmallInt(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<&ScalarBuffer<u16>> {
        match self {
            ColumnBuffer::USmallInt(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&ScalarBuffer<i32>> {
        match self {
            ColumnBuffer::Integer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&ScalarBuffer<u32>> {
        match self {
            ColumnBuffer::UInteger(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ScalarBuffer<i64>> {
        match self {
            ColumnBuffer::BigInt(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<&ScalarBuffer<u64>> {
        match self {
            ColumnBuffer::UBigInt(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&ScalarBuffer<f32>> {
        match self {
            ColumnBuffer::Real(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ScalarBuffer<f64>> {
        match self {
            ColumnBuffer::Double(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&ScalarBuffer<odbc_sys::Date>> {
        match self {
            ColumnBuffer::Date(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&ScalarBuffer<odbc_sys::Time>> {
        match self {
            ColumnBuffer::Time(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&ScalarBuffer<odbc_sys::Timestamp>> {
        match self {
            ColumnBuffer::Timestamp(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&NumericBuffer> {
        match self {
            ColumnBuffer::Numeric(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextBuffer> {
        match self {
            ColumnBuffer::Text(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_wtext(&self) -> Option<&WTextBuffer> {
        match self {
            ColumnBuffer::WText(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryBuffer> {
        match self {
            ColumnBuffer::Binary(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerBuffer> {
        match self {
            ColumnBuffer::Pointer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl fmt::Debug for ColumnBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBuffer")
            .field("query_name", &self.query_name())
            .field("c_data_type", &self.c_data_type())
            .field("is_null", &self.is_null())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferKind, ColumnBuffer, ColumnFlags, ColumnProperties};

    #[test]
    fn flag_combinations() {
        let mut flags = ColumnFlags::READ;
        assert!(flags.contains(ColumnFlags::SELECT));
        assert!(!flags.contains(ColumnFlags::UPDATE));
        flags.insert(ColumnFlags::PRIMARY_KEY);
        assert!(flags.contains(ColumnFlags::SELECT | ColumnFlags::PRIMARY_KEY));
        flags.remove(ColumnFlags::SELECT);
        assert!(!flags.contains(ColumnFlags::SELECT));
        assert!(flags.contains(ColumnFlags::PRIMARY_KEY));
    }

    #[test]
    fn read_write_implies_all_row_operations() {
        let flags = ColumnFlags::READ_WRITE;
        assert!(flags.contains(ColumnFlags::SELECT));
        assert!(flags.contains(ColumnFlags::UPDATE));
        assert!(flags.contains(ColumnFlags::INSERT));
        assert!(!flags.contains(ColumnFlags::PRIMARY_KEY));
    }

    #[test]
    fn buffer_kind_constructs_matching_variant() {
        let buffer = ColumnBuffer::from_buffer_kind(
            BufferKind::I32,
            "id",
            ColumnFlags::READ_WRITE,
            ColumnProperties::default(),
            0,
        );
        assert!(buffer.as_i32().is_some());
        assert!(buffer.as_i64().is_none());
        assert_eq!("id", buffer.query_name());

        let buffer = ColumnBuffer::from_buffer_kind(
            BufferKind::WText,
            "label",
            ColumnFlags::READ,
            ColumnProperties::default(),
            6,
        );
        assert_eq!(6, buffer.as_wtext().unwrap().element_count());
    }
}
