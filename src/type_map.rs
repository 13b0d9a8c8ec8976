use odbc_sys::SqlDataType;

use crate::{buffers::BufferKind, handles::OdbcVersion};

/// Policy mapping the SQL type of a column to the C type family its values are buffered in.
///
/// A map is injected into a database before tables are opened. Tables consult it when they
/// auto-create column buffers from catalog information. Implement this to override the buffer
/// types picked for particular SQL types.
pub trait Sql2BufferTypeMap {
    /// The buffer kind used to hold values of `sql_type`, or `None` if no mapping exists.
    fn buffer_kind(&self, sql_type: SqlDataType) -> Option<BufferKind>;
}

/// The default mapping, keyed to the effective ODBC version of the connection.
///
/// Exact decimals map to the NUMERIC struct buffer, strings to character arrays, and the date,
/// time and timestamp types to their fixed structs. Wide character types are only mapped for
/// ODBC 3.0 and later; version 2 drivers do not know them.
pub struct DefaultSql2BufferMap {
    version: OdbcVersion,
}

impl DefaultSql2BufferMap {
    pub fn new(version: OdbcVersion) -> Self {
        Self { version }
    }
}

impl Sql2BufferTypeMap for DefaultSql2BufferMap {
    fn buffer_kind(&self, sql_type: SqlDataType) -> Option<BufferKind> {
        match sql_type {
            SqlDataType::SMALLINT | SqlDataType::EXT_TINY_INT => Some(BufferKind::I16),
            SqlDataType::INTEGER => Some(BufferKind::I32),
            SqlDataType::EXT_BIG_INT => Some(BufferKind::I64),
            SqlDataType::REAL => Some(BufferKind::F32),
            SqlDataType::DOUBLE | SqlDataType::FLOAT => Some(BufferKind::F64),
            SqlDataType::NUMERIC | SqlDataType::DECIMAL => Some(BufferKind::Numeric),
            SqlDataType::CHAR | SqlDataType::VARCHAR | SqlDataType::EXT_LONG_VARCHAR => {
                Some(BufferKind::Text)
            }
            SqlDataType::EXT_W_CHAR
            | SqlDataType::EXT_W_VARCHAR
            | SqlDataType::EXT_W_LONG_VARCHAR => {
                if self.version >= OdbcVersion::V3 {
                    Some(BufferKind::WText)
                } else {
                    Some(BufferKind::Text)
                }
            }
            SqlDataType::DATE | SqlDataType::DATETIME => Some(BufferKind::Date),
            SqlDataType::TIME | SqlDataType::EXT_TIME_OR_INTERVAL => Some(BufferKind::Time),
            SqlDataType::TIMESTAMP | SqlDataType::EXT_TIMESTAMP => Some(BufferKind::Timestamp),
            SqlDataType::EXT_BINARY
            | SqlDataType::EXT_VAR_BINARY
            | SqlDataType::EXT_LONG_VAR_BINARY => Some(BufferKind::Binary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use odbc_sys::SqlDataType;
    use test_case::test_case;

    use super::{DefaultSql2BufferMap, Sql2BufferTypeMap};
    use crate::{buffers::BufferKind, handles::OdbcVersion};

    #[test_case(SqlDataType::SMALLINT, BufferKind::I16; "smallint")]
    #[test_case(SqlDataType::INTEGER, BufferKind::I32; "integer")]
    #[test_case(SqlDataType::EXT_BIG_INT, BufferKind::I64; "bigint")]
    #[test_case(SqlDataType::REAL, BufferKind::F32; "real")]
    #[test_case(SqlDataType::DOUBLE, BufferKind::F64; "double")]
    #[test_case(SqlDataType::NUMERIC, BufferKind::Numeric; "numeric")]
    #[test_case(SqlDataType::DECIMAL, BufferKind::Numeric; "decimal")]
    #[test_case(SqlDataType::VARCHAR, BufferKind::Text; "varchar")]
    #[test_case(SqlDataType::EXT_W_VARCHAR, BufferKind::WText; "wvarchar")]
    #[test_case(SqlDataType::DATE, BufferKind::Date; "date")]
    #[test_case(SqlDataType::TIME, BufferKind::Time; "time")]
    #[test_case(SqlDataType::TIMESTAMP, BufferKind::Timestamp; "timestamp")]
    #[test_case(SqlDataType::EXT_VAR_BINARY, BufferKind::Binary; "varbinary")]
    fn default_map_for_odbc_3_8(sql_type: SqlDataType, expected: BufferKind) {
        let map = DefaultSql2BufferMap::new(OdbcVersion::V3_8);
        assert_eq!(Some(expected), map.buffer_kind(sql_type));
    }

    #[test]
    fn wide_characters_narrow_under_odbc_2() {
        let map = DefaultSql2BufferMap::new(OdbcVersion::V2);
        assert_eq!(
            Some(BufferKind::Text),
            map.buffer_kind(SqlDataType::EXT_W_VARCHAR)
        );
    }

    #[test]
    fn unknown_types_are_not_mapped() {
        let map = DefaultSql2BufferMap::new(OdbcVersion::V3_8);
        assert_eq!(None, map.buffer_kind(SqlDataType::EXT_GUID));
    }
}
