//! Catalog queries and the row value types parsed from their result sets.
//!
//! All queries run on the statement a database dedicates to catalog work. Each query closes a
//! pre-existing cursor on that statement first and closes its own cursor on exit, so catalog
//! queries never interfere with each other or leave result sets behind.

use odbc_sys::SqlDataType;

use crate::{
    database::Database,
    error::{assertion, Error},
    handles::StatementHandle,
};

/// Indication of whether a column may hold null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nullability {
    #[default]
    Unknown,
    NoNulls,
    Nullable,
}

impl Nullability {
    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => Nullability::NoNulls,
            1 => Nullability::Nullable,
            _ => Nullability::Unknown,
        }
    }

    /// `false` if and only if the column is known not to hold nulls.
    pub fn could_be_nullable(self) -> bool {
        !matches!(self, Nullability::NoNulls)
    }
}

/// A table as listed by the data source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
    /// Table type, e.g. `TABLE`, `VIEW` or `SYSTEM TABLE`.
    pub table_type: String,
    pub remarks: Option<String>,
}

impl TableInfo {
    /// The identifier used to refer to this table in generated SQL. Qualified with schema and
    /// catalog as far as the catalog reported them.
    pub fn query_name(&self) -> String {
        match (&self.catalog, &self.schema) {
            (Some(catalog), Some(schema)) => format!("{catalog}.{schema}.{}", self.name),
            (None, Some(schema)) => format!("{schema}.{}", self.name),
            // Spreadsheet drivers qualify tables by catalog only.
            (Some(catalog), None) => format!("{catalog}.{}", self.name),
            (None, None) => self.name.clone(),
        }
    }
}

/// A column of a table as listed by the data source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table_name: String,
    pub name: String,
    /// Concise SQL type code of the column.
    pub sql_type: SqlDataType,
    pub type_name: String,
    pub column_size: Option<i32>,
    pub buffer_length: Option<i32>,
    pub decimal_digits: Option<i16>,
    pub num_prec_radix: Option<i16>,
    pub nullability: Nullability,
    pub remarks: Option<String>,
    pub default_value: Option<String>,
    /// Non concise SQL type code, differing from `sql_type` for datetime types.
    pub sql_data_type: i16,
    pub sql_datetime_sub: Option<i16>,
    pub char_octet_length: Option<i32>,
    /// 1-based position of the column in the table.
    pub ordinal_position: i32,
    pub is_nullable: Option<String>,
}

impl ColumnInfo {
    /// The identifier used to refer to this column in generated SQL.
    pub fn query_name(&self) -> &str {
        &self.name
    }
}

/// A primary key column as listed by the data source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table_name: String,
    pub column_name: String,
    /// 1-based position of the column within the primary key.
    pub key_sequence: i16,
    pub primary_key_name: Option<String>,
}

/// A privilege granted on a table, as listed by the data source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table_name: String,
    pub grantor: Option<String>,
    pub grantee: String,
    /// Privilege name, e.g. `SELECT`, `INSERT`, `UPDATE`, `DELETE` or `REFERENCES`.
    pub privilege: String,
    pub is_grantable: Option<String>,
}

/// Identifier kinds `SQLSpecialColumns` can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdentifierType {
    /// Columns which uniquely identify a row (`SQL_BEST_ROWID`).
    BestRowId,
    /// Columns automatically updated when any value of the row changes (`SQL_ROWVER`).
    RowVersion,
}

impl RowIdentifierType {
    fn as_raw(self) -> i16 {
        match self {
            RowIdentifierType::BestRowId => 1,
            RowIdentifierType::RowVersion => 2,
        }
    }
}

/// Minimum required scope of a row identifier (`SQL_SCOPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIdentifierScope {
    CurrentRow,
    Transaction,
    Session,
}

impl RowIdentifierScope {
    fn as_raw(self) -> i16 {
        match self {
            RowIdentifierScope::CurrentRow => 0,
            RowIdentifierScope::Transaction => 1,
            RowIdentifierScope::Session => 2,
        }
    }
}

/// A special (row identifying) column as listed by the data source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialColumnInfo {
    pub scope: Option<i16>,
    pub column_name: String,
    pub sql_type: SqlDataType,
    pub type_name: String,
    pub column_size: Option<i32>,
    pub buffer_length: Option<i32>,
    pub decimal_digits: Option<i16>,
    /// Whether the column is a pseudo column like Oracle `ROWID` (`SQL_PC_*`).
    pub pseudo_column: Option<i16>,
}

/// One SQL type supported by the data source, as reported by `SQLGetTypeInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTypeInfo {
    pub type_name: String,
    pub sql_type: i16,
    pub column_size: Option<i32>,
    pub literal_prefix: Option<String>,
    pub literal_suffix: Option<String>,
    pub create_params: Option<String>,
    pub nullability: Nullability,
    pub case_sensitive: bool,
    pub searchable: i16,
    pub unsigned_attribute: Option<i16>,
    pub fixed_prec_scale: bool,
    pub auto_unique_value: Option<i16>,
    pub local_type_name: Option<String>,
    pub minimum_scale: Option<i16>,
    pub maximum_scale: Option<i16>,
    pub sql_data_type: i16,
    pub sql_datetime_sub: Option<i16>,
    pub num_prec_radix: Option<i32>,
    pub interval_precision: Option<i16>,
}

/// Closes the cursor of the guarded statement when leaving scope, logging instead of failing.
struct CursorGuard<'a> {
    stmt: &'a StatementHandle,
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.stmt.close_cursor() {
            log::warn!("Failed to close catalog cursor: {error}");
        }
    }
}

/// Reads the complete list of SQL type infos from the driver.
pub(crate) fn read_sql_type_infos_on(stmt: &StatementHandle) -> Result<Vec<SqlTypeInfo>, Error> {
    stmt.close_cursor()?;
    let _guard = CursorGuard { stmt };
    // SQL_ALL_TYPES shares the value of the unknown type code.
    stmt.type_info(SqlDataType::UNKNOWN_TYPE)?;
    let mut out = Vec::new();
    while stmt.fetch()? {
        out.push(SqlTypeInfo {
            type_name: stmt.get_data_text(1)?.unwrap_or_default(),
            sql_type: stmt.get_data_i16(2)?.unwrap_or(0),
            column_size: stmt.get_data_i32(3)?,
            literal_prefix: stmt.get_data_text(4)?,
            literal_suffix: stmt.get_data_text(5)?,
            create_params: stmt.get_data_text(6)?,
            nullability: Nullability::from_raw(stmt.get_data_i16(7)?.unwrap_or(2)),
            case_sensitive: stmt.get_data_i16(8)?.unwrap_or(0) != 0,
            searchable: stmt.get_data_i16(9)?.unwrap_or(0),
            unsigned_attribute: stmt.get_data_i16(10)?,
            fixed_prec_scale: stmt.get_data_i16(11)?.unwrap_or(0) != 0,
            auto_unique_value: stmt.get_data_i16(12)?,
            local_type_name: stmt.get_data_text(13)?,
            minimum_scale: stmt.get_data_i16(14)?,
            maximum_scale: stmt.get_data_i16(15)?,
            sql_data_type: stmt.get_data_i16(16)?.unwrap_or(0),
            sql_datetime_sub: stmt.get_data_i16(17)?,
            num_prec_radix: stmt.get_data_i32(18)?,
            interval_precision: stmt.get_data_i16(19)?,
        });
    }
    Ok(out)
}

/// The catalog query surface of a [`Database`].
///
/// Name and pattern arguments follow the ODBC conventions: `None` does not restrict the result
/// set, empty strings match only empty values. Schema and table names are pattern value
/// arguments (SQL wildcards permitted), catalog names are ordinary identifiers.
impl Database {
    /// Searches the tables of the data source.
    pub fn read_tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<Vec<TableInfo>, Error> {
        let stmt = self.catalog_statement()?;
        stmt.close_cursor()?;
        let _guard = CursorGuard { stmt: &stmt };
        stmt.tables(catalog, schema, table, table_type)?;
        let mut out = Vec::new();
        while stmt.fetch()? {
            out.push(TableInfo {
                catalog: stmt.get_data_text(1)?,
                schema: stmt.get_data_text(2)?,
                name: stmt.get_data_text(3)?.unwrap_or_default(),
                table_type: stmt.get_data_text(4)?.unwrap_or_default(),
                remarks: stmt.get_data_text(5)?,
            });
        }
        Ok(out)
    }

    /// Searches for exactly one table. Fails with [`Error::TableNotFound`] if no table matches
    /// and with [`Error::TableNotUnique`] if more than one does. This is how tables resolve
    /// their target on open.
    pub fn find_one_table(
        &self,
        name: &str,
        schema: Option<&str>,
        catalog: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<TableInfo, Error> {
        let mut matches = self.read_tables(catalog, schema, Some(name), table_type)?;
        match matches.len() {
            0 => Err(Error::TableNotFound {
                table: name.to_owned(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(Error::TableNotUnique {
                table: name.to_owned(),
                count,
            }),
        }
    }

    /// Reads the columns of `table`, ordered by ordinal position. Fails if the catalog returns
    /// positions with gaps; consumers rely on the result being exactly columns 1..=N.
    pub fn read_table_column_info(&self, table: &TableInfo) -> Result<Vec<ColumnInfo>, Error> {
        let stmt = self.catalog_statement()?;
        stmt.close_cursor()?;
        let _guard = CursorGuard { stmt: &stmt };
        stmt.columns(
            table.catalog.as_deref(),
            table.schema.as_deref(),
            Some(&table.name),
            None,
        )?;
        let mut out: Vec<ColumnInfo> = Vec::new();
        while stmt.fetch()? {
            let info = ColumnInfo {
                catalog: stmt.get_data_text(1)?,
                schema: stmt.get_data_text(2)?,
                table_name: stmt.get_data_text(3)?.unwrap_or_default(),
                name: stmt.get_data_text(4)?.unwrap_or_default(),
                sql_type: SqlDataType(stmt.get_data_i16(5)?.unwrap_or(0)),
                type_name: stmt.get_data_text(6)?.unwrap_or_default(),
                column_size: stmt.get_data_i32(7)?,
                buffer_length: stmt.get_data_i32(8)?,
                decimal_digits: stmt.get_data_i16(9)?,
                num_prec_radix: stmt.get_data_i16(10)?,
                nullability: Nullability::from_raw(stmt.get_data_i16(11)?.unwrap_or(2)),
                remarks: stmt.get_data_text(12)?,
                default_value: stmt.get_data_text(13)?,
                sql_data_type: stmt.get_data_i16(14)?.unwrap_or(0),
                sql_datetime_sub: stmt.get_data_i16(15)?,
                char_octet_length: stmt.get_data_i32(16)?,
                ordinal_position: stmt.get_data_i32(17)?.unwrap_or(0),
                is_nullable: stmt.get_data_text(18)?,
            };
            let expected = out.len() as i32 + 1;
            assertion!(
                info.ordinal_position == expected,
                format!(
                    "catalog returned column '{}' of table '{}' at ordinal position {}, \
                     expected {}",
                    info.name,
                    table.name,
                    info.ordinal_position,
                    expected
                )
            );
            out.push(info);
        }
        Ok(out)
    }

    /// Reads the primary key columns of `table`, ordered by key sequence.
    pub fn read_primary_key_info(&self, table: &TableInfo) -> Result<Vec<PrimaryKeyInfo>, Error> {
        let stmt = self.catalog_statement()?;
        stmt.close_cursor()?;
        let _guard = CursorGuard { stmt: &stmt };
        stmt.primary_keys(
            table.catalog.as_deref(),
            table.schema.as_deref(),
            Some(&table.name),
        )?;
        let mut out = Vec::new();
        while stmt.fetch()? {
            out.push(PrimaryKeyInfo {
                catalog: stmt.get_data_text(1)?,
                schema: stmt.get_data_text(2)?,
                table_name: stmt.get_data_text(3)?.unwrap_or_default(),
                column_name: stmt.get_data_text(4)?.unwrap_or_default(),
                key_sequence: stmt.get_data_i16(5)?.unwrap_or(0),
                primary_key_name: stmt.get_data_text(6)?,
            });
        }
        out.sort_by_key(|pk| pk.key_sequence);
        Ok(out)
    }

    /// Reads the privileges granted on `table`.
    pub fn read_table_privileges(&self, table: &TableInfo) -> Result<Vec<PrivilegeInfo>, Error> {
        assertion!(
            self.quirks()?.supports_table_privileges,
            "driver does not support querying table privileges"
        );
        let stmt = self.catalog_statement()?;
        stmt.close_cursor()?;
        let _guard = CursorGuard { stmt: &stmt };
        stmt.table_privileges(
            table.catalog.as_deref(),
            table.schema.as_deref(),
            Some(&table.name),
        )?;
        let mut out = Vec::new();
        while stmt.fetch()? {
            out.push(PrivilegeInfo {
                catalog: stmt.get_data_text(1)?,
                schema: stmt.get_data_text(2)?,
                table_name: stmt.get_data_text(3)?.unwrap_or_default(),
                grantor: stmt.get_data_text(4)?,
                grantee: stmt.get_data_text(5)?.unwrap_or_default(),
                privilege: stmt.get_data_text(6)?.unwrap_or_default(),
                is_grantable: stmt.get_data_text(7)?,
            });
        }
        Ok(out)
    }

    /// Reads the columns which identify rows of `table`.
    pub fn read_special_columns(
        &self,
        table: &TableInfo,
        identifier_type: RowIdentifierType,
        scope: RowIdentifierScope,
        include_nullable: bool,
    ) -> Result<Vec<SpecialColumnInfo>, Error> {
        let stmt = self.catalog_statement()?;
        stmt.close_cursor()?;
        let _guard = CursorGuard { stmt: &stmt };
        stmt.special_columns(
            identifier_type.as_raw(),
            table.catalog.as_deref(),
            table.schema.as_deref(),
            Some(&table.name),
            scope.as_raw(),
            if include_nullable { 1 } else { 0 },
        )?;
        let mut out = Vec::new();
        while stmt.fetch()? {
            out.push(SpecialColumnInfo {
                scope: stmt.get_data_i16(1)?,
                column_name: stmt.get_data_text(2)?.unwrap_or_default(),
                sql_type: SqlDataType(stmt.get_data_i16(3)?.unwrap_or(0)),
                type_name: stmt.get_data_text(4)?.unwrap_or_default(),
                column_size: stmt.get_data_i32(5)?,
                buffer_length: stmt.get_data_i32(6)?,
                decimal_digits: stmt.get_data_i16(7)?,
                pseudo_column: stmt.get_data_i16(8)?,
            });
        }
        Ok(out)
    }

    /// Lists the catalog names of the data source. Each name is returned at most once.
    pub fn read_catalogs(&self) -> Result<Vec<String>, Error> {
        // SQL_ALL_CATALOGS: "%" as catalog with empty schema and table enumerates catalogs.
        let tables = self.read_tables(Some("%"), Some(""), Some(""), None)?;
        let mut out: Vec<String> = tables.into_iter().filter_map(|t| t.catalog).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Lists the schema names of the data source. Each name is returned at most once.
    pub fn read_schemas(&self) -> Result<Vec<String>, Error> {
        let tables = self.read_tables(Some(""), Some("%"), Some(""), None)?;
        let mut out: Vec<String> = tables.into_iter().filter_map(|t| t.schema).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Lists the table types of the data source. Each type is returned at most once.
    pub fn read_table_types(&self) -> Result<Vec<String>, Error> {
        let tables = self.read_tables(Some(""), Some(""), Some(""), Some("%"))?;
        let mut out: Vec<String> = tables
            .into_iter()
            .map(|t| t.table_type)
            .filter(|t| !t.is_empty())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{Nullability, TableInfo};

    #[test]
    fn query_name_qualification() {
        let mut table = TableInfo {
            catalog: Some("master".to_owned()),
            schema: Some("dbo".to_owned()),
            name: "integertypes".to_owned(),
            table_type: "TABLE".to_owned(),
            remarks: None,
        };
        assert_eq!("master.dbo.integertypes", table.query_name());
        table.catalog = None;
        assert_eq!("dbo.integertypes", table.query_name());
        table.schema = None;
        assert_eq!("integertypes", table.query_name());
        table.catalog = Some("excel_workbook".to_owned());
        assert_eq!("excel_workbook.integertypes", table.query_name());
    }

    #[test]
    fn nullability_from_catalog_codes() {
        assert_eq!(Nullability::NoNulls, Nullability::from_raw(0));
        assert_eq!(Nullability::Nullable, Nullability::from_raw(1));
        assert_eq!(Nullability::Unknown, Nullability::from_raw(2));
        assert!(!Nullability::from_raw(0).could_be_nullable());
        assert!(Nullability::from_raw(1).could_be_nullable());
    }
}
