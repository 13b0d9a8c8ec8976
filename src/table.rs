use std::{
    collections::BTreeMap,
    ops::{BitOr, BitOrAssign},
    rc::Rc,
};

use crate::{
    buffers::{BufferKind, ColumnBuffer, ColumnFlags, ColumnProperties},
    catalog::TableInfo,
    database::Database,
    error::{assertion, Error},
    executable_statement::ExecutableStatement,
    handles::{ReturnCode, State},
};

/// Row operations a table is opened for. Statements are only allocated and prepared for the
/// operations named here, and column flags are validated against them on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableAccessFlags(u16);

impl TableAccessFlags {
    pub const NONE: TableAccessFlags = TableAccessFlags(0);
    /// Select rows identified by the values of the primary key buffers.
    pub const SELECT_PK: TableAccessFlags = TableAccessFlags(0x1);
    /// Select rows matching a free-form WHERE clause.
    pub const SELECT_WHERE: TableAccessFlags = TableAccessFlags(0x2);
    /// Count rows matching a free-form WHERE clause.
    pub const COUNT_WHERE: TableAccessFlags = TableAccessFlags(0x4);
    /// Insert rows from the insert-flagged column buffers.
    pub const INSERT: TableAccessFlags = TableAccessFlags(0x8);
    /// Update rows identified by the values of the primary key buffers.
    pub const UPDATE_PK: TableAccessFlags = TableAccessFlags(0x10);
    /// Update rows matching a free-form WHERE clause.
    pub const UPDATE_WHERE: TableAccessFlags = TableAccessFlags(0x20);
    /// Delete rows identified by the values of the primary key buffers.
    pub const DELETE_PK: TableAccessFlags = TableAccessFlags(0x40);
    /// Delete rows matching a free-form WHERE clause.
    pub const DELETE_WHERE: TableAccessFlags = TableAccessFlags(0x80);

    pub const READ: TableAccessFlags =
        TableAccessFlags(Self::SELECT_PK.0 | Self::SELECT_WHERE.0 | Self::COUNT_WHERE.0);
    pub const WRITE: TableAccessFlags = TableAccessFlags(
        Self::INSERT.0 | Self::UPDATE_PK.0 | Self::UPDATE_WHERE.0 | Self::DELETE_PK.0
            | Self::DELETE_WHERE.0,
    );
    pub const READ_WRITE: TableAccessFlags = TableAccessFlags(Self::READ.0 | Self::WRITE.0);

    pub fn contains(self, other: TableAccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if at least one flag of `other` is set in `self`.
    pub fn intersects(self, other: TableAccessFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: TableAccessFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TableAccessFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for TableAccessFlags {
    type Output = TableAccessFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        TableAccessFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TableAccessFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Options modifying how a table opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOpenFlags(u16);

impl TableOpenFlags {
    pub const NONE: TableOpenFlags = TableOpenFlags(0);
    /// Verify that a manually supplied table actually exists in the catalog. Set by default.
    pub const CHECK_EXISTENCE: TableOpenFlags = TableOpenFlags(0x1);
    /// Do not run a primary key catalog query, even if primary-key operations are requested.
    pub const DO_NOT_QUERY_PRIMARY_KEYS: TableOpenFlags = TableOpenFlags(0x2);
    /// Open all statements with forward-only cursors.
    pub const FORWARD_ONLY_CURSORS: TableOpenFlags = TableOpenFlags(0x4);
    /// Silently drop columns whose SQL type cannot be mapped to a buffer, instead of failing.
    pub const SKIP_UNSUPPORTED_COLUMNS: TableOpenFlags = TableOpenFlags(0x8);
    /// Do not verify the SQL types of manually supplied columns against the types the driver
    /// reported on open.
    pub const IGNORE_DB_TYPE_INFOS: TableOpenFlags = TableOpenFlags(0x10);

    pub fn contains(self, other: TableOpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TableOpenFlags) {
        self.0 |= other.0;
    }
}

impl Default for TableOpenFlags {
    fn default() -> Self {
        TableOpenFlags::CHECK_EXISTENCE
    }
}

impl BitOr for TableOpenFlags {
    type Output = TableOpenFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        TableOpenFlags(self.0 | rhs.0)
    }
}

/// How a table finds its [`TableInfo`] on open.
enum TableSearch {
    ByName {
        name: String,
        schema: Option<String>,
        catalog: Option<String>,
        table_type: Option<String>,
    },
    ByInfo(TableInfo),
}

/// Access to a single database table with one consistent programming model: column buffers carry
/// the values, prepared statements carry them across the driver.
///
/// Opening a table resolves it in the catalog, discovers (or accepts) its columns and primary
/// keys, allocates column buffers and prepares the parameterised statements for the requested
/// access flags. At steady state, clients mutate the column buffer values and call the row
/// operations; bound buffers carry data in both directions.
pub struct Table {
    db: Rc<Database>,
    access: TableAccessFlags,
    search: TableSearch,
    table_info: Option<TableInfo>,
    columns: BTreeMap<u16, Rc<ColumnBuffer>>,
    columns_auto_created: bool,
    manual_pk_indexes: Vec<u16>,
    stmt_select: Option<ExecutableStatement>,
    stmt_count: Option<ExecutableStatement>,
    stmt_insert: Option<ExecutableStatement>,
    stmt_update_pk: Option<ExecutableStatement>,
    stmt_delete_pk: Option<ExecutableStatement>,
    count_buffer: Option<Rc<ColumnBuffer>>,
    open: bool,
}

impl Table {
    /// Creates a closed table which resolves itself by name on open.
    pub fn new(db: &Rc<Database>, access: TableAccessFlags, name: &str) -> Self {
        Self::with_search(db, access, name, None, None, None)
    }

    /// Creates a closed table which resolves itself by name, restricted by schema, catalog and
    /// table type, on open.
    pub fn with_search(
        db: &Rc<Database>,
        access: TableAccessFlags,
        name: &str,
        schema: Option<&str>,
        catalog: Option<&str>,
        table_type: Option<&str>,
    ) -> Self {
        Table {
            db: Rc::clone(db),
            access,
            search: TableSearch::ByName {
                name: name.to_owned(),
                schema: schema.map(str::to_owned),
                catalog: catalog.map(str::to_owned),
                table_type: table_type.map(str::to_owned),
            },
            table_info: None,
            columns: BTreeMap::new(),
            columns_auto_created: false,
            manual_pk_indexes: Vec::new(),
            stmt_select: None,
            stmt_count: None,
            stmt_insert: None,
            stmt_update_pk: None,
            stmt_delete_pk: None,
            count_buffer: None,
            open: false,
        }
    }

    /// Creates a closed table from an already resolved [`TableInfo`]. Unless
    /// [`TableOpenFlags::CHECK_EXISTENCE`] is set, no catalog lookup for the table itself happens
    /// on open.
    pub fn from_table_info(db: &Rc<Database>, access: TableAccessFlags, info: TableInfo) -> Self {
        let mut table = Self::new(db, access, &info.name);
        table.search = TableSearch::ByInfo(info);
        table
    }

    /// Supplies a column buffer for the 1-based column index, instead of having buffers created
    /// from the catalog on open. Buffers supplied this way survive [`Self::close`].
    pub fn set_column(&mut self, column_index: u16, buffer: Rc<ColumnBuffer>) -> Result<(), Error> {
        assertion!(!self.open, "columns must be set before the table is opened");
        self.columns.insert(column_index, buffer);
        Ok(())
    }

    /// Marks the columns with the given indexes as the primary key, skipping the primary key
    /// catalog query on open.
    pub fn set_primary_key_indexes(&mut self, indexes: &[u16]) -> Result<(), Error> {
        assertion!(
            !self.open,
            "primary key indexes must be set before the table is opened"
        );
        self.manual_pk_indexes = indexes.to_vec();
        Ok(())
    }

    /// `true` if the table is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The resolved table information. Only available while the table is open (or after it was
    /// supplied manually).
    pub fn table_info(&self) -> Result<&TableInfo, Error> {
        match (&self.table_info, &self.search) {
            (Some(info), _) => Ok(info),
            (None, TableSearch::ByInfo(info)) => Ok(info),
            (None, TableSearch::ByName { name, .. }) => Err(Error::IllegalArgument {
                description: format!("table '{name}' has not been resolved yet; open it first"),
            }),
        }
    }

    /// The buffer of the column with the given 1-based index.
    pub fn column_buffer(&self, column_index: u16) -> Result<Rc<ColumnBuffer>, Error> {
        self.columns
            .get(&column_index)
            .cloned()
            .ok_or_else(|| Error::IllegalArgument {
                description: format!("no column buffer exists for column index {column_index}"),
            })
    }

    /// The 1-based index of the column with the given query name.
    pub fn column_index(&self, query_name: &str) -> Result<u16, Error> {
        self.columns
            .iter()
            .find(|(_, buffer)| buffer.query_name() == query_name)
            .map(|(index, _)| *index)
            .ok_or_else(|| Error::IllegalArgument {
                description: format!("no column buffer exists with query name '{query_name}'"),
            })
    }

    /// All column buffers by 1-based column index, in index order.
    pub fn columns(&self) -> impl Iterator<Item = (u16, &Rc<ColumnBuffer>)> {
        self.columns.iter().map(|(index, buffer)| (*index, buffer))
    }

    /// Opens the table: resolves it in the catalog, creates column buffers as needed, validates
    /// flags, and prepares the statements for the requested access.
    pub fn open(&mut self, mut open_flags: TableOpenFlags) -> Result<(), Error> {
        assertion!(!self.open, "table is already open");

        let quirks = self.db.quirks()?;
        if !quirks.supports_primary_keys_query {
            open_flags.insert(TableOpenFlags::DO_NOT_QUERY_PRIMARY_KEYS);
        }
        if !quirks.supports_scrollable_cursors {
            open_flags.insert(TableOpenFlags::FORWARD_ONLY_CURSORS);
        }
        let forward_only = open_flags.contains(TableOpenFlags::FORWARD_ONLY_CURSORS);

        // One statement is shared by the two select operations, the remaining operations get
        // their own so they stay independent.
        if self
            .access
            .intersects(TableAccessFlags::SELECT_PK | TableAccessFlags::SELECT_WHERE)
        {
            self.stmt_select = Some(ExecutableStatement::new(&self.db, forward_only)?);
        }
        if self.access.contains(TableAccessFlags::COUNT_WHERE) {
            self.stmt_count = Some(ExecutableStatement::new(&self.db, forward_only)?);
        }
        if self.access.contains(TableAccessFlags::INSERT) {
            self.stmt_insert = Some(ExecutableStatement::new(&self.db, forward_only)?);
        }
        if self.access.contains(TableAccessFlags::UPDATE_PK) {
            self.stmt_update_pk = Some(ExecutableStatement::new(&self.db, forward_only)?);
        }
        if self.access.contains(TableAccessFlags::DELETE_PK) {
            self.stmt_delete_pk = Some(ExecutableStatement::new(&self.db, forward_only)?);
        }

        self.resolve_table_info(open_flags)?;

        let row_access = TableAccessFlags::SELECT_PK
            | TableAccessFlags::SELECT_WHERE
            | TableAccessFlags::INSERT
            | TableAccessFlags::UPDATE_PK
            | TableAccessFlags::UPDATE_WHERE
            | TableAccessFlags::DELETE_PK
            | TableAccessFlags::DELETE_WHERE;
        if self.columns.is_empty() && self.access.intersects(row_access) {
            self.create_column_buffers(open_flags)?;
            self.columns_auto_created = true;
        } else if !self.columns.is_empty()
            && !open_flags.contains(TableOpenFlags::IGNORE_DB_TYPE_INFOS)
        {
            self.check_supplied_column_types(open_flags)?;
        }

        self.mark_primary_key_columns(open_flags)?;

        let info = self.table_info.clone().unwrap();
        for (index, buffer) in &self.columns {
            check_column_flags_against_access(
                buffer.flags(),
                self.access,
                buffer.query_name(),
                *index,
                &info.query_name(),
            )?;
        }

        if self.access.contains(TableAccessFlags::COUNT_WHERE) {
            let buffer = Rc::new(ColumnBuffer::from_buffer_kind(
                BufferKind::U64,
                "count",
                ColumnFlags::SELECT,
                ColumnProperties::default(),
                0,
            ));
            self.stmt_count.as_ref().unwrap().bind_column(&buffer, 1)?;
            self.count_buffer = Some(buffer);
        }

        if let Some(select) = &self.stmt_select {
            let mut position = 1;
            for buffer in self.columns.values() {
                if buffer.flags().contains(ColumnFlags::SELECT) {
                    select.bind_column(buffer, position)?;
                    position += 1;
                }
            }
        }

        let pk_access = TableAccessFlags::SELECT_PK
            | TableAccessFlags::UPDATE_PK
            | TableAccessFlags::DELETE_PK;
        if self.access.intersects(pk_access) {
            let pk_count = self
                .columns
                .values()
                .filter(|buffer| buffer.flags().contains(ColumnFlags::PRIMARY_KEY))
                .count();
            assertion!(
                pk_count > 0,
                format!(
                    "table '{}' was opened for primary key operations, but no column is marked \
                     as primary key",
                    info.query_name()
                )
            );
        }

        if self.access.contains(TableAccessFlags::SELECT_PK) {
            self.prepare_select_pk(&info)?;
        }
        if self.access.contains(TableAccessFlags::UPDATE_PK) {
            self.prepare_update_pk(&info)?;
        }
        if self.access.contains(TableAccessFlags::DELETE_PK) {
            self.prepare_delete_pk(&info)?;
        }
        if self.access.contains(TableAccessFlags::INSERT) {
            self.prepare_insert(&info)?;
        }

        self.open = true;
        Ok(())
    }

    fn resolve_table_info(&mut self, open_flags: TableOpenFlags) -> Result<(), Error> {
        match &self.search {
            TableSearch::ByName {
                name,
                schema,
                catalog,
                table_type,
            } => {
                self.table_info = Some(self.db.find_one_table(
                    name,
                    schema.as_deref(),
                    catalog.as_deref(),
                    table_type.as_deref(),
                )?);
            }
            TableSearch::ByInfo(info) => {
                if open_flags.contains(TableOpenFlags::CHECK_EXISTENCE) {
                    self.table_info = Some(self.db.find_one_table(
                        &info.name,
                        info.schema.as_deref(),
                        info.catalog.as_deref(),
                        None,
                    )?);
                } else {
                    self.table_info = Some(info.clone());
                }
            }
        }
        Ok(())
    }

    fn create_column_buffers(&mut self, open_flags: TableOpenFlags) -> Result<(), Error> {
        let info = self.table_info.clone().unwrap();
        let type_map = self.db.sql2buffer_type_map()?;
        let column_infos = self.db.read_table_column_info(&info)?;
        for column_info in column_infos {
            let kind = match type_map.buffer_kind(column_info.sql_type) {
                Some(kind) => kind,
                None if open_flags.contains(TableOpenFlags::SKIP_UNSUPPORTED_COLUMNS) => {
                    log::info!(
                        "Skipping column '{}' of table '{}': no buffer exists for SQL type {:?}",
                        column_info.name,
                        info.query_name(),
                        column_info.sql_type
                    );
                    continue;
                }
                None => {
                    return Err(Error::UnsupportedSqlType {
                        sql_type: column_info.sql_type,
                    })
                }
            };

            let mut flags = ColumnFlags::NONE;
            if self
                .access
                .intersects(TableAccessFlags::SELECT_PK | TableAccessFlags::SELECT_WHERE)
            {
                flags.insert(ColumnFlags::SELECT);
            }
            if self
                .access
                .intersects(TableAccessFlags::UPDATE_PK | TableAccessFlags::UPDATE_WHERE)
            {
                flags.insert(ColumnFlags::UPDATE);
            }
            if self.access.contains(TableAccessFlags::INSERT) {
                flags.insert(ColumnFlags::INSERT);
            }
            if column_info.nullability.could_be_nullable() {
                flags.insert(ColumnFlags::NULLABLE);
            }

            let column_size = column_info.column_size.unwrap_or(0).max(0) as usize;
            let properties = ColumnProperties {
                sql_type: Some(column_info.sql_type),
                column_size,
                decimal_digits: column_info.decimal_digits.unwrap_or(0),
            };
            // Array buffers need one extra element for the terminating zero.
            let element_count = match kind {
                BufferKind::Text | BufferKind::WText => column_size + 1,
                BufferKind::Binary => column_size,
                _ => 0,
            };
            let buffer = ColumnBuffer::from_buffer_kind(
                kind,
                column_info.query_name(),
                flags,
                properties,
                element_count,
            );
            self.columns
                .insert(column_info.ordinal_position as u16, Rc::new(buffer));
        }
        Ok(())
    }

    fn check_supplied_column_types(&mut self, open_flags: TableOpenFlags) -> Result<(), Error> {
        let mut unsupported = Vec::new();
        for (index, buffer) in &self.columns {
            if let Some(sql_type) = buffer.properties().sql_type {
                if !self.db.supports_sql_type(sql_type)? {
                    if open_flags.contains(TableOpenFlags::SKIP_UNSUPPORTED_COLUMNS) {
                        log::info!(
                            "Skipping column '{}': driver does not list SQL type {:?}",
                            buffer.query_name(),
                            sql_type
                        );
                        unsupported.push(*index);
                    } else {
                        return Err(Error::UnsupportedSqlType { sql_type });
                    }
                }
            }
        }
        for index in unsupported {
            self.columns.remove(&index);
        }
        Ok(())
    }

    fn mark_primary_key_columns(&mut self, open_flags: TableOpenFlags) -> Result<(), Error> {
        if !self.manual_pk_indexes.is_empty() {
            for index in &self.manual_pk_indexes {
                let buffer = self
                    .columns
                    .get(index)
                    .ok_or_else(|| Error::IllegalArgument {
                        description: format!(
                            "primary key index {index} does not match any column buffer"
                        ),
                    })?;
                let mut flags = buffer.flags();
                flags.insert(ColumnFlags::PRIMARY_KEY);
                buffer.set_flags(flags);
            }
            return Ok(());
        }

        let pk_access = TableAccessFlags::SELECT_PK
            | TableAccessFlags::UPDATE_PK
            | TableAccessFlags::DELETE_PK;
        if !self.access.intersects(pk_access)
            || open_flags.contains(TableOpenFlags::DO_NOT_QUERY_PRIMARY_KEYS)
        {
            return Ok(());
        }

        let info = self.table_info.clone().unwrap();
        let primary_keys = self.db.read_primary_key_info(&info).map_err(|error| {
            if is_optional_feature_error(&error) {
                Error::IllegalArgument {
                    description: format!(
                        "the driver cannot query the primary keys of table '{}'; open with \
                         DO_NOT_QUERY_PRIMARY_KEYS and supply the key indexes manually",
                        info.query_name()
                    ),
                }
            } else {
                error
            }
        })?;
        for pk in primary_keys {
            let buffer = self
                .columns
                .values()
                .find(|buffer| buffer.query_name() == pk.column_name)
                .ok_or_else(|| Error::IllegalArgument {
                    description: format!(
                        "primary key column '{}' of table '{}' has no column buffer",
                        pk.column_name,
                        info.query_name()
                    ),
                })?;
            let mut flags = buffer.flags();
            flags.insert(ColumnFlags::PRIMARY_KEY);
            buffer.set_flags(flags);
        }
        Ok(())
    }

    fn prepare_select_pk(&self, info: &TableInfo) -> Result<(), Error> {
        let (sql, params) = build_select_pk_statement(&info.query_name(), &self.columns)
            .ok_or_else(|| no_where_columns_error(info))?;
        let stmt = self.stmt_select.as_ref().unwrap();
        stmt.prepare(&sql)?;
        // Binding happens after the prepare, otherwise the driver could not describe the
        // parameters.
        for (position, index) in params.iter().enumerate() {
            stmt.bind_parameter(&self.columns[index], position as u16 + 1)?;
        }
        Ok(())
    }

    fn prepare_update_pk(&self, info: &TableInfo) -> Result<(), Error> {
        let (sql, params) = match build_update_pk_statement(&info.query_name(), &self.columns) {
            Some(built) => built,
            None => {
                return Err(Error::IllegalArgument {
                    description: format!(
                        "cannot compose an update statement for table '{}': it needs at least \
                         one update-flagged column and one primary key column",
                        info.query_name()
                    ),
                })
            }
        };
        let stmt = self.stmt_update_pk.as_ref().unwrap();
        stmt.prepare(&sql)?;
        for (position, index) in params.iter().enumerate() {
            stmt.bind_parameter(&self.columns[index], position as u16 + 1)?;
        }
        Ok(())
    }

    fn prepare_delete_pk(&self, info: &TableInfo) -> Result<(), Error> {
        let (sql, params) = build_delete_pk_statement(&info.query_name(), &self.columns)
            .ok_or_else(|| no_where_columns_error(info))?;
        let stmt = self.stmt_delete_pk.as_ref().unwrap();
        stmt.prepare(&sql)?;
        for (position, index) in params.iter().enumerate() {
            stmt.bind_parameter(&self.columns[index], position as u16 + 1)?;
        }
        Ok(())
    }

    fn prepare_insert(&self, info: &TableInfo) -> Result<(), Error> {
        let (sql, params) = match build_insert_statement(&info.query_name(), &self.columns) {
            Some(built) => built,
            None => {
                return Err(Error::IllegalArgument {
                    description: format!(
                        "cannot compose an insert statement for table '{}': no column is \
                         flagged for inserting",
                        info.query_name()
                    ),
                })
            }
        };
        let stmt = self.stmt_insert.as_ref().unwrap();
        stmt.prepare(&sql)?;
        for (position, index) in params.iter().enumerate() {
            stmt.bind_parameter(&self.columns[index], position as u16 + 1)?;
        }
        Ok(())
    }

    /// Closes the table: auto-created buffers are dropped, all statements are released and the
    /// table is marked not open. Buffers supplied by the client survive.
    pub fn close(&mut self) {
        if self.columns_auto_created {
            self.columns.clear();
            self.columns_auto_created = false;
        }
        self.count_buffer = None;
        self.stmt_select = None;
        self.stmt_count = None;
        self.stmt_insert = None;
        self.stmt_update_pk = None;
        self.stmt_delete_pk = None;
        self.table_info = None;
        self.open = false;
    }

    /// Counts the rows matching `where_clause`. An empty clause counts all rows.
    pub fn count(&self, where_clause: &str) -> Result<u64, Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::COUNT_WHERE),
            "table was not opened for counting"
        );
        let info = self.table_info()?;
        let sql = if where_clause.is_empty() {
            format!("SELECT COUNT(*) FROM {}", info.query_name())
        } else {
            format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                info.query_name(),
                where_clause
            )
        };
        let stmt = self.stmt_count.as_ref().unwrap();
        stmt.execute_direct(&sql)?;
        let row_available = stmt.select_next()?;
        assertion!(row_available, "count query returned no row");
        let count = self
            .count_buffer
            .as_ref()
            .unwrap()
            .as_u64()
            .unwrap()
            .value()?;
        stmt.select_close()?;
        Ok(count)
    }

    /// Executes a select with the pre-bound column list, restricted by `where_clause` and
    /// ordered by `order_by` (both may be empty). Iterate via the `select_*` cursor operations.
    pub fn select(&self, where_clause: &str, order_by: &str) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::SELECT_WHERE),
            "table was not opened for free-form selects"
        );
        let info = self.table_info()?;
        let mut sql = format!(
            "SELECT {} FROM {}",
            build_select_field_list(&self.columns),
            info.query_name()
        );
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        self.select_by_sql_stmt(&sql)
    }

    /// Executes an arbitrary select statement with the pre-bound column list. The statement must
    /// produce columns matching the select-flagged buffers in order.
    pub fn select_by_sql_stmt(&self, sql: &str) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::SELECT_WHERE),
            "table was not opened for free-form selects"
        );
        self.stmt_select.as_ref().unwrap().execute_direct(sql)?;
        Ok(())
    }

    /// Executes the prepared primary key select. Fill the primary key column buffers first, then
    /// iterate via [`Self::select_next`].
    pub fn select_by_pk_values(&self) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::SELECT_PK),
            "table was not opened for primary key selects"
        );
        self.stmt_select.as_ref().unwrap().execute_prepared()?;
        Ok(())
    }

    /// Fetches the next row of the open select into the bound column buffers.
    pub fn select_next(&self) -> Result<bool, Error> {
        self.select_stmt()?.select_next()
    }

    /// Fetches the previous row. Requires scrollable cursors.
    pub fn select_prev(&self) -> Result<bool, Error> {
        self.select_stmt()?.select_prev()
    }

    /// Fetches the first row. Requires scrollable cursors.
    pub fn select_first(&self) -> Result<bool, Error> {
        self.select_stmt()?.select_first()
    }

    /// Fetches the last row. Requires scrollable cursors.
    pub fn select_last(&self) -> Result<bool, Error> {
        self.select_stmt()?.select_last()
    }

    /// Fetches the row at `position`. Requires scrollable cursors.
    pub fn select_absolute(&self, position: isize) -> Result<bool, Error> {
        self.select_stmt()?.select_absolute(position)
    }

    /// Fetches the row `offset` rows from the current position. Requires scrollable cursors.
    pub fn select_relative(&self, offset: isize) -> Result<bool, Error> {
        self.select_stmt()?.select_relative(offset)
    }

    /// Closes the cursor of the select statement, if one is open.
    pub fn select_close(&self) -> Result<(), Error> {
        self.select_stmt()?.select_close()
    }

    fn select_stmt(&self) -> Result<&ExecutableStatement, Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.stmt_select.is_some(),
            "table was not opened for selecting"
        );
        Ok(self.stmt_select.as_ref().unwrap())
    }

    /// Executes the prepared insert. Fill the insert-flagged column buffers first.
    pub fn insert(&self) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::INSERT),
            "table was not opened for inserting"
        );
        self.stmt_insert.as_ref().unwrap().execute_prepared()?;
        Ok(())
    }

    /// Executes the prepared primary key update. Fill the update-flagged column buffers and the
    /// primary key buffers first.
    pub fn update_by_pk_values(&self) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::UPDATE_PK),
            "table was not opened for primary key updates"
        );
        self.stmt_update_pk.as_ref().unwrap().execute_prepared()?;
        Ok(())
    }

    /// Updates all rows matching `where_clause`, setting the update-flagged columns to the
    /// current buffer values.
    pub fn update(&self, where_clause: &str) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::UPDATE_WHERE),
            "table was not opened for free-form updates"
        );
        assertion!(
            !where_clause.is_empty(),
            "updating without a WHERE clause is not supported"
        );
        let info = self.table_info()?;
        let (set_clause, params) = match build_update_set_clause(&self.columns) {
            Some(built) => built,
            None => {
                return Err(Error::IllegalArgument {
                    description: format!(
                        "cannot compose an update statement for table '{}': no column is \
                         flagged for updating",
                        info.query_name()
                    ),
                })
            }
        };
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            info.query_name(),
            set_clause,
            where_clause
        );
        let stmt = ExecutableStatement::new(&self.db, true)?;
        stmt.prepare(&sql)?;
        for (position, index) in params.iter().enumerate() {
            stmt.bind_parameter(&self.columns[index], position as u16 + 1)?;
        }
        stmt.execute_prepared()?;
        Ok(())
    }

    /// Executes the prepared primary key delete. Fill the primary key buffers first. If
    /// `fail_on_no_data` is `false`, deleting an absent row is not an error.
    pub fn delete_by_pk_values(&self, fail_on_no_data: bool) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::DELETE_PK),
            "table was not opened for primary key deletes"
        );
        let had_data = self.stmt_delete_pk.as_ref().unwrap().execute_prepared()?;
        if !had_data && fail_on_no_data {
            return Err(no_data_error("SQLExecute"));
        }
        Ok(())
    }

    /// Deletes all rows matching `where_clause`. If `fail_on_no_data` is `false`, a clause
    /// matching no rows is not an error.
    pub fn delete(&self, where_clause: &str, fail_on_no_data: bool) -> Result<(), Error> {
        assertion!(self.open, "table is not open");
        assertion!(
            self.access.contains(TableAccessFlags::DELETE_WHERE),
            "table was not opened for free-form deletes"
        );
        assertion!(
            !where_clause.is_empty(),
            "deleting without a WHERE clause is not supported"
        );
        let info = self.table_info()?;
        let sql = format!("DELETE FROM {} WHERE {}", info.query_name(), where_clause);
        let stmt = ExecutableStatement::new(&self.db, true)?;
        let had_data = stmt.execute_direct(&sql)?;
        if !had_data && fail_on_no_data {
            return Err(no_data_error("SQLExecDirect"));
        }
        Ok(())
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        self.close();
    }
}

/// `true` if the driver answered a catalog query with "optional feature not implemented".
fn is_optional_feature_error(error: &Error) -> bool {
    match error {
        Error::SqlResult { records, .. } => records
            .first()
            .map(|record| record.state == State::OPTIONAL_FEATURE_NOT_IMPLEMENTED)
            .unwrap_or(false),
        _ => false,
    }
}

fn no_data_error(function: &'static str) -> Error {
    Error::SqlResult {
        function,
        code: ReturnCode::NoData,
        records: Vec::new(),
    }
}

fn no_where_columns_error(info: &TableInfo) -> Error {
    Error::IllegalArgument {
        description: format!(
            "no columns of table '{}' are usable to construct a WHERE clause",
            info.query_name()
        ),
    }
}

/// Verifies that the flags of one column are covered by the access flags of the table.
fn check_column_flags_against_access(
    flags: ColumnFlags,
    access: TableAccessFlags,
    query_name: &str,
    column_index: u16,
    table_query_name: &str,
) -> Result<(), Error> {
    if flags.contains(ColumnFlags::SELECT)
        && !access.intersects(TableAccessFlags::SELECT_PK | TableAccessFlags::SELECT_WHERE)
    {
        return Err(Error::IllegalArgument {
            description: format!(
                "column '{query_name}' ({column_index}) is flagged SELECT, but table \
                 '{table_query_name}' was not opened with SELECT_PK or SELECT_WHERE"
            ),
        });
    }
    if flags.contains(ColumnFlags::UPDATE)
        && !access.intersects(TableAccessFlags::UPDATE_PK | TableAccessFlags::UPDATE_WHERE)
    {
        return Err(Error::IllegalArgument {
            description: format!(
                "column '{query_name}' ({column_index}) is flagged UPDATE, but table \
                 '{table_query_name}' was not opened with UPDATE_PK or UPDATE_WHERE"
            ),
        });
    }
    if flags.contains(ColumnFlags::INSERT) && !access.contains(TableAccessFlags::INSERT) {
        return Err(Error::IllegalArgument {
            description: format!(
                "column '{query_name}' ({column_index}) is flagged INSERT, but table \
                 '{table_query_name}' was not opened with INSERT"
            ),
        });
    }
    Ok(())
}

/// The select field list: all select-flagged columns in index order, joined with `, `.
fn build_select_field_list(columns: &BTreeMap<u16, Rc<ColumnBuffer>>) -> String {
    let mut fields = String::new();
    for buffer in columns.values() {
        if buffer.flags().contains(ColumnFlags::SELECT) {
            fields.push_str(buffer.query_name());
            fields.push_str(", ");
        }
    }
    trim_trailing_separator(&mut fields);
    fields
}

/// `INSERT INTO <qn> (c1, c2, …) VALUES(?, ?, …)` over all insert-flagged columns. Returns the
/// statement and the column indexes in parameter order, or `None` if no column is insertable.
fn build_insert_statement(
    table_query_name: &str,
    columns: &BTreeMap<u16, Rc<ColumnBuffer>>,
) -> Option<(String, Vec<u16>)> {
    let mut fields = String::new();
    let mut markers = String::new();
    let mut params = Vec::new();
    for (index, buffer) in columns {
        if buffer.flags().contains(ColumnFlags::INSERT) {
            fields.push_str(buffer.query_name());
            fields.push_str(", ");
            markers.push_str("?, ");
            params.push(*index);
        }
    }
    if params.is_empty() {
        return None;
    }
    trim_trailing_separator(&mut fields);
    trim_trailing_separator(&mut markers);
    Some((
        format!("INSERT INTO {table_query_name} ({fields}) VALUES({markers})"),
        params,
    ))
}

/// The WHERE clause over all primary key columns. Pairs are joined with `, `, matching the
/// statement text this crate's callers have always seen.
fn build_pk_where_clause(columns: &BTreeMap<u16, Rc<ColumnBuffer>>) -> Option<(String, Vec<u16>)> {
    let mut markers = String::new();
    let mut params = Vec::new();
    for (index, buffer) in columns {
        if buffer.flags().contains(ColumnFlags::PRIMARY_KEY) {
            markers.push_str(buffer.query_name());
            markers.push_str(" = ?, ");
            params.push(*index);
        }
    }
    if params.is_empty() {
        return None;
    }
    trim_trailing_separator(&mut markers);
    Some((markers, params))
}

/// The SET clause over all update-flagged, non primary key columns.
fn build_update_set_clause(
    columns: &BTreeMap<u16, Rc<ColumnBuffer>>,
) -> Option<(String, Vec<u16>)> {
    let mut markers = String::new();
    let mut params = Vec::new();
    for (index, buffer) in columns {
        let flags = buffer.flags();
        if flags.contains(ColumnFlags::UPDATE) && !flags.contains(ColumnFlags::PRIMARY_KEY) {
            markers.push_str(buffer.query_name());
            markers.push_str(" = ?, ");
            params.push(*index);
        }
    }
    if params.is_empty() {
        return None;
    }
    trim_trailing_separator(&mut markers);
    Some((markers, params))
}

/// `SELECT <select-list> FROM <qn> WHERE pk1 = ?, pk2 = ?`. Parameter order is the primary key
/// columns in index order.
fn build_select_pk_statement(
    table_query_name: &str,
    columns: &BTreeMap<u16, Rc<ColumnBuffer>>,
) -> Option<(String, Vec<u16>)> {
    let (where_clause, params) = build_pk_where_clause(columns)?;
    Some((
        format!(
            "SELECT {} FROM {} WHERE {}",
            build_select_field_list(columns),
            table_query_name,
            where_clause
        ),
        params,
    ))
}

/// `UPDATE <qn> SET c1 = ?, c2 = ? WHERE pk1 = ?, pk2 = ?`. Parameter order is the set columns
/// first, then the primary key columns.
fn build_update_pk_statement(
    table_query_name: &str,
    columns: &BTreeMap<u16, Rc<ColumnBuffer>>,
) -> Option<(String, Vec<u16>)> {
    let (set_clause, mut params) = build_update_set_clause(columns)?;
    let (where_clause, pk_params) = build_pk_where_clause(columns)?;
    params.extend(pk_params);
    Some((
        format!("UPDATE {table_query_name} SET {set_clause} WHERE {where_clause}"),
        params,
    ))
}

/// `DELETE FROM <qn> WHERE pk1 = ?, pk2 = ?`.
fn build_delete_pk_statement(
    table_query_name: &str,
    columns: &BTreeMap<u16, Rc<ColumnBuffer>>,
) -> Option<(String, Vec<u16>)> {
    let (where_clause, params) = build_pk_where_clause(columns)?;
    Some((
        format!("DELETE FROM {table_query_name} WHERE {where_clause}"),
        params,
    ))
}

fn trim_trailing_separator(clause: &mut String) {
    if clause.ends_with(", ") {
        clause.truncate(clause.len() - 2);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::buffers::{BufferKind, ColumnBuffer, ColumnFlags, ColumnProperties};

    fn column(kind: BufferKind, name: &str, flags: ColumnFlags) -> Rc<ColumnBuffer> {
        Rc::new(ColumnBuffer::from_buffer_kind(
            kind,
            name,
            flags,
            ColumnProperties::default(),
            16,
        ))
    }

    fn integertypes() -> BTreeMap<u16, Rc<ColumnBuffer>> {
        let mut columns = BTreeMap::new();
        columns.insert(
            1,
            column(
                BufferKind::I32,
                "id",
                ColumnFlags::READ_WRITE | ColumnFlags::PRIMARY_KEY,
            ),
        );
        columns.insert(2, column(BufferKind::I16, "s", ColumnFlags::READ_WRITE));
        columns.insert(3, column(BufferKind::I32, "i", ColumnFlags::READ_WRITE));
        columns.insert(4, column(BufferKind::I64, "b", ColumnFlags::READ_WRITE));
        columns.insert(
            5,
            column(BufferKind::I32, "hidden", ColumnFlags::NONE),
        );
        columns
    }

    #[test]
    fn insert_statement_lists_insert_flagged_columns() {
        let columns = integertypes();
        let (sql, params) = build_insert_statement("integertypes", &columns).unwrap();
        assert_eq!(
            "INSERT INTO integertypes (id, s, i, b) VALUES(?, ?, ?, ?)",
            sql
        );
        assert_eq!(vec![1, 2, 3, 4], params);
    }

    #[test]
    fn update_pk_statement_sets_non_pk_columns_and_filters_by_pk() {
        let columns = integertypes();
        let (sql, params) = build_update_pk_statement("integertypes", &columns).unwrap();
        assert_eq!(
            "UPDATE integertypes SET s = ?, i = ?, b = ? WHERE id = ?",
            sql
        );
        // Set parameters come first, the primary key parameters last.
        assert_eq!(vec![2, 3, 4, 1], params);
    }

    #[test]
    fn delete_pk_statement_filters_by_pk() {
        let columns = integertypes();
        let (sql, params) = build_delete_pk_statement("integertypes", &columns).unwrap();
        assert_eq!("DELETE FROM integertypes WHERE id = ?", sql);
        assert_eq!(vec![1], params);
    }

    #[test]
    fn select_pk_statement_selects_flagged_columns() {
        let columns = integertypes();
        let (sql, params) = build_select_pk_statement("integertypes", &columns).unwrap();
        assert_eq!(
            "SELECT id, s, i, b FROM integertypes WHERE id = ?",
            sql
        );
        assert_eq!(vec![1], params);
    }

    #[test]
    fn composite_pk_where_pairs_are_joined_with_comma() {
        // The separator between the pairs is a comma, not AND. Callers rely on the exact
        // statement text.
        let mut columns = BTreeMap::new();
        columns.insert(
            1,
            column(
                BufferKind::I32,
                "a",
                ColumnFlags::READ | ColumnFlags::PRIMARY_KEY,
            ),
        );
        columns.insert(
            2,
            column(
                BufferKind::I32,
                "b",
                ColumnFlags::READ | ColumnFlags::PRIMARY_KEY,
            ),
        );
        let (sql, params) = build_delete_pk_statement("t", &columns).unwrap();
        assert_eq!("DELETE FROM t WHERE a = ?, b = ?", sql);
        assert_eq!(vec![1, 2], params);
    }

    #[test]
    fn statements_without_usable_columns_are_not_composed() {
        let mut columns = BTreeMap::new();
        columns.insert(1, column(BufferKind::I32, "a", ColumnFlags::READ));
        assert!(build_delete_pk_statement("t", &columns).is_none());
        assert!(build_update_pk_statement("t", &columns).is_none());

        let empty = BTreeMap::new();
        assert!(build_insert_statement("t", &empty).is_none());
    }

    #[test]
    fn column_flags_must_be_covered_by_access_flags() {
        // Select flagged column in a table opened only for inserting.
        let result = check_column_flags_against_access(
            ColumnFlags::SELECT,
            TableAccessFlags::INSERT,
            "a",
            1,
            "t",
        );
        assert!(matches!(result, Err(Error::IllegalArgument { .. })));

        let result = check_column_flags_against_access(
            ColumnFlags::UPDATE,
            TableAccessFlags::UPDATE_WHERE,
            "a",
            1,
            "t",
        );
        assert!(result.is_ok());

        let result = check_column_flags_against_access(
            ColumnFlags::INSERT,
            TableAccessFlags::READ,
            "a",
            1,
            "t",
        );
        assert!(matches!(result, Err(Error::IllegalArgument { .. })));

        // A primary key flag alone requires no access flag.
        let result = check_column_flags_against_access(
            ColumnFlags::PRIMARY_KEY,
            TableAccessFlags::NONE,
            "a",
            1,
            "t",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn access_flag_combinations() {
        assert!(TableAccessFlags::READ.contains(TableAccessFlags::SELECT_PK));
        assert!(TableAccessFlags::READ.contains(TableAccessFlags::COUNT_WHERE));
        assert!(!TableAccessFlags::READ.intersects(TableAccessFlags::WRITE));
        assert!(TableAccessFlags::READ_WRITE.contains(TableAccessFlags::DELETE_WHERE));
        let mut flags = TableAccessFlags::SELECT_PK;
        flags |= TableAccessFlags::INSERT;
        assert!(flags.intersects(TableAccessFlags::INSERT));
        flags.remove(TableAccessFlags::INSERT);
        assert!(!flags.intersects(TableAccessFlags::INSERT));
    }
}
