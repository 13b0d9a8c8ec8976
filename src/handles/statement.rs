use std::{
    cell::RefCell,
    mem::size_of,
    ptr::{null, null_mut},
    rc::{Rc, Weak},
};

use log::debug;
use odbc_sys::{
    CDataType, FetchOrientation, HDesc, HStmt, Handle, HandleType, Len, Nullability, ParamType,
    Pointer, SQLAllocHandle, SQLBindCol, SQLBindParameter, SQLDescribeParam, SQLExecute, SQLFetch,
    SQLFetchScroll, SQLFreeStmt, SQLGetData, SQLGetStmtAttr, SQLGetTypeInfo, SQLNumResultCols,
    SQLSetStmtAttr, SqlDataType, SqlReturn, StatementAttribute, NULL_DATA,
};

use super::{
    as_handle::AsHandle,
    buffer::mut_buf_ptr,
    connection::ConnectionHandle,
    descriptor::Descriptor,
    drop_handle,
    sql_char::{slice_to_utf8, SqlChar, SqlText},
    sql_result::ExtSqlReturn,
};
use crate::{
    buffers::bind::{BindingKind, BufferId, SharedBindings},
    error::Error,
};

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use odbc_sys::{
    SQLColumns as sql_columns, SQLExecDirect as sql_exec_direct,
    SQLPrepare as sql_prepare, SQLPrimaryKeys as sql_primary_keys,
    SQLSpecialColumns as sql_special_columns, SQLTablePrivileges as sql_table_privileges,
    SQLTables as sql_tables,
};

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use odbc_sys::{
    SQLColumnsW as sql_columns, SQLExecDirectW as sql_exec_direct,
    SQLPrepareW as sql_prepare, SQLPrimaryKeysW as sql_primary_keys,
    SQLSpecialColumnsW as sql_special_columns, SQLTablePrivilegesW as sql_table_privileges,
    SQLTablesW as sql_tables,
};

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
const GET_DATA_CHAR_TYPE: CDataType = CDataType::Char;
#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
const GET_DATA_CHAR_TYPE: CDataType = CDataType::WChar;

/// Description of a parameter marker of a prepared statement, as reported by the driver.
#[derive(Debug, Clone, Copy)]
pub struct ParameterDescription {
    pub sql_type: SqlDataType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub nullability: Nullability,
}

/// A column buffer currently bound to this statement. The statement only holds a weak reference:
/// buffer lifetime is owned by the client, the entry exists so the statement can notify the
/// buffer when the statement goes away first.
struct TrackedBinding {
    id: BufferId,
    number: u16,
    kind: BindingKind,
    bindings: Weak<SharedBindings>,
}

/// An allocated ODBC statement handle.
///
/// Holds a strong reference to the connection it was allocated on. Tracks which column buffers
/// are bound to it, so buffer and statement can sever a binding no matter which of the two is
/// dropped first.
pub struct StatementHandle {
    handle: HStmt,
    /// Keeps the parent connection alive for at least as long as this statement.
    _parent: Rc<ConnectionHandle>,
    bound: RefCell<Vec<TrackedBinding>>,
}

unsafe impl AsHandle for StatementHandle {
    fn as_handle(&self) -> Handle {
        self.handle.as_handle()
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Stmt
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        // Sever all remaining bindings first: buffers must not keep references to a statement
        // which no longer exists.
        let stmt_id = self.stmt_id();
        for tracked in self.bound.get_mut().drain(..) {
            if let Some(bindings) = tracked.bindings.upgrade() {
                bindings.forget_statement(stmt_id);
            }
        }
        unsafe {
            drop_handle(self.handle.as_handle(), HandleType::Stmt);
        }
    }
}

impl StatementHandle {
    /// Allocates a new statement handle as a child of `connection`.
    pub fn allocate(connection: Rc<ConnectionHandle>) -> Result<Rc<Self>, Error> {
        let mut handle = Handle::null();
        unsafe {
            SQLAllocHandle(HandleType::Stmt, connection.as_sys().as_handle(), &mut handle)
        }
        .into_sql_result("SQLAllocHandle")
        .into_result(connection.as_ref())?;
        debug!("SQLAllocHandle allocated statement (Stmt) handle '{handle:?}'");
        Ok(Rc::new(StatementHandle {
            handle: handle.as_hstmt(),
            _parent: connection,
            bound: RefCell::new(Vec::new()),
        }))
    }

    pub(crate) fn as_sys(&self) -> HStmt {
        self.handle
    }

    /// Identity of this statement used in binding registries.
    pub(crate) fn stmt_id(&self) -> usize {
        self.handle.0 as usize
    }

    /// Executes a statement directly, using the current values of any bound parameter marker
    /// variables. Returns `false` if an update, insert or delete affected no rows.
    ///
    /// # Safety
    ///
    /// Bound parameter and column buffers must still be alive.
    pub unsafe fn exec_direct(&self, statement_text: &str) -> Result<bool, Error> {
        let text = SqlText::new(statement_text);
        sql_exec_direct(
            self.handle,
            text.ptr(),
            text.len_char().try_into().unwrap(),
        )
        .into_sql_result("SQLExecDirect")
        .into_result_bool(self)
    }

    /// Sends an SQL statement to the data source for preparation. Parameter markers are embedded
    /// as question marks (`?`).
    pub fn prepare(&self, statement_text: &str) -> Result<(), Error> {
        let text = SqlText::new(statement_text);
        unsafe {
            sql_prepare(
                self.handle,
                text.ptr(),
                text.len_char().try_into().unwrap(),
            )
        }
        .into_sql_result("SQLPrepare")
        .into_result(self)
    }

    /// Executes a statement prepared with [`Self::prepare`]. Returns `false` if an update, insert
    /// or delete affected no rows.
    ///
    /// # Safety
    ///
    /// Bound parameter and column buffers must still be alive.
    pub unsafe fn execute(&self) -> Result<bool, Error> {
        SQLExecute(self.handle)
            .into_sql_result("SQLExecute")
            .into_result_bool(self)
    }

    /// Advance the cursor over the current result set to the next row. Returns `false` once the
    /// result set is exhausted.
    pub fn fetch(&self) -> Result<bool, Error> {
        unsafe { SQLFetch(self.handle) }
            .into_sql_result("SQLFetch")
            .into_result_bool(self)
    }

    /// Position the cursor in the current result set. Requires a scrollable cursor for every
    /// orientation except [`FetchOrientation::Next`]. Returns `false` if no row is at the
    /// requested position.
    pub fn fetch_scroll(&self, orientation: FetchOrientation, offset: Len) -> Result<bool, Error> {
        unsafe { SQLFetchScroll(self.handle, orientation, offset) }
            .into_sql_result("SQLFetchScroll")
            .into_result_bool(self)
    }

    /// Closes an open cursor on this statement if there is one. Never fails because of a missing
    /// cursor.
    pub fn close_cursor(&self) -> Result<(), Error> {
        // `SQLFreeStmt` with `Close` is documented not to error if no cursor is open, other than
        // `SQLCloseCursor`.
        unsafe { SQLFreeStmt(self.handle, odbc_sys::FreeStmtOption::Close) }
            .into_sql_result("SQLFreeStmt")
            .into_result(self)
    }

    /// Number of columns of the result set produced by the last executed statement. Zero if the
    /// statement did not produce a result set.
    pub fn num_result_cols(&self) -> Result<i16, Error> {
        let mut out: i16 = 0;
        unsafe { SQLNumResultCols(self.handle, &mut out) }
            .into_sql_result("SQLNumResultCols")
            .into_result(self)?;
        Ok(out)
    }

    /// Declare whether the cursors opened on this statement must be scrollable. Must be called
    /// before the statement is executed.
    pub fn set_cursor_scrollable(&self, scrollable: bool) -> Result<(), Error> {
        let value: usize = if scrollable { 1 } else { 0 };
        unsafe {
            SQLSetStmtAttr(
                self.handle,
                StatementAttribute::CursorScrollable,
                value as Pointer,
                0,
            )
        }
        .into_sql_result("SQLSetStmtAttr")
        .into_result(self)
    }

    /// Describes the parameter marker with the given 1-based number of a prepared statement.
    pub fn describe_param(&self, parameter_number: u16) -> Result<ParameterDescription, Error> {
        let mut data_type = SqlDataType::UNKNOWN_TYPE;
        let mut column_size = 0;
        let mut decimal_digits = 0;
        let mut nullability = Nullability::UNKNOWN;
        unsafe {
            SQLDescribeParam(
                self.handle,
                parameter_number,
                &mut data_type,
                &mut column_size,
                &mut decimal_digits,
                &mut nullability,
            )
        }
        .into_sql_result("SQLDescribeParam")
        .into_result(self)?;
        Ok(ParameterDescription {
            sql_type: data_type,
            column_size,
            decimal_digits,
            nullability,
        })
    }

    /// The application row descriptor associated with this statement. Fields of its records
    /// describe the buffers bound as result columns.
    pub fn application_row_descriptor(&self) -> Result<Descriptor<'_>, Error> {
        self.descriptor(StatementAttribute::AppRowDesc)
    }

    /// The application parameter descriptor associated with this statement. Fields of its records
    /// describe the buffers bound as parameters.
    pub fn application_param_descriptor(&self) -> Result<Descriptor<'_>, Error> {
        self.descriptor(StatementAttribute::AppParamDesc)
    }

    fn descriptor(&self, attribute: StatementAttribute) -> Result<Descriptor<'_>, Error> {
        let mut hdesc: HDesc = HDesc::null();
        unsafe {
            SQLGetStmtAttr(
                self.handle,
                attribute,
                &mut hdesc as *mut HDesc as Pointer,
                0,
                null_mut(),
            )
            .into_sql_result("SQLGetStmtAttr")
            .into_result(self)?;
            Ok(Descriptor::new(hdesc))
        }
    }

    /// Binds an application buffer to a column of the result sets produced on this statement.
    /// `column_number` starts at 1.
    ///
    /// # Safety
    ///
    /// The bound buffer and indicator must live until they are unbound and must match `c_type`.
    pub unsafe fn bind_col(
        &self,
        column_number: u16,
        c_type: CDataType,
        value: Pointer,
        buffer_length: Len,
        indicator: *mut Len,
    ) -> Result<(), Error> {
        SQLBindCol(
            self.handle,
            column_number,
            c_type,
            value,
            buffer_length,
            indicator,
        )
        .into_sql_result("SQLBindCol")
        .into_result(self)
    }

    /// Binds an application buffer as an input parameter of this statement. `parameter_number`
    /// starts at 1.
    ///
    /// # Safety
    ///
    /// The bound buffer and indicator must live until they are unbound and must match `c_type`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn bind_input_parameter(
        &self,
        parameter_number: u16,
        c_type: CDataType,
        sql_type: SqlDataType,
        column_size: usize,
        decimal_digits: i16,
        value: Pointer,
        buffer_length: Len,
        indicator: *mut Len,
    ) -> Result<(), Error> {
        SQLBindParameter(
            self.handle,
            parameter_number,
            ParamType::Input,
            c_type,
            sql_type,
            column_size,
            decimal_digits,
            value,
            buffer_length,
            indicator,
        )
        .into_sql_result("SQLBindParameter")
        .into_result(self)
    }

    /// Release all column bindings of this statement, both in the driver and in the registries of
    /// the affected buffers.
    pub fn unbind_cols(&self) -> Result<(), Error> {
        unsafe { SQLFreeStmt(self.handle, odbc_sys::FreeStmtOption::Unbind) }
            .into_sql_result("SQLFreeStmt")
            .into_result(self)?;
        self.forget_tracked(BindingKind::Column);
        Ok(())
    }

    /// Release all parameter bindings of this statement, both in the driver and in the registries
    /// of the affected buffers.
    pub fn reset_parameters(&self) -> Result<(), Error> {
        unsafe { SQLFreeStmt(self.handle, odbc_sys::FreeStmtOption::ResetParams) }
            .into_sql_result("SQLFreeStmt")
            .into_result(self)?;
        self.forget_tracked(BindingKind::Parameter);
        Ok(())
    }

    fn forget_tracked(&self, kind: BindingKind) {
        let stmt_id = self.stmt_id();
        let mut bound = self.bound.borrow_mut();
        for tracked in bound.iter().filter(|tracked| tracked.kind == kind) {
            if let Some(bindings) = tracked.bindings.upgrade() {
                bindings.forget_binding(stmt_id, tracked.number, kind);
            }
        }
        bound.retain(|tracked| tracked.kind != kind);
    }

    /// Remember that the buffer behind `bindings` is bound to this statement.
    pub(crate) fn track_binding(
        &self,
        id: BufferId,
        number: u16,
        kind: BindingKind,
        bindings: Weak<SharedBindings>,
    ) {
        self.bound.borrow_mut().push(TrackedBinding {
            id,
            number,
            kind,
            bindings,
        });
    }

    /// Called by a buffer which is going away while still bound to this statement. Unbinds the
    /// column or parameter in the driver and removes the tracking entry.
    pub(crate) fn release_binding(
        &self,
        id: BufferId,
        number: u16,
        kind: BindingKind,
        c_type: CDataType,
    ) {
        let result = match kind {
            BindingKind::Column => unsafe {
                // Binding a null pointer releases the column binding.
                self.bind_col(number, c_type, null_mut(), 0, null_mut())
            },
            BindingKind::Parameter => self.application_param_descriptor().and_then(|mut apd| {
                // Clearing the data pointer of the record releases the parameter binding.
                unsafe { apd.set_data_ptr(number as i16, null_mut()) }
            }),
        };
        if let Err(error) = result {
            log::error!(
                "Failed to release binding of column buffer {id:?} (number {number}) from \
                 statement {:?}: {error}",
                self.handle
            );
        }
        self.bound
            .borrow_mut()
            .retain(|tracked| !(tracked.id == id && tracked.number == number && tracked.kind == kind));
    }

    // Catalog functions. Arguments given as `None` do not restrict the result set, empty strings
    // match only empty values.

    /// Executes a `SQLTables` query on this statement. Iterate the result set via `fetch`.
    pub fn tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<(), Error> {
        let catalog = catalog.map(SqlText::new);
        let schema = schema.map(SqlText::new);
        let table = table.map(SqlText::new);
        let table_type = table_type.map(SqlText::new);

        let catalog = to_arg(&catalog);
        let schema = to_arg(&schema);
        let table = to_arg(&table);
        let table_type = to_arg(&table_type);

        unsafe {
            sql_tables(
                self.handle,
                catalog.0,
                catalog.1,
                schema.0,
                schema.1,
                table.0,
                table.1,
                table_type.0,
                table_type.1,
            )
        }
        .into_sql_result("SQLTables")
        .into_result(self)
    }

    /// Executes a `SQLColumns` query on this statement.
    pub fn columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<(), Error> {
        let catalog = catalog.map(SqlText::new);
        let schema = schema.map(SqlText::new);
        let table = table.map(SqlText::new);
        let column = column.map(SqlText::new);

        let catalog = to_arg(&catalog);
        let schema = to_arg(&schema);
        let table = to_arg(&table);
        let column = to_arg(&column);

        unsafe {
            sql_columns(
                self.handle,
                catalog.0,
                catalog.1,
                schema.0,
                schema.1,
                table.0,
                table.1,
                column.0,
                column.1,
            )
        }
        .into_sql_result("SQLColumns")
        .into_result(self)
    }

    /// Executes a `SQLPrimaryKeys` query on this statement.
    pub fn primary_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<(), Error> {
        let catalog = catalog.map(SqlText::new);
        let schema = schema.map(SqlText::new);
        let table = table.map(SqlText::new);

        let catalog = to_arg(&catalog);
        let schema = to_arg(&schema);
        let table = to_arg(&table);

        unsafe {
            sql_primary_keys(
                self.handle,
                catalog.0,
                catalog.1,
                schema.0,
                schema.1,
                table.0,
                table.1,
            )
        }
        .into_sql_result("SQLPrimaryKeys")
        .into_result(self)
    }

    /// Executes a `SQLTablePrivileges` query on this statement.
    pub fn table_privileges(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<(), Error> {
        let catalog = catalog.map(SqlText::new);
        let schema = schema.map(SqlText::new);
        let table = table.map(SqlText::new);

        let catalog = to_arg(&catalog);
        let schema = to_arg(&schema);
        let table = to_arg(&table);

        unsafe {
            sql_table_privileges(
                self.handle,
                catalog.0,
                catalog.1,
                schema.0,
                schema.1,
                table.0,
                table.1,
            )
        }
        .into_sql_result("SQLTablePrivileges")
        .into_result(self)
    }

    /// Executes a `SQLSpecialColumns` query on this statement. `identifier_type`, `scope` and
    /// `nullable` take the raw ODBC values.
    pub fn special_columns(
        &self,
        identifier_type: i16,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        scope: i16,
        nullable: i16,
    ) -> Result<(), Error> {
        let catalog = catalog.map(SqlText::new);
        let schema = schema.map(SqlText::new);
        let table = table.map(SqlText::new);

        let catalog = to_arg(&catalog);
        let schema = to_arg(&schema);
        let table = to_arg(&table);

        unsafe {
            sql_special_columns(
                self.handle,
                identifier_type,
                catalog.0,
                catalog.1,
                schema.0,
                schema.1,
                table.0,
                table.1,
                scope,
                nullable,
            )
        }
        .into_sql_result("SQLSpecialColumns")
        .into_result(self)
    }

    /// Executes a `SQLGetTypeInfo` query on this statement. Pass
    /// [`SqlDataType::UNKNOWN_TYPE`] (`SQL_ALL_TYPES`) to list every type the driver supports.
    pub fn type_info(&self, data_type: SqlDataType) -> Result<(), Error> {
        unsafe { SQLGetTypeInfo(self.handle, data_type) }
            .into_sql_result("SQLGetTypeInfo")
            .into_result(self)
    }

    // `SQLGetData` helpers used to read catalog result sets without bound buffers.

    /// Reads the value of a character column of the current row into an owned string. `None` if
    /// the value is null.
    pub fn get_data_text(&self, column_number: u16) -> Result<Option<String>, Error> {
        let mut value: Vec<SqlChar> = Vec::new();
        let mut chunk: Vec<SqlChar> = vec![0; 512];
        loop {
            let mut indicator: Len = 0;
            let chunk_bytes = chunk.len() * size_of::<SqlChar>();
            let ret = unsafe {
                SQLGetData(
                    self.handle,
                    column_number,
                    GET_DATA_CHAR_TYPE,
                    mut_buf_ptr(&mut chunk) as Pointer,
                    chunk_bytes as Len,
                    &mut indicator,
                )
            };
            if ret == SqlReturn::NO_DATA {
                // The previous chunk already transferred the complete value.
                break;
            }
            ret.into_sql_result("SQLGetData").into_result(self)?;
            if indicator == NULL_DATA {
                return Ok(None);
            }
            // A chunk always ends in a terminating zero, so a full chunk transfers one character
            // less than it has space for.
            let chars_in_chunk = chunk.len() - 1;
            if indicator < 0 || indicator as usize >= chunk_bytes {
                // Value is longer than the chunk (or of unknown length): take the full chunk and
                // fetch the rest with the next call.
                value.extend_from_slice(&chunk[..chars_in_chunk]);
            } else {
                let remaining_chars = indicator as usize / size_of::<SqlChar>();
                value.extend_from_slice(&chunk[..remaining_chars]);
                break;
            }
        }
        Ok(Some(slice_to_utf8(&value)?))
    }

    /// Reads the value of a 16 bit integer column of the current row. `None` if the value is
    /// null.
    pub fn get_data_i16(&self, column_number: u16) -> Result<Option<i16>, Error> {
        let mut value: i16 = 0;
        self.get_data_fixed(
            column_number,
            CDataType::SShort,
            &mut value as *mut i16 as Pointer,
            size_of::<i16>(),
        )
        .map(|has_value| has_value.then_some(value))
    }

    /// Reads the value of a 32 bit integer column of the current row. `None` if the value is
    /// null.
    pub fn get_data_i32(&self, column_number: u16) -> Result<Option<i32>, Error> {
        let mut value: i32 = 0;
        self.get_data_fixed(
            column_number,
            CDataType::SLong,
            &mut value as *mut i32 as Pointer,
            size_of::<i32>(),
        )
        .map(|has_value| has_value.then_some(value))
    }

    /// Reads the value of a 64 bit integer column of the current row. `None` if the value is
    /// null.
    pub fn get_data_i64(&self, column_number: u16) -> Result<Option<i64>, Error> {
        let mut value: i64 = 0;
        self.get_data_fixed(
            column_number,
            CDataType::SBigInt,
            &mut value as *mut i64 as Pointer,
            size_of::<i64>(),
        )
        .map(|has_value| has_value.then_some(value))
    }

    fn get_data_fixed(
        &self,
        column_number: u16,
        c_type: CDataType,
        value: Pointer,
        value_size: usize,
    ) -> Result<bool, Error> {
        let mut indicator: Len = 0;
        unsafe {
            SQLGetData(
                self.handle,
                column_number,
                c_type,
                value,
                value_size as Len,
                &mut indicator,
            )
        }
        .into_sql_result("SQLGetData")
        .into_result(self)?;
        Ok(indicator != NULL_DATA)
    }
}

/// Converts an optional text argument into the (pointer, length) pair expected by the catalog
/// functions. `None` becomes a null pointer, meaning no restriction.
fn to_arg<'a>(text: &'a Option<SqlText<'a>>) -> (*const SqlChar, i16) {
    match text {
        Some(text) => (text.ptr(), text.len_char().try_into().unwrap()),
        None => (null(), 0),
    }
}
