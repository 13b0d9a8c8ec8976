use std::{cell::Cell, rc::Rc};

use odbc_sys::FetchOrientation;

use crate::{
    buffers::ColumnBuffer,
    database::Database,
    error::{assertion, Error},
    handles::StatementHandle,
};

/// Executes SQL statements against a database, either directly or prepared for repeated
/// execution. Column buffers can be bound to receive the results, and as parameters for the
/// statement's parameter markers.
///
/// Dropping the statement severs all buffer bindings still in place.
pub struct ExecutableStatement {
    stmt: Rc<StatementHandle>,
    db: Rc<Database>,
    prepared: Cell<bool>,
    forward_only: bool,
}

impl ExecutableStatement {
    /// Allocates a statement on the given open database. Cursors opened by this statement are
    /// scrollable unless `forward_only_cursors` is set or the driver cannot scroll.
    pub fn new(db: &Rc<Database>, forward_only_cursors: bool) -> Result<Self, Error> {
        let connection = db.connection()?;
        let stmt = StatementHandle::allocate(connection)?;
        let quirks = db.quirks()?;
        let forward_only = forward_only_cursors || !quirks.supports_scrollable_cursors;
        if quirks.supports_scrollable_cursors {
            stmt.set_cursor_scrollable(!forward_only)?;
        }
        Ok(ExecutableStatement {
            stmt,
            db: Rc::clone(db),
            prepared: Cell::new(false),
            forward_only,
        })
    }

    /// `true` if cursors of this statement can only move forward.
    pub fn forward_only_cursors(&self) -> bool {
        self.forward_only
    }

    /// Bind `buffer` to receive column `column_nr` (1-based) of the result sets produced by this
    /// statement.
    pub fn bind_column(&self, buffer: &ColumnBuffer, column_nr: u16) -> Result<(), Error> {
        buffer.bind_select(&self.stmt, column_nr)
    }

    /// Bind `buffer` as the value of parameter marker `param_nr` (1-based). The driver is asked
    /// to describe the parameter if it supports that, otherwise the properties set on the buffer
    /// are used.
    pub fn bind_parameter(&self, buffer: &ColumnBuffer, param_nr: u16) -> Result<(), Error> {
        let use_describe_param = self.db.quirks()?.supports_describe_param;
        buffer.bind_parameter(&self.stmt, param_nr, use_describe_param)
    }

    /// Like [`Self::bind_parameter`], but with explicit control over whether the driver is asked
    /// to describe the parameter.
    pub fn bind_parameter_with(
        &self,
        buffer: &ColumnBuffer,
        param_nr: u16,
        use_describe_param: bool,
    ) -> Result<(), Error> {
        buffer.bind_parameter(&self.stmt, param_nr, use_describe_param)
    }

    /// Executes `sql` directly. An eventually open cursor is closed first. Returns `false` if an
    /// update, insert or delete affected no rows.
    pub fn execute_direct(&self, sql: &str) -> Result<bool, Error> {
        self.stmt.close_cursor()?;
        // Bound buffers are kept alive by their binding registries for as long as they are bound.
        unsafe { self.stmt.exec_direct(sql) }
    }

    /// Prepares `sql` for repeated execution via [`Self::execute_prepared`].
    pub fn prepare(&self, sql: &str) -> Result<(), Error> {
        self.stmt.prepare(sql)?;
        self.prepared.set(true);
        Ok(())
    }

    /// `true` if a statement has been prepared on this handle.
    pub fn is_prepared(&self) -> bool {
        self.prepared.get()
    }

    /// Executes the prepared statement with the current values of all bound parameter buffers.
    /// Returns `false` if an update, insert or delete affected no rows.
    pub fn execute_prepared(&self) -> Result<bool, Error> {
        assertion!(self.prepared.get(), "no statement has been prepared");
        self.stmt.close_cursor()?;
        unsafe { self.stmt.execute() }
    }

    /// Releases all column bindings of this statement.
    pub fn unbind_columns(&self) -> Result<(), Error> {
        self.stmt.unbind_cols()
    }

    /// Releases all parameter bindings of this statement.
    pub fn reset_parameters(&self) -> Result<(), Error> {
        self.stmt.reset_parameters()
    }

    /// Closes an eventually open cursor. Safe to call if none is open.
    pub fn select_close(&self) -> Result<(), Error> {
        self.stmt.close_cursor()
    }

    /// Fetches the next row of the open result set into the bound buffers. `false` once the
    /// result set is exhausted.
    pub fn select_next(&self) -> Result<bool, Error> {
        self.stmt.fetch()
    }

    /// Fetches the previous row. Requires scrollable cursors.
    pub fn select_prev(&self) -> Result<bool, Error> {
        self.scroll(FetchOrientation::Prior, 0)
    }

    /// Fetches the first row of the result set. Requires scrollable cursors.
    pub fn select_first(&self) -> Result<bool, Error> {
        self.scroll(FetchOrientation::First, 0)
    }

    /// Fetches the last row of the result set. Requires scrollable cursors.
    pub fn select_last(&self) -> Result<bool, Error> {
        self.scroll(FetchOrientation::Last, 0)
    }

    /// Fetches the row at the given absolute position. Requires scrollable cursors.
    pub fn select_absolute(&self, position: isize) -> Result<bool, Error> {
        self.scroll(FetchOrientation::Absolute, position)
    }

    /// Fetches the row `offset` rows away from the current one. Requires scrollable cursors.
    /// An offset of zero is passed to the driver unchanged; its effect is driver dependent.
    pub fn select_relative(&self, offset: isize) -> Result<bool, Error> {
        self.scroll(FetchOrientation::Relative, offset)
    }

    fn scroll(&self, orientation: FetchOrientation, offset: isize) -> Result<bool, Error> {
        assertion!(
            !self.forward_only,
            "cursor operation requires scrollable cursors, but this statement is forward only"
        );
        self.stmt.fetch_scroll(orientation, offset)
    }
}
