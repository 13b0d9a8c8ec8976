use std::{
    cell::{Cell, RefCell},
    ptr::null_mut,
    rc::Rc,
};

use log::{info, warn};
use odbc_sys::{DriverConnectOption, HWnd, InfoType};

use crate::{
    catalog::{read_sql_type_infos_on, SqlTypeInfo},
    environment::Environment,
    error::{assertion, Error},
    handles::{ConnectionHandle, EnvironmentHandle, OdbcVersion, StatementHandle},
    type_map::{DefaultSql2BufferMap, Sql2BufferTypeMap},
};

/// Database products this crate knows quirks for. Detected by substring matching the DBMS name
/// reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseProduct {
    MsSqlServer,
    MySql,
    Db2,
    PostgreSql,
    Access,
    Excel,
    Unknown,
}

impl DatabaseProduct {
    /// Matches the name reported via `SQLGetInfo(SQL_DBMS_NAME)` to a known product.
    pub fn from_dbms_name(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.contains("MICROSOFT SQL SERVER") {
            DatabaseProduct::MsSqlServer
        } else if upper.contains("MYSQL") {
            DatabaseProduct::MySql
        } else if upper.contains("DB2") {
            DatabaseProduct::Db2
        } else if upper.contains("POSTGRESQL") {
            DatabaseProduct::PostgreSql
        } else if upper.contains("EXCEL") {
            DatabaseProduct::Excel
        } else if upper.contains("ACCESS") {
            DatabaseProduct::Access
        } else {
            DatabaseProduct::Unknown
        }
    }
}

/// Capabilities a driver is known to lack. Unknown products are expected to support everything;
/// the table opening logic consults this instead of scattering product comparisons through the
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverQuirks {
    /// `false` if the driver fails `SQLPrimaryKeys` queries.
    pub supports_primary_keys_query: bool,
    /// `false` if the driver fails `SQLDescribeParam`.
    pub supports_describe_param: bool,
    /// `false` if the driver cannot provide scrollable cursors.
    pub supports_scrollable_cursors: bool,
    /// `false` if the driver fails `SQLTablePrivileges` queries.
    pub supports_table_privileges: bool,
}

impl DriverQuirks {
    pub fn for_product(product: DatabaseProduct) -> Self {
        match product {
            DatabaseProduct::Access | DatabaseProduct::Excel => DriverQuirks {
                supports_primary_keys_query: false,
                supports_describe_param: false,
                supports_scrollable_cursors: false,
                supports_table_privileges: false,
            },
            _ => DriverQuirks {
                supports_primary_keys_query: true,
                supports_describe_param: true,
                supports_scrollable_cursors: true,
                supports_table_privileges: true,
            },
        }
    }
}

/// Whether each statement is committed as it executes, or changes accumulate until an explicit
/// commit or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Auto,
    Manual,
}

/// Transaction isolation levels as defined by the `SQL_TXN_*` bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionIsolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    pub fn as_mask(self) -> u32 {
        match self {
            TransactionIsolation::ReadUncommitted => 0x1,
            TransactionIsolation::ReadCommitted => 0x2,
            TransactionIsolation::RepeatableRead => 0x4,
            TransactionIsolation::Serializable => 0x8,
        }
    }

    pub fn from_mask(mask: u32) -> Option<Self> {
        match mask {
            0x1 => Some(TransactionIsolation::ReadUncommitted),
            0x2 => Some(TransactionIsolation::ReadCommitted),
            0x4 => Some(TransactionIsolation::RepeatableRead),
            0x8 => Some(TransactionIsolation::Serializable),
            _ => None,
        }
    }
}

/// Driver and data source information cached when a database is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub dbms_name: String,
    pub dbms_version: String,
    pub driver_name: String,
    pub driver_version: String,
    pub driver_odbc_version: String,
    pub database_name: String,
    pub server_name: String,
    pub max_catalog_name_len: u16,
    pub max_schema_name_len: u16,
    pub max_table_name_len: u16,
    pub max_column_name_len: u16,
    pub cursor_commit_behavior: u16,
    pub cursor_rollback_behavior: u16,
    pub scroll_options: u32,
    pub txn_isolation_options: u32,
    pub supports_transactions: bool,
    pub max_concurrent_activities: u16,
}

impl DatabaseInfo {
    fn gather(connection: &ConnectionHandle) -> Result<Self, Error> {
        Ok(DatabaseInfo {
            dbms_name: connection.info_string(InfoType::DbmsName)?,
            dbms_version: connection.info_string(InfoType::DbmsVer)?,
            driver_name: connection.info_string(InfoType::DriverName)?,
            driver_version: connection.info_string(InfoType::DriverVer)?,
            driver_odbc_version: connection.info_string(InfoType::DriverOdbcVer)?,
            database_name: connection.info_string(InfoType::DatabaseName)?,
            server_name: connection.info_string(InfoType::ServerName)?,
            max_catalog_name_len: connection.info_u16(InfoType::MaxCatalogNameLen)?,
            max_schema_name_len: connection.info_u16(InfoType::MaxSchemaNameLen)?,
            max_table_name_len: connection.info_u16(InfoType::MaxTableNameLen)?,
            max_column_name_len: connection.info_u16(InfoType::MaxColumnNameLen)?,
            cursor_commit_behavior: connection.info_u16(InfoType::CursorCommitBehaviour)?,
            cursor_rollback_behavior: connection.info_u16(InfoType::CursorRollbackBehavior)?,
            scroll_options: connection.info_u32(InfoType::ScrollOptions)?,
            txn_isolation_options: connection.info_u32(InfoType::TransactionIsolationProtocol)?,
            supports_transactions: connection.info_u16(InfoType::TransactionCapable)? != 0,
            max_concurrent_activities: connection.info_u16(InfoType::MaxConcurrentActivities)?,
        })
    }
}

pub(crate) struct OpenState {
    pub connection: Rc<ConnectionHandle>,
    pub stmt_catalog: Rc<StatementHandle>,
    pub stmt_exec: Rc<StatementHandle>,
    pub info: DatabaseInfo,
    pub dbms: DatabaseProduct,
    pub quirks: DriverQuirks,
    pub effective_version: OdbcVersion,
    pub commit_mode: Cell<CommitMode>,
    pub type_infos: Vec<SqlTypeInfo>,
}

/// An open connection to a data source, together with the driver information, the catalog query
/// surface and the transaction control of this crate.
///
/// A database is created from an [`Environment`] and opened either with a connection string or
/// with data source name, user and password. Exactly one of the two modes is used per instance.
/// Closing rolls back an open manual-commit transaction, releases the internal statements and
/// disconnects; it is idempotent and never fails upward.
pub struct Database {
    environment: Rc<EnvironmentHandle>,
    requested_version: OdbcVersion,
    login_timeout: Cell<Option<u32>>,
    type_map: RefCell<Option<Rc<dyn Sql2BufferTypeMap>>>,
    open: RefCell<Option<OpenState>>,
}

impl Database {
    /// Creates a closed database bound to the given environment.
    pub fn new(environment: &Environment) -> Self {
        Database {
            environment: Rc::clone(environment.handle()),
            requested_version: environment.odbc_version(),
            login_timeout: Cell::new(None),
            type_map: RefCell::new(None),
            open: RefCell::new(None),
        }
    }

    /// Injects the policy used to pick buffer types for SQL types. If no map is set, a
    /// [`DefaultSql2BufferMap`] keyed to the effective ODBC version is installed on open.
    pub fn set_sql2buffer_type_map(&self, map: Rc<dyn Sql2BufferTypeMap>) {
        *self.type_map.borrow_mut() = Some(map);
    }

    /// The installed buffer type map. Fails if the database was never opened and no map was
    /// injected.
    pub fn sql2buffer_type_map(&self) -> Result<Rc<dyn Sql2BufferTypeMap>, Error> {
        let map = self.type_map.borrow();
        assertion!(
            map.is_some(),
            "no buffer type map installed; open the database first or inject one"
        );
        Ok(Rc::clone(map.as_ref().unwrap()))
    }

    /// Number of seconds the driver waits for the login request when opening. Must be set before
    /// opening. `0` means wait indefinitely.
    pub fn set_login_timeout(&self, seconds: u32) {
        self.login_timeout.set(Some(seconds));
    }

    /// `true` if this database is connected to a data source.
    pub fn is_open(&self) -> bool {
        self.open.borrow().is_some()
    }

    /// Opens the database using a data source name, user and password.
    pub fn open(&self, data_source_name: &str, user: &str, pwd: &str) -> Result<(), Error> {
        assertion!(!self.is_open(), "database is already open");
        let connection = self.allocate_connection()?;
        connection.connect(data_source_name, user, pwd)?;
        self.complete_open(connection)
    }

    /// Opens the database using an ODBC connection string.
    pub fn open_with_connection_string(&self, connection_string: &str) -> Result<(), Error> {
        assertion!(!self.is_open(), "database is already open");
        let connection = self.allocate_connection()?;
        unsafe {
            connection.driver_connect(
                connection_string,
                null_mut(),
                None,
                DriverConnectOption::NoPrompt,
            )?;
        }
        self.complete_open(connection)
    }

    /// Opens the database using an ODBC connection string, letting the driver prompt the user
    /// for missing parts of it.
    ///
    /// # Safety
    ///
    /// `parent_window` must either be a valid window handle or `NULL`.
    pub unsafe fn open_with_prompt(
        &self,
        connection_string: &str,
        parent_window: HWnd,
    ) -> Result<(), Error> {
        assertion!(!self.is_open(), "database is already open");
        let connection = self.allocate_connection()?;
        connection.driver_connect(
            connection_string,
            parent_window,
            None,
            DriverConnectOption::Complete,
        )?;
        self.complete_open(connection)
    }

    fn allocate_connection(&self) -> Result<Rc<ConnectionHandle>, Error> {
        let connection = ConnectionHandle::allocate(Rc::clone(&self.environment))?;
        if let Some(seconds) = self.login_timeout.get() {
            connection.set_login_timeout(seconds)?;
        }
        Ok(connection)
    }

    fn complete_open(&self, connection: Rc<ConnectionHandle>) -> Result<(), Error> {
        let stmt_catalog = StatementHandle::allocate(Rc::clone(&connection))?;
        let stmt_exec = StatementHandle::allocate(Rc::clone(&connection))?;

        let info = DatabaseInfo::gather(&connection)?;

        let driver_version =
            OdbcVersion::from_info_text(&info.driver_odbc_version).unwrap_or(OdbcVersion::V2);
        let effective_version = self.requested_version.min(driver_version);
        if effective_version != self.requested_version {
            warn!(
                "Environment requested ODBC version {}, but driver only supports {}. Using {}.",
                self.requested_version, driver_version, effective_version
            );
        } else {
            info!("Using ODBC version {effective_version}.");
        }

        if self.type_map.borrow().is_none() {
            *self.type_map.borrow_mut() =
                Some(Rc::new(DefaultSql2BufferMap::new(effective_version)));
        }

        let dbms = DatabaseProduct::from_dbms_name(&info.dbms_name);
        let quirks = DriverQuirks::for_product(dbms);

        if let Err(error) = connection.set_tracing(false) {
            warn!("Could not disable connection tracing: {error}");
        }

        // Statements are committed one by one unless the client asks for a transaction, so we
        // switch transaction capable drivers to manual commit mode up front.
        let commit_mode = if info.supports_transactions && connection.autocommit()? {
            connection.set_autocommit(false)?;
            CommitMode::Manual
        } else if info.supports_transactions {
            CommitMode::Manual
        } else {
            CommitMode::Auto
        };

        let type_infos = read_sql_type_infos_on(&stmt_catalog)?;

        *self.open.borrow_mut() = Some(OpenState {
            connection,
            stmt_catalog,
            stmt_exec,
            info,
            dbms,
            quirks,
            effective_version,
            commit_mode: Cell::new(commit_mode),
            type_infos,
        });
        Ok(())
    }

    /// Closes the database: rolls back an open manual-commit transaction, releases the internal
    /// statements, disconnects and frees the connection. Tolerant against errors and idempotent;
    /// failures are logged and skipped over.
    pub fn close(&self) {
        let Some(state) = self.open.borrow_mut().take() else {
            return;
        };
        if state.commit_mode.get() == CommitMode::Manual {
            if let Err(error) = state.connection.rollback() {
                warn!("Rollback on close failed: {error}");
            }
        }
        // Free the statement handles before disconnecting.
        drop(state.stmt_catalog);
        drop(state.stmt_exec);
        state.connection.disconnect_quietly();
        // Dropping the last reference frees the connection handle, unless statements of still
        // open tables keep it alive.
        drop(state.connection);
    }

    /// Commits the current transaction.
    pub fn commit_trans(&self) -> Result<(), Error> {
        self.with_open(|state| state.connection.commit())
    }

    /// Rolls back the current transaction.
    pub fn rollback_trans(&self) -> Result<(), Error> {
        self.with_open(|state| state.connection.rollback())
    }

    /// Reads the commit mode from the driver and synchronizes the cached value with it.
    pub fn read_commit_mode(&self) -> Result<CommitMode, Error> {
        self.with_open(|state| {
            let mode = if state.connection.autocommit()? {
                CommitMode::Auto
            } else {
                CommitMode::Manual
            };
            state.commit_mode.set(mode);
            Ok(mode)
        })
    }

    /// The cached commit mode, as established on open or by the last `set_commit_mode` or
    /// `read_commit_mode`.
    pub fn commit_mode(&self) -> Result<CommitMode, Error> {
        self.with_open(|state| Ok(state.commit_mode.get()))
    }

    /// Switches the commit mode. Rolls back any open transaction first.
    pub fn set_commit_mode(&self, mode: CommitMode) -> Result<(), Error> {
        self.with_open(|state| {
            if state.commit_mode.get() == CommitMode::Manual {
                state.connection.rollback()?;
            }
            state
                .connection
                .set_autocommit(mode == CommitMode::Auto)?;
            state.commit_mode.set(mode);
            Ok(())
        })
    }

    /// Reads the active transaction isolation level from the driver.
    pub fn read_transaction_isolation(&self) -> Result<TransactionIsolation, Error> {
        self.with_open(|state| {
            let mask = state.connection.transaction_isolation()?;
            TransactionIsolation::from_mask(mask).ok_or_else(|| Error::IllegalArgument {
                description: format!("driver reported unknown transaction isolation mask {mask}"),
            })
        })
    }

    /// `true` if the driver offers the given isolation level.
    pub fn can_set_transaction_isolation(&self, level: TransactionIsolation) -> Result<bool, Error> {
        self.with_open(|state| Ok(state.info.txn_isolation_options & level.as_mask() != 0))
    }

    /// Switches the transaction isolation level for subsequent transactions. Closes the cursors
    /// of the internal statements and rolls back an open transaction first.
    pub fn set_transaction_isolation(&self, level: TransactionIsolation) -> Result<(), Error> {
        self.with_open(|state| {
            state.stmt_catalog.close_cursor()?;
            state.stmt_exec.close_cursor()?;
            if state.commit_mode.get() == CommitMode::Manual {
                state.connection.rollback()?;
            }
            state.connection.set_transaction_isolation(level.as_mask())
        })
    }

    /// Executes `sql` directly on the statement dedicated to free-form SQL. A statement which
    /// affects no rows is not an error.
    pub fn exec_sql(&self, sql: &str) -> Result<(), Error> {
        self.with_open(|state| {
            state.stmt_exec.close_cursor()?;
            // No buffers are ever bound to the exec statement.
            unsafe { state.stmt_exec.exec_direct(sql) }.map(|_had_data| ())
        })
    }

    /// The product behind the connection, as detected from the DBMS name.
    pub fn dbms(&self) -> Result<DatabaseProduct, Error> {
        self.with_open(|state| Ok(state.dbms))
    }

    /// Known capability gaps of the connected driver.
    pub fn quirks(&self) -> Result<DriverQuirks, Error> {
        self.with_open(|state| Ok(state.quirks))
    }

    /// The driver information cached on open.
    pub fn info(&self) -> Result<DatabaseInfo, Error> {
        self.with_open(|state| Ok(state.info.clone()))
    }

    /// The ODBC version in effect for this connection: the lower of the version requested by the
    /// environment and the version supported by the driver.
    pub fn odbc_version(&self) -> Result<OdbcVersion, Error> {
        self.with_open(|state| Ok(state.effective_version))
    }

    /// The ODBC version the driver reports for itself.
    pub fn driver_odbc_version(&self) -> Result<OdbcVersion, Error> {
        self.with_open(|state| {
            OdbcVersion::from_info_text(&state.info.driver_odbc_version).ok_or_else(|| {
                Error::IllegalArgument {
                    description: format!(
                        "driver reported unparsable ODBC version '{}'",
                        state.info.driver_odbc_version
                    ),
                }
            })
        })
    }

    /// The SQL type infos read from the driver on open.
    pub fn sql_type_infos(&self) -> Result<Vec<SqlTypeInfo>, Error> {
        self.with_open(|state| Ok(state.type_infos.clone()))
    }

    /// `true` if the driver listed `sql_type` in its type infos on open.
    pub fn supports_sql_type(&self, sql_type: odbc_sys::SqlDataType) -> Result<bool, Error> {
        self.with_open(|state| {
            Ok(state
                .type_infos
                .iter()
                .any(|type_info| type_info.sql_type == sql_type.0))
        })
    }

    pub(crate) fn with_open<T>(
        &self,
        f: impl FnOnce(&OpenState) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let open = self.open.borrow();
        assertion!(open.is_some(), "database is not open");
        f(open.as_ref().unwrap())
    }

    pub(crate) fn connection(&self) -> Result<Rc<ConnectionHandle>, Error> {
        self.with_open(|state| Ok(Rc::clone(&state.connection)))
    }

    pub(crate) fn catalog_statement(&self) -> Result<Rc<StatementHandle>, Error> {
        self.with_open(|state| Ok(Rc::clone(&state.stmt_catalog)))
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{DatabaseProduct, DriverQuirks, TransactionIsolation};

    #[test]
    fn product_detection_by_substring() {
        assert_eq!(
            DatabaseProduct::MsSqlServer,
            DatabaseProduct::from_dbms_name("Microsoft SQL Server")
        );
        assert_eq!(
            DatabaseProduct::MySql,
            DatabaseProduct::from_dbms_name("MySQL")
        );
        assert_eq!(DatabaseProduct::Db2, DatabaseProduct::from_dbms_name("DB2/LINUXX8664"));
        assert_eq!(
            DatabaseProduct::Access,
            DatabaseProduct::from_dbms_name("ACCESS")
        );
        assert_eq!(
            DatabaseProduct::Excel,
            DatabaseProduct::from_dbms_name("EXCEL")
        );
        assert_eq!(
            DatabaseProduct::PostgreSql,
            DatabaseProduct::from_dbms_name("PostgreSQL")
        );
        assert_eq!(
            DatabaseProduct::Unknown,
            DatabaseProduct::from_dbms_name("SQLite")
        );
    }

    #[test]
    fn office_products_lack_catalog_support() {
        for product in [DatabaseProduct::Access, DatabaseProduct::Excel] {
            let quirks = DriverQuirks::for_product(product);
            assert!(!quirks.supports_primary_keys_query);
            assert!(!quirks.supports_describe_param);
            assert!(!quirks.supports_scrollable_cursors);
        }
        let quirks = DriverQuirks::for_product(DatabaseProduct::MsSqlServer);
        assert!(quirks.supports_primary_keys_query);
        assert!(quirks.supports_scrollable_cursors);
    }

    #[test]
    fn isolation_masks_roundtrip() {
        for level in [
            TransactionIsolation::ReadUncommitted,
            TransactionIsolation::ReadCommitted,
            TransactionIsolation::RepeatableRead,
            TransactionIsolation::Serializable,
        ] {
            assert_eq!(Some(level), TransactionIsolation::from_mask(level.as_mask()));
        }
        assert_eq!(None, TransactionIsolation::from_mask(0x16));
    }
}
