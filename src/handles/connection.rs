use std::{mem::size_of, ptr::null_mut, rc::Rc};

use log::debug;
use odbc_sys::{
    CompletionType, ConnectionAttribute, DriverConnectOption, HDbc, HWnd, Handle, HandleType,
    InfoType, Pointer, SQLAllocHandle, SQLDisconnect, SQLEndTran, SqlReturn,
};

use super::{
    as_handle::AsHandle,
    buffer::{clamp_small_int, mut_buf_ptr},
    drop_handle,
    environment::EnvironmentHandle,
    logging::log_diagnostics,
    sql_char::{slice_to_utf8, OutputStringBuffer, SqlChar, SqlText},
    sql_result::ExtSqlReturn,
};
use crate::error::Error;

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use odbc_sys::{
    SQLConnect as sql_connect, SQLDriverConnect as sql_driver_connect,
    SQLGetConnectAttr as sql_get_connect_attr, SQLGetInfo as sql_get_info,
    SQLSetConnectAttr as sql_set_connect_attr,
};

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use odbc_sys::{
    SQLConnectW as sql_connect, SQLDriverConnectW as sql_driver_connect,
    SQLGetConnectAttrW as sql_get_connect_attr, SQLGetInfoW as sql_get_info,
    SQLSetConnectAttrW as sql_set_connect_attr,
};

/// An allocated ODBC connection handle. References storage of all information about the
/// connection to the data source, including status, transaction state and error information.
///
/// Holds a strong reference to the environment it has been allocated on, so the environment is
/// guaranteed to live at least as long as the connection.
pub struct ConnectionHandle {
    handle: HDbc,
    /// Keeps the parent environment alive for at least as long as this connection.
    _parent: Rc<EnvironmentHandle>,
}

unsafe impl AsHandle for ConnectionHandle {
    fn as_handle(&self) -> Handle {
        self.handle.as_handle()
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Dbc
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        unsafe {
            drop_handle(self.handle.as_handle(), HandleType::Dbc);
        }
    }
}

impl ConnectionHandle {
    /// Allocates a new connection handle as a child of `environment`.
    pub fn allocate(environment: Rc<EnvironmentHandle>) -> Result<Rc<Self>, Error> {
        let mut handle = Handle::null();
        unsafe { SQLAllocHandle(HandleType::Dbc, environment.as_handle(), &mut handle) }
            .into_sql_result("SQLAllocHandle")
            .into_result(environment.as_ref())?;
        debug!("SQLAllocHandle allocated connection (Dbc) handle '{handle:?}'");
        Ok(Rc::new(ConnectionHandle {
            handle: handle.as_hdbc(),
            _parent: environment,
        }))
    }

    /// Establishes a connection to a driver and a data source using a data source name, a user
    /// identifier and an authentication string (typically the password).
    pub fn connect(&self, data_source_name: &str, user: &str, pwd: &str) -> Result<(), Error> {
        let data_source_name = SqlText::new(data_source_name);
        let user = SqlText::new(user);
        let pwd = SqlText::new(pwd);
        unsafe {
            sql_connect(
                self.handle,
                data_source_name.ptr(),
                data_source_name.len_char().try_into().unwrap(),
                user.ptr(),
                user.len_char().try_into().unwrap(),
                pwd.ptr(),
                pwd.len_char().try_into().unwrap(),
            )
        }
        .into_sql_result("SQLConnect")
        .into_result(self)
    }

    /// An alternative to `connect` for data sources requiring more connection information than
    /// name, user and password, or data sources not registered in the system information.
    ///
    /// # Safety
    ///
    /// `parent_window` must either be a valid window handle or `NULL`. A window handle is only
    /// required for driver completion modes which may prompt the user.
    pub unsafe fn driver_connect(
        &self,
        connection_string: &str,
        parent_window: HWnd,
        mut completed_connection_string: Option<&mut OutputStringBuffer>,
        driver_completion: DriverConnectOption,
    ) -> Result<(), Error> {
        let connection_string = SqlText::new(connection_string);
        let (out_connection_string, out_buf_len, actual_len_ptr) = completed_connection_string
            .as_mut()
            .map(|osb| (osb.mut_buf_ptr(), osb.buf_len(), osb.mut_actual_len_ptr()))
            .unwrap_or((null_mut(), 0, null_mut()));

        sql_driver_connect(
            self.handle,
            parent_window,
            connection_string.ptr(),
            connection_string.len_char().try_into().unwrap(),
            out_connection_string,
            out_buf_len,
            actual_len_ptr,
            driver_completion,
        )
        .into_sql_result("SQLDriverConnect")
        .into_result(self)
    }

    /// Disconnect from the data source.
    pub fn disconnect(&self) -> Result<(), Error> {
        unsafe { SQLDisconnect(self.handle) }
            .into_sql_result("SQLDisconnect")
            .into_result(self)
    }

    /// Commit the current transaction in manual-commit mode.
    pub fn commit(&self) -> Result<(), Error> {
        unsafe { SQLEndTran(HandleType::Dbc, self.as_handle(), CompletionType::Commit) }
            .into_sql_result("SQLEndTran")
            .into_result(self)
    }

    /// Roll back the current transaction in manual-commit mode.
    pub fn rollback(&self) -> Result<(), Error> {
        unsafe { SQLEndTran(HandleType::Dbc, self.as_handle(), CompletionType::Rollback) }
            .into_sql_result("SQLEndTran")
            .into_result(self)
    }

    /// Enable or disable auto commit mode. ODBC connections start out with auto commit enabled.
    pub fn set_autocommit(&self, enabled: bool) -> Result<(), Error> {
        let val: usize = if enabled { 1 } else { 0 };
        self.set_numeric_attribute(ConnectionAttribute::AUTOCOMMIT, val as Pointer)
    }

    /// `true` if the connection currently auto commits each statement.
    pub fn autocommit(&self) -> Result<bool, Error> {
        Ok(self.numeric_attribute(ConnectionAttribute::AUTOCOMMIT)? != 0)
    }

    /// Set the transaction isolation level for the next transactions started on this connection.
    /// `mask` is one of the `SQL_TXN_*` bit values.
    pub fn set_transaction_isolation(&self, mask: u32) -> Result<(), Error> {
        self.set_numeric_attribute(ConnectionAttribute::TXN_ISOLATION, mask as usize as Pointer)
    }

    /// The currently active transaction isolation level as a `SQL_TXN_*` bit value.
    pub fn transaction_isolation(&self) -> Result<u32, Error> {
        Ok(self.numeric_attribute(ConnectionAttribute::TXN_ISOLATION)? as u32)
    }

    /// Number of seconds to wait for a login request to complete. Must be called before
    /// connecting. `0` means wait indefinitely.
    pub fn set_login_timeout(&self, seconds: u32) -> Result<(), Error> {
        self.set_numeric_attribute(
            ConnectionAttribute::LOGIN_TIMEOUT,
            seconds as usize as Pointer,
        )
    }

    /// Enable or disable driver manager tracing for this connection.
    pub fn set_tracing(&self, enabled: bool) -> Result<(), Error> {
        let val: usize = if enabled { 1 } else { 0 };
        self.set_numeric_attribute(ConnectionAttribute::TRACE, val as Pointer)
    }

    fn set_numeric_attribute(
        &self,
        attribute: ConnectionAttribute,
        value: Pointer,
    ) -> Result<(), Error> {
        unsafe {
            sql_set_connect_attr(
                self.handle,
                attribute,
                value,
                0, // ignored for numeric attributes
            )
        }
        .into_sql_result("SQLSetConnectAttr")
        .into_result(self)
    }

    fn numeric_attribute(&self, attribute: ConnectionAttribute) -> Result<usize, Error> {
        let mut out: usize = 0;
        unsafe {
            sql_get_connect_attr(
                self.handle,
                attribute,
                &mut out as *mut usize as Pointer,
                0,
                null_mut(),
            )
        }
        .into_sql_result("SQLGetConnectAttr")
        .into_result(self)?;
        Ok(out)
    }

    /// Fetch a string field via `SQLGetInfo`.
    pub fn info_string(&self, info_type: InfoType) -> Result<String, Error> {
        // String length in bytes, excluding the terminating zero.
        let mut length_in_bytes: i16 = 0;
        let mut buf: Vec<SqlChar> = vec![0; 256];

        unsafe {
            sql_get_info(
                self.handle,
                info_type,
                mut_buf_ptr(&mut buf) as Pointer,
                clamp_small_int(buf.len() * size_of::<SqlChar>()),
                &mut length_in_bytes as *mut i16,
            )
            .into_sql_result("SQLGetInfo")
            .into_result(self)?;

            if buf.len() * size_of::<SqlChar>() <= length_in_bytes as usize {
                buf.resize(length_in_bytes as usize / size_of::<SqlChar>() + 1, 0);
                sql_get_info(
                    self.handle,
                    info_type,
                    mut_buf_ptr(&mut buf) as Pointer,
                    clamp_small_int(buf.len() * size_of::<SqlChar>()),
                    &mut length_in_bytes as *mut i16,
                )
                .into_sql_result("SQLGetInfo")
                .into_result(self)?;
            }
        }

        // Resize buffer to the exact string length without terminating zero
        buf.resize(length_in_bytes as usize / size_of::<SqlChar>(), 0);
        slice_to_utf8(&buf)
    }

    /// Fetch an unsigned 16 bit integer field via `SQLGetInfo`.
    pub fn info_u16(&self, info_type: InfoType) -> Result<u16, Error> {
        let mut value = 0u16;
        unsafe {
            sql_get_info(
                self.handle,
                info_type,
                &mut value as *mut u16 as Pointer,
                // Some drivers require the buffer length although the documentation says it is
                // ignored for fixed size fields.
                size_of::<u16>() as i16,
                null_mut(),
            )
        }
        .into_sql_result("SQLGetInfo")
        .into_result(self)?;
        Ok(value)
    }

    /// Fetch an unsigned 32 bit integer field via `SQLGetInfo`.
    pub fn info_u32(&self, info_type: InfoType) -> Result<u32, Error> {
        let mut value = 0u32;
        unsafe {
            sql_get_info(
                self.handle,
                info_type,
                &mut value as *mut u32 as Pointer,
                size_of::<u32>() as i16,
                null_mut(),
            )
        }
        .into_sql_result("SQLGetInfo")
        .into_result(self)?;
        Ok(value)
    }

    /// Raw access to the underlying handle, used when allocating child statement handles.
    pub(crate) fn as_sys(&self) -> HDbc {
        self.handle
    }

    /// Disconnects without surfacing errors, used on close paths which must not fail. Returns
    /// `true` if the driver accepted the disconnect.
    pub fn disconnect_quietly(&self) -> bool {
        let ret = unsafe { SQLDisconnect(self.handle) };
        if ret != SqlReturn::SUCCESS && ret != SqlReturn::SUCCESS_WITH_INFO {
            log_diagnostics(self);
            return false;
        }
        true
    }
}
