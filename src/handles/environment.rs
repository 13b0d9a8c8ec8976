use std::fmt;

use log::debug;
use odbc_sys::{
    AttrOdbcVersion, EnvironmentAttribute, FetchOrientation, HEnv, Handle, HandleType,
    SQLAllocHandle, SQLSetEnvAttr, SqlReturn,
};

use super::{
    as_handle::AsHandle,
    buffer::clamp_small_int,
    drop_handle,
    sql_char::SzBuffer,
    sql_result::{ExtSqlReturn, SqlResult},
};
use crate::error::Error;

#[cfg(not(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows"))))]
use odbc_sys::SQLDataSources as sql_data_sources;

#[cfg(any(feature = "wide", all(not(feature = "narrow"), target_os = "windows")))]
use odbc_sys::SQLDataSourcesW as sql_data_sources;

/// ODBC API conformance version declared by the application, or reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OdbcVersion {
    /// ODBC 2.x
    V2,
    /// ODBC 3.0
    V3,
    /// ODBC 3.80
    V3_8,
}

impl OdbcVersion {
    /// Parses version strings as reported by `SQLGetInfo(SQL_DRIVER_ODBC_VER)`, e.g. `"03.80"`.
    pub fn from_info_text(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let major: u32 = parts.next()?.trim().parse().ok()?;
        let minor: u32 = parts
            .next()
            .map(|m| m.trim().parse().ok())
            .unwrap_or(Some(0))?;
        match major {
            2 => Some(OdbcVersion::V2),
            3 if minor >= 80 => Some(OdbcVersion::V3_8),
            3 => Some(OdbcVersion::V3),
            _ => None,
        }
    }

    fn as_attribute(self) -> AttrOdbcVersion {
        match self {
            OdbcVersion::V2 => AttrOdbcVersion::V2,
            OdbcVersion::V3 => AttrOdbcVersion::Odbc3,
            OdbcVersion::V3_8 => AttrOdbcVersion::Odbc3_80,
        }
    }
}

impl fmt::Display for OdbcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OdbcVersion::V2 => write!(f, "2"),
            OdbcVersion::V3 => write!(f, "3"),
            OdbcVersion::V3_8 => write!(f, "3.8"),
        }
    }
}

/// Description of a data source registered with the driver manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceInfo {
    /// Name of the data source, used e.g. to connect to it.
    pub server_name: String,
    /// Description of the driver associated with the data source.
    pub driver: String,
}

/// An allocated ODBC environment handle. A global context in which to access data.
pub struct EnvironmentHandle {
    /// Invariant: always points to a valid ODBC environment
    handle: HEnv,
}

unsafe impl AsHandle for EnvironmentHandle {
    fn as_handle(&self) -> Handle {
        self.handle.as_handle()
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Env
    }
}

impl Drop for EnvironmentHandle {
    fn drop(&mut self) {
        unsafe {
            drop_handle(self.handle.as_handle(), HandleType::Env);
        }
    }
}

impl EnvironmentHandle {
    /// Allocates a new ODBC environment handle. The environment has no parent handle.
    pub fn new() -> Result<Self, Error> {
        let mut handle = Handle::null();
        let result: SqlResult<()> =
            unsafe { SQLAllocHandle(HandleType::Env, Handle::null(), &mut handle) }
                .into_sql_result("SQLAllocHandle");
        match result {
            SqlResult::Success(()) | SqlResult::SuccessWithInfo(()) => {
                debug!("SQLAllocHandle allocated environment (Env) handle '{handle:?}'");
                Ok(EnvironmentHandle {
                    handle: handle.as_henv(),
                })
            }
            // There is no handle to extract diagnostics from if allocating the environment
            // itself fails.
            SqlResult::NoData { function } | SqlResult::Error { function } => {
                Err(Error::SqlResult {
                    function,
                    code: super::sql_result::ReturnCode::Error,
                    records: Vec::new(),
                })
            }
            SqlResult::InvalidHandle { function } => Err(Error::SqlResult {
                function,
                code: super::sql_result::ReturnCode::InvalidHandle,
                records: Vec::new(),
            }),
        }
    }

    /// Declares which version of the ODBC API the application uses. This is the first thing to do
    /// with any ODBC environment.
    pub fn declare_version(&self, version: OdbcVersion) -> Result<(), Error> {
        unsafe {
            SQLSetEnvAttr(
                self.handle,
                EnvironmentAttribute::OdbcVersion,
                version.as_attribute().into(),
                0,
            )
        }
        .into_sql_result("SQLSetEnvAttr")
        .into_result(self)
    }

    /// List all data sources (DSN entries) known to the driver manager, together with the driver
    /// description associated with each of them.
    pub fn data_sources(&self) -> Result<Vec<DataSourceInfo>, Error> {
        let mut out = Vec::new();
        let mut server_name = SzBuffer::with_capacity(128);
        let mut driver = SzBuffer::with_capacity(512);
        let mut direction = FetchOrientation::First;
        loop {
            let mut server_name_len = 0;
            let mut driver_len = 0;
            let ret = unsafe {
                sql_data_sources(
                    self.handle,
                    direction,
                    server_name.mut_buf().as_mut_ptr(),
                    clamp_small_int(server_name.mut_buf().len()),
                    &mut server_name_len,
                    driver.mut_buf().as_mut_ptr(),
                    clamp_small_int(driver.mut_buf().len()),
                    &mut driver_len,
                )
            };
            if ret == SqlReturn::NO_DATA {
                break;
            }
            ret.into_sql_result("SQLDataSources").into_result(self)?;
            out.push(DataSourceInfo {
                server_name: server_name.to_utf8()?,
                driver: driver.to_utf8()?,
            });
            direction = FetchOrientation::Next;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::OdbcVersion;

    #[test]
    fn parse_driver_reported_versions() {
        assert_eq!(Some(OdbcVersion::V3_8), OdbcVersion::from_info_text("03.80"));
        assert_eq!(Some(OdbcVersion::V3), OdbcVersion::from_info_text("03.00"));
        assert_eq!(Some(OdbcVersion::V3), OdbcVersion::from_info_text("03.51"));
        assert_eq!(Some(OdbcVersion::V2), OdbcVersion::from_info_text("02.50"));
        assert_eq!(None, OdbcVersion::from_info_text("garbage"));
    }

    #[test]
    fn versions_are_ordered() {
        assert!(OdbcVersion::V2 < OdbcVersion::V3);
        assert!(OdbcVersion::V3 < OdbcVersion::V3_8);
    }
}
