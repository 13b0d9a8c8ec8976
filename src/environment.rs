use std::rc::Rc;

use crate::{
    error::Error,
    handles::{DataSourceInfo, EnvironmentHandle, OdbcVersion},
};

/// The global ODBC context. Declares the ODBC version used by the application and is the parent
/// of every database connection.
///
/// One environment per process is the typical setup. It can be shared between any number of
/// databases.
pub struct Environment {
    handle: Rc<EnvironmentHandle>,
    version: OdbcVersion,
}

impl Environment {
    /// Allocates an ODBC environment and declares the API version the application uses.
    pub fn new(version: OdbcVersion) -> Result<Self, Error> {
        let handle = EnvironmentHandle::new()?;
        handle.declare_version(version)?;
        Ok(Environment {
            handle: Rc::new(handle),
            version,
        })
    }

    /// The ODBC version declared for this environment.
    pub fn odbc_version(&self) -> OdbcVersion {
        self.version
    }

    /// Lists all data sources (DSN entries) known to the driver manager.
    pub fn data_sources(&self) -> Result<Vec<DataSourceInfo>, Error> {
        self.handle.data_sources()
    }

    pub(crate) fn handle(&self) -> &Rc<EnvironmentHandle> {
        &self.handle
    }
}
