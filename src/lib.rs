//! # About
//!
//! `odbc-table` offers typed, table level access to databases reachable over ODBC. It wraps the
//! raw ODBC handles into a hierarchy with deterministic cleanup, binds host memory to result
//! columns and statement parameters through polymorphic column buffers, exposes the database
//! catalog as typed queries, and combines all of it in [`Table`]: select by primary key or WHERE
//! clause, insert, update and delete against a single table with one consistent programming
//! model.
//!
//! The entry points are [`Environment`], [`Database`] and [`Table`], in that order:
//!
//! ```no_run
//! use std::rc::Rc;
//! use odbc_table::{Database, Environment, OdbcVersion, Table, TableAccessFlags, TableOpenFlags};
//!
//! let env = Environment::new(OdbcVersion::V3)?;
//! let db = Rc::new(Database::new(&env));
//! db.open("TestDb", "user", "password")?;
//!
//! let mut table = Table::new(&db, TableAccessFlags::READ_WRITE, "integertypes");
//! table.open(TableOpenFlags::default())?;
//!
//! table.column_buffer(1)?.as_i32().unwrap().set_value(1);
//! table.select_by_pk_values()?;
//! while table.select_next()? {
//!     let value = table.column_buffer(3)?.as_i32().unwrap().value()?;
//!     println!("i: {value}");
//! }
//! # Ok::<(), odbc_table::Error>(())
//! ```

mod catalog;
mod database;
mod environment;
mod error;
mod executable_statement;
mod table;
mod type_map;

pub mod buffers;
pub mod handles;

pub use self::{
    catalog::{
        ColumnInfo, Nullability, PrimaryKeyInfo, PrivilegeInfo, RowIdentifierScope,
        RowIdentifierType, SpecialColumnInfo, SqlTypeInfo, TableInfo,
    },
    database::{
        CommitMode, Database, DatabaseInfo, DatabaseProduct, DriverQuirks, TransactionIsolation,
    },
    environment::Environment,
    error::{ConversionDirection, Error},
    executable_statement::ExecutableStatement,
    handles::OdbcVersion,
    table::{Table, TableAccessFlags, TableOpenFlags},
    type_map::{DefaultSql2BufferMap, Sql2BufferTypeMap},
};

/// Reexport of `odbc-sys` to enable applications to use the same version as this crate.
pub use odbc_sys as sys;
