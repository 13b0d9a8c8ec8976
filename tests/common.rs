use std::rc::Rc;

use lazy_static::lazy_static;
use odbc_table::{Database, Environment, OdbcVersion};

/// Data source the integration tests run against. The DSN must be configured with the driver
/// manager of the test machine.
pub const DSN: &str = "TestDb";
pub const USER: &str = "user";
pub const PASSWORD: &str = "";

// Rust executes tests in parallel by default. All tests share one environment.
lazy_static! {
    pub static ref ENV: Environment = {
        let _ = env_logger::builder().is_test(true).try_init();
        Environment::new(OdbcVersion::V3).unwrap()
    };
}

/// Opens a database against the test DSN.
pub fn connect() -> Rc<Database> {
    let db = Rc::new(Database::new(&ENV));
    db.open(DSN, USER, PASSWORD).unwrap();
    db
}

/// Creates (or recreates) an empty table with the given columns. Column definitions are SQL
/// fragments like `"id INT PRIMARY KEY"`.
pub fn setup_empty_table(db: &Rc<Database>, table_name: &str, columns: &[&str]) {
    let drop_table = format!("DROP TABLE IF EXISTS {table_name}");
    let create_table = format!("CREATE TABLE {table_name} ({})", columns.join(", "));
    db.exec_sql(&drop_table).unwrap();
    db.exec_sql(&create_table).unwrap();
    db.commit_trans().unwrap();
}
