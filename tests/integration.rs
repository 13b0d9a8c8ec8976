mod common;

use std::rc::Rc;

use common::{connect, setup_empty_table, ENV};
use odbc_table::{
    buffers::{ColumnBuffer, ColumnFlags, ColumnProperties, NumericBuffer, WTextBuffer},
    CommitMode, Database, Error, ExecutableStatement, OdbcVersion, Table, TableAccessFlags,
    TableOpenFlags,
};

#[test]
fn environment_can_be_created() {
    // Forces the lazy environment, so a broken driver manager setup fails early and visibly.
    let _ = ENV.odbc_version();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn driver_reports_a_supported_odbc_version() {
    let db = connect();
    let version = db.driver_odbc_version().unwrap();
    assert!(version >= OdbcVersion::V2);
    assert!(version <= OdbcVersion::V3_8);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn close_and_reopen_restores_database_state() {
    let db = connect();
    let info = db.info().unwrap();
    let version = db.odbc_version().unwrap();
    let commit_mode = db.commit_mode().unwrap();
    db.close();
    assert!(!db.is_open());

    db.open(common::DSN, common::USER, common::PASSWORD).unwrap();
    assert_eq!(info, db.info().unwrap());
    assert_eq!(version, db.odbc_version().unwrap());
    assert_eq!(commit_mode, db.commit_mode().unwrap());
    db.close();
    // Closing twice must be harmless.
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn commit_mode_is_manual_after_switching() {
    let db = connect();
    db.set_commit_mode(CommitMode::Manual).unwrap();
    assert_eq!(CommitMode::Manual, db.read_commit_mode().unwrap());
    db.close();
}

fn open_integertypes(db: &Rc<Database>, table_name: &str) -> Table {
    setup_empty_table(
        db,
        table_name,
        &["id INT PRIMARY KEY", "s SMALLINT", "i INT", "b BIGINT"],
    );
    let mut table = Table::new(db, TableAccessFlags::READ_WRITE, table_name);
    table.open(TableOpenFlags::default()).unwrap();
    table
}

fn set_integer_row(table: &Table, id: i32, s: i16, i: i32, b: i64) {
    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(id);
    table.column_buffer(2).unwrap().as_i16().unwrap().set_value(s);
    table.column_buffer(3).unwrap().as_i32().unwrap().set_value(i);
    table.column_buffer(4).unwrap().as_i64().unwrap().set_value(b);
}

#[test]
#[ignore = "requires the TestDb data source"]
fn insert_and_select_by_pk_roundtrip() {
    let db = connect();
    let table = open_integertypes(&db, "odbc_table_roundtrip");

    table.delete("id <> 0", false).unwrap();
    set_integer_row(&table, 1, -32768, -2147483648, -9223372036854775807);
    table.insert().unwrap();
    db.commit_trans().unwrap();

    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(1);
    table.select_by_pk_values().unwrap();
    assert!(table.select_next().unwrap());
    assert_eq!(
        1,
        table.column_buffer(1).unwrap().as_i32().unwrap().value().unwrap()
    );
    assert_eq!(
        -32768,
        table.column_buffer(2).unwrap().as_i16().unwrap().value().unwrap()
    );
    assert_eq!(
        -2147483648,
        table.column_buffer(3).unwrap().as_i32().unwrap().value().unwrap()
    );
    assert_eq!(
        -9223372036854775807,
        table.column_buffer(4).unwrap().as_i64().unwrap().value().unwrap()
    );
    assert!(!table.select_next().unwrap());
    table.select_close().unwrap();
    drop(table);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn count_with_where_clauses() {
    let db = connect();
    let table = open_integertypes(&db, "odbc_table_count");

    assert_eq!(0, table.count("").unwrap());

    set_integer_row(&table, 1, 2, 3, 4);
    table.insert().unwrap();
    db.commit_trans().unwrap();

    assert_eq!(1, table.count("").unwrap());
    assert_eq!(1, table.count("id > 0").unwrap());
    assert_eq!(0, table.count("id < 0").unwrap());
    drop(table);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn update_and_delete_by_pk() {
    let db = connect();
    let table = open_integertypes(&db, "odbc_table_update_delete");

    set_integer_row(&table, 1, 10, 20, 30);
    table.insert().unwrap();
    db.commit_trans().unwrap();

    // Update column i, identified by the primary key.
    set_integer_row(&table, 1, 10, 0, 30);
    table.update_by_pk_values().unwrap();
    db.commit_trans().unwrap();

    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(1);
    table.select_by_pk_values().unwrap();
    assert!(table.select_next().unwrap());
    assert_eq!(
        0,
        table.column_buffer(3).unwrap().as_i32().unwrap().value().unwrap()
    );
    table.select_close().unwrap();

    table.delete_by_pk_values(true).unwrap();
    db.commit_trans().unwrap();

    table.select_by_pk_values().unwrap();
    assert!(!table.select_next().unwrap());
    table.select_close().unwrap();
    drop(table);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn delete_by_pk_tolerates_missing_row() {
    let db = connect();
    let table = open_integertypes(&db, "odbc_table_delete_missing");

    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(42);
    // Row 42 does not exist. With fail_on_no_data false this must pass.
    table.delete_by_pk_values(false).unwrap();
    // With fail_on_no_data true it must surface as a no-data error.
    let error = table.delete_by_pk_values(true).unwrap_err();
    assert!(error.is_no_data());
    // The table must remain usable afterwards.
    assert_eq!(0, table.count("").unwrap());
    drop(table);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn numeric_roundtrip_preserves_precision_and_scale() {
    let db = connect();
    setup_empty_table(
        &db,
        "odbc_table_numeric",
        &["id INT PRIMARY KEY", "amount NUMERIC(18,10)"],
    );
    let mut table = Table::new(&db, TableAccessFlags::READ_WRITE, "odbc_table_numeric");
    table.open(TableOpenFlags::default()).unwrap();

    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(1);
    let mut value = odbc_table::sys::Numeric::default();
    value.precision = 18;
    value.scale = 10;
    value.sign = 1;
    // 12345678901 * 10^-10, little endian magnitude.
    value.val[..5].copy_from_slice(&[0x35, 0x1C, 0xDC, 0xDF, 0x02]);
    table
        .column_buffer(2)
        .unwrap()
        .as_numeric()
        .unwrap()
        .set_value(value);
    table.insert().unwrap();
    db.commit_trans().unwrap();

    table.column_buffer(1).unwrap().as_i32().unwrap().set_value(1);
    table.select_by_pk_values().unwrap();
    assert!(table.select_next().unwrap());
    let read_back = table
        .column_buffer(2)
        .unwrap()
        .as_numeric()
        .unwrap()
        .value()
        .unwrap();
    assert_eq!(value.scale, read_back.scale);
    assert_eq!(value.sign, read_back.sign);
    assert_eq!(value.val, read_back.val);
    table.select_close().unwrap();
    drop(table);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn numeric_parameter_without_column_size_fails_before_binding() {
    let db = connect();
    setup_empty_table(
        &db,
        "odbc_table_numeric_assert",
        &["id INT PRIMARY KEY", "amount NUMERIC(18,10)"],
    );
    let stmt = ExecutableStatement::new(&db, true).unwrap();
    stmt.prepare("INSERT INTO odbc_table_numeric_assert (id, amount) VALUES(1, ?)")
        .unwrap();

    // Column size and decimal digits were never set on the buffer.
    let buffer = ColumnBuffer::Numeric(NumericBuffer::new(
        "amount",
        ColumnFlags::INSERT,
        ColumnProperties {
            sql_type: Some(odbc_table::sys::SqlDataType::NUMERIC),
            column_size: 0,
            decimal_digits: 0,
        },
    ));
    let error = stmt.bind_parameter_with(&buffer, 1, false).unwrap_err();
    assert!(matches!(error, Error::Assertion { .. }));
    drop(stmt);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn nullable_buffer_against_not_null_parameter_fails() {
    let db = connect();
    setup_empty_table(
        &db,
        "odbc_table_not_null",
        &["id INT PRIMARY KEY", "w NCHAR(5) NOT NULL"],
    );
    let stmt = ExecutableStatement::new(&db, true).unwrap();
    stmt.prepare("INSERT INTO odbc_table_not_null (id, w) VALUES(1, ?)")
        .unwrap();

    let buffer = ColumnBuffer::WText(WTextBuffer::new(
        "w",
        6,
        ColumnFlags::INSERT | ColumnFlags::NULLABLE,
        ColumnProperties::default(),
    ));
    let error = stmt.bind_parameter_with(&buffer, 1, true).unwrap_err();
    // The error must name the offending column.
    assert!(error.to_string().contains('w'));
    drop(stmt);
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn catalog_queries_find_table_and_columns() {
    let db = connect();
    setup_empty_table(
        &db,
        "odbc_table_catalog",
        &["id INT PRIMARY KEY", "s SMALLINT"],
    );

    let info = db
        .find_one_table("odbc_table_catalog", None, None, None)
        .unwrap();
    let columns = db.read_table_column_info(&info).unwrap();
    assert_eq!(2, columns.len());
    // Ordinal positions must be 1..=N without gaps.
    for (expected, column) in (1..).zip(&columns) {
        assert_eq!(expected, column.ordinal_position);
    }

    let missing = db.find_one_table("no_such_table_exists", None, None, None);
    assert!(matches!(missing, Err(Error::TableNotFound { .. })));
    db.close();
}

#[test]
#[ignore = "requires the TestDb data source"]
fn catalog_listings_are_distinct() {
    let db = connect();
    let assert_distinct = |values: Vec<String>| {
        let mut deduped = values.clone();
        deduped.dedup();
        assert_eq!(values, deduped);
    };
    assert_distinct(db.read_catalogs().unwrap());
    assert_distinct(db.read_schemas().unwrap());
    assert_distinct(db.read_table_types().unwrap());
    db.close();
}
