//! Tests for SQL Server conversions and error mapping.

use super::*;
use crate::ErrorKind;
use std::borrow::Cow;
use tiberius::numeric::Numeric;

fn settings() -> ConnectionSettings {
    ConnectionSettings::new(
        "etl",
        "etl-sql",
        "loader",
        SecretValue::from_string("pw".to_string()),
    )
}

#[test]
fn test_config_targets_azure_sql_endpoint() {
    let config = build_config(&settings());
    assert_eq!(config.get_addr(), "etl-sql.database.windows.net:1433");
}

#[test]
fn test_integer_and_text_columns() {
    assert_eq!(
        cell_from_column("id", ColumnData::I32(Some(7))).unwrap(),
        CellValue::Int(7)
    );
    assert_eq!(
        cell_from_column("name", ColumnData::String(Some(Cow::Borrowed("alpha")))).unwrap(),
        CellValue::from("alpha")
    );
    assert_eq!(
        cell_from_column("flag", ColumnData::Bit(Some(true))).unwrap(),
        CellValue::Bool(true)
    );
}

#[test]
fn test_null_columns_become_null_cells() {
    assert_eq!(
        cell_from_column("id", ColumnData::I64(None)).unwrap(),
        CellValue::Null
    );
    assert_eq!(
        cell_from_column("name", ColumnData::String(None)).unwrap(),
        CellValue::Null
    );
}

#[test]
fn test_numeric_applies_scale() {
    let cell = cell_from_column(
        "amount",
        ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2))),
    )
    .unwrap();
    assert_eq!(cell, CellValue::Float(123.45));
}

#[test]
fn test_io_error_is_transient_connection_failure() {
    let err = map_tds_error(TdsError::Io {
        kind: std::io::ErrorKind::ConnectionRefused,
        message: "connection refused".to_string(),
    });
    assert!(matches!(err, DatabaseError::ConnectionFailed { .. }));
    assert!(err.is_transient());
}

#[test]
fn test_protocol_error_is_query_failure() {
    let err = map_tds_error(TdsError::Protocol(Cow::Borrowed("unexpected token")));
    assert_eq!(err.kind(), ErrorKind::Driver);
}
