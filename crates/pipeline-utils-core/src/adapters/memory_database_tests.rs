//! Tests for the in-memory database

use super::*;
use crate::key_vault::SecretValue;

fn settings() -> ConnectionSettings {
    ConnectionSettings::new(
        "etl",
        "etl-sql",
        "loader",
        SecretValue::from_string("pw".to_string()),
    )
}

fn seeded() -> InMemoryDatabase {
    let database = InMemoryDatabase::new();
    let mut table = Table::new(vec![
        "id".to_string(),
        "name".to_string(),
        "region".to_string(),
    ]);
    for (id, name, region) in [(1, "alpha", "north"), (2, "beta", "south"), (3, "gamma", "north")] {
        table
            .push_row(vec![
                CellValue::Int(id),
                CellValue::from(name),
                CellValue::from(region),
            ])
            .unwrap();
    }
    database.create_table("products", table);
    database
}

#[tokio::test]
async fn test_select_projection_and_filters() {
    let database = seeded();
    let mut connection = database.connect(&settings()).await.unwrap();

    let table = connection
        .query(
            "SELECT name FROM products WHERE region = ? AND id = 3;",
            &[CellValue::from("north")],
        )
        .await
        .unwrap();

    assert_eq!(table.columns(), &["name".to_string()]);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0, "name"), Some(&CellValue::from("gamma")));
}

#[tokio::test]
async fn test_select_with_string_literal() {
    let database = seeded();
    let mut connection = database.connect(&settings()).await.unwrap();

    let table = connection
        .query("select * from products where region = 'south'", &[])
        .await
        .unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(0, "id"), Some(&CellValue::Int(2)));
}

#[tokio::test]
async fn test_unknown_table_and_column() {
    let database = seeded();
    let mut connection = database.connect(&settings()).await.unwrap();

    assert!(matches!(
        connection.query("SELECT * FROM nope", &[]).await,
        Err(DatabaseError::QueryFailed { .. })
    ));
    assert!(matches!(
        connection
            .query("SELECT * FROM products WHERE colour = 1", &[])
            .await,
        Err(DatabaseError::QueryFailed { .. })
    ));
    assert!(matches!(
        connection.query("DELETE FROM products", &[]).await,
        Err(DatabaseError::QueryFailed { .. })
    ));
}

#[tokio::test]
async fn test_exec_rows_visible_only_after_commit() {
    let database = InMemoryDatabase::new();
    database.register_procedure("dbo.usp_Log", "log");
    let mut connection = database.connect(&settings()).await.unwrap();

    let affected = connection
        .execute(
            "EXEC dbo.usp_Log @Status=?, @Rows=?",
            &[CellValue::from("OK"), CellValue::Int(5)],
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);
    assert!(database.table("log").is_none());

    connection.commit().await.unwrap();
    let log = database.table("log").unwrap();
    assert_eq!(log.columns(), &["Status".to_string(), "Rows".to_string()]);
    assert_eq!(log.get(0, "Rows"), Some(&CellValue::Int(5)));
    assert_eq!(database.commit_count(), 1);
}

#[tokio::test]
async fn test_close_discards_uncommitted_rows() {
    let database = InMemoryDatabase::new();
    database.register_procedure("usp_Log", "log");
    let mut connection = database.connect(&settings()).await.unwrap();

    connection
        .execute("EXEC usp_Log @Status=?", &[CellValue::from("OK")])
        .await
        .unwrap();
    connection.close().await.unwrap();

    assert!(database.table("log").is_none());
    assert_eq!(database.open_connections(), 0);
    assert_eq!(database.close_count(), 1);
    assert!(matches!(
        connection.commit().await,
        Err(DatabaseError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_failing_procedure() {
    let database = InMemoryDatabase::new();
    database.register_procedure("usp_Log", "log");
    database.fail_procedure("usp_Log");
    let mut connection = database.connect(&settings()).await.unwrap();

    let result = connection
        .execute("EXEC usp_Log @Status=?", &[CellValue::from("OK")])
        .await;
    assert!(matches!(result, Err(DatabaseError::QueryFailed { .. })));
}

#[tokio::test]
async fn test_dropped_connection_is_not_an_explicit_close() {
    let database = seeded();
    {
        let _connection = database.connect(&settings()).await.unwrap();
        assert_eq!(database.open_connections(), 1);
    }
    assert_eq!(database.open_connections(), 0);
    assert_eq!(database.close_count(), 0);
    assert_eq!(database.abandoned_connections(), 1);
}

#[test]
fn test_cells_equal_widens_integers() {
    assert!(cells_equal(&CellValue::Int(2), &CellValue::Float(2.0)));
    assert!(!cells_equal(&CellValue::Null, &CellValue::Null));
    assert!(!cells_equal(&CellValue::from("2"), &CellValue::Int(2)));
}
