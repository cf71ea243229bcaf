#![cfg(feature = "integration-tests")]

//! End-to-end tests against a real MySQL server.

use super::test_utils::{containers, unique_table};
use crate::common::init_tracing;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use serial_test::serial;
use sqlroute_core::{to_timestamp, Params, RouteError, SqlValue};
use sqlroute_storage::{MySqlConnector, ReplicaClient, TransactionState};

async fn create_items(client: &ReplicaClient<MySqlConnector>) -> String {
    let table = unique_table("items");
    client
        .exec(
            &format!(
                "CREATE TABLE {} (id INT PRIMARY KEY AUTO_INCREMENT, name VARCHAR(64) NOT NULL, \
                 created_at DATETIME(3) NULL)",
                client.escape_id(&table)
            ),
            &Params::None,
        )
        .await
        .expect("Failed to create table");
    table
}

#[tokio::test]
#[serial]
async fn test_select_and_param_formatting() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);

    let row = client
        .get_row(
            "SELECT ? AS n, ? AS name",
            &Params::positional([SqlValue::from(42), SqlValue::from("o'reilly")]),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&json!(42)));
    assert_eq!(row.get("name"), Some(&json!("o'reilly")));

    let row = client
        .get_row(
            "SELECT :name AS name",
            &Params::named([("name", "a\\b")]),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("name"), Some(&json!("a\\b")));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_invalid_column_reports_server_error() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);

    let err = client
        .get_rows("SELECT missing_column FROM DUAL", &Params::None)
        .await
        .unwrap_err();

    let query = err.as_query_error().expect("query error");
    assert_eq!(query.number, Some(1054));
    assert_eq!(query.sql_state.as_deref(), Some("42S22"));
    assert!(!err.is_retryable());

    // The pool stays usable after a statement error.
    assert!(client.exists("SELECT 1", &Params::None).await.unwrap());
    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_escaped_values_round_trip() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;

    let hostile = "';;DROP mysql; -- \\ \"x\"";
    let inserted = client
        .exec(
            &format!("INSERT INTO {} (name) VALUES (:name)", client.escape_id(&table)),
            &Params::named([("name", hostile)]),
        )
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, 1);
    assert_eq!(inserted.last_insert_id, Some(1));

    let row = client
        .get_row(
            &format!("SELECT name FROM {} WHERE id = ?", client.escape_id(&table)),
            &Params::positional([1]),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("name"), Some(&json!(hostile)));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_exists() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);

    client
        .exec(
            &format!("INSERT INTO {id} (name) VALUES (?)"),
            &Params::positional(["alpha"]),
        )
        .await
        .unwrap();

    let present = format!("SELECT 1 FROM {id} WHERE name = ?");
    assert!(client
        .exists(&present, &Params::positional(["alpha"]))
        .await
        .unwrap());
    assert!(!client
        .exists(&present, &Params::positional(["beta"]))
        .await
        .unwrap());

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_commit_and_rollback_visibility() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);
    let count = format!("SELECT COUNT(*) AS n FROM {id}");

    let mut tx = client.transaction(true);
    tx.begin(false).await.unwrap();
    tx.exec(
        &format!("INSERT INTO {id} (name) VALUES (?)"),
        &Params::positional(["kept"]),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(tx.state(), TransactionState::Ended);

    let mut tx = client.transaction(true);
    tx.begin(false).await.unwrap();
    tx.exec(
        &format!("INSERT INTO {id} (name) VALUES (?)"),
        &Params::positional(["dropped"]),
    )
    .await
    .unwrap();
    let inside = tx.get_row(&count, &Params::None).await.unwrap().unwrap();
    assert_eq!(inside.get("n"), Some(&json!(2)));
    tx.rollback().await.unwrap();

    let row = client.get_row(&count, &Params::None).await.unwrap().unwrap();
    assert_eq!(row.get("n"), Some(&json!(1)));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_uncommitted_write_visible_only_after_commit() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::uncached_client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);
    let count = format!("SELECT COUNT(*) AS n FROM {id}");

    let mut tx = client.transaction(true);
    tx.begin(false).await.unwrap();
    tx.exec(
        &format!("INSERT INTO {id} (name) VALUES (?)"),
        &Params::positional(["staged"]),
    )
    .await
    .unwrap();

    let outside = client.get_row(&count, &Params::None).await.unwrap().unwrap();
    assert_eq!(outside.get("n"), Some(&json!(0)));

    tx.commit().await.unwrap();

    let after = client.get_row(&count, &Params::None).await.unwrap().unwrap();
    assert_eq!(after.get("n"), Some(&json!(1)));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_failed_statement_keeps_transaction_open_without_end_on_error() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::uncached_client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);

    let mut tx = client.transaction(false);
    tx.begin(false).await.unwrap();
    tx.exec(
        &format!("INSERT INTO {id} (name) VALUES (?)"),
        &Params::positional(["first"]),
    )
    .await
    .unwrap();

    let err = tx
        .exec(&format!("INSERT INTO {id} (missing) VALUES (1)"), &Params::None)
        .await
        .unwrap_err();
    assert_eq!(err.as_query_error().and_then(|e| e.number), Some(1054));
    assert!(tx.is_active());

    tx.commit().await.unwrap();

    let rows = client
        .get_rows(&format!("SELECT name FROM {id}"), &Params::None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("first")));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_end_on_error_rolls_back() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);

    let mut tx = client.transaction(true);
    tx.begin(false).await.unwrap();
    tx.exec(
        &format!("INSERT INTO {id} (name) VALUES (?)"),
        &Params::positional(["pending"]),
    )
    .await
    .unwrap();

    let err = tx
        .exec(
            "SIGNAL SQLSTATE '45000' SET MESSAGE_TEXT = 'custom failure'",
            &Params::None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("custom failure"));
    assert!(tx.is_ended());

    let reuse = tx.exec("SELECT 1", &Params::None).await.unwrap_err();
    assert!(matches!(reuse, RouteError::Transaction(_)));

    let row = client
        .get_row(&format!("SELECT COUNT(*) AS n FROM {id}"), &Params::None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("n"), Some(&json!(0)));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_timestamp_insert() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);

    let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap()
        + chrono::Duration::milliseconds(777);
    client
        .exec(
            &format!("INSERT INTO {id} (name, created_at) VALUES (?, ?)"),
            &Params::positional([
                SqlValue::from("stamped"),
                SqlValue::from(to_timestamp(&at, false)),
            ]),
        )
        .await
        .unwrap();

    let row = client
        .get_row(
            &format!("SELECT created_at FROM {id} WHERE name = 'stamped'"),
            &Params::None,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("created_at"), Some(&json!("2024-03-09 07:05:02.777")));

    client.close().await;
}

#[tokio::test]
#[serial]
async fn test_cached_reads_served_from_cache() {
    init_tracing();
    let (_container, address) = containers::start_mysql().await;
    let client = containers::client(&address);
    let table = create_items(&client).await;
    let id = client.escape_id(&table);
    let query = format!("SELECT COUNT(*) AS n FROM {id}");

    let first = client.get_row(&query, &Params::None).await.unwrap();
    client
        .exec(
            &format!("INSERT INTO {id} (name) VALUES ('x')"),
            &Params::None,
        )
        .await
        .unwrap();
    assert_eq!(client.get_row(&query, &Params::None).await.unwrap(), first);

    client.invalidate(&client.cache_key(&query, &Params::None));
    let fresh = client.get_row(&query, &Params::None).await.unwrap().unwrap();
    assert_eq!(fresh.get("n"), Some(&json!(1)));

    client.close().await;
}
