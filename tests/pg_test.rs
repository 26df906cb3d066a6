//! Integration tests against a real local PostgreSQL instance, following the
//! teacher's `tests/pg_test.rs` convention (`default_addrs()`/
//! `default_connection_options()` helpers, one `#[tokio::test]` per scenario).
//! These assume the same fixture roles/databases the teacher's test database
//! seeds (`test`, `md5_user`, `scram_user`, `pass_user`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pgreplica::codec::value::Value;
use pgreplica::session::{ConnectionOptions, Session};
use pgreplica::sql::SqlClient;
use pgreplica::subscriber::{Subscriber, SubscriberOptions};
use pgreplica::Error;

#[tokio::test]
async fn test_ping_user_postgres() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    assert!(client.sq("SELECT 1").await.is_ok());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_user_md5() {
    let client = SqlClient::connect_tcp(
        default_addrs(),
        ConnectionOptions {
            user: "md5_user".to_string(),
            ..default_connection_options()
        },
    )
    .await
    .unwrap();
    assert!(client.sq("SELECT 1").await.is_ok());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_user_md5_invalid_password() {
    let err = SqlClient::connect_tcp(
        default_addrs(),
        ConnectionOptions {
            user: "md5_user".to_string(),
            password: Some("invalid".to_string()),
            ..default_connection_options()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Server(e) if e.code == "28P01"));
}

#[tokio::test]
async fn test_ping_user_scram() {
    let client = SqlClient::connect_tcp(
        default_addrs(),
        ConnectionOptions {
            user: "scram_user".to_string(),
            ..default_connection_options()
        },
    )
    .await
    .unwrap();
    assert!(client.sq("SELECT 1").await.is_ok());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_ping_user_scram_invalid_password() {
    let err = SqlClient::connect_tcp(
        default_addrs(),
        ConnectionOptions {
            user: "scram_user".to_string(),
            password: Some("invalid".to_string()),
            ..default_connection_options()
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Server(e) if e.code == "28P01"));
}

#[tokio::test]
async fn test_password_encryption_sanity_check() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let result = client.sq("SHOW PASSWORD_ENCRYPTION;").await.unwrap();
    assert_eq!(result.rows[0][0], Value::Text("scram-sha-256".to_string()));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_query() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let result = client.sq("SELECT 1,2,3 UNION ALL SELECT 4,5,6;").await.unwrap();
    assert_eq!(result.columns.len(), 3);
    assert_eq!(result.rows.len(), 2);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_error_query() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let err = client.sq("SELECT 1/0;").await.unwrap_err();
    assert!(matches!(err, Error::Server(e) if e.code == "22012"));
    // A clean server error leaves the client usable for the next query.
    assert!(!client.is_closed());
    assert!(client.sq("SELECT 1").await.is_ok());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_extended_query_with_parameters() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let params = [Value::Int4(7)];
    let results = client.eq(&[("SELECT $1::int + 1", params.as_slice())]).await.unwrap();
    assert_eq!(results[0].rows, vec![vec![Value::Int4(8)]]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_query_cancellation() {
    let session = Session::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let cancel_handle = session.cancel_handle().await.unwrap();
    let client = SqlClient::from_session(session).unwrap();

    tokio::task::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_handle.cancel().await.unwrap();
    });

    let err = client.sq("SELECT pg_sleep(1000);").await.unwrap_err();
    assert!(matches!(err, Error::Server(e) if e.code == "57014"));
}

#[tokio::test]
async fn test_replication_slot_lifecycle() {
    let client = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let _ = client.sq("SELECT pg_drop_replication_slot('pgreplica_test_slot');").await;
    client
        .sq("SELECT pg_create_logical_replication_slot('pgreplica_test_slot', 'pgoutput');")
        .await
        .unwrap();
    let exists = client
        .sq("SELECT 1 FROM pg_replication_slots WHERE slot_name = 'pgreplica_test_slot';")
        .await
        .unwrap();
    assert_eq!(exists.rows.len(), 1);
    client.sq("SELECT pg_drop_replication_slot('pgreplica_test_slot');").await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_receives_inserts() {
    let ddl = SqlClient::connect_tcp(default_addrs(), default_connection_options()).await.unwrap();
    let _ = ddl.sq("DROP PUBLICATION IF EXISTS pgreplica_test_pub;").await;
    ddl.sq("CREATE PUBLICATION pgreplica_test_pub FOR ALL TABLES;").await.unwrap();
    let _ = ddl.sq("SELECT pg_drop_replication_slot('pgreplica_test_slot');").await;
    ddl.sq("SELECT pg_create_logical_replication_slot('pgreplica_test_slot', 'pgoutput');")
        .await
        .unwrap();
    let _ = ddl.sq("DROP TABLE IF EXISTS pgreplica_test_rows;").await;
    ddl.sq("CREATE TABLE pgreplica_test_rows (id int PRIMARY KEY, name varchar(255));")
        .await
        .unwrap();

    let seen = Arc::new(tokio::sync::Notify::new());
    let seen_task = seen.clone();
    let handler: pgreplica::replication::HandlerFn = Arc::new(move |event, ack| {
        let seen = seen_task.clone();
        Box::pin(async move {
            if let pgreplica::replication::Event::Insert { table, .. } = &event {
                if table == "pgreplica_test_rows" {
                    seen.notify_one();
                }
            }
            if let Some(ack) = ack {
                ack.ack();
            }
            Ok(())
        })
    });

    let subscriber = Subscriber::connect(
        "pgreplica_test_slot",
        default_addrs(),
        default_connection_options(),
        default_addrs(),
        default_connection_options(),
        SubscriberOptions {
            publications: vec!["pgreplica_test_pub".to_string()],
            handler,
            ack_interval: Duration::from_secs(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    ddl.sq("INSERT INTO pgreplica_test_rows VALUES (1, 'bob');").await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), seen.notified()).await.unwrap();

    subscriber.close().await.unwrap();
    ddl.sq("SELECT pg_drop_replication_slot('pgreplica_test_slot');").await.unwrap();
    ddl.close().await.unwrap();
}

fn default_addrs() -> Vec<SocketAddr> {
    vec!["[::1]:5432".parse::<SocketAddr>().unwrap()]
}

fn default_connection_options() -> ConnectionOptions {
    ConnectionOptions {
        password: Some("password".to_string()),
        database: Some("test".to_string()),
        ..Default::default()
    }
}
