use otterstax_adapters::registry::default_registry;
use otterstax_core::connection::{resolve_connection_params, ConnectionParams};
use otterstax_core::environments::{EnvironmentProfile, Protocol, Topology};
use otterstax_core::executor::{ExecutorError, ProtocolExecutor};
use otterstax_core::results::{CellValue, AFFECTED_ROWS_COLUMN};
use otterstax_core::schema::SchemaIntrospector;

const TABLE: &str = "otterstax_it_items";

fn integration_enabled() -> bool {
    matches!(
        std::env::var("OTTERSTAX_RUN_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|raw| raw.parse::<u16>().ok())
}

fn integration_params(protocol: Protocol) -> ConnectionParams {
    let host = std::env::var("OTTERSTAX_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mut profile = EnvironmentProfile::new("integration", host, Topology::Local);
    if let Some(port) = env_port("OTTERSTAX_TEST_MYSQL_PORT") {
        profile.mysql_port = port;
    }
    if let Some(port) = env_port("OTTERSTAX_TEST_POSTGRES_PORT") {
        profile.postgres_port = port;
    }
    profile.user = std::env::var("OTTERSTAX_TEST_USER").ok();
    profile.password = std::env::var("OTTERSTAX_TEST_PASSWORD").ok();
    profile.database = std::env::var("OTTERSTAX_TEST_DATABASE").ok();
    resolve_connection_params(&profile, protocol)
}

struct Fixture<'a> {
    protocol: Protocol,
    schema: &'a str,
    /// Table name as written in statements, qualified where the protocol needs it.
    table: String,
    create_sql: String,
    insert_sql: String,
}

async fn round_trip(fixture: Fixture<'_>) {
    let registry = default_registry();
    let executor = ProtocolExecutor::new(
        &registry,
        fixture.protocol,
        integration_params(fixture.protocol),
    );
    let table = fixture.table.as_str();

    assert!(executor.test_connectivity().await, "backend should answer SELECT 1");

    executor
        .execute(&fixture.create_sql, &[])
        .await
        .expect("create table should succeed");
    executor
        .execute(&format!("DELETE FROM {table}"), &[])
        .await
        .expect("cleanup should succeed");

    let inserted = executor
        .execute(
            &fixture.insert_sql,
            &[
                CellValue::Int(7),
                CellValue::from("seven"),
                CellValue::Float(12.5),
            ],
        )
        .await
        .expect("insert should succeed");
    assert_eq!(inserted.columns, vec![AFFECTED_ROWS_COLUMN.to_string()]);
    assert_eq!(inserted.rows[0][AFFECTED_ROWS_COLUMN], CellValue::UInt(1));

    let selected = executor
        .execute(
            &format!("SELECT id, label, price FROM {table} ORDER BY id"),
            &[],
        )
        .await
        .expect("select should succeed");
    assert_eq!(
        selected.columns,
        vec!["id".to_string(), "label".to_string(), "price".to_string()]
    );
    assert_eq!(selected.rows.len(), 1);
    assert_eq!(selected.rows[0]["id"], CellValue::Int(7));
    assert_eq!(selected.rows[0]["label"], CellValue::from("seven"));
    assert_eq!(selected.rows[0]["price"], CellValue::from("12.50"));

    let introspector = SchemaIntrospector::new(&executor);
    let schemas = introspector.list_schemas().await.expect("list schemas");
    assert!(!schemas.is_empty());

    let tables = introspector
        .list_tables(fixture.schema)
        .await
        .expect("list tables");
    assert!(tables
        .rows
        .iter()
        .flat_map(|row| row.values())
        .any(|value| value == &CellValue::from(TABLE)));

    let columns = introspector
        .describe_columns(fixture.schema, TABLE)
        .await
        .expect("describe columns");
    assert_eq!(columns.len(), 3);

    executor
        .execute(&format!("DROP TABLE {table}"), &[])
        .await
        .expect("drop table should succeed");
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_protocol_query_write_and_introspection() {
    if !integration_enabled() {
        return;
    }
    let schema = std::env::var("OTTERSTAX_TEST_MYSQL_SCHEMA")
        .unwrap_or_else(|_| "otterstax_it".to_string());

    let registry = default_registry();
    let admin = ProtocolExecutor::new(
        &registry,
        Protocol::Mysql,
        integration_params(Protocol::Mysql),
    );
    admin
        .execute(&format!("CREATE DATABASE IF NOT EXISTS `{schema}`"), &[])
        .await
        .expect("create database should succeed");

    // Every execute opens a fresh session, so statements name the schema.
    let table = format!("`{schema}`.{TABLE}");
    round_trip(Fixture {
        protocol: Protocol::Mysql,
        schema: &schema,
        create_sql: format!(
            "CREATE TABLE IF NOT EXISTS {table} \
             (id BIGINT PRIMARY KEY, label VARCHAR(32), price DECIMAL(10,2))"
        ),
        insert_sql: format!("INSERT INTO {table} (id, label, price) VALUES (?, ?, ?)"),
        table,
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn postgres_protocol_query_write_and_introspection() {
    if !integration_enabled() {
        return;
    }

    round_trip(Fixture {
        protocol: Protocol::Postgres,
        schema: "public",
        table: TABLE.to_string(),
        create_sql: format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} \
             (id BIGINT PRIMARY KEY, label TEXT, price NUMERIC(10,2))"
        ),
        insert_sql: format!("INSERT INTO {TABLE} (id, label, price) VALUES ($1, $2, $3)"),
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn postgres_protocol_renders_numeric_and_interval_values() {
    if !integration_enabled() {
        return;
    }

    let registry = default_registry();
    let executor = ProtocolExecutor::new(
        &registry,
        Protocol::Postgres,
        integration_params(Protocol::Postgres),
    );

    let unbound = executor
        .execute(
            "SELECT 1.5::numeric AS n, sum(x) AS s, '1 day'::interval AS i \
             FROM (VALUES (1),(2)) t(x)",
            &[],
        )
        .await
        .expect("unbound select should succeed");
    assert_eq!(unbound.rows[0]["n"], CellValue::from("1.5"));
    assert_eq!(unbound.rows[0]["s"], CellValue::Int(3));
    assert_eq!(unbound.rows[0]["i"], CellValue::from("1 day"));

    let numeric = executor
        .execute(
            "SELECT x FROM (VALUES (10.5::numeric)) t(x) WHERE x > $1",
            &[CellValue::Int(5)],
        )
        .await
        .expect("integer bound against numeric should succeed");
    assert_eq!(numeric.rows[0]["x"], CellValue::from("10.5"));

    let real = executor
        .execute(
            "SELECT x FROM (VALUES (10.5::real)) t(x) WHERE x > $1",
            &[CellValue::Int(5)],
        )
        .await
        .expect("integer bound against real should succeed");
    assert_eq!(real.rows[0]["x"], CellValue::Float(10.5));

    let undecodable = executor
        .execute("SELECT '1 day'::interval AS i WHERE $1::int > 0", &[CellValue::Int(1)])
        .await
        .expect_err("interval cannot be decoded with bound parameters");
    assert!(matches!(undecodable, ExecutorError::Query(_)));
    assert!(undecodable.to_string().contains("cast it to text"));
}

#[tokio::test(flavor = "current_thread")]
async fn unreachable_backend_fails_connectivity_check() {
    if !integration_enabled() {
        return;
    }

    let registry = default_registry();
    let mut params = integration_params(Protocol::Postgres);
    params.port = 1;
    let executor = ProtocolExecutor::new(&registry, Protocol::Postgres, params);
    assert!(!executor.test_connectivity().await);
}
