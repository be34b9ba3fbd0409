use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use otterstax_core::connection::{BackendError, ConnectionParams, Connector, Session};
use otterstax_core::results::{CellValue, RowSet};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, SimpleQueryMessage, SimpleQueryRow};
use uuid::Uuid;

type BoxedSqlError = Box<dyn Error + Sync + Send>;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    fn driver_name(&self) -> &'static str {
        "tokio-postgres"
    }

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Session>, BackendError> {
        let (client, connection) = config_from_params(params)
            .connect(NoTls)
            .await
            .map_err(to_backend_error)?;

        let driver = tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::debug!(%error, "postgres connection ended with error");
            }
        });

        Ok(Box::new(PostgresSession { client, driver }))
    }
}

struct PostgresSession {
    client: Client,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<RowSet, BackendError> {
        let statement = self.client.prepare(sql).await.map_err(to_backend_error)?;
        let columns = statement
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect::<Vec<_>>();

        // Unbound statements go over the simple query protocol, whose text
        // format carries every type; the prepared statement supplies types.
        let rows = if params.is_empty() {
            let types = statement
                .columns()
                .iter()
                .map(|column| column.type_().clone())
                .collect::<Vec<_>>();
            self.client
                .simple_query(sql)
                .await
                .map_err(to_backend_error)?
                .iter()
                .filter_map(|message| match message {
                    SimpleQueryMessage::Row(row) => Some(text_row_to_cells(row, &types)),
                    _ => None,
                })
                .collect()
        } else {
            let bound = to_pg_params(params);
            self.client
                .query(&statement, &param_refs(&bound))
                .await
                .map_err(to_backend_error)?
                .iter()
                .map(row_to_cells)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(RowSet { columns, rows })
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, BackendError> {
        let bound = to_pg_params(params);
        let transaction = self.client.transaction().await.map_err(to_backend_error)?;
        let affected = transaction
            .execute(sql, &param_refs(&bound))
            .await
            .map_err(to_backend_error)?;
        transaction.commit().await.map_err(to_backend_error)?;
        Ok(affected)
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        let Self { client, driver } = *self;
        drop(client);
        driver
            .await
            .map_err(|error| BackendError::new(format!("postgres connection task failed: {error}")))
    }
}

fn config_from_params(params: &ConnectionParams) -> Config {
    let mut config = Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .password(&params.password);
    if let Some(database) = &params.database {
        config.dbname(database);
    }
    config
}

/// A bound parameter encoded for whatever type the server inferred for its
/// placeholder. Values that have no encoding for that type are rejected.
#[derive(Debug, Clone, PartialEq)]
struct PgParam(CellValue);

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedSqlError> {
        match &self.0 {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Bool(value) => match *ty {
                Type::BOOL => value.to_sql(ty, out),
                _ => text_or_reject(&value.to_string(), "boolean", ty, out),
            },
            CellValue::Int(value) => int_to_sql(*value, ty, out),
            CellValue::UInt(value) => match i64::try_from(*value) {
                Ok(value) => int_to_sql(value, ty, out),
                Err(_) if *ty == Type::NUMERIC => Decimal::from(*value).to_sql(ty, out),
                Err(_) => text_or_reject(&value.to_string(), "unsigned integer", ty, out),
            },
            CellValue::Float(value) => float_to_sql(*value, ty, out),
            CellValue::Text(value) => text_to_sql(value, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text_type(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

fn cannot_bind(kind: &str, ty: &Type) -> BoxedSqlError {
    format!("cannot bind {kind} value to a parameter of type {ty}").into()
}

fn text_or_reject(
    rendered: &str,
    kind: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, BoxedSqlError> {
    if is_text_type(ty) {
        rendered.to_sql(ty, out)
    } else {
        Err(cannot_bind(kind, ty))
    }
}

#[allow(clippy::cast_precision_loss)]
fn int_to_sql(value: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedSqlError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(value).to_sql(ty, out),
        _ => text_or_reject(&value.to_string(), "integer", ty, out),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_sql(value: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedSqlError> {
    match *ty {
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => value.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(value)?.to_sql(ty, out),
        _ => text_or_reject(&value.to_string(), "float", ty, out),
    }
}

/// Text is parsed into the placeholder's type, so dates, UUIDs and JSON can
/// be bound from the command line.
fn text_to_sql(value: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxedSqlError> {
    let trimmed = value.trim();
    match *ty {
        _ if is_text_type(ty) => value.to_sql(ty, out),
        Type::BOOL => trimmed.parse::<bool>()?.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            int_to_sql(trimmed.parse::<i64>()?, ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => float_to_sql(trimmed.parse::<f64>()?, ty, out),
        Type::NUMERIC => Decimal::from_str(trimmed)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(value)?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(trimmed)?.to_sql(ty, out),
        Type::DATE => trimmed.parse::<NaiveDate>()?.to_sql(ty, out),
        Type::TIME => trimmed.parse::<NaiveTime>()?.to_sql(ty, out),
        Type::TIMESTAMP => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| trimmed.parse::<NaiveDateTime>())?
            .to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(trimmed)?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        _ => Err(cannot_bind("text", ty)),
    }
}

fn to_pg_params(params: &[CellValue]) -> Vec<PgParam> {
    params.iter().cloned().map(PgParam).collect()
}

fn param_refs(params: &[PgParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect()
}

fn text_row_to_cells(row: &SimpleQueryRow, types: &[Type]) -> Vec<CellValue> {
    (0..row.len())
        .map(|index| match row.get(index) {
            None => CellValue::Null,
            Some(text) => types.get(index).map_or_else(
                || CellValue::Text(text.to_string()),
                |ty| text_to_cell(text, ty),
            ),
        })
        .collect()
}

/// Text-format values are parsed back for the scalar types the binary path
/// also types; everything else keeps the server's text rendering.
fn text_to_cell(text: &str, ty: &Type) -> CellValue {
    let parsed = match *ty {
        Type::BOOL => match text {
            "t" => Some(CellValue::Bool(true)),
            "f" => Some(CellValue::Bool(false)),
            _ => None,
        },
        Type::INT2 | Type::INT4 | Type::INT8 => text.parse::<i64>().ok().map(CellValue::Int),
        Type::OID => text.parse::<u64>().ok().map(CellValue::UInt),
        Type::FLOAT4 | Type::FLOAT8 => text.parse::<f64>().ok().map(CellValue::Float),
        _ => None,
    };
    parsed.unwrap_or_else(|| CellValue::Text(text.to_string()))
}

struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxedSqlError> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

fn row_to_cells(row: &Row) -> Result<Vec<CellValue>, BackendError> {
    (0..row.len())
        .map(|index| pg_value_to_cell(row, index))
        .collect()
}

fn decode<'a, T, F>(row: &'a Row, index: usize, map: F) -> Result<CellValue, BackendError>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> CellValue,
{
    cell_or_error(
        row.columns()[index].name(),
        row.try_get::<_, Option<T>>(index),
        map,
    )
}

fn cell_or_error<T, E, F>(
    column: &str,
    decoded: Result<Option<T>, E>,
    map: F,
) -> Result<CellValue, BackendError>
where
    E: fmt::Display,
    F: FnOnce(T) -> CellValue,
{
    match decoded {
        Ok(Some(value)) => Ok(map(value)),
        Ok(None) => Ok(CellValue::Null),
        Err(error) => Err(BackendError::new(format!(
            "failed to decode column `{column}`: {error}"
        ))),
    }
}

fn pg_value_to_cell(row: &Row, index: usize) -> Result<CellValue, BackendError> {
    let column = &row.columns()[index];
    let ty = column.type_();
    match *ty {
        Type::BOOL => decode(row, index, CellValue::Bool),
        Type::INT2 => decode(row, index, |v: i16| CellValue::Int(v.into())),
        Type::INT4 => decode(row, index, |v: i32| CellValue::Int(v.into())),
        Type::INT8 => decode(row, index, CellValue::Int),
        Type::OID => decode(row, index, |v: u32| CellValue::UInt(v.into())),
        Type::FLOAT4 => decode(row, index, |v: f32| CellValue::Float(v.into())),
        Type::FLOAT8 => decode(row, index, CellValue::Float),
        Type::NUMERIC => decode(row, index, |v: Decimal| CellValue::Text(v.to_string())),
        Type::JSON | Type::JSONB => {
            decode(row, index, |v: serde_json::Value| CellValue::Text(v.to_string()))
        }
        Type::UUID => decode(row, index, |v: Uuid| CellValue::Text(v.to_string())),
        Type::TIMESTAMPTZ => {
            decode(row, index, |v: DateTime<Utc>| CellValue::Text(v.to_rfc3339()))
        }
        Type::TIMESTAMP => decode(row, index, |v: NaiveDateTime| CellValue::Text(v.to_string())),
        Type::DATE => decode(row, index, |v: NaiveDate| CellValue::Text(v.to_string())),
        Type::TIME => decode(row, index, |v: NaiveTime| CellValue::Text(v.to_string())),
        Type::BYTEA => decode(row, index, |v: Vec<u8>| CellValue::Text(bytea_literal(&v))),
        Type::INET => decode(row, index, |v: IpAddr| CellValue::Text(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => decode(row, index, |v: Vec<Option<String>>| {
            CellValue::Text(array_literal(&v))
        }),
        Type::INT4_ARRAY => decode(row, index, |v: Vec<Option<i32>>| {
            CellValue::Text(array_literal(&v))
        }),
        Type::INT8_ARRAY => decode(row, index, |v: Vec<Option<i64>>| {
            CellValue::Text(array_literal(&v))
        }),
        _ if <String as FromSql<'_>>::accepts(ty) => decode(row, index, CellValue::Text),
        _ if <EnumLabel as FromSql<'_>>::accepts(ty) => {
            decode(row, index, |v: EnumLabel| CellValue::Text(v.0))
        }
        _ => Err(BackendError::new(format!(
            "column `{}` has type `{ty}`, which cannot be returned by a statement with \
             bound parameters; cast it to text",
            column.name()
        ))),
    }
}

fn bytea_literal(bytes: &[u8]) -> String {
    let hex = bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("\\x{hex}")
}

fn array_literal<T: fmt::Display>(items: &[Option<T>]) -> String {
    let elements = items
        .iter()
        .map(|item| match item {
            None => "NULL".to_string(),
            Some(value) => quote_array_element(&value.to_string()),
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{elements}}}")
}

fn quote_array_element(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn to_backend_error(error: tokio_postgres::Error) -> BackendError {
    match error.as_db_error() {
        Some(db_error) => BackendError::new(format!(
            "{}: {} ({})",
            db_error.severity(),
            db_error.message(),
            db_error.code().code()
        )),
        None => BackendError::new(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bytes::BytesMut;
    use chrono::NaiveDate;
    use otterstax_core::connection::resolve_connection_params;
    use otterstax_core::environments::{EnvironmentProfile, Protocol, Topology};
    use otterstax_core::results::CellValue;
    use rust_decimal::Decimal;
    use tokio_postgres::types::{IsNull, ToSql, Type};

    use super::{
        array_literal, bytea_literal, cell_or_error, config_from_params, text_to_cell, PgParam,
    };

    fn encode(value: CellValue, ty: &Type) -> (IsNull, Vec<u8>) {
        let mut out = BytesMut::new();
        let is_null = PgParam(value)
            .to_sql_checked(ty, &mut out)
            .expect("encoding should succeed");
        (is_null, out.to_vec())
    }

    fn encode_err(value: CellValue, ty: &Type) -> String {
        let mut out = BytesMut::new();
        PgParam(value)
            .to_sql_checked(ty, &mut out)
            .err()
            .expect("encoding should fail")
            .to_string()
    }

    fn native<T: ToSql>(value: T, ty: &Type) -> Vec<u8> {
        let mut out = BytesMut::new();
        value.to_sql(ty, &mut out).expect("native encoding");
        out.to_vec()
    }

    #[test]
    fn null_encodes_for_any_placeholder_type() {
        for ty in [Type::INT4, Type::TEXT, Type::BOOL, Type::NUMERIC] {
            let (is_null, bytes) = encode(CellValue::Null, &ty);
            assert!(matches!(is_null, IsNull::Yes));
            assert!(bytes.is_empty());
        }
    }

    #[test]
    fn integers_narrow_to_placeholder_width() {
        assert_eq!(encode(CellValue::Int(7), &Type::INT2).1, 7_i16.to_be_bytes());
        assert_eq!(encode(CellValue::Int(7), &Type::INT4).1, 7_i32.to_be_bytes());
        assert_eq!(encode(CellValue::Int(7), &Type::INT8).1, 7_i64.to_be_bytes());
        assert_eq!(encode(CellValue::UInt(7), &Type::INT8).1, 7_i64.to_be_bytes());
    }

    #[test]
    fn integers_compared_against_real_and_numeric_encode_natively() {
        assert_eq!(encode(CellValue::Int(5), &Type::FLOAT4).1, 5_f32.to_be_bytes());
        assert_eq!(encode(CellValue::Int(5), &Type::FLOAT8).1, 5_f64.to_be_bytes());
        assert_eq!(
            encode(CellValue::Int(5), &Type::NUMERIC).1,
            native(Decimal::from(5), &Type::NUMERIC)
        );
        assert_eq!(
            encode(CellValue::UInt(u64::MAX), &Type::NUMERIC).1,
            native(Decimal::from(u64::MAX), &Type::NUMERIC)
        );
    }

    #[test]
    fn floats_encode_for_real_and_numeric() {
        assert_eq!(encode(CellValue::Float(2.5), &Type::FLOAT4).1, 2.5_f32.to_be_bytes());
        assert_eq!(
            encode(CellValue::Float(10.5), &Type::NUMERIC).1,
            native(Decimal::from_str("10.5").expect("decimal"), &Type::NUMERIC)
        );
    }

    #[test]
    fn text_is_parsed_into_the_placeholder_type() {
        assert_eq!(encode(CellValue::from("7"), &Type::INT4).1, 7_i32.to_be_bytes());
        assert_eq!(
            encode(CellValue::from("2024-02-29"), &Type::DATE).1,
            native(
                NaiveDate::from_ymd_opt(2024, 2, 29).expect("valid date"),
                &Type::DATE
            )
        );
        assert_eq!(
            encode(CellValue::from("12.50"), &Type::NUMERIC).1,
            native(Decimal::from_str("12.50").expect("decimal"), &Type::NUMERIC)
        );
        let mut out = BytesMut::new();
        assert!(PgParam(CellValue::from("yesterday"))
            .to_sql_checked(&Type::DATE, &mut out)
            .is_err());
    }

    #[test]
    fn mismatched_values_are_rejected_not_sent_as_text() {
        assert_eq!(
            encode_err(CellValue::Int(5), &Type::DATE),
            "cannot bind integer value to a parameter of type date"
        );
        assert_eq!(
            encode_err(CellValue::Bool(true), &Type::INT4),
            "cannot bind boolean value to a parameter of type int4"
        );
        assert_eq!(
            encode_err(CellValue::from("x"), &Type::INTERVAL),
            "cannot bind text value to a parameter of type interval"
        );
    }

    #[test]
    fn out_of_range_integer_is_an_error() {
        let mut out = BytesMut::new();
        assert!(PgParam(CellValue::Int(i64::from(i16::MAX) + 1))
            .to_sql_checked(&Type::INT2, &mut out)
            .is_err());
    }

    #[test]
    fn text_placeholders_receive_rendered_values() {
        assert_eq!(encode(CellValue::from("shop"), &Type::TEXT).1, b"shop");
        assert_eq!(encode(CellValue::from("shop"), &Type::NAME).1, b"shop");
        assert_eq!(encode(CellValue::Int(42), &Type::TEXT).1, b"42");
        assert_eq!(encode(CellValue::Bool(true), &Type::TEXT).1, b"true");
    }

    #[test]
    fn text_format_values_are_typed_by_column() {
        assert_eq!(text_to_cell("t", &Type::BOOL), CellValue::Bool(true));
        assert_eq!(text_to_cell("-42", &Type::INT8), CellValue::Int(-42));
        assert_eq!(text_to_cell("4294967295", &Type::OID), CellValue::UInt(4_294_967_295));
        assert_eq!(text_to_cell("1.5", &Type::FLOAT8), CellValue::Float(1.5));
        assert_eq!(text_to_cell("1.50", &Type::NUMERIC), CellValue::from("1.50"));
        assert_eq!(text_to_cell("1 day", &Type::INTERVAL), CellValue::from("1 day"));
        assert_eq!(text_to_cell("\\x00ff", &Type::BYTEA), CellValue::from("\\x00ff"));
    }

    #[test]
    fn decode_failures_surface_instead_of_becoming_null() {
        let failed: Result<Option<i64>, String> = Err("invalid buffer size".to_string());
        let error = cell_or_error("total", failed, CellValue::Int)
            .expect_err("decode failure must be reported");
        assert_eq!(
            error.message(),
            "failed to decode column `total`: invalid buffer size"
        );

        let null: Result<Option<i64>, String> = Ok(None);
        assert_eq!(cell_or_error("total", null, CellValue::Int), Ok(CellValue::Null));

        let value: Result<Option<i64>, String> = Ok(Some(3));
        assert_eq!(cell_or_error("total", value, CellValue::Int), Ok(CellValue::Int(3)));
    }

    #[test]
    fn binary_only_values_render_like_postgres_text() {
        assert_eq!(bytea_literal(&[0x00, 0xff, 0x10]), "\\x00ff10");
        assert_eq!(
            array_literal(&[Some("a".to_string()), None, Some("b c".to_string())]),
            "{a,NULL,\"b c\"}"
        );
        assert_eq!(array_literal(&[Some(1_i32), Some(2)]), "{1,2}");
        assert_eq!(array_literal::<i64>(&[]), "{}");
    }

    #[test]
    fn config_carries_database_for_protocol_b() {
        let profile = EnvironmentProfile::new("local", "db.internal", Topology::Local)
            .with_credentials("reader", "secret");
        let params = resolve_connection_params(&profile, Protocol::Postgres);

        let config = config_from_params(&params);
        assert_eq!(config.get_user(), Some("reader"));
        assert_eq!(config.get_dbname(), Some("postgres"));
        assert_eq!(config.get_ports(), &[5432]);
        assert_eq!(config.get_password(), Some(&b"secret"[..]));
    }
}
