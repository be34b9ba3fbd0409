use async_trait::async_trait;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::{Protocol as WireProtocol, Queryable};
use mysql_async::{Conn, OptsBuilder, Params, QueryResult, Row, TxOpts, Value};
use otterstax_core::connection::{BackendError, ConnectionParams, Connector, Session};
use otterstax_core::results::{CellValue, RowSet};

#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlConnector;

#[async_trait]
impl Connector for MysqlConnector {
    fn driver_name(&self) -> &'static str {
        "mysql_async"
    }

    async fn open(&self, params: &ConnectionParams) -> Result<Box<dyn Session>, BackendError> {
        let conn = Conn::new(opts_from_params(params))
            .await
            .map_err(to_backend_error)?;
        Ok(Box::new(MysqlSession { conn }))
    }
}

#[derive(Debug)]
struct MysqlSession {
    conn: Conn,
}

#[async_trait]
impl Session for MysqlSession {
    async fn query(&mut self, sql: &str, params: &[CellValue]) -> Result<RowSet, BackendError> {
        // Unbound statements go over the text protocol; the backend is not
        // required to support server-side prepares for plain SHOW/DESCRIBE.
        let row_set = if params.is_empty() {
            let result = self.conn.query_iter(sql).await.map_err(to_backend_error)?;
            collect_row_set(result).await
        } else {
            let result = self
                .conn
                .exec_iter(sql, to_mysql_params(params))
                .await
                .map_err(to_backend_error)?;
            collect_row_set(result).await
        };
        row_set.map_err(to_backend_error)
    }

    async fn execute(&mut self, sql: &str, params: &[CellValue]) -> Result<u64, BackendError> {
        let mut transaction = self
            .conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(to_backend_error)?;

        let outcome = if params.is_empty() {
            transaction.query_drop(sql).await
        } else {
            transaction.exec_drop(sql, to_mysql_params(params)).await
        };
        outcome.map_err(to_backend_error)?;

        let affected = transaction.affected_rows();
        transaction.commit().await.map_err(to_backend_error)?;
        Ok(affected)
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.conn.disconnect().await.map_err(to_backend_error)
    }
}

async fn collect_row_set<P>(
    mut result: QueryResult<'_, 'static, P>,
) -> Result<RowSet, mysql_async::Error>
where
    P: WireProtocol,
{
    let column_info = result
        .columns_ref()
        .iter()
        .map(|column| (column.name_str().into_owned(), column.column_type()))
        .collect::<Vec<_>>();

    let rows = result.collect::<Row>().await?;
    result.drop_result().await?;

    let column_types = column_info.iter().map(|(_, kind)| *kind).collect::<Vec<_>>();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.unwrap_raw()
                .into_iter()
                .zip(&column_types)
                .map(|(value, column_type)| {
                    mysql_value_to_cell(value.unwrap_or(Value::NULL), *column_type)
                })
                .collect()
        })
        .collect();

    Ok(RowSet {
        columns: column_info.into_iter().map(|(name, _)| name).collect(),
        rows,
    })
}

fn opts_from_params(params: &ConnectionParams) -> OptsBuilder {
    OptsBuilder::default()
        .ip_or_hostname(params.host.clone())
        .tcp_port(params.port)
        .user(Some(params.user.clone()))
        .pass(Some(params.password.clone()))
        .db_name(params.database.clone())
        .prefer_socket(false)
}

fn to_mysql_params(params: &[CellValue]) -> Params {
    Params::Positional(params.iter().map(cell_to_mysql_value).collect())
}

fn cell_to_mysql_value(value: &CellValue) -> Value {
    match value {
        CellValue::Null => Value::NULL,
        CellValue::Bool(value) => Value::Int(i64::from(*value)),
        CellValue::Int(value) => Value::Int(*value),
        CellValue::UInt(value) => Value::UInt(*value),
        CellValue::Float(value) => Value::Double(*value),
        CellValue::Text(value) => Value::Bytes(value.clone().into_bytes()),
    }
}

fn is_integer_column(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

fn is_float_column(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE
    )
}

/// The text protocol sends every value as bytes; numeric columns are parsed
/// back so both protocols hand the renderer the same shapes.
fn mysql_value_to_cell(value: Value, column_type: ColumnType) -> CellValue {
    match value {
        Value::NULL => CellValue::Null,
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if is_integer_column(column_type) {
                if let Ok(parsed) = text.parse::<i64>() {
                    return CellValue::Int(parsed);
                }
                if let Ok(parsed) = text.parse::<u64>() {
                    return CellValue::UInt(parsed);
                }
            } else if is_float_column(column_type) {
                if let Ok(parsed) = text.parse::<f64>() {
                    return CellValue::Float(parsed);
                }
            }
            CellValue::Text(text)
        }
        Value::Int(value) => CellValue::Int(value),
        Value::UInt(value) => CellValue::UInt(value),
        Value::Float(value) => CellValue::Float(f64::from(value)),
        Value::Double(value) => CellValue::Float(value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            CellValue::Text(if (hour, minute, second, micros) == (0, 0, 0, 0) {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            })
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            CellValue::Text(format!(
                "{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    BackendError::new(error.to_string())
}
