use crate::environments::Protocol;
use crate::executor::{ExecutorError, ProtocolExecutor};
use crate::results::{CellValue, QueryResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntrospectionRequest {
    Schemas,
    Tables { schema: String },
    Columns { schema: String, table: String },
}

impl IntrospectionRequest {
    /// Maps the optional `--database`/`--table` pair onto a request. A table
    /// without a schema lists schemas, as there is nothing to scope it to.
    #[must_use]
    pub fn from_scope(schema: Option<&str>, table: Option<&str>) -> Self {
        match (schema, table) {
            (Some(schema), Some(table)) => Self::Columns {
                schema: schema.to_string(),
                table: table.to_string(),
            },
            (Some(schema), None) => Self::Tables {
                schema: schema.to_string(),
            },
            (None, _) => Self::Schemas,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectionStatement {
    pub sql: String,
    pub params: Vec<CellValue>,
}

impl IntrospectionStatement {
    fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn bound(sql: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: vec![CellValue::Text(param.into())],
        }
    }
}

#[must_use]
pub fn introspection_statement(
    protocol: Protocol,
    request: &IntrospectionRequest,
) -> IntrospectionStatement {
    match protocol {
        Protocol::Mysql => mysql_statement(request),
        Protocol::Postgres => postgres_statement(request),
    }
}

fn mysql_statement(request: &IntrospectionRequest) -> IntrospectionStatement {
    match request {
        IntrospectionRequest::Schemas => IntrospectionStatement::plain("SHOW DATABASES"),
        IntrospectionRequest::Tables { schema } => {
            IntrospectionStatement::plain(format!("SHOW TABLES FROM {}", quote_mysql_ident(schema)))
        }
        IntrospectionRequest::Columns { schema, table } => IntrospectionStatement::plain(format!(
            "DESCRIBE {}.{}",
            quote_mysql_ident(schema),
            quote_mysql_ident(table)
        )),
    }
}

fn postgres_statement(request: &IntrospectionRequest) -> IntrospectionStatement {
    match request {
        IntrospectionRequest::Schemas => {
            IntrospectionStatement::plain("SELECT schema_name FROM information_schema.schemata")
        }
        IntrospectionRequest::Tables { schema } => IntrospectionStatement::bound(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1",
            schema.as_str(),
        ),
        IntrospectionRequest::Columns { schema, table } => IntrospectionStatement::bound(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema || '.' || table_name = $1",
            format!("{schema}.{table}"),
        ),
    }
}

fn quote_mysql_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Live metadata listing. Nothing is cached; every call re-queries.
#[derive(Debug)]
pub struct SchemaIntrospector<'e, 'r> {
    executor: &'e ProtocolExecutor<'r>,
}

impl<'e, 'r> SchemaIntrospector<'e, 'r> {
    #[must_use]
    pub fn new(executor: &'e ProtocolExecutor<'r>) -> Self {
        Self { executor }
    }

    pub async fn list_schemas(&self) -> Result<QueryResult, ExecutorError> {
        self.run(&IntrospectionRequest::Schemas).await
    }

    pub async fn list_tables(&self, schema: &str) -> Result<QueryResult, ExecutorError> {
        self.run(&IntrospectionRequest::Tables {
            schema: schema.to_string(),
        })
        .await
    }

    pub async fn describe_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<QueryResult, ExecutorError> {
        self.run(&IntrospectionRequest::Columns {
            schema: schema.to_string(),
            table: table.to_string(),
        })
        .await
    }

    pub async fn run(&self, request: &IntrospectionRequest) -> Result<QueryResult, ExecutorError> {
        let statement = introspection_statement(self.executor.protocol(), request);
        tracing::debug!(?request, sql = %statement.sql, "introspecting schema");
        self.executor.execute(&statement.sql, &statement.params).await
    }
}
