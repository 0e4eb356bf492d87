//! The fixed read-only tool set the analytical path reasons with.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;

use salescope_db::DbPool;

use crate::guardrails::{GuardrailDecision, QueryGuard};
use crate::tools::{Tool, ToolAccess, ToolError, ToolRegistry};

pub const LIST_TABLES: &str = "list_tables";
pub const DESCRIBE_SCHEMA: &str = "describe_schema";
pub const RUN_QUERY: &str = "run_query";

const HIDDEN_TABLES: &[&str] = &["chat_session", "chat_message"];
const SAMPLE_ROWS: u32 = 3;

/// Builds the three introspection/query tools over one analytics pool.
#[derive(Clone, Debug)]
pub struct SqlToolProvider {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    pool: DbPool,
    guard: QueryGuard,
}

impl SqlToolProvider {
    /// `pool` should come from `salescope_db::connect_read_only`.
    pub fn new(pool: DbPool, guard: QueryGuard) -> Self {
        Self { inner: Arc::new(Inner { pool, guard }) }
    }

    pub fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        registry.register(ListTables(Arc::clone(&self.inner)));
        registry.register(DescribeSchema(Arc::clone(&self.inner)));
        registry.register(RunQuery(Arc::clone(&self.inner)));
        registry
    }
}

impl Inner {
    async fn visible_tables(&self) -> Result<Vec<String>, ToolError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(execution_error)?;

        Ok(names
            .into_iter()
            .filter(|name| {
                !name.starts_with("sqlite_")
                    && !name.starts_with("_sqlx")
                    && !HIDDEN_TABLES.contains(&name.as_str())
            })
            .collect())
    }
}

struct ListTables(Arc<Inner>);
struct DescribeSchema(Arc<Inner>);
struct RunQuery(Arc<Inner>);

#[async_trait]
impl Tool for ListTables {
    fn name(&self) -> &'static str {
        LIST_TABLES
    }

    fn description(&self) -> &'static str {
        "List the tables available in the sales database. Call this before anything else."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::ReadOnly
    }

    async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
        Ok(json!({ "tables": self.0.visible_tables().await? }))
    }
}

#[derive(Debug, Deserialize)]
struct DescribeInput {
    table_names: Vec<String>,
}

#[async_trait]
impl Tool for DescribeSchema {
    fn name(&self) -> &'static str {
        DESCRIBE_SCHEMA
    }

    fn description(&self) -> &'static str {
        "Describe the columns of the given tables and show a few sample rows."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_names": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tables to describe, as returned by list_tables."
                }
            },
            "required": ["table_names"]
        })
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::ReadOnly
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let input: DescribeInput = parse_input(input)?;
        if input.table_names.is_empty() {
            return Err(ToolError::InvalidInput("table_names must not be empty".to_string()));
        }

        let known = self.0.visible_tables().await?;
        let mut tables = Vec::new();
        let mut unknown = Vec::new();

        for table in input.table_names {
            let table = table.trim().to_string();
            if !known.contains(&table) {
                unknown.push(table);
                continue;
            }

            let columns = sqlx::query(
                "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?) ORDER BY cid",
            )
            .bind(&table)
            .fetch_all(&self.0.pool)
            .await
            .map_err(execution_error)?
            .iter()
            .map(|row| {
                Ok(json!({
                    "name": row.try_get::<String, _>(0)?,
                    "type": row.try_get::<String, _>(1)?,
                    "nullable": row.try_get::<i64, _>(2)? == 0,
                    "primary_key": row.try_get::<i64, _>(3)? > 0,
                }))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(execution_error)?;

            let sample_sql =
                format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_identifier(&table));
            let samples = sqlx::query(&sample_sql)
                .fetch_all(&self.0.pool)
                .await
                .map_err(execution_error)?
                .iter()
                .map(row_to_json)
                .collect::<Vec<_>>();

            tables.push(json!({ "table": table, "columns": columns, "sample_rows": samples }));
        }

        Ok(json!({ "tables": tables, "unknown_tables": unknown }))
    }
}

#[derive(Debug, Deserialize)]
struct QueryInput {
    sql: String,
    #[serde(default)]
    limit: Option<u32>,
}

#[async_trait]
impl Tool for RunQuery {
    fn name(&self) -> &'static str {
        RUN_QUERY
    }

    fn description(&self) -> &'static str {
        "Run one read-only SELECT statement. Select only the columns you need. Results are capped \
         at `limit` rows (default 5)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string", "description": "A single SELECT or WITH statement." },
                "limit": {
                    "type": "integer",
                    "description": "Maximum rows to return. Only raise it when the user asks for more."
                }
            },
            "required": ["sql"]
        })
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::ReadOnly
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let input: QueryInput = parse_input(input)?;
        let guard = self.0.guard;

        if let GuardrailDecision::Deny { reason_code, user_message } = guard.evaluate(&input.sql) {
            debug!(event_name = "agent.tool.query_rejected", reason_code, "query rejected by guard");
            return Err(ToolError::Rejected { reason_code, message: user_message });
        }

        let limit = guard.effective_limit(input.limit);
        let rows = sqlx::query(&guard.bounded(&input.sql, limit))
            .fetch_all(&self.0.pool)
            .await
            .map_err(execution_error)?;

        let truncated = rows.len() > limit as usize;
        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
            .unwrap_or_else(Vec::<String>::new);
        let rows = rows.iter().take(limit as usize).map(row_to_json).collect::<Vec<_>>();

        Ok(json!({
            "columns": columns,
            "row_count": rows.len(),
            "rows": rows,
            "limit": limit,
            "truncated": truncated,
        }))
    }
}

fn parse_input<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|error| ToolError::InvalidInput(error.to_string()))
}

fn execution_error(error: sqlx::Error) -> ToolError {
    match error {
        sqlx::Error::Database(database) => ToolError::Execution(database.message().to_string()),
        other => ToolError::Execution(other.to_string()),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), cell_to_json(row, index));
    }
    Value::Object(object)
}

fn cell_to_json(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "BIGINT" | "BOOLEAN" => {
            row.try_get_unchecked::<i64, _>(index).map(Value::from).unwrap_or(Value::Null)
        }
        "REAL" | "NUMERIC" => {
            row.try_get_unchecked::<f64, _>(index).map(Value::from).unwrap_or(Value::Null)
        }
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::from(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row.try_get_unchecked::<String, _>(index).map(Value::from).unwrap_or(Value::Null),
    }
}
