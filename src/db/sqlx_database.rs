//! sqlx-backed PostgreSQL / MySQL collaborator

use super::{returns_rows, ExecutionOutcome, QueryExecutor, SchemaSource};
use crate::config::{DatabaseConfig, DatabaseKind};
use crate::error::{Result, SqlBuddyError};
use crate::gate::AuthorizedStatement;
use crate::schema::{ColumnRow, ForeignKeyRow, SchemaSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const PG_COLUMNS: &str = r#"
    SELECT table_name::text, column_name::text, data_type::text, is_nullable::text
    FROM information_schema.columns
    WHERE table_schema = current_schema()
    ORDER BY table_name, ordinal_position
"#;

const PG_PRIMARY_KEYS: &str = r#"
    SELECT kcu.table_name::text, kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
     AND tc.table_schema = kcu.table_schema
    WHERE tc.constraint_type = 'PRIMARY KEY'
      AND tc.table_schema = current_schema()
"#;

const PG_FOREIGN_KEYS: &str = r#"
    SELECT kcu.table_name::text, kcu.column_name::text,
           ccu.table_name::text, ccu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON tc.constraint_name = kcu.constraint_name
     AND tc.table_schema = kcu.table_schema
    JOIN information_schema.constraint_column_usage ccu
      ON ccu.constraint_name = tc.constraint_name
     AND ccu.table_schema = tc.table_schema
    WHERE tc.constraint_type = 'FOREIGN KEY'
      AND tc.table_schema = current_schema()
"#;

const MYSQL_COLUMNS: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR),
           CAST(COLUMN_TYPE AS CHAR), CAST(IS_NULLABLE AS CHAR)
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME, ORDINAL_POSITION
"#;

const MYSQL_PRIMARY_KEYS: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR)
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE()
      AND CONSTRAINT_NAME = 'PRIMARY'
"#;

const MYSQL_FOREIGN_KEYS: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR),
           CAST(REFERENCED_TABLE_NAME AS CHAR), CAST(REFERENCED_COLUMN_NAME AS CHAR)
    FROM information_schema.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE()
      AND REFERENCED_TABLE_NAME IS NOT NULL
"#;

/// Decode a cell by trying each listed Rust type in order; `None` if no type fits.
macro_rules! decode_cell {
    ($row:expr, $idx:expr, [$($ty:ty),+ $(,)?]) => {{
        let mut cell: Option<Value> = None;
        $(
            if cell.is_none() {
                if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
                    cell = Some(match value {
                        Some(v) => json!(v),
                        None => Value::Null,
                    });
                }
            }
        )+
        cell
    }};
}

enum Pool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

/// Connection pool for the target database
pub struct SqlxDatabase {
    pool: Pool,
    database: String,
}

impl SqlxDatabase {
    /// Open a pool and verify it with `SELECT 1`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = match config.kind {
            DatabaseKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_with(pg_options(config))
                    .await?;
                sqlx::query("SELECT 1").execute(&pool).await?;
                Pool::Postgres(pool)
            }
            DatabaseKind::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect_with(mysql_options(config))
                    .await?;
                sqlx::query("SELECT 1").execute(&pool).await?;
                Pool::MySql(pool)
            }
        };

        info!(
            kind = %config.kind,
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to database"
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
        })
    }

    pub fn kind(&self) -> DatabaseKind {
        match self.pool {
            Pool::Postgres(_) => DatabaseKind::Postgres,
            Pool::MySql(_) => DatabaseKind::MySql,
        }
    }

    async fn text_rows(&self, sql: &str) -> Result<Vec<Vec<String>>> {
        match &self.pool {
            Pool::Postgres(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                rows.iter().map(|row| text_cells(row)).collect()
            }
            Pool::MySql(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                rows.iter().map(|row| text_cells(row)).collect()
            }
        }
    }

    fn introspection_queries(&self) -> (&'static str, &'static str, &'static str) {
        match self.pool {
            Pool::Postgres(_) => (PG_COLUMNS, PG_PRIMARY_KEYS, PG_FOREIGN_KEYS),
            Pool::MySql(_) => (MYSQL_COLUMNS, MYSQL_PRIMARY_KEYS, MYSQL_FOREIGN_KEYS),
        }
    }
}

fn pg_options(config: &DatabaseConfig) -> PgConnectOptions {
    let mut options = PgConnectOptions::new().host(&config.host).port(config.port);
    if !config.user.is_empty() {
        options = options.username(&config.user);
    }
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if !config.database.is_empty() {
        options = options.database(&config.database);
    }
    options
}

fn mysql_options(config: &DatabaseConfig) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new().host(&config.host).port(config.port);
    if !config.user.is_empty() {
        options = options.username(&config.user);
    }
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if !config.database.is_empty() {
        options = options.database(&config.database);
    }
    options
}

fn text_cells<R>(row: &R) -> Result<Vec<String>>
where
    R: Row,
    for<'r> String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    usize: sqlx::ColumnIndex<R>,
{
    (0..row.len())
        .map(|idx| {
            row.try_get::<Option<String>, _>(idx)
                .map(|value| value.unwrap_or_default())
                .map_err(SqlBuddyError::from)
        })
        .collect()
}

fn unsupported(type_name: &str) -> Value {
    Value::String(format!("<{}>", type_name))
}

fn pg_row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell!(
            row,
            idx,
            [
                bool,
                i16,
                i32,
                i64,
                f32,
                f64,
                String,
                NaiveDate,
                NaiveTime,
                NaiveDateTime,
                DateTime<Utc>,
                Uuid,
                Value,
            ]
        )
        .unwrap_or_else(|| unsupported(column.type_info().name()));
        out.insert(column.name().to_string(), value);
    }
    out
}

fn mysql_row_to_json(row: &MySqlRow) -> Map<String, Value> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell!(
            row,
            idx,
            [
                bool,
                i64,
                u64,
                i32,
                u32,
                i16,
                u16,
                i8,
                u8,
                f64,
                f32,
                String,
                NaiveDate,
                NaiveTime,
                NaiveDateTime,
                DateTime<Utc>,
                Value,
            ]
        )
        .unwrap_or_else(|| unsupported(column.type_info().name()));
        out.insert(column.name().to_string(), value);
    }
    out
}

fn column_names<R: Row>(rows: &[R]) -> Vec<String> {
    rows.first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default()
}

/// Assemble introspection rows into a snapshot
fn snapshot_from_text(
    columns: Vec<Vec<String>>,
    primary_keys: Vec<Vec<String>>,
    foreign_keys: Vec<Vec<String>>,
) -> Result<SchemaSnapshot> {
    let shape_error = |what: &str| SqlBuddyError::Schema(format!("Unexpected {} row shape", what));

    let columns = columns
        .into_iter()
        .map(|row| match <[String; 4]>::try_from(row) {
            Ok([table, column, data_type, nullable]) => Ok(ColumnRow {
                table,
                column,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            }),
            Err(_) => Err(shape_error("column")),
        })
        .collect::<Result<Vec<_>>>()?;

    let primary_keys = primary_keys
        .into_iter()
        .map(|row| match <[String; 2]>::try_from(row) {
            Ok([table, column]) => Ok((table, column)),
            Err(_) => Err(shape_error("primary key")),
        })
        .collect::<Result<Vec<_>>>()?;

    let foreign_keys = foreign_keys
        .into_iter()
        .map(|row| match <[String; 4]>::try_from(row) {
            Ok([table, column, referenced_table, referenced_column]) => Ok(ForeignKeyRow {
                table,
                column,
                referenced_table,
                referenced_column,
            }),
            Err(_) => Err(shape_error("foreign key")),
        })
        .collect::<Result<Vec<_>>>()?;

    SchemaSnapshot::from_rows(columns, primary_keys, foreign_keys)
}

#[async_trait]
impl SchemaSource for SqlxDatabase {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        let (columns_sql, pk_sql, fk_sql) = self.introspection_queries();
        let columns = self.text_rows(columns_sql).await?;
        let primary_keys = self.text_rows(pk_sql).await?;
        let foreign_keys = self.text_rows(fk_sql).await?;
        debug!(
            columns = columns.len(),
            primary_keys = primary_keys.len(),
            foreign_keys = foreign_keys.len(),
            "Introspected schema"
        );

        Ok(snapshot_from_text(columns, primary_keys, foreign_keys)?.with_database(&self.database))
    }
}

#[async_trait]
impl QueryExecutor for SqlxDatabase {
    async fn execute(&self, statement: &AuthorizedStatement) -> Result<ExecutionOutcome> {
        let sql = statement.sql();
        let with_rows = returns_rows(sql);
        debug!(with_rows, destructive = statement.is_destructive(), "Executing statement");

        let outcome = match (&self.pool, with_rows) {
            (Pool::Postgres(pool), true) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                ExecutionOutcome {
                    row_count: rows.len() as u64,
                    columns: column_names(&rows),
                    rows: rows.iter().map(pg_row_to_json).collect(),
                }
            }
            (Pool::MySql(pool), true) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                ExecutionOutcome {
                    row_count: rows.len() as u64,
                    columns: column_names(&rows),
                    rows: rows.iter().map(mysql_row_to_json).collect(),
                }
            }
            (Pool::Postgres(pool), false) => ExecutionOutcome {
                row_count: sqlx::query(sql).execute(pool).await?.rows_affected(),
                ..Default::default()
            },
            (Pool::MySql(pool), false) => ExecutionOutcome {
                row_count: sqlx::query(sql).execute(pool).await?.rows_affected(),
                ..Default::default()
            },
        };

        info!(row_count = outcome.row_count, "Statement executed");
        Ok(outcome)
    }

    async fn test_connection(&self) -> Result<String> {
        let version = match &self.pool {
            Pool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(pool)
                    .await?
            }
            Pool::MySql(pool) => {
                sqlx::query_scalar::<_, String>("SELECT CAST(VERSION() AS CHAR)")
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_snapshot_from_introspection_rows() {
        let snapshot = snapshot_from_text(
            vec![
                row(&["orders", "id", "integer", "NO"]),
                row(&["orders", "user_id", "integer", "YES"]),
                row(&["users", "id", "integer", "NO"]),
            ],
            vec![row(&["orders", "id"]), row(&["users", "id"])],
            vec![row(&["orders", "user_id", "users", "id"])],
        )
        .unwrap();

        let orders = snapshot.table("orders").unwrap();
        assert_eq!(orders.primary_keys(), vec!["id"]);
        assert!(orders.column("user_id").unwrap().nullable);
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(snapshot.tables().len(), 2);
    }

    #[test]
    fn test_bad_row_shape_is_schema_error() {
        let err = snapshot_from_text(vec![row(&["users", "id"])], vec![], vec![]).unwrap_err();
        assert!(matches!(err, SqlBuddyError::Schema(_)));
    }

    #[test]
    fn test_connect_options_take_raw_values() {
        let config = DatabaseConfig::new(DatabaseKind::Postgres, "::1", "app user", "p@ss:w/rd", "shop/db");
        let options = pg_options(&config);
        assert_eq!(options.get_host(), "::1");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "app user");
        assert_eq!(options.get_database(), Some("shop/db"));
    }
}
