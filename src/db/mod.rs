//! Database collaborators
//!
//! Schema introspection and statement execution are traits so the session can run against
//! a live sqlx pool or an in-memory fake in tests.

mod sqlx_database;

pub use sqlx_database::SqlxDatabase;

use crate::error::Result;
use crate::gate::AuthorizedStatement;
use crate::schema::SchemaSnapshot;
use crate::validator::command_shape;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// Rows returned (or affected) by one executed statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub row_count: u64,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot>;
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a statement the gate has authorized.
    async fn execute(&self, statement: &AuthorizedStatement) -> Result<ExecutionOutcome>;

    /// Check connectivity, returning the server version string.
    async fn test_connection(&self) -> Result<String>;
}

/// Whether a statement produces a result set rather than an affected-row count
pub(crate) fn returns_rows(sql: &str) -> bool {
    let Some(shape) = command_shape(sql) else {
        return false;
    };
    match shape.leading.as_str() {
        "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" => true,
        _ => shape.returning || matches!(shape.verb.as_str(), "SELECT" | "VALUES" | "TABLE"),
    }
}
