use async_trait::async_trait;
use sqlbuddy::audit::{AuditDecision, AuditLog};
use sqlbuddy::db::{ExecutionOutcome, QueryExecutor, SchemaSource};
use sqlbuddy::orchestrator::GenerationOrchestrator;
use sqlbuddy::prompt::{fence_sql, VARIATION_SEPARATOR};
use sqlbuddy::provider::LlmProvider;
use sqlbuddy::retry::RetryPolicy;
use sqlbuddy::schema::{ColumnInfo, TableInfo};
use sqlbuddy::{AuthorizedStatement, GeneratorSettings, Result, SchemaSnapshot, SqlBuddy, SqlBuddyError};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedProvider(String);

#[async_trait]
impl LlmProvider for FixedProvider {
    async fn send(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

/// In-memory database: counts schema fetches and records executed SQL
#[derive(Default)]
struct FakeDatabase {
    fetches: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

#[async_trait]
impl SchemaSource for FakeDatabase {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        SchemaSnapshot::new(vec![TableInfo::new("users")
            .with_column(ColumnInfo::new("id", "int").primary_key())
            .with_column(ColumnInfo::new("email", "varchar(255)").not_null())])
        .map(|s| s.with_database("app"))
    }
}

#[async_trait]
impl QueryExecutor for FakeDatabase {
    async fn execute(&self, statement: &AuthorizedStatement) -> Result<ExecutionOutcome> {
        self.executed.lock().unwrap().push(statement.sql().to_string());
        let mut row = Map::new();
        row.insert("id".to_string(), json!(1));
        Ok(ExecutionOutcome {
            row_count: 1,
            columns: vec!["id".to_string()],
            rows: vec![row],
        })
    }

    async fn test_connection(&self) -> Result<String> {
        Ok("fake 1.0".to_string())
    }
}

fn session(response: &str) -> (SqlBuddy, Arc<FakeDatabase>) {
    let db = Arc::new(FakeDatabase::default());
    let settings = GeneratorSettings {
        timeout: Duration::from_secs(1),
        retry: RetryPolicy::immediate(2),
    };
    let orchestrator =
        GenerationOrchestrator::new(Arc::new(FixedProvider(response.to_string())), settings);
    let buddy = SqlBuddy::new(orchestrator, db.clone(), db.clone())
        .with_audit_log(AuditLog::new(None, 100));
    (buddy, db)
}

#[tokio::test]
async fn schema_is_cached_until_forced() {
    let (buddy, db) = session("");
    buddy.load_schema(false).await.unwrap();
    buddy.schema_summary().await.unwrap();
    assert_eq!(db.fetches.load(Ordering::SeqCst), 1);

    buddy.load_schema(true).await.unwrap();
    assert_eq!(db.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn table_info_lookup() {
    let (buddy, _) = session("");
    let users = buddy.table_info("USERS").await.unwrap();
    assert_eq!(users.name, "users");
    assert!(matches!(
        buddy.table_info("missing").await,
        Err(SqlBuddyError::Schema(_))
    ));
}

#[tokio::test]
async fn generate_and_execute_runs_safe_query() {
    let (buddy, db) = session(&fence_sql("SELECT id FROM users WHERE email = 'a@b.c'"));
    let (result, outcome) = buddy.generate_and_execute("find user", false).await.unwrap();

    assert!(result.validation.is_valid());
    assert_eq!(outcome.row_count, 1);
    assert_eq!(
        db.executed.lock().unwrap().as_slice(),
        ["SELECT id FROM users WHERE email = 'a@b.c'"]
    );

    let audit = buddy.audit_log().recent(10);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].decision, AuditDecision::Authorized);
    assert_eq!(audit[0].request_id, Some(result.request_id));
    assert_eq!(audit[0].row_count, Some(1));
}

#[tokio::test]
async fn destructive_generated_query_never_reaches_executor() {
    let (buddy, db) = session(&fence_sql("DROP TABLE users"));
    let err = buddy.generate_and_execute("remove users", true).await.unwrap_err();

    assert!(matches!(err, SqlBuddyError::UnsafeQuery(_)));
    assert!(db.executed.lock().unwrap().is_empty());
    assert_eq!(buddy.audit_log().recent(1)[0].decision, AuditDecision::Rejected);
}

#[tokio::test]
async fn unqualified_delete_needs_permission() {
    let (buddy, db) = session("");

    let err = buddy.execute_query("DELETE FROM users", false).await.unwrap_err();
    assert!(err.to_string().contains("WHERE"));
    assert!(db.executed.lock().unwrap().is_empty());

    buddy.execute_query("DELETE FROM users", true).await.unwrap();
    assert_eq!(db.executed.lock().unwrap().len(), 1);

    let audit = buddy.audit_log().recent(10);
    assert_eq!(audit[0].decision, AuditDecision::Rejected);
    assert_eq!(audit[1].decision, AuditDecision::AuthorizedDestructive);
}

#[tokio::test]
async fn each_variation_is_gated_on_its_own_verdict() {
    let raw = [fence_sql("SELECT id FROM users"), fence_sql("DELETE FROM users")]
        .join(format!("\n{}\n", VARIATION_SEPARATOR).as_str());
    let (buddy, db) = session(&raw);

    let result = buddy.generate_multiple_queries("users", 2).await.unwrap();
    buddy.execute_candidate(&result, 0, false).await.unwrap();
    assert!(buddy.execute_candidate(&result, 1, false).await.is_err());
    assert!(buddy.execute_candidate(&result, 2, true).await.is_err());

    assert_eq!(db.executed.lock().unwrap().as_slice(), ["SELECT id FROM users"]);
}

#[tokio::test]
async fn test_connection_delegates_to_executor() {
    let (buddy, _) = session("");
    assert_eq!(buddy.test_connection().await.unwrap(), "fake 1.0");
    assert_eq!(buddy.provider_description(), "fixed");
}

#[tokio::test]
async fn audit_file_failure_never_masks_the_real_result() {
    let db = Arc::new(FakeDatabase::default());
    let orchestrator = GenerationOrchestrator::new(
        Arc::new(FixedProvider(String::new())),
        GeneratorSettings {
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::immediate(0),
        },
    );
    let missing = std::env::temp_dir()
        .join(format!("sqlbuddy-no-such-dir-{}", std::process::id()))
        .join("audit.jsonl");
    let buddy = SqlBuddy::new(orchestrator, db.clone(), db.clone())
        .with_audit_log(AuditLog::new(Some(missing), 100));

    let outcome = buddy
        .execute_query("DELETE FROM users WHERE id = 1", false)
        .await
        .unwrap();
    assert_eq!(outcome.row_count, 1);
    assert_eq!(
        db.executed.lock().unwrap().as_slice(),
        ["DELETE FROM users WHERE id = 1"]
    );

    let err = buddy.execute_query("DROP TABLE users", true).await.unwrap_err();
    assert!(matches!(err, SqlBuddyError::UnsafeQuery(_)), "{:?}", err);
    assert_eq!(buddy.audit_log().len(), 2);
}
