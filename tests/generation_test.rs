use async_trait::async_trait;
use sqlbuddy::orchestrator::GenerationOrchestrator;
use sqlbuddy::prompt::{fence_sql, VARIATION_SEPARATOR};
use sqlbuddy::provider::LlmProvider;
use sqlbuddy::retry::RetryPolicy;
use sqlbuddy::schema::{ColumnInfo, TableInfo};
use sqlbuddy::{GeneratorSettings, Result, SchemaSnapshot, SqlBuddyError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Step {
    Respond(String),
    Hang,
    Fail(SqlBuddyError),
}

/// Provider that plays back a script and records every prompt it receives
struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn send(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(text)) => Ok(text),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("late response".to_string())
            }
            Some(Step::Fail(err)) => Err(err),
            None => Err(SqlBuddyError::ProviderRejected("script exhausted".to_string())),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

fn shop_schema() -> SchemaSnapshot {
    SchemaSnapshot::new(vec![
        TableInfo::new("customers")
            .with_column(ColumnInfo::new("id", "int").primary_key())
            .with_column(ColumnInfo::new("name", "varchar(100)").not_null()),
        TableInfo::new("orders")
            .with_column(ColumnInfo::new("id", "int").primary_key())
            .with_column(ColumnInfo::new("customer_id", "int").not_null())
            .with_column(ColumnInfo::new("total", "decimal(10,2)"))
            .with_foreign_key("customer_id", "customers", "id"),
    ])
    .unwrap()
    .with_database("shop")
}

fn orchestrator(provider: Arc<ScriptedProvider>) -> GenerationOrchestrator {
    let settings = GeneratorSettings {
        timeout: Duration::from_millis(50),
        retry: RetryPolicy::immediate(2),
    };
    GenerationOrchestrator::new(provider, settings)
}

const TOP_CUSTOMERS: [&str; 3] = [
    "SELECT c.name, SUM(o.total) AS spent\nFROM customers c\nJOIN orders o ON o.customer_id = c.id\nGROUP BY c.name\nORDER BY spent DESC\nLIMIT 5",
    "SELECT name, spent FROM (\n  SELECT customer_id, SUM(total) AS spent FROM orders GROUP BY customer_id\n) t JOIN customers c ON c.id = t.customer_id\nORDER BY spent DESC LIMIT 5",
    "WITH spend AS (SELECT customer_id, SUM(total) AS spent FROM orders GROUP BY customer_id)\nSELECT c.name, s.spent FROM spend s JOIN customers c ON c.id = s.customer_id\nORDER BY s.spent DESC LIMIT 5",
];

#[tokio::test]
async fn three_variations_are_parsed_and_validated_independently() {
    let raw = TOP_CUSTOMERS
        .iter()
        .map(|sql| fence_sql(sql))
        .collect::<Vec<_>>()
        .join(format!("\n{}\n", VARIATION_SEPARATOR).as_str());
    let provider = ScriptedProvider::new(vec![Step::Respond(raw)]);
    let schema = shop_schema();

    let result = orchestrator(provider.clone())
        .generate_multiple_queries("top 5 customers by spend", &schema, 3)
        .await
        .unwrap();

    let variations = result.variations.as_ref().unwrap();
    assert_eq!(variations.len(), 3);
    for (candidate, expected) in variations.iter().zip(TOP_CUSTOMERS) {
        assert_eq!(candidate.query, expected);
        assert_eq!(candidate.validation.statement(), expected);
        assert!(candidate.validation.is_valid(), "{:?}", candidate.validation);
    }
    assert_eq!(result.query, TOP_CUSTOMERS[0]);
    assert!(result.warnings.is_empty());
    assert_eq!(provider.calls(), 1);
    assert!(provider.prompts.lock().unwrap()[0].contains("Provide 3 distinct"));
}

#[tokio::test]
async fn three_plain_fenced_blocks_count_as_three_variations() {
    let raw = format!(
        "Option A:\n{}\n\nOption B:\n{}\n\nOption C:\n{}",
        fence_sql(TOP_CUSTOMERS[0]),
        fence_sql(TOP_CUSTOMERS[1]),
        fence_sql(TOP_CUSTOMERS[2])
    );
    let provider = ScriptedProvider::new(vec![Step::Respond(raw)]);
    let schema = shop_schema();

    let result = orchestrator(provider)
        .generate_multiple_queries("top 5 customers by spend", &schema, 3)
        .await
        .unwrap();
    assert_eq!(result.variations.unwrap().len(), 3);
}

#[tokio::test]
async fn each_variation_carries_its_own_verdict() {
    let raw = [
        fence_sql("SELECT id FROM orders"),
        fence_sql("DELETE FROM orders"),
    ]
    .join(format!("\n{}\n", VARIATION_SEPARATOR).as_str());
    let provider = ScriptedProvider::new(vec![Step::Respond(raw)]);
    let schema = shop_schema();

    let result = orchestrator(provider)
        .generate_multiple_queries("orders", &schema, 2)
        .await
        .unwrap();
    let variations = result.variations.unwrap();
    assert!(!variations[0].validation.is_destructive());
    assert!(variations[1].validation.is_destructive());
}

#[tokio::test]
async fn two_timeouts_then_success_uses_exactly_two_retries() {
    let provider = ScriptedProvider::new(vec![
        Step::Hang,
        Step::Hang,
        Step::Respond(fence_sql("SELECT id, name FROM customers")),
    ]);
    let schema = shop_schema();

    let result = orchestrator(provider.clone())
        .generate_query("list customers", &schema)
        .await
        .unwrap();

    assert_eq!(result.query, "SELECT id, name FROM customers");
    assert_eq!(result.attempts, 3);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn timeouts_beyond_budget_surface_as_provider_timeout() {
    let provider = ScriptedProvider::new(vec![Step::Hang, Step::Hang, Step::Hang, Step::Hang]);
    let schema = shop_schema();

    let err = orchestrator(provider.clone())
        .generate_query("list customers", &schema)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlBuddyError::ProviderTimeout(_)));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn rejected_request_is_not_retried() {
    let provider = ScriptedProvider::new(vec![Step::Fail(SqlBuddyError::ProviderRejected(
        "openai API error (401 Unauthorized)".to_string(),
    ))]);
    let schema = shop_schema();

    let err = orchestrator(provider.clone())
        .generate_query("list customers", &schema)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlBuddyError::ProviderRejected(_)));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn unparseable_response_is_not_retried() {
    let provider = ScriptedProvider::new(vec![
        Step::Respond("Sorry, I can't help with that.".to_string()),
        Step::Respond(fence_sql("SELECT 1")),
    ]);
    let schema = shop_schema();

    let err = orchestrator(provider.clone())
        .generate_query("list customers", &schema)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlBuddyError::Parse(_)));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn prompt_carries_schema_and_intent() {
    let provider = ScriptedProvider::new(vec![Step::Respond(fence_sql("SELECT 1"))]);
    let schema = shop_schema();

    orchestrator(provider.clone())
        .generate_query("how many orders per customer", &schema)
        .await
        .unwrap();

    let prompt = provider.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("how many orders per customer"));
    assert!(prompt.contains("customers(id int PK, name varchar(100) NOT NULL)"));
    assert!(prompt.contains("FK customer_id -> customers.id"));
}

#[tokio::test]
async fn unknown_table_is_a_warning_not_a_failure() {
    let provider = ScriptedProvider::new(vec![Step::Respond(fence_sql(
        "SELECT * FROM invoices WHERE paid = false",
    ))]);
    let schema = shop_schema();

    let result = orchestrator(provider)
        .generate_query("unpaid invoices", &schema)
        .await
        .unwrap();

    assert!(result.validation.is_valid());
    assert!(result
        .validation
        .warnings()
        .iter()
        .any(|w| w.contains("invoices")));
}

#[tokio::test]
async fn unparseable_variation_is_dropped_with_a_warning() {
    let raw = [
        fence_sql(TOP_CUSTOMERS[0]),
        "I could not come up with another approach.".to_string(),
        fence_sql(TOP_CUSTOMERS[2]),
    ]
    .join(format!("\n{}\n", VARIATION_SEPARATOR).as_str());
    let provider = ScriptedProvider::new(vec![Step::Respond(raw)]);
    let schema = shop_schema();

    let result = orchestrator(provider.clone())
        .generate_multiple_queries("top 5 customers by spend", &schema, 3)
        .await
        .unwrap();

    let variations = result.variations.as_ref().unwrap();
    assert_eq!(variations.len(), 2);
    assert_eq!(variations[0].query, TOP_CUSTOMERS[0]);
    assert_eq!(variations[1].query, TOP_CUSTOMERS[2]);
    assert!(result.warnings.iter().any(|w| w.starts_with("Variation 2 skipped")));
    assert!(result.warnings.iter().any(|w| w.contains("2 of 3")));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn optimize_without_sql_in_reply_is_a_parse_error() {
    let provider = ScriptedProvider::new(vec![Step::Respond(
        "The query is already optimal, no changes needed.".to_string(),
    )]);
    let schema = shop_schema();

    let err = orchestrator(provider.clone())
        .optimize_query("SELECT id FROM orders WHERE customer_id = 7", &schema)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlBuddyError::Parse(_)), "{:?}", err);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn explain_with_empty_reply_is_a_parse_error() {
    let provider = ScriptedProvider::new(vec![Step::Respond("  \n ".to_string())]);
    let schema = shop_schema();

    let err = orchestrator(provider.clone())
        .explain_query("SELECT id FROM orders", &schema)
        .await
        .unwrap_err();

    assert!(matches!(err, SqlBuddyError::Parse(_)), "{:?}", err);
    assert_eq!(provider.calls(), 1);
}
