//! `SqlBuddy` session: schema cache, generation, gating and execution in one place.

use crate::audit::{AuditDecision, AuditEntry, AuditLog};
use crate::config::{DatabaseConfig, DatabaseKind, GeneratorSettings, ProviderConfig};
use crate::db::{ExecutionOutcome, QueryExecutor, SchemaSource, SqlxDatabase};
use crate::error::{Result, SqlBuddyError};
use crate::gate::ExecutionGate;
use crate::orchestrator::{GenerationOrchestrator, GenerationResult};
use crate::provider::build_provider;
use crate::schema::{SchemaSnapshot, SchemaSummary, TableInfo};
use crate::validator::{SafetyValidator, ValidationVerdict};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SqlBuddy {
    orchestrator: GenerationOrchestrator,
    schema_source: Arc<dyn SchemaSource>,
    executor: Arc<dyn QueryExecutor>,
    audit: AuditLog,
    schema: Mutex<Option<Arc<SchemaSnapshot>>>,
}

impl SqlBuddy {
    pub fn new(
        orchestrator: GenerationOrchestrator,
        schema_source: Arc<dyn SchemaSource>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            orchestrator,
            schema_source,
            executor,
            audit: AuditLog::default(),
            schema: Mutex::new(None),
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Connect to the database and set up the configured provider.
    pub async fn connect(
        database: &DatabaseConfig,
        provider: ProviderConfig,
        settings: GeneratorSettings,
    ) -> Result<Self> {
        let db = Arc::new(SqlxDatabase::connect(database).await?);
        let provider = build_provider(provider)?;
        let kind: DatabaseKind = db.kind();

        let orchestrator = GenerationOrchestrator::new(provider, settings)
            .with_dialect(kind)
            .with_validator(SafetyValidator::new().with_grammar_check(kind));
        info!(provider = %orchestrator.provider_description(), "Session ready");

        Ok(Self::new(orchestrator, db.clone(), db))
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn provider_description(&self) -> String {
        self.orchestrator.provider_description()
    }

    /// Cached schema snapshot, fetched on first use or when `force` is set.
    pub async fn load_schema(&self, force: bool) -> Result<Arc<SchemaSnapshot>> {
        let mut cached = self.schema.lock().await;
        if let Some(schema) = cached.as_ref() {
            if !force {
                return Ok(schema.clone());
            }
        }

        let schema = Arc::new(self.schema_source.fetch_schema().await?);
        info!(tables = schema.tables().len(), "Schema loaded");
        *cached = Some(schema.clone());
        Ok(schema)
    }

    pub async fn schema_summary(&self) -> Result<SchemaSummary> {
        Ok(self.load_schema(false).await?.summary())
    }

    pub async fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.load_schema(false)
            .await?
            .table(table)
            .cloned()
            .ok_or_else(|| SqlBuddyError::Schema(format!("Table '{}' not found", table)))
    }

    pub async fn generate_query(&self, description: &str) -> Result<GenerationResult> {
        let schema = self.load_schema(false).await?;
        self.orchestrator.generate_query(description, &schema).await
    }

    pub async fn generate_multiple_queries(
        &self,
        description: &str,
        num_variations: usize,
    ) -> Result<GenerationResult> {
        let schema = self.load_schema(false).await?;
        self.orchestrator
            .generate_multiple_queries(description, &schema, num_variations)
            .await
    }

    pub async fn explain_query(&self, sql: &str) -> Result<GenerationResult> {
        let schema = self.load_schema(false).await?;
        self.orchestrator.explain_query(sql, &schema).await
    }

    pub async fn optimize_query(&self, sql: &str) -> Result<GenerationResult> {
        let schema = self.load_schema(false).await?;
        self.orchestrator.optimize_query(sql, &schema).await
    }

    /// Validate caller-supplied SQL against the cached schema.
    pub async fn validate(&self, sql: &str) -> Result<ValidationVerdict> {
        let schema = self.load_schema(false).await?;
        Ok(self.orchestrator.validator().validate(sql, Some(&schema)))
    }

    /// Validate, gate and execute caller-supplied SQL.
    pub async fn execute_query(&self, sql: &str, allow_destructive: bool) -> Result<ExecutionOutcome> {
        let verdict = self.validate(sql).await?;
        self.execute_verdict(&verdict, allow_destructive, None).await
    }

    /// Gate and execute candidate `index` of a generation result, using that candidate's
    /// own verdict.
    pub async fn execute_candidate(
        &self,
        result: &GenerationResult,
        index: usize,
        allow_destructive: bool,
    ) -> Result<ExecutionOutcome> {
        let candidates = result.candidates();
        let (_, verdict) = candidates.get(index).ok_or_else(|| {
            SqlBuddyError::Config(format!(
                "Candidate {} does not exist ({} available)",
                index + 1,
                candidates.len()
            ))
        })?;
        self.execute_verdict(verdict, allow_destructive, Some(result.request_id))
            .await
    }

    /// Generate a single query and execute it if the gate allows.
    pub async fn generate_and_execute(
        &self,
        description: &str,
        allow_destructive: bool,
    ) -> Result<(GenerationResult, ExecutionOutcome)> {
        let result = self.generate_query(description).await?;
        let outcome = self.execute_candidate(&result, 0, allow_destructive).await?;
        Ok((result, outcome))
    }

    pub async fn test_connection(&self) -> Result<String> {
        self.executor.test_connection().await
    }

    async fn execute_verdict(
        &self,
        verdict: &ValidationVerdict,
        allow_destructive: bool,
        request_id: Option<Uuid>,
    ) -> Result<ExecutionOutcome> {
        let decision = match ExecutionGate::authorize(verdict, allow_destructive) {
            Ok(decision) => decision,
            Err(err) => {
                self.audit.record(
                    AuditEntry::for_decision(verdict, allow_destructive, AuditDecision::Rejected)
                        .with_request_id(request_id)
                        .with_error(err.to_string()),
                );
                return Err(err);
            }
        };

        let audit_decision = if decision.statement.is_destructive() {
            AuditDecision::AuthorizedDestructive
        } else {
            AuditDecision::Authorized
        };
        let entry = AuditEntry::for_decision(verdict, allow_destructive, audit_decision)
            .with_request_id(request_id);

        let started = Instant::now();
        match self.executor.execute(&decision.statement).await {
            Ok(outcome) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.audit
                    .record(entry.with_outcome(outcome.row_count, elapsed));
                Ok(outcome)
            }
            Err(err) => {
                warn!("Execution failed: {}", err);
                self.audit.record(entry.with_error(err.to_string()));
                Err(err)
            }
        }
    }
}
