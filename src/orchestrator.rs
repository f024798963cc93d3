//! Generation pipeline: prompt -> provider -> parse -> validate.
//!
//! Every SQL text returned in a [`GenerationResult`] carries the verdict computed for it.

use crate::config::{DatabaseKind, GeneratorSettings};
use crate::error::{Result, SqlBuddyError};
use crate::parser::{ParsedOutput, ResponseParser};
use crate::prompt::{GenerationMode, GenerationRequest, PromptBuilder};
use crate::provider::LlmProvider;
use crate::schema::SchemaSnapshot;
use crate::validator::{SafetyValidator, ValidationVerdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One validated SQL candidate
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub query: String,
    pub validation: ValidationVerdict,
    pub explanation: Option<String>,
    pub tables_used: Vec<String>,
}

/// Both sides of an optimization, so callers can compare risk
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationDetails {
    pub original_query: String,
    pub original_validation: ValidationVerdict,
    /// Optimizations / performance notes returned by the provider
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub mode: GenerationMode,
    pub query: String,
    pub validation: ValidationVerdict,
    pub raw_provider_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<Candidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationDetails>,
    pub explanation: Option<String>,
    pub tables_used: Vec<String>,
    /// Parser warnings (skipped or missing variations)
    pub warnings: Vec<String>,
    /// Provider calls made, including the successful one
    pub attempts: u32,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    /// Every candidate with its verdict; a single-query result yields one entry.
    pub fn candidates(&self) -> Vec<(&str, &ValidationVerdict)> {
        match &self.variations {
            Some(variations) => variations
                .iter()
                .map(|c| (c.query.as_str(), &c.validation))
                .collect(),
            None => vec![(self.query.as_str(), &self.validation)],
        }
    }
}

pub struct GenerationOrchestrator {
    provider: Arc<dyn LlmProvider>,
    prompt_builder: PromptBuilder,
    parser: ResponseParser,
    validator: SafetyValidator,
    settings: GeneratorSettings,
    dialect: DatabaseKind,
}

impl GenerationOrchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: GeneratorSettings) -> Self {
        Self {
            provider,
            prompt_builder: PromptBuilder::new(),
            parser: ResponseParser::new(),
            validator: SafetyValidator::new(),
            settings,
            dialect: DatabaseKind::MySql,
        }
    }

    /// Dialect named in prompts built by the convenience methods
    pub fn with_dialect(mut self, dialect: DatabaseKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_validator(mut self, validator: SafetyValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn provider_description(&self) -> String {
        self.provider.describe()
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    pub async fn generate_query(
        &self,
        description: &str,
        schema: &SchemaSnapshot,
    ) -> Result<GenerationResult> {
        let request = GenerationRequest::generate(description, schema).with_dialect(self.dialect);
        self.generate(&request).await
    }

    pub async fn generate_multiple_queries(
        &self,
        description: &str,
        schema: &SchemaSnapshot,
        num_variations: usize,
    ) -> Result<GenerationResult> {
        let request = GenerationRequest::variations(description, num_variations, schema)
            .with_dialect(self.dialect);
        self.generate(&request).await
    }

    pub async fn explain_query(&self, sql: &str, schema: &SchemaSnapshot) -> Result<GenerationResult> {
        let request = GenerationRequest::explain(sql, schema).with_dialect(self.dialect);
        self.generate(&request).await
    }

    pub async fn optimize_query(&self, sql: &str, schema: &SchemaSnapshot) -> Result<GenerationResult> {
        let request = GenerationRequest::optimize(sql, schema).with_dialect(self.dialect);
        self.generate(&request).await
    }

    /// Run one request/response cycle.
    ///
    /// Transient provider failures and timeouts are retried up to the configured budget.
    /// Parse failures are not retried.
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Result<GenerationResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id, mode = ?request.mode);
        self.run(request_id, request).instrument(span).await
    }

    async fn run(&self, request_id: Uuid, request: &GenerationRequest<'_>) -> Result<GenerationResult> {
        request.check()?;

        let prompt = self.prompt_builder.build(request);
        debug!(prompt_chars = prompt.len(), provider = %self.provider.describe(), "Prompt built");

        let provider = &self.provider;
        let prompt = prompt.as_str();
        let attempted = self
            .settings
            .retry
            .run(self.settings.timeout, move || provider.send(prompt))
            .await?;
        let raw = attempted.value;
        info!(attempts = attempted.attempts, response_chars = raw.len(), "Provider responded");

        let parsed = self
            .parser
            .parse(&raw, request.mode, request.variation_count)?;
        let schema = Some(request.schema);

        let mut variations = None;
        let mut optimization = None;
        let mut warnings = Vec::new();

        let primary = match parsed {
            ParsedOutput::Single(query) => {
                if request.mode == GenerationMode::Optimize {
                    optimization = Some(OptimizationDetails {
                        original_query: request.intent.clone(),
                        original_validation: self.validator.validate(&request.intent, schema),
                        details: query.optimizations.clone(),
                    });
                }
                Candidate {
                    validation: self.validator.validate(&query.sql, schema),
                    query: query.sql,
                    explanation: query.explanation,
                    tables_used: query.tables_used,
                }
            }
            ParsedOutput::Variations {
                candidates,
                warnings: parse_warnings,
            } => {
                let candidates: Vec<Candidate> = candidates
                    .into_iter()
                    .map(|c| Candidate {
                        validation: self.validator.validate(&c.sql, schema),
                        query: c.sql,
                        explanation: c.explanation,
                        tables_used: c.tables_used,
                    })
                    .collect();
                warnings = parse_warnings;
                let first = candidates.first().cloned().ok_or_else(|| {
                    SqlBuddyError::Parse("Provider response contained no variations".to_string())
                })?;
                variations = Some(candidates);
                first
            }
            ParsedOutput::Analysis(text) => Candidate {
                query: request.intent.clone(),
                validation: self.validator.validate(&request.intent, schema),
                explanation: Some(text),
                tables_used: Vec::new(),
            },
        };

        for warning in &warnings {
            warn!("{}", warning);
        }

        let result = GenerationResult {
            request_id,
            mode: request.mode,
            query: primary.query,
            validation: primary.validation,
            raw_provider_response: raw,
            variations,
            optimization,
            explanation: primary.explanation,
            tables_used: primary.tables_used,
            warnings,
            attempts: attempted.attempts,
            generated_at: Utc::now(),
        };

        for (query, verdict) in result.candidates() {
            debug!(
                valid = verdict.is_valid(),
                destructive = verdict.is_destructive(),
                warnings = verdict.warnings().len(),
                "Validated: {}",
                query
            );
        }

        Ok(result)
    }
}
