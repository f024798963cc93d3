//! Prompt construction
//!
//! Prompts are provider-agnostic plain text and fully determined by the request: the same
//! request always yields the same prompt, which keeps mocked-provider tests stable.

use crate::config::DatabaseKind;
use crate::error::{Result, SqlBuddyError};
use crate::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};

/// Line placed between candidates in `variations` mode
pub const VARIATION_SEPARATOR: &str = "<<<VARIATION>>>";

/// Wrap SQL in the fenced block the model is asked to answer with.
///
/// `ResponseParser` returns exactly `sql` for any text produced here, as long as `sql` does
/// not itself contain a triple backtick.
pub fn fence_sql(sql: &str) -> String {
    format!("```sql\n{}\n```", sql)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Natural language -> one SQL statement
    Generate,
    /// Existing SQL -> optimized SQL
    Optimize,
    /// Existing SQL -> analysis text
    Explain,
    /// Natural language -> N alternative statements
    Variations,
}

impl GenerationMode {
    /// Whether the provider response must contain SQL
    pub fn produces_sql(&self) -> bool {
        !matches!(self, GenerationMode::Explain)
    }
}

/// One orchestration request. `intent` is the natural-language description for
/// `Generate`/`Variations` and the SQL under analysis for `Optimize`/`Explain`.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub intent: String,
    pub mode: GenerationMode,
    pub variation_count: usize,
    pub schema: &'a SchemaSnapshot,
    pub dialect: DatabaseKind,
    pub additional_context: Option<String>,
}

impl<'a> GenerationRequest<'a> {
    fn new(intent: impl Into<String>, mode: GenerationMode, schema: &'a SchemaSnapshot) -> Self {
        Self {
            intent: intent.into(),
            mode,
            variation_count: 1,
            schema,
            dialect: DatabaseKind::MySql,
            additional_context: None,
        }
    }

    pub fn generate(description: impl Into<String>, schema: &'a SchemaSnapshot) -> Self {
        Self::new(description, GenerationMode::Generate, schema)
    }

    pub fn variations(
        description: impl Into<String>,
        count: usize,
        schema: &'a SchemaSnapshot,
    ) -> Self {
        let mut request = Self::new(description, GenerationMode::Variations, schema);
        request.variation_count = count;
        request
    }

    pub fn optimize(sql: impl Into<String>, schema: &'a SchemaSnapshot) -> Self {
        Self::new(sql, GenerationMode::Optimize, schema)
    }

    pub fn explain(sql: impl Into<String>, schema: &'a SchemaSnapshot) -> Self {
        Self::new(sql, GenerationMode::Explain, schema)
    }

    pub fn with_dialect(mut self, dialect: DatabaseKind) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }

    /// Reject requests no prompt can be built for
    pub fn check(&self) -> Result<()> {
        if self.intent.trim().is_empty() {
            return Err(SqlBuddyError::Config("Request text is empty".to_string()));
        }
        if self.mode == GenerationMode::Variations && self.variation_count == 0 {
            return Err(SqlBuddyError::Config(
                "variation_count must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, request: &GenerationRequest<'_>) -> String {
        let mut parts: Vec<String> = Vec::new();
        let dialect = request.dialect.display_name().to_uppercase();

        match request.mode {
            GenerationMode::Generate | GenerationMode::Variations => {
                parts.push(format!(
                    "You are an expert SQL query generator for {} databases.",
                    dialect
                ));
                parts.push(String::new());
                parts.push(
                    "Your task is to generate a SQL query based on the user's natural language description."
                        .to_string(),
                );
                parts.push(String::new());
                parts.push("IMPORTANT RULES:".to_string());
                parts.push(format!(
                    "1. Generate ONLY valid SQL queries for {}",
                    request.dialect.display_name()
                ));
                parts.push("2. Use ONLY tables and columns that exist in the provided schema".to_string());
                parts.push("3. Include appropriate JOINs when querying multiple tables".to_string());
                parts.push("4. Use proper WHERE clauses for filtering".to_string());
                parts.push("5. Add ORDER BY, LIMIT, or GROUP BY when relevant".to_string());
                parts.push(
                    "6. Never include destructive operations (DROP, TRUNCATE, ALTER, unfiltered DELETE/UPDATE) unless explicitly requested"
                        .to_string(),
                );
                parts.push(
                    "7. If the request is ambiguous, make reasonable assumptions based on the schema"
                        .to_string(),
                );
                parts.push(String::new());
            }
            GenerationMode::Optimize => {
                parts.push(format!(
                    "You are an expert SQL performance optimizer for {} databases.",
                    dialect
                ));
                parts.push(String::new());
                parts.push("Analyze the following SQL query and provide an optimized version.".to_string());
                parts.push(String::new());
                parts.push("Consider:".to_string());
                for item in [
                    "Index usage",
                    "JOIN optimization",
                    "Subquery optimization",
                    "Proper use of WHERE clauses",
                    "Avoiding SELECT *",
                ] {
                    parts.push(format!("- {}", item));
                }
                parts.push(
                    "The optimized query must return the same result as the original.".to_string(),
                );
                parts.push(String::new());
            }
            GenerationMode::Explain => {
                parts.push(format!(
                    "You are an expert SQL analyst for {} databases.",
                    dialect
                ));
                parts.push(String::new());
                parts.push("Analyze the following SQL query and provide:".to_string());
                parts.push("1. A clear explanation of what the query does".to_string());
                parts.push("2. Performance analysis".to_string());
                parts.push("3. Potential issues or improvements".to_string());
                parts.push("4. Tables and columns used".to_string());
                parts.push(String::new());
            }
        }

        parts.extend(schema_section(request.schema));

        if let Some(context) = &request.additional_context {
            parts.push("ADDITIONAL CONTEXT:".to_string());
            parts.push(context.clone());
            parts.push(String::new());
        }

        match request.mode {
            GenerationMode::Generate => {
                parts.push("USER REQUEST:".to_string());
                parts.push(request.intent.clone());
                parts.push(String::new());
                parts.extend(answer_format());
            }
            GenerationMode::Variations => {
                parts.push("USER REQUEST:".to_string());
                parts.push(request.intent.clone());
                parts.push(String::new());
                parts.push(format!(
                    "Provide {} distinct, semantically equivalent SQL queries that answer the request using different approaches (for example joins vs subqueries, window functions, CTEs).",
                    request.variation_count
                ));
                parts.push(format!(
                    "Separate consecutive variations with a line containing only {}.",
                    VARIATION_SEPARATOR
                ));
                parts.push("Each variation must follow this format:".to_string());
                parts.push(String::new());
                parts.extend(answer_format());
            }
            GenerationMode::Optimize => {
                parts.push("ORIGINAL QUERY:".to_string());
                parts.push(fence_sql(&request.intent));
                parts.push(String::new());
                parts.push("Provide:".to_string());
                parts.push("1. OPTIMIZED QUERY:".to_string());
                parts.push("```sql".to_string());
                parts.push("[Optimized SQL query here]".to_string());
                parts.push("```".to_string());
                parts.push("2. EXPLANATION: the optimizations made".to_string());
                parts.push("3. PERFORMANCE IMPACT: estimated effect of each change".to_string());
                parts.push(String::new());
                parts.push(fence_instruction());
            }
            GenerationMode::Explain => {
                parts.push("SQL QUERY TO ANALYZE:".to_string());
                parts.push(fence_sql(&request.intent));
                parts.push(String::new());
                parts.push(
                    "Provide your analysis as structured text with the headings SUMMARY, PERFORMANCE, ISSUES and TABLES AND COLUMNS. Do not rewrite the query."
                        .to_string(),
                );
            }
        }

        parts.join("\n")
    }
}

fn schema_section(schema: &SchemaSnapshot) -> Vec<String> {
    let rule = "=".repeat(80);
    let listing = if schema.is_empty() {
        "(no schema available)".to_string()
    } else {
        schema.render_compact().trim_end().to_string()
    };
    vec![
        "DATABASE SCHEMA:".to_string(),
        rule.clone(),
        listing,
        rule,
        String::new(),
    ]
}

fn answer_format() -> Vec<String> {
    vec![
        "SQL QUERY:".to_string(),
        "```sql".to_string(),
        "[Your SQL query here]".to_string(),
        "```".to_string(),
        String::new(),
        "EXPLANATION:".to_string(),
        "[Brief explanation of what the query does and any assumptions made]".to_string(),
        String::new(),
        "TABLES USED:".to_string(),
        "[List of tables used in the query]".to_string(),
        String::new(),
        "POTENTIAL OPTIMIZATIONS:".to_string(),
        "[Optional suggestions for query optimization if applicable]".to_string(),
        String::new(),
        fence_instruction(),
    ]
}

fn fence_instruction() -> String {
    "Put ONLY SQL inside the ```sql fenced code block; never put prose inside it.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableInfo};

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![TableInfo::new("users")
            .with_column(ColumnInfo::new("id", "int").primary_key())
            .with_column(ColumnInfo::new("email", "varchar(255)"))])
        .unwrap()
    }

    #[test]
    fn test_generate_prompt_contents() {
        let schema = schema();
        let request = GenerationRequest::generate("Get all users", &schema);
        let prompt = PromptBuilder::new().build(&request);

        assert!(prompt.contains("MYSQL"));
        assert!(prompt.contains("USER REQUEST:\nGet all users"));
        assert!(prompt.contains("users(id int PK, email varchar(255))"));
        assert!(prompt.contains("```sql"));
        assert!(prompt.contains("TABLES USED:"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let schema = schema();
        let request = GenerationRequest::variations("top customers", 3, &schema)
            .with_dialect(DatabaseKind::Postgres)
            .with_context("Only active users");
        let builder = PromptBuilder::new();
        assert_eq!(builder.build(&request), builder.build(&request.clone()));
    }

    #[test]
    fn test_variations_prompt_mentions_count_and_separator() {
        let schema = schema();
        let request = GenerationRequest::variations("top customers", 3, &schema)
            .with_dialect(DatabaseKind::Postgres);
        let prompt = PromptBuilder::new().build(&request);

        assert!(prompt.contains("POSTGRESQL"));
        assert!(prompt.contains("Provide 3 distinct"));
        assert!(prompt.contains(VARIATION_SEPARATOR));
    }

    #[test]
    fn test_explain_prompt_embeds_fenced_query() {
        let schema = schema();
        let request = GenerationRequest::explain("SELECT * FROM users", &schema);
        let prompt = PromptBuilder::new().build(&request);

        assert!(prompt.contains(&fence_sql("SELECT * FROM users")));
        assert!(prompt.contains("structured text"));
        assert!(!prompt.contains("USER REQUEST:"));
    }

    #[test]
    fn test_optimize_prompt() {
        let schema = schema();
        let request = GenerationRequest::optimize("SELECT * FROM users", &schema);
        let prompt = PromptBuilder::new().build(&request);

        assert!(prompt.contains("ORIGINAL QUERY:"));
        assert!(prompt.contains("OPTIMIZED QUERY:"));
        assert!(prompt.contains("performance optimizer"));
    }

    #[test]
    fn test_additional_context_included() {
        let schema = schema();
        let request = GenerationRequest::generate("count users", &schema).with_context("Exclude test accounts");
        let prompt = PromptBuilder::new().build(&request);
        assert!(prompt.contains("ADDITIONAL CONTEXT:\nExclude test accounts"));
    }

    #[test]
    fn test_empty_schema_placeholder() {
        let schema = SchemaSnapshot::empty();
        let prompt = PromptBuilder::new().build(&GenerationRequest::generate("anything", &schema));
        assert!(prompt.contains("(no schema available)"));
    }

    #[test]
    fn test_request_check() {
        let schema = schema();
        assert!(GenerationRequest::variations("x", 0, &schema).check().is_err());
        assert!(GenerationRequest::generate("  ", &schema).check().is_err());
        assert!(GenerationRequest::variations("x", 2, &schema).check().is_ok());
    }
}
