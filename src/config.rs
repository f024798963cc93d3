//! Configuration for database connections, LLM providers and generation settings.
//!
//! Values come from the environment (after `.env` is loaded by the binary) and can be
//! overridden field by field by the CLI.

use crate::error::{Result, SqlBuddyError};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    MySql,
    Postgres,
}

impl DatabaseKind {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::MySql => 3306,
            DatabaseKind::Postgres => 5432,
        }
    }

    /// Name used in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseKind::MySql => "MySQL",
            DatabaseKind::Postgres => "PostgreSQL",
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = SqlBuddyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseKind::Postgres),
            other => Err(SqlBuddyError::Config(format!(
                "Unsupported database type: {}. Supported: mysql, postgresql",
                other
            ))),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Connection parameters for the target database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
}

impl DatabaseConfig {
    pub fn new(kind: DatabaseKind, host: &str, user: &str, password: &str, database: &str) -> Self {
        Self {
            kind,
            host: host.to_string(),
            port: kind.default_port(),
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        }
    }

    /// Read `SQLBUDDY_DB_*` variables, falling back to localhost defaults.
    pub fn from_env() -> Result<Self> {
        let kind = match env::var("SQLBUDDY_DB_TYPE") {
            Ok(value) => value.parse()?,
            Err(_) => DatabaseKind::MySql,
        };
        let port = match env::var("SQLBUDDY_DB_PORT") {
            Ok(value) => value.parse::<u16>().map_err(|e| {
                SqlBuddyError::Config(format!("Invalid SQLBUDDY_DB_PORT '{}': {}", value, e))
            })?,
            Err(_) => kind.default_port(),
        };

        Ok(Self {
            kind,
            host: env::var("SQLBUDDY_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port,
            user: env::var("SQLBUDDY_DB_USER").unwrap_or_default(),
            password: env::var("SQLBUDDY_DB_PASSWORD").unwrap_or_default(),
            database: env::var("SQLBUDDY_DB_NAME").unwrap_or_default(),
        })
    }
}

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Claude,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4-turbo-preview",
            ProviderKind::Claude => "claude-3-5-sonnet-20241022",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Claude => "https://api.anthropic.com",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = SqlBuddyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            other => Err(SqlBuddyError::Config(format!(
                "Unsupported provider: {}. Supported providers: openai, claude",
                other
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// LLM provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            model: kind.default_model().to_string(),
            base_url: kind.default_base_url().to_string(),
            temperature: 0.1,
            max_tokens: 2000,
        }
    }

    /// Build a config for `kind`, taking the key from `api_key` or the provider's
    /// environment variable.
    pub fn resolve(kind: ProviderKind, api_key: Option<String>) -> Result<Self> {
        let key = match api_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => key,
            None => env::var(kind.api_key_var()).map_err(|_| {
                SqlBuddyError::Config(format!(
                    "{} API key not found. Set {} environment variable or pass --api-key.",
                    kind,
                    kind.api_key_var()
                ))
            })?,
        };
        Ok(Self::new(kind, key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Orchestration settings: provider timeout and retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl GeneratorSettings {
    /// Read `SQLBUDDY_LLM_TIMEOUT_SECS` and `SQLBUDDY_LLM_MAX_RETRIES` on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Ok(value) = env::var("SQLBUDDY_LLM_TIMEOUT_SECS") {
            let secs = value.parse::<u64>().map_err(|e| {
                SqlBuddyError::Config(format!("Invalid SQLBUDDY_LLM_TIMEOUT_SECS '{}': {}", value, e))
            })?;
            settings.timeout = Duration::from_secs(secs);
        }
        if let Ok(value) = env::var("SQLBUDDY_LLM_MAX_RETRIES") {
            settings.retry.max_retries = value.parse::<u32>().map_err(|e| {
                SqlBuddyError::Config(format!("Invalid SQLBUDDY_LLM_MAX_RETRIES '{}': {}", value, e))
            })?;
        }
        Ok(settings)
    }
}
