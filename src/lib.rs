pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod session;
pub mod validator;

pub use config::{DatabaseConfig, DatabaseKind, GeneratorSettings, ProviderConfig, ProviderKind};
pub use error::{Result, SqlBuddyError};
pub use gate::{AuthorizationDecision, AuthorizedStatement, ExecutionGate};
pub use orchestrator::{GenerationOrchestrator, GenerationResult};
pub use prompt::{GenerationMode, GenerationRequest};
pub use schema::SchemaSnapshot;
pub use session::SqlBuddy;
pub use validator::{SafetyValidator, ValidationVerdict};
