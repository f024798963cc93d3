//! Execution gate
//!
//! The only place an [`AuthorizedStatement`] can be created. Executors accept nothing else,
//! so LLM-derived text cannot reach the database without passing through here.

use crate::error::{Result, SqlBuddyError};
use crate::validator::ValidationVerdict;
use serde::Serialize;
use tracing::{info, warn};

/// SQL text that passed the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedStatement {
    sql: String,
    destructive: bool,
}

impl AuthorizedStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the statement was let through under `allow_destructive`
    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

/// Outcome of a successful authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub statement: AuthorizedStatement,
    /// Warnings the caller accepted by proceeding
    pub accepted_warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionGate;

impl ExecutionGate {
    /// Authorize the statement behind `verdict`.
    ///
    /// Invalid verdicts are always rejected. Destructive verdicts are rejected unless
    /// `allow_destructive` is set.
    pub fn authorize(
        verdict: &ValidationVerdict,
        allow_destructive: bool,
    ) -> Result<AuthorizationDecision> {
        if !verdict.is_valid() {
            warn!(errors = ?verdict.errors(), "Gate rejected invalid statement");
            return Err(SqlBuddyError::UnsafeQuery(format!(
                "Query failed validation: {}",
                verdict.errors().join("; ")
            )));
        }

        if verdict.is_destructive() && !allow_destructive {
            warn!(reasons = ?verdict.destructive_reasons(), "Gate rejected destructive statement");
            return Err(SqlBuddyError::UnsafeQuery(format!(
                "Destructive query requires explicit permission (allow_destructive): {}",
                verdict.destructive_reasons().join("; ")
            )));
        }

        if verdict.is_destructive() {
            warn!("Destructive statement authorized by caller override");
        } else {
            info!("Statement authorized");
        }

        Ok(AuthorizationDecision {
            statement: AuthorizedStatement {
                sql: verdict.statement().to_string(),
                destructive: verdict.is_destructive(),
            },
            accepted_warnings: verdict.warnings().to_vec(),
        })
    }
}
