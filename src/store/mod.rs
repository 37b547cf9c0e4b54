//! Rule persistence.
//!
//! Every engine implements [`RuleStore`] with the same observable contract:
//! `create` compiles before persisting and stores nothing on rejection, and
//! `read` returns the applicable rules ordered by creation time, each with
//! its program decoded.

mod applicability;
mod memory;
#[cfg(feature = "mongo")]
mod mongo;
#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;
use tracing::warn;

pub use applicability::{Applicability, Condition, EntitySet};
pub use memory::MemoryRuleStore;
#[cfg(feature = "mongo")]
pub use mongo::MongoRuleStore;
#[cfg(feature = "postgres")]
pub use postgres::PgRuleStore;

use crate::compile::Compiler;
use crate::error::Result;
use crate::types::{ExecutableRule, NewRule, RuleId, RuleRecord};

/// Durable storage of rules with per-user applicability lookup.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Compile the definition and persist the rule.
    ///
    /// Fails with [`RulesError::Compile`](crate::RulesError::Compile) without
    /// touching storage if the definition is rejected.
    async fn create(&self, rule: NewRule) -> Result<RuleId>;

    /// Active rules of `user_id` that apply to `entity_id`, oldest first.
    ///
    /// Fails as a whole if any matching rule's payload cannot be decoded.
    async fn read(&self, user_id: &str, entity_id: &str) -> Result<Vec<ExecutableRule>>;

    /// Full record by id. Ids this engine could not have issued yield `None`.
    async fn get(&self, id: &RuleId) -> Result<Option<RuleRecord>>;

    /// Activate or deactivate a rule. Returns `false` if no such rule exists.
    async fn set_active(&self, id: &RuleId, active: bool) -> Result<bool>;
}

#[cfg(any(feature = "postgres", feature = "mongo"))]
pub(crate) const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[cfg(any(feature = "postgres", feature = "mongo"))]
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    after: std::time::Duration,
    fut: F,
) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?after, "store operation timed out");
            Err(crate::error::PersistenceError::Timeout { operation, after }.into())
        }
    }
}

pub(crate) fn compile_new(compiler: &Compiler, rule: &NewRule) -> Result<Vec<u8>> {
    compiler.compile(&rule.definition).inspect_err(|e| {
        warn!(
            user_id = %rule.user_id,
            name = %rule.name,
            error = %e,
            "rejected rule definition"
        );
    })
}

pub(crate) fn decode(id: RuleId, name: String, compiled: &[u8]) -> Result<ExecutableRule> {
    ExecutableRule::decode(id, name, compiled)
        .inspect_err(|e| warn!(error = %e, "stored rule failed to decode"))
}
