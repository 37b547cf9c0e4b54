use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::EvalError;
use super::program::Program;
use super::schema::Txn;
use crate::error::RulesError;

/// Store-assigned rule identifier. Opaque to callers; its format depends on
/// the engine that assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A request to create a rule.
///
/// # Example
///
/// ```
/// use txn_rules::NewRule;
///
/// let rule = NewRule::new("large", "12345", "txn.Amount >= 1000000.0")
///     .include(["abc"])
///     .exclude(["cde"]);
/// assert!(rule.is_active);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub user_id: String,
    pub definition: String,
    pub is_active: bool,
    pub included: Vec<String>,
    pub excluded: Vec<String>,
}

impl NewRule {
    /// An active rule with no inclusion or exclusion restriction.
    pub fn new(
        name: impl Into<String>,
        user_id: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            user_id: user_id.into(),
            definition: definition.into(),
            is_active: true,
            included: Vec::new(),
            excluded: Vec::new(),
        }
    }

    #[must_use]
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub fn include<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included.extend(entities.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(entities.into_iter().map(Into::into));
        self
    }
}

/// The durable form of a rule, as persisted by every store.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRecord {
    pub id: RuleId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub user_id: String,
    pub definition: String,
    /// Opaque payload produced by [`Compiler::compile`](crate::Compiler::compile).
    pub compiled: Vec<u8>,
    pub is_active: bool,
    pub included_entities: Vec<String>,
    pub excluded_entities: Vec<String>,
}

impl RuleRecord {
    /// Decode the stored payload into an executable rule.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Deserialize`] if the payload is corrupt or was
    /// produced for another schema version.
    pub fn to_executable(&self) -> Result<ExecutableRule, RulesError> {
        ExecutableRule::decode(self.id.clone(), self.name.clone(), &self.compiled)
    }
}

/// The read-path projection of a rule: identity plus a decoded program.
/// Identical in shape regardless of the store that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableRule {
    pub id: RuleId,
    pub name: String,
    pub program: Program,
}

impl ExecutableRule {
    /// Decode a compiled payload read from storage.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Deserialize`] naming the offending rule.
    pub fn decode(id: RuleId, name: String, compiled: &[u8]) -> Result<Self, RulesError> {
        match Program::from_bytes(compiled) {
            Ok(program) => Ok(Self { id, name, program }),
            Err(source) => Err(RulesError::Deserialize {
                rule_id: id,
                source,
            }),
        }
    }

    /// Evaluate this rule's program against a transaction.
    ///
    /// # Errors
    ///
    /// See [`Program::evaluate`].
    pub fn evaluate(&self, txn: &Txn) -> Result<bool, EvalError> {
        self.program.evaluate(txn)
    }
}
