use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{Applicability, RuleStore, compile_new, decode};
use crate::compile::Compiler;
use crate::error::Result;
use crate::types::{ExecutableRule, NewRule, RuleId, RuleRecord};

/// In-process rule store backed by a concurrent map.
///
/// Cloning is cheap and clones share the same rules. Useful for tests and for
/// callers that load rules once and serve reads from memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    compiler: Compiler,
    rules: Arc<DashMap<RuleId, RuleRecord>>,
}

impl MemoryRuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    #[instrument(skip(self, rule), fields(user_id = %rule.user_id, name = %rule.name))]
    async fn create(&self, rule: NewRule) -> Result<RuleId> {
        let compiled = compile_new(&self.compiler, &rule)?;
        let id = RuleId::new(Uuid::now_v7().to_string());
        let now = Utc::now();
        let record = RuleRecord {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            name: rule.name,
            user_id: rule.user_id,
            definition: rule.definition,
            compiled,
            is_active: rule.is_active,
            included_entities: rule.included,
            excluded_entities: rule.excluded,
        };
        self.rules.insert(id.clone(), record);
        info!(rule_id = %id, "rule created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn read(&self, user_id: &str, entity_id: &str) -> Result<Vec<ExecutableRule>> {
        let condition = Applicability::new(user_id, entity_id).condition();
        let mut matched: Vec<RuleRecord> = self
            .rules
            .iter()
            .filter(|entry| condition.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matched.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        debug!(count = matched.len(), "applicable rules");

        matched
            .into_iter()
            .map(|r| decode(r.id, r.name, &r.compiled))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &RuleId) -> Result<Option<RuleRecord>> {
        Ok(self.rules.get(id).map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: &RuleId, active: bool) -> Result<bool> {
        match self.rules.get_mut(id) {
            Some(mut entry) => {
                entry.is_active = active;
                entry.updated_at = Utc::now();
                info!(rule_id = %id, active, "rule activation changed");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
