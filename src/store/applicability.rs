//! Which rules apply to a `(user, entity)` pair.
//!
//! The predicate is built once as a [`Condition`] tree and then translated by
//! each engine (SQL, MongoDB filter, in-process match), so every store answers
//! the same question with the same null and empty-set handling.

use crate::types::RuleRecord;

/// One of the two entity sets stored on a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySet {
    Included,
    Excluded,
}

impl EntitySet {
    /// Column or document field name.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            EntitySet::Included => "included_entities",
            EntitySet::Excluded => "excluded_entities",
        }
    }

    fn of(self, record: &RuleRecord) -> &[String] {
        match self {
            EntitySet::Included => &record.included_entities,
            EntitySet::Excluded => &record.excluded_entities,
        }
    }
}

/// Engine-neutral predicate over a stored rule.
///
/// A missing set is treated the same as an empty one by every translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    UserEquals(String),
    IsActive,
    /// The set is absent or has no members.
    SetEmpty(EntitySet),
    SetContains(EntitySet, String),
    Not(Box<Condition>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Evaluate the predicate against an in-memory record.
    #[must_use]
    pub fn matches(&self, record: &RuleRecord) -> bool {
        match self {
            Condition::UserEquals(user) => record.user_id == *user,
            Condition::IsActive => record.is_active,
            Condition::SetEmpty(set) => set.of(record).is_empty(),
            Condition::SetContains(set, entity) => set.of(record).iter().any(|e| e == entity),
            Condition::Not(inner) => !inner.matches(record),
            Condition::All(all) => all.iter().all(|c| c.matches(record)),
            Condition::Any(any) => any.iter().any(|c| c.matches(record)),
        }
    }
}

/// The applicability query for a user acting on an entity.
///
/// A rule applies when it belongs to the user, is active, its included set is
/// empty or contains the entity, and its excluded set does not contain the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applicability {
    pub user_id: String,
    pub entity_id: String,
}

impl Applicability {
    pub fn new(user_id: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            entity_id: entity_id.into(),
        }
    }

    #[must_use]
    pub fn condition(&self) -> Condition {
        Condition::All(vec![
            Condition::UserEquals(self.user_id.clone()),
            Condition::IsActive,
            Condition::Any(vec![
                Condition::SetEmpty(EntitySet::Included),
                Condition::SetContains(EntitySet::Included, self.entity_id.clone()),
            ]),
            Condition::Not(Box::new(Condition::SetContains(
                EntitySet::Excluded,
                self.entity_id.clone(),
            ))),
        ])
    }
}
