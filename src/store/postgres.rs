//! PostgreSQL rule store.
//!
//! Rules live in the `rules` table created by `migrations/0001_create_rules.sql`.
//! Entity sets are `TEXT[]` columns; a NULL array is treated as empty.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgExecutor, PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    Applicability, Condition, DEFAULT_TIMEOUT, RuleStore, compile_new, decode, with_timeout,
};
use crate::compile::Compiler;
use crate::config::StoreConfig;
use crate::error::{PersistenceError, Result};
use crate::types::{ExecutableRule, NewRule, RuleId, RuleRecord};

fn pg(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PersistenceError {
    move |source| PersistenceError::Postgres { operation, source }
}

/// A WHERE-clause fragment with positional (`$n`) text parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SqlFragment {
    pub(crate) sql: String,
    pub(crate) binds: Vec<String>,
}

pub(crate) fn translate(condition: &Condition) -> SqlFragment {
    let mut binds = Vec::new();
    let sql = render(condition, &mut binds);
    SqlFragment { sql, binds }
}

fn render(condition: &Condition, binds: &mut Vec<String>) -> String {
    match condition {
        Condition::UserEquals(user) => {
            binds.push(user.clone());
            format!("user_id = ${}", binds.len())
        }
        Condition::IsActive => "is_active".to_string(),
        Condition::SetEmpty(set) => format!("COALESCE(cardinality({}), 0) = 0", set.column()),
        Condition::SetContains(set, entity) => {
            binds.push(entity.clone());
            format!(
                "COALESCE({} @> ARRAY[${}]::text[], FALSE)",
                set.column(),
                binds.len()
            )
        }
        Condition::Not(inner) => format!("NOT ({})", render(inner, binds)),
        Condition::All(all) => join(all, " AND ", "TRUE", binds),
        Condition::Any(any) => join(any, " OR ", "FALSE", binds),
    }
}

fn join(conditions: &[Condition], separator: &str, empty: &str, binds: &mut Vec<String>) -> String {
    if conditions.is_empty() {
        return empty.to_string();
    }
    conditions
        .iter()
        .map(|c| format!("({})", render(c, binds)))
        .collect::<Vec<_>>()
        .join(separator)
}

#[derive(FromRow)]
struct ExecutableRow {
    id: String,
    name: String,
    compiled: Vec<u8>,
}

#[derive(FromRow)]
struct RecordRow {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    name: String,
    user_id: String,
    definition: String,
    compiled: Vec<u8>,
    is_active: bool,
    included_entities: Option<Vec<String>>,
    excluded_entities: Option<Vec<String>>,
}

impl From<RecordRow> for RuleRecord {
    fn from(row: RecordRow) -> Self {
        RuleRecord {
            id: RuleId::new(row.id),
            created_at: row.created_at,
            updated_at: row.updated_at,
            name: row.name,
            user_id: row.user_id,
            definition: row.definition,
            compiled: row.compiled,
            is_active: row.is_active,
            included_entities: row.included_entities.unwrap_or_default(),
            excluded_entities: row.excluded_entities.unwrap_or_default(),
        }
    }
}

/// Rule store over a PostgreSQL connection pool.
///
/// Ids are UUIDs generated by the database. [`create_in`](Self::create_in) and
/// [`read_in`](Self::read_in) run on a caller-supplied connection, so they can
/// take part in the caller's transaction.
#[derive(Debug, Clone)]
pub struct PgRuleStore {
    pool: PgPool,
    compiler: Compiler,
    timeout: Duration,
}

impl PgRuleStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            compiler: Compiler::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a pool using the `postgres` section of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Postgres`] if the pool cannot connect.
    #[instrument(skip(config))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("connecting to postgres");
        let pg_config = &config.postgres;
        let pool = PgPoolOptions::new()
            .max_connections(pg_config.max_connections)
            .min_connections(pg_config.min_connections)
            .acquire_timeout(Duration::from_secs(pg_config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(pg_config.idle_timeout_seconds))
            .connect(&pg_config.url)
            .await
            .map_err(pg("connect"))?;
        info!("postgres pool created");
        Ok(Self::new(pool).with_timeout(config.operation_timeout()))
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Migrate`] if a migration fails.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|source| PersistenceError::Migrate {
                operation: "migrate",
                source,
            })?;
        info!("postgres migrations applied");
        Ok(())
    }

    /// [`RuleStore::create`] on the given connection.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::create`].
    pub async fn create_in(&self, conn: &mut PgConnection, rule: NewRule) -> Result<RuleId> {
        let compiled = compile_new(&self.compiler, &rule)?;
        with_timeout("create", self.timeout, insert(&mut *conn, &rule, compiled)).await
    }

    /// [`RuleStore::read`] on the given connection.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::read`].
    pub async fn read_in(
        &self,
        conn: &mut PgConnection,
        user_id: &str,
        entity_id: &str,
    ) -> Result<Vec<ExecutableRule>> {
        with_timeout("read", self.timeout, select(&mut *conn, user_id, entity_id)).await
    }
}

async fn insert<'e, E>(executor: E, rule: &NewRule, compiled: Vec<u8>) -> Result<RuleId>
where
    E: PgExecutor<'e>,
{
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO rules (
            name, user_id, definition, compiled,
            is_active, included_entities, excluded_entities
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id::text
        "#,
    )
    .bind(&rule.name)
    .bind(&rule.user_id)
    .bind(&rule.definition)
    .bind(compiled)
    .bind(rule.is_active)
    .bind(&rule.included)
    .bind(&rule.excluded)
    .fetch_one(executor)
    .await
    .map_err(pg("create"))?;

    info!(rule_id = %id, "rule created");
    Ok(RuleId::new(id))
}

async fn select<'e, E>(executor: E, user_id: &str, entity_id: &str) -> Result<Vec<ExecutableRule>>
where
    E: PgExecutor<'e>,
{
    let filter = translate(&Applicability::new(user_id, entity_id).condition());
    let sql = format!(
        "SELECT id::text AS id, name, compiled FROM rules WHERE {} ORDER BY created_at, id",
        filter.sql
    );
    let mut query = sqlx::query_as::<_, ExecutableRow>(&sql);
    for value in &filter.binds {
        query = query.bind(value.as_str());
    }
    let rows = query.fetch_all(executor).await.map_err(pg("read"))?;
    debug!(count = rows.len(), "applicable rules");

    rows.into_iter()
        .map(|row| decode(RuleId::new(row.id), row.name, &row.compiled))
        .collect()
}

#[async_trait]
impl RuleStore for PgRuleStore {
    #[instrument(skip(self, rule), fields(user_id = %rule.user_id, name = %rule.name))]
    async fn create(&self, rule: NewRule) -> Result<RuleId> {
        let compiled = compile_new(&self.compiler, &rule)?;
        with_timeout("create", self.timeout, insert(&self.pool, &rule, compiled)).await
    }

    #[instrument(skip(self))]
    async fn read(&self, user_id: &str, entity_id: &str) -> Result<Vec<ExecutableRule>> {
        with_timeout("read", self.timeout, select(&self.pool, user_id, entity_id)).await
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &RuleId) -> Result<Option<RuleRecord>> {
        if Uuid::parse_str(id.as_str()).is_err() {
            return Ok(None);
        }
        with_timeout("get", self.timeout, fetch_record(&self.pool, id)).await
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: &RuleId, active: bool) -> Result<bool> {
        if Uuid::parse_str(id.as_str()).is_err() {
            return Ok(false);
        }
        let updated = with_timeout("set_active", self.timeout, update_active(&self.pool, id, active))
            .await?;
        if updated {
            info!(rule_id = %id, active, "rule activation changed");
        }
        Ok(updated)
    }
}

async fn fetch_record(pool: &PgPool, id: &RuleId) -> Result<Option<RuleRecord>> {
    let row = sqlx::query_as::<_, RecordRow>(
        r#"
        SELECT id::text AS id, created_at, updated_at, name, user_id, definition,
               compiled, is_active, included_entities, excluded_entities
        FROM rules
        WHERE id = $1::uuid
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await
    .map_err(pg("get"))?;
    Ok(row.map(RuleRecord::from))
}

async fn update_active(pool: &PgPool, id: &RuleId, active: bool) -> Result<bool> {
    let result =
        sqlx::query("UPDATE rules SET is_active = $2, updated_at = now() WHERE id = $1::uuid")
            .bind(id.as_str())
            .bind(active)
            .execute(pool)
            .await
            .map_err(pg("set_active"))?;
    Ok(result.rows_affected() > 0)
}
