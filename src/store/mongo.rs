//! MongoDB rule store.
//!
//! One document per rule. Entity sets are arrays; a missing or null array is
//! treated as empty.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{self, Binary, Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, ClientSession, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{
    Applicability, Condition, DEFAULT_TIMEOUT, RuleStore, compile_new, decode, with_timeout,
};
use crate::compile::Compiler;
use crate::config::StoreConfig;
use crate::error::{PersistenceError, Result};
use crate::types::{ExecutableRule, NewRule, RuleId, RuleRecord};

fn mongo(operation: &'static str) -> impl FnOnce(mongodb::error::Error) -> PersistenceError {
    move |source| PersistenceError::Mongo { operation, source }
}

pub(crate) fn translate(condition: &Condition) -> Document {
    match condition {
        Condition::UserEquals(user) => doc! { "user_id": user.as_str() },
        Condition::IsActive => doc! { "is_active": true },
        Condition::SetEmpty(set) => {
            let mut absent = Document::new();
            absent.insert(set.column(), Bson::Null);
            let mut empty = Document::new();
            empty.insert(set.column(), doc! { "$size": 0 });
            doc! { "$or": [absent, empty] }
        }
        Condition::SetContains(set, entity) => {
            let mut contains = Document::new();
            contains.insert(set.column(), entity.as_str());
            contains
        }
        Condition::Not(inner) => doc! { "$nor": [translate(inner)] },
        // `$and` and `$or` reject empty arrays.
        Condition::All(all) if all.is_empty() => Document::new(),
        Condition::Any(any) if any.is_empty() => doc! { "$expr": false },
        Condition::All(all) => doc! { "$and": all.iter().map(translate).collect::<Vec<_>>() },
        Condition::Any(any) => doc! { "$or": any.iter().map(translate).collect::<Vec<_>>() },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    created_at: bson::DateTime,
    updated_at: bson::DateTime,
    name: String,
    user_id: String,
    definition: String,
    compiled: Binary,
    is_active: bool,
    #[serde(default)]
    included_entities: Option<Vec<String>>,
    #[serde(default)]
    excluded_entities: Option<Vec<String>>,
}

/// Read-path projection.
#[derive(Debug, Deserialize)]
struct ExecutableDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
    compiled: Binary,
}

fn to_chrono(at: bson::DateTime, operation: &'static str) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).ok_or_else(|| {
        PersistenceError::Malformed {
            operation,
            message: format!("timestamp {} out of range", at.timestamp_millis()),
        }
        .into()
    })
}

impl RuleDocument {
    fn into_record(self, operation: &'static str) -> Result<RuleRecord> {
        let Some(id) = self.id else {
            return Err(PersistenceError::Malformed {
                operation,
                message: "document has no _id".to_string(),
            }
            .into());
        };
        Ok(RuleRecord {
            id: RuleId::new(id.to_hex()),
            created_at: to_chrono(self.created_at, operation)?,
            updated_at: to_chrono(self.updated_at, operation)?,
            name: self.name,
            user_id: self.user_id,
            definition: self.definition,
            compiled: self.compiled.bytes,
            is_active: self.is_active,
            included_entities: self.included_entities.unwrap_or_default(),
            excluded_entities: self.excluded_entities.unwrap_or_default(),
        })
    }
}

/// Rule store over a MongoDB collection.
///
/// Ids are the hex form of the document `ObjectId`. [`create_in`](Self::create_in)
/// and [`read_in`](Self::read_in) run inside a caller-supplied session.
#[derive(Debug, Clone)]
pub struct MongoRuleStore {
    client: Client,
    collection: Collection<RuleDocument>,
    compiler: Compiler,
    timeout: Duration,
}

impl MongoRuleStore {
    #[must_use]
    pub fn new(client: Client, database: &str, collection: &str) -> Self {
        let collection = client.database(database).collection(collection);
        Self {
            client,
            collection,
            compiler: Compiler::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect using the `mongo` section of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Mongo`] if the URI is invalid or the client
    /// cannot be created.
    #[instrument(skip(config))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("connecting to mongodb");
        let mongo_config = &config.mongo;
        let mut options = ClientOptions::parse(&mongo_config.uri)
            .await
            .map_err(mongo("connect"))?;
        options.max_pool_size = Some(mongo_config.max_pool_size);
        let client = Client::with_options(options).map_err(mongo("connect"))?;
        Ok(
            Self::new(client, &mongo_config.database, &mongo_config.collection)
                .with_timeout(config.operation_timeout()),
        )
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Start a session for use with [`create_in`](Self::create_in) and
    /// [`read_in`](Self::read_in).
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Mongo`] if the server refuses the session.
    pub async fn start_session(&self) -> Result<ClientSession> {
        Ok(self
            .client
            .start_session()
            .await
            .map_err(mongo("start_session"))?)
    }

    /// Create the index backing the applicability lookup.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Mongo`] if index creation fails.
    #[instrument(skip(self))]
    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "is_active": 1, "created_at": 1 })
            .build();
        self.collection
            .create_index(index)
            .await
            .map_err(mongo("ensure_indexes"))?;
        info!("mongodb indexes ensured");
        Ok(())
    }

    fn document(rule: &NewRule, compiled: Vec<u8>) -> RuleDocument {
        let now = bson::DateTime::now();
        RuleDocument {
            id: None,
            created_at: now,
            updated_at: now,
            name: rule.name.clone(),
            user_id: rule.user_id.clone(),
            definition: rule.definition.clone(),
            compiled: Binary {
                subtype: BinarySubtype::Generic,
                bytes: compiled,
            },
            is_active: rule.is_active,
            included_entities: Some(rule.included.clone()),
            excluded_entities: Some(rule.excluded.clone()),
        }
    }

    fn inserted_id(inserted: &Bson) -> Result<RuleId> {
        match inserted.as_object_id() {
            Some(oid) => {
                let id = RuleId::new(oid.to_hex());
                info!(rule_id = %id, "rule created");
                Ok(id)
            }
            None => Err(PersistenceError::Malformed {
                operation: "create",
                message: format!("unexpected inserted id {inserted}"),
            }
            .into()),
        }
    }

    fn executable_collection(&self) -> Collection<ExecutableDocument> {
        self.collection.clone_with_type()
    }

    fn read_filter(user_id: &str, entity_id: &str) -> Document {
        translate(&Applicability::new(user_id, entity_id).condition())
    }

    fn read_sort() -> Document {
        doc! { "created_at": 1, "_id": 1 }
    }

    fn read_projection() -> Document {
        doc! { "name": 1, "compiled": 1 }
    }

    fn decode_all(documents: Vec<ExecutableDocument>) -> Result<Vec<ExecutableRule>> {
        debug!(count = documents.len(), "applicable rules");
        documents
            .into_iter()
            .map(|d| decode(RuleId::new(d.id.to_hex()), d.name, &d.compiled.bytes))
            .collect()
    }

    /// [`RuleStore::create`] inside the given session.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::create`].
    pub async fn create_in(&self, session: &mut ClientSession, rule: NewRule) -> Result<RuleId> {
        let compiled = compile_new(&self.compiler, &rule)?;
        let document = Self::document(&rule, compiled);
        let inserted = with_timeout("create", self.timeout, async {
            Ok(self
                .collection
                .insert_one(document)
                .session(&mut *session)
                .await
                .map_err(mongo("create"))?)
        })
        .await?;
        Self::inserted_id(&inserted.inserted_id)
    }

    /// [`RuleStore::read`] inside the given session.
    ///
    /// # Errors
    ///
    /// See [`RuleStore::read`].
    pub async fn read_in(
        &self,
        session: &mut ClientSession,
        user_id: &str,
        entity_id: &str,
    ) -> Result<Vec<ExecutableRule>> {
        let documents: Vec<ExecutableDocument> = with_timeout("read", self.timeout, async {
            let mut cursor = self
                .executable_collection()
                .find(Self::read_filter(user_id, entity_id))
                .projection(Self::read_projection())
                .sort(Self::read_sort())
                .session(&mut *session)
                .await
                .map_err(mongo("read"))?;
            Ok(cursor
                .stream(&mut *session)
                .try_collect()
                .await
                .map_err(mongo("read"))?)
        })
        .await?;
        Self::decode_all(documents)
    }
}

#[async_trait]
impl RuleStore for MongoRuleStore {
    #[instrument(skip(self, rule), fields(user_id = %rule.user_id, name = %rule.name))]
    async fn create(&self, rule: NewRule) -> Result<RuleId> {
        let compiled = compile_new(&self.compiler, &rule)?;
        let document = Self::document(&rule, compiled);
        let inserted = with_timeout("create", self.timeout, async {
            Ok(self
                .collection
                .insert_one(document)
                .await
                .map_err(mongo("create"))?)
        })
        .await?;
        Self::inserted_id(&inserted.inserted_id)
    }

    #[instrument(skip(self))]
    async fn read(&self, user_id: &str, entity_id: &str) -> Result<Vec<ExecutableRule>> {
        let documents: Vec<ExecutableDocument> = with_timeout("read", self.timeout, async {
            let cursor = self
                .executable_collection()
                .find(Self::read_filter(user_id, entity_id))
                .projection(Self::read_projection())
                .sort(Self::read_sort())
                .await
                .map_err(mongo("read"))?;
            Ok(cursor.try_collect().await.map_err(mongo("read"))?)
        })
        .await?;
        Self::decode_all(documents)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &RuleId) -> Result<Option<RuleRecord>> {
        let Ok(oid) = ObjectId::parse_str(id.as_str()) else {
            return Ok(None);
        };
        let document = with_timeout("get", self.timeout, async {
            Ok(self
                .collection
                .find_one(doc! { "_id": oid })
                .await
                .map_err(mongo("get"))?)
        })
        .await?;
        document.map(|d| d.into_record("get")).transpose()
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: &RuleId, active: bool) -> Result<bool> {
        let Ok(oid) = ObjectId::parse_str(id.as_str()) else {
            return Ok(false);
        };
        let result = with_timeout("set_active", self.timeout, async {
            Ok(self
                .collection
                .update_one(
                    doc! { "_id": oid },
                    doc! { "$set": { "is_active": active, "updated_at": bson::DateTime::now() } },
                )
                .await
                .map_err(mongo("set_active"))?)
        })
        .await?;
        let updated = result.matched_count > 0;
        if updated {
            info!(rule_id = %id, active, "rule activation changed");
        }
        Ok(updated)
    }
}
