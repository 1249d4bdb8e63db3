//! # In-memory producer
//!
//! Entities live in process memory, grouped per collection
//! (`cell/box/collection`). Writes to a cell are serialized by a per-cell
//! lock; a writer that cannot take it within the configured wait fails with
//! `PR503-SV-0001`, which is what trips a batch's shutter.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Map;

use super::entity::{Entity, EntityDocument, EntityList, EntityRef, NavigationCreate};
use super::producer::EntityProducer;
use super::query::QueryOptions;
use crate::errors::{codes, CoreError, CoreResult};
use crate::schema::{EntityType, ODataSchema};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Expression options this store cannot evaluate
const UNSUPPORTED_EXPRESSIONS: &[&str] = &["$filter", "$orderby", "$expand", "q"];

#[derive(Debug, Clone)]
struct StoredEntity {
    entity: Entity,
    version: u64,
}

#[derive(Debug, Default)]
struct CollectionData {
    /// Entities by set, then by key, in insertion order
    sets: HashMap<String, IndexMap<String, StoredEntity>>,
    /// (source, navigation property, target)
    links: HashSet<(EntityRef, String, EntityRef)>,
}

/// Process-wide entity store shared by all requests
pub struct MemoryStore {
    schema: Arc<ODataSchema>,
    lock_wait: Duration,
    cell_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    collections: RwLock<HashMap<String, CollectionData>>,
}

impl MemoryStore {
    pub fn new(schema: ODataSchema, lock_wait: Duration) -> Self {
        Self {
            schema: Arc::new(schema),
            lock_wait,
            cell_locks: Mutex::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &ODataSchema {
        &self.schema
    }

    /// Producer bound to one collection
    pub fn producer(self: &Arc<Self>, cell: &str, box_name: &str, collection: &str) -> MemoryProducer {
        MemoryProducer {
            store: Arc::clone(self),
            cell: cell.to_string(),
            collection: format!("{}/{}/{}", cell, box_name, collection),
        }
    }

    /// The write lock of a cell. Holding it blocks every writer of the cell.
    pub fn cell_lock(&self, cell: &str) -> CoreResult<Arc<Mutex<()>>> {
        let mut locks = self
            .cell_locks
            .lock()
            .map_err(|_| CoreError::unknown("cell lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(cell.to_string()).or_default()))
    }

    fn with_cell_lock<T>(&self, cell: &str, f: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        let lock = self.cell_lock(cell)?;
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match lock.try_lock() {
                Ok(_guard) => return f(),
                Err(TryLockError::Poisoned(poisoned)) => {
                    let _guard = poisoned.into_inner();
                    return f();
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(cell, "cell lock wait exceeded");
                        return Err(CoreError::new(codes::TOO_MANY_CONCURRENT_REQUESTS));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
            }
        }
    }

    fn read(&self) -> CoreResult<RwLockReadGuard<'_, HashMap<String, CollectionData>>> {
        self.collections
            .read()
            .map_err(|_| CoreError::unknown("entity store poisoned"))
    }

    fn write(&self) -> CoreResult<RwLockWriteGuard<'_, HashMap<String, CollectionData>>> {
        self.collections
            .write()
            .map_err(|_| CoreError::unknown("entity store poisoned"))
    }
}

/// [`EntityProducer`] over one collection of a [`MemoryStore`]
pub struct MemoryProducer {
    store: Arc<MemoryStore>,
    cell: String,
    collection: String,
}

impl MemoryProducer {
    fn entity_type(&self, entity_set: &str) -> CoreResult<&EntityType> {
        self.store
            .schema
            .find(entity_set)
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))
    }

    fn insert(data: &mut CollectionData, mut document: EntityDocument) -> CoreResult<Entity> {
        let id = document.assign_id_if_missing().to_string();
        let set = data.sets.entry(document.entity_set.clone()).or_default();
        if set.contains_key(&id) {
            return Err(CoreError::new(codes::ENTITY_ALREADY_EXISTS));
        }

        let now = Utc::now();
        let entity = Entity {
            entity_set: document.entity_set,
            id: id.clone(),
            etag: etag(1, now.timestamp_millis()),
            properties: document.properties,
            published: now,
            updated: now,
        };
        set.insert(
            id,
            StoredEntity {
                entity: entity.clone(),
                version: 1,
            },
        );
        Ok(entity)
    }

    fn exists(data: &CollectionData, target: &EntityRef) -> bool {
        data.sets
            .get(&target.entity_set)
            .is_some_and(|set| set.contains_key(&target.key))
    }

    fn create_via_navigation(&self, data: &mut CollectionData, request: NavigationCreate) -> CoreResult<Entity> {
        let source_type = self.entity_type(&request.source.entity_set)?;
        if !Self::exists(data, &request.source) {
            return Err(CoreError::new(codes::NO_SUCH_ENTITY));
        }
        if source_type.navigation(&request.navigation_property).is_none() {
            return Err(CoreError::new(codes::NOT_SUCH_NAVPROP));
        }

        let created = Self::insert(data, request.document)?;
        let target = EntityRef::new(created.entity_set.clone(), created.id.clone());
        data.links
            .insert((request.source, request.navigation_property, target));
        Ok(created)
    }
}

fn etag(version: u64, updated_millis: i64) -> String {
    format!("{}-{}", version, updated_millis)
}

/// `W/"1-123"`, `"1-123"` and `1-123` all name the same ETag.
fn etag_matches(if_match: Option<&str>, current: &str) -> bool {
    match if_match {
        None => true,
        Some(raw) => {
            let raw = raw.trim();
            if raw == "*" {
                return true;
            }
            let raw = raw.strip_prefix("W/").unwrap_or(raw);
            raw.trim_matches('"') == current
        }
    }
}

fn apply_select(entity: &Entity, query: &QueryOptions) -> Entity {
    let Some(select) = &query.select else {
        return entity.clone();
    };
    if select.iter().any(|f| f == "*") {
        return entity.clone();
    }
    let properties: Map<String, serde_json::Value> = entity
        .properties
        .iter()
        .filter(|(name, _)| select.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Entity {
        properties,
        ..entity.clone()
    }
}

impl EntityProducer for MemoryProducer {
    fn find_entity_set(&self, name: &str) -> Option<EntityType> {
        self.store.schema.find(name).cloned()
    }

    fn create_entity(&self, document: EntityDocument) -> CoreResult<Entity> {
        self.entity_type(&document.entity_set)?;
        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let data = collections.entry(self.collection.clone()).or_default();
            Self::insert(data, document)
        })
    }

    fn get_entity(&self, target: &EntityRef, query: &QueryOptions) -> CoreResult<Entity> {
        self.entity_type(&target.entity_set)?;
        let collections = self.store.read()?;
        collections
            .get(&self.collection)
            .and_then(|data| data.sets.get(&target.entity_set))
            .and_then(|set| set.get(&target.key))
            .map(|stored| apply_select(&stored.entity, query))
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))
    }

    fn list_entities(&self, entity_set: &str, query: &QueryOptions) -> CoreResult<EntityList> {
        self.entity_type(entity_set)?;
        if let Some(option) = UNSUPPORTED_EXPRESSIONS
            .iter()
            .find(|o| query.expressions.contains_key(**o))
        {
            return Err(CoreError::new(codes::METHOD_NOT_IMPLEMENTED).with_cause(format!(
                "query option {} is not supported by the in-memory store",
                option
            )));
        }

        let collections = self.store.read()?;
        let Some(set) = collections
            .get(&self.collection)
            .and_then(|data| data.sets.get(entity_set))
        else {
            return Ok(EntityList {
                entities: Vec::new(),
                count: query.inline_count.then_some(0),
            });
        };

        let entities = set
            .values()
            .skip(query.skip as usize)
            .take(query.top as usize)
            .map(|stored| apply_select(&stored.entity, query))
            .collect();

        Ok(EntityList {
            entities,
            count: query.inline_count.then_some(set.len()),
        })
    }

    fn update_entity(
        &self,
        target: &EntityRef,
        document: EntityDocument,
        if_match: Option<&str>,
    ) -> CoreResult<String> {
        self.entity_type(&target.entity_set)?;
        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let stored = collections
                .get_mut(&self.collection)
                .and_then(|data| data.sets.get_mut(&target.entity_set))
                .and_then(|set| set.get_mut(&target.key))
                .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))?;

            if !etag_matches(if_match, &stored.entity.etag) {
                return Err(CoreError::new(codes::ETAG_NOT_MATCH));
            }

            let now = Utc::now();
            stored.version += 1;
            stored.entity.properties = document.properties;
            stored.entity.updated = now;
            stored.entity.etag = etag(stored.version, now.timestamp_millis());
            Ok(stored.entity.etag.clone())
        })
    }

    fn delete_entity(&self, target: &EntityRef, if_match: Option<&str>) -> CoreResult<()> {
        self.entity_type(&target.entity_set)?;
        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let data = collections
                .get_mut(&self.collection)
                .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))?;
            let set = data
                .sets
                .get_mut(&target.entity_set)
                .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))?;
            let stored = set
                .get(&target.key)
                .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))?;

            if !etag_matches(if_match, &stored.entity.etag) {
                return Err(CoreError::new(codes::ETAG_NOT_MATCH));
            }

            set.shift_remove(&target.key);
            data.links
                .retain(|(source, _, linked)| source != target && linked != target);
            Ok(())
        })
    }

    fn create_link(
        &self,
        source: &EntityRef,
        navigation_property: &str,
        target: &EntityRef,
    ) -> CoreResult<()> {
        let source_type = self.entity_type(&source.entity_set)?;
        let navigation = source_type
            .navigation(navigation_property)
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ASSOCIATION))?;
        if navigation.target != target.entity_set {
            return Err(CoreError::new(codes::REQUEST_FIELD_FORMAT_ERROR).with_params(["uri"]));
        }

        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let data = collections.entry(self.collection.clone()).or_default();
            if !Self::exists(data, source) {
                return Err(CoreError::new(codes::NO_SUCH_ENTITY));
            }
            if !Self::exists(data, target) {
                return Err(CoreError::new(codes::REQUEST_FIELD_FORMAT_ERROR).with_params(["uri"]));
            }

            let link = (source.clone(), navigation_property.to_string(), target.clone());
            if !data.links.insert(link) {
                return Err(CoreError::new(codes::CONFLICT_LINKS));
            }
            Ok(())
        })
    }

    fn bulk_create(&self, documents: Vec<EntityDocument>) -> CoreResult<Vec<CoreResult<Entity>>> {
        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let data = collections.entry(self.collection.clone()).or_default();
            Ok(documents
                .into_iter()
                .map(|document| {
                    self.entity_type(&document.entity_set)?;
                    Self::insert(data, document)
                })
                .collect())
        })
    }

    fn bulk_create_via_navigation(
        &self,
        requests: Vec<NavigationCreate>,
    ) -> CoreResult<Vec<CoreResult<Entity>>> {
        self.store.with_cell_lock(&self.cell, || {
            let mut collections = self.store.write()?;
            let data = collections.entry(self.collection.clone()).or_default();
            Ok(requests
                .into_iter()
                .map(|request| self.create_via_navigation(data, request))
                .collect())
        })
    }
}
