//! Storage seam for one OData collection
//!
//! The batch engine never touches storage directly. Each operation either
//! returns a typed result or a [`CoreError`]; bulk operations return one
//! result per submitted item, in submission order.

use super::entity::{Entity, EntityDocument, EntityList, EntityRef, NavigationCreate};
use super::query::QueryOptions;
use crate::errors::CoreResult;
use crate::schema::{EntityType, EntityValidator};

pub trait EntityProducer: Send + Sync {
    /// Metadata of an entity set, if the collection declares it
    fn find_entity_set(&self, name: &str) -> Option<EntityType>;

    /// Validate a request body and turn it into a storable document
    fn to_document(&self, entity_type: &EntityType, body: &str) -> CoreResult<EntityDocument> {
        EntityValidator::new(entity_type).to_document(body)
    }

    fn create_entity(&self, document: EntityDocument) -> CoreResult<Entity>;

    fn get_entity(&self, target: &EntityRef, query: &QueryOptions) -> CoreResult<Entity>;

    fn list_entities(&self, entity_set: &str, query: &QueryOptions) -> CoreResult<EntityList>;

    /// Replace an entity. Returns the new ETag.
    fn update_entity(
        &self,
        target: &EntityRef,
        document: EntityDocument,
        if_match: Option<&str>,
    ) -> CoreResult<String>;

    fn delete_entity(&self, target: &EntityRef, if_match: Option<&str>) -> CoreResult<()>;

    /// Link `source` to `target` through `navigation_property` (`_Target`)
    fn create_link(
        &self,
        source: &EntityRef,
        navigation_property: &str,
        target: &EntityRef,
    ) -> CoreResult<()>;

    /// Persist several documents in one storage call.
    ///
    /// An `Err` means the call as a whole failed and nothing was written.
    fn bulk_create(&self, documents: Vec<EntityDocument>) -> CoreResult<Vec<CoreResult<Entity>>>;

    /// Persist several documents, each linked to its source entity.
    fn bulk_create_via_navigation(
        &self,
        requests: Vec<NavigationCreate>,
    ) -> CoreResult<Vec<CoreResult<Entity>>>;
}
