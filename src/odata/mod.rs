//! # OData collaborators
//!
//! The narrow interfaces the batch engine consumes: storage
//! ([`EntityProducer`]), authorization ([`AccessChecker`]) and response
//! rendering ([`FormatWriter`]), plus the values passed across them.

pub mod access;
pub mod entity;
pub mod format;
pub mod memory;
pub mod producer;
pub mod query;

pub use access::{AccessChecker, AccessContext, AccessMode, BoxAclChecker, Principal, Privilege};
pub use entity::{Entity, EntityDocument, EntityList, EntityRef, NavigationCreate, ID_PROPERTY};
pub use format::{FormatWriter, JsonFormatWriter};
pub use memory::{MemoryProducer, MemoryStore};
pub use producer::EntityProducer;
pub use query::QueryOptions;
