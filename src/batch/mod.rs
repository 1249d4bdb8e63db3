//! OData `$batch` processing
//!
//! A `$batch` request carries many sub-requests in one `multipart/mixed`
//! body. The [`BatchBodyParser`] splits it into [`BodyPart`]s, the
//! [`BatchEngine`] runs them in order against an
//! [`EntityProducer`](crate::odata::EntityProducer) and the
//! [`MultipartWriter`] assembles the response envelope.

pub mod access;
pub mod body_part;
pub mod bulk;
pub mod orchestrator;
pub mod parser;
pub mod request;
pub mod response;
pub mod shutter;
pub mod timer;

pub use access::BatchAccess;
pub use body_part::{BodyPart, ChangesetPosition, CreateKind};
pub use bulk::{BulkAggregator, FlushTarget};
pub use orchestrator::{BatchEngine, BatchInput, BatchOutput};
pub use parser::{boundary_of, BatchBodyParser};
pub use request::{BatchRequestWriter, SubRequest};
pub use response::{BatchResponse, MultipartWriter, DATA_SERVICE_VERSION, ODATA_VERSION};
pub use shutter::AdmissionShutter;
pub use timer::{Clock, ElapsedTimer, ManualClock, Mode, Priority, SystemClock, PRIORITY_HEADER};
