//! # Bulk write aggregator
//!
//! Consecutive creates of the same kind are buffered and written to storage
//! in one call. Each buffered unit remembers the part it came from so the
//! responses can be rendered in arrival order after the flush.
//!
//! Units are keyed by `entityTypeId:id`. A second create of the same key
//! within one accumulation is answered with a conflict and kept under a
//! random key so that it still gets its own response.

use axum::http::StatusCode;
use indexmap::IndexMap;
use uuid::Uuid;

use super::access::BatchAccess;
use super::body_part::{BodyPart, CreateKind};
use super::response::{BatchResponse, DATA_SERVICE_VERSION, ODATA_VERSION};
use super::shutter::AdmissionShutter;
use super::timer::{ElapsedTimer, Mode};
use crate::errors::{codes, CoreError, CoreResult};
use crate::observability::{BatchMetrics, Event};
use crate::odata::{
    Entity, EntityDocument, EntityProducer, EntityRef, FormatWriter, NavigationCreate,
};

/// Storage side of a flush
pub struct FlushTarget<'a> {
    pub producer: &'a dyn EntityProducer,
    pub writer: &'a dyn FormatWriter,
    pub metrics: &'a BatchMetrics,
}

enum PendingCreate {
    Plain(EntityDocument),
    Navigation(NavigationCreate),
}

enum UnitState {
    Ready(PendingCreate),
    Failed(CoreError),
    Created(Entity),
}

struct BulkUnit {
    part: BodyPart,
    state: UnitState,
}

#[derive(Default)]
pub struct BulkAggregator {
    kind: Option<CreateKind>,
    units: IndexMap<String, BulkUnit>,
}

impl BulkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Kind of the creates currently buffered
    pub fn pending_kind(&self) -> Option<CreateKind> {
        self.kind
    }

    /// Validate a create part and buffer it.
    ///
    /// Validation failures are buffered too; they are answered at flush time
    /// in their original position.
    pub fn enqueue(
        &mut self,
        part: BodyPart,
        kind: CreateKind,
        producer: &dyn EntityProducer,
        access: &mut BatchAccess,
    ) {
        self.kind = Some(kind);
        match Self::prepare(&part, kind, producer, access) {
            Ok(pending) => {
                let natural_key = match &pending {
                    PendingCreate::Plain(doc) => doc.natural_key(),
                    PendingCreate::Navigation(request) => request.document.natural_key(),
                };
                match natural_key {
                    Some(key) if !self.units.contains_key(&key) => {
                        self.units.insert(
                            key,
                            BulkUnit {
                                part,
                                state: UnitState::Ready(pending),
                            },
                        );
                    }
                    _ => self.push_failed(part, CoreError::new(codes::ENTITY_ALREADY_EXISTS)),
                }
            }
            Err(error) => self.push_failed(part, error),
        }
    }

    fn push_failed(&mut self, part: BodyPart, error: CoreError) {
        self.units.insert(
            random_key(),
            BulkUnit {
                part,
                state: UnitState::Failed(error),
            },
        );
    }

    fn prepare(
        part: &BodyPart,
        kind: CreateKind,
        producer: &dyn EntityProducer,
        access: &mut BatchAccess,
    ) -> CoreResult<PendingCreate> {
        access.check_write(part.entity_set_name())?;

        match kind {
            CreateKind::Plain => {
                let entity_type = producer
                    .find_entity_set(part.entity_set_name())
                    .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))?;
                let mut document = producer.to_document(&entity_type, part.body())?;
                document.assign_id_if_missing();
                Ok(PendingCreate::Plain(document))
            }
            CreateKind::Navigation => {
                let source_type = producer
                    .find_entity_set(part.entity_set_name())
                    .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))?;
                let navigation_property = part
                    .navigation_property()
                    .ok_or_else(|| CoreError::new(codes::NOT_SUCH_NAVPROP))?;
                if source_type.navigation(navigation_property).is_none() {
                    return Err(CoreError::new(codes::NOT_SUCH_NAVPROP));
                }
                let target_type = part
                    .target_entity_set_name()
                    .and_then(|name| producer.find_entity_set(name))
                    .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))?;
                let source_key = part
                    .entity_key()
                    .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))?;

                let mut document = producer.to_document(&target_type, part.body())?;
                document.assign_id_if_missing();
                Ok(PendingCreate::Navigation(NavigationCreate {
                    source: EntityRef::new(part.entity_set_name(), source_key),
                    navigation_property: navigation_property.to_string(),
                    document,
                }))
            }
        }
    }

    /// Submit the buffer and answer every unit in arrival order.
    ///
    /// Never fails: storage errors become per-unit responses.
    pub fn flush(
        &mut self,
        target: &FlushTarget<'_>,
        timer: &mut ElapsedTimer,
        shutter: &mut AdmissionShutter,
    ) -> Vec<(BodyPart, BatchResponse)> {
        if self.units.is_empty() {
            self.kind = None;
            return Vec::new();
        }

        let kind = self.kind.take().unwrap_or(CreateKind::Plain);
        let mut units = std::mem::take(&mut self.units);
        let queued = units.len() as u64;

        if timer.should_break(Mode::Yield) {
            target.metrics.add_parts_timed_out(queued);
            return fail_all(units, &CoreError::new(codes::SERVER_REQUEST_TIMEOUT));
        }
        if shutter.is_tripped() {
            target.metrics.add_parts_shuttered(queued);
            return fail_all(units, &CoreError::new(codes::TOO_MANY_CONCURRENT_REQUESTS));
        }

        let mut submitted = Vec::new();
        let mut plain = Vec::new();
        let mut navigation = Vec::new();
        for (key, unit) in units.iter_mut() {
            let state = std::mem::replace(
                &mut unit.state,
                UnitState::Failed(CoreError::unknown("create was not submitted")),
            );
            match state {
                UnitState::Ready(PendingCreate::Plain(doc)) => {
                    submitted.push(key.clone());
                    plain.push(doc);
                }
                UnitState::Ready(PendingCreate::Navigation(request)) => {
                    submitted.push(key.clone());
                    navigation.push(request);
                }
                other => unit.state = other,
            }
        }

        if !submitted.is_empty() {
            let outcome = match kind {
                CreateKind::Plain if plain.len() == 1 => plain
                    .pop()
                    .map(|doc| target.producer.create_entity(doc).map(|e| vec![Ok(e)]))
                    .unwrap_or_else(|| Ok(Vec::new())),
                CreateKind::Plain => target.producer.bulk_create(plain),
                CreateKind::Navigation => target.producer.bulk_create_via_navigation(navigation),
            };
            target.metrics.increment_bulk_flushes();
            target.metrics.add_parts_executed(submitted.len() as u64);

            match outcome {
                Ok(results) => {
                    let mut results = results.into_iter();
                    for key in &submitted {
                        let result = results.next().unwrap_or_else(|| {
                            Err(CoreError::unknown("storage returned fewer results than submitted"))
                        });
                        if let Some(unit) = units.get_mut(key) {
                            unit.state = match result {
                                Ok(entity) => UnitState::Created(entity),
                                Err(error) => {
                                    if shutter.update_status(&error) {
                                        target.metrics.increment_shutter_trips();
                                    }
                                    UnitState::Failed(error)
                                }
                            };
                        }
                    }
                }
                Err(error) => {
                    if shutter.update_status(&error) {
                        target.metrics.increment_shutter_trips();
                    }
                    for key in &submitted {
                        if let Some(unit) = units.get_mut(key) {
                            unit.state = UnitState::Failed(error.clone());
                        }
                    }
                }
            }
        }

        tracing::debug!(
            event = %Event::BulkFlush,
            units = queued,
            submitted = submitted.len(),
            "buffered creates flushed"
        );

        units
            .into_values()
            .map(|unit| {
                let response = match &unit.state {
                    UnitState::Created(entity) => created_response(&unit.part, entity, target.writer),
                    UnitState::Failed(error) => BatchResponse::from_error(error),
                    UnitState::Ready(_) => BatchResponse::from_error(&CoreError::unknown(
                        "create was not submitted",
                    )),
                };
                (unit.part, response)
            })
            .collect()
    }
}

fn fail_all(units: IndexMap<String, BulkUnit>, error: &CoreError) -> Vec<(BodyPart, BatchResponse)> {
    units
        .into_values()
        .map(|unit| (unit.part, BatchResponse::from_error(error)))
        .collect()
}

/// `201 Created` for one stored entity
pub fn created_response(part: &BodyPart, entity: &Entity, writer: &dyn FormatWriter) -> BatchResponse {
    BatchResponse::new(StatusCode::CREATED)
        .with_header("Content-Type", writer.content_type())
        .with_header("Location", format!("{}('{}')", part.uri(), entity.id))
        .with_header(DATA_SERVICE_VERSION, ODATA_VERSION)
        .with_header("ETag", format!("W/\"{}\"", entity.etag))
        .with_body(writer.render_entity(part.uri(), entity))
}

fn random_key() -> String {
    Uuid::new_v4().simple().to_string()
}
