//! # Batch orchestrator
//!
//! Drives one `$batch` request: whole-batch checks, then every part in
//! arrival order. Creates are buffered in the [`BulkAggregator`]; any other
//! part flushes the buffer first so responses keep the request order.
//!
//! Per-part failures are rendered into the multipart envelope and never
//! stop the batch. Only whole-batch failures (access, envelope, limits)
//! are returned as `Err`.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::http::{Method, StatusCode};
use regex::Regex;
use serde_json::Value;

use super::access::BatchAccess;
use super::body_part::BodyPart;
use super::bulk::{BulkAggregator, FlushTarget};
use super::parser::BatchBodyParser;
use super::response::{BatchResponse, MultipartWriter, DATA_SERVICE_VERSION, ODATA_VERSION};
use super::shutter::AdmissionShutter;
use super::timer::{Clock, ElapsedTimer, Mode, Priority, SystemClock};
use crate::config::UnitConfig;
use crate::errors::{codes, CoreError, CoreResult};
use crate::observability::{BatchMetrics, Event};
use crate::odata::{
    AccessChecker, AccessContext, BoxAclChecker, EntityProducer, EntityRef, FormatWriter,
    JsonFormatWriter, QueryOptions,
};

/// Methods still served while the unit is in read/delete-only mode
const READ_DELETE_ONLY_METHODS: &[&str] = &["GET", "DELETE", "OPTIONS", "HEAD", "PROPFIND", "REPORT"];

fn link_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^/\(]+)\('([^']+)'\)$").expect("static pattern"))
}

/// One `$batch` request as seen by the engine
#[derive(Debug, Clone)]
pub struct BatchInput<'a> {
    /// Absolute URI of the `$batch` resource
    pub request_uri: &'a str,
    pub boundary: &'a str,
    pub body: &'a str,
    pub priority: Priority,
    pub context: AccessContext,
}

/// Assembled `multipart/mixed` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    pub boundary: String,
    pub body: String,
    /// Number of part responses in `body`
    pub parts: usize,
}

impl BatchOutput {
    pub fn status(&self) -> StatusCode {
        StatusCode::ACCEPTED
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }
}

/// Batch engine bound to one collection
pub struct BatchEngine {
    producer: Arc<dyn EntityProducer>,
    checker: Arc<dyn AccessChecker>,
    writer: Arc<dyn FormatWriter>,
    clock: Arc<dyn Clock>,
    metrics: Arc<BatchMetrics>,
    config: Arc<UnitConfig>,
}

impl BatchEngine {
    pub fn new(producer: Arc<dyn EntityProducer>, config: Arc<UnitConfig>) -> Self {
        Self {
            producer,
            checker: Arc::new(BoxAclChecker),
            writer: Arc::new(JsonFormatWriter),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(BatchMetrics::new()),
            config,
        }
    }

    pub fn with_access_checker(mut self, checker: Arc<dyn AccessChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_format_writer(mut self, writer: Arc<dyn FormatWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    /// Process a whole `$batch` request.
    pub fn process_batch(&self, input: BatchInput<'_>) -> CoreResult<BatchOutput> {
        let started = Instant::now();
        let access = BatchAccess::new(self.checker.clone(), input.context);

        let mut parser = BatchBodyParser::new(input.request_uri, self.config.odata.clone());
        let parts = access
            .check_batch()
            .and_then(|_| parser.parse(input.boundary, input.body))
            .and_then(|parts| self.check_part_count(parts))
            .inspect_err(|error| {
                self.metrics.increment_batches_rejected();
                tracing::info!(
                    event = %Event::BatchRejected,
                    code = error.code(),
                    "batch rejected before execution"
                );
            })?;

        tracing::info!(
            event = %Event::BatchBegin,
            parts = parts.len(),
            priority = ?input.priority,
            "processing batch"
        );

        let mut run = BatchRun {
            engine: self,
            collection_uri: parser.collection_uri().to_string(),
            access,
            timer: ElapsedTimer::new(self.clock.clone(), &self.config.batch, input.priority),
            shutter: AdmissionShutter::new(),
            bulk: BulkAggregator::new(),
            out: MultipartWriter::new(input.boundary),
        };
        for part in parts {
            run.dispatch(part);
        }
        run.flush();

        let timed_out = run.timer.timed_out();
        let shutter_tripped = run.shutter.is_tripped();
        let written = run.out.parts_written();
        let body = run.out.finish();

        self.metrics.increment_batches_processed();
        tracing::info!(
            event = %Event::BatchComplete,
            parts = written,
            timed_out,
            shutter_tripped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );

        Ok(BatchOutput {
            boundary: input.boundary.to_string(),
            body,
            parts: written,
        })
    }

    fn check_part_count(&self, parts: Vec<BodyPart>) -> CoreResult<Vec<BodyPart>> {
        if parts.is_empty() {
            return Err(CoreError::new(codes::BATCH_BODY_PARSE_ERROR));
        }
        if parts.len() > self.config.batch.bulk_request_max_size {
            return Err(CoreError::new(codes::TOO_MANY_REQUESTS).with_params([parts.len()]));
        }
        Ok(parts)
    }
}

/// Mutable state of one batch execution
struct BatchRun<'e> {
    engine: &'e BatchEngine,
    collection_uri: String,
    access: BatchAccess,
    timer: ElapsedTimer,
    shutter: AdmissionShutter,
    bulk: BulkAggregator,
    out: MultipartWriter,
}

impl BatchRun<'_> {
    fn dispatch(&mut self, part: BodyPart) {
        let method = part.method().clone();

        if self.engine.config.read_delete_only_mode && !read_delete_only_allows(&method) {
            self.respond_error(&part, CoreError::new(codes::READ_DELETE_ONLY));
            return;
        }

        if !self.shutter.accept(&method) {
            self.engine.metrics.add_parts_shuttered(1);
            self.respond_error(&part, CoreError::new(codes::TOO_MANY_CONCURRENT_REQUESTS));
            return;
        }

        if part.navigation_has_key() {
            self.respond_error(&part, CoreError::new(codes::KEY_FOR_NAVPROP_SHOULD_NOT_BE_SPECIFIED));
            return;
        }

        if part.is_links_request() {
            let response = if method == Method::POST {
                self.flush();
                self.guarded_write(Mode::Yield, |run| run.create_link(&part))
            } else {
                BatchResponse::from_error(&CoreError::new(codes::METHOD_NOT_IMPLEMENTED))
            };
            self.respond(&part, response);
            return;
        }

        if let Some(kind) = part.create_kind() {
            if self.bulk.pending_kind().is_some_and(|pending| pending != kind) {
                self.flush();
            }
            let engine = self.engine;
            self.bulk
                .enqueue(part, kind, engine.producer.as_ref(), &mut self.access);
            return;
        }

        let response = match method {
            Method::GET => {
                self.flush();
                if self.timed_out(Mode::Hold) {
                    self.timeout_response()
                } else {
                    self.engine.metrics.add_parts_executed(1);
                    self.retrieve(&part).unwrap_or_else(|e| BatchResponse::from_error(&e))
                }
            }
            Method::PUT => {
                self.flush();
                self.guarded_write(Mode::Yield, |run| run.update(&part))
            }
            Method::DELETE => {
                self.flush();
                self.guarded_write(Mode::Yield, |run| run.delete(&part))
            }
            _ => BatchResponse::from_error(&CoreError::new(codes::METHOD_NOT_ALLOWED)),
        };
        self.respond(&part, response);
    }

    /// Deadline and shutter checks around one synchronous write.
    ///
    /// Write errors are fed to the shutter.
    fn guarded_write<F>(&mut self, mode: Mode, write: F) -> BatchResponse
    where
        F: FnOnce(&mut Self) -> CoreResult<BatchResponse>,
    {
        if self.timed_out(mode) {
            return self.timeout_response();
        }
        if self.shutter.is_tripped() {
            self.engine.metrics.add_parts_shuttered(1);
            return BatchResponse::from_error(&CoreError::new(codes::TOO_MANY_CONCURRENT_REQUESTS));
        }

        self.engine.metrics.add_parts_executed(1);
        match write(self) {
            Ok(response) => response,
            Err(error) => {
                if self.shutter.update_status(&error) {
                    self.engine.metrics.increment_shutter_trips();
                }
                BatchResponse::from_error(&error)
            }
        }
    }

    fn timed_out(&mut self, mode: Mode) -> bool {
        self.timer.should_break(mode)
    }

    fn timeout_response(&self) -> BatchResponse {
        self.engine.metrics.add_parts_timed_out(1);
        BatchResponse::from_error(&CoreError::new(codes::SERVER_REQUEST_TIMEOUT))
    }

    /// Write a response for a part that is not buffered.
    fn respond(&mut self, part: &BodyPart, response: BatchResponse) {
        self.flush();
        self.out.write(part, &response);
    }

    fn respond_error(&mut self, part: &BodyPart, error: CoreError) {
        self.respond(part, BatchResponse::from_error(&error));
    }

    fn flush(&mut self) {
        if self.bulk.is_empty() {
            return;
        }
        let engine = self.engine;
        let target = FlushTarget {
            producer: engine.producer.as_ref(),
            writer: engine.writer.as_ref(),
            metrics: engine.metrics.as_ref(),
        };
        let responses = self.bulk.flush(&target, &mut self.timer, &mut self.shutter);
        for (part, response) in &responses {
            self.out.write(part, response);
        }
    }

    fn entity_set_uri(&self, part: &BodyPart) -> String {
        format!("{}/{}", self.collection_uri, part.entity_set_name())
    }

    fn require_entity_set(&self, part: &BodyPart) -> CoreResult<()> {
        self.engine
            .producer
            .find_entity_set(part.entity_set_name())
            .map(|_| ())
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))
    }

    fn target(&self, part: &BodyPart) -> CoreResult<EntityRef> {
        part.entity_key()
            .map(|key| EntityRef::new(part.entity_set_name(), key))
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY))
    }

    fn retrieve(&mut self, part: &BodyPart) -> CoreResult<BatchResponse> {
        self.require_entity_set(part)?;
        self.access.check_read(part.entity_set_name())?;
        if part.has_navigation_property() {
            return Err(CoreError::new(codes::METHOD_NOT_IMPLEMENTED));
        }

        let query = QueryOptions::parse(part.request_query(), &self.engine.config.odata)?;
        let writer = self.engine.writer.as_ref();
        let set_uri = self.entity_set_uri(part);

        let response = BatchResponse::new(StatusCode::OK)
            .with_header("Content-Type", writer.content_type())
            .with_header(DATA_SERVICE_VERSION, ODATA_VERSION);

        match part.entity_key() {
            Some(key) => {
                let entity = self
                    .engine
                    .producer
                    .get_entity(&EntityRef::new(part.entity_set_name(), key), &query)?;
                Ok(response
                    .with_header("ETag", format!("W/\"{}\"", entity.etag))
                    .with_body(writer.render_entity(&set_uri, &entity)))
            }
            None => {
                let list = self
                    .engine
                    .producer
                    .list_entities(part.entity_set_name(), &query)?;
                Ok(response.with_body(writer.render_entities(&set_uri, &list)))
            }
        }
    }

    fn update(&mut self, part: &BodyPart) -> CoreResult<BatchResponse> {
        let entity_type = self
            .engine
            .producer
            .find_entity_set(part.entity_set_name())
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ENTITY_SET))?;
        self.access.check_write(part.entity_set_name())?;
        let target = self.target(part)?;

        let mut document = self.engine.producer.to_document(&entity_type, part.body())?;
        document.id = Some(target.key.clone());
        let etag = self
            .engine
            .producer
            .update_entity(&target, document, part.header("If-Match"))?;

        Ok(BatchResponse::new(StatusCode::NO_CONTENT)
            .with_header("ETag", format!("W/\"{}\"", etag))
            .with_header(DATA_SERVICE_VERSION, ODATA_VERSION))
    }

    fn delete(&mut self, part: &BodyPart) -> CoreResult<BatchResponse> {
        self.require_entity_set(part)?;
        self.access.check_write(part.entity_set_name())?;
        let target = self.target(part)?;
        self.engine
            .producer
            .delete_entity(&target, part.header("If-Match"))?;

        Ok(BatchResponse::new(StatusCode::NO_CONTENT).with_header(DATA_SERVICE_VERSION, ODATA_VERSION))
    }

    /// `POST Set('k')/$links/_Nav` with `{"uri": ".../Target('k2')"}`
    fn create_link(&mut self, part: &BodyPart) -> CoreResult<BatchResponse> {
        self.require_entity_set(part)?;
        self.access.check_write(part.entity_set_name())?;
        if part.target_entity_key().is_some() {
            return Err(CoreError::new(codes::KEY_FOR_NAVPROP_SHOULD_NOT_BE_SPECIFIED));
        }

        let source = self.target(part)?;
        let navigation_property = part
            .navigation_property()
            .ok_or_else(|| CoreError::new(codes::NO_SUCH_ASSOCIATION))?;
        let target = link_target(part.body())?;

        self.engine
            .producer
            .create_link(&source, navigation_property, &target)?;
        Ok(BatchResponse::new(StatusCode::NO_CONTENT).with_header(DATA_SERVICE_VERSION, ODATA_VERSION))
    }
}

fn read_delete_only_allows(method: &Method) -> bool {
    READ_DELETE_ONLY_METHODS.contains(&method.as_str())
}

/// Entity addressed by the `uri` member of a `$links` body
fn link_target(body: &str) -> CoreResult<EntityRef> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| CoreError::new(codes::JSON_PARSE_ERROR).with_cause(e))?;
    let uri = json
        .get("uri")
        .ok_or_else(|| CoreError::new(codes::JSON_PARSE_ERROR))?
        .as_str()
        .ok_or_else(uri_format_error)?;

    let caps = link_uri_pattern()
        .captures(uri.trim())
        .ok_or_else(uri_format_error)?;
    Ok(EntityRef::new(&caps[1], &caps[2]))
}

fn uri_format_error() -> CoreError {
    CoreError::new(codes::REQUEST_FIELD_FORMAT_ERROR).with_params(["uri"])
}
