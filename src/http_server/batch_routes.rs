//! `$batch` HTTP route
//!
//! Thin adapter over [`BatchEngine`]: extracts the boundary, caller and
//! priority from the request, runs the batch on a blocking worker and
//! writes the `202 Accepted` envelope.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

use crate::batch::{
    boundary_of, BatchEngine, BatchInput, BatchOutput, Priority, DATA_SERVICE_VERSION,
    ODATA_VERSION, PRIORITY_HEADER,
};
use crate::config::UnitConfig;
use crate::errors::{codes, CoreError, CoreResult};
use crate::observability::BatchMetrics;
use crate::odata::{AccessChecker, AccessContext, BoxAclChecker, MemoryStore};

/// Shared state of the batch endpoint
pub struct BatchState {
    pub config: Arc<UnitConfig>,
    pub store: Arc<MemoryStore>,
    pub metrics: Arc<BatchMetrics>,
    pub checker: Arc<dyn AccessChecker>,
}

impl BatchState {
    pub fn new(config: Arc<UnitConfig>, store: Arc<MemoryStore>) -> Self {
        Self {
            config,
            store,
            metrics: Arc::new(BatchMetrics::new()),
            checker: Arc::new(BoxAclChecker),
        }
    }
}

/// Target collection of one request
struct CollectionPath {
    cell: String,
    box_name: String,
    collection: String,
}

pub fn batch_routes(state: Arc<BatchState>) -> Router {
    Router::new()
        .route("/:cell/:box/:collection/$batch", post(batch_handler))
        .with_state(state)
}

async fn batch_handler(
    State(state): State<Arc<BatchState>>,
    Path((cell, box_name, collection)): Path<(String, String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = CollectionPath {
        cell,
        box_name,
        collection,
    };
    match run_batch(state, path, uri, headers, body).await {
        Ok(output) => (
            StatusCode::ACCEPTED,
            [
                (header::CONTENT_TYPE.as_str(), output.content_type()),
                (DATA_SERVICE_VERSION, ODATA_VERSION.to_string()),
            ],
            output.body,
        )
            .into_response(),
        Err(error) => error.into_response(),
    }
}

async fn run_batch(
    state: Arc<BatchState>,
    path: CollectionPath,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> CoreResult<BatchOutput> {
    let boundary = header_value(&headers, header::CONTENT_TYPE.as_str())
        .filter(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/mixed"))
        .and_then(boundary_of)
        .map(str::to_string)
        .ok_or_else(|| CoreError::new(codes::BATCH_BODY_PARSE_ERROR))?;

    let body = String::from_utf8(body.to_vec())
        .map_err(|e| CoreError::new(codes::BATCH_BODY_PARSE_ERROR).with_cause(e))?;

    let base = base_uri(&headers);
    let request_uri = format!("{}{}", base, uri.path());
    let context = access_context(&state.config, &headers, &format!("{}/{}/", base, path.cell))?;
    let priority = Priority::from_header(header_value(&headers, PRIORITY_HEADER));

    let producer = state
        .store
        .producer(&path.cell, &path.box_name, &path.collection);
    let engine = BatchEngine::new(Arc::new(producer), state.config.clone())
        .with_access_checker(state.checker.clone())
        .with_metrics(state.metrics.clone());

    tokio::task::spawn_blocking(move || {
        engine.process_batch(BatchInput {
            request_uri: &request_uri,
            boundary: &boundary,
            body: &body,
            priority,
            context,
        })
    })
    .await
    .map_err(CoreError::unknown)?
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `scheme://host` of the request as the client addressed it
fn base_uri(headers: &HeaderMap) -> String {
    let scheme = header_value(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_value(headers, header::HOST.as_str()).unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

/// Credentials are not validated here; a present `Authorization` header
/// stands for an authenticated account.
fn access_context(config: &UnitConfig, headers: &HeaderMap, realm: &str) -> CoreResult<AccessContext> {
    let credentials = header_value(headers, header::AUTHORIZATION.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match credentials {
        None => {
            let privileges = config.access.anonymous().map_err(CoreError::unknown)?;
            Ok(AccessContext::anonymous(realm, privileges))
        }
        Some(value) => {
            let scheme = value.split_whitespace().next().unwrap_or("token");
            let privileges = config.access.authenticated().map_err(CoreError::unknown)?;
            Ok(AccessContext::account(scheme.to_ascii_lowercase(), realm, privileges))
        }
    }
}
