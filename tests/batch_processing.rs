//! End-to-end batch processing tests
//!
//! Drives the batch engine against the in-memory store, and against a
//! scripted producer that moves a manual clock on every storage call.
//!
//! Test Categories:
//! 1. Ordering and framing
//! 2. In-batch duplicate detection
//! 3. Shutter behaviour after resource exhaustion
//! 4. Deadline handling
//! 5. Whole-batch rejections
//! 6. Links and navigation creates

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cellbatch::batch::{
    BatchEngine, BatchInput, BatchOutput, BatchRequestWriter, ManualClock, Priority, SubRequest,
};
use cellbatch::config::UnitConfig;
use cellbatch::errors::{codes, CoreResult};
use cellbatch::odata::{
    AccessContext, Entity, EntityDocument, EntityList, EntityProducer, EntityRef, MemoryProducer,
    MemoryStore, NavigationCreate, Privilege, QueryOptions,
};
use cellbatch::schema::{EntityType, ODataSchema};

const BATCH_URI: &str = "http://localhost/cell/box/col/$batch";
const BOUNDARY: &str = "batch_test";

fn schema() -> ODataSchema {
    ODataSchema::new(vec![
        EntityType::new("Sales", "t-sales").with_navigation("Supplier"),
        EntityType::new("Supplier", "t-supplier"),
    ])
}

fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(schema(), Duration::from_millis(20)))
}

fn engine(store: &Arc<MemoryStore>, config: UnitConfig) -> BatchEngine {
    BatchEngine::new(
        Arc::new(store.producer("cell", "box", "col")),
        Arc::new(config),
    )
}

fn caller(privileges: Vec<Privilege>) -> AccessContext {
    AccessContext::account("tester", "http://localhost/cell/", privileges)
}

fn run_as(engine: &BatchEngine, context: AccessContext, body: &str) -> CoreResult<BatchOutput> {
    engine.process_batch(BatchInput {
        request_uri: BATCH_URI,
        boundary: BOUNDARY,
        body,
        priority: Priority::High,
        context,
    })
}

fn run(engine: &BatchEngine, body: &str) -> CoreResult<BatchOutput> {
    run_as(engine, caller(vec![Privilege::All]), body)
}

fn batch(requests: &[SubRequest]) -> String {
    requests
        .iter()
        .fold(BatchRequestWriter::new(BOUNDARY), |writer, r| writer.request(r))
        .finish()
}

/// Status codes of the rendered parts, in order
fn statuses(output: &BatchOutput) -> Vec<u16> {
    output
        .body
        .lines()
        .filter_map(|line| line.strip_prefix("HTTP/1.1 "))
        .map(|rest| rest[..3].parse().unwrap())
        .collect()
}

// =============================================================================
// ORDERING AND FRAMING
// =============================================================================

/// Test: every parsed part gets exactly one response, in request order.
#[test]
fn test_mixed_batch_answers_in_order() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"a","amount":1}"#),
        SubRequest::post_json("Sales", r#"{"__id":"b","amount":2}"#),
        SubRequest::get("Sales('a')"),
        SubRequest::put_json("Sales('a')", r#"{"amount":10}"#).with_header("If-Match", "*"),
        SubRequest::delete("Sales('b')"),
        SubRequest::get("Sales('b')"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(output.parts, 6);
    assert_eq!(statuses(&output), vec![201, 201, 200, 204, 204, 404]);
    assert!(output.body.contains("Location: http://localhost/cell/box/col/Sales('a')"));
    assert!(output.body.contains("DataServiceVersion: 2.0"));
    assert!(output.body.ends_with("--batch_test--"));

    let stored = store
        .producer("cell", "box", "col")
        .get_entity(
            &EntityRef::new("Sales", "a"),
            &QueryOptions::defaults(&UnitConfig::default().odata),
        )
        .unwrap();
    assert_eq!(stored.properties["amount"], 10);
}

/// Test: changeset parts are answered inside the same changeset boundary.
#[test]
fn test_changeset_framing_preserved() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = BatchRequestWriter::new(BOUNDARY)
        .request(&SubRequest::get("Sales"))
        .changeset(
            "changeset_a",
            &[
                SubRequest::post_json("Sales", r#"{"__id":"1"}"#),
                SubRequest::post_json("Sales", r#"{"__id":"2"}"#),
            ],
        )
        .finish();

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![200, 201, 201]);
    assert!(output
        .body
        .contains("--batch_test\nContent-Type: multipart/mixed; boundary=changeset_a\n\n--changeset_a\n"));
    assert!(output.body.contains("--changeset_a--\n\n--batch_test--"));
}

/// Test: list options are honored and expression options reach the store.
#[test]
fn test_list_query_options() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"1"}"#),
        SubRequest::post_json("Sales", r#"{"__id":"2"}"#),
        SubRequest::get("Sales?$top=1&$inlinecount=allpages"),
        SubRequest::get("Sales?$filter=amount%20eq%201"),
        SubRequest::get("Sales?$bogus=1"),
        SubRequest::get("Unknown"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 201, 200, 501, 400, 404]);
    assert!(output.body.contains(r#""__count":"2""#));
}

/// Test: a stale If-Match is refused.
#[test]
fn test_update_with_stale_etag() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"e"}"#),
        SubRequest::put_json("Sales('e')", "{}").with_header("If-Match", "W/\"9-0\""),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 412]);
    assert!(output.body.contains(codes::ETAG_NOT_MATCH));
}

// =============================================================================
// IN-BATCH DUPLICATE DETECTION
// =============================================================================

/// Test: the first create of a key wins, the second conflicts.
#[test]
fn test_duplicate_key_first_wins() {
    for (first, second, kept) in [("1", "2", 1), ("2", "1", 2)] {
        let store = store();
        let engine = engine(&store, UnitConfig::for_tests());
        let body = batch(&[
            SubRequest::post_json("Sales", format!(r#"{{"__id":"dup","v":{}}}"#, first)),
            SubRequest::post_json("Sales", format!(r#"{{"__id":"dup","v":{}}}"#, second)),
            SubRequest::get("Sales('dup')"),
        ]);

        let output = run(&engine, &body).unwrap();
        assert_eq!(statuses(&output), vec![201, 409, 200]);
        assert!(output.body.contains(codes::ENTITY_ALREADY_EXISTS));

        let stored = store
            .producer("cell", "box", "col")
            .get_entity(
                &EntityRef::new("Sales", "dup"),
                &QueryOptions::defaults(&UnitConfig::default().odata),
            )
            .unwrap();
        assert_eq!(stored.properties["v"], kept);
    }
}

/// Test: the same key in different entity types does not conflict.
#[test]
fn test_same_key_in_different_sets() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"k"}"#),
        SubRequest::post_json("Supplier", r#"{"__id":"k"}"#),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 201]);
}

// =============================================================================
// SHUTTER
// =============================================================================

/// Test: after the store reports too many concurrent requests, later writes
/// are refused without being attempted and reads still run.
#[test]
fn test_shutter_after_resource_exhaustion() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::get("Sales"),
        SubRequest::post_json("Sales", r#"{"__id":"x"}"#),
        SubRequest::post_json("Sales", r#"{"__id":"y"}"#),
        SubRequest::put_json("Sales('x')", "{}"),
        SubRequest::get("Sales('x')"),
        SubRequest::delete("Sales('x')"),
    ]);

    let lock = store.cell_lock("cell").unwrap();
    let output = {
        let _held = lock.lock().unwrap();
        run(&engine, &body).unwrap()
    };

    assert_eq!(statuses(&output), vec![200, 503, 503, 503, 404, 503]);
    assert!(output.body.contains(codes::TOO_MANY_CONCURRENT_REQUESTS));

    let metrics = engine.metrics().snapshot();
    assert_eq!(metrics.shutter_trips, 1);
    assert_eq!(metrics.parts_shuttered, 2);
    assert_eq!(metrics.batches_processed, 1);
}

/// Test: a new batch starts with an open shutter.
#[test]
fn test_shutter_is_scoped_to_one_batch() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[SubRequest::post_json("Sales", r#"{"__id":"z"}"#)]);

    let lock = store.cell_lock("cell").unwrap();
    {
        let _held = lock.lock().unwrap();
        assert_eq!(statuses(&run(&engine, &body).unwrap()), vec![503]);
    }
    assert_eq!(statuses(&run(&engine, &body).unwrap()), vec![201]);
}

// =============================================================================
// DEADLINE
// =============================================================================

/// Delegates to the in-memory store; every storage call costs `step` on
/// the manual clock.
struct SlowProducer {
    inner: MemoryProducer,
    clock: ManualClock,
    step: Duration,
    calls: AtomicUsize,
}

impl SlowProducer {
    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.clock.advance(self.step);
    }
}

impl EntityProducer for SlowProducer {
    fn find_entity_set(&self, name: &str) -> Option<EntityType> {
        self.inner.find_entity_set(name)
    }

    fn create_entity(&self, document: EntityDocument) -> CoreResult<Entity> {
        self.tick();
        self.inner.create_entity(document)
    }

    fn get_entity(&self, target: &EntityRef, query: &QueryOptions) -> CoreResult<Entity> {
        self.tick();
        self.inner.get_entity(target, query)
    }

    fn list_entities(&self, entity_set: &str, query: &QueryOptions) -> CoreResult<EntityList> {
        self.tick();
        self.inner.list_entities(entity_set, query)
    }

    fn update_entity(
        &self,
        target: &EntityRef,
        document: EntityDocument,
        if_match: Option<&str>,
    ) -> CoreResult<String> {
        self.tick();
        self.inner.update_entity(target, document, if_match)
    }

    fn delete_entity(&self, target: &EntityRef, if_match: Option<&str>) -> CoreResult<()> {
        self.tick();
        self.inner.delete_entity(target, if_match)
    }

    fn create_link(
        &self,
        source: &EntityRef,
        navigation_property: &str,
        target: &EntityRef,
    ) -> CoreResult<()> {
        self.tick();
        self.inner.create_link(source, navigation_property, target)
    }

    fn bulk_create(&self, documents: Vec<EntityDocument>) -> CoreResult<Vec<CoreResult<Entity>>> {
        self.tick();
        self.inner.bulk_create(documents)
    }

    fn bulk_create_via_navigation(
        &self,
        requests: Vec<NavigationCreate>,
    ) -> CoreResult<Vec<CoreResult<Entity>>> {
        self.tick();
        self.inner.bulk_create_via_navigation(requests)
    }
}

/// Test: once the deadline passes, every remaining part, buffered creates
/// included, is answered with 408 and storage is not called again.
#[test]
fn test_deadline_times_out_remaining_parts() {
    let store = store();
    let clock = ManualClock::new();
    let producer = Arc::new(SlowProducer {
        inner: store.producer("cell", "box", "col"),
        clock: clock.clone(),
        step: Duration::from_millis(600),
        calls: AtomicUsize::new(0),
    });
    // for_tests() allows 1000 ms per batch
    let engine = BatchEngine::new(producer.clone(), Arc::new(UnitConfig::for_tests()))
        .with_clock(Arc::new(clock.clone()));

    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"a"}"#),
        SubRequest::get("Sales('a')"),
        SubRequest::put_json("Sales('a')", "{}"),
        SubRequest::post_json("Sales", r#"{"__id":"b"}"#),
        SubRequest::get("Sales"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 200, 408, 408, 408]);
    assert!(output.body.contains(codes::SERVER_REQUEST_TIMEOUT));
    assert_eq!(producer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.metrics().snapshot().parts_timed_out, 3);
}

/// Test: low priority batches yield between writes; high priority ones do not.
#[test]
fn test_low_priority_batch_yields() {
    let store = store();
    let clock = ManualClock::new();
    let producer = Arc::new(SlowProducer {
        inner: store.producer("cell", "box", "col"),
        clock: clock.clone(),
        step: Duration::from_millis(150),
        calls: AtomicUsize::new(0),
    });
    let engine = BatchEngine::new(producer, Arc::new(UnitConfig::for_tests()))
        .with_clock(Arc::new(clock.clone()));
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"a"}"#),
        SubRequest::delete("Sales('a')"),
    ]);

    let run_with = |priority| {
        engine
            .process_batch(BatchInput {
                request_uri: BATCH_URI,
                boundary: BOUNDARY,
                body: &body,
                priority,
                context: caller(vec![Privilege::All]),
            })
            .unwrap()
    };

    run_with(Priority::High);
    assert!(clock.sleeps().is_empty());

    let output = run_with(Priority::Low);
    assert_eq!(statuses(&output), vec![201, 204]);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(10)]);
}

// =============================================================================
// WHOLE-BATCH REJECTIONS
// =============================================================================

/// Test: nested changesets reject the batch before any part runs.
#[test]
fn test_nested_changeset_rejected() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = "--batch_test\n\
                Content-Type: multipart/mixed; boundary=cs1\n\n\
                --cs1\n\
                Content-Type: multipart/mixed; boundary=cs2\n\n\
                --cs2\n\
                Content-Type: application/http\n\n\
                POST Sales HTTP/1.1\n\n\
                {\"__id\":\"n\"}\n\
                --cs2--\n\
                --cs1--\n\
                --batch_test--";

    let err = run(&engine, body).unwrap_err();
    assert!(err.is(codes::BATCH_BODY_FORMAT_CHANGESET_NEST_ERROR));
    assert_eq!(err.status().as_u16(), 400);
    assert!(store
        .producer("cell", "box", "col")
        .get_entity(
            &EntityRef::new("Sales", "n"),
            &QueryOptions::defaults(&UnitConfig::default().odata)
        )
        .is_err());
}

/// Test: the $top total over all GET parts is capped.
#[test]
fn test_cumulative_top_limit() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[SubRequest::get("Sales?$top=60"), SubRequest::get("Sales?$top=60")]);

    let err = run(&engine, &body).unwrap_err();
    assert!(err.is(codes::BATCH_TOTAL_TOP_COUNT_LIMITATION_EXCEEDED));
    assert_eq!(engine.metrics().snapshot().batches_rejected, 1);
}

/// Test: more parts than allowed names the count.
#[test]
fn test_too_many_parts() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let requests: Vec<SubRequest> = (0..21).map(|_| SubRequest::get("Sales")).collect();

    let err = run(&engine, &batch(&requests)).unwrap_err();
    assert!(err.is(codes::TOO_MANY_REQUESTS));
    assert!(err.message().contains("21"));
}

/// Test: an envelope without parts is a parse error.
#[test]
fn test_empty_batch_rejected() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let err = run(&engine, "--batch_test\n--batch_test--").unwrap_err();
    assert!(err.is(codes::BATCH_BODY_PARSE_ERROR));
}

/// Test: anonymous callers without privileges get 401 with a realm.
#[test]
fn test_anonymous_caller_rejected() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[SubRequest::get("Sales")]);

    let err = run_as(
        &engine,
        AccessContext::anonymous("http://localhost/cell/", Vec::new()),
        &body,
    )
    .unwrap_err();
    assert!(err.is(codes::AUTHORIZATION_REQUIRED));
    assert_eq!(err.realm(), Some("http://localhost/cell/"));
}

/// Test: a read-only caller may read but every write part is refused.
#[test]
fn test_read_privilege_only() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", "{}"),
        SubRequest::get("Sales"),
        SubRequest::delete("Sales('x')"),
    ]);

    let output = run_as(&engine, caller(vec![Privilege::Read]), &body).unwrap();
    assert_eq!(statuses(&output), vec![403, 200, 403]);
}

/// Test: read/delete-only maintenance mode refuses creates and updates.
#[test]
fn test_read_delete_only_mode() {
    let store = store();
    let config = UnitConfig {
        read_delete_only_mode: true,
        ..UnitConfig::for_tests()
    };
    let engine = engine(&store, config);
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"r"}"#),
        SubRequest::get("Sales"),
        SubRequest::put_json("Sales('r')", "{}"),
        SubRequest::delete("Sales('r')"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![503, 200, 503, 404]);
    assert!(output.body.contains(codes::READ_DELETE_ONLY));
}

// =============================================================================
// LINKS AND NAVIGATION
// =============================================================================

/// Test: links are created once, refused twice, and only POST is served.
#[test]
fn test_links() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let link = r#"{"uri":"http://localhost/cell/box/col/Supplier('p')"}"#;
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"s"}"#),
        SubRequest::post_json("Supplier", r#"{"__id":"p"}"#),
        SubRequest::post_json("Sales('s')/$links/_Supplier", link),
        SubRequest::post_json("Sales('s')/$links/_Supplier", link),
        SubRequest::get("Sales('s')/$links/_Supplier"),
        SubRequest::post_json("Sales('s')/$links/_Supplier('p')", link),
        SubRequest::post_json("Sales('s')/$links/_Supplier", r#"{"uri":"Nowhere"}"#),
        SubRequest::post_json("Sales('s')/$links/_Supplier", "{}"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 201, 204, 409, 501, 400, 400, 400]);
    assert!(output.body.contains(codes::CONFLICT_LINKS));
    assert!(output.body.contains(codes::KEY_FOR_NAVPROP_SHOULD_NOT_BE_SPECIFIED));
    assert!(output.body.contains(codes::REQUEST_FIELD_FORMAT_ERROR));
    assert!(output.body.contains(codes::JSON_PARSE_ERROR));
}

/// Test: creates through a navigation property are buffered separately
/// from plain creates and land in the target set.
#[test]
fn test_navigation_create() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"s"}"#),
        SubRequest::post_json("Sales('s')/_Supplier", r#"{"__id":"p2"}"#),
        SubRequest::post_json("Sales('s')/_Supplier('p3')", r#"{"__id":"p3"}"#),
        SubRequest::get("Supplier('p2')"),
        SubRequest::get("Sales('s')/_Supplier"),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 201, 400, 200, 501]);
    assert!(output
        .body
        .contains("Location: http://localhost/cell/box/col/Supplier('p2')"));
}

/// Test: PUT and DELETE on a navigation path are rejected before any part
/// runs, and the parent entities stay untouched.
#[test]
fn test_navigation_path_writes_rejected() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let setup = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"a","amount":1}"#),
        SubRequest::post_json("Sales", r#"{"__id":"b","amount":2}"#),
    ]);
    assert_eq!(statuses(&run(&engine, &setup).unwrap()), vec![201, 201]);

    for request in [
        SubRequest::put_json("Sales('a')/_Supplier", r#"{"amount":999}"#).with_header("If-Match", "*"),
        SubRequest::delete("Sales('b')/_Supplier"),
    ] {
        let err = run(&engine, &batch(&[request])).unwrap_err();
        assert!(err.is(codes::BATCH_BODY_FORMAT_PATH_ERROR));
    }

    let check = batch(&[SubRequest::get("Sales('a')"), SubRequest::get("Sales('b')")]);
    let output = run(&engine, &check).unwrap();
    assert_eq!(statuses(&output), vec![200, 200]);
    assert!(output.body.contains(r#""amount":1"#));
    assert!(output.body.contains(r#""amount":2"#));
}

/// Test: a `$links` target may name the entity set without the underscore.
#[test]
fn test_links_target_set_name() {
    let store = store();
    let engine = engine(&store, UnitConfig::for_tests());
    let link = r#"{"uri":"http://localhost/cell/box/col/Supplier('p')"}"#;
    let body = batch(&[
        SubRequest::post_json("Sales", r#"{"__id":"s"}"#),
        SubRequest::post_json("Supplier", r#"{"__id":"p"}"#),
        SubRequest::post_json("Sales('s')/$links/Supplier", link),
        SubRequest::post_json("Sales('s')/$links/_Supplier", link),
    ]);

    let output = run(&engine, &body).unwrap();
    assert_eq!(statuses(&output), vec![201, 201, 204, 409]);
}
