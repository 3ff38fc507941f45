use super::*;
use crate::core::{
    record_channel, Asset, AssetStats, ConfigurationItem, ConfigurationKind, Entity, Link,
    LinkSide, Provider, ProviderMetadata, ProviderType, Schema, SchemaMap,
};
use crate::diagnostics::DiagnosticKind;
use crate::schema::merge_diffs;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// =============================================================================
// Mock providers
// =============================================================================

#[derive(Clone, Default)]
struct Log {
    writes: Arc<Mutex<Vec<StageRecord>>>,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl Log {
    fn call(&self, name: impl Into<String>) {
        self.calls.lock().unwrap().push(name.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn written_stages(&self) -> Vec<TransferStage> {
        self.writes.lock().unwrap().iter().map(|r| r.stage()).collect()
    }
}

struct MockSource {
    records: BTreeMap<TransferStage, Vec<StageRecord>>,
    version: Option<String>,
    schemas: Option<SchemaMap>,
    log: Log,
}

impl MockSource {
    fn new(log: &Log) -> Self {
        Self {
            records: BTreeMap::new(),
            version: Some("4.15.0".into()),
            schemas: None,
            log: log.clone(),
        }
    }

    fn with(mut self, stage: TransferStage, records: Vec<StageRecord>) -> Self {
        self.records.insert(stage, records);
        self
    }
}

#[async_trait]
impl Provider for MockSource {
    fn name(&self) -> &str {
        "mock-source"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Source
    }

    async fn bootstrap(&mut self) -> Result<()> {
        self.log.call("source.bootstrap");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        Ok(self.version.clone().map(ProviderMetadata::with_version))
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        Ok(self.schemas.clone())
    }
}

#[async_trait]
impl SourceProvider for MockSource {
    async fn stream(&mut self, stage: TransferStage) -> Result<Option<RecordStream>> {
        let Some(records) = self.records.get(&stage).cloned() else {
            return Ok(None);
        };
        let (tx, rx) = record_channel();
        tokio::spawn(async move {
            for record in records {
                if tx.send(Ok(record)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Some(rx))
    }
}

struct MockDestination {
    version: Option<String>,
    schemas: Option<SchemaMap>,
    rejects: Vec<TransferStage>,
    start_failure: Option<TransferStage>,
    write_failures: VecDeque<TransferError>,
    log: Log,
}

impl MockDestination {
    fn new(log: &Log) -> Self {
        Self {
            version: Some("4.15.0".into()),
            schemas: None,
            rejects: Vec::new(),
            start_failure: None,
            write_failures: VecDeque::new(),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Provider for MockDestination {
    fn name(&self) -> &str {
        "mock-destination"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Destination
    }

    async fn bootstrap(&mut self) -> Result<()> {
        self.log.call("destination.bootstrap");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_metadata(&mut self) -> Result<Option<ProviderMetadata>> {
        Ok(self.version.clone().map(ProviderMetadata::with_version))
    }

    async fn get_schemas(&mut self) -> Result<Option<SchemaMap>> {
        Ok(self.schemas.clone())
    }
}

#[async_trait]
impl DestinationProvider for MockDestination {
    async fn before_transfer(&mut self) -> Result<()> {
        self.log.call("destination.before_transfer");
        Ok(())
    }

    async fn after_transfer(&mut self) -> Result<()> {
        self.log.call("destination.after_transfer");
        Ok(())
    }

    async fn start_stage(&mut self, stage: TransferStage) -> Result<bool> {
        if self.start_failure == Some(stage) {
            return Err(TransferError::recoverable(
                ErrorCode::AssetsDirectory,
                "cannot back up uploads",
            ));
        }
        self.log.call(format!("start {}", stage));
        Ok(!self.rejects.contains(&stage))
    }

    async fn write(&mut self, record: StageRecord) -> Result<()> {
        if let Some(err) = self.write_failures.pop_front() {
            return Err(err);
        }
        self.log.writes.lock().unwrap().push(record);
        Ok(())
    }

    async fn finish_stage(&mut self, stage: TransferStage) -> Result<()> {
        self.log.call(format!("finish {}", stage));
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn entity(content_type: &str, id: i64) -> StageRecord {
    StageRecord::Entity(Entity {
        content_type: content_type.into(),
        id,
        data: json!({"title": format!("entry {}", id)}),
    })
}

fn link(id: i64) -> StageRecord {
    let side = |content_type: &str| LinkSide {
        content_type: content_type.into(),
        reference: id,
        field: None,
        pos: None,
    };
    StageRecord::Link(Link {
        kind: "relation.basic".into(),
        relation: "oneToOne".into(),
        left: side("api::article.article"),
        right: side("api::author.author"),
    })
}

fn schema_map(title_type: &str) -> SchemaMap {
    let schema: Schema = serde_json::from_value(json!({
        "uid": "api::article.article",
        "attributes": {"title": {"type": title_type}}
    }))
    .unwrap();
    [(schema.uid.clone(), schema)].into()
}

fn full_source(log: &Log) -> MockSource {
    MockSource::new(log)
        .with(TransferStage::Links, vec![link(1), link(2)])
        .with(
            TransferStage::Entities,
            vec![entity("api::article.article", 1), entity("api::author.author", 1)],
        )
        .with(
            TransferStage::Configuration,
            vec![StageRecord::Configuration(ConfigurationItem {
                kind: ConfigurationKind::Webhook,
                value: json!({"url": "https://example.com/hook"}),
            })],
        )
        .with(
            TransferStage::Media,
            vec![StageRecord::Asset(Asset {
                filename: "cat.png".into(),
                filepath: "uploads/cat.png".into(),
                stats: AssetStats { size: 4 },
                metadata: None,
                data: Bytes::from_static(b"meow"),
            })],
        )
}

fn engine(source: MockSource, destination: MockDestination) -> TransferEngine {
    TransferEngine::new(
        Box::new(source),
        Box::new(destination),
        TransferEngineOptions::default(),
    )
    .unwrap()
}

struct IgnoreErrors;

#[async_trait]
impl ErrorHandler for IgnoreErrors {
    async fn handle(&self, context: &mut ErrorContext, _engine: &EngineHandle) -> Result<()> {
        context.ignore = true;
        Ok(())
    }
}

struct AcceptDiffs;

#[async_trait]
impl SchemaDiffHandler for AcceptDiffs {
    async fn handle(&self, context: &mut SchemaDiffContext, _engine: &EngineHandle) -> Result<()> {
        let diffs = context.diffs.clone();
        merge_diffs(&mut context.ignored_diffs, &diffs);
        Ok(())
    }
}

/// Stands in for a prompt interrupted by a termination signal.
struct AbortingDiffs;

#[async_trait]
impl SchemaDiffHandler for AbortingDiffs {
    async fn handle(&self, _context: &mut SchemaDiffContext, engine: &EngineHandle) -> Result<()> {
        engine.abort_handle().abort();
        Err(TransferError::Aborted)
    }
}

// =============================================================================
// Stage sequencing
// =============================================================================

#[tokio::test]
async fn test_stages_run_in_fixed_order() {
    let log = Log::default();
    let mut engine = engine(full_source(&log), MockDestination::new(&log));

    engine.transfer().await.unwrap();

    let stages = log.written_stages();
    let position = |s: &TransferStage| TransferStage::ORDER.iter().position(|o| o == s).unwrap();
    assert!(stages.windows(2).all(|w| position(&w[0]) <= position(&w[1])));

    let last_entity = stages.iter().rposition(|s| *s == TransferStage::Entities).unwrap();
    let first_link = stages.iter().position(|s| *s == TransferStage::Links).unwrap();
    assert!(last_entity < first_link);
    assert_eq!(engine.status(), EngineStatus::Finished);
}

#[tokio::test]
async fn test_destination_completes_after_last_stage() {
    let log = Log::default();
    let mut engine = engine(full_source(&log), MockDestination::new(&log));

    engine.transfer().await.unwrap();

    let calls = log.calls();
    assert_eq!(calls.last().map(String::as_str), Some("destination.after_transfer"));
    let completions = calls
        .iter()
        .filter(|c| c.as_str() == "destination.after_transfer")
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_three_entities_are_counted() {
    let log = Log::default();
    let source = MockSource::new(&log).with(
        TransferStage::Entities,
        (1..=3).map(|id| entity("api::article.article", id)).collect(),
    );
    let mut engine = engine(source, MockDestination::new(&log));

    let results = engine.transfer().await.unwrap();

    let entities = &results.engine[&TransferStage::Entities];
    assert_eq!(entities.count, 3);
    assert_eq!(entities.status, StageStatus::Finished);
    assert_eq!(entities.aggregates["api::article.article"].count, 3);
    assert_eq!(results.engine[&TransferStage::Links].status, StageStatus::Skipped);
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_only_content_skips_media_and_configuration() {
    let log = Log::default();
    let mut engine = TransferEngine::new(
        Box::new(full_source(&log)),
        Box::new(MockDestination::new(&log)),
        TransferEngineOptions {
            only: vec![TransferGroupFilter::Content],
            ..Default::default()
        },
    )
    .unwrap();

    let results = engine.transfer().await.unwrap();

    assert!(!results.engine.contains_key(&TransferStage::Media));
    assert!(!results.engine.contains_key(&TransferStage::Configuration));
    assert_eq!(results.engine[&TransferStage::Links].count, 2);
}

#[tokio::test]
async fn test_destination_can_decline_a_stage() {
    let log = Log::default();
    let mut destination = MockDestination::new(&log);
    destination.rejects.push(TransferStage::Media);
    let mut engine = engine(full_source(&log), destination);
    let mut progress = engine.subscribe_progress();

    let results = engine.transfer().await.unwrap();

    assert_eq!(results.engine[&TransferStage::Media].status, StageStatus::Skipped);
    assert!(!log.written_stages().contains(&TransferStage::Media));

    let mut skipped = Vec::new();
    while let Ok(event) = progress.try_recv() {
        if let ProgressEvent::StageSkip { stage } = event {
            skipped.push(stage);
        }
    }
    assert!(skipped.contains(&TransferStage::Media));
}

#[tokio::test]
async fn test_transforms_drop_records_before_counting() {
    let log = Log::default();
    let source = MockSource::new(&log).with(
        TransferStage::Entities,
        vec![
            entity("admin::user", 1),
            entity("api::article.article", 1),
            entity("admin::role", 1),
        ],
    );
    let mut engine = TransferEngine::new(
        Box::new(source),
        Box::new(MockDestination::new(&log)),
        TransferEngineOptions {
            transforms: Transforms::ignoring_content_types(DEFAULT_IGNORED_CONTENT_TYPES),
            ..Default::default()
        },
    )
    .unwrap();

    let results = engine.transfer().await.unwrap();

    assert_eq!(results.engine[&TransferStage::Entities].count, 1);
    assert_eq!(log.writes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_progress_event_sequence() {
    let log = Log::default();
    let source = MockSource::new(&log).with(
        TransferStage::Entities,
        vec![entity("api::a.a", 1), entity("api::a.a", 2)],
    );
    let mut engine = engine(source, MockDestination::new(&log));
    let mut rx = engine.subscribe_progress();

    engine.transfer().await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.stage().map_or(true, |s| s == TransferStage::Entities) {
            names.push(event.name());
        }
    }
    assert_eq!(
        names,
        vec![
            "transfer::init",
            "transfer::start",
            "stage::start",
            "stage::progress",
            "stage::progress",
            "stage::finish",
            "transfer::finish",
        ]
    );
}

// =============================================================================
// Validation and integrity
// =============================================================================

#[tokio::test]
async fn test_overlapping_filters_rejected_before_providers() {
    let log = Log::default();
    let result = TransferEngine::new(
        Box::new(full_source(&log)),
        Box::new(MockDestination::new(&log)),
        TransferEngineOptions {
            exclude: vec![TransferGroupFilter::Files],
            only: vec![TransferGroupFilter::Files],
            ..Default::default()
        },
    );

    assert!(matches!(result, Err(TransferError::Validation(_))));
    assert!(log.calls().is_empty());
    assert_eq!(log.closed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_version_mismatch_is_fatal() {
    let log = Log::default();
    let mut destination = MockDestination::new(&log);
    destination.version = Some("4.16.0".into());
    let mut engine = engine(full_source(&log), destination);

    let err = engine.transfer().await.unwrap_err();

    assert!(matches!(err, TransferError::Integrity(_)));
    assert_eq!(engine.status(), EngineStatus::Failed);
    assert!(log.written_stages().is_empty());
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_schema_diff_without_handler_fails_closed() {
    let log = Log::default();
    let mut source = full_source(&log);
    source.schemas = Some(schema_map("string"));
    let mut destination = MockDestination::new(&log);
    destination.schemas = Some(schema_map("text"));
    let mut engine = engine(source, destination);

    let err = engine.bootstrap().await.unwrap_err();

    assert!(matches!(err, TransferError::Integrity(_)));
    assert!(!log.calls().contains(&"destination.before_transfer".to_string()));
}

#[tokio::test]
async fn test_schema_diff_accepted_by_handler() {
    let log = Log::default();
    let mut source = full_source(&log);
    source.schemas = Some(schema_map("string"));
    let mut destination = MockDestination::new(&log);
    destination.schemas = Some(schema_map("text"));
    let mut engine = engine(source, destination);
    engine.add_schema_diff_handler(AcceptDiffs);

    engine.bootstrap().await.unwrap();
    engine.bootstrap().await.unwrap();

    assert_eq!(engine.status(), EngineStatus::Bootstrapped);
    let bootstraps = log
        .calls()
        .iter()
        .filter(|c| c.as_str() == "source.bootstrap")
        .count();
    assert_eq!(bootstraps, 1);
}

#[tokio::test]
async fn test_abort_from_diff_handler_closes_providers() {
    let log = Log::default();
    let mut source = full_source(&log);
    source.schemas = Some(schema_map("string"));
    let mut destination = MockDestination::new(&log);
    destination.schemas = Some(schema_map("text"));
    let mut engine = engine(source, destination);
    engine.add_schema_diff_handler(AbortingDiffs);

    let err = engine.transfer().await.unwrap_err();

    assert!(matches!(err, TransferError::Aborted));
    assert_eq!(engine.status(), EngineStatus::Aborted);
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
    assert!(log.written_stages().is_empty());
}

// =============================================================================
// Errors, retries and abort
// =============================================================================

#[tokio::test]
async fn test_retryable_write_is_retried() {
    let log = Log::default();
    let source = MockSource::new(&log).with(TransferStage::Entities, vec![entity("api::a.a", 1)]);
    let mut destination = MockDestination::new(&log);
    destination.write_failures = VecDeque::from(vec![
        TransferError::stage_integrity(TransferStage::Entities, "disk busy"),
        TransferError::stage_integrity(TransferStage::Entities, "disk busy"),
    ]);
    let mut engine = engine(source, destination);

    let results = engine.transfer().await.unwrap();

    assert_eq!(results.engine[&TransferStage::Entities].count, 1);
}

#[tokio::test]
async fn test_retry_exhaustion_escalates() {
    let log = Log::default();
    let source = MockSource::new(&log).with(TransferStage::Entities, vec![entity("api::a.a", 1)]);
    let mut destination = MockDestination::new(&log);
    destination.write_failures = (0..5)
        .map(|_| TransferError::stage_integrity(TransferStage::Entities, "disk busy"))
        .collect();
    let mut engine = TransferEngine::new(
        Box::new(source),
        Box::new(destination),
        TransferEngineOptions {
            max_retries: 1,
            ..Default::default()
        },
    )
    .unwrap();

    let err = engine.transfer().await.unwrap_err();

    assert!(matches!(
        err,
        TransferError::Transfer {
            stage: TransferStage::Entities,
            ..
        }
    ));
    assert_eq!(engine.results().engine[&TransferStage::Entities].status, StageStatus::Error);
}

#[tokio::test]
async fn test_non_retryable_write_fails_fast() {
    let log = Log::default();
    let source = MockSource::new(&log).with(TransferStage::Entities, vec![entity("api::a.a", 1)]);
    let mut destination = MockDestination::new(&log);
    destination.write_failures = VecDeque::from(vec![TransferError::transfer(
        TransferStage::Entities,
        "duplicate entry",
    )]);
    let mut engine = engine(source, destination);
    let mut progress = engine.subscribe_progress();

    assert!(engine.transfer().await.is_err());

    let mut saw_stage_error = false;
    let mut last = None;
    while let Ok(event) = progress.try_recv() {
        saw_stage_error |= matches!(event, ProgressEvent::StageError { .. });
        last = Some(event);
    }
    assert!(saw_stage_error);
    assert!(matches!(last, Some(ProgressEvent::TransferError { .. })));
}

#[tokio::test]
async fn test_recoverable_error_ignored_by_handler() {
    let log = Log::default();
    let mut destination = MockDestination::new(&log);
    destination.start_failure = Some(TransferStage::Media);
    let mut engine = engine(full_source(&log), destination);
    engine.add_error_handler(ErrorCode::AssetsDirectory, IgnoreErrors);
    let mut diagnostics = engine.subscribe_diagnostics();

    let results = engine.transfer().await.unwrap();

    assert_eq!(results.engine[&TransferStage::Media].status, StageStatus::Skipped);
    assert_eq!(results.engine[&TransferStage::Entities].count, 2);

    let mut warned = false;
    while let Ok(d) = diagnostics.try_recv() {
        warned |= d.kind == DiagnosticKind::Warning && d.message().contains("ASSETS_DIRECTORY_ERR");
    }
    assert!(warned);
}

#[tokio::test]
async fn test_recoverable_error_without_handler_is_fatal() {
    let log = Log::default();
    let mut destination = MockDestination::new(&log);
    destination.start_failure = Some(TransferStage::Media);
    let mut engine = engine(full_source(&log), destination);

    let err = engine.transfer().await.unwrap_err();

    assert!(matches!(err, TransferError::Recoverable { .. }));
    assert_eq!(engine.status(), EngineStatus::Failed);
    assert!(!log.calls().contains(&"destination.after_transfer".to_string()));
}

#[tokio::test]
async fn test_abort_twice_is_noop() {
    let log = Log::default();
    let mut engine = engine(full_source(&log), MockDestination::new(&log));

    engine.abort_transfer().await;
    engine.abort_transfer().await;

    assert_eq!(engine.status(), EngineStatus::Aborted);
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);

    let err = engine.transfer().await.unwrap_err();
    assert!(matches!(err, TransferError::Aborted));
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
    assert!(log.written_stages().is_empty());
}

#[tokio::test]
async fn test_abort_during_transfer_stops_between_records() {
    let log = Log::default();
    let source = MockSource::new(&log).with(
        TransferStage::Entities,
        (1..=100).map(|id| entity("api::a.a", id)).collect(),
    );
    let mut engine = TransferEngine::new(
        Box::new(source),
        Box::new(MockDestination::new(&log)),
        TransferEngineOptions {
            throttle: Some(Duration::from_millis(10)),
            ..Default::default()
        },
    )
    .unwrap();
    let abort = engine.abort_handle();
    let mut progress = engine.subscribe_progress();

    let (result, _) = tokio::join!(engine.transfer(), async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        abort.abort();
        abort.abort();
    });

    assert!(matches!(result, Err(TransferError::Aborted)));
    assert_eq!(engine.status(), EngineStatus::Aborted);
    assert!(log.written_stages().len() < 100);
    assert_eq!(log.closed.load(Ordering::SeqCst), 2);
    assert!(!log.calls().contains(&"destination.after_transfer".to_string()));

    let mut last = None;
    while let Ok(event) = progress.try_recv() {
        last = Some(event);
    }
    assert_eq!(last, Some(ProgressEvent::TransferAbort));
}
