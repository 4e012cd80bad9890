//! End-to-end ingestion against the SQLite backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use triplesink_core::checkpoint::CheckpointStore;
use triplesink_core::pipeline::{shutdown_channel, IngestionPipeline, PipelineConfig, PipelineReport};
use triplesink_core::retry::RetryConfig;
use triplesink_core::store::{SpacePartitioner, TripleStore};
use triplesink_core::stream::{RawEntry, StreamBatch, StreamMessage, VecSource};
use triplesink_core::types::ColumnType;
use triplesink_core::{Cursor, RelationRegistry, SinkError, TypeResolver};
use triplesink_storage::SqliteStore;

const SPACE: &str = "0xSpace";
const SCHEMA: &str = "0xspace";

fn config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        },
        ..Default::default()
    }
}

fn edge(e: &str, a: &str, v: &str) -> serde_json::Value {
    json!({"type": "createTriple", "entityId": e, "attributeId": a,
           "value": {"type": "entity", "id": v}})
}

fn text(e: &str, a: &str, id: &str, value: &str) -> serde_json::Value {
    json!({"type": "createTriple", "entityId": e, "attributeId": a,
           "value": {"type": "string", "id": id, "value": value}})
}

fn at(token: &str, block: u64, actions: Vec<serde_json::Value>) -> StreamMessage {
    StreamMessage::Batch(StreamBatch {
        position: Cursor::new(token, block),
        entries: vec![RawEntry {
            space: SPACE.into(),
            author: "0xAuthor".into(),
            payload: json!({"type": "root", "version": "1", "actions": actions}),
        }],
    })
}

fn batch(block: u64, actions: Vec<serde_json::Value>) -> StreamMessage {
    at(&block.to_string(), block, actions)
}

fn undo(token: &str, block: u64) -> StreamMessage {
    StreamMessage::Undo {
        last_valid: Cursor::new(token, block),
    }
}

async fn ingest(
    store: &Arc<SqliteStore>,
    messages: Vec<StreamMessage>,
    config: PipelineConfig,
) -> Result<PipelineReport, SinkError> {
    let (_tx, rx) = shutdown_channel();
    let mut pipeline = IngestionPipeline::new(
        store.clone(),
        VecSource::new(messages),
        Arc::new(RelationRegistry::default()),
        config,
    );
    pipeline.run(rx).await
}

async fn values(store: &SqliteStore, entity: &str, attribute: &str) -> Vec<String> {
    store
        .triples_by_entity_attribute(entity, attribute)
        .await
        .unwrap()
}

#[tokio::test]
async fn committed_position_replays_as_noop() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    assert_eq!(store.get_cursor().await.unwrap().token, "");

    let stream = vec![batch(
        100,
        vec![edge("1", "a", "x"), edge("1", "b", "y"), edge("2", "a", "x")],
    )];
    ingest(&store, stream.clone(), config()).await.unwrap();
    assert_eq!(store.get_cursor().await.unwrap().token, "100");
    assert_eq!(store.triple_count().await.unwrap(), 3);

    let report = ingest(&store, stream, config()).await.unwrap();
    assert_eq!(report.batches_applied, 0);
    assert_eq!(store.get_cursor().await.unwrap().token, "100");
    assert_eq!(store.triple_count().await.unwrap(), 3);
}

#[tokio::test]
async fn reapplying_known_facts_is_idempotent() {
    let facts = || {
        vec![
            text("1", "name", "n1", "Goal A"),
            edge("2", "parent", "1"),
            edge("2", "type", "subgoal-type"),
        ]
    };

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(&store, vec![batch(1, facts())], config()).await.unwrap();
    let count = store.triple_count().await.unwrap();

    // The same facts published again at later positions change nothing.
    let report = ingest(&store, vec![batch(2, facts()), batch(3, facts())], config())
        .await
        .unwrap();
    assert_eq!(report.batches_applied, 2);
    assert_eq!(store.triple_count().await.unwrap(), count);
    assert_eq!(store.get_cursor().await.unwrap().block_number, 3);
    assert_eq!(
        store.extension_rows(SPACE, "subgoal-type").await.unwrap(),
        vec!["2".to_string()]
    );
    assert_eq!(
        store.entities_by_attribute_value("parent", "1").await.unwrap(),
        vec!["2".to_string()]
    );
}

#[tokio::test]
async fn interrupted_run_resumes_to_the_same_state() {
    let stream = vec![
        batch(1, vec![edge("1", "a", "x")]),
        batch(2, vec![edge("2", "a", "x")]),
        batch(3, vec![edge("3", "a", "x")]),
        batch(4, vec![edge("4", "type", "Goal")]),
    ];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sink.db");
    let path = path.to_str().unwrap();
    {
        let store = Arc::new(SqliteStore::open(path, 2).await.unwrap());
        let partial = PipelineConfig {
            stop_at: Some(2),
            ..config()
        };
        ingest(&store, stream.clone(), partial).await.unwrap();
        assert_eq!(store.get_cursor().await.unwrap().block_number, 2);
    }

    let resumed = Arc::new(SqliteStore::open(path, 2).await.unwrap());
    let report = ingest(&resumed, stream.clone(), config()).await.unwrap();
    assert_eq!(report.batches_applied, 2);

    let full = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(&full, stream, config()).await.unwrap();

    assert_eq!(
        resumed.get_cursor().await.unwrap(),
        full.get_cursor().await.unwrap()
    );
    assert_eq!(
        resumed.triple_count().await.unwrap(),
        full.triple_count().await.unwrap()
    );
    assert_eq!(
        resumed.entities_by_attribute_value("a", "x").await.unwrap(),
        full.entities_by_attribute_value("a", "x").await.unwrap()
    );
    assert_eq!(
        resumed.extension_rows(SPACE, "Goal").await.unwrap(),
        vec!["4".to_string()]
    );
}

#[tokio::test]
async fn subgoal_resolves_through_type_and_parent() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(
        &store,
        vec![batch(
            1,
            vec![
                text("1", "name", "n1", "Goal A"),
                text("2", "name", "n2", "Subgoal B"),
                edge("2", "type", "subgoal-type"),
                edge("2", "parent", "1"),
            ],
        )],
        config(),
    )
    .await
    .unwrap();

    let resolver = TypeResolver::new(store.clone(), Arc::new(RelationRegistry::default()));
    let types = resolver.types_of("2").await.unwrap();
    assert_eq!(types.into_iter().collect::<Vec<_>>(), vec!["subgoal-type"]);
    assert_eq!(
        store.entities_by_attribute_value("parent", "1").await.unwrap(),
        vec!["2".to_string()]
    );
    assert_eq!(
        resolver.entities_of_type(Some("subgoal-type")).await.unwrap(),
        vec!["2".to_string()]
    );

    let goal = store.entity("1").await.unwrap().unwrap();
    assert_eq!(goal.name.as_deref(), Some("Goal A"));
    let subgoal_type = store.entity("subgoal-type").await.unwrap().unwrap();
    assert!(subgoal_type.is_type);
}

#[tokio::test]
async fn attribute_value_type_shapes_extension_columns() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(
        &store,
        vec![
            batch(1, vec![edge("Goal", "type", "schema-type")]),
            batch(
                2,
                vec![
                    text("owner", "description", "d1", "Who owns the goal"),
                    edge("owner", "value-type", "relation"),
                    edge("owner", "attribute-of-type", "Goal"),
                    edge("due", "attribute-of-type", "Goal"),
                ],
            ),
        ],
        config(),
    )
    .await
    .unwrap();

    let owner = store.entity("owner").await.unwrap().unwrap();
    assert_eq!(owner.description.as_deref(), Some("Who owns the goal"));
    assert_eq!(owner.value_type.as_deref(), Some("relation"));
    assert_eq!(owner.defined_in.as_deref(), Some(SPACE));

    let table = store
        .extension_tables()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.space_id == SPACE && t.type_name == "Goal")
        .expect("Goal table provisioned");
    let mut columns: Vec<(String, ColumnType)> = table
        .columns
        .into_iter()
        .map(|c| (c.name, c.column_type))
        .collect();
    columns.sort();
    assert_eq!(
        columns,
        vec![
            ("attr_due".to_string(), ColumnType::Text),
            ("attr_owner".to_string(), ColumnType::Relation),
        ]
    );
}

#[tokio::test]
async fn reorg_restores_the_canonical_branch() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let report = ingest(
        &store,
        vec![
            batch(1, vec![text("1", "name", "n1", "Goal A"), edge("1", "a", "x")]),
            batch(2, vec![text("1", "name", "n1b", "Goal B"), edge("2", "a", "x")]),
            batch(3, vec![edge("3", "type", "Goal")]),
            undo("1", 1),
            at("2b", 2, vec![edge("4", "a", "x")]),
        ],
        config(),
    )
    .await
    .unwrap();
    assert_eq!(report.reorgs, 1);
    assert_eq!(report.triples_retracted, 3);

    let canonical = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(
        &canonical,
        vec![
            batch(1, vec![text("1", "name", "n1", "Goal A"), edge("1", "a", "x")]),
            at("2b", 2, vec![edge("4", "a", "x")]),
        ],
        config(),
    )
    .await
    .unwrap();

    assert_eq!(store.get_cursor().await.unwrap(), Cursor::new("2b", 2));
    assert_eq!(
        store.triple_count().await.unwrap(),
        canonical.triple_count().await.unwrap()
    );
    assert_eq!(
        store.entities_by_attribute_value("a", "x").await.unwrap(),
        vec!["1".to_string(), "4".to_string()]
    );
    assert_eq!(values(&store, "1", "name").await, vec!["n1".to_string()]);
    assert_eq!(
        store.entity("1").await.unwrap().unwrap().name.as_deref(),
        Some("Goal A")
    );
    assert!(store.entity("2").await.unwrap().is_none());
    assert!(store.literal("n1b").await.unwrap().is_none());
    // The table created on the orphaned branch stays, its row does not.
    assert!(store.extension_rows(SPACE, "Goal").await.unwrap().is_empty());
}

#[tokio::test]
async fn partitions_are_provisioned_once() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    ingest(
        &store,
        vec![
            batch(1, vec![edge("1", "type", "Goal"), edge("due", "attribute-of-type", "Goal")]),
            batch(2, vec![edge("1", "type", "Goal"), edge("2", "type", "Goal")]),
            batch(3, vec![edge("due", "attribute-of-type", "Goal")]),
        ],
        config(),
    )
    .await
    .unwrap();

    let spaces = store.spaces().await.unwrap();
    assert_eq!(spaces.len(), 1);
    assert_eq!(spaces[0].schema_name, SCHEMA);

    let tables = store.extension_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].type_name, "Goal");
    assert_eq!(tables[0].columns.len(), 1);
    assert_eq!(tables[0].columns[0].name, "attr_due");
    assert_eq!(
        store.extension_rows(SPACE, "Goal").await.unwrap(),
        vec!["1".to_string(), "2".to_string()]
    );

    // A fresh pipeline over the same store reloads the registry and adds nothing.
    ingest(
        &store,
        vec![batch(4, vec![edge("3", "type", "Goal")])],
        config(),
    )
    .await
    .unwrap();
    assert_eq!(store.extension_tables().await.unwrap().len(), 1);
}

#[tokio::test]
async fn undecodable_entry_stops_before_commit() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let bad = StreamMessage::Batch(StreamBatch {
        position: Cursor::new("2", 2),
        entries: vec![RawEntry {
            space: SPACE.into(),
            author: String::new(),
            payload: json!({"actions": "not a list"}),
        }],
    });
    let err = ingest(
        &store,
        vec![batch(1, vec![edge("1", "a", "x")]), bad],
        config(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SinkError::Decode { position: 2, .. }));
    assert_eq!(store.get_cursor().await.unwrap(), Cursor::new("1", 1));
    assert_eq!(store.triple_count().await.unwrap(), 1);
}

#[tokio::test]
async fn demo_stream_ingests_from_file() {
    use triplesink_core::replay::JsonLinesSource;

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../demos/stream.jsonl");
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let (_tx, rx) = shutdown_channel();
    let mut pipeline = IngestionPipeline::new(
        store.clone(),
        JsonLinesSource::open(path),
        Arc::new(RelationRegistry::default()),
        config(),
    );
    let report = pipeline.run(rx).await.unwrap();
    assert_eq!(report.reorgs, 1);
    assert_eq!(store.get_cursor().await.unwrap(), Cursor::new("c-102b", 102));

    let resolver = TypeResolver::new(store.clone(), Arc::new(RelationRegistry::default()));
    assert_eq!(
        resolver.entities_of_type(Some("goal-type")).await.unwrap(),
        vec!["1".to_string(), "2".to_string()]
    );
    assert_eq!(
        store.entities_by_attribute_value("parent", "1").await.unwrap(),
        vec!["2".to_string()]
    );
    assert!(store.entity("3").await.unwrap().is_none());

    let goal = store
        .extension_tables()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.type_name == "goal-type")
        .unwrap();
    assert_eq!(goal.columns[0].name, "attr_due");
    assert_eq!(
        store.extension_rows("0xDemoSpace", "goal-type").await.unwrap(),
        vec!["1".to_string(), "2".to_string()]
    );
}
