//! triplesink-core: foundation for the reorg-safe knowledge-graph sink.
//!
//! # Architecture
//!
//! ```text
//! StreamSource → IngestionPipeline
//!                    ├── decode          (action documents)
//!                    ├── MutationPlanner (triples → rows + DDL)
//!                    ├── SchemaRegistry  (per-space extension tables)
//!                    ├── Checkpoint      (cursor CAS, atomic commit, rewind)
//!                    └── GraphStore backend (memory / SQLite / Postgres)
//!
//! TypeResolver ── RelationRegistry / ResolverRegistry (read side)
//! ```

pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod ident;
pub mod memory;
pub mod pipeline;
pub mod planner;
pub mod relations;
pub mod replay;
pub mod resolver;
pub mod retry;
pub mod schema;
pub mod store;
pub mod stream;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::SinkConfig;
pub use cursor::Cursor;
pub use error::SinkError;
pub use memory::MemoryStore;
pub use pipeline::{IngestionPipeline, PipelineConfig, PipelineReport, PipelineState};
pub use relations::{RelationRegistry, Role};
pub use resolver::{RelationResolver, ResolverRegistry, TypeResolver};
pub use schema::SchemaRegistry;
pub use store::{GraphStore, SpacePartitioner, TripleStore};
pub use stream::{StreamMessage, StreamSource};
