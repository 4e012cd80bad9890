//! The ingestion pipeline: a single writer driving stream batches into the store.
//!
//! ```text
//! Idle → Fetching → Decoding → Applying → Committed → Idle …
//!           │
//!           └─ Undo ─→ Reconciling ─→ Idle
//! ```
//!
//! Each commit writes the batch's mutations and the cursor in one
//! transaction. Structure (spaces, extension tables) is provisioned first,
//! outside that transaction, through idempotent DDL.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::checkpoint::Checkpoint;
use crate::cursor::Cursor;
use crate::decode::decode_entry;
use crate::error::SinkError;
use crate::planner::{MutationPlanner, Plan};
use crate::relations::RelationRegistry;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::schema::{provision, SchemaRegistry};
use crate::store::GraphStore;
use crate::stream::{StreamBatch, StreamMessage, StreamSource};
use crate::types::{BatchSegment, CommitBatch, SchemaChange};

/// Tunables for an [`IngestionPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Stream positions coalesced into one transaction.
    pub batch_positions: usize,
    pub retry: RetryConfig,
    /// Positions of undo journal kept behind the cursor. `0` keeps everything.
    pub journal_retention: u64,
    /// Stop once the cursor reaches this block.
    pub stop_at: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_positions: 1,
            retry: RetryConfig::default(),
            journal_retention: 1000,
            stop_at: None,
        }
    }
}

/// Runtime state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Fetching,
    Decoding,
    Applying,
    Committed,
    /// Rolling back positions the stream no longer considers canonical.
    Reconciling,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Decoding => write!(f, "decoding"),
            Self::Applying => write!(f, "applying"),
            Self::Committed => write!(f, "committed"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Totals for one [`IngestionPipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Stream positions committed.
    pub batches_applied: u64,
    /// Positions skipped because the cursor already covered them.
    pub batches_skipped: u64,
    pub mutations_applied: u64,
    pub reorgs: u64,
    pub triples_retracted: u64,
    /// Cursor when the run ended.
    pub cursor: Cursor,
}

/// Send `true` to ask a running pipeline to stop after its in-flight batch.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    loop {
        if *signal.borrow() {
            return;
        }
        if signal.changed().await.is_err() {
            // Sender gone: nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

enum Step {
    Continue,
    Stop,
}

pub struct IngestionPipeline<G: GraphStore + 'static, S: StreamSource> {
    store: Arc<G>,
    source: S,
    planner: MutationPlanner,
    checkpoint: Checkpoint,
    schema: SchemaRegistry,
    retry: RetryPolicy,
    config: PipelineConfig,
    state: PipelineState,
    pending: Vec<StreamBatch>,
    last_prune: u64,
    report: PipelineReport,
}

impl<G: GraphStore + 'static, S: StreamSource> IngestionPipeline<G, S> {
    pub fn new(
        store: Arc<G>,
        source: S,
        relations: Arc<RelationRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            checkpoint: Checkpoint::new(store.clone()),
            store,
            source,
            planner: MutationPlanner::new(relations),
            schema: SchemaRegistry::new(),
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            state: PipelineState::Idle,
            pending: Vec::new(),
            last_prune: 0,
            report: PipelineReport::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Ingest until the stream ends, `stop_at` is reached, or `shutdown`
    /// fires. A shutdown never interrupts a commit: positions already
    /// fetched are committed before the pipeline stops.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineReport, SinkError> {
        match self.run_inner(&mut shutdown).await {
            Ok(()) => {
                self.set_state(PipelineState::Stopped);
                self.report.cursor = self.checkpoint.cursor().clone();
                tracing::info!(
                    cursor = %self.report.cursor,
                    applied = self.report.batches_applied,
                    skipped = self.report.batches_skipped,
                    reorgs = self.report.reorgs,
                    "Ingestion stopped"
                );
                Ok(self.report.clone())
            }
            Err(e) => {
                self.set_state(PipelineState::Failed);
                tracing::error!(
                    cursor = %self.checkpoint.cursor(),
                    error = %e,
                    "Ingestion failed"
                );
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), SinkError> {
        let retry = self.retry.clone();
        let mut attempt = 0;
        let cursor = loop {
            match self.checkpoint.load().await {
                Ok(cursor) => break cursor,
                Err(e) => retry.pause("load cursor", &mut attempt, e).await?,
            }
        };
        let store = self.store.clone();
        self.schema = retry
            .run("load schema", || SchemaRegistry::load(store.as_ref()))
            .await?;
        self.source.seek(&cursor).await?;
        self.last_prune = cursor.block_number;
        tracing::info!(cursor = %cursor, "Resuming from checkpoint");

        loop {
            if self.stop_reached() {
                break;
            }
            self.set_state(PipelineState::Fetching);
            let message = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => {
                    self.set_state(PipelineState::Stopping);
                    tracing::info!("Shutdown requested");
                    break;
                }
                message = self.fetch() => message?,
            };

            let step = match message {
                None => {
                    tracing::info!("End of stream");
                    Step::Stop
                }
                Some(StreamMessage::Batch(batch)) => self.on_batch(batch).await?,
                Some(StreamMessage::Undo { last_valid }) => {
                    self.on_undo(last_valid).await?;
                    Step::Continue
                }
            };
            if let Step::Stop = step {
                break;
            }
        }

        self.flush().await
    }

    fn stop_reached(&self) -> bool {
        match self.config.stop_at {
            Some(stop) => self.checkpoint.cursor().covers(stop),
            None => false,
        }
    }

    /// Next message, retrying transient failures from the durable cursor.
    async fn fetch(&mut self) -> Result<Option<StreamMessage>, SinkError> {
        let mut attempt = 0;
        let mut reseek = false;
        loop {
            let outcome = if reseek {
                match self.source.seek(self.checkpoint.cursor()).await {
                    Ok(()) => {
                        reseek = false;
                        self.source.next().await
                    }
                    Err(e) => Err(e),
                }
            } else {
                self.source.next().await
            };
            match outcome {
                Ok(message) => return Ok(message),
                Err(e) => {
                    self.retry.pause("fetch", &mut attempt, e).await?;
                    reseek = true;
                }
            }
        }
    }

    async fn on_batch(&mut self, batch: StreamBatch) -> Result<Step, SinkError> {
        let block = batch.position.block_number;
        if let Some(stop) = self.config.stop_at {
            if block > stop {
                tracing::info!(block, stop, "Reached stop block");
                return Ok(Step::Stop);
            }
        }
        let seen = self
            .pending
            .last()
            .map(|b| b.position.block_number)
            .is_some_and(|last| block <= last);
        if self.checkpoint.cursor().covers(block) || seen {
            tracing::debug!(block, cursor = %self.checkpoint.cursor(), "Skipping applied position");
            self.report.batches_skipped += 1;
            return Ok(Step::Continue);
        }

        self.pending.push(batch);
        if self.pending.len() >= self.config.batch_positions.max(1) {
            self.flush().await?;
        }
        Ok(Step::Continue)
    }

    async fn on_undo(&mut self, last_valid: Cursor) -> Result<(), SinkError> {
        let before = self.pending.len();
        self.pending
            .retain(|b| b.position.block_number <= last_valid.block_number);
        if before != self.pending.len() {
            tracing::debug!(
                dropped = before - self.pending.len(),
                "Dropped uncommitted positions past undo point"
            );
        }
        self.flush().await?;

        let cursor = self.checkpoint.cursor().clone();
        if cursor.is_start() || last_valid.block_number >= cursor.block_number {
            tracing::debug!(last_valid = %last_valid, cursor = %cursor, "Undo past the cursor, nothing to revert");
            return Ok(());
        }

        self.set_state(PipelineState::Reconciling);
        tracing::warn!(
            depth = cursor.block_number - last_valid.block_number,
            from = %cursor,
            to = %last_valid,
            "Reorg detected"
        );
        let retry = self.retry.clone();
        let mut attempt = 0;
        let rollback = loop {
            match self.checkpoint.rewind(&last_valid).await {
                Ok(report) => break report,
                Err(e) => retry.pause("rewind", &mut attempt, e).await?,
            }
        };
        self.report.reorgs += 1;
        self.report.triples_retracted += rollback.triples_retracted as u64;
        self.last_prune = self.last_prune.min(last_valid.block_number);
        tracing::info!(
            reverted = rollback.ops_reverted,
            retracted = rollback.triples_retracted,
            restored = rollback.triples_restored,
            cursor = %last_valid,
            "Rolled back orphaned positions"
        );
        self.set_state(PipelineState::Idle);
        Ok(())
    }

    /// Decode, provision, and commit every pending position.
    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batches = std::mem::take(&mut self.pending);
        let Some(position) = batches.last().map(|b| b.position.clone()) else {
            return Ok(());
        };

        self.set_state(PipelineState::Decoding);
        let mut plan = Plan::default();
        let mut segments = Vec::with_capacity(batches.len());
        for batch in &batches {
            let block = batch.position.block_number;
            let mut mutations = Vec::new();
            for (index, entry) in batch.entries.iter().enumerate() {
                let doc = decode_entry(block, index, entry)?;
                let entry_plan = self.planner.plan(&entry.space, &doc.actions);
                plan.schema.extend(entry_plan.schema);
                mutations.extend(entry_plan.mutations);
            }
            segments.push(BatchSegment {
                block_number: block,
                mutations,
            });
        }

        self.set_state(PipelineState::Applying);
        self.provision_schema(plan.schema).await?;

        let commit = CommitBatch { position, segments };
        let retry = self.retry.clone();
        let mut attempt = 0;
        loop {
            match self.checkpoint.commit(&commit).await {
                Ok(()) => break,
                Err(e) => retry.pause("commit", &mut attempt, e).await?,
            }
        }

        self.set_state(PipelineState::Committed);
        self.report.batches_applied += batches.len() as u64;
        self.report.mutations_applied += commit.mutation_count() as u64;
        tracing::info!(
            block = commit.position.block_number,
            positions = batches.len(),
            mutations = commit.mutation_count(),
            "Batch committed"
        );

        self.maybe_prune(commit.position.block_number).await;
        self.set_state(PipelineState::Idle);
        Ok(())
    }

    async fn provision_schema(&mut self, changes: Vec<SchemaChange>) -> Result<(), SinkError> {
        let store = self.store.clone();
        for change in changes {
            let Some(delta) = self.schema.declare(change) else {
                continue;
            };
            let result = self
                .retry
                .run("provision", || provision(store.as_ref(), &delta))
                .await;
            if let Err(e) = result {
                self.schema.forget(&delta);
                return Err(e);
            }
            tracing::debug!(change = ?delta, "Schema provisioned");
        }
        Ok(())
    }

    async fn maybe_prune(&mut self, block: u64) {
        let retention = self.config.journal_retention;
        if retention == 0 || block < self.last_prune.saturating_add(retention) {
            return;
        }
        let keep_after = block - retention;
        match self.checkpoint.prune(keep_after).await {
            Ok(removed) => {
                tracing::debug!(keep_after, removed, "Undo journal pruned");
                self.last_prune = block;
            }
            Err(e) => tracing::warn!(error = %e, "Journal prune failed, will retry later"),
        }
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            tracing::trace!(from = %self.state, to = %state, "Pipeline state");
            self.state = state;
        }
    }
}
