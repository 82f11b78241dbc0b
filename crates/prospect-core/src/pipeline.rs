use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::checkpoint::{CheckpointState, RunStatus, PHASE_EXTRACTION};
use crate::classifier::DocumentClassifier;
use crate::relations::{InferenceConfig, RelationshipInferencer, RelationshipRecord};
use crate::retry::RetryPolicy;
use crate::source::{DocumentBatch, JsonlSource, RawDocument};
use crate::storage::{Storage, StoredDocument};
use crate::tagger::statistical::StatisticalModel;
use crate::tagger::{ExtractionError, MultiTierTagger};
use crate::entity::EntitySpan;
use crate::Result;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workflow identity for checkpointing. Defaults to
    /// `extraction-<source file name>`.
    pub workflow_id: Option<String>,
    pub batch_size: usize,
    /// Checkpoint after this many documents since the run started.
    pub checkpoint_interval: u64,
    /// Stop after this many documents and checkpoint as `Continued`;
    /// `None` runs to the end of the source.
    pub max_docs_per_run: Option<u64>,
    /// Concurrent per-document extraction tasks within one batch.
    pub workers: usize,
    pub inference: InferenceConfig,
    /// Fallback start line when no checkpoint exists.
    pub start_offset: u64,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workflow_id: None,
            batch_size: 100,
            checkpoint_interval: 1000,
            max_docs_per_run: None,
            workers: 4,
            inference: InferenceConfig::default(),
            start_offset: 0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one pipeline run. `completed` is false when the run stopped
/// at its document bound (resume with another run) or a batch failed to
/// persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_id: String,
    pub run_id: String,
    pub processed: u64,
    pub entities: u64,
    pub relationships: u64,
    pub failed_docs: Vec<String>,
    pub success_rate: f64,
    pub completed: bool,
}

/// Observable pipeline phases, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    LoadingCheckpoint,
    StreamingBatches,
    InsertDocs,
    TagEntities,
    Persist,
    Checkpoint,
    Finished,
}

fn transition(phase: Phase) {
    debug!(?phase, "Pipeline phase");
}

struct DocOutput {
    entities: Vec<EntitySpan>,
    relationships: Vec<RelationshipRecord>,
}

/// Batch orchestrator: streams the source, runs the tagger and inferencer
/// over each document, persists idempotently, and checkpoints its position.
pub struct ExtractionPipeline {
    catalog: Arc<Catalog>,
    tagger: Arc<MultiTierTagger>,
    classifier: DocumentClassifier,
    storage: Arc<Storage>,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        model: Arc<dyn StatisticalModel>,
        storage: Arc<Storage>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let tagger = Arc::new(MultiTierTagger::new(Arc::clone(&catalog), model)?);
        let classifier = DocumentClassifier::new(catalog.content_rules())
            .map_err(ExtractionError::Pattern)?;

        Ok(Self {
            catalog,
            tagger,
            classifier,
            storage,
            config,
        })
    }

    /// Process the source until exhausted or the per-run bound is hit.
    pub async fn run(&self, source: &JsonlSource) -> Result<RunSummary> {
        let workflow_id = self
            .config
            .workflow_id
            .clone()
            .unwrap_or_else(|| default_workflow_id(source.path()));
        let run_id = Uuid::now_v7().to_string();

        info!(workflow_id, run_id, source = %source.path().display(), "Starting extraction run");

        transition(Phase::LoadingCheckpoint);
        let resume_offset = match self
            .storage
            .latest_checkpoint(&workflow_id, PHASE_EXTRACTION)
            .await?
        {
            Some(checkpoint) => {
                info!(offset = checkpoint.doc_offset, "Resuming from checkpoint");
                checkpoint.doc_offset
            }
            None => self.config.start_offset,
        };

        let mut state = CheckpointState::new(workflow_id.clone(), run_id.clone());
        state.doc_offset = resume_offset;

        let mut failed_docs: Vec<String> = Vec::new();
        let mut docs_since_checkpoint: u64 = 0;
        let mut aborted = false;
        let mut bounded = false;

        transition(Phase::StreamingBatches);
        let mut batches = source.batches(resume_offset as usize, self.config.batch_size)?;
        while let Some(batch) = batches.next() {
            let batch = batch?;
            let batch_end = batch.end as u64;
            let batch_docs = batch.items.len() as u64;
            debug!(start = batch.start, end = batch.end, "Processing batch");

            transition(Phase::InsertDocs);
            let normalized = match self.insert_documents(batch, &mut failed_docs).await {
                Ok(normalized) => normalized,
                Err(e) => {
                    // The checkpoint stays before this batch so a later run
                    // reprocesses it; upserts are idempotent.
                    error!(error = %e, "Batch document insert failed after retries");
                    aborted = true;
                    break;
                }
            };

            transition(Phase::TagEntities);
            let outputs = self.extract_batch(normalized, &mut failed_docs).await;

            transition(Phase::Persist);
            match self.persist_outputs(&outputs).await {
                Ok((entities, relationships)) => {
                    state.advance(batch_end, batch_docs, entities, relationships);
                    docs_since_checkpoint += batch_docs;
                }
                Err(e) => {
                    // Same invariant as above: inserts are keyed naturally,
                    // so reprocessing from the old offset duplicates nothing.
                    error!(error = %e, "Batch persistence failed after retries");
                    for (doc_id, _) in &outputs {
                        failed_docs.push(doc_id.to_string());
                    }
                    aborted = true;
                    break;
                }
            }

            if docs_since_checkpoint >= self.config.checkpoint_interval {
                transition(Phase::Checkpoint);
                if let Err(e) = self.save_checkpoint(&state).await {
                    error!(error = %e, "Checkpoint save failed after retries");
                    aborted = true;
                    break;
                }
                docs_since_checkpoint = 0;
            }

            if self
                .config
                .max_docs_per_run
                .is_some_and(|max| state.processed >= max)
            {
                // Only a bound hit with work remaining needs a follow-up run.
                bounded = batches.next().is_some();
                if bounded {
                    info!(processed = state.processed, "Per-run document bound reached");
                }
                break;
            }
        }

        transition(Phase::Finished);
        state.status = if aborted {
            RunStatus::InProgress
        } else if bounded {
            RunStatus::Continued
        } else {
            RunStatus::Completed
        };
        state.updated_at = Utc::now();
        // A summary is produced even when the final checkpoint cannot be
        // saved; the next run simply resumes from the last durable offset.
        let checkpoint_saved = match self.save_checkpoint(&state).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Final checkpoint save failed after retries");
                false
            }
        };

        let processed = state.processed;
        let success_rate = if processed > 0 {
            (processed.saturating_sub(failed_docs.len() as u64)) as f64 / processed as f64
        } else {
            0.0
        };
        let summary = RunSummary {
            workflow_id,
            run_id,
            processed,
            entities: state.entities,
            relationships: state.relationships,
            failed_docs,
            success_rate,
            completed: checkpoint_saved && state.status == RunStatus::Completed,
        };
        info!(
            processed = summary.processed,
            entities = summary.entities,
            relationships = summary.relationships,
            failed = summary.failed_docs.len(),
            completed = summary.completed,
            "Extraction run finished"
        );

        Ok(summary)
    }

    /// Upsert every parsable document in the batch, classifying as we go.
    /// Malformed lines and rows the database rejects outright become
    /// per-document failures; a transient failure that survives its retries
    /// aborts the batch so the checkpoint never acknowledges an unpersisted
    /// document.
    async fn insert_documents(
        &self,
        batch: DocumentBatch,
        failed_docs: &mut Vec<String>,
    ) -> Result<Vec<(Uuid, String)>> {
        let mut normalized = Vec::with_capacity(batch.items.len());

        for item in batch.items {
            let raw = match item.doc {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(line = item.line_index, error = %e, "Skipping malformed source line");
                    failed_docs.push(format!("line:{}", item.line_index));
                    continue;
                }
            };

            let doc_id = raw.resolve_id();
            let stored = self.normalize_document(doc_id, &raw);
            let result = self
                .config
                .retry
                .retry("upsert_document", || self.storage.upsert_document(&stored))
                .await;
            if let Err(e) = result {
                error!(doc_id = %doc_id, error = %e, "Failed to insert document");
                failed_docs.push(doc_id.to_string());
                if e.is_retryable() {
                    return Err(e);
                }
                continue;
            }

            normalized.push((doc_id, raw.effective_text().to_string()));
        }

        Ok(normalized)
    }

    fn normalize_document(&self, doc_id: Uuid, raw: &RawDocument) -> StoredDocument {
        let url = raw
            .effective_url()
            .map_or_else(|| format!("synthetic://{doc_id}"), str::to_string);
        let title = raw.effective_title().map(str::to_string);
        let text = raw.effective_text();

        let mut metadata = match &raw.metadata {
            Value::Object(map) => map.clone(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut map = serde_json::Map::new();
                    map.insert("raw".into(), json!(s));
                    map
                }
            },
            _ => serde_json::Map::new(),
        };
        metadata
            .entry("source_url")
            .or_insert_with(|| json!(url.clone()));
        if !raw.id.is_null() || !raw.doc_id.is_null() {
            let raw_id = if raw.id.is_null() { &raw.doc_id } else { &raw.id };
            metadata.entry("raw_id").or_insert_with(|| raw_id.clone());
        }
        if let Some(fetched_at) = &raw.fetched_at {
            metadata
                .entry("extracted_at")
                .or_insert_with(|| json!(fetched_at));
        }

        let mut content_type = raw
            .content_type
            .clone()
            .or_else(|| metadata.get("content_type").and_then(Value::as_str).map(String::from));
        let classification = self.classifier.classify(&url, title.as_deref(), text);
        if let Some(classification) = &classification {
            metadata.insert(
                "auto_classification".into(),
                serde_json::to_value(classification).unwrap_or(Value::Null),
            );
            let unknown = content_type
                .as_deref()
                .is_none_or(|ct| ct.is_empty() || ct.eq_ignore_ascii_case("unknown"));
            if unknown && classification.label != "Other" {
                content_type = Some(classification.label.clone());
            }
        }

        StoredDocument {
            id: doc_id,
            url: Some(url),
            title,
            content_hash: raw.content_hash(),
            content_type,
            classification,
            metadata: Value::Object(metadata),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Run tagging and relationship inference over the batch on a bounded
    /// worker pool. A failed document is recorded and never aborts its
    /// batch.
    async fn extract_batch(
        &self,
        docs: Vec<(Uuid, String)>,
        failed_docs: &mut Vec<String>,
    ) -> Vec<(Uuid, DocOutput)> {
        let mut outputs = Vec::with_capacity(docs.len());
        let mut join_set: JoinSet<(Uuid, std::result::Result<DocOutput, ExtractionError>)> =
            JoinSet::new();
        let mut pending = docs.into_iter();
        // Task id to doc id, so a panicked worker is still attributable.
        let mut in_flight: HashMap<tokio::task::Id, Uuid> = HashMap::new();

        let workers = self.config.workers.max(1);
        for _ in 0..workers {
            if let Some((doc_id, text)) = pending.next() {
                let handle = self.spawn_extract(&mut join_set, doc_id, text);
                in_flight.insert(handle.id(), doc_id);
            }
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((task_id, (doc_id, result))) => {
                    in_flight.remove(&task_id);
                    match result {
                        Ok(output) => outputs.push((doc_id, output)),
                        Err(e) => {
                            error!(doc_id = %doc_id, error = %e, "Failed to extract from document");
                            failed_docs.push(doc_id.to_string());
                        }
                    }
                }
                Err(e) => match in_flight.remove(&e.id()) {
                    Some(doc_id) => {
                        error!(doc_id = %doc_id, error = %e, "Extraction worker panicked");
                        failed_docs.push(doc_id.to_string());
                    }
                    None => error!(error = %e, "Extraction worker panicked"),
                },
            }
            if let Some((doc_id, text)) = pending.next() {
                let handle = self.spawn_extract(&mut join_set, doc_id, text);
                in_flight.insert(handle.id(), doc_id);
            }
        }

        outputs
    }

    fn spawn_extract(
        &self,
        join_set: &mut JoinSet<(Uuid, std::result::Result<DocOutput, ExtractionError>)>,
        doc_id: Uuid,
        text: String,
    ) -> AbortHandle {
        let tagger = Arc::clone(&self.tagger);
        let catalog = Arc::clone(&self.catalog);
        let inference = self.config.inference;

        join_set.spawn_blocking(move || {
            let result = tagger.tag(&text).map(|entities| {
                let relationships =
                    RelationshipInferencer::new(inference).infer(doc_id, &entities, &catalog);
                DocOutput {
                    entities,
                    relationships,
                }
            });
            (doc_id, result)
        })
    }

    async fn persist_outputs(&self, outputs: &[(Uuid, DocOutput)]) -> Result<(u64, u64)> {
        let version = self.catalog.version();
        let mut entities = 0;
        let mut relationships = 0;

        for (doc_id, output) in outputs {
            entities += self
                .config
                .retry
                .retry("insert_entities", || {
                    self.storage.insert_entities(*doc_id, &output.entities, version)
                })
                .await?;
            relationships += self
                .config
                .retry
                .retry("insert_relationships", || {
                    self.storage
                        .insert_relationships(&output.relationships, version)
                })
                .await?;
        }

        Ok((entities, relationships))
    }

    async fn save_checkpoint(&self, state: &CheckpointState) -> Result<()> {
        self.config
            .retry
            .retry("save_checkpoint", || self.storage.save_checkpoint(state))
            .await?;
        debug!(offset = state.doc_offset, status = %state.status, "Checkpoint saved");
        Ok(())
    }
}

fn default_workflow_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map_or_else(|| "source".to_string(), |n| n.to_string_lossy().into_owned());
    format!("extraction-{name}")
}
