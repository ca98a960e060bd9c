//! Per-document session state
//!
//! A `PipelineSession` owns everything one document's run accumulates: the
//! normalised source, its chunks and index, stage results, lifecycle states
//! and item locks. It is passed explicitly to the executor; sessions never
//! share mutable state with each other.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};
use crate::ingest::{DocumentId, SourceDocument};
use crate::model::EmbeddingModel;
use crate::pipeline::cache::content_key;
use crate::pipeline::graph::Pipeline;
use crate::pipeline::stage::{ResultOrigin, StageEvent, StageKind, StageResult, StageState};
use crate::rag::chunker::{Chunk, Chunker};
use crate::rag::index::SemanticIndex;
use crate::report::items::parse;
use crate::report::refiner::LockState;

#[derive(Debug)]
pub struct PipelineSession {
    session_id: Uuid,
    document: SourceDocument,
    chunks: Vec<Chunk>,
    index: Option<Arc<SemanticIndex>>,
    /// Chunking parameters and embedder behind `index`
    index_fingerprint: String,
    stage_results: BTreeMap<String, StageResult>,
    stage_states: BTreeMap<String, StageState>,
    lock_states: BTreeMap<String, LockState>,
}

impl PipelineSession {
    /// Session without an index; retrieval fails until one is attached
    pub fn new(document: SourceDocument) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            document,
            chunks: Vec::new(),
            index: None,
            index_fingerprint: String::new(),
            stage_results: BTreeMap::new(),
            stage_states: BTreeMap::new(),
            lock_states: BTreeMap::new(),
        }
    }

    /// Chunk and index `document`
    pub async fn ingest(
        document: SourceDocument,
        chunker: &Chunker,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self> {
        let chunks = chunker.split(&document.text);
        let index_fingerprint = format!(
            "{}|{}|{}",
            embedder.identity(),
            chunker.target_size(),
            chunker.overlap()
        );
        let index = SemanticIndex::build(chunks.clone(), embedder).await?;

        let mut session = Self::new(document);
        info!(
            document_id = %session.document.id,
            chunks = chunks.len(),
            "document ingested"
        );
        session.chunks = chunks;
        session.index = Some(Arc::new(index));
        session.index_fingerprint = index_fingerprint;
        Ok(session)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn document(&self) -> &SourceDocument {
        &self.document
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document.id
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Empty until the session has been indexed
    pub fn index_fingerprint(&self) -> &str {
        &self.index_fingerprint
    }

    pub fn index(&self) -> Result<Arc<SemanticIndex>> {
        self.index
            .clone()
            .ok_or_else(|| PipelineError::Retrieval("session has no semantic index".to_string()))
    }

    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.stage_results.get(stage)
    }

    /// Result only when the stage is Ready
    pub fn ready_result(&self, stage: &str) -> Option<&StageResult> {
        if self.state(stage).is_ready() {
            self.stage_results.get(stage)
        } else {
            None
        }
    }

    pub fn state(&self, stage: &str) -> StageState {
        self.stage_states.get(stage).copied().unwrap_or_default()
    }

    pub fn lock_state(&self, stage: &str) -> LockState {
        self.lock_states.get(stage).cloned().unwrap_or_default()
    }

    /// Lock or unlock one item of a Ready report stage
    pub fn set_item_lock(&mut self, pipeline: &Pipeline, stage: &str, ordinal: usize, locked: bool) -> Result<()> {
        pipeline.stage(stage)?;
        let result = self.ready_result(stage).ok_or_else(|| PipelineError::StageNotReady {
            stage: stage.to_string(),
            missing: stage.to_string(),
        })?;

        let count = parse(&result.content).items.len();
        if count == 0 {
            return Err(PipelineError::NoReportItems {
                stage: stage.to_string(),
            });
        }
        if ordinal == 0 || ordinal > count {
            return Err(PipelineError::ItemOutOfRange {
                stage: stage.to_string(),
                ordinal,
                count,
            });
        }

        self.lock_states
            .entry(stage.to_string())
            .or_default()
            .set(ordinal, locked);
        Ok(())
    }

    /// Apply a lifecycle event, rejecting invalid ones
    pub(crate) fn apply(&mut self, stage: &str, event: StageEvent) -> Result<StageState> {
        let next = self.state(stage).transition(event)?;
        self.stage_states.insert(stage.to_string(), next);
        Ok(next)
    }

    /// Store a freshly produced result. A change of content resets the
    /// stage's locks (full regeneration) and invalidates its dependents.
    pub(crate) fn commit(&mut self, pipeline: &Pipeline, result: StageResult) -> Result<&StageResult> {
        let stage = result.stage_name.clone();
        let changed = self
            .stage_results
            .get(&stage)
            .map(|previous| previous.content != result.content)
            .unwrap_or(false);

        self.apply(&stage, StageEvent::Start)?;
        self.apply(&stage, StageEvent::Complete)?;

        if result.origin == ResultOrigin::Generated {
            self.lock_states.remove(&stage);
        }
        if changed {
            self.invalidate_dependents(pipeline, &stage)?;
        }

        self.stage_results.insert(stage.clone(), result);
        Ok(&self.stage_results[&stage])
    }

    /// Record a failed attempt. Upstream results are untouched; the stage's
    /// previous result and everything derived from it are dropped.
    pub(crate) fn record_failure(&mut self, pipeline: &Pipeline, stage: &str) -> Result<()> {
        self.apply(stage, StageEvent::Start)?;
        self.apply(stage, StageEvent::Fail)?;
        self.stage_results.remove(stage);
        self.lock_states.remove(stage);
        self.invalidate_dependents(pipeline, stage)?;
        Ok(())
    }

    /// Replace a stage's content by hand. Facts content must still parse.
    pub fn replace_stage_content(&mut self, pipeline: &Pipeline, stage: &str, content: &str) -> Result<&StageResult> {
        let definition = pipeline.stage(stage)?;

        let content = match &definition.kind {
            StageKind::Facts(schema) => schema.parse_content(stage, content)?.to_content()?,
            StageKind::Report => content.trim().to_string(),
        };

        let changed = self
            .stage_results
            .get(stage)
            .map(|previous| previous.content != content)
            .unwrap_or(true);

        self.apply(stage, StageEvent::Edit)?;
        if changed {
            self.lock_states.remove(stage);
            self.invalidate_dependents(pipeline, stage)?;
        }

        let result = StageResult::new(stage, content.clone(), content_key(stage, &content), ResultOrigin::Edited);
        info!(stage, cache_key = %crate::logging::short_id(&result.cache_key), "stage content replaced");
        self.stage_results.insert(stage.to_string(), result);
        Ok(&self.stage_results[stage])
    }

    /// Reset every transitive dependent of `stage` to NotStarted, dropping
    /// its result and locks. Returns the invalidated stage names.
    pub fn invalidate_dependents(&mut self, pipeline: &Pipeline, stage: &str) -> Result<Vec<String>> {
        let dependents: Vec<String> = pipeline
            .dependents_of(stage)?
            .into_iter()
            .map(str::to_string)
            .collect();

        for dependent in &dependents {
            self.apply(dependent, StageEvent::Invalidate)?;
            self.stage_results.remove(dependent);
            self.lock_states.remove(dependent);
        }

        if !dependents.is_empty() {
            debug!(stage, invalidated = ?dependents, "dependents invalidated");
        }
        Ok(dependents)
    }

    /// Dependency contents of `stage`, failing on the first one not Ready
    pub(crate) fn dependency_contents(&self, pipeline: &Pipeline, stage: &str) -> Result<BTreeMap<String, String>> {
        let definition = pipeline.stage(stage)?;
        let mut contents = BTreeMap::new();
        for dep in &definition.depends_on {
            let result = self.ready_result(dep).ok_or_else(|| PipelineError::StageNotReady {
                stage: stage.to_string(),
                missing: dep.clone(),
            })?;
            contents.insert(dep.clone(), result.content.clone());
        }
        Ok(contents)
    }

    /// Store the result of an item-level refinement; locks persist
    pub(crate) fn commit_refinement(&mut self, pipeline: &Pipeline, stage: &str, content: String) -> Result<&StageResult> {
        let result = StageResult::new(stage, content.clone(), content_key(stage, &content), ResultOrigin::Refined);
        self.commit(pipeline, result)
    }
}
