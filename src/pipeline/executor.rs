//! Stage Executor
//!
//! Runs the stages of a [`Pipeline`] against one [`PipelineSession`]:
//!
//! 1. every dependency must be Ready, otherwise `StageNotReady`
//! 2. the reproducibility key is computed from document, stage, dependency
//!    contents, the effective retrieval settings and run parameters
//! 3. on a cache miss the stage retrieves (or condenses) context, renders its
//!    prompt and calls the generation model once
//! 4. the result is committed to the session, invalidating dependents whose
//!    inputs changed
//!
//! The session is only touched after the model call has finished, so a
//! dropped or failed execution leaves both the session and the cache as they
//! were.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::config::{Config, MapReduceConfig};
use crate::errors::{PipelineError, Result};
use crate::logging::{short_id, stage_span};
use crate::model::GenerationModel;
use crate::pipeline::cache::{reproducibility_key, CacheKey, StageCache};
use crate::pipeline::graph::{Pipeline, CONTEXT_FIELD};
use crate::pipeline::mapreduce::Condenser;
use crate::pipeline::prompt::PromptValues;
use crate::pipeline::session::PipelineSession;
use crate::pipeline::stage::{ResultOrigin, RunParams, StageDefinition, StageInputs, StageKind, StageResult};
use crate::rag::context::{ContextBuilder, ContextConfig};
use crate::rag::retrieval::{Retriever, SearchParams};
use crate::rag::RetrievalStrategy;
use crate::report::items::{parse, render, ReportItem};
use crate::report::refiner::GranularRefiner;

/// Retrieval and condensation knobs shared by every stage
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub top_k: usize,
    pub context: ContextConfig,
    pub map_reduce: MapReduceConfig,
    /// Replaces each stage's own strategy when set
    pub strategy_override: Option<RetrievalStrategy>,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            context: ContextConfig::from(&config.retrieval),
            map_reduce: config.map_reduce.clone(),
            strategy_override: config.retrieval.strategy_override,
        }
    }

    /// Strategy `definition` actually retrieves with
    pub fn strategy_for(&self, definition: &StageDefinition) -> RetrievalStrategy {
        self.strategy_override.unwrap_or(definition.strategy)
    }

    /// Everything besides the stage itself that shapes its context
    fn fingerprint_for(&self, definition: &StageDefinition, condenses: bool) -> String {
        let condense = if condenses && definition.condense_long_input {
            format!(
                "{}/{}/{}",
                self.map_reduce.threshold_chars, self.map_reduce.chunk_size, self.map_reduce.overlap
            )
        } else {
            "off".to_string()
        };
        format!(
            "{}|{}|{}|{:?}|{}",
            self.strategy_for(definition),
            self.top_k,
            self.context.budget_chars,
            self.context.separator,
            condense
        )
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of one stage execution
#[derive(Debug, Clone)]
pub struct StageRun {
    pub stage: String,
    pub result: StageResult,
    /// No model call was made
    pub cache_hit: bool,
    pub elapsed: Duration,
}

/// Outcome of one granular refinement
#[derive(Debug, Clone)]
pub struct Refinement {
    pub result: StageResult,
    /// Ordinals whose text came from the model
    pub regenerated: Vec<usize>,
    /// Unlocked ordinals kept as they were because the reply was short
    pub padded: Vec<usize>,
}

pub struct StageExecutor {
    pipeline: Arc<Pipeline>,
    generator: Arc<dyn GenerationModel>,
    retriever: Retriever,
    context_builder: ContextBuilder,
    condenser: Option<Condenser>,
    refiner: GranularRefiner,
    cache: Arc<StageCache>,
    settings: ExecutorSettings,
}

impl StageExecutor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        generator: Arc<dyn GenerationModel>,
        cache: Arc<StageCache>,
        settings: ExecutorSettings,
    ) -> Result<Self> {
        let retriever = Retriever::with_params(
            generator.clone(),
            SearchParams {
                top_k: settings.top_k,
                strategy: RetrievalStrategy::Direct,
            },
        );

        Ok(Self {
            pipeline,
            refiner: GranularRefiner::new(generator.clone())?,
            generator,
            retriever,
            context_builder: ContextBuilder::with_config(settings.context.clone()),
            condenser: None,
            cache,
            settings,
        })
    }

    /// Enables map-reduce condensation for stages that ask for it
    pub fn with_condenser(mut self, condenser: Condenser) -> Self {
        self.condenser = Some(condenser);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<StageCache> {
        &self.cache
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Key `stage` would be cached under right now
    pub fn stage_key(&self, session: &PipelineSession, stage: &str, params: &RunParams) -> Result<CacheKey> {
        let definition = self.pipeline.stage(stage)?;
        let inputs = session.dependency_contents(&self.pipeline, stage)?;
        Ok(self.key_for(session, definition, &inputs, params))
    }

    fn key_for(
        &self,
        session: &PipelineSession,
        definition: &StageDefinition,
        inputs: &StageInputs,
        params: &RunParams,
    ) -> CacheKey {
        let deps: Vec<(&str, &str)> = inputs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let settings = format!(
            "{}|{}",
            session.index_fingerprint(),
            self.settings.fingerprint_for(definition, self.condenser.is_some())
        );
        reproducibility_key(session.document_id(), definition, &deps, &settings, params)
    }

    /// Execute one stage. A Ready result that is current, edited or refined
    /// is returned without a model call.
    pub async fn run_stage(&self, session: &mut PipelineSession, stage: &str, params: &RunParams) -> Result<StageRun> {
        let span = stage_span(session.document_id().as_str(), stage);
        self.execute(session, stage, params, true).instrument(span).await
    }

    /// Like [`run_stage`](Self::run_stage) but ignores the session's current
    /// result, so edits and refinements are replaced by the cached or freshly
    /// generated content for `params`.
    pub async fn regenerate_stage(
        &self,
        session: &mut PipelineSession,
        stage: &str,
        params: &RunParams,
    ) -> Result<StageRun> {
        let span = stage_span(session.document_id().as_str(), stage);
        self.execute(session, stage, params, false).instrument(span).await
    }

    /// `target` and whatever it needs, in dependency order
    pub async fn run_through(
        &self,
        session: &mut PipelineSession,
        target: &str,
        params: &RunParams,
    ) -> Result<Vec<StageRun>> {
        let plan: Vec<String> = self
            .pipeline
            .plan_for(target)?
            .into_iter()
            .map(str::to_string)
            .collect();
        self.run_plan(session, &plan, params).await
    }

    /// Every stage of the pipeline
    pub async fn run_all(&self, session: &mut PipelineSession, params: &RunParams) -> Result<Vec<StageRun>> {
        let plan: Vec<String> = self.pipeline.stages().iter().map(|s| s.name.clone()).collect();
        self.run_plan(session, &plan, params).await
    }

    async fn run_plan(
        &self,
        session: &mut PipelineSession,
        plan: &[String],
        params: &RunParams,
    ) -> Result<Vec<StageRun>> {
        let mut runs = Vec::with_capacity(plan.len());
        for stage in plan {
            runs.push(self.run_stage(session, stage, params).await?);
        }
        Ok(runs)
    }

    async fn execute(
        &self,
        session: &mut PipelineSession,
        stage: &str,
        params: &RunParams,
        keep_current: bool,
    ) -> Result<StageRun> {
        let started = Instant::now();
        let definition = self.pipeline.stage(stage)?;
        let inputs = session.dependency_contents(&self.pipeline, stage)?;
        let key = self.key_for(session, definition, &inputs, params);

        if keep_current {
            if let Some(current) = session.ready_result(stage) {
                if current.cache_key == key || current.origin != ResultOrigin::Generated {
                    debug!(cache_key = %short_id(&current.cache_key), origin = ?current.origin, "stage already ready");
                    return Ok(StageRun {
                        stage: stage.to_string(),
                        result: current.clone(),
                        cache_hit: true,
                        elapsed: started.elapsed(),
                    });
                }
            }
        }

        let view: &PipelineSession = session;
        let outcome = self
            .cache
            .get_or_try_insert_with(&key, || self.generate(view, definition, &inputs, &key))
            .await;

        match outcome {
            Ok((result, cache_hit)) => {
                let result = session.commit(&self.pipeline, result)?.clone();
                let elapsed = started.elapsed();
                info!(
                    cache_key = %short_id(&key),
                    cache_hit,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stage ready"
                );
                Ok(StageRun {
                    stage: stage.to_string(),
                    result,
                    cache_hit,
                    elapsed,
                })
            }
            Err(e) => {
                session.record_failure(&self.pipeline, stage)?;
                warn!(error = %e, "stage failed");
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        session: &PipelineSession,
        definition: &StageDefinition,
        inputs: &StageInputs,
        key: &str,
    ) -> Result<StageResult> {
        let stage = definition.name.as_str();
        let query = definition.query.build(inputs);
        let context = self.stage_context(session, definition, &query).await?;

        let values = self.prompt_values(inputs, context)?;
        let prompt = definition.prompt.render(&values)?;
        let reply = self
            .generator
            .complete(&prompt, definition.temperature)
            .await
            .map_err(|e| generation_error(stage, e))?;

        let content = match &definition.kind {
            StageKind::Facts(schema) => schema.parse_reply(stage, &reply)?.to_content()?,
            StageKind::Report => {
                let content = reply.trim();
                if content.is_empty() {
                    return Err(PipelineError::Generation {
                        stage: stage.to_string(),
                        message: "model returned an empty reply".to_string(),
                    });
                }
                content.to_string()
            }
        };

        Ok(StageResult::new(stage, content, key.to_string(), ResultOrigin::Generated))
    }

    /// Condensed document for long inputs when the stage allows it,
    /// otherwise retrieved chunks under the context budget
    async fn stage_context(&self, session: &PipelineSession, definition: &StageDefinition, query: &str) -> Result<String> {
        let stage = definition.name.as_str();
        let text = &session.document().text;
        let chars = text.chars().count();

        if definition.condense_long_input && chars > self.settings.map_reduce.threshold_chars {
            if let Some(condenser) = &self.condenser {
                info!(chars, threshold = self.settings.map_reduce.threshold_chars, "condensing long document");
                return condenser
                    .condense(self.generator.clone(), text, query)
                    .await
                    .map_err(|e| generation_error(stage, e));
            }
        }

        let strategy = self.settings.strategy_for(definition);
        self.retrieved_context(session, query, strategy)
            .await
            .map_err(|e| generation_error(stage, e))
    }

    async fn retrieved_context(
        &self,
        session: &PipelineSession,
        query: &str,
        strategy: RetrievalStrategy,
    ) -> Result<String> {
        let index = session.index()?;
        let hits = self.retriever.retrieve(&index, query, strategy).await?;
        let assembled = self.context_builder.build(&hits);
        debug!(
            %strategy,
            chunks = assembled.chunk_count(),
            dropped = assembled.dropped,
            chars = assembled.char_count(),
            "context assembled"
        );
        Ok(assembled.text)
    }

    /// Dependency contents by stage name, facts keys, and the context
    fn prompt_values(&self, inputs: &StageInputs, context: String) -> Result<PromptValues> {
        let mut values = PromptValues::new();
        for (dep, content) in inputs {
            if let StageKind::Facts(schema) = &self.pipeline.stage(dep)?.kind {
                let sheet = schema.parse_content(dep, content)?;
                values.extend(sheet.iter().map(|(k, v)| (k.to_string(), v.to_string())));
            }
            values.insert(dep.clone(), content.clone());
        }
        values.insert(CONTEXT_FIELD.to_string(), context);
        Ok(values)
    }

    /// Regenerate the unlocked items of a Ready report stage. Locked items
    /// keep their exact text and position; the item count never changes.
    pub async fn refine_stage(
        &self,
        session: &mut PipelineSession,
        stage: &str,
        instruction: &str,
    ) -> Result<Refinement> {
        let span = stage_span(session.document_id().as_str(), stage);
        self.refine(session, stage, instruction).instrument(span).await
    }

    async fn refine(&self, session: &mut PipelineSession, stage: &str, instruction: &str) -> Result<Refinement> {
        let definition = self.pipeline.stage(stage)?;
        let current = session
            .ready_result(stage)
            .ok_or_else(|| PipelineError::StageNotReady {
                stage: stage.to_string(),
                missing: stage.to_string(),
            })?
            .clone();

        let report = parse(&current.content);
        if report.items.is_empty() {
            return Err(PipelineError::NoReportItems {
                stage: stage.to_string(),
            });
        }

        let locks = session.lock_state(stage);
        let (locked, unlocked): (Vec<ReportItem>, Vec<ReportItem>) = report
            .items
            .iter()
            .cloned()
            .partition(|item| locks.is_locked(item.ordinal));

        if unlocked.is_empty() {
            info!("every item is locked, nothing to refine");
            return Ok(Refinement {
                result: current,
                regenerated: Vec::new(),
                padded: Vec::new(),
            });
        }

        let query = std::iter::once(instruction.trim())
            .chain(unlocked.iter().map(|item| item.title()))
            .collect::<Vec<_>>()
            .join("\n");
        let strategy = self.settings.strategy_for(definition);
        let context = self
            .retrieved_context(session, &query, strategy)
            .await
            .map_err(|e| generation_error(stage, e))?;

        let outcome = self
            .refiner
            .refine(stage, &locked, &unlocked, &context, instruction)
            .await
            .map_err(|e| generation_error(stage, e))?;

        let mut replacements: BTreeMap<usize, ReportItem> =
            outcome.items.into_iter().map(|item| (item.ordinal, item)).collect();
        let items: Vec<ReportItem> = report
            .items
            .iter()
            .map(|original| {
                if locks.is_locked(original.ordinal) {
                    original.clone()
                } else {
                    replacements.remove(&original.ordinal).unwrap_or_else(|| original.clone())
                }
            })
            .collect();

        let regenerated: Vec<usize> = unlocked
            .iter()
            .map(|item| item.ordinal)
            .filter(|ordinal| !outcome.padded.contains(ordinal))
            .collect();

        let content = render(&report.header, &items);
        let result = session.commit_refinement(&self.pipeline, stage, content)?.clone();
        info!(
            locked = locked.len(),
            regenerated = regenerated.len(),
            padded = outcome.padded.len(),
            "stage refined"
        );

        Ok(Refinement {
            result,
            regenerated,
            padded: outcome.padded,
        })
    }
}

/// Model-side failures are reported against the stage that triggered them
fn generation_error(stage: &str, error: PipelineError) -> PipelineError {
    match error {
        PipelineError::ModelApi(_) | PipelineError::Http(_) | PipelineError::Timeout { .. } => {
            PipelineError::Generation {
                stage: stage.to_string(),
                message: error.to_string(),
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceDocument;
    use crate::model::HashingEmbedder;
    use crate::pipeline::facts::FactSchema;
    use crate::pipeline::prompt::PromptSpec;
    use crate::rag::chunker::Chunker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies by the first prompt marker it recognises
    struct StubModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationModel for StubModel {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if prompt.starts_with("FACTS") {
                Ok(r#"{"project_name": "차세대 시스템 구축", "project_budget": 1200000000}"#.to_string())
            } else if prompt.starts_with("You are revising") {
                Ok("1. 새 첫째\n2. 새 셋째".to_string())
            } else if prompt.starts_with("LIST") {
                Ok("1. 첫째\n2. 둘째\n3. 셋째".to_string())
            } else {
                Ok(format!("요약: {}", prompt.lines().count()))
            }
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        Arc::new(
            Pipeline::new(vec![
                StageDefinition::new(
                    "facts",
                    StageKind::Facts(FactSchema::project_overview()),
                    PromptSpec::new("facts", "FACTS\n{context}", &["context"]).unwrap(),
                ),
                StageDefinition::new(
                    "summary",
                    StageKind::Report,
                    PromptSpec::new("summary", "SUMMARY {project_name}\n{context}", &["project_name", "context"])
                        .unwrap(),
                )
                .depends_on(&["facts"]),
                StageDefinition::new(
                    "list",
                    StageKind::Report,
                    PromptSpec::new("list", "LIST\n{summary}\n{context}", &["summary", "context"]).unwrap(),
                )
                .depends_on(&["summary"]),
            ])
            .unwrap(),
        )
    }

    async fn setup() -> (StageExecutor, PipelineSession, Arc<StubModel>) {
        let model = Arc::new(StubModel {
            calls: AtomicUsize::new(0),
        });
        let executor = StageExecutor::new(
            pipeline(),
            model.clone(),
            Arc::new(StageCache::in_memory()),
            ExecutorSettings::default(),
        )
        .unwrap();
        let document = SourceDocument::from_text(
            "rfp.txt",
            "사업명: 차세대 시스템 구축\n\n사업 예산은 12억 원이다.\n\n보안 요구사항을 준수해야 한다.",
        );
        let session = PipelineSession::ingest(document, &Chunker::new(40, 5), Arc::new(HashingEmbedder::new()))
            .await
            .unwrap();
        (executor, session, model)
    }

    #[tokio::test]
    async fn test_dependency_not_ready() {
        let (executor, mut session, model) = setup().await;
        let err = executor
            .run_stage(&mut session, "summary", &RunParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageNotReady { ref missing, .. } if missing == "facts"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_facts_are_canonicalised_and_feed_dependents() {
        let (executor, mut session, _model) = setup().await;
        executor.run_stage(&mut session, "facts", &RunParams::default()).await.unwrap();

        let facts = session.ready_result("facts").unwrap();
        let sheet = FactSchema::project_overview().parse_content("facts", &facts.content).unwrap();
        assert_eq!(sheet.get("project_budget"), Some("1200000000"));
        assert_eq!(sheet.get("project_duration"), Some(crate::pipeline::facts::NOT_SPECIFIED));

        executor.run_stage(&mut session, "summary", &RunParams::default()).await.unwrap();
        assert!(session.ready_result("summary").unwrap().content.starts_with("요약"));
    }

    #[tokio::test]
    async fn test_rerun_is_cached() {
        let (executor, mut session, model) = setup().await;
        let first = executor.run_all(&mut session, &RunParams::default()).await.unwrap();
        let calls = model.calls.load(Ordering::SeqCst);
        assert!(first.iter().all(|run| !run.cache_hit));

        let second = executor.run_all(&mut session, &RunParams::default()).await.unwrap();
        assert!(second.iter().all(|run| run.cache_hit));
        assert_eq!(model.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_run_id_forces_regeneration() {
        let (executor, mut session, model) = setup().await;
        executor.run_stage(&mut session, "facts", &RunParams::new(1)).await.unwrap();
        let run = executor.run_stage(&mut session, "facts", &RunParams::new(2)).await.unwrap();
        assert!(!run.cache_hit);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refine_keeps_locked_items() {
        let (executor, mut session, _model) = setup().await;
        executor.run_through(&mut session, "list", &RunParams::default()).await.unwrap();

        session.set_item_lock(executor.pipeline(), "list", 2, true).unwrap();
        let refinement = executor.refine_stage(&mut session, "list", "더 구체적으로").await.unwrap();

        let items = parse(&refinement.result.content).items;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].raw_text, "1. 새 첫째");
        assert_eq!(items[1].raw_text, "2. 둘째");
        assert_eq!(items[2].raw_text, "3. 새 셋째");
        assert_eq!(refinement.regenerated, vec![1, 3]);
        assert!(session.lock_state("list").is_locked(2));
    }

    #[tokio::test]
    async fn test_refine_requires_items() {
        let (executor, mut session, _model) = setup().await;
        executor.run_through(&mut session, "summary", &RunParams::default()).await.unwrap();
        let err = executor.refine_stage(&mut session, "summary", "x").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoReportItems { .. }));
    }

    #[test]
    fn test_model_errors_are_attributed_to_the_stage() {
        let err = generation_error("risk", PipelineError::ModelApi("502".to_string()));
        assert_eq!(err.stage(), Some("risk"));
        let err = generation_error("risk", PipelineError::EmptyCorpus);
        assert!(matches!(err, PipelineError::EmptyCorpus));
    }
}
