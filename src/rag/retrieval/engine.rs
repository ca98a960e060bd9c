// Retrieval engine: direct and hypothetical-document search over a SemanticIndex
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::model::GenerationModel;
use crate::rag::index::{IndexQuery, ScoredChunk, SemanticIndex};
use crate::rag::RetrievalStrategy;

/// Temperature for the hypothetical passage; kept at zero so reruns retrieve the same chunks
const HYDE_TEMPERATURE: f32 = 0.0;

const HYDE_PROMPT: &str = "You are reading a public Request for Proposal (RFP).\n\
Write a short passage, in the same language as the request below, that reads as if it \
were copied from the RFP itself and contains the information the request is looking for. \
Do not explain or answer directly; write only the passage.\n\n\
Request: ";

/// Search parameters for retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of chunks to retrieve
    pub top_k: usize,
    /// How the query is turned into a search vector
    pub strategy: RetrievalStrategy,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 6,
            strategy: RetrievalStrategy::Direct,
        }
    }
}

/// Retrieval engine for semantic search
pub struct Retriever {
    generator: Arc<dyn GenerationModel>,
    default_params: SearchParams,
}

impl Retriever {
    /// Create new retriever
    pub fn new(generator: Arc<dyn GenerationModel>) -> Self {
        Self {
            generator,
            default_params: SearchParams::default(),
        }
    }

    /// Create with custom default parameters
    pub fn with_params(generator: Arc<dyn GenerationModel>, params: SearchParams) -> Self {
        Self {
            generator,
            default_params: params,
        }
    }

    /// Retrieve with the default parameters but an explicit strategy
    pub async fn retrieve(
        &self,
        index: &SemanticIndex,
        query: &str,
        strategy: RetrievalStrategy,
    ) -> Result<Vec<ScoredChunk>> {
        let params = SearchParams {
            strategy,
            ..self.default_params.clone()
        };
        self.retrieve_with_params(index, query, &params).await
    }

    /// Retrieve with custom parameters
    pub async fn retrieve_with_params(
        &self,
        index: &SemanticIndex,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<ScoredChunk>> {
        let hits = match params.strategy {
            RetrievalStrategy::Direct => index.query(IndexQuery::Text(query), params.top_k).await?,
            RetrievalStrategy::Hyde => {
                let passage = self.hypothetical_passage(query).await?;
                index.query(IndexQuery::Text(&passage), params.top_k).await?
            }
        };

        debug!(
            strategy = ?params.strategy,
            top_k = params.top_k,
            hits = hits.len(),
            "retrieval complete"
        );
        Ok(hits)
    }

    /// Ask the model for a passage shaped like the text we hope to find.
    /// An empty reply falls back to a templated passage built from the query.
    pub async fn hypothetical_passage(&self, query: &str) -> Result<String> {
        let prompt = format!("{}{}", HYDE_PROMPT, query);
        let passage = self.generator.complete(&prompt, HYDE_TEMPERATURE).await?;
        let passage = passage.trim();

        if passage.is_empty() {
            warn!("hypothetical passage was empty, searching with a templated passage");
            return Ok(templated_passage(query));
        }
        Ok(passage.to_string())
    }

    /// Get default search parameters
    pub fn default_params(&self) -> &SearchParams {
        &self.default_params
    }
}

fn templated_passage(query: &str) -> String {
    format!("RFP 본문 발췌: {} 에 관한 내용은 다음과 같다.", query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashingEmbedder;
    use crate::rag::chunker::split;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with a fixed passage and records prompts
    struct FixedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationModel for FixedModel {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    async fn index() -> SemanticIndex {
        let text = "제안서 평가는 기술 평가 80점과 가격 평가 20점으로 구성된다.\n\
                    사업 기간은 계약일로부터 6개월로 한다.\n\
                    납품 장소는 발주기관이 지정하는 장소로 한다.\n";
        SemanticIndex::build(split(text, 60, 0), Arc::new(HashingEmbedder::new()))
            .await
            .unwrap()
    }

    #[test]
    fn test_search_params_default() {
        let params = SearchParams::default();
        assert_eq!(params.top_k, 6);
        assert_eq!(params.strategy, RetrievalStrategy::Direct);
    }

    #[tokio::test]
    async fn test_direct_makes_no_generation_call() {
        let model = FixedModel::new("unused");
        let retriever = Retriever::new(model.clone());
        let hits = retriever
            .retrieve(&index().await, "사업 기간", RetrievalStrategy::Direct)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hyde_searches_with_generated_passage() {
        let model = FixedModel::new("기술 평가 80점과 가격 평가 20점으로 구성된다");
        let retriever = Retriever::with_params(
            model.clone(),
            SearchParams {
                top_k: 1,
                strategy: RetrievalStrategy::Direct,
            },
        );
        let hits = retriever
            .retrieve(&index().await, "how are proposals scored?", RetrievalStrategy::Hyde)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains("기술 평가"));
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("how are proposals scored?"));
    }

    #[tokio::test]
    async fn test_empty_passage_falls_back_to_template() {
        let retriever = Retriever::new(FixedModel::new("   "));
        let passage = retriever.hypothetical_passage("사업 예산").await.unwrap();
        assert!(passage.contains("사업 예산"));
    }
}
