//! Shared fixtures: a scripted generation model that counts its calls

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rfpanalyst::errors::{PipelineError, Result};
use rfpanalyst::ingest::SourceDocument;
use rfpanalyst::model::{GenerationModel, HashingEmbedder};
use rfpanalyst::pipeline::{catalog, ExecutorSettings, PipelineSession, StageCache, StageExecutor};
use rfpanalyst::rag::Chunker;

pub const RFP_TEXT: &str = "스마트 행정 플랫폼 구축 사업 제안요청서\n\n\
1. 사업 개요\n\
사업명: 스마트 행정 플랫폼 구축\n\
사업 기간: 계약일로부터 10개월\n\
추진 배경: 노후화된 민원 시스템을 클라우드 기반으로 전환하여 대국민 서비스 품질을 높인다.\n\n\
2. 요구사항\n\
기능 요구사항으로 통합 민원 접수, 전자 결재 연계, 모바일 알림 기능을 제공해야 한다. \
보안 요구사항으로 개인정보 암호화와 접근 통제를 적용해야 한다. \
성능 요구사항으로 동시 사용자 3,000명을 지원해야 한다.\n\n\
3. 평가 기준\n\
기술 평가 90점, 가격 평가 10점으로 구성된다. 사업 이해도와 수행 방법론의 배점이 가장 높다.\n\n\
4. 제약 사항\n\
기존 데이터는 무중단으로 이관해야 하며, 지체상금은 일 0.1%가 부과된다.";

/// Which catalog prompt a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Hyde,
    Facts,
    Strategy,
    Risk,
    Ksf,
    Outline,
    Refine,
    CondenseMap,
    CondenseReduce,
    Other,
}

impl Kind {
    fn of(prompt: &str) -> Kind {
        let prefixes = [
            ("You are reading a public Request for Proposal", Kind::Hyde),
            ("You extract facts", Kind::Facts),
            ("You are the proposal manager", Kind::Strategy),
            ("You are a risk analyst", Kind::Risk),
            ("You are a business analyst", Kind::Ksf),
            ("You are a proposal strategist", Kind::Outline),
            ("You are revising", Kind::Refine),
            ("Below is one excerpt", Kind::CondenseMap),
            ("Below are notes", Kind::CondenseReduce),
        ];
        prefixes
            .iter()
            .find(|(prefix, _)| prompt.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(Kind::Other)
    }
}

/// Deterministic stand-in for the generation model
#[derive(Default)]
pub struct ScriptedModel {
    calls: AtomicUsize,
    by_kind: Mutex<HashMap<Kind, usize>>,
    prompts: Mutex<Vec<(Kind, String)>>,
    delay_ms: AtomicUsize,
    failing: Mutex<Option<Kind>>,
    facts_reply: Mutex<Option<String>>,
    refine_reply: Mutex<Option<String>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let model = Self::default();
        model.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
        Arc::new(model)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_of(&self, kind: Kind) -> usize {
        self.by_kind.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn prompts_of(&self, kind: Kind) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn fail_on(&self, kind: Option<Kind>) {
        *self.failing.lock().unwrap() = kind;
    }

    pub fn set_facts_reply(&self, reply: &str) {
        *self.facts_reply.lock().unwrap() = Some(reply.to_string());
    }

    pub fn set_refine_reply(&self, reply: &str) {
        *self.refine_reply.lock().unwrap() = Some(reply.to_string());
    }

    fn reply(&self, kind: Kind, prompt: &str) -> String {
        match kind {
            Kind::Hyde => "본 사업의 평가는 기술 평가와 가격 평가로 구성된다.".to_string(),
            Kind::Facts => self.facts_reply.lock().unwrap().clone().unwrap_or_else(|| {
                "추출 결과는 다음과 같습니다.\n```json\n{\"project_name\": \"스마트 행정 플랫폼 구축\", \
                 \"project_duration\": \"계약일로부터 10개월\", \"project_budget\": null, \
                 \"project_background\": \"노후 민원 시스템의 클라우드 전환\"}\n```"
                    .to_string()
            }),
            Kind::Strategy => {
                let header: Vec<&str> = prompt
                    .lines()
                    .skip_while(|line| !line.starts_with("### 프로젝트 개요"))
                    .take(5)
                    .collect();
                format!(
                    "{}\n\n### 1. 사업의 본질\n민원 시스템의 클라우드 전환\n\n### 2. 핵심 과업\n데이터 무중단 이관\n\n### 3. 평가와 수주 전략\n기술 평가 90점 공략",
                    header.join("\n")
                )
            }
            Kind::Risk => "1. **일정 위험**: 10개월 내 이관\n2. **지체상금**: 일 0.1%".to_string(),
            Kind::Ksf => "핵심 성공 요소\n\n1. 무중단 데이터 이관\n2. 개인정보 보안 체계\n3. 클라우드 전환 경험".to_string(),
            Kind::Outline => "1. [변화의 시작]\n- 노후 시스템\n2. [핵심 성공 요소]\n- KSF 요약".to_string(),
            Kind::Refine => self
                .refine_reply
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "1. 수정된 항목".to_string()),
            Kind::CondenseMap => "관련 발췌".to_string(),
            Kind::CondenseReduce => "통합 요약된 RFP".to_string(),
            Kind::Other => "기타".to_string(),
        }
    }
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String> {
        let kind = Kind::of(prompt);
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.by_kind.lock().unwrap().entry(kind).or_insert(0) += 1;
        self.prompts.lock().unwrap().push((kind, prompt.to_string()));

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if *self.failing.lock().unwrap() == Some(kind) {
            return Err(PipelineError::ModelApi("scripted failure".to_string()));
        }
        Ok(self.reply(kind, prompt))
    }
}

pub fn executor(model: Arc<ScriptedModel>, cache: Arc<StageCache>) -> StageExecutor {
    executor_with(model, cache, ExecutorSettings::default())
}

pub fn executor_with(model: Arc<ScriptedModel>, cache: Arc<StageCache>, settings: ExecutorSettings) -> StageExecutor {
    let pipeline = Arc::new(catalog::default_pipeline().unwrap());
    let condenser = catalog::condenser(&settings.map_reduce).unwrap();
    StageExecutor::new(pipeline, model, cache, settings)
        .unwrap()
        .with_condenser(condenser)
}

pub async fn session_for(text: &str) -> PipelineSession {
    PipelineSession::ingest(
        SourceDocument::from_text("rfp.txt", text),
        &Chunker::new(120, 20),
        Arc::new(HashingEmbedder::new()),
    )
    .await
    .unwrap()
}
