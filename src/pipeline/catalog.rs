//! Default RFP analysis pipeline
//!
//! ```text
//! facts ──> strategy ──> ksf ──> outline
//!   │           └────────────────────^
//!   └─────> risk
//! ```
//!
//! Every report is written in Korean for a bidding team preparing a proposal.

use crate::config::MapReduceConfig;
use crate::errors::Result;
use crate::pipeline::facts::{FactSchema, NOT_SPECIFIED};
use crate::pipeline::graph::Pipeline;
use crate::pipeline::mapreduce::Condenser;
use crate::pipeline::prompt::PromptSpec;
use crate::pipeline::stage::{QueryBuilder, StageDefinition, StageKind};
use crate::rag::RetrievalStrategy;

pub const FACTS: &str = "facts";
pub const STRATEGY: &str = "strategy";
pub const RISK: &str = "risk";
pub const KSF: &str = "ksf";
pub const OUTLINE: &str = "outline";

const FACTS_QUERY: &str = "사업명, 사업 기간, 사업 예산, 추진 배경 및 목적";

const STRATEGY_TEMPLATE: &str = "You are the proposal manager of a company bidding on the public \
Request for Proposal (RFP) below. Write an internal strategy report in Korean, using only the RFP \
excerpts. Do not invent figures or requirements.\n\n\
## RFP excerpts\n{context}\n\n\
Start the report with this overview block exactly as given, then continue with the numbered sections.\n\n\
### 프로젝트 개요\n\
- **사업명:** {project_name}\n\
- **사업 기간:** {project_duration}\n\
- **사업 예산:** {project_budget}\n\
- **추진 배경:** {project_background}\n\n\
### 1. 사업의 본질\n\
One-sentence definition of the project, the client's underlying problem, and the measurable goal.\n\n\
### 2. 핵심 과업\n\
The main work packages, the management and constraint requirements that must be met, and the key \
technical conditions.\n\n\
### 3. 평가와 수주 전략\n\
How proposals are scored and which points the proposal must stress to win.";

const RISK_TEMPLATE: &str = "You are a risk analyst reviewing a public Request for Proposal (RFP) for \
a bidding team. Using only the excerpts below, list the 5 to 7 most serious risks of winning and \
delivering this project (schedule, scope, technology, contract, stakeholders). Answer in Korean as a \
numbered list, one item per risk, in the form `1. **위험 제목**: 근거와 대응 방안`.\n\n\
Project: {project_name} ({project_duration}, {project_budget})\n\n\
## RFP excerpts\n{context}";

const KSF_TEMPLATE: &str = "You are a business analyst. Based only on the strategy report and the RFP \
excerpts below, identify the 5 or 6 key success factors (KSF) that decide who wins this bid. Answer in \
Korean as a numbered list, one item per factor, each with a short explanation.\n\n\
## Strategy report\n{strategy}\n\n\
## RFP excerpts\n{context}";

const OUTLINE_TEMPLATE: &str = "You are a proposal strategist preparing the table of contents of the \
presentation for this bid. Use only the documents below. Answer in Korean.\n\n\
## Strategy report\n{strategy}\n\n\
## Key success factors\n{ksf}\n\n\
## RFP excerpts\n{context}\n\n\
Write the outline as a numbered list of slides, one item per slide, in the form \
`1. [헤드라인]` followed by two or three bullet points with the key messages. Open with about five \
slides that frame the client's situation (new build or upgrade of an existing system), then one slide \
with the key success factors, then seven or eight slides of delivery strategy, each tied to a KSF.";

const CONDENSE_MAP_TEMPLATE: &str = "Below is one excerpt of a long Request for Proposal (RFP). Copy out \
every sentence relevant to: {focus}\n\
Keep requirement numbers, figures and dates verbatim. Drop boilerplate. If nothing is relevant, \
answer with an empty line.\n\n\
## Excerpt\n{excerpt}";

const CONDENSE_REDUCE_TEMPLATE: &str = "Below are notes taken from consecutive parts of one Request for \
Proposal (RFP), all about: {focus}\n\
Merge them into one document in Korean. Remove duplicated requirements, group related items under \
clear headings, and keep every figure and date.\n\n\
## Notes\n{partials}";

fn facts_template(schema: &FactSchema) -> String {
    let fields = schema
        .fields()
        .iter()
        .map(|f| format!("- {}: {}", f.key, f.label))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You extract facts from a public Request for Proposal (RFP). Find these items in the excerpts:\n\
         {fields}\n\n\
         Copy each value exactly as written in the excerpts. If an item is not stated, use \"{missing}\". \
         Reply with a single JSON object of this shape and nothing else:\n\
         {skeleton}\n\n\
         ## RFP excerpts\n{{context}}",
        fields = fields,
        missing = NOT_SPECIFIED,
        skeleton = schema.json_skeleton(),
    )
}

/// Stage definitions of the default pipeline, in definition order
pub fn default_stages() -> Result<Vec<StageDefinition>> {
    let schema = FactSchema::project_overview();
    let facts_prompt = PromptSpec::new(FACTS, &facts_template(&schema), &["context"])?;

    Ok(vec![
        StageDefinition::new(FACTS, StageKind::Facts(schema), facts_prompt)
            .title("프로젝트 개요")
            .query(QueryBuilder::fixed(FACTS_QUERY))
            .strategy(RetrievalStrategy::Direct)
            .temperature(0.0),
        StageDefinition::new(
            STRATEGY,
            StageKind::Report,
            PromptSpec::new(
                STRATEGY,
                STRATEGY_TEMPLATE,
                &[
                    "context",
                    "project_name",
                    "project_duration",
                    "project_budget",
                    "project_background",
                ],
            )?,
        )
        .title("전략 보고서")
        .depends_on(&[FACTS])
        .query(QueryBuilder::fixed(
            "사업 목표, 주요 과업 범위, 요구사항, 제약 조건, 평가 기준 및 배점",
        ))
        .strategy(RetrievalStrategy::Hyde)
        .temperature(0.2)
        .condense_long_input(true),
        StageDefinition::new(
            RISK,
            StageKind::Report,
            PromptSpec::new(
                RISK,
                RISK_TEMPLATE,
                &["context", "project_name", "project_duration", "project_budget"],
            )?,
        )
        .title("리스크 분석")
        .depends_on(&[FACTS])
        .query(QueryBuilder::fixed(
            "일정 지연, 범위 변경, 기술적 난이도, 계약 조건, 지체상금, 하자보수 등 사업 수행 위험 요인",
        ))
        .strategy(RetrievalStrategy::Hyde)
        .temperature(0.2),
        StageDefinition::new(KSF, StageKind::Report, PromptSpec::new(KSF, KSF_TEMPLATE, &["strategy", "context"])?)
            .title("핵심 성공 요소")
            .depends_on(&[STRATEGY])
            .query(QueryBuilder::new(|inputs| {
                let focus = inputs.get(STRATEGY).map(|s| first_section(s)).unwrap_or_default();
                format!("이 사업 수주를 위한 핵심 성공 요소와 평가 항목. {}", focus)
            }))
            .strategy(RetrievalStrategy::Hyde)
            .temperature(0.7),
        StageDefinition::new(
            OUTLINE,
            StageKind::Report,
            PromptSpec::new(OUTLINE, OUTLINE_TEMPLATE, &["strategy", "ksf", "context"])?,
        )
        .title("발표자료 목차")
        .depends_on(&[STRATEGY, KSF])
        .query(QueryBuilder::fixed("사업 추진 배경, 현행 시스템 현황, 사업 목표와 기대 효과"))
        .strategy(RetrievalStrategy::Direct)
        .temperature(0.7),
    ])
}

pub fn default_pipeline() -> Result<Pipeline> {
    Pipeline::new(default_stages()?)
}

/// Condenser used by stages that opt into long-document map-reduce
pub fn condenser(config: &MapReduceConfig) -> Result<Condenser> {
    Ok(Condenser::new(
        config,
        PromptSpec::new("condense_map", CONDENSE_MAP_TEMPLATE, &["focus", "excerpt"])?,
        PromptSpec::new("condense_reduce", CONDENSE_REDUCE_TEMPLATE, &["focus", "partials"])?,
    ))
}

// Text of the first "### 1." section of a strategy report, capped for use in a query
fn first_section(report: &str) -> String {
    let section: String = report
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("### 1"))
        .skip(1)
        .take_while(|line| !line.trim_start().starts_with("###"))
        .collect::<Vec<_>>()
        .join(" ");
    section.chars().take(300).collect()
}
