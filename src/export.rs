//! Sheet-per-report export bundle
//!
//! The spreadsheet writer lives outside this crate; it receives a
//! [`ReportBundle`] as JSON. Facts become a two-column sheet, every Ready
//! report stage becomes a sheet holding its Markdown.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::pipeline::graph::Pipeline;
use crate::pipeline::session::PipelineSession;
use crate::pipeline::stage::StageKind;

/// Name of the facts sheet
pub const OVERVIEW_SHEET: &str = "프로젝트 개요";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SheetBody {
    /// `(label, value)` rows
    KeyValue { rows: Vec<(String, String)> },
    Markdown { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub stage: String,
    pub body: SheetBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBundle {
    pub document_name: String,
    pub document_id: String,
    pub sheets: Vec<Sheet>,
}

impl ReportBundle {
    /// Facts sheet first, then report stages in pipeline order. Stages that
    /// are not Ready are left out.
    pub fn from_session(session: &PipelineSession, pipeline: &Pipeline) -> Result<Self> {
        let mut facts_sheets = Vec::new();
        let mut report_sheets = Vec::new();

        for stage in pipeline.stages() {
            let Some(result) = session.ready_result(&stage.name) else {
                continue;
            };
            match &stage.kind {
                StageKind::Facts(schema) => {
                    let sheet = schema.parse_content(&stage.name, &result.content)?;
                    let rows = sheet
                        .labelled(schema)
                        .into_iter()
                        .map(|(label, value)| (label.to_string(), value.to_string()))
                        .collect();
                    facts_sheets.push(Sheet {
                        name: OVERVIEW_SHEET.to_string(),
                        stage: stage.name.clone(),
                        body: SheetBody::KeyValue { rows },
                    });
                }
                StageKind::Report => report_sheets.push(Sheet {
                    name: stage.title.clone(),
                    stage: stage.name.clone(),
                    body: SheetBody::Markdown {
                        text: result.content.clone(),
                    },
                }),
            }
        }

        facts_sheets.extend(report_sheets);
        Ok(Self {
            document_name: session.document().name.clone(),
            document_id: session.document_id().to_string(),
            sheets: facts_sheets,
        })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
