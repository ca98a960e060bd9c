//! Validated stage graph
//!
//! Built once from a list of [`StageDefinition`]s. Construction rejects
//! duplicate names, dangling dependencies, cycles and prompts that ask for a
//! field the stage cannot supply. Stages are kept in a stable topological
//! order (definition order among independent stages).

use std::collections::{BTreeSet, HashMap};

use crate::errors::{PipelineError, Result};
use crate::pipeline::stage::{StageDefinition, StageKind};

/// Field every stage prompt may use: retrieved or condensed document text
pub const CONTEXT_FIELD: &str = "context";

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageDefinition>,
    positions: HashMap<String, usize>,
}

impl Pipeline {
    pub fn new(definitions: Vec<StageDefinition>) -> Result<Self> {
        let mut by_name: HashMap<&str, &StageDefinition> = HashMap::new();
        for def in &definitions {
            if by_name.insert(def.name.as_str(), def).is_some() {
                return Err(PipelineError::InvalidPipeline(format!(
                    "stage '{}' is defined twice",
                    def.name
                )));
            }
        }

        for def in &definitions {
            for dep in &def.depends_on {
                if !by_name.contains_key(dep.as_str()) {
                    return Err(PipelineError::InvalidPipeline(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        def.name, dep
                    )));
                }
            }
            check_prompt_fields(def, &by_name)?;
        }

        let order = topological_order(&definitions)?;
        let mut slots: Vec<Option<StageDefinition>> = definitions.into_iter().map(Some).collect();
        let stages: Vec<StageDefinition> = order.into_iter().filter_map(|i| slots[i].take()).collect();
        let positions = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        Ok(Self { stages, positions })
    }

    /// Stages in execution order
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Result<&StageDefinition> {
        self.positions
            .get(name)
            .map(|&i| &self.stages[i])
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Every stage that transitively depends on `name`, in execution order
    pub fn dependents_of(&self, name: &str) -> Result<Vec<&str>> {
        let start = *self
            .positions
            .get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;

        let mut affected: BTreeSet<&str> = BTreeSet::new();
        affected.insert(name);
        let mut dependents = Vec::new();

        // Topological order guarantees dependents come after their dependencies
        for stage in &self.stages[start + 1..] {
            if stage.depends_on.iter().any(|d| affected.contains(d.as_str())) {
                affected.insert(stage.name.as_str());
                dependents.push(stage.name.as_str());
            }
        }
        Ok(dependents)
    }

    /// `target` and everything it transitively needs, in execution order
    pub fn plan_for(&self, target: &str) -> Result<Vec<&str>> {
        let end = *self
            .positions
            .get(target)
            .ok_or_else(|| PipelineError::UnknownStage(target.to_string()))?;

        let mut needed: BTreeSet<&str> = BTreeSet::new();
        needed.insert(target);
        for stage in self.stages[..=end].iter().rev() {
            if needed.contains(stage.name.as_str()) {
                needed.extend(stage.depends_on.iter().map(String::as_str));
            }
        }

        Ok(self.stages[..=end]
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| needed.contains(name))
            .collect())
    }
}

/// Fields a stage can fill: context, each dependency by name, and the keys
/// of any facts dependency
pub fn available_fields(def: &StageDefinition, lookup: impl Fn(&str) -> Option<StageKind>) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    fields.insert(CONTEXT_FIELD.to_string());
    for dep in &def.depends_on {
        fields.insert(dep.clone());
        if let Some(StageKind::Facts(schema)) = lookup(dep) {
            fields.extend(schema.keys().map(str::to_string));
        }
    }
    fields
}

fn check_prompt_fields(def: &StageDefinition, by_name: &HashMap<&str, &StageDefinition>) -> Result<()> {
    let available = available_fields(def, |dep| by_name.get(dep).map(|d| d.kind.clone()));
    match def.prompt.required_fields().find(|f| !available.contains(*f)) {
        Some(field) => Err(PipelineError::Prompt {
            template: def.prompt.name().to_string(),
            field: format!("{} cannot be supplied by stage '{}'", field, def.name),
        }),
        None => Ok(()),
    }
}

/// Kahn's algorithm, always taking the earliest-defined ready stage
fn topological_order(definitions: &[StageDefinition]) -> Result<Vec<usize>> {
    let index: HashMap<&str, usize> = definitions
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();

    let mut remaining: Vec<usize> = definitions.iter().map(|d| d.depends_on.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); definitions.len()];
    for (i, def) in definitions.iter().enumerate() {
        for dep in &def.depends_on {
            dependents[index[dep.as_str()]].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..definitions.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(definitions.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &d in &dependents[next] {
            remaining[d] -= 1;
            if remaining[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != definitions.len() {
        let stuck: Vec<&str> = (0..definitions.len())
            .filter(|i| !order.contains(i))
            .map(|i| definitions[i].name.as_str())
            .collect();
        return Err(PipelineError::CyclicPipeline(format!(
            "cycle among stages: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}
