//! Ordering of pipelines into waves of mutually independent pipelines.
//!
//! A pipeline depends on every other pipeline that writes a class or memory
//! slot it reads. Classes a pipeline both reads and writes are local to it and
//! create no edge; temporary classes never leave their pipeline.

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::enums::{CacheSlot, ClassId};
use crate::settings::{Pipeline, SettingParserLog};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cycle detected in pipelines [{}]", .pipelines.join(", "))]
    CycleDetected { pipelines: Vec<String> },
    #[error("Pipeline index {index} out of range ({count} pipelines)")]
    UnknownPipeline { index: usize, count: usize },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// What flows between pipelines.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
enum DependencyKey {
    Class(ClassId),
    Slot(CacheSlot),
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::Class(class_id) => write!(f, "{class_id}"),
            DependencyKey::Slot(slot) => write!(f, "{slot}"),
        }
    }
}

fn shared_class(class_id: &ClassId) -> bool {
    !class_id.is_temporary() && *class_id != ClassId::NONE && *class_id != ClassId::UNDEFINED
}

fn output_keys(pipeline: &Pipeline) -> BTreeSet<DependencyKey> {
    pipeline
        .output_classes()
        .iter()
        .filter(|c| shared_class(c))
        .map(|c| DependencyKey::Class(*c))
        .chain(pipeline.output_image_cache().into_iter().map(DependencyKey::Slot))
        .collect()
}

fn input_keys(pipeline: &Pipeline, outputs: &BTreeSet<DependencyKey>) -> BTreeSet<DependencyKey> {
    pipeline
        .input_classes()
        .iter()
        .filter(|c| shared_class(c))
        .map(|c| DependencyKey::Class(*c))
        .chain(pipeline.input_image_cache().into_iter().map(DependencyKey::Slot))
        .filter(|key| !outputs.contains(key))
        .collect()
}

/// Waves of pipeline indices. Wave `k` only depends on waves `< k`; inside a
/// wave pipelines are in declaration order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DependencyGraph {
    waves: Vec<Vec<usize>>,
    dependencies: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn build(pipelines: &[Pipeline]) -> GraphResult<DependencyGraph> {
        Self::calc(pipelines, None, None)
    }

    /// Like [`Self::build`], reporting unresolved inputs and cycles into `log`.
    pub fn build_with_log(
        pipelines: &[Pipeline],
        log: &mut SettingParserLog,
    ) -> GraphResult<DependencyGraph> {
        Self::calc(pipelines, None, Some(log))
    }

    /// Graph restricted to `target` and everything it transitively depends on.
    pub fn build_for(pipelines: &[Pipeline], target: usize) -> GraphResult<DependencyGraph> {
        if target >= pipelines.len() {
            return Err(GraphError::UnknownPipeline {
                index: target,
                count: pipelines.len(),
            });
        }
        Self::calc(pipelines, Some(target), None)
    }

    fn calc(
        pipelines: &[Pipeline],
        target: Option<usize>,
        mut log: Option<&mut SettingParserLog>,
    ) -> GraphResult<DependencyGraph> {
        let outputs: Vec<BTreeSet<DependencyKey>> = pipelines.iter().map(output_keys).collect();

        let mut dependencies = vec![BTreeSet::new(); pipelines.len()];
        for (idx, pipeline) in pipelines.iter().enumerate() {
            let mut unresolved = input_keys(pipeline, &outputs[idx]);
            for (other, provided) in outputs.iter().enumerate() {
                if other == idx {
                    continue;
                }
                if !unresolved.is_disjoint(provided) {
                    dependencies[idx].insert(other);
                }
            }
            unresolved.retain(|key| !outputs.iter().any(|o| o.contains(key)));
            if !unresolved.is_empty() {
                let names: Vec<String> = unresolved.iter().map(ToString::to_string).collect();
                let message = format!(
                    "Unresolved dependency, no pipeline provides [{}]",
                    names.join(", ")
                );
                match log.as_deref_mut() {
                    Some(log) => log.warning(pipeline.meta.name.as_str(), message),
                    None => warn!(pipeline = %pipeline.meta.name, "{message}"),
                }
            }
        }

        let included: BTreeSet<usize> = match target {
            Some(target) => {
                let mut closure = BTreeSet::from([target]);
                let mut stack = vec![target];
                while let Some(idx) = stack.pop() {
                    for &dep in &dependencies[idx] {
                        if closure.insert(dep) {
                            stack.push(dep);
                        }
                    }
                }
                closure
            }
            None => (0..pipelines.len()).collect(),
        };

        let mut remaining = included.clone();
        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let wave: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|idx| dependencies[*idx].iter().all(|dep| !remaining.contains(dep)))
                .collect();
            if wave.is_empty() {
                let names: Vec<String> = remaining
                    .iter()
                    .map(|idx| pipelines[*idx].meta.name.clone())
                    .collect();
                let err = GraphError::CycleDetected { pipelines: names };
                error!("{err}");
                if let Some(log) = log {
                    log.error("Pipelines", err.to_string());
                }
                return Err(err);
            }
            for idx in &wave {
                remaining.remove(idx);
            }
            debug!(wave = waves.len(), pipelines = ?wave, "Pipeline wave");
            waves.push(wave);
        }

        Ok(DependencyGraph { waves, dependencies })
    }

    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Pipelines `idx` directly depends on.
    pub fn dependencies(&self, idx: usize) -> &BTreeSet<usize> {
        &self.dependencies[idx]
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.waves.iter().any(|w| w.contains(&idx))
    }

    pub fn pipeline_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Pipeline indices in execution order.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.waves.iter().flatten().copied()
    }
}
