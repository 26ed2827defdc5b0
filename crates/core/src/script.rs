//! Authored Dialogue Scripts
//!
//! This module defines the immutable step data that drives a tutoring module
//! and the `ScriptStore`, a read-only catalog mapping module identifiers to
//! their ordered step sequences. Scripts are plain data (deserializable from
//! JSON), which keeps the engine logic independent of any specific lesson
//! content and lets tests treat steps as fixtures.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// The presentation channel a step's messages belong to.
///
/// The channel is a closed variant fixed at authoring time; it is never
/// inferred from message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The ambient speech-bubble channel.
    Narration,
    /// The main conversational transcript.
    Interaction,
}

/// Display-timing hint for narration steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Slow,
    #[default]
    Normal,
    Fast,
}

/// How a learner's answer to a step is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Ordinary graded question: up to three attempts, then a forced advance.
    #[default]
    Graded,
    /// End-of-module open Q&A: loops until the model signals readiness.
    OpenQa,
}

/// Rubric context for an answerable step. Presence of an `EvaluationSpec`
/// on a step implies the step expects a judged free-text answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSpec {
    /// Rubric text fed verbatim to the model as grading context.
    pub rubric: String,
    #[serde(default)]
    pub kind: StepKind,
}

/// One authored unit of scripted dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Ordered message fragments to emit when the step executes.
    #[serde(default)]
    pub messages: Vec<String>,
    pub channel: Channel,
    /// Halt and await learner input instead of auto-advancing.
    #[serde(default)]
    pub wait_for_user: bool,
    #[serde(default)]
    pub evaluation: Option<EvaluationSpec>,
    /// Marks the step that completes the module. The engine stops here.
    #[serde(default)]
    pub module_complete: bool,
    #[serde(default)]
    pub pace: Pace,
}

impl Step {
    /// Creates a narration step with the given fragments.
    pub fn narration(messages: Vec<String>) -> Self {
        Self {
            messages,
            channel: Channel::Narration,
            wait_for_user: false,
            evaluation: None,
            module_complete: false,
            pace: Pace::Normal,
        }
    }

    /// Creates an interaction step with the given messages.
    pub fn interaction(messages: Vec<String>) -> Self {
        Self {
            channel: Channel::Interaction,
            ..Self::narration(messages)
        }
    }

    pub fn waiting(mut self) -> Self {
        self.wait_for_user = true;
        self
    }

    pub fn graded(mut self, rubric: impl Into<String>) -> Self {
        self.evaluation = Some(EvaluationSpec {
            rubric: rubric.into(),
            kind: StepKind::Graded,
        });
        self.wait_for_user = true;
        self
    }

    pub fn open_qa(mut self, rubric: impl Into<String>) -> Self {
        self.evaluation = Some(EvaluationSpec {
            rubric: rubric.into(),
            kind: StepKind::OpenQa,
        });
        self.wait_for_user = true;
        self
    }

    pub fn completing(mut self) -> Self {
        self.module_complete = true;
        self
    }

    pub fn paced(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }
}

/// The ordered step sequence for one learning module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleScript {
    pub steps: Vec<Step>,
}

impl ModuleScript {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}

/// Read-only catalog of module scripts.
///
/// Lookups for unknown module identifiers return a generic single-step
/// fallback that auto-completes, so a missing script is never fatal.
pub struct ScriptStore {
    modules: HashMap<String, Arc<ModuleScript>>,
    fallback: Arc<ModuleScript>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            fallback: Arc::new(fallback_script()),
        }
    }

    /// Builds a store from `(module_id, script)` pairs.
    pub fn from_modules<I>(modules: I) -> Self
    where
        I: IntoIterator<Item = (String, ModuleScript)>,
    {
        let mut store = Self::new();
        for (id, script) in modules {
            store.modules.insert(id, Arc::new(script));
        }
        store
    }

    /// Loads a catalog from a JSON file mapping module id to step list.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script catalog at {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Parses a catalog from a JSON string mapping module id to step list.
    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<Step>> =
            serde_json::from_str(raw).context("Malformed script catalog JSON")?;
        Ok(Self::from_modules(
            parsed
                .into_iter()
                .map(|(id, steps)| (id, ModuleScript::new(steps))),
        ))
    }

    /// Looks up the script for a module, falling back to the generic
    /// auto-completing script when the id is unmapped.
    pub fn get(&self, module_id: &str) -> Arc<ModuleScript> {
        match self.modules.get(module_id) {
            Some(script) => script.clone(),
            None => {
                warn!(%module_id, "No script for module; using generic fallback");
                self.fallback.clone()
            }
        }
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.contains_key(module_id)
    }
}

impl Default for ScriptStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The generic fallback for unmapped module identifiers: a single narration
/// step that completes the module immediately.
fn fallback_script() -> ModuleScript {
    ModuleScript::new(vec![
        Step::narration(vec![
            "This module doesn't have guided content yet. You're all set here!".to_string(),
        ])
        .completing(),
    ])
}
