//! Session State
//!
//! One `Session` exists per active module visit. It owns the interaction
//! transcript, the current step cursor, the per-step attempt counters, and
//! the conversation history that is fed back into completion calls (and never
//! rendered). Starting a new module never mutates the prior session's data;
//! the prior async chains are invalidated through the generation id instead.

use crate::script::{Channel, ModuleScript, Step};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Author of a transcript or history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

/// Where the engine currently is in the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Starting,
    ExecutingNarration,
    ExecutingInteraction,
    WaitingForUser,
    Evaluating,
    ModuleComplete,
}

/// One rendered transcript entry.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub channel: Channel,
    pub content: String,
    /// True while a completion response is still being appended to this
    /// message chunk-by-chunk.
    pub streaming: bool,
}

/// One entry of the conversation history fed back into completion calls.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Read-only view of a session for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub lesson_id: String,
    pub module_id: String,
    pub transcript: Vec<Message>,
    pub step_index: usize,
    pub phase: Phase,
    pub streaming: bool,
    pub checking: bool,
    pub generation: u64,
    /// Attempt counters keyed by step index; entries vanish when the engine
    /// advances past their step.
    pub attempts: HashMap<usize, u32>,
}

/// Mutable state for one module visit.
#[derive(Debug)]
pub struct Session {
    lesson_id: String,
    module_id: String,
    learner_context: String,
    script: Arc<ModuleScript>,
    transcript: Vec<Message>,
    step_index: usize,
    phase: Phase,
    streaming: bool,
    checking: bool,
    generation: u64,
    attempts: HashMap<usize, u32>,
    history: Vec<HistoryEntry>,
}

impl Session {
    /// Creates the session for a fresh module visit.
    pub fn new(
        lesson_id: impl Into<String>,
        module_id: impl Into<String>,
        learner_context: impl Into<String>,
        script: Arc<ModuleScript>,
        generation: u64,
    ) -> Self {
        Self {
            lesson_id: lesson_id.into(),
            module_id: module_id.into(),
            learner_context: learner_context.into(),
            script,
            transcript: Vec::new(),
            step_index: 0,
            phase: Phase::Starting,
            streaming: false,
            checking: false,
            generation,
            attempts: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// An idle session with no module loaded; the state after `reset`.
    pub fn idle(generation: u64) -> Self {
        let mut session = Self::new("", "", "", Arc::new(ModuleScript::new(vec![])), generation);
        session.phase = Phase::Idle;
        session
    }

    pub fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn learner_context(&self) -> &str {
        &self.learner_context
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn set_step_index(&mut self, index: usize) {
        self.step_index = index;
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.script.step(self.step_index)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_checking(&mut self, on: bool) {
        self.checking = on;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Appends a finished message to the transcript.
    ///
    /// Narration content lives in the narration presenter, never here; a
    /// narration-tagged message reaching the transcript signals an authoring
    /// or programming bug, not a runtime condition.
    pub fn push_message(&mut self, role: Role, channel: Channel, content: impl Into<String>) {
        debug_assert_eq!(
            channel,
            Channel::Interaction,
            "narration content must never enter the interaction transcript"
        );
        self.transcript.push(Message {
            role,
            channel,
            content: content.into(),
            streaming: false,
        });
    }

    /// Inserts an empty assistant message that a streaming response will be
    /// appended into. Returns nothing; the placeholder is always the last
    /// transcript entry while `streaming` is set.
    pub fn begin_streaming_message(&mut self) {
        self.transcript.push(Message {
            role: Role::Assistant,
            channel: Channel::Interaction,
            content: String::new(),
            streaming: true,
        });
        self.streaming = true;
    }

    /// Appends a chunk to the active streaming message, if any.
    pub fn append_streaming(&mut self, chunk: &str) {
        if let Some(last) = self.transcript.last_mut() {
            if last.streaming {
                last.content.push_str(chunk);
            }
        }
    }

    /// Finalizes the active streaming message, optionally replacing its
    /// content (used when a transport failure substitutes a filler).
    pub fn finish_streaming_message(&mut self, replace_with: Option<&str>) {
        if let Some(last) = self.transcript.last_mut() {
            if last.streaming {
                if let Some(text) = replace_with {
                    last.content = text.to_string();
                }
                last.streaming = false;
            }
        }
        self.streaming = false;
    }

    /// Removes a not-yet-finalized streaming placeholder. Called when a
    /// stale async chain cleans up after a generation mismatch.
    pub fn discard_streaming_message(&mut self) {
        if self.transcript.last().is_some_and(|m| m.streaming) {
            self.transcript.pop();
        }
        self.streaming = false;
    }

    /// Interaction-channel projection of the transcript.
    pub fn interaction_transcript(&self) -> Vec<&Message> {
        self.transcript
            .iter()
            .filter(|m| m.channel == Channel::Interaction)
            .collect()
    }

    pub fn push_history(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            content: content.into(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Increments and returns the attempt counter for a step.
    pub fn bump_attempt(&mut self, step_index: usize) -> u32 {
        let counter = self.attempts.entry(step_index).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn attempts_for(&self, step_index: usize) -> u32 {
        self.attempts.get(&step_index).copied().unwrap_or(0)
    }

    /// Clears the attempt counter when the engine advances past a step.
    pub fn clear_attempts(&mut self, step_index: usize) {
        self.attempts.remove(&step_index);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            lesson_id: self.lesson_id.clone(),
            module_id: self.module_id.clone(),
            transcript: self.transcript.clone(),
            step_index: self.step_index,
            phase: self.phase,
            streaming: self.streaming,
            checking: self.checking,
            generation: self.generation,
            attempts: self.attempts.clone(),
        }
    }
}
