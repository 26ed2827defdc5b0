//! Dialogue Engine
//!
//! The root orchestrator: owns the session lifecycle, walks a module's step
//! sequence, routes output between the narration and interaction channels,
//! paces auto-advancing steps, and delegates answerable steps to the
//! evaluator. All long-running work happens on spawned chains that carry a
//! generation token; a module switch mid-flight simply strands the old chain,
//! which notices the bumped generation at its next suspension point and
//! abandons its writes.

use crate::completion::CompletionClient;
use crate::evaluator::{AnswerEvaluator, EvalContext};
use crate::guard::{GenerationToken, RequestGuard};
use crate::narration::{NarrationPresenter, NarrationSnapshot, split_fragments};
use crate::pacing;
use crate::progress::ProgressStore;
use crate::prompts::OPEN_QA_FOLLOW_UP;
use crate::script::{Channel, ScriptStore, Step, StepKind};
use crate::session::{Phase, Role, Session, SessionSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// What a step execution decided about the walk.
enum StepOutcome {
    /// Move on to the next step.
    Advance,
    /// Stop walking; the session is waiting for learner input.
    Halt,
    /// The module's completing step ran; the walk is over.
    Complete,
    /// The generation changed mid-step; abandon the walk silently.
    Stale,
}

struct EngineInner {
    scripts: Arc<ScriptStore>,
    progress: Arc<dyn ProgressStore>,
    evaluator: AnswerEvaluator,
    guard: RequestGuard,
    session: Mutex<Session>,
    narration: NarrationPresenter,
    starting: AtomicBool,
}

/// Drives one scripted tutoring conversation at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct DialogueEngine {
    inner: Arc<EngineInner>,
}

impl DialogueEngine {
    pub fn new(
        scripts: Arc<ScriptStore>,
        client: Arc<dyn CompletionClient>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                scripts,
                progress,
                evaluator: AnswerEvaluator::new(client),
                guard: RequestGuard::new(),
                session: Mutex::new(Session::idle(0)),
                narration: NarrationPresenter::new(),
                starting: AtomicBool::new(false),
            }),
        }
    }

    /// Begins a module visit, invalidating any prior session.
    ///
    /// A start while another start is still in flight is rejected outright
    /// rather than queued.
    #[instrument(skip_all, fields(%lesson_id, %module_id))]
    pub async fn start(&self, lesson_id: &str, module_id: &str, learner_context: &str) {
        if self.inner.starting.swap(true, Ordering::SeqCst) {
            warn!("Rejected reentrant start");
            return;
        }

        let token = self.inner.guard.bump();
        self.inner.narration.hide_narrative(true).await;
        let script = self.inner.scripts.get(module_id);
        {
            let mut session = self.inner.session.lock().await;
            *session = Session::new(lesson_id, module_id, learner_context, script, token.value());
        }
        info!("Starting module session");

        let engine = self.clone();
        tokio::spawn(async move { engine.drive(token, 0).await });
        self.inner.starting.store(false, Ordering::SeqCst);
    }

    /// Accepts a learner message for the currently awaited step.
    ///
    /// No-op while a response is streaming, or when no step is waiting.
    pub async fn send_user_message(&self, text: &str) {
        let token = self.inner.guard.token();
        let (step, index) = {
            let session = self.inner.session.lock().await;
            if session.is_streaming() {
                debug!("Ignoring user message while a response is streaming");
                return;
            }
            if session.phase() != Phase::WaitingForUser {
                debug!(phase = ?session.phase(), "Ignoring user message outside an awaited step");
                return;
            }
            let Some(step) = session.current_step().cloned() else {
                return;
            };
            (step, session.step_index())
        };

        if step.channel == Channel::Narration && step.evaluation.is_none() {
            self.pass_acknowledgment_gate(token, index, text).await;
            return;
        }

        let recorded = self
            .with_live_session(token, |session| {
                session.push_message(Role::User, Channel::Interaction, text);
                session.push_history(Role::User, text);
            })
            .await;
        if recorded.is_none() {
            return;
        }

        let ctx = EvalContext {
            session: &self.inner.session,
            narration: &self.inner.narration,
            guard: &self.inner.guard,
            token,
        };
        let may_proceed = match &step.evaluation {
            Some(eval) => {
                self.with_live_session(token, |session| session.set_phase(Phase::Evaluating))
                    .await;
                self.inner
                    .evaluator
                    .evaluate(text, &eval.rubric, eval.kind, &ctx)
                    .await
            }
            None => self.inner.evaluator.acknowledge(text, &ctx).await,
        };

        if !self.inner.guard.is_current(token) {
            return;
        }
        if may_proceed {
            self.advance_from(token, index).await;
        } else {
            match step.evaluation.as_ref().map(|e| e.kind) {
                Some(StepKind::OpenQa) => {
                    // Unbounded question loop: re-prompt and keep waiting.
                    self.with_live_session(token, |session| {
                        session.push_message(Role::Assistant, Channel::Interaction, OPEN_QA_FOLLOW_UP);
                        session.push_history(Role::Assistant, OPEN_QA_FOLLOW_UP);
                        session.set_phase(Phase::WaitingForUser);
                    })
                    .await;
                }
                _ => {
                    // Retry: same step, input stays enabled.
                    self.with_live_session(token, |session| {
                        session.set_phase(Phase::WaitingForUser)
                    })
                    .await;
                }
            }
        }
    }

    /// Discards the active session and returns to idle. Safe to call from
    /// any state, including mid-stream; in-flight chains notice the bumped
    /// generation and abandon themselves.
    pub async fn reset(&self) {
        let token = self.inner.guard.bump();
        self.inner.narration.reset().await;
        let mut session = self.inner.session.lock().await;
        *session = Session::idle(token.value());
        info!("Engine reset to idle");
    }

    /// Pauses narration autoplay (shown dialogs only). Does not cancel any
    /// in-flight network call.
    pub async fn pause(&self) {
        self.inner.narration.pause().await;
    }

    pub async fn resume(&self) {
        self.inner.narration.resume().await;
    }

    pub async fn session_snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().await.snapshot()
    }

    pub async fn narration_snapshot(&self) -> NarrationSnapshot {
        self.inner.narration.snapshot().await
    }

    /// Walks steps from `index` until a halt, completion, or staleness.
    async fn drive(&self, token: GenerationToken, mut index: usize) {
        loop {
            if !self.inner.guard.is_current(token) {
                return;
            }
            match self.execute_step(token, index).await {
                StepOutcome::Advance => {
                    self.with_live_session(token, |session| session.clear_attempts(index))
                        .await;
                    index += 1;
                }
                StepOutcome::Halt | StepOutcome::Complete | StepOutcome::Stale => return,
            }
        }
    }

    async fn execute_step(&self, token: GenerationToken, index: usize) -> StepOutcome {
        let Some((step, lesson_id, module_id)) = self
            .with_live_session(token, |session| {
                session.set_step_index(index);
                (
                    session.current_step().cloned(),
                    session.lesson_id().to_string(),
                    session.module_id().to_string(),
                )
            })
            .await
        else {
            return StepOutcome::Stale;
        };
        let Some(step) = step else {
            warn!(%module_id, index, "Script ended without a completing step");
            self.with_live_session(token, |session| session.set_phase(Phase::ModuleComplete))
                .await;
            return StepOutcome::Complete;
        };

        if step.module_complete {
            return self
                .complete_module(token, &step, &lesson_id, &module_id)
                .await;
        }

        if step.messages.is_empty() && !step.wait_for_user {
            return StepOutcome::Advance;
        }

        match step.channel {
            Channel::Narration => self.execute_narration(token, &step, &module_id).await,
            Channel::Interaction => self.execute_interaction(token, &step).await,
        }
    }

    async fn execute_narration(
        &self,
        token: GenerationToken,
        step: &Step,
        module_id: &str,
    ) -> StepOutcome {
        let fragments = split_fragments(&step.messages);
        self.inner
            .narration
            .show_narrative(fragments.clone(), module_id)
            .await;
        let recorded = self
            .with_live_session(token, |session| {
                session.set_phase(Phase::ExecutingNarration);
                for message in &step.messages {
                    session.push_history(Role::Assistant, message.clone());
                }
            })
            .await;
        if recorded.is_none() {
            return StepOutcome::Stale;
        }

        if step.wait_for_user {
            self.with_live_session(token, |session| session.set_phase(Phase::WaitingForUser))
                .await;
            return StepOutcome::Halt;
        }

        tokio::time::sleep(pacing::sequence_duration(&fragments, step.pace)).await;
        if !self.inner.guard.is_current(token) {
            return StepOutcome::Stale;
        }
        StepOutcome::Advance
    }

    async fn execute_interaction(&self, token: GenerationToken, step: &Step) -> StepOutcome {
        // Any lingering bubble, including an evaluation reaction, is hidden
        // instantly before transcript output starts, with a beat for the
        // layout to settle.
        self.inner.narration.hide_narrative(true).await;
        tokio::time::sleep(Duration::from_millis(pacing::CHANNEL_TRANSITION_MS)).await;
        if !self.inner.guard.is_current(token) {
            return StepOutcome::Stale;
        }

        for (i, message) in step.messages.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(pacing::INTERACTION_GAP_MS)).await;
            }
            let recorded = self
                .with_live_session(token, |session| {
                    session.set_phase(Phase::ExecutingInteraction);
                    session.push_message(Role::Assistant, Channel::Interaction, message.clone());
                    session.push_history(Role::Assistant, message.clone());
                })
                .await;
            if recorded.is_none() {
                return StepOutcome::Stale;
            }
        }

        if step.wait_for_user {
            self.with_live_session(token, |session| session.set_phase(Phase::WaitingForUser))
                .await;
            return StepOutcome::Halt;
        }

        tokio::time::sleep(pacing::sequence_duration(&step.messages, step.pace)).await;
        if !self.inner.guard.is_current(token) {
            return StepOutcome::Stale;
        }
        StepOutcome::Advance
    }

    async fn complete_module(
        &self,
        token: GenerationToken,
        step: &Step,
        lesson_id: &str,
        module_id: &str,
    ) -> StepOutcome {
        match step.channel {
            Channel::Narration if !step.messages.is_empty() => {
                self.inner
                    .narration
                    .show_narrative(split_fragments(&step.messages), module_id)
                    .await;
            }
            Channel::Interaction => {
                self.inner.narration.hide_narrative(true).await;
                tokio::time::sleep(Duration::from_millis(pacing::CHANNEL_TRANSITION_MS)).await;
                for message in &step.messages {
                    self.with_live_session(token, |session| {
                        session.push_message(Role::Assistant, Channel::Interaction, message.clone());
                    })
                    .await;
                }
            }
            _ => {}
        }
        let live = self
            .with_live_session(token, |session| {
                for message in &step.messages {
                    session.push_history(Role::Assistant, message.clone());
                }
                session.set_phase(Phase::ModuleComplete);
            })
            .await;
        if live.is_none() {
            return StepOutcome::Stale;
        }

        if let Err(e) = self
            .inner
            .progress
            .mark_module_complete(lesson_id, module_id)
            .await
        {
            // Completion still stands locally; persistence owns retries.
            warn!(error = ?e, %module_id, "Failed to persist module completion");
        }
        info!(%lesson_id, %module_id, "Module complete");
        StepOutcome::Complete
    }

    /// Passes a narration acknowledgment gate: the learner's text goes into
    /// the conversation history only, never the transcript.
    async fn pass_acknowledgment_gate(&self, token: GenerationToken, index: usize, text: &str) {
        let recorded = self
            .with_live_session(token, |session| {
                session.push_history(Role::User, text);
            })
            .await;
        if recorded.is_none() {
            return;
        }
        self.inner.narration.hide_narrative(true).await;
        tokio::time::sleep(Duration::from_millis(pacing::CHANNEL_TRANSITION_MS)).await;
        if !self.inner.guard.is_current(token) {
            return;
        }
        self.advance_from(token, index).await;
    }

    /// Advances past `index`: clears its attempt counter and resumes the
    /// step walk on a fresh chain.
    async fn advance_from(&self, token: GenerationToken, index: usize) {
        let live = self
            .with_live_session(token, |session| session.clear_attempts(index))
            .await;
        if live.is_none() {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move { engine.drive(token, index + 1).await });
    }

    /// Runs a mutation against the session only if it still belongs to the
    /// generation this chain was started for.
    async fn with_live_session<T>(
        &self,
        token: GenerationToken,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        let mut session = self.inner.session.lock().await;
        if session.generation() != token.value() {
            debug!("Abandoning write to superseded session");
            return None;
        }
        Some(f(&mut session))
    }
}
