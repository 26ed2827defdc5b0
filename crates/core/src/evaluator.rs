//! Answer Evaluation
//!
//! Turns a learner's free-text reply into a two-tier response: a terse
//! reactive phrase published to the narration bubble, then a streamed
//! explanation appended to the transcript, from which the advance decision
//! is derived. Attempts are tracked per step with a graduated-hint policy:
//! gentle hint, specific hint, then answer-revealing encouragement with a
//! forced advance on the third attempt.
//!
//! Every write that follows a suspension point is validated against the
//! request guard; stale results from an abandoned module visit are discarded
//! rather than applied.

use crate::completion::{CompletionClient, collect_stream};
use crate::guard::{GenerationToken, RequestGuard};
use crate::narration::{NarrationPresenter, split_fragments};
use crate::pacing::{MIN_CHECKING_MS, SHORT_GAP_MS};
use crate::prompts;
use crate::script::StepKind;
use crate::session::Session;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Attempts after which a graded step advances regardless of correctness.
pub const MAX_ATTEMPTS: u32 = 3;

/// Shared state an evaluation run reads and writes.
pub struct EvalContext<'a> {
    pub session: &'a Mutex<Session>,
    pub narration: &'a NarrationPresenter,
    pub guard: &'a RequestGuard,
    pub token: GenerationToken,
}

impl EvalContext<'_> {
    /// Runs a mutation against the session only if it is still the session
    /// this chain was started for.
    async fn with_live_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut session = self.session.lock().await;
        if session.generation() != self.token.value() {
            return None;
        }
        Some(f(&mut session))
    }

    fn is_stale(&self) -> bool {
        !self.guard.is_current(self.token)
    }
}

/// Grades learner answers and produces acknowledgment responses.
pub struct AnswerEvaluator {
    client: Arc<dyn CompletionClient>,
}

impl AnswerEvaluator {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Evaluates a learner's answer against a rubric.
    ///
    /// Returns the "may proceed" decision. Side effects: bumps the step's
    /// attempt counter, publishes a reactive phrase to the narration bubble,
    /// and streams the full explanation into the transcript. A transport
    /// failure substitutes static filler and still counts as a completed
    /// attempt; it is never retried and never fatal.
    pub async fn evaluate(
        &self,
        answer: &str,
        rubric: &str,
        kind: StepKind,
        ctx: &EvalContext<'_>,
    ) -> bool {
        let Some((attempt, subject, user_message, learner_context)) = ctx
            .with_live_session(|session| {
                let step = session.step_index();
                let attempt = session.bump_attempt(step);
                session.set_checking(true);
                (
                    attempt,
                    session.module_id().to_string(),
                    prompts::render_user_message(session.history(), answer),
                    session.learner_context().to_string(),
                )
            })
            .await
        else {
            return false;
        };

        ctx.narration.set_thinking(true).await;

        // A brief "checking" beat so the reaction never lands jarringly fast.
        tokio::time::sleep(Duration::from_millis(MIN_CHECKING_MS)).await;
        if ctx.is_stale() {
            debug!("Discarding evaluation: module switched during checking delay");
            return false;
        }

        let reaction = self
            .fetch_whole(
                prompts::reaction_system_prompt(attempt),
                &user_message,
                prompts::REACTION_MAX_TOKENS,
            )
            .await
            .unwrap_or_else(|| prompts::FILLER_REACTION.to_string());

        if ctx.is_stale() {
            debug!("Discarding evaluation: module switched during reaction call");
            return false;
        }
        ctx.narration
            .show_narrative(split_fragments(&[reaction]), subject)
            .await;
        ctx.with_live_session(|session| session.set_checking(false))
            .await;

        tokio::time::sleep(Duration::from_millis(SHORT_GAP_MS)).await;

        let system_prompt = prompts::explanation_system_prompt(rubric, &learner_context);
        let Some(explanation) = self
            .stream_into_transcript(
                &system_prompt,
                &user_message,
                prompts::EXPLANATION_MAX_TOKENS,
                ctx,
            )
            .await
        else {
            return false;
        };

        match kind {
            StepKind::OpenQa => prompts::has_proceed_sentinel(&explanation),
            StepKind::Graded => {
                if attempt >= MAX_ATTEMPTS {
                    // Forced advance: the encouragement already revealed the
                    // answer, correctness no longer gates progress.
                    true
                } else {
                    prompts::has_correctness_sentinel(&explanation)
                }
            }
        }
    }

    /// Handles an awaited step with no rubric: a general acknowledgment and
    /// scope check that always permits advancement.
    pub async fn acknowledge(&self, text: &str, ctx: &EvalContext<'_>) -> bool {
        let Some((user_message, learner_context)) = ctx
            .with_live_session(|session| {
                (
                    prompts::render_user_message(session.history(), text),
                    session.learner_context().to_string(),
                )
            })
            .await
        else {
            return false;
        };

        let system_prompt = prompts::acknowledgment_system_prompt(&learner_context);
        self.stream_into_transcript(
            &system_prompt,
            &user_message,
            prompts::ACK_MAX_TOKENS,
            ctx,
        )
        .await
        .is_some()
    }

    /// Makes a short non-streamed-to-screen completion call and returns the
    /// whole response, or `None` on transport failure.
    async fn fetch_whole(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
    ) -> Option<String> {
        let stream = match self.client.stream(system_prompt, user_message, max_tokens).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = ?e, "Reaction call failed; substituting filler");
                return None;
            }
        };
        match collect_stream(stream).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(error = ?e, "Reaction stream failed; substituting filler");
                None
            }
        }
    }

    /// Streams a completion into a transcript placeholder chunk-by-chunk.
    ///
    /// Returns the final text, with transport failures degraded to the
    /// static filler explanation. Returns `None` only when the result went
    /// stale mid-stream, after removing the placeholder it had inserted.
    async fn stream_into_transcript(
        &self,
        system_prompt: &str,
        user_message: &str,
        max_tokens: u32,
        ctx: &EvalContext<'_>,
    ) -> Option<String> {
        if ctx.is_stale() {
            return None;
        }
        ctx.with_live_session(|session| session.begin_streaming_message())
            .await?;

        let mut stream = match self.client.stream(system_prompt, user_message, max_tokens).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = ?e, "Completion call failed; substituting filler");
                return self.finalize(ctx, Some(prompts::FILLER_EXPLANATION)).await;
            }
        };

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if ctx.is_stale() {
                debug!("Discarding streamed completion: module switched mid-stream");
                ctx.with_live_session(|session| session.discard_streaming_message())
                    .await;
                return None;
            }
            match chunk {
                Ok(chunk) => {
                    text.push_str(&chunk);
                    ctx.with_live_session(|session| session.append_streaming(&chunk))
                        .await?;
                }
                Err(e) => {
                    warn!(error = ?e, "Completion stream failed; substituting filler");
                    return self.finalize(ctx, Some(prompts::FILLER_EXPLANATION)).await;
                }
            }
        }

        if ctx.is_stale() {
            ctx.with_live_session(|session| session.discard_streaming_message())
                .await;
            return None;
        }
        ctx.with_live_session(|session| session.finish_streaming_message(None))
            .await?;
        Some(text)
    }

    /// Finalizes the streaming placeholder with filler text.
    async fn finalize(&self, ctx: &EvalContext<'_>, filler: Option<&str>) -> Option<String> {
        ctx.with_live_session(|session| session.finish_streaming_message(filler))
            .await?;
        filler.map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{ChunkStream, MockCompletionClient};
    use crate::script::{ModuleScript, Step};
    use crate::session::Role;
    use anyhow::anyhow;

    fn chunk_stream(chunks: Vec<&'static str>) -> ChunkStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(c.to_string())),
        ))
    }

    struct Fixture {
        session: Mutex<Session>,
        narration: NarrationPresenter,
        guard: RequestGuard,
        token: GenerationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let guard = RequestGuard::new();
            let token = guard.bump();
            let script = Arc::new(ModuleScript::new(vec![
                Step::interaction(vec!["What carries oxygen?".into()]).graded("Expect: blood"),
            ]));
            let mut session =
                Session::new("lesson-1", "module-1", "age 10", script, token.value());
            session.push_history(Role::Assistant, "What carries oxygen?");
            Self {
                session: Mutex::new(session),
                narration: NarrationPresenter::new(),
                guard,
                token,
            }
        }

        fn ctx(&self) -> EvalContext<'_> {
            EvalContext {
                session: &self.session,
                narration: &self.narration,
                guard: &self.guard,
                token: self.token,
            }
        }
    }

    fn scripted_client(reaction: &'static str, explanation: &'static str) -> MockCompletionClient {
        let mut client = MockCompletionClient::new();
        client.expect_stream().returning(move |_, _, max_tokens| {
            if max_tokens == prompts::REACTION_MAX_TOKENS {
                Ok(chunk_stream(vec![reaction]))
            } else {
                Ok(chunk_stream(vec![explanation]))
            }
        });
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_correct_answer_proceeds() {
        let fixture = Fixture::new();
        let client = scripted_client("Nice!", "Fully correct! Blood carries oxygen.");
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        let proceed = evaluator
            .evaluate("blood", "Expect: blood", StepKind::Graded, &fixture.ctx())
            .await;

        assert!(proceed);
        let session = fixture.session.lock().await;
        let transcript = session.interaction_transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, "Fully correct! Blood carries oxygen.");
        assert!(!transcript[0].streaming);
        assert_eq!(session.attempts_for(0), 1);
        assert!(!session.is_streaming());
        drop(session);

        let narration = fixture.narration.snapshot().await;
        assert_eq!(narration.fragments, vec!["Nice!".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_answer_retries() {
        let fixture = Fixture::new();
        let client = scripted_client("Hmm, close!", "Not quite. Think about fluids in the body.");
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        let proceed = evaluator
            .evaluate("water", "Expect: blood", StepKind::Graded, &fixture.ctx())
            .await;

        assert!(!proceed);
        assert_eq!(fixture.session.lock().await.attempts_for(0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_forces_advance() {
        let fixture = Fixture::new();
        let client = scripted_client("The answer is blood!", "Not quite, but let's move on.");
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        for attempt in 1..=2 {
            let proceed = evaluator
                .evaluate("water", "Expect: blood", StepKind::Graded, &fixture.ctx())
                .await;
            assert!(!proceed, "attempt {attempt} should not proceed");
        }
        let proceed = evaluator
            .evaluate("water", "Expect: blood", StepKind::Graded, &fixture.ctx())
            .await;

        assert!(proceed, "third attempt must force an advance");
        assert_eq!(fixture.session.lock().await.attempts_for(0), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_qa_needs_proceed_sentinel() {
        let fixture = Fixture::new();
        let client = scripted_client("Good question!", "Fully correct! Anything else?");
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        // Correctness sentinels do not advance an open Q&A step.
        let proceed = evaluator
            .evaluate("why is blood red?", "Open floor", StepKind::OpenQa, &fixture.ctx())
            .await;
        assert!(!proceed);

        let client = scripted_client("Great session!", "You're all set. Tap Next when ready!");
        let evaluator = AnswerEvaluator::new(Arc::new(client));
        let proceed = evaluator
            .evaluate("I'm ready", "Open floor", StepKind::OpenQa, &fixture.ctx())
            .await;
        assert!(proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_substitutes_filler() {
        let fixture = Fixture::new();
        let mut client = MockCompletionClient::new();
        client
            .expect_stream()
            .returning(|_, _, _| Err(anyhow!("connection refused")));
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        let proceed = evaluator
            .evaluate("blood", "Expect: blood", StepKind::Graded, &fixture.ctx())
            .await;

        // Filler carries no sentinel, so no advance, but the attempt counts.
        assert!(!proceed);
        let session = fixture.session.lock().await;
        assert_eq!(session.attempts_for(0), 1);
        let transcript = session.interaction_transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].content, prompts::FILLER_EXPLANATION);
        drop(session);

        let narration = fixture.narration.snapshot().await;
        assert_eq!(narration.fragments, vec![prompts::FILLER_REACTION.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_discards_result() {
        let fixture = Fixture::new();
        let client = scripted_client("Nice!", "Fully correct! Blood carries oxygen.");
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        // The module visit is abandoned before the evaluation runs.
        fixture.guard.bump();

        let proceed = evaluator
            .evaluate("blood", "Expect: blood", StepKind::Graded, &fixture.ctx())
            .await;

        assert!(!proceed);
        let session = fixture.session.lock().await;
        assert!(session.interaction_transcript().is_empty());
        assert!(!session.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_always_permits() {
        let fixture = Fixture::new();
        let mut client = MockCompletionClient::new();
        client
            .expect_stream()
            .returning(|_, _, _| Ok(chunk_stream(vec!["Thanks for sharing that!"])));
        let evaluator = AnswerEvaluator::new(Arc::new(client));

        assert!(evaluator.acknowledge("this is fun", &fixture.ctx()).await);
        let session = fixture.session.lock().await;
        assert_eq!(
            session.interaction_transcript()[0].content,
            "Thanks for sharing that!"
        );
    }
}
