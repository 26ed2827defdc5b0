//! Prompt Shapes and Sentinels
//!
//! The engine talks to the completion service with exactly three prompt
//! shapes: a terse reactive phrase, a full graded explanation, and a general
//! acknowledgment/scope check. Model output is machine-checked only through
//! fixed sentinel substrings; there is no further natural-language parsing.

use crate::session::{HistoryEntry, Role};

/// Token budget for the quick reactive phrase.
pub const REACTION_MAX_TOKENS: u32 = 24;
/// Token budget for the full explanation.
pub const EXPLANATION_MAX_TOKENS: u32 = 400;
/// Token budget for the general acknowledgment/scope check.
pub const ACK_MAX_TOKENS: u32 = 150;

/// Explanation prefix signalling a fully correct answer.
pub const CORRECT_SENTINEL: &str = "fully correct";
/// Explanation prefix signalling a partially correct answer.
pub const PARTIAL_SENTINEL: &str = "partially correct";
/// Substring in open-Q&A output signalling the learner is ready to advance.
pub const PROCEED_SENTINEL: &str = "tap next";

/// Static substitute when the reaction call fails.
pub const FILLER_REACTION: &str = "Good thinking! Let me put that another way.";
/// Static substitute when the explanation or acknowledgment call fails.
pub const FILLER_EXPLANATION: &str =
    "I couldn't check that one just now, but you're doing great. Let's keep going \
     and we can come back to this idea later.";
/// Standard re-prompt during end-of-module open Q&A.
pub const OPEN_QA_FOLLOW_UP: &str =
    "Do you have another question, or are you ready to move on? Just say \"ready\" when you are.";

/// Whether graded explanation output carries a correctness sentinel.
/// Matching is case-insensitive; model casing is not reliable.
pub fn has_correctness_sentinel(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains(CORRECT_SENTINEL) || lower.contains(PARTIAL_SENTINEL)
}

/// Whether open-Q&A output signals readiness to advance.
pub fn has_proceed_sentinel(text: &str) -> bool {
    text.to_lowercase().contains(PROCEED_SENTINEL)
}

/// System prompt for the quick reactive phrase, calibrated to the attempt
/// number: gentle hint, then specific hint, then answer-revealing
/// encouragement.
pub fn reaction_system_prompt(attempt: u32) -> &'static str {
    match attempt {
        1 => {
            "You are a warm, encouraging tutor. The learner just answered a question. \
             Reply with one very short reactive phrase (under 12 words). If the answer \
             misses the mark, offer only a gentle nudge toward the right idea."
        }
        2 => {
            "You are a warm, encouraging tutor. The learner answered the same question \
             a second time. Reply with one very short reactive phrase (under 12 words). \
             If still off, give a specific hint that narrows things down."
        }
        _ => {
            "You are a warm, encouraging tutor. The learner has tried this question \
             several times. Reply with one very short encouraging phrase (under 12 \
             words) that gives away the expected answer so they can move on."
        }
    }
}

/// System prompt for the full graded explanation. The response must begin
/// with "Fully correct", "Partially correct", or neither, and those exact
/// phrases drive advancement.
pub fn explanation_system_prompt(rubric: &str, learner_context: &str) -> String {
    format!(
        "You are a patient tutor explaining a concept to a learner.\n\
         Learner context: {learner_context}\n\
         Grading rubric for the current question:\n{rubric}\n\n\
         Judge the learner's answer against the rubric. Your reply MUST begin with \
         the exact phrase \"Fully correct\" if the answer satisfies the rubric, or \
         \"Partially correct\" if it captures part of it; otherwise begin with \
         neither phrase. Then give a short, friendly explanation of the idea. \
         If this is an open question-and-answer wrap-up and the learner says they \
         are ready or has no more questions, include the exact phrase \"Tap Next\"."
    )
}

/// System prompt for the general acknowledgment/scope check used on awaited
/// steps that carry no rubric. It always permits advancement; the model only
/// keeps the reply on-topic and friendly.
pub fn acknowledgment_system_prompt(learner_context: &str) -> String {
    format!(
        "You are a friendly tutor inside a guided lesson.\n\
         Learner context: {learner_context}\n\
         Briefly acknowledge the learner's message in one or two sentences. If the \
         message is off-topic for the lesson, gently steer back without scolding."
    )
}

/// Renders the accumulated conversation history plus the newest learner
/// message into the single user-message slot of a completion call.
pub fn render_user_message(history: &[HistoryEntry], latest: &str) -> String {
    let mut out = String::from("Conversation so far:\n");
    for entry in history {
        let speaker = match entry.role {
            Role::Assistant => "Tutor",
            Role::User => "Learner",
        };
        out.push_str(speaker);
        out.push_str(": ");
        out.push_str(&entry.content);
        out.push('\n');
    }
    out.push_str("\nLatest learner message: ");
    out.push_str(latest);
    out
}
