//! Narration Presenter
//!
//! Owns the speech-bubble channel: an ordered list of narration fragments, a
//! display cursor, and active/paused/thinking flags. Long authored fragments
//! are split at sentence boundaries so a single bubble never shows more than
//! a readable amount of text. Hiding with `instant = true` suppresses any
//! fade so a following interaction-channel step cannot visually overlap with
//! stale narration.

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Longest text a single bubble is allowed to display.
pub const MAX_BUBBLE_CHARS: usize = 160;

/// Read-only view of the narration channel for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationSnapshot {
    pub fragments: Vec<String>,
    pub cursor: usize,
    pub active: bool,
    pub paused: bool,
    pub thinking: bool,
    pub subject: Option<String>,
}

#[derive(Debug, Default)]
struct NarrationState {
    fragments: Vec<String>,
    cursor: usize,
    active: bool,
    paused: bool,
    thinking: bool,
    subject: Option<String>,
}

/// State holder for the speech-bubble channel.
#[derive(Debug, Default)]
pub struct NarrationPresenter {
    state: Mutex<NarrationState>,
}

impl NarrationPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current fragment list and resets the cursor to zero.
    pub async fn show_narrative(&self, fragments: Vec<String>, subject: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.fragments = fragments;
        state.cursor = 0;
        state.active = !state.fragments.is_empty();
        state.thinking = false;
        state.subject = Some(subject.into());
    }

    /// Advances the cursor by one; no-op at the end of the fragment list.
    pub async fn next_message(&self) {
        let mut state = self.state.lock().await;
        if state.cursor + 1 < state.fragments.len() {
            state.cursor += 1;
        }
    }

    /// Clears the fragment list and deactivates the bubble. `instant = true`
    /// tells the presentation layer to skip the fade-out.
    pub async fn hide_narrative(&self, instant: bool) {
        let mut state = self.state.lock().await;
        if state.active || !state.fragments.is_empty() {
            debug!(instant, "Hiding narration bubble");
        }
        state.fragments.clear();
        state.cursor = 0;
        state.active = false;
        state.thinking = false;
        state.subject = None;
    }

    /// Returns the presenter to its initial state. Unlike `hide_narrative`,
    /// this also clears the pause gate, so a session discarded while a
    /// confirm dialog was up cannot leave the next one's autoplay wedged.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = NarrationState::default();
    }

    /// Gates autoplay while an external dialog is shown. Does not cancel any
    /// in-flight network call.
    pub async fn pause(&self) {
        self.state.lock().await.paused = true;
    }

    pub async fn resume(&self) {
        self.state.lock().await.paused = false;
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// Shows or clears the "thinking" indicator on the bubble.
    pub async fn set_thinking(&self, on: bool) {
        let mut state = self.state.lock().await;
        state.thinking = on;
        if on {
            state.active = true;
        }
    }

    pub async fn snapshot(&self) -> NarrationSnapshot {
        let state = self.state.lock().await;
        NarrationSnapshot {
            fragments: state.fragments.clone(),
            cursor: state.cursor,
            active: state.active,
            paused: state.paused,
            thinking: state.thinking,
            subject: state.subject.clone(),
        }
    }
}

/// Splits authored fragments into reading-sized bubble chunks at sentence
/// boundaries. A single sentence longer than the limit is kept whole rather
/// than broken mid-sentence.
pub fn split_fragments(messages: &[String]) -> Vec<String> {
    messages.iter().flat_map(|m| split_fragment(m)).collect()
}

fn split_fragment(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= MAX_BUBBLE_CHARS {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in sentences(text) {
        if current.is_empty() {
            current = sentence;
        } else if current.chars().count() + 1 + sentence.chars().count() <= MAX_BUBBLE_CHARS {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            chunks.push(current);
            current = sentence;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Breaks text into sentences, keeping terminal punctuation attached.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_show_resets_cursor_and_activates() {
        let presenter = NarrationPresenter::new();
        presenter
            .show_narrative(vec!["One.".into(), "Two.".into()], "module-1")
            .await;

        let snap = presenter.snapshot().await;
        assert!(snap.active);
        assert_eq!(snap.cursor, 0);
        assert_eq!(snap.fragments.len(), 2);
        assert_eq!(snap.subject.as_deref(), Some("module-1"));
    }

    #[tokio::test]
    async fn test_next_message_noops_at_end() {
        let presenter = NarrationPresenter::new();
        presenter
            .show_narrative(vec!["One.".into(), "Two.".into()], "m")
            .await;

        presenter.next_message().await;
        assert_eq!(presenter.snapshot().await.cursor, 1);

        presenter.next_message().await;
        presenter.next_message().await;
        assert_eq!(presenter.snapshot().await.cursor, 1);
    }

    #[tokio::test]
    async fn test_hide_clears_everything_but_pause() {
        let presenter = NarrationPresenter::new();
        presenter.show_narrative(vec!["One.".into()], "m").await;
        presenter.pause().await;
        presenter.set_thinking(true).await;

        presenter.hide_narrative(true).await;
        let snap = presenter.snapshot().await;
        assert!(!snap.active);
        assert!(!snap.thinking);
        assert!(snap.fragments.is_empty());
        assert!(snap.subject.is_none());
        // Pause gates autoplay only and survives a hide.
        assert!(snap.paused);

        presenter.resume().await;
        assert!(!presenter.is_paused().await);
    }

    #[tokio::test]
    async fn test_reset_clears_pause_gate_too() {
        let presenter = NarrationPresenter::new();
        presenter.show_narrative(vec!["One.".into()], "m").await;
        presenter.pause().await;

        presenter.reset().await;
        let snap = presenter.snapshot().await;
        assert!(!snap.paused);
        assert!(!snap.active);
        assert!(snap.fragments.is_empty());
        assert!(snap.subject.is_none());
    }

    #[tokio::test]
    async fn test_thinking_activates_bubble() {
        let presenter = NarrationPresenter::new();
        presenter.set_thinking(true).await;
        let snap = presenter.snapshot().await;
        assert!(snap.thinking);
        assert!(snap.active);
    }

    #[test]
    fn test_short_fragment_left_whole() {
        let chunks = split_fragments(&["Hello there. Welcome back.".to_string()]);
        assert_eq!(chunks, vec!["Hello there. Welcome back.".to_string()]);
    }

    #[test]
    fn test_long_fragment_splits_at_sentence_boundaries() {
        let sentence = "This sentence talks about the circulatory system in some detail.";
        let long = format!("{s} {s} {s} {s}", s = sentence);
        let chunks = split_fragments(&[long]);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= MAX_BUBBLE_CHARS);
            assert!(chunk.ends_with('.'));
        }
        assert_eq!(chunks.join(" ").matches(sentence).count(), 4);
    }

    #[test]
    fn test_oversized_single_sentence_kept_whole() {
        let long = format!("{} end.", "word ".repeat(60).trim());
        let chunks = split_fragments(&[long.clone()]);
        assert_eq!(chunks, vec![long]);
    }

    #[test]
    fn test_empty_and_blank_messages_drop_out() {
        let chunks = split_fragments(&["".to_string(), "   ".to_string(), "Hi.".to_string()]);
        assert_eq!(chunks, vec!["Hi.".to_string()]);
    }

    #[test]
    fn test_abbreviation_point_not_a_boundary_mid_word() {
        // "e.g." style periods followed by a non-space stay attached.
        let parts = sentences("Use e.g.this style. Done.");
        assert_eq!(parts.len(), 2);
    }
}
