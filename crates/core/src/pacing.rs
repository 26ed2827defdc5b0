//! Display Pacing
//!
//! Pure duration arithmetic for auto-advancing dialogue. Narration bubbles
//! stay on screen long enough to be read: each fragment earns reading time
//! proportional to its word count (clamped to a sane window), fragments are
//! separated by a gap scaled to their character length, and the final
//! fragment gets a one-time grace period before the engine moves on.

use crate::script::Pace;
use std::time::Duration;

/// Reading time granted per word at normal pace.
pub const WORD_MS: u64 = 300;
/// Lower clamp on a single fragment's display time.
pub const MIN_FRAGMENT_MS: u64 = 2_000;
/// Upper clamp on a single fragment's display time.
pub const MAX_FRAGMENT_MS: u64 = 8_000;
/// Gap after a fragment shorter than 50 characters.
pub const SHORT_GAP_MS: u64 = 800;
/// Gap after a fragment shorter than 120 characters.
pub const MEDIUM_GAP_MS: u64 = 1_200;
/// Gap after any longer fragment.
pub const LONG_GAP_MS: u64 = 1_800;
/// One-time grace added to the final fragment of a step.
pub const FINAL_GRACE_MS: u64 = 2_000;
/// Pause inserted when hiding the bubble before an interaction step.
pub const CHANNEL_TRANSITION_MS: u64 = 200;
/// Pause between consecutive interaction-channel messages.
pub const INTERACTION_GAP_MS: u64 = 600;
/// Minimum time spent in the "checking" state before reacting to an answer.
pub const MIN_CHECKING_MS: u64 = 300;

fn word_rate(pace: Pace) -> u64 {
    match pace {
        Pace::Slow => 400,
        Pace::Normal => WORD_MS,
        Pace::Fast => 225,
    }
}

/// Display time for a single fragment: word count times the pace rate,
/// clamped to `[MIN_FRAGMENT_MS, MAX_FRAGMENT_MS]`.
pub fn fragment_display(text: &str, pace: Pace) -> Duration {
    let words = text.split_whitespace().count() as u64;
    Duration::from_millis((words * word_rate(pace)).clamp(MIN_FRAGMENT_MS, MAX_FRAGMENT_MS))
}

/// Inter-fragment gap scaled by character length.
pub fn fragment_gap(text: &str) -> Duration {
    let chars = text.chars().count();
    let ms = if chars < 50 {
        SHORT_GAP_MS
    } else if chars < 120 {
        MEDIUM_GAP_MS
    } else {
        LONG_GAP_MS
    };
    Duration::from_millis(ms)
}

/// Total auto-advance delay for a sequence of fragments: per-fragment display
/// time plus gaps, plus the final grace period.
pub fn sequence_duration(fragments: &[String], pace: Pace) -> Duration {
    let mut total = Duration::ZERO;
    for fragment in fragments {
        total += fragment_display(fragment, pace);
        total += fragment_gap(fragment);
    }
    if !fragments.is_empty() {
        total += Duration::from_millis(FINAL_GRACE_MS);
    }
    total
}
