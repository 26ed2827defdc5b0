//! Request Guard
//!
//! The only cancellation primitive in the engine: a monotonically increasing
//! generation counter. Every externally triggered session start (and every
//! reset) bumps the counter. An asynchronous continuation that will mutate
//! shared session or narration state captures a [`GenerationToken`] before its
//! first suspension point and re-validates it after every subsequent one; on
//! mismatch it abandons the write instead of applying stale data. There is no
//! hard task abort anywhere in the engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Value of the generation counter captured at a specific point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationToken(u64);

impl GenerationToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Monotonic generation counter shared by all of an engine's async chains.
#[derive(Debug, Default)]
pub struct RequestGuard {
    generation: AtomicU64,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the generation, invalidating every previously captured
    /// token. Returns a token for the new generation.
    pub fn bump(&self) -> GenerationToken {
        GenerationToken(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Captures the live generation without changing it.
    pub fn token(&self) -> GenerationToken {
        GenerationToken(self.generation.load(Ordering::SeqCst))
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a captured token still refers to the live generation.
    pub fn is_current(&self, token: GenerationToken) -> bool {
        self.current() == token.0
    }
}
