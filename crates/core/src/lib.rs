//! Guided tutoring dialogue engine.
//!
//! Drives a scripted, AI-augmented conversation through a fixed sequence of
//! steps per learning module. Output is routed between two presentation
//! channels (an ambient narration bubble and the main transcript), free-text
//! answers are graded with a graduated-hint policy, and mid-flight module
//! switches are survived through cooperative generation checks rather than
//! task cancellation.
//!
//! The presentation layer consumes read-only [`session::SessionSnapshot`]
//! and [`narration::NarrationSnapshot`] views and issues `start`,
//! `send_user_message`, `reset`, `pause`, and `resume` calls on
//! [`engine::DialogueEngine`].

pub mod completion;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod guard;
pub mod narration;
pub mod pacing;
pub mod progress;
pub mod prompts;
pub mod script;
pub mod session;

pub use completion::{CompletionClient, OpenAICompatibleClient};
pub use config::EngineConfig;
pub use engine::DialogueEngine;
pub use guard::{GenerationToken, RequestGuard};
pub use narration::{NarrationPresenter, NarrationSnapshot};
pub use progress::{InMemoryProgressStore, ProgressStore};
pub use script::{Channel, EvaluationSpec, ModuleScript, Pace, ScriptStore, Step, StepKind};
pub use session::{Message, Phase, Role, Session, SessionSnapshot};
