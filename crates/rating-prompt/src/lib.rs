//! Rating-prompt gatekeeper: decides when an app-store rating prompt may be
//! shown after a positive action, honoring prompt and decline cooldowns.

pub mod gatekeeper;
pub mod service;
pub mod state;

pub use gatekeeper::{evaluate, BlockReason, GateDecision};
pub use service::RatingPromptService;
pub use state::{ActionRecord, PositiveAction, PromptOutcome, PromptPhase, RatingPromptState};
