//! Engagement hub. Wires the ledger, rewards, personalization and rating
//! prompt components together and runs the post-action side effects as
//! background tasks so they never block or fail the business action.

pub mod hub;

pub use hub::{ActionReport, EngagementHub};
