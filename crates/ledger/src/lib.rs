//! Behavior ledger: append-only, per-user record of typed interaction
//! events with ring-buffer retention.

pub mod ledger;

pub use ledger::BehaviorLedger;
