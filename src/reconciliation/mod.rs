//! Reconciliation engine matching payments to open charges

pub mod allocation;
pub mod applier;
pub mod attempts;
pub mod core;
pub mod resolver;

pub use self::core::*;
pub use applier::MatchApplier;
pub use attempts::AttemptLogger;
pub use resolver::*;
