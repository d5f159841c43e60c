//! taskproof — task-completion and verification engine.
//!
//! Turns "I did this task, here is evidence" into a durable, auditable
//! record, optionally gated by an asynchronous AI judgment, with points
//! and streaks derived from the completion history.

pub mod catalog;
pub mod config;
pub mod error;
pub mod machine;
pub mod model;
pub mod objects;
pub mod store;
pub mod streak;
pub mod verify;
pub mod week;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use workflow::CompletionWorkflow;
