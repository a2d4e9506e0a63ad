//! Financial Advisory Decision Core
//!
//! The orchestration layer of a financial-advisory conversational agent:
//! - Validates and repairs malformed input before any spend
//! - Classifies intent with confidence gates and bounded clarification
//! - Fans out to analytics tools concurrently, tolerating partial failure
//! - Derives typed facts, insights, and action candidates deterministically
//! - Generates an answer and validates it against the evidence it was given
//! - Falls back to a deterministic facts-only rendering when generation
//!   cannot be trusted
//!
//! PIPELINE:
//! GATE → ROUTE → GUARD → FAN-OUT → DERIVE → SYNTHESIZE+VALIDATE → RENDER → AUDIT

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod evidence;
pub mod execution;
pub mod gate;
pub mod inference;
pub mod knowledge;
pub mod models;
pub mod pipeline;
pub mod renderer;
pub mod router;
pub mod synthesis;
pub mod tools;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use config::AgentConfig;
pub use models::*;
pub use pipeline::Pipeline;
