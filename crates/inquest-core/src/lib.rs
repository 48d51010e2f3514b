//! Core orchestration engine for automated fraud investigations.
//!
//! An investigation walks a validated task graph: fetch entity data, fan out
//! over independent domain analyses, merge their findings under whitelist
//! isolation, validate the outcome for safety, and summarize. The central
//! loop is bounded; hitting the bound is a named outcome, not an error.
//!
//! - [`engine`]: composition root and the investigation run loop
//! - [`graph`]: immutable node/edge task graph with transition predicates
//! - [`orchestrator`]: the bounded decision node at the graph's center
//! - [`agents`]: domain analyzer trait, toolbox, and isolation-enforcing runner
//! - [`tools`]: coordinated tool dispatch with per-tool circuit breaking
//! - [`whitelist`]: cross-domain data isolation policy
//! - [`safety`]: outcome validation and manual-review flagging
//! - [`performance`]: advisory efficiency scoring
//! - [`state`]: the investigation data model and its single merge step
//! - [`storage`]: versioned persistence with optimistic concurrency
//! - [`events`]: cursor-based incremental event feed

pub mod agents;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod orchestrator;
pub mod performance;
pub mod safety;
pub mod state;
pub mod storage;
pub mod tools;
pub mod whitelist;

pub use config::EngineConfig;
pub use engine::{EngineBuilder, InvestigationEngine};
pub use error::{EngineError, Result};
pub use state::{
    CompletionReason, Domain, EntityRef, InvestigationState, Phase,
};
