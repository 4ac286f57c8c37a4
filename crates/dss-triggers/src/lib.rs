//! Trigger Rule Engine
//!
//! This crate relays matching events under new names, driven by rules kept in
//! a hierarchical [`RuleStore`].
//!
//! # Architecture
//!
//! ```text
//! EVENT → TRIGGER CONDITIONS → RESCHEDULE / DAMPING → RELAY EVENT
//! ```
//!
//! - **Conditions**: typed matchers selected by the `type` tag of each node
//! - **Action lag**: delays the relay; a retrigger can replace a pending one
//! - **Damping**: suppresses relays within an interval of the last one
//!
//! # Key Types
//!
//! - [`TriggerCondition`] - One parsed trigger node
//! - [`TriggerEvaluator`] - Matches conditions against events
//! - [`SystemTriggerPlugin`] - The `system_trigger` event handler
//! - [`MemoryRuleStore`] - In-memory rule tree loaded from YAML

pub mod bookkeeping;
pub mod engine;
pub mod model;
pub mod rule_store;
pub mod trigger;
pub mod trigger_eval;

pub use bookkeeping::{ActionLagState, DampingOutcome, DampingState};
pub use engine::{EvaluationSummary, SystemTriggerPlugin, TRIGGER_EVENTS};
pub use model::{ModelView, StaticModel};
pub use rule_store::{MemoryRuleStore, RuleStore, RuleStoreError, RuleStoreResult};
pub use trigger::{
    Comparison, IdMatch, TextMatch, TriggerCondition, TriggerError, TriggerResult, TRIGGER_TYPES,
};
pub use trigger_eval::{EventSource, TriggerEvaluator};
