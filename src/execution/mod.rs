//! SQL execution core.
//!
//! - [`UnifiedExecutor`] - statement dispatch and the per-call pipeline
//! - [`ExecutionContext`] / [`EngineServices`] - per-call state and handles
//! - [`ExecutionResult`] / [`ResultSet`] - the result surface
//! - [`plan`] / [`RuleBasedOptimizer`] - plan generation and rule toggles
//! - strategies: one per statement family

mod context;
mod dcl;
mod ddl;
mod dml;
mod executor;
mod optimizer;
pub mod plan;
mod result;
mod strategy;
mod utility;

pub use context::{EngineServices, ExecutionContext};
pub use executor::UnifiedExecutor;
pub use optimizer::{
    RuleBasedOptimizer, RULE_AGGREGATION_PUSHDOWN, RULE_CONSTANT_FOLDING, RULE_INDEX_SELECTION,
    RULE_JOIN_REORDERING, RULE_PREDICATE_PUSHDOWN,
};
pub use plan::{ExecutionPlan, PlanKind};
pub use result::{ColumnMeta, ExecutionResult, ResultSet, Row};
pub use strategy::ExecutionStrategy;
