//! # rowvault Sampling
//!
//! Filter construction and the sampling engine that runs over a commit's rows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Sampling Layer                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   Parser    │───>│   Filter    │    │ Projection  │     │
//! │  │ (text→AST)  │    │ (AST→pred)  │    │ (cols/order)│     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                            │                  │              │
//! │                     SamplingPlan (rounds)                    │
//! │                            │                                 │
//! │     ┌──────────┬───────────┼────────────┬──────────┐        │
//! │     │  Random  │ Stratified│ Systematic │ Cluster  │        │
//! │     └──────────┴───────────┴────────────┴──────────┘        │
//! │                            │                                 │
//! │               HashSelector (seeded, exact/approx)            │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `filter`: typed filter AST and its compiled predicate
//! - `parser`: textual filter grammar
//! - `projection`: column selection and ordering of sampled rows
//! - `round`: round configuration and plan compilation
//! - `selection`: seeded hash selection shared by every method
//! - `engine`: multi-round execution, exclusion set and residual

pub mod engine;
pub mod filter;
pub mod parser;
pub mod projection;
pub mod round;
pub mod selection;

mod cluster;
mod random;
mod stratified;
mod systematic;

pub use engine::{
    CancelToken, Candidate, ExclusionSet, SamplingEngine, SamplingOutcome, SelectedRow,
};
pub use filter::{CompiledFilter, FilterExpr, FilterSpec, Operator};
pub use parser::parse_filter;
pub use projection::{CompiledProjection, OrderKey, Projection};
pub use round::{
    Allocation, ClusterTake, CompiledRound, RoundConfig, RoundMethod, SamplingPlan,
    METHOD_COLUMN, ROUND_COLUMN,
};
pub use selection::{Draw, HashSelector};
