//! # phyx-core: Plan Model for Physical Enumeration
//!
//! Data structures shared by the enumeration engine (`phyx-rules`) and its outer
//! surfaces. Nothing in this crate enumerates plans; it describes what is being
//! asked for, what has been built, and where it runs.
//!
//! ## Module Overview
//!
//! - **`expr`**: column ids and their side table, scalar expressions, join/agg/window
//!   descriptors.
//! - **`logical`**: the closed set of logical operator kinds.
//! - **`memo`**: plain plan arena, memo groups, and the `PlanRef`/`LogicalView`
//!   abstraction over both.
//! - **`properties`**: physical property requests and delivered properties.
//! - **`physical`**: physical operators, candidates, and attached plan trees.
//! - **`task`**: root, coprocessor and MPP tasks plus pending index-join information.
//! - **`access_path`**: table and index access paths, runtime range templates.
//! - **`hint`**: per-operator hint masks.
//! - **`stats`**: statistics and the oracle trait.
//! - **`cost`**: cost model trait and default weighted model.
//! - **`session`**: session variables.
//! - **`context`**: per-statement compilation context (warnings, cancellation).
//! - **`error`**: hard errors, warning codes.

pub mod access_path;
pub mod context;
pub mod cost;
pub mod error;
pub mod expr;
pub mod hint;
pub mod logical;
pub mod memo;
pub mod physical;
pub mod properties;
pub mod session;
pub mod stats;
pub mod task;

pub use context::PlanContext;
pub use error::{ErrorCode, PlanError, PlanResult, PlanWarning};
