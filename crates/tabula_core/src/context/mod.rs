//! Execution contexts over materialized tables.
pub mod eval;
pub mod group;
pub mod group_by;
pub mod select;
pub mod state;
pub mod window;

pub use group::{GroupContext, GroupOrder};
pub use state::{AggState, ExecutionState};
