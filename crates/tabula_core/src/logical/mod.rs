//! Deferred plans.
pub mod lazy;
pub mod operator;
