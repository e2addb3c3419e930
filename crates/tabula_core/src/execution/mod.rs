//! Plan execution and data sources.
pub mod eager;
pub mod join;
pub mod source;
pub mod streaming;
