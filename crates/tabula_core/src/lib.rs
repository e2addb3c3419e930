//! Columnar query engine core.
//!
//! Expressions over tables are evaluated in four contexts (select,
//! with-columns, filter and group by aggregate), either eagerly on a
//! [`Table`](arrays::table::Table) or deferred through a
//! [`LazyFrame`](logical::lazy::LazyFrame) whose plan is optimized before it
//! runs, fully materialized or batch by batch.
pub mod arrays;
pub mod config;
pub mod context;
pub mod execution;
pub mod expr;
pub mod logical;
pub mod optimizer;

/// Commonly used types and expression builders.
pub mod prelude {
    pub use tabula_error::{DbError, ErrorKind, Result};

    pub use crate::arrays::array::Array;
    pub use crate::arrays::column::Column;
    pub use crate::arrays::compute::fill::FillStrategy;
    pub use crate::arrays::compute::sort::SortOptions;
    pub use crate::arrays::datatype::DataType;
    pub use crate::arrays::field::Schema;
    pub use crate::arrays::scalar::ScalarValue;
    pub use crate::arrays::table::Table;
    pub use crate::config::execution::ExecutionConfig;
    pub use crate::execution::eager::GroupBy;
    pub use crate::execution::join::JoinType;
    pub use crate::execution::source::{BatchSource, DataSource, MemorySource, ScanRequest};
    pub use crate::expr::selector::{self, Selector};
    pub use crate::expr::{
        Expr,
        WindowMapping,
        all,
        col,
        cols,
        concat_list,
        concat_str,
        count,
        dtype_col,
        dtype_cols,
        element,
        fold,
        len,
        lit,
        nth,
        when,
    };
    pub use crate::logical::lazy::{LazyFrame, LazyGroupBy};
}
