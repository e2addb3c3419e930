//! Materializing execution. Every node runs against its fully read inputs.
use tabula_error::{DbError, Result, ResultExt, length_err};

use super::join::{JoinType, hash_join};
use super::source::{ScanRequest, read_table};
use crate::arrays::array::Array;
use crate::arrays::compute::sort::{SortOptions, arg_sort_multi};
use crate::arrays::table::Table;
use crate::config::execution::ExecutionConfig;
use crate::context::eval::evaluate;
use crate::context::group_by::group_by_agg;
use crate::context::{AggState, ExecutionState, select};
use crate::expr::Expr;
use crate::logical::operator::{LogicalOperator, ProjectKind};

/// Execute a plan, children first.
///
/// A failure is annotated with the node it happened in, errors from
/// children pass through unchanged.
pub fn execute_plan(plan: &LogicalOperator, config: &ExecutionConfig) -> Result<Table> {
    let inputs = plan
        .children()
        .iter()
        .map(|child| execute_plan(child, config))
        .collect::<Result<Vec<_>>>()?;
    let out = execute_node(plan, inputs, config).context_fn(|| plan.to_string())?;
    tracing::trace!(node = plan.name(), rows = out.height(), "executed node");
    Ok(out)
}

/// Apply a single node to its materialized inputs.
pub(crate) fn execute_node(
    plan: &LogicalOperator,
    inputs: Vec<Table>,
    config: &ExecutionConfig,
) -> Result<Table> {
    // Window partitions are cached per context call, every node gets a fresh
    // state.
    let state = ExecutionState::from_config(config);
    let mut inputs = inputs.into_iter();

    match plan {
        LogicalOperator::Scan(scan) => {
            let request = ScanRequest::new(scan.node.projection.clone(), scan.node.predicates.clone());
            read_table(scan.node.source.as_ref(), &request)
        }
        LogicalOperator::Filter(n) => {
            let input = one_input(inputs.next())?;
            select::filter(&input, &n.node.predicate, &state)
        }
        LogicalOperator::Project(n) => {
            let input = one_input(inputs.next())?;
            match n.node.kind {
                ProjectKind::Select => select::select(&input, &n.node.exprs, &state),
                ProjectKind::WithColumns => select::with_columns(&input, &n.node.exprs, &state),
            }
        }
        LogicalOperator::Aggregate(n) => {
            let input = one_input(inputs.next())?;
            group_by_agg(
                &input,
                &n.node.keys,
                &n.node.aggs,
                n.node.maintain_order,
                &state,
            )
        }
        LogicalOperator::Sort(n) => {
            let input = one_input(inputs.next())?;
            sort_table(&input, &n.node.by, &n.node.descending, &state)
        }
        LogicalOperator::Limit(n) => Ok(one_input(inputs.next())?.head(n.node.limit)),
        LogicalOperator::Join(n) => {
            let left = one_input(inputs.next())?;
            let right = one_input(inputs.next())?;
            hash_join(
                &left,
                &right,
                &n.node.left_on,
                &n.node.right_on,
                n.node.join_type,
            )
        }
    }
}

fn one_input(input: Option<Table>) -> Result<Table> {
    input.ok_or_else(|| DbError::compute("Missing input to operator"))
}

/// Stable sort by expressions. A single direction applies to every key.
pub fn sort_table(
    input: &Table,
    by: &[Expr],
    descending: &[bool],
    state: &ExecutionState,
) -> Result<Table> {
    if by.is_empty() {
        return Ok(input.clone());
    }

    let options: Vec<SortOptions> = match descending {
        [] => vec![SortOptions::default(); by.len()],
        [d] => vec![SortOptions::descending(*d); by.len()],
        _ if descending.len() == by.len() => {
            descending.iter().map(|&d| SortOptions::descending(d)).collect()
        }
        _ => {
            return Err(length_err!(
                "Got {} sort directions for {} sort keys",
                descending.len(),
                by.len()
            ));
        }
    };

    let keys = by
        .iter()
        .map(|expr| {
            evaluate(expr, input, None, state)
                .and_then(AggState::into_array)
                .and_then(|arr| arr.broadcast(input.height()))
                .context_fn(|| format!("sort key '{expr}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Array> = keys.iter().collect();
    Ok(input.take(&arg_sort_multi(&refs, &options)?))
}

/// Eager entry points. Each call runs immediately and returns a new table.
impl Table {
    pub fn select(&self, exprs: impl IntoIterator<Item = Expr>) -> Result<Table> {
        let exprs: Vec<Expr> = exprs.into_iter().collect();
        select::select(self, &exprs, &ExecutionState::default())
    }

    pub fn with_columns(&self, exprs: impl IntoIterator<Item = Expr>) -> Result<Table> {
        let exprs: Vec<Expr> = exprs.into_iter().collect();
        select::with_columns(self, &exprs, &ExecutionState::default())
    }

    pub fn filter(&self, predicate: impl Into<Expr>) -> Result<Table> {
        select::filter(self, &predicate.into(), &ExecutionState::default())
    }

    pub fn sort_by_exprs(
        &self,
        by: impl IntoIterator<Item = Expr>,
        descending: &[bool],
    ) -> Result<Table> {
        let by: Vec<Expr> = by.into_iter().collect();
        sort_table(self, &by, descending, &ExecutionState::default())
    }

    /// Group by keys, groups are output sorted by key.
    pub fn group_by(&self, keys: impl IntoIterator<Item = Expr>) -> GroupBy<'_> {
        GroupBy {
            table: self,
            keys: keys.into_iter().collect(),
            maintain_order: false,
        }
    }

    /// Group by keys, groups are output in order of first occurrence.
    pub fn group_by_stable(&self, keys: impl IntoIterator<Item = Expr>) -> GroupBy<'_> {
        GroupBy {
            table: self,
            keys: keys.into_iter().collect(),
            maintain_order: true,
        }
    }

    pub fn join<S: AsRef<str>>(
        &self,
        other: &Table,
        left_on: &[S],
        right_on: &[S],
        join_type: JoinType,
    ) -> Result<Table> {
        let left_on: Vec<String> = left_on.iter().map(|s| s.as_ref().to_string()).collect();
        let right_on: Vec<String> = right_on.iter().map(|s| s.as_ref().to_string()).collect();
        hash_join(self, other, &left_on, &right_on, join_type)
    }
}

/// Pending eager group by.
#[derive(Debug, Clone)]
pub struct GroupBy<'a> {
    table: &'a Table,
    keys: Vec<Expr>,
    maintain_order: bool,
}

impl GroupBy<'_> {
    pub fn agg(&self, aggs: impl IntoIterator<Item = Expr>) -> Result<Table> {
        let aggs: Vec<Expr> = aggs.into_iter().collect();
        group_by_agg(
            self.table,
            &self.keys,
            &aggs,
            self.maintain_order,
            &ExecutionState::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::expr::{col, lit};

    fn table() -> Table {
        Table::try_from_pairs([
            ("k", Array::from(vec!["b", "a", "b", "a"])),
            ("v", Array::from(vec![3_i64, 1, 4, 1])),
        ])
        .unwrap()
    }

    #[test]
    fn sort_by_expression() {
        let out = table()
            .sort_by_exprs(vec![col("k"), col("v") * lit(-1)], &[false, false])
            .unwrap();
        assert_eq!(&Array::from(vec!["a", "a", "b", "b"]), out.column("k").unwrap().array());
        assert_eq!(&Array::from(vec![1_i64, 1, 4, 3]), out.column("v").unwrap().array());
    }

    #[test]
    fn sort_single_direction_applies_to_all() {
        let out = table()
            .sort_by_exprs(vec![col("k"), col("v")], &[true])
            .unwrap();
        assert_eq!(&Array::from(vec![4_i64, 3, 1, 1]), out.column("v").unwrap().array());
    }

    #[test]
    fn sort_direction_count_mismatch() {
        let err = table()
            .sort_by_exprs(vec![col("k"), col("v")], &[true, false, true])
            .unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());
    }

    #[test]
    fn eager_group_by() {
        let out = table()
            .group_by_stable(vec![col("k")])
            .agg(vec![col("v").sum()])
            .unwrap();
        assert_eq!(&Array::from(vec!["b", "a"]), out.column("k").unwrap().array());
        assert_eq!(&Array::from(vec![7_i64, 2]), out.column("v").unwrap().array());
    }

    #[test]
    fn failing_node_in_error() {
        let config = ExecutionConfig {
            predicate_pushdown: false,
            ..Default::default()
        };
        let err = table()
            .lazy()
            .with_config(config)
            .filter(col("v") + lit("x"))
            .collect()
            .unwrap_err();
        assert_eq!(ErrorKind::Type, err.kind());
        assert!(err.to_string().contains("Filter: [(col(\"v\")) + (\"x\")]"), "{err}");

        // Pushed into the scan, the scan is named instead.
        let err = table()
            .lazy()
            .filter(col("v") + lit("x"))
            .collect()
            .unwrap_err();
        assert_eq!(ErrorKind::Type, err.kind());
        assert!(err.to_string().contains("Scan: memory predicate="), "{err}");
    }
}
