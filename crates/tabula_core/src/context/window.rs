//! Window expressions: evaluate within partitions, map results back to rows.
use tabula_error::{DbError, Result, ResultExt};

use super::eval::evaluate;
use super::group::{GroupContext, GroupOrder};
use super::state::{AggState, ExecutionState};
use crate::arrays::array::Array;
use crate::arrays::table::Table;
use crate::expr::{Expr, WindowMapping};

/// Cache key for a set of partition expressions.
pub fn partition_key(partition_by: &[Expr]) -> String {
    let exprs: Vec<String> = partition_by.iter().map(|e| e.to_string()).collect();
    format!("[{}]", exprs.join(", "))
}

pub fn evaluate_window(
    function: &Expr,
    partition_by: &[Expr],
    mapping: WindowMapping,
    input: &Table,
    state: &ExecutionState,
) -> Result<Array> {
    let key = partition_key(partition_by);
    let groups = state.window_partition(&key, || partition(partition_by, input, state))?;

    let result = evaluate(function, input, Some(&groups), state)?;
    remap(result, &groups, mapping).context_fn(|| format!("window over {key}"))
}

fn partition(partition_by: &[Expr], input: &Table, state: &ExecutionState) -> Result<GroupContext> {
    let keys = partition_by
        .iter()
        .map(|expr| {
            evaluate(expr, input, None, state)?
                .into_array()?
                .broadcast(input.height())
        })
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Array> = keys.iter().collect();
    GroupContext::try_from_keys(&refs, input.height(), GroupOrder::FirstOccurrence)
}

fn remap(result: AggState, groups: &GroupContext, mapping: WindowMapping) -> Result<Array> {
    let height = groups.height();
    match (mapping, result) {
        (_, AggState::Flat(arr)) => Ok(arr),
        (WindowMapping::Explode, AggState::Literal(arr)) => arr.broadcast(groups.len()),
        (_, AggState::Literal(arr)) => arr.broadcast(height),
        (WindowMapping::Explode, AggState::Aggregated(arr)) => Ok(arr),
        (_, AggState::Aggregated(arr)) => Ok(arr.take(&groups.row_to_group())),
        (WindowMapping::GroupToRows, AggState::Grouped { values, datatype }) => {
            for (idx, (arr, rows)) in values.iter().zip(groups.groups()).enumerate() {
                if arr.len() != rows.len() {
                    return Err(DbError::WindowShape(format!(
                        "Group {idx} has {} rows but its result has {} values",
                        rows.len(),
                        arr.len()
                    )));
                }
            }
            if values.is_empty() {
                return Ok(Array::new_null(&datatype, 0));
            }

            // Position of every input row in the concatenated group results.
            let mut indices = vec![0; height];
            let mut offset = 0;
            for rows in groups.groups() {
                for (pos, &row) in rows.iter().enumerate() {
                    indices[row] = offset + pos;
                }
                offset += rows.len();
            }
            Ok(Array::concat(&values)?.take(&indices))
        }
        (WindowMapping::Join, grouped @ AggState::Grouped { .. }) => {
            let lists = grouped.finalize_groups(groups.len())?;
            Ok(lists.take(&groups.row_to_group()))
        }
        (WindowMapping::Explode, AggState::Grouped { values, datatype }) => {
            if values.is_empty() {
                return Ok(Array::new_null(&datatype, 0));
            }
            Array::concat(&values)
        }
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::arrays::compute::list;
    use crate::expr::{col, lit};

    fn table() -> Table {
        Table::try_from_pairs([
            ("g", Array::from(vec!["A", "B", "A"])),
            ("v", Array::from(vec![10_i64, 1, 7])),
        ])
        .unwrap()
    }

    fn window(expr: Expr, mapping: WindowMapping, state: &ExecutionState) -> Result<Array> {
        evaluate_window(&expr, &[col("g")], mapping, &table(), state)
    }

    #[test]
    fn group_to_rows_broadcasts_aggregates() {
        let state = ExecutionState::new(false);
        let out = window(col("v").mean(), WindowMapping::GroupToRows, &state).unwrap();
        assert_eq!(Array::from(vec![8.5, 1.0, 8.5]), out);
    }

    #[test]
    fn group_to_rows_scatters_elementwise() {
        let state = ExecutionState::new(false);
        let out = window(col("v").shift(1), WindowMapping::GroupToRows, &state).unwrap();
        assert_eq!(Array::from(vec![None, None, Some(10_i64)]), out);

        let out = window(col("v") * lit(2), WindowMapping::GroupToRows, &state).unwrap();
        assert_eq!(Array::from(vec![20_i64, 2, 14]), out);
    }

    #[test]
    fn group_to_rows_shape_mismatch() {
        let state = ExecutionState::new(false);
        let err = window(col("v").head(1), WindowMapping::GroupToRows, &state).unwrap_err();
        assert_eq!(ErrorKind::WindowShape, err.kind());
    }

    #[test]
    fn join_repeats_group_list() {
        let state = ExecutionState::new(false);
        let out = window(col("v"), WindowMapping::Join, &state).unwrap();
        let rows = list::list_rows(&out).unwrap();
        assert_eq!(Some(Array::from(vec![10_i64, 7])), rows[0]);
        assert_eq!(Some(Array::from(vec![1_i64])), rows[1]);
        assert_eq!(rows[0], rows[2]);
    }

    #[test]
    fn explode_concatenates_groups() {
        let state = ExecutionState::new(false);
        let out = window(col("v").sort(Default::default()), WindowMapping::Explode, &state).unwrap();
        assert_eq!(Array::from(vec![7_i64, 10, 1]), out);
    }

    #[test]
    fn partition_shared_across_expressions() {
        let state = ExecutionState::new(false);
        window(col("v").sum(), WindowMapping::GroupToRows, &state).unwrap();
        window(col("v").max(), WindowMapping::GroupToRows, &state).unwrap();
        assert_eq!(1, state.window_partitions_computed());
    }
}
