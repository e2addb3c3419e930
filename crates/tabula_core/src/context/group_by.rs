//! Group by + aggregate context.
use hashbrown::HashSet;
use rayon::prelude::*;
use tabula_error::{Result, ResultExt, schema_err};

use super::eval::evaluate;
use super::group::{GroupContext, GroupOrder};
use super::state::{AggState, ExecutionState};
use crate::arrays::array::Array;
use crate::arrays::column::Column;
use crate::arrays::field::Schema;
use crate::arrays::table::Table;
use crate::expr::Expr;
use crate::expr::expand::{expand_exprs, output_name};

pub fn group_order(maintain_order: bool) -> GroupOrder {
    if maintain_order {
        GroupOrder::FirstOccurrence
    } else {
        GroupOrder::Sorted
    }
}

/// Evaluated grouping keys.
#[derive(Debug)]
pub struct GroupKeys {
    pub names: Vec<String>,
    pub arrays: Vec<Array>,
}

pub fn evaluate_keys(input: &Table, keys: &[Expr], state: &ExecutionState) -> Result<GroupKeys> {
    let keys = expand_exprs(keys, &input.schema())?;
    let mut names = Vec::with_capacity(keys.len());
    let mut arrays = Vec::with_capacity(keys.len());
    for key in &keys {
        let name = output_name(key)?;
        if names.contains(&name) {
            return Err(schema_err!("Duplicate group key '{name}'"));
        }
        let array = evaluate(key, input, None, state)
            .and_then(AggState::into_array)
            .and_then(|arr| arr.broadcast(input.height()))
            .context_fn(|| format!("group key '{key}'"))?;
        names.push(name);
        arrays.push(array);
    }
    Ok(GroupKeys { names, arrays })
}

/// Expand aggregate expressions. Wildcards and selectors don't include the
/// grouping keys.
pub fn expand_aggs(aggs: &[Expr], input: &Schema, key_names: &[String]) -> Result<Vec<(Expr, String)>> {
    let mut schema = Schema::new();
    for (name, datatype) in input.iter() {
        if !key_names.iter().any(|k| k == name) {
            schema.insert(name, datatype.clone());
        }
    }

    let mut seen: HashSet<String> = key_names.iter().cloned().collect();
    expand_exprs(aggs, &schema)?
        .into_iter()
        .map(|expr| {
            let name = output_name(&expr)?;
            if !seen.insert(name.clone()) {
                return Err(schema_err!(
                    "Duplicate output name '{name}' in aggregation, use 'alias' to rename it"
                ));
            }
            Ok((expr, name))
        })
        .collect()
}

pub fn group_by_agg(
    input: &Table,
    keys: &[Expr],
    aggs: &[Expr],
    maintain_order: bool,
    state: &ExecutionState,
) -> Result<Table> {
    let keys = evaluate_keys(input, keys, state)?;
    let aggs = expand_aggs(aggs, &input.schema(), &keys.names)?;

    let refs: Vec<&Array> = keys.arrays.iter().collect();
    let groups = GroupContext::try_from_keys(&refs, input.height(), group_order(maintain_order))?;
    tracing::trace!(groups = groups.len(), rows = input.height(), "partitioned rows");

    let first_rows = groups.first_rows();
    let mut columns: Vec<Column> = keys
        .names
        .iter()
        .zip(&keys.arrays)
        .map(|(name, arr)| Column::new(name.clone(), arr.take(&first_rows)))
        .collect();

    let eval_one = |(expr, name): &(Expr, String)| -> Result<Column> {
        let array = evaluate(expr, input, Some(&groups), state)
            .and_then(|s| s.finalize_groups(groups.len()))
            .context_fn(|| format!("aggregation '{expr}'"))?;
        Ok(Column::new(name.clone(), array))
    };
    let agg_columns: Vec<Column> = if state.parallel() && aggs.len() > 1 {
        aggs.par_iter().map(eval_one).collect::<Result<_>>()?
    } else {
        aggs.iter().map(eval_one).collect::<Result<_>>()?
    };
    columns.extend(agg_columns);

    Table::try_new_with_height(columns, groups.len())
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::arrays::compute::list;
    use crate::arrays::datatype::DataType;
    use crate::expr::{all, col, len, lit};

    fn table() -> Table {
        Table::try_from_pairs([
            ("keys", Array::from(vec!["b", "a", "a", "b", "c"])),
            ("values", Array::from(vec![1_i64, 10, 7, 4, 2])),
        ])
        .unwrap()
    }

    #[test]
    fn sorted_by_default() {
        let state = ExecutionState::default();
        let out = group_by_agg(&table(), &[col("keys")], &[col("values").sum()], false, &state).unwrap();
        assert_eq!(&Array::from(vec!["a", "b", "c"]), out.column("keys").unwrap().array());
        assert_eq!(&Array::from(vec![17_i64, 5, 2]), out.column("values").unwrap().array());
    }

    #[test]
    fn maintain_order() {
        let state = ExecutionState::default();
        let out = group_by_agg(
            &table(),
            &[col("keys")],
            &[len(), col("values").max().alias("max")],
            true,
            &state,
        )
        .unwrap();
        assert_eq!(&Array::from(vec!["b", "a", "c"]), out.column("keys").unwrap().array());
        assert_eq!(&Array::from(vec![2_u32, 2, 1]), out.column("count").unwrap().array());
        assert_eq!(&Array::from(vec![4_i64, 10, 2]), out.column("max").unwrap().array());
    }

    #[test]
    fn non_aggregated_implodes() {
        let state = ExecutionState::default();
        let out = group_by_agg(
            &table(),
            &[col("keys")],
            &[col("values"), lit(1).alias("one")],
            false,
            &state,
        )
        .unwrap();
        let values = out.column("values").unwrap();
        assert_eq!(&DataType::list(DataType::Int64), values.datatype());
        let rows = list::list_rows(values.array()).unwrap();
        assert_eq!(Some(Array::from(vec![10_i64, 7])), rows[0]);
        assert_eq!(&Array::from(vec![1_i32, 1, 1]), out.column("one").unwrap().array());
    }

    #[test]
    fn shift_within_groups() {
        let t = Table::try_from_pairs([
            ("keys", Array::from(vec!["a", "a", "b"])),
            ("values", Array::from(vec![10_i64, 7, 1])),
        ])
        .unwrap();
        let state = ExecutionState::default();
        let out = group_by_agg(&t, &[col("keys")], &[col("values").shift(1)], false, &state).unwrap();
        let rows = list::list_rows(out.column("values").unwrap().array()).unwrap();
        assert_eq!(Some(Array::from(vec![None, Some(10_i64)])), rows[0]);
        assert_eq!(Some(Array::from(vec![None::<i64>])), rows[1]);
    }

    #[test]
    fn wildcard_skips_keys() {
        let state = ExecutionState::default();
        let out = group_by_agg(&table(), &[col("keys")], &[all().first()], false, &state).unwrap();
        assert_eq!(vec!["keys", "values"], out.column_names());
    }

    #[test]
    fn key_name_collision() {
        let state = ExecutionState::default();
        let err = group_by_agg(&table(), &[col("keys")], &[col("keys").first()], false, &state)
            .unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }
}
