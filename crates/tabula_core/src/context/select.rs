//! Select, with-columns and filter contexts.
//!
//! Expressions in one call are independent of each other and run on the
//! rayon pool when parallel execution is enabled.
use hashbrown::HashSet;
use rayon::prelude::*;
use tabula_error::{Result, ResultExt, length_err, schema_err, type_err};

use super::eval::evaluate;
use super::state::{AggState, ExecutionState};
use crate::arrays::array::Array;
use crate::arrays::column::Column;
use crate::arrays::compute::boolean::to_mask;
use crate::arrays::datatype::DataType;
use crate::arrays::table::Table;
use crate::expr::Expr;
use crate::expr::expand::{expand_exprs, output_name};

/// Expand expressions against the input schema and check output names are
/// unique.
pub fn prepare_exprs(exprs: &[Expr], input: &Table) -> Result<Vec<(Expr, String)>> {
    let expanded = expand_exprs(exprs, &input.schema())?;
    let mut seen = HashSet::with_capacity(expanded.len());
    expanded
        .into_iter()
        .map(|expr| {
            let name = output_name(&expr)?;
            if !seen.insert(name.clone()) {
                return Err(schema_err!(
                    "Duplicate output name '{name}', use 'alias' to rename one of the expressions"
                ));
            }
            Ok((expr, name))
        })
        .collect()
}

/// Evaluate prepared expressions against the whole table.
pub(crate) fn evaluate_columns(
    exprs: &[(Expr, String)],
    input: &Table,
    state: &ExecutionState,
) -> Result<Vec<Column>> {
    let eval_one = |(expr, name): &(Expr, String)| -> Result<Column> {
        let array = evaluate(expr, input, None, state)
            .and_then(AggState::into_array)
            .context_fn(|| format!("expression '{expr}'"))?;
        Ok(Column::new(name.clone(), array))
    };

    if state.parallel() && exprs.len() > 1 {
        exprs.par_iter().map(eval_one).collect()
    } else {
        exprs.iter().map(eval_one).collect()
    }
}

fn broadcast_column(column: Column, len: usize) -> Result<Column> {
    if column.len() == len {
        return Ok(column);
    }
    let array = column.array().broadcast(len)?;
    Ok(column.with_array(array))
}

pub fn select(input: &Table, exprs: &[Expr], state: &ExecutionState) -> Result<Table> {
    let prepared = prepare_exprs(exprs, input)?;
    let columns = evaluate_columns(&prepared, input, state)?;

    let mut height = None;
    for column in &columns {
        if column.len() == 1 {
            continue;
        }
        match height {
            None => height = Some(column.len()),
            Some(h) if h != column.len() => {
                return Err(length_err!(
                    "Column '{}' has length {}, other columns have length {h}",
                    column.name(),
                    column.len()
                ));
            }
            Some(_) => (),
        }
    }
    let height = match height {
        Some(height) => height,
        None if columns.is_empty() => 0,
        None => 1,
    };

    let columns = columns
        .into_iter()
        .map(|c| broadcast_column(c, height))
        .collect::<Result<Vec<_>>>()?;
    Table::try_new_with_height(columns, height)
}

pub fn with_columns(input: &Table, exprs: &[Expr], state: &ExecutionState) -> Result<Table> {
    let prepared = prepare_exprs(exprs, input)?;
    let columns = evaluate_columns(&prepared, input, state)?;

    let mut out = input.clone();
    for column in columns {
        if column.len() != input.height() && column.len() != 1 {
            return Err(length_err!(
                "Column '{}' has length {}, table has {} rows",
                column.name(),
                column.len(),
                input.height()
            ));
        }
        let column = broadcast_column(column, input.height())?;
        out = out.with_column(column)?;
    }
    Ok(out)
}

/// Boolean mask for a predicate, broadcasting a single value.
pub(crate) fn predicate_mask(input: &Table, predicate: &Expr, state: &ExecutionState) -> Result<Vec<bool>> {
    let prepared = prepare_exprs(std::slice::from_ref(predicate), input)?;
    let [(expr, _)] = prepared.as_slice() else {
        return Err(schema_err!(
            "Filter predicate '{predicate}' must expand to exactly one expression"
        ));
    };

    let array: Array = evaluate(expr, input, None, state)
        .and_then(AggState::into_array)
        .context_fn(|| format!("expression '{expr}'"))?;
    if !matches!(array.datatype(), DataType::Boolean | DataType::Null) {
        return Err(type_err!(
            "Filter predicate '{expr}' produced {}, expected Boolean",
            array.datatype()
        ));
    }

    let mut mask = to_mask(&array)?;
    if mask.len() == 1 && input.height() != 1 {
        mask = vec![mask[0]; input.height()];
    }
    if mask.len() != input.height() {
        return Err(length_err!(
            "Filter predicate '{expr}' has length {}, table has {} rows",
            mask.len(),
            input.height()
        ));
    }
    Ok(mask)
}

pub fn filter(input: &Table, predicate: &Expr, state: &ExecutionState) -> Result<Table> {
    let mask = predicate_mask(input, predicate, state)?;
    input.filter_mask(&mask)
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::expr::{all, col, lit, when};

    fn table() -> Table {
        Table::try_from_pairs([
            ("a", Array::from(vec![1_i64, 2, 3])),
            ("b", Array::from(vec![Some(1.5), None, Some(3.5)])),
        ])
        .unwrap()
    }

    #[test]
    fn select_broadcasts_scalars() {
        let state = ExecutionState::default();
        let out = select(&table(), &[col("a"), col("a").sum().alias("total")], &state).unwrap();
        assert_eq!((3, 2), out.shape());
        assert_eq!(&Array::from(vec![6_i64, 6, 6]), out.column("total").unwrap().array());

        let out = select(&table(), &[col("a").sum(), col("b").mean()], &state).unwrap();
        assert_eq!((1, 2), out.shape());
    }

    #[test]
    fn select_duplicate_names() {
        let state = ExecutionState::default();
        let err = select(&table(), &[col("a"), col("a") + lit(1)], &state).unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }

    #[test]
    fn select_error_names_expression() {
        let state = ExecutionState::new(false);
        let err = select(&table(), &[col("missing") + lit(1)], &state).unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
        assert!(err.to_string().contains("col(\"missing\")"), "{err}");
    }

    #[test]
    fn with_columns_replaces_in_place() {
        let state = ExecutionState::default();
        let out = with_columns(
            &table(),
            &[(col("a") * lit(10)).alias("a"), lit("x").alias("c")],
            &state,
        )
        .unwrap();
        assert_eq!(vec!["a", "b", "c"], out.column_names());
        assert_eq!(&Array::from(vec![10_i64, 20, 30]), out.column("a").unwrap().array());
        assert_eq!(&Array::from(vec!["x", "x", "x"]), out.column("c").unwrap().array());
    }

    #[test]
    fn with_columns_wrong_length() {
        let state = ExecutionState::default();
        let err = with_columns(&table(), &[col("a").head(2).alias("h")], &state).unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());
    }

    #[test]
    fn filter_rows() {
        let state = ExecutionState::default();
        let out = filter(&table(), &col("a").gt(1), &state).unwrap();
        assert_eq!(&Array::from(vec![2_i64, 3]), out.column("a").unwrap().array());

        // Null predicate values drop the row.
        let out = filter(&table(), &col("b").gt(2.0), &state).unwrap();
        assert_eq!(&Array::from(vec![3_i64]), out.column("a").unwrap().array());

        let out = filter(&table(), &lit(true), &state).unwrap();
        assert_eq!(3, out.height());
    }

    #[test]
    fn filter_not_boolean() {
        let state = ExecutionState::default();
        let err = filter(&table(), &col("a"), &state).unwrap_err();
        assert_eq!(ErrorKind::Type, err.kind());

        let err = filter(&table(), &col("a").gt(1).head(2), &state).unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());
    }

    #[test]
    fn when_then_in_select() {
        let state = ExecutionState::default();
        let expr = when(col("a").eq(1))
            .then(lit("one"))
            .when(col("a").lt(3))
            .then(lit("small"))
            .otherwise(lit("big"))
            .alias("size");
        let out = select(&table(), &[expr], &state).unwrap();
        assert_eq!(
            &Array::from(vec!["one", "small", "big"]),
            out.column("size").unwrap().array()
        );
    }

    #[test]
    fn wildcard_select() {
        let state = ExecutionState::default();
        let out = select(&table(), &[all()], &state).unwrap();
        assert_eq!(table(), out);
    }
}
