//! Evaluate expressions against a table, optionally within groups.
//!
//! The group context is passed explicitly through every call. Evaluation
//! in a grouped context produces per-group values (`AggState::Grouped`) or
//! one value per group (`AggState::Aggregated`), the caller decides how to
//! shape them into an output column.
use rayon::prelude::*;
use tabula_error::{DbError, Result, ResultExt, length_err, schema_err};

use super::group::GroupContext;
use super::state::{AggState, ExecutionState};
use super::window;
use crate::arrays::array::Array;
use crate::arrays::column::Column;
use crate::arrays::compute::aggregate::{AggKind, aggregate_groups};
use crate::arrays::compute::boolean::{if_then_else, to_mask};
use crate::arrays::compute::cast::cast;
use crate::arrays::compute::list;
use crate::arrays::compute::sort::{self, SortOptions, arg_sort_multi};
use crate::arrays::datatype::DataType;
use crate::arrays::table::Table;
use crate::expr::udf::Udf;
use crate::expr::{ELEMENT_NAME, Expr};

pub fn evaluate(
    expr: &Expr,
    input: &Table,
    groups: Option<&GroupContext>,
    state: &ExecutionState,
) -> Result<AggState> {
    match expr {
        Expr::Column(name) => column_state(input, name, groups),
        Expr::Element => column_state(input, ELEMENT_NAME, groups),
        Expr::Literal(value) => Ok(AggState::Literal(Array::from_scalar(value, 1)?)),
        Expr::Alias(inner, _) => evaluate(inner, input, groups, state),
        Expr::Len => Ok(match groups {
            Some(groups) => AggState::Aggregated(groups.group_sizes()),
            None => AggState::Flat(Array::from(vec![input.height() as u32])),
        }),
        Expr::BinaryExpr { left, op, right } => {
            let states = evaluate_many([left.as_ref(), right.as_ref()], input, groups, state)?;
            map_states(states, groups, true, state, |arrays| {
                op.evaluate(&arrays[0], &arrays[1])
            })
        }
        Expr::Cast {
            expr: inner,
            datatype,
            strict,
        } => {
            let states = evaluate_many([inner.as_ref()], input, groups, state)?;
            map_states(states, groups, true, state, |arrays| {
                cast(&arrays[0], datatype, *strict)
            })
        }
        Expr::Ternary {
            predicate,
            truthy,
            falsy,
        } => {
            let states = evaluate_many(
                [predicate.as_ref(), truthy.as_ref(), falsy.as_ref()],
                input,
                groups,
                state,
            )?;
            map_states(states, groups, true, state, |arrays| {
                if_then_else(&arrays[0], &arrays[1], &arrays[2])
            })
        }
        Expr::Function {
            input: inputs,
            function,
        } => {
            let states = evaluate_many(inputs.iter(), input, groups, state)?;
            map_states(states, groups, function.is_elementwise(), state, |arrays| {
                function.evaluate(arrays)
            })
        }
        Expr::Sort {
            expr: inner,
            options,
        } => {
            let states = evaluate_many([inner.as_ref()], input, groups, state)?;
            map_states(states, groups, false, state, |arrays| {
                Ok(sort::sort(&arrays[0], *options))
            })
        }
        Expr::SortBy {
            expr: inner,
            by,
            descending,
        } => {
            let states = evaluate_many(
                std::iter::once(inner.as_ref()).chain(by.iter()),
                input,
                groups,
                state,
            )?;
            map_states(states, groups, false, state, |arrays| {
                sort_by(&arrays[0], &arrays[1..], descending)
            })
        }
        Expr::Filter { input: inner, by } => {
            let states = evaluate_many([inner.as_ref(), by.as_ref()], input, groups, state)?;
            map_states(states, groups, false, state, |arrays| {
                filter_array(&arrays[0], &arrays[1])
            })
        }
        Expr::Slice {
            input: inner,
            offset,
            length,
        } => {
            let states = evaluate_many([inner.as_ref()], input, groups, state)?;
            map_states(states, groups, false, state, |arrays| {
                Ok(slice_array(&arrays[0], *offset, *length))
            })
        }
        Expr::Agg { kind, input: inner } => evaluate_agg(*kind, inner, input, groups, state),
        Expr::Window {
            function,
            partition_by,
            mapping,
        } => match groups {
            Some(_) => Err(schema_err!(
                "Window expression '{expr}' cannot be used in a grouped context"
            )),
            None => Ok(AggState::Flat(window::evaluate_window(
                function,
                partition_by,
                *mapping,
                input,
                state,
            )?)),
        },
        Expr::Map {
            input: inner,
            udf,
            output_type,
        } => evaluate_map(inner, udf, output_type.as_ref(), input, groups, state),
        Expr::Apply {
            input: inner,
            udf,
            output_type,
        } => evaluate_apply(inner, udf, output_type.as_ref(), input, groups, state),
        Expr::Fold {
            acc,
            function,
            exprs,
        } => {
            let states = evaluate_many(
                std::iter::once(acc.as_ref()).chain(exprs.iter()),
                input,
                groups,
                state,
            )?;
            map_states(states, groups, true, state, |arrays| {
                let mut out = arrays[0].clone();
                for next in &arrays[1..] {
                    out = function.call(&out, next)?;
                }
                Ok(out)
            })
        }
        Expr::ListEval {
            input: inner,
            expr: body,
            parallel,
        } => {
            let states = evaluate_many([inner.as_ref()], input, groups, state)?;
            let parallel = *parallel && state.parallel();
            map_states(states, groups, true, state, |arrays| {
                list_eval(&arrays[0], body, parallel)
            })
        }
        Expr::Explode(inner) => {
            let states = evaluate_many([inner.as_ref()], input, groups, state)?;
            map_states(states, groups, false, state, |arrays| {
                if arrays[0].datatype().is_nested() {
                    Ok(list::explode(&arrays[0])?.0)
                } else {
                    Ok(arrays[0].clone())
                }
            })
        }
        Expr::Columns(_)
        | Expr::DtypeColumn(_)
        | Expr::Nth(_)
        | Expr::Wildcard
        | Expr::Selector(_)
        | Expr::Exclude(..)
        | Expr::RenameAlias { .. } => Err(schema_err!(
            "Expression '{expr}' must be expanded before evaluation"
        )),
    }
}

fn evaluate_many<'a>(
    exprs: impl IntoIterator<Item = &'a Expr>,
    input: &Table,
    groups: Option<&GroupContext>,
    state: &ExecutionState,
) -> Result<Vec<AggState>> {
    exprs
        .into_iter()
        .map(|expr| evaluate(expr, input, groups, state))
        .collect()
}

fn column_state(input: &Table, name: &str, groups: Option<&GroupContext>) -> Result<AggState> {
    let column = input.column(name)?;
    Ok(match groups {
        None => AggState::Flat(column.array().clone()),
        Some(groups) => AggState::grouped(
            groups
                .groups()
                .iter()
                .map(|rows| column.array().take(rows))
                .collect(),
            column.datatype().clone(),
        ),
    })
}

/// Run `f` per group, on the rayon pool when parallel.
pub(crate) fn for_each_group<T, F>(num_groups: usize, parallel: bool, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Send + Sync,
{
    if parallel && num_groups > 1 {
        (0..num_groups).into_par_iter().map(f).collect()
    } else {
        (0..num_groups).map(f).collect()
    }
}

/// Combine evaluated inputs with a kernel.
///
/// Elementwise kernels over aggregated inputs run once over all groups.
/// Everything else involving per-group values runs once per group, each
/// aggregated input contributing its group's single value.
fn map_states<F>(
    states: Vec<AggState>,
    groups: Option<&GroupContext>,
    elementwise: bool,
    state: &ExecutionState,
    f: F,
) -> Result<AggState>
where
    F: Fn(&[Array]) -> Result<Array> + Send + Sync,
{
    if states.iter().all(|s| matches!(s, AggState::Literal(_))) {
        let arrays = into_arrays(states)?;
        return Ok(AggState::Literal(f(&arrays)?));
    }

    let Some(groups) = groups else {
        let arrays = into_arrays(states)?;
        return Ok(AggState::Flat(f(&arrays)?));
    };

    let any_grouped = states
        .iter()
        .any(|s| matches!(s, AggState::Grouped { .. }));
    if elementwise && !any_grouped {
        let arrays = into_arrays(states)?;
        return Ok(AggState::Aggregated(f(&arrays)?));
    }

    let values = for_each_group(groups.len(), state.parallel(), |group| {
        let inputs: Vec<Array> = states.iter().map(|s| s.group_input(group)).collect();
        f(&inputs)
    })?;
    let datatype = match values.first() {
        Some(first) => first.datatype().clone(),
        None => {
            let inputs: Vec<Array> = states.iter().map(AggState::empty_input).collect();
            f(&inputs)?.datatype().clone()
        }
    };
    Ok(AggState::grouped(values, datatype))
}

fn into_arrays(states: Vec<AggState>) -> Result<Vec<Array>> {
    states.into_iter().map(AggState::into_array).collect()
}

fn aggregate_all(kind: AggKind, array: &Array) -> Result<Array> {
    aggregate_groups(kind, array, &[(0..array.len()).collect()])
}

fn evaluate_agg(
    kind: AggKind,
    inner: &Expr,
    input: &Table,
    groups: Option<&GroupContext>,
    state: &ExecutionState,
) -> Result<AggState> {
    // Aggregating a plain column in groups doesn't need the per-group
    // copies.
    if let (Some(groups), Expr::Column(name)) = (groups, inner) {
        let column = input.column(name)?;
        return Ok(AggState::Aggregated(aggregate_groups(
            kind,
            column.array(),
            groups.groups(),
        )?));
    }

    Ok(match evaluate(inner, input, groups, state)? {
        AggState::Flat(arr) => AggState::Flat(aggregate_all(kind, &arr)?),
        AggState::Literal(arr) => AggState::Literal(aggregate_all(kind, &arr)?),
        AggState::Aggregated(arr) => {
            let singles: Vec<Vec<usize>> = (0..arr.len()).map(|idx| vec![idx]).collect();
            AggState::Aggregated(aggregate_groups(kind, &arr, &singles)?)
        }
        AggState::Grouped { values, datatype } => {
            let mut acc = kind.accumulator(&datatype)?;
            acc.ensure_groups(values.len());
            for (group, arr) in values.iter().enumerate() {
                let rows: Vec<usize> = (0..arr.len()).collect();
                acc.update(group, arr, &rows)?;
            }
            AggState::Aggregated(acc.finish()?)
        }
    })
}

fn call_udf(udf: &Udf, input: &Array, output_type: Option<&DataType>) -> Result<Array> {
    let out = udf
        .call(input)
        .context_fn(|| format!("user function '{}'", udf.name()))?;
    match output_type {
        Some(datatype) if out.datatype() != datatype => cast(&out, datatype, true),
        _ => Ok(out),
    }
}

/// `map` always sees the ungrouped column. In a grouped context the result
/// is split into groups afterwards, so the function never observes group
/// boundaries.
fn evaluate_map(
    inner: &Expr,
    udf: &Udf,
    output_type: Option<&DataType>,
    input: &Table,
    groups: Option<&GroupContext>,
    state: &ExecutionState,
) -> Result<AggState> {
    let flat = evaluate(inner, input, None, state)?;
    let is_literal = matches!(flat, AggState::Literal(_));
    let out = call_udf(udf, &flat.into_array()?, output_type)?;

    match groups {
        None if is_literal => Ok(AggState::Literal(out)),
        None => Ok(AggState::Flat(out)),
        Some(groups) => {
            if out.len() == groups.height() {
                let values = groups.groups().iter().map(|rows| out.take(rows)).collect();
                Ok(AggState::grouped(values, out.datatype().clone()))
            } else if out.len() == 1 {
                Ok(AggState::Literal(out))
            } else {
                Err(length_err!(
                    "User function '{}' returned {} values for a column of {} rows",
                    udf.name(),
                    out.len(),
                    groups.height()
                ))
            }
        }
    }
}

/// `apply` sees each group's values. Ungrouped, the whole column is one
/// group.
fn evaluate_apply(
    inner: &Expr,
    udf: &Udf,
    output_type: Option<&DataType>,
    input: &Table,
    groups: Option<&GroupContext>,
    state: &ExecutionState,
) -> Result<AggState> {
    let inner_state = evaluate(inner, input, groups, state)?;
    let groups = match (groups, &inner_state) {
        (_, AggState::Literal(arr)) => {
            return Ok(AggState::Literal(call_udf(udf, arr, output_type)?));
        }
        (None, _) => {
            let arr = inner_state.into_array()?;
            return Ok(AggState::Flat(call_udf(udf, &arr, output_type)?));
        }
        (Some(groups), _) => groups,
    };

    let outputs = for_each_group(groups.len(), state.parallel(), |group| {
        call_udf(udf, &inner_state.group_input(group), output_type)
    })?;

    if !outputs.is_empty() && outputs.iter().all(|out| out.len() == 1) {
        return Ok(AggState::Aggregated(Array::concat(&outputs)?));
    }
    let datatype = outputs
        .first()
        .map(|out| out.datatype().clone())
        .or_else(|| output_type.cloned())
        .unwrap_or_else(|| inner_state.datatype().clone());
    Ok(AggState::grouped(outputs, datatype))
}

fn sort_by(values: &Array, keys: &[Array], descending: &[bool]) -> Result<Array> {
    let keys = keys
        .iter()
        .map(|key| key.broadcast(values.len()))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&Array> = keys.iter().collect();
    let options: Vec<SortOptions> = (0..keys.len())
        .map(|idx| {
            let desc = descending
                .get(idx)
                .or(descending.first())
                .copied()
                .unwrap_or(false);
            SortOptions::descending(desc)
        })
        .collect();
    let indices = arg_sort_multi(&refs, &options)?;
    Ok(values.take(&indices))
}

fn filter_array(values: &Array, mask: &Array) -> Result<Array> {
    let mut mask = to_mask(mask)?;
    if mask.len() == 1 && values.len() != 1 {
        mask = vec![mask[0]; values.len()];
    }
    if mask.len() != values.len() {
        return Err(length_err!(
            "Filter mask has length {}, values have length {}",
            mask.len(),
            values.len()
        ));
    }
    Ok(values.filter(&mask))
}

/// Slice with negative offsets counting from the end.
pub(crate) fn slice_array(values: &Array, offset: i64, length: usize) -> Array {
    let len = values.len() as i64;
    let start = if offset < 0 {
        (len + offset).max(0)
    } else {
        offset.min(len)
    };
    values.slice(start as usize, length)
}

fn list_eval(array: &Array, body: &Expr, parallel: bool) -> Result<Array> {
    let inner = array
        .datatype()
        .inner()
        .cloned()
        .ok_or_else(|| DbError::type_err(format!("Cannot eval over {}", array.datatype())))?;

    let eval_row = |row: &Array| -> Result<Array> {
        let table = Table::try_new(vec![Column::new(ELEMENT_NAME, row.clone())])?;
        evaluate(body, &table, None, &ExecutionState::new(false))?.into_array()
    };

    let rows = list::list_rows(array)?;
    let outputs: Vec<Option<Array>> = if parallel {
        rows.par_iter()
            .map(|row| row.as_ref().map(eval_row).transpose())
            .collect::<Result<_>>()?
    } else {
        rows.iter()
            .map(|row| row.as_ref().map(eval_row).transpose())
            .collect::<Result<_>>()?
    };

    let datatype = match outputs.iter().flatten().next() {
        Some(out) => out.datatype().clone(),
        None => eval_row(&Array::new_null(&inner, 0))?.datatype().clone(),
    };
    Array::try_new_list(DataType::list(datatype), outputs)
        .context_fn(|| format!("list eval '{body}'"))
}
