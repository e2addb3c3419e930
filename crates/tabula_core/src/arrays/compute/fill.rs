//! Null and NaN handling, plus the order dependent kernels that go with them
//! (shift, unique, cumulative sums, interpolation).
use hashbrown::HashSet;
use tabula_error::{Result, type_err};

use super::aggregate::{AggKind, aggregate};
use super::arith::{ArithNative, ArithOp};
use super::boolean::if_then_else;
use super::cast::cast;
use super::sort::{SortOptions, arg_sort};
use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillStrategy {
    /// Use the previous non-null value.
    Forward,
    /// Use the next non-null value.
    Backward,
    Min,
    Max,
    Mean,
    Zero,
    One,
}

impl FillStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Zero => "zero",
            Self::One => "one",
        }
    }
}

pub fn is_null(array: &Array) -> Array {
    array.validity().iter().map(|v| !v).collect::<Vec<_>>().into()
}

pub fn is_not_null(array: &Array) -> Array {
    array.validity().iter().collect::<Vec<_>>().into()
}

fn check_numeric(array: &Array, op: &str) -> Result<()> {
    let dt = array.datatype();
    if dt.is_numeric() || *dt == DataType::Null {
        Ok(())
    } else {
        Err(type_err!("Cannot apply {op} to {dt}"))
    }
}

/// NaN check. Non-float numeric columns have no NaN values.
pub fn is_nan(array: &Array) -> Result<Array> {
    check_numeric(array, "is_nan")?;
    let out: Vec<Option<bool>> = array
        .iter_values()
        .map(|v| (!v.is_null()).then(|| v.is_nan()))
        .collect();
    Ok(out.into())
}

pub fn is_not_nan(array: &Array) -> Result<Array> {
    check_numeric(array, "is_not_nan")?;
    let out: Vec<Option<bool>> = array
        .iter_values()
        .map(|v| (!v.is_null()).then(|| !v.is_nan()))
        .collect();
    Ok(out.into())
}

/// Replace nulls with values from another array (or a broadcast scalar).
pub fn fill_null(array: &Array, value: &Array) -> Result<Array> {
    let supertype = DataType::supertype(array.datatype(), value.datatype())?;
    if array.null_count() == 0 && supertype == *array.datatype() {
        return Ok(array.clone());
    }
    if_then_else(&is_not_null(array), array, value)
}

/// Replace NaN with values from another array. Filling with null turns NaN
/// into a missing value.
pub fn fill_nan(array: &Array, value: &Array) -> Result<Array> {
    check_numeric(array, "fill_nan")?;
    if !array.datatype().is_float() {
        return Ok(array.clone());
    }
    let mask = is_nan(array)?;
    if_then_else(&mask, value, array)
}

pub fn fill_null_strategy(array: &Array, strategy: FillStrategy) -> Result<Array> {
    let fill_with = |value: ScalarValue| -> Result<Array> {
        let value = cast(&Array::from_scalar(&value, 1)?, array.datatype(), false)?;
        fill_null(array, &value)
    };

    match strategy {
        FillStrategy::Forward => {
            let mut last = None;
            let indices: Vec<Option<usize>> = (0..array.len())
                .map(|idx| {
                    if array.is_valid(idx) {
                        last = Some(idx);
                    }
                    last
                })
                .collect();
            Ok(array.take_opt(&indices))
        }
        FillStrategy::Backward => {
            let mut next = None;
            let mut indices: Vec<Option<usize>> = (0..array.len())
                .rev()
                .map(|idx| {
                    if array.is_valid(idx) {
                        next = Some(idx);
                    }
                    next
                })
                .collect();
            indices.reverse();
            Ok(array.take_opt(&indices))
        }
        FillStrategy::Min => fill_with(aggregate(AggKind::Min, array)?),
        FillStrategy::Max => fill_with(aggregate(AggKind::Max, array)?),
        FillStrategy::Mean => fill_with(aggregate(AggKind::Mean, array)?),
        FillStrategy::Zero => {
            check_numeric(array, "fill_null(zero)")?;
            fill_with(ScalarValue::Int64(0))
        }
        FillStrategy::One => {
            check_numeric(array, "fill_null(one)")?;
            fill_with(ScalarValue::Int64(1))
        }
    }
}

/// Linearly interpolate nulls between non-null values. Leading and trailing
/// nulls stay null. Integer columns produce Float64.
pub fn interpolate(array: &Array) -> Result<Array> {
    check_numeric(array, "interpolate")?;
    let values: Vec<Option<f64>> = array.iter_values().map(|v| v.as_f64()).collect();

    let mut out = values.clone();
    let mut prev: Option<usize> = None;
    for (idx, value) in values.iter().enumerate() {
        if value.is_none() {
            continue;
        }
        if let Some(p) = prev {
            if idx - p > 1 {
                let (start, end) = (values[p].unwrap_or_default(), value.unwrap_or_default());
                let steps = (idx - p) as f64;
                for (i, slot) in out.iter_mut().enumerate().take(idx).skip(p + 1) {
                    *slot = Some(start + (end - start) * ((i - p) as f64 / steps));
                }
            }
        }
        prev = Some(idx);
    }

    let out = Array::from(out);
    match array.datatype() {
        DataType::Float32 => cast(&out, &DataType::Float32, true),
        _ => Ok(out),
    }
}

/// Shift values by `periods`. Positive periods move values towards the end,
/// filling the start with nulls.
pub fn shift(array: &Array, periods: i64) -> Array {
    let len = array.len() as i64;
    let indices: Vec<Option<usize>> = (0..len)
        .map(|idx| {
            let src = idx - periods;
            (0..len).contains(&src).then_some(src as usize)
        })
        .collect();
    array.take_opt(&indices)
}

/// Distinct values. With `maintain_order` values appear in first occurrence
/// order, otherwise sorted.
pub fn unique(array: &Array, maintain_order: bool) -> Array {
    let mut seen = HashSet::new();
    let indices: Vec<usize> = array
        .iter_values()
        .enumerate()
        .filter_map(|(idx, v)| seen.insert(v).then_some(idx))
        .collect();
    let uniques = array.take(&indices);
    if maintain_order {
        uniques
    } else {
        uniques.take(&arg_sort(&uniques, SortOptions::default()))
    }
}

fn cum_sum_native<T: ArithNative>(array: &Array) -> Result<Array> {
    let values = array.values::<T>()?;
    let mut running = T::default();
    let out: Vec<Option<T>> = values
        .iter()
        .enumerate()
        .map(|(idx, v)| {
            if !array.is_valid(idx) {
                return None;
            }
            running = T::apply(ArithOp::Add, running, *v).unwrap_or_default();
            Some(running)
        })
        .collect();
    Ok(Array::from_native_opt(out))
}

/// Cumulative sum. Nulls stay null and do not reset the running sum. The
/// output type is the type of the sum aggregate.
pub fn cum_sum(array: &Array) -> Result<Array> {
    let output = AggKind::Sum.output_type(array.datatype())?;
    let values = cast(array, &output, true)?;
    match output {
        DataType::Int64 => cum_sum_native::<i64>(&values),
        DataType::UInt64 => cum_sum_native::<u64>(&values),
        DataType::UInt32 => cum_sum_native::<u32>(&values),
        DataType::Float32 => cum_sum_native::<f32>(&values),
        DataType::Float64 => cum_sum_native::<f64>(&values),
        other => Err(type_err!("Cannot compute cumulative sum as {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_null_with_scalar_and_supertype() {
        let arr = Array::from(vec![Some(1_i64), None]);
        let got = fill_null(&arr, &Array::from(vec![0.5_f64])).unwrap();
        assert_eq!(Array::from(vec![1.0, 0.5]), got);
    }

    #[test]
    fn fill_nan_to_null() {
        let arr = Array::from(vec![1.0, f64::NAN, 3.0]);
        let got = fill_nan(&arr, &Array::new_null(&DataType::Null, 1)).unwrap();
        assert_eq!(Array::from(vec![Some(1.0), None, Some(3.0)]), got);
        assert_eq!(
            ScalarValue::Float64(2.0),
            aggregate(AggKind::Mean, &got).unwrap()
        );
    }

    #[test]
    fn strategies() {
        let arr = Array::from(vec![None, Some(1_i64), None, Some(3), None]);
        assert_eq!(
            Array::from(vec![None, Some(1_i64), Some(1), Some(3), Some(3)]),
            fill_null_strategy(&arr, FillStrategy::Forward).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(1_i64), Some(1), Some(3), Some(3), None]),
            fill_null_strategy(&arr, FillStrategy::Backward).unwrap()
        );
        assert_eq!(
            Array::from(vec![2_i64, 1, 2, 3, 2]),
            fill_null_strategy(&arr, FillStrategy::Mean).unwrap()
        );
        assert_eq!(
            Array::from(vec![0_i64, 1, 0, 3, 0]),
            fill_null_strategy(&arr, FillStrategy::Zero).unwrap()
        );
    }

    #[test]
    fn interpolate_linear() {
        let arr = Array::from(vec![None, Some(1_i64), None, None, Some(4), None]);
        let got = interpolate(&arr).unwrap();
        assert_eq!(
            Array::from(vec![None, Some(1.0), Some(2.0), Some(3.0), Some(4.0), None]),
            got
        );
    }

    #[test]
    fn shift_both_directions() {
        let arr = Array::from(vec![1_i32, 2, 3]);
        assert_eq!(Array::from(vec![None, Some(1_i32), Some(2)]), shift(&arr, 1));
        assert_eq!(Array::from(vec![Some(2_i32), Some(3), None]), shift(&arr, -1));
        assert_eq!(Array::from(vec![None, None, None::<i32>]), shift(&arr, 5));
    }

    #[test]
    fn unique_orders() {
        let arr = Array::from(vec![Some(3_i64), None, Some(1), Some(3)]);
        assert_eq!(Array::from(vec![Some(3_i64), None, Some(1)]), unique(&arr, true));
        assert_eq!(Array::from(vec![None, Some(1_i64), Some(3)]), unique(&arr, false));
    }

    #[test]
    fn cum_sum_skips_nulls() {
        let arr = Array::from(vec![Some(1_i32), None, Some(2)]);
        assert_eq!(
            Array::from(vec![Some(1_i64), None, Some(3)]),
            cum_sum(&arr).unwrap()
        );
    }

    #[test]
    fn nan_checks() {
        let arr = Array::from(vec![Some(f64::NAN), None, Some(1.0)]);
        assert_eq!(
            Array::from(vec![Some(true), None, Some(false)]),
            is_nan(&arr).unwrap()
        );
        assert!(is_nan(&Array::from(vec!["a"])).is_err());
        assert_eq!(Array::from(vec![false, true, false]), is_null(&arr));
    }
}
