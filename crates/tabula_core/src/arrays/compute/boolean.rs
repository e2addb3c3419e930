//! Boolean logic with Kleene (three valued) semantics.
use tabula_error::{Result, type_err};

use super::broadcast_arrays;
use super::cast::cast;
use crate::arrays::array::{Array, ArrayBuilder};
use crate::arrays::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

fn bool_values(array: &Array) -> Result<Vec<Option<bool>>> {
    match array.datatype() {
        DataType::Boolean => array.values_opt::<bool>(),
        DataType::Null => Ok(vec![None; array.len()]),
        other => Err(type_err!("Expected a Boolean, got {other}")),
    }
}

pub fn boolean_op(op: BoolOp, left: &Array, right: &Array) -> Result<Array> {
    let arrays = broadcast_arrays(&[left, right])?;
    let a = bool_values(&arrays[0])?;
    let b = bool_values(&arrays[1])?;

    let out: Vec<Option<bool>> = a
        .into_iter()
        .zip(b)
        .map(|(a, b)| match op {
            BoolOp::And => match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BoolOp::Or => match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            BoolOp::Xor => Some(a? ^ b?),
        })
        .collect();

    Ok(out.into())
}

pub fn not(array: &Array) -> Result<Array> {
    let out: Vec<Option<bool>> = bool_values(array)?
        .into_iter()
        .map(|v| v.map(|v| !v))
        .collect();
    Ok(out.into())
}

/// Convert a predicate result to a selection mask. Nulls do not select.
pub fn to_mask(array: &Array) -> Result<Vec<bool>> {
    Ok(bool_values(array)?
        .into_iter()
        .map(|v| v.unwrap_or(false))
        .collect())
}

/// Pick values from `truthy` where the mask is true, from `falsy` otherwise.
///
/// A null in the mask picks from `falsy`.
pub fn if_then_else(mask: &Array, truthy: &Array, falsy: &Array) -> Result<Array> {
    let datatype = DataType::supertype(truthy.datatype(), falsy.datatype())?;
    let arrays = broadcast_arrays(&[mask, truthy, falsy])?;
    let mask = to_mask(&arrays[0])?;
    let truthy = cast(&arrays[1], &datatype, true)?;
    let falsy = cast(&arrays[2], &datatype, true)?;

    let mut builder = ArrayBuilder::with_capacity(datatype, mask.len());
    for (idx, pick) in mask.into_iter().enumerate() {
        if pick {
            builder.push(truthy.get_value(idx))?;
        } else {
            builder.push(falsy.get_value(idx))?;
        }
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kleene_and_or() {
        let a = Array::from(vec![Some(true), Some(false), None, None]);
        let b = Array::from(vec![None, None, Some(false), Some(true)]);
        assert_eq!(
            Array::from(vec![None, Some(false), Some(false), None]),
            boolean_op(BoolOp::And, &a, &b).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(true), None, None, Some(true)]),
            boolean_op(BoolOp::Or, &a, &b).unwrap()
        );
    }

    #[test]
    fn not_keeps_nulls() {
        let a = Array::from(vec![Some(true), None]);
        assert_eq!(Array::from(vec![Some(false), None]), not(&a).unwrap());
    }

    #[test]
    fn non_boolean_rejected() {
        let a = Array::from(vec![1_i32]);
        assert!(not(&a).is_err());
    }

    #[test]
    fn ternary_picks_and_casts() {
        let mask = Array::from(vec![Some(true), Some(false), None]);
        let truthy = Array::from(vec![1_i32, 2, 3]);
        let falsy = Array::from(vec![0.5_f64]);
        let got = if_then_else(&mask, &truthy, &falsy).unwrap();
        assert_eq!(Array::from(vec![1.0, 0.5, 0.5]), got);
    }
}
