//! Comparison kernels.
//!
//! Comparisons use the same total order as sorting: NaN equals NaN and is
//! greater than every other float. A null on either side gives null.
use std::cmp::Ordering;
use std::fmt;

use tabula_error::Result;

use super::broadcast_arrays;
use super::cast::cast;
use crate::arrays::array::{Array, NativeType};
use crate::arrays::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::NotEq => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::LtEq => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::GtEq => ord != Ordering::Less,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "=="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

fn compare_native<T: NativeType>(op: CmpOp, left: &Array, right: &Array) -> Result<Array> {
    let a = left.values::<T>()?;
    let b = right.values::<T>()?;
    let out: Vec<Option<bool>> = (0..a.len())
        .map(|idx| {
            (left.is_valid(idx) && right.is_valid(idx))
                .then(|| op.matches(a[idx].total_cmp(&b[idx])))
        })
        .collect();
    Ok(out.into())
}

fn compare_scalars(op: CmpOp, left: &Array, right: &Array) -> Array {
    let out: Vec<Option<bool>> = (0..left.len())
        .map(|idx| {
            let (a, b) = (left.get_value(idx), right.get_value(idx));
            (!a.is_null() && !b.is_null()).then(|| op.matches(a.total_cmp(&b)))
        })
        .collect();
    out.into()
}

/// Compare two arrays elementwise after casting both to their common type.
pub fn compare(op: CmpOp, left: &Array, right: &Array) -> Result<Array> {
    let datatype = DataType::supertype(left.datatype(), right.datatype())?;
    let arrays = broadcast_arrays(&[left, right])?;
    // Categoricals compare by their string values.
    let datatype = match datatype {
        DataType::Categorical => DataType::Utf8,
        other => other,
    };
    let left = cast(&arrays[0], &datatype, true)?;
    let right = cast(&arrays[1], &datatype, true)?;

    match &datatype {
        DataType::Null => Ok(Array::new_null(&DataType::Boolean, left.len())),
        DataType::Boolean => compare_native::<bool>(op, &left, &right),
        DataType::Int8 => compare_native::<i8>(op, &left, &right),
        DataType::Int16 => compare_native::<i16>(op, &left, &right),
        DataType::Int32 | DataType::Date => compare_native::<i32>(op, &left, &right),
        DataType::Int64 | DataType::Datetime => compare_native::<i64>(op, &left, &right),
        DataType::UInt8 => compare_native::<u8>(op, &left, &right),
        DataType::UInt16 => compare_native::<u16>(op, &left, &right),
        DataType::UInt32 => compare_native::<u32>(op, &left, &right),
        DataType::UInt64 => compare_native::<u64>(op, &left, &right),
        DataType::Float32 => compare_native::<f32>(op, &left, &right),
        DataType::Float64 => compare_native::<f64>(op, &left, &right),
        _ => Ok(compare_scalars(op, &left, &right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gt_with_literal() {
        let a = Array::from(vec![Some(1_i64), None, Some(3)]);
        let b = Array::from(vec![2_i64]);
        let got = compare(CmpOp::Gt, &a, &b).unwrap();
        assert_eq!(Array::from(vec![Some(false), None, Some(true)]), got);
    }

    #[test]
    fn nan_is_equal_to_nan_and_greatest() {
        let a = Array::from(vec![f64::NAN, f64::NAN]);
        let b = Array::from(vec![f64::NAN, f64::INFINITY]);
        assert_eq!(
            Array::from(vec![true, false]),
            compare(CmpOp::Eq, &a, &b).unwrap()
        );
        assert_eq!(
            Array::from(vec![false, true]),
            compare(CmpOp::Gt, &a, &b).unwrap()
        );
    }

    #[test]
    fn mixed_numeric_types() {
        let a = Array::from(vec![1_i32, 2]);
        let b = Array::from(vec![1.5_f64, 1.5]);
        let got = compare(CmpOp::LtEq, &a, &b).unwrap();
        assert_eq!(Array::from(vec![true, false]), got);
    }

    #[test]
    fn strings() {
        let a = Array::from(vec!["apple", "pear"]);
        let b = Array::from(vec!["banana"]);
        let got = compare(CmpOp::Lt, &a, &b).unwrap();
        assert_eq!(Array::from(vec![true, false]), got);
    }

    #[test]
    fn incompatible_types() {
        let a = Array::from(vec!["a"]);
        let b = Array::from(vec![1_i64]);
        assert!(compare(CmpOp::Eq, &a, &b).is_err());
    }
}
