//! Arithmetic kernels.
use std::fmt;

use tabula_error::{Result, type_err};

use super::broadcast_arrays;
use super::cast::cast;
use crate::arrays::array::{Array, NativeType};
use crate::arrays::bitmap::Validity;
use crate::arrays::datatype::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// True division, always produces floats.
    Div,
    FloorDiv,
    Rem,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::FloorDiv => write!(f, "//"),
            Self::Rem => write!(f, "%"),
        }
    }
}

/// Numeric types supporting arithmetic.
///
/// Integer operations wrap on overflow. Integer division and remainder by
/// zero produce `None` (null).
pub trait ArithNative: NativeType {
    fn apply(op: ArithOp, a: Self, b: Self) -> Option<Self>;
    fn negate(self) -> Option<Self>;
    fn absolute(self) -> Self;
}

macro_rules! impl_arith_signed {
    ($prim:ty) => {
        impl ArithNative for $prim {
            fn apply(op: ArithOp, a: Self, b: Self) -> Option<Self> {
                Some(match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div | ArithOp::FloorDiv => {
                        if b == 0 {
                            return None;
                        }
                        let q = a.wrapping_div(b);
                        if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
                            q - 1
                        } else {
                            q
                        }
                    }
                    ArithOp::Rem => {
                        if b == 0 {
                            return None;
                        }
                        let r = a.wrapping_rem(b);
                        if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
                    }
                })
            }

            fn negate(self) -> Option<Self> {
                Some(self.wrapping_neg())
            }

            fn absolute(self) -> Self {
                self.wrapping_abs()
            }
        }
    };
}

macro_rules! impl_arith_unsigned {
    ($prim:ty) => {
        impl ArithNative for $prim {
            fn apply(op: ArithOp, a: Self, b: Self) -> Option<Self> {
                Some(match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div | ArithOp::FloorDiv => a.checked_div(b)?,
                    ArithOp::Rem => a.checked_rem(b)?,
                })
            }

            fn negate(self) -> Option<Self> {
                None
            }

            fn absolute(self) -> Self {
                self
            }
        }
    };
}

macro_rules! impl_arith_float {
    ($prim:ty) => {
        impl ArithNative for $prim {
            fn apply(op: ArithOp, a: Self, b: Self) -> Option<Self> {
                Some(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::FloorDiv => (a / b).floor(),
                    ArithOp::Rem => a - b * (a / b).floor(),
                })
            }

            fn negate(self) -> Option<Self> {
                Some(-self)
            }

            fn absolute(self) -> Self {
                self.abs()
            }
        }
    };
}

impl_arith_signed!(i8);
impl_arith_signed!(i16);
impl_arith_signed!(i32);
impl_arith_signed!(i64);
impl_arith_unsigned!(u8);
impl_arith_unsigned!(u16);
impl_arith_unsigned!(u32);
impl_arith_unsigned!(u64);
impl_arith_float!(f32);
impl_arith_float!(f64);

/// Dispatch a generic function over the primitive type backing a numeric
/// datatype.
macro_rules! dispatch_numeric {
    ($datatype:expr, $func:ident, $($arg:expr),*) => {
        match $datatype {
            DataType::Int8 => $func::<i8>($($arg),*),
            DataType::Int16 => $func::<i16>($($arg),*),
            DataType::Int32 => $func::<i32>($($arg),*),
            DataType::Int64 => $func::<i64>($($arg),*),
            DataType::UInt8 => $func::<u8>($($arg),*),
            DataType::UInt16 => $func::<u16>($($arg),*),
            DataType::UInt32 => $func::<u32>($($arg),*),
            DataType::UInt64 => $func::<u64>($($arg),*),
            DataType::Float32 => $func::<f32>($($arg),*),
            DataType::Float64 => $func::<f64>($($arg),*),
            other => Err(type_err!("Expected a numeric type, got {other}")),
        }
    };
}

fn binary_native<T: ArithNative>(op: ArithOp, left: &Array, right: &Array) -> Result<Array> {
    let a = left.values::<T>()?;
    let b = right.values::<T>()?;

    let mut values = Vec::with_capacity(a.len());
    let mut validity = Vec::with_capacity(a.len());
    for idx in 0..a.len() {
        let out = if left.is_valid(idx) && right.is_valid(idx) {
            T::apply(op, a[idx], b[idx])
        } else {
            None
        };
        validity.push(out.is_some());
        values.push(out.unwrap_or_default());
    }

    Array::from_native(values).with_validity(validity.into_iter().collect::<Validity>())
}

fn unary_native<T: ArithNative>(array: &Array, f: fn(T) -> Option<T>) -> Result<Array> {
    let values = array.values::<T>()?;
    let mut out = Vec::with_capacity(values.len());
    let mut validity = Vec::with_capacity(values.len());
    for (idx, v) in values.iter().enumerate() {
        let v = if array.is_valid(idx) { f(*v) } else { None };
        validity.push(v.is_some());
        out.push(v.unwrap_or_default());
    }
    Array::from_native(out).with_validity(validity.into_iter().collect::<Validity>())
}

/// Type both sides of an arithmetic expression are cast to.
pub fn arith_output_type(op: ArithOp, left: &DataType, right: &DataType) -> Result<DataType> {
    let supertype = DataType::supertype(left, right)?;
    match supertype {
        DataType::Null => Ok(DataType::Null),
        _ if op == ArithOp::Div => {
            if supertype.is_numeric() || supertype.is_boolean() {
                Ok(DataType::Float64)
            } else {
                Err(type_err!("Cannot apply '{op}' to {left} and {right}"))
            }
        }
        DataType::Boolean => Ok(DataType::Int64),
        DataType::Utf8 if op == ArithOp::Add => Ok(DataType::Utf8),
        other if other.is_numeric() => Ok(other),
        _ => Err(type_err!("Cannot apply '{op}' to {left} and {right}")),
    }
}

/// Apply an arithmetic operator elementwise. Length one inputs are
/// broadcast.
pub fn arith(op: ArithOp, left: &Array, right: &Array) -> Result<Array> {
    let datatype = arith_output_type(op, left.datatype(), right.datatype())?;
    let arrays = broadcast_arrays(&[left, right])?;
    let len = arrays[0].len();

    match &datatype {
        DataType::Null => Ok(Array::new_null(&DataType::Null, len)),
        DataType::Utf8 => {
            let left = cast(&arrays[0], &DataType::Utf8, true)?;
            let right = cast(&arrays[1], &DataType::Utf8, true)?;
            let values: Vec<Option<String>> = (0..len)
                .map(|idx| match (left.get_value(idx).as_str(), right.get_value(idx).as_str()) {
                    (Some(a), Some(b)) => Some(format!("{a}{b}")),
                    _ => None,
                })
                .collect();
            Ok(values
                .iter()
                .map(|v| v.as_deref())
                .collect::<Vec<_>>()
                .into())
        }
        datatype => {
            let left = cast(&arrays[0], datatype, true)?;
            let right = cast(&arrays[1], datatype, true)?;
            dispatch_numeric!(datatype, binary_native, op, &left, &right)
        }
    }
}

pub fn negate(array: &Array) -> Result<Array> {
    if array.datatype().is_unsigned_integer() {
        return Err(type_err!("Cannot negate {}", array.datatype()));
    }
    fn neg<T: ArithNative>(array: &Array) -> Result<Array> {
        unary_native::<T>(array, T::negate)
    }
    dispatch_numeric!(array.datatype(), neg, array)
}

pub fn abs(array: &Array) -> Result<Array> {
    fn abs_native<T: ArithNative>(array: &Array) -> Result<Array> {
        unary_native::<T>(array, |v: T| Some(v.absolute()))
    }
    dispatch_numeric!(array.datatype(), abs_native, array)
}

/// Round to `decimals` places, halves away from zero. Integers are already
/// whole and come back unchanged.
pub fn round(array: &Array, decimals: u32) -> Result<Array> {
    let datatype = array.datatype();
    if datatype.is_integer() || *datatype == DataType::Null {
        return Ok(array.clone());
    }
    if !datatype.is_float() {
        return Err(type_err!("Cannot round {datatype}"));
    }

    let factor = 10_f64.powi(decimals as i32);
    let rounded: Vec<Option<f64>> = array
        .iter_values()
        .map(|v| v.as_f64().map(|v| (v * factor).round() / factor))
        .collect();
    cast(&Array::from(rounded), datatype, true)
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn add_propagates_null() {
        let a = Array::from(vec![Some(1_i64), None, Some(3)]);
        let b = Array::from(vec![10_i64]);
        let got = arith(ArithOp::Add, &a, &b).unwrap();
        assert_eq!(Array::from(vec![Some(11_i64), None, Some(13)]), got);
    }

    #[test]
    fn add_widens_to_supertype() {
        let a = Array::from(vec![1_i32]);
        let b = Array::from(vec![0.5_f64]);
        let got = arith(ArithOp::Add, &a, &b).unwrap();
        assert_eq!(Array::from(vec![1.5_f64]), got);
    }

    #[test]
    fn true_division_is_float() {
        let a = Array::from(vec![7_i64, 1]);
        let b = Array::from(vec![2_i64, 0]);
        let got = arith(ArithOp::Div, &a, &b).unwrap();
        assert_eq!(Array::from(vec![3.5, f64::INFINITY]), got);
    }

    #[test]
    fn floor_div_and_rem_follow_floor_semantics() {
        let a = Array::from(vec![7_i64, -7, 7, 1]);
        let b = Array::from(vec![2_i64, 2, -2, 0]);
        let div = arith(ArithOp::FloorDiv, &a, &b).unwrap();
        assert_eq!(Array::from(vec![Some(3_i64), Some(-4), Some(-4), None]), div);
        let rem = arith(ArithOp::Rem, &a, &b).unwrap();
        assert_eq!(Array::from(vec![Some(1_i64), Some(1), Some(-1), None]), rem);
    }

    #[test]
    fn integer_overflow_wraps() {
        let a = Array::from(vec![i8::MAX]);
        let b = Array::from(vec![1_i8]);
        let got = arith(ArithOp::Add, &a, &b).unwrap();
        assert_eq!(Array::from(vec![i8::MIN]), got);
    }

    #[test]
    fn string_arith_is_type_error() {
        let a = Array::from(vec!["a"]);
        let b = Array::from(vec![1_i64]);
        let err = arith(ArithOp::Mul, &a, &b).unwrap_err();
        assert_eq!(ErrorKind::Type, err.kind());
    }

    #[test]
    fn string_concat() {
        let a = Array::from(vec![Some("a"), None]);
        let b = Array::from(vec!["b"]);
        let got = arith(ArithOp::Add, &a, &b).unwrap();
        assert_eq!(Array::from(vec![Some("ab"), None]), got);
    }

    #[test]
    fn nan_in_arith() {
        let a = Array::from(vec![f64::NAN, 1.0]);
        let b = Array::from(vec![1.0_f64]);
        let got = arith(ArithOp::Add, &a, &b).unwrap();
        assert!(got.get_value(0).is_nan());
        assert_eq!(0, got.null_count());
    }

    #[test]
    fn round_to_decimals() {
        let arr = Array::from(vec![Some(0.8333), Some(2.5), None, Some(-0.125)]);
        assert_eq!(
            Array::from(vec![Some(0.83), Some(2.5), None, Some(-0.13)]),
            round(&arr, 2).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(1.0), Some(3.0), None, Some(-0.0)]),
            round(&arr, 0).unwrap()
        );

        let ints = Array::from(vec![1_i64, 2]);
        assert_eq!(ints, round(&ints, 2).unwrap());
        assert!(round(&Array::from(vec!["a"]), 2).is_err());
    }

    #[test]
    fn negate_and_abs() {
        let a = Array::from(vec![Some(-2_i32), None]);
        assert_eq!(Array::from(vec![Some(2_i32), None]), negate(&a).unwrap());
        assert_eq!(Array::from(vec![Some(2_i32), None]), abs(&a).unwrap());
        assert!(negate(&Array::from(vec![1_u8])).is_err());
    }
}
