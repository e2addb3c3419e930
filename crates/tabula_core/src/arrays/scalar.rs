use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use tabula_error::{DbError, Result};

use super::array::Array;
use super::compute::temporal::{
    date_to_naive,
    datetime_to_naive,
    naive_to_date,
    naive_to_datetime,
};
use super::datatype::DataType;

/// A single owned value.
///
/// Equality and hashing are total: NaN equals NaN, and two nulls are equal.
/// This is what grouping and joining need, comparisons with IEEE semantics
/// live in the compute kernels.
#[derive(Debug, Clone)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
    Date(i32),
    Datetime(i64),
    Categorical(String),
    /// One row of a list or fixed size array column.
    List(Array),
}

impl ScalarValue {
    pub fn datatype(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int8(_) => DataType::Int8,
            ScalarValue::Int16(_) => DataType::Int16,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::UInt8(_) => DataType::UInt8,
            ScalarValue::UInt16(_) => DataType::UInt16,
            ScalarValue::UInt32(_) => DataType::UInt32,
            ScalarValue::UInt64(_) => DataType::UInt64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Date(_) => DataType::Date,
            ScalarValue::Datetime(_) => DataType::Datetime,
            ScalarValue::Categorical(_) => DataType::Categorical,
            ScalarValue::List(arr) => DataType::list(arr.datatype().clone()),
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn is_nan(&self) -> bool {
        match self {
            ScalarValue::Float32(v) => v.is_nan(),
            ScalarValue::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            ScalarValue::Boolean(v) => *v as u8 as f64,
            ScalarValue::Int8(v) => *v as f64,
            ScalarValue::Int16(v) => *v as f64,
            ScalarValue::Int32(v) => *v as f64,
            ScalarValue::Int64(v) => *v as f64,
            ScalarValue::UInt8(v) => *v as f64,
            ScalarValue::UInt16(v) => *v as f64,
            ScalarValue::UInt32(v) => *v as f64,
            ScalarValue::UInt64(v) => *v as f64,
            ScalarValue::Float32(v) => *v as f64,
            ScalarValue::Float64(v) => *v,
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            ScalarValue::Boolean(v) => *v as i64,
            ScalarValue::Int8(v) => *v as i64,
            ScalarValue::Int16(v) => *v as i64,
            ScalarValue::Int32(v) => *v as i64,
            ScalarValue::Int64(v) => *v,
            ScalarValue::UInt8(v) => *v as i64,
            ScalarValue::UInt16(v) => *v as i64,
            ScalarValue::UInt32(v) => *v as i64,
            ScalarValue::UInt64(v) => i64::try_from(*v).ok()?,
            ScalarValue::Date(v) => *v as i64,
            ScalarValue::Datetime(v) => *v,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn try_as_bool(&self) -> Result<bool> {
        self.as_bool()
            .ok_or_else(|| DbError::type_err(format!("Expected a boolean, got {self}")))
    }

    pub fn try_as_usize(&self) -> Result<usize> {
        self.as_i64()
            .filter(|_| self.datatype().is_integer())
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| DbError::type_err(format!("Expected a non-negative integer, got {self}")))
    }

    /// Total ordering used for sorting and ordering group keys.
    ///
    /// Nulls sort before everything, NaN sorts after every other float.
    pub fn total_cmp(&self, other: &ScalarValue) -> Ordering {
        fn float_cmp(a: f64, b: f64) -> Ordering {
            match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            }
        }

        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => Ordering::Equal,
            (ScalarValue::Null, _) => Ordering::Less,
            (_, ScalarValue::Null) => Ordering::Greater,
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
            (ScalarValue::Int8(a), ScalarValue::Int8(b)) => a.cmp(b),
            (ScalarValue::Int16(a), ScalarValue::Int16(b)) => a.cmp(b),
            (ScalarValue::Int32(a), ScalarValue::Int32(b)) => a.cmp(b),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => a.cmp(b),
            (ScalarValue::UInt8(a), ScalarValue::UInt8(b)) => a.cmp(b),
            (ScalarValue::UInt16(a), ScalarValue::UInt16(b)) => a.cmp(b),
            (ScalarValue::UInt32(a), ScalarValue::UInt32(b)) => a.cmp(b),
            (ScalarValue::UInt64(a), ScalarValue::UInt64(b)) => a.cmp(b),
            (ScalarValue::Float32(a), ScalarValue::Float32(b)) => float_cmp(*a as f64, *b as f64),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => float_cmp(*a, *b),
            (ScalarValue::Date(a), ScalarValue::Date(b)) => a.cmp(b),
            (ScalarValue::Datetime(a), ScalarValue::Datetime(b)) => a.cmp(b),
            (
                ScalarValue::Utf8(a) | ScalarValue::Categorical(a),
                ScalarValue::Utf8(b) | ScalarValue::Categorical(b),
            ) => a.cmp(b),
            (ScalarValue::List(a), ScalarValue::List(b)) => {
                for idx in 0..a.len().min(b.len()) {
                    let ord = a.get_value(idx).total_cmp(&b.get_value(idx));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => float_cmp(a, b),
                _ => a.discriminant().cmp(&b.discriminant()),
            },
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Int8(_) => 2,
            ScalarValue::Int16(_) => 3,
            ScalarValue::Int32(_) => 4,
            ScalarValue::Int64(_) => 5,
            ScalarValue::UInt8(_) => 6,
            ScalarValue::UInt16(_) => 7,
            ScalarValue::UInt32(_) => 8,
            ScalarValue::UInt64(_) => 9,
            ScalarValue::Float32(_) => 10,
            ScalarValue::Float64(_) => 11,
            ScalarValue::Utf8(_) => 12,
            ScalarValue::Date(_) => 13,
            ScalarValue::Datetime(_) => 14,
            ScalarValue::Categorical(_) => 15,
            ScalarValue::List(_) => 16,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScalarValue::Float32(a), ScalarValue::Float32(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (ScalarValue::List(a), ScalarValue::List(b)) => a == b,
            (a, b) => a.discriminant() == b.discriminant() && a.total_cmp(b) == Ordering::Equal,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            ScalarValue::Null => (),
            ScalarValue::Boolean(v) => v.hash(state),
            ScalarValue::Int8(v) => v.hash(state),
            ScalarValue::Int16(v) => v.hash(state),
            ScalarValue::Int32(v) => v.hash(state),
            ScalarValue::Int64(v) => v.hash(state),
            ScalarValue::UInt8(v) => v.hash(state),
            ScalarValue::UInt16(v) => v.hash(state),
            ScalarValue::UInt32(v) => v.hash(state),
            ScalarValue::UInt64(v) => v.hash(state),
            ScalarValue::Float32(v) => canonical_f64_bits(*v as f64).hash(state),
            ScalarValue::Float64(v) => canonical_f64_bits(*v).hash(state),
            ScalarValue::Utf8(v) | ScalarValue::Categorical(v) => v.hash(state),
            ScalarValue::Date(v) => v.hash(state),
            ScalarValue::Datetime(v) => v.hash(state),
            ScalarValue::List(arr) => {
                arr.len().hash(state);
                for value in arr.iter_values() {
                    value.hash(state);
                }
            }
        }
    }
}

/// Bits for a float where all NaNs hash the same and -0.0 hashes like 0.0.
fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v:?}"),
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Utf8(v) | Self::Categorical(v) => write!(f, "{v}"),
            Self::Date(v) => match date_to_naive(*v) {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => write!(f, "{v}"),
            },
            Self::Datetime(v) => match datetime_to_naive(*v) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
                None => write!(f, "{v}"),
            },
            Self::List(arr) => {
                write!(f, "[")?;
                for (idx, value) in arr.iter_values().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! impl_from_primitive {
    ($prim:ty, $variant:ident) => {
        impl From<$prim> for ScalarValue {
            fn from(value: $prim) -> Self {
                ScalarValue::$variant(value)
            }
        }
    };
}

impl_from_primitive!(bool, Boolean);
impl_from_primitive!(i8, Int8);
impl_from_primitive!(i16, Int16);
impl_from_primitive!(i32, Int32);
impl_from_primitive!(i64, Int64);
impl_from_primitive!(u8, UInt8);
impl_from_primitive!(u16, UInt16);
impl_from_primitive!(u32, UInt32);
impl_from_primitive!(u64, UInt64);
impl_from_primitive!(f32, Float32);
impl_from_primitive!(f64, Float64);
impl_from_primitive!(String, Utf8);
impl_from_primitive!(Array, List);

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<NaiveDate> for ScalarValue {
    fn from(value: NaiveDate) -> Self {
        ScalarValue::Date(naive_to_date(value))
    }
}

impl From<NaiveDateTime> for ScalarValue {
    fn from(value: NaiveDateTime) -> Self {
        ScalarValue::Datetime(naive_to_datetime(value))
    }
}

impl<T> From<Option<T>> for ScalarValue
where
    T: Into<ScalarValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}
