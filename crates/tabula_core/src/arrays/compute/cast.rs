//! Casting between types.
//!
//! Strict casts fail the whole kernel if any non-null value cannot be
//! converted. Non-strict casts turn those values into nulls.
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use num_traits::NumCast;
use tabula_error::{DbError, MAX_CAST_ERROR_VALUES, Result};

use super::temporal::{MICROS_PER_DAY, naive_to_date, naive_to_datetime};
use crate::arrays::array::{Array, ArrayBuilder, ArrayData};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

/// Logic for parsing a string into some type.
pub trait Parser {
    /// The type we'll be producing.
    type Type;

    /// Parse a string into `Type`, returning None if the parse cannot be done.
    fn parse(&mut self, s: &str) -> Option<Self::Type>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolParser;

impl Parser for BoolParser {
    type Type = bool;
    fn parse(&mut self, s: &str) -> Option<Self::Type> {
        match s {
            "t" | "true" | "TRUE" | "True" | "T" => Some(true),
            "f" | "false" | "FALSE" | "False" | "F" => Some(false),
            _ => None,
        }
    }
}

/// Parser that uses the stdlib `FromStr` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FromStrParser<T: FromStr> {
    _type: PhantomData<T>,
}

impl<T: FromStr> FromStrParser<T> {
    pub const fn new() -> Self {
        FromStrParser { _type: PhantomData }
    }
}

impl<T: FromStr> Parser for FromStrParser<T> {
    type Type = T;
    fn parse(&mut self, s: &str) -> Option<Self::Type> {
        T::from_str(s.trim()).ok()
    }
}

/// Parse a string date into a number of days since epoch.
///
/// Example formats:
///
/// '1992-10-11'
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateParser;

impl Parser for DateParser {
    type Type = i32;
    fn parse(&mut self, s: &str) -> Option<Self::Type> {
        let date = NaiveDate::from_str(s.trim()).ok()?;
        Some(naive_to_date(date))
    }
}

/// Parse a string datetime into microseconds since epoch.
///
/// Example formats:
///
/// '1992-10-11 08:30:00'
/// '1992-10-11T08:30:00.250'
/// '1992-10-11'
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatetimeParser;

impl Parser for DatetimeParser {
    type Type = i64;
    fn parse(&mut self, s: &str) -> Option<Self::Type> {
        const FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
        let s = s.trim();
        let dt = FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .or_else(|| {
                NaiveDate::from_str(s)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        Some(naive_to_datetime(dt))
    }
}

/// Cast an array to a different type.
pub fn cast(array: &Array, to: &DataType, strict: bool) -> Result<Array> {
    if array.datatype() == to {
        return Ok(array.clone());
    }

    match (array.datatype(), to) {
        (DataType::Int32, DataType::Date)
        | (DataType::Date, DataType::Int32)
        | (DataType::Int64, DataType::Datetime)
        | (DataType::Datetime, DataType::Int64) => array.clone().reinterpret(to.clone()),
        (DataType::Null, _) => Ok(Array::new_null(to, array.len())),
        (DataType::List(_) | DataType::Array(_, _), DataType::List(inner)) => {
            let (offsets, values) = array.list_parts()?;
            let values = cast(values, inner, strict)?;
            Array::try_new(
                to.clone(),
                array.validity().clone(),
                ArrayData::List {
                    offsets: offsets.to_vec(),
                    values: Box::new(values),
                },
            )
        }
        (DataType::List(_) | DataType::Array(_, _), DataType::Array(inner, width)) => {
            cast_to_fixed_size(array, inner, *width, strict)
        }
        _ => cast_elementwise(array, to, strict),
    }
}

fn cast_to_fixed_size(array: &Array, inner: &DataType, width: usize, strict: bool) -> Result<Array> {
    let mut failed = CastFailures::default();
    let mut builder = ArrayBuilder::with_capacity(DataType::Array(Box::new(inner.clone()), width), array.len());
    for value in array.iter_values() {
        match value {
            ScalarValue::List(row) if row.len() == width => {
                builder.push(ScalarValue::List(cast(&row, inner, strict)?))?
            }
            ScalarValue::Null => builder.push_null(),
            other => {
                failed.push(&other);
                builder.push_null();
            }
        }
    }
    failed.check(strict, array.datatype(), &DataType::array(inner.clone(), width))?;
    Ok(builder.finish())
}

fn cast_elementwise(array: &Array, to: &DataType, strict: bool) -> Result<Array> {
    let mut failed = CastFailures::default();
    let mut builder = ArrayBuilder::with_capacity(to.clone(), array.len());
    for value in array.iter_values() {
        if value.is_null() {
            builder.push_null();
            continue;
        }
        match cast_scalar(&value, to) {
            Some(casted) => builder.push(casted)?,
            None => {
                failed.push(&value);
                builder.push_null();
            }
        }
    }
    failed.check(strict, array.datatype(), to)?;
    Ok(builder.finish())
}

#[derive(Debug, Default)]
struct CastFailures {
    values: Vec<String>,
    count: usize,
}

impl CastFailures {
    fn push(&mut self, value: &ScalarValue) {
        if self.values.len() < MAX_CAST_ERROR_VALUES {
            self.values.push(value.to_string());
        }
        self.count += 1;
    }

    fn check(self, strict: bool, from: &DataType, to: &DataType) -> Result<()> {
        if strict && self.count > 0 {
            return Err(DbError::cast(
                format!("Cannot cast {} values from {from} to {to}", self.count),
                self.values,
            ));
        }
        Ok(())
    }
}

fn to_native<T>(value: &ScalarValue) -> Option<T>
where
    T: NumCast + FromStr,
{
    match value {
        ScalarValue::Boolean(v) => <T as NumCast>::from(*v as u8),
        ScalarValue::Int8(v) => <T as NumCast>::from(*v),
        ScalarValue::Int16(v) => <T as NumCast>::from(*v),
        ScalarValue::Int32(v) => <T as NumCast>::from(*v),
        ScalarValue::Int64(v) => <T as NumCast>::from(*v),
        ScalarValue::UInt8(v) => <T as NumCast>::from(*v),
        ScalarValue::UInt16(v) => <T as NumCast>::from(*v),
        ScalarValue::UInt32(v) => <T as NumCast>::from(*v),
        ScalarValue::UInt64(v) => <T as NumCast>::from(*v),
        ScalarValue::Float32(v) => <T as NumCast>::from(*v),
        ScalarValue::Float64(v) => <T as NumCast>::from(*v),
        ScalarValue::Date(v) => <T as NumCast>::from(*v),
        ScalarValue::Datetime(v) => <T as NumCast>::from(*v),
        ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => FromStrParser::<T>::new().parse(s),
        _ => None,
    }
}

/// Cast a single non-null value, returning None if the value cannot be
/// represented in the target type.
pub fn cast_scalar(value: &ScalarValue, to: &DataType) -> Option<ScalarValue> {
    if value.is_null() {
        return Some(ScalarValue::Null);
    }

    Some(match to {
        DataType::Null => return None,
        DataType::Boolean => match value {
            ScalarValue::Boolean(v) => ScalarValue::Boolean(*v),
            ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => {
                ScalarValue::Boolean(BoolParser.parse(s.trim())?)
            }
            other => ScalarValue::Boolean(other.as_f64()? != 0.0),
        },
        DataType::Int8 => ScalarValue::Int8(to_native(value)?),
        DataType::Int16 => ScalarValue::Int16(to_native(value)?),
        DataType::Int32 => ScalarValue::Int32(to_native(value)?),
        DataType::Int64 => ScalarValue::Int64(to_native(value)?),
        DataType::UInt8 => ScalarValue::UInt8(to_native(value)?),
        DataType::UInt16 => ScalarValue::UInt16(to_native(value)?),
        DataType::UInt32 => ScalarValue::UInt32(to_native(value)?),
        DataType::UInt64 => ScalarValue::UInt64(to_native(value)?),
        DataType::Float32 => ScalarValue::Float32(to_native(value)?),
        DataType::Float64 => ScalarValue::Float64(to_native(value)?),
        DataType::Utf8 => ScalarValue::Utf8(value.to_string()),
        DataType::Categorical => ScalarValue::Categorical(value.to_string()),
        DataType::Date => match value {
            ScalarValue::Datetime(v) => ScalarValue::Date(i32::try_from(v.div_euclid(MICROS_PER_DAY)).ok()?),
            ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => ScalarValue::Date(DateParser.parse(s)?),
            ScalarValue::Float32(_) | ScalarValue::Float64(_) => return None,
            other => ScalarValue::Date(to_native(other)?),
        },
        DataType::Datetime => match value {
            ScalarValue::Date(v) => ScalarValue::Datetime((*v as i64).checked_mul(MICROS_PER_DAY)?),
            ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => {
                ScalarValue::Datetime(DatetimeParser.parse(s)?)
            }
            ScalarValue::Float32(_) | ScalarValue::Float64(_) => return None,
            other => ScalarValue::Datetime(to_native(other)?),
        },
        DataType::List(_) | DataType::Array(_, _) => return None,
    })
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn strict_cast_fails_with_values() {
        let arr = Array::from(vec![Some("1.5"), Some("not_a_number"), None]);
        let err = cast(&arr, &DataType::Float64, true).unwrap_err();
        assert_eq!(ErrorKind::Cast, err.kind());
        assert_eq!(vec!["not_a_number".to_string()], err.cast_values());
    }

    #[test]
    fn non_strict_cast_nulls_failures() {
        let arr = Array::from(vec![Some("1.5"), Some("not_a_number"), None]);
        let got = cast(&arr, &DataType::Float64, false).unwrap();
        assert_eq!(Array::from(vec![Some(1.5), None, None]), got);
    }

    #[test]
    fn float_to_int_truncates() {
        let arr = Array::from(vec![1.9_f64, -2.5, f64::NAN]);
        let got = cast(&arr, &DataType::Int32, false).unwrap();
        assert_eq!(Array::from(vec![Some(1), Some(-2), None]), got);
    }

    #[test]
    fn int_out_of_range() {
        let arr = Array::from(vec![1_i64, 300]);
        assert!(cast(&arr, &DataType::UInt8, true).is_err());
        let got = cast(&arr, &DataType::UInt8, false).unwrap();
        assert_eq!(Array::from(vec![Some(1_u8), None]), got);
    }

    #[test]
    fn string_to_date() {
        let arr = Array::from(vec!["1970-01-03", "2000-02-30"]);
        let got = cast(&arr, &DataType::Date, false).unwrap();
        assert_eq!(ScalarValue::Date(2), got.get_value(0));
        assert!(got.get_value(1).is_null());
    }

    #[test]
    fn list_inner_cast() {
        let arr = Array::try_new_list(
            DataType::list(DataType::Utf8),
            vec![Some(Array::from(vec!["1", "x"])), None],
        )
        .unwrap();
        let got = cast(&arr, &DataType::list(DataType::Int64), false).unwrap();
        assert_eq!(
            ScalarValue::List(Array::from(vec![Some(1_i64), None])),
            got.get_value(0)
        );
        assert!(got.get_value(1).is_null());
    }

    #[test]
    fn date_to_datetime() {
        let arr = Array::from(vec![1_i32]).reinterpret(DataType::Date).unwrap();
        let got = cast(&arr, &DataType::Datetime, true).unwrap();
        assert_eq!(ScalarValue::Datetime(MICROS_PER_DAY), got.get_value(0));
    }
}
