//! Date and datetime kernels.
use std::fmt::Write;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use tabula_error::{DbError, MAX_CAST_ERROR_VALUES, Result, compute_err, type_err};

use crate::arrays::array::{Array, ArrayBuilder};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

/// Number of days between 0001-01-01 and 1970-01-01.
pub const EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

pub fn date_to_naive(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

pub fn naive_to_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

pub fn datetime_to_naive(micros: i64) -> Option<NaiveDateTime> {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let nanos = (micros.rem_euclid(MICROS_PER_SECOND) * 1000) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.naive_utc())
}

pub fn naive_to_datetime(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Component to extract from a date or datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// ISO weekday, Monday is 1.
    Weekday,
    /// Day of the year starting at 1.
    OrdinalDay,
}

impl DatePart {
    pub fn output_type(&self) -> DataType {
        match self {
            DatePart::Year => DataType::Int32,
            DatePart::OrdinalDay => DataType::Int16,
            _ => DataType::Int8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Hour => "hour",
            DatePart::Minute => "minute",
            DatePart::Second => "second",
            DatePart::Weekday => "weekday",
            DatePart::OrdinalDay => "ordinal_day",
        }
    }

    fn extract(&self, dt: NaiveDateTime) -> ScalarValue {
        match self {
            DatePart::Year => ScalarValue::Int32(dt.year()),
            DatePart::Month => ScalarValue::Int8(dt.month() as i8),
            DatePart::Day => ScalarValue::Int8(dt.day() as i8),
            DatePart::Hour => ScalarValue::Int8(dt.hour() as i8),
            DatePart::Minute => ScalarValue::Int8(dt.minute() as i8),
            DatePart::Second => ScalarValue::Int8(dt.second() as i8),
            DatePart::Weekday => ScalarValue::Int8(dt.weekday().number_from_monday() as i8),
            DatePart::OrdinalDay => ScalarValue::Int16(dt.ordinal() as i16),
        }
    }
}

fn value_to_naive(value: &ScalarValue) -> Option<NaiveDateTime> {
    match value {
        ScalarValue::Date(days) => date_to_naive(*days).and_then(|d| d.and_hms_opt(0, 0, 0)),
        ScalarValue::Datetime(micros) => datetime_to_naive(*micros),
        _ => None,
    }
}

fn check_temporal(array: &Array) -> Result<()> {
    if array.datatype().is_temporal() {
        Ok(())
    } else {
        Err(type_err!(
            "Expected a Date or Datetime, got {}",
            array.datatype()
        ))
    }
}

pub fn date_part(array: &Array, part: DatePart) -> Result<Array> {
    check_temporal(array)?;
    let values = array
        .iter_values()
        .map(|v| value_to_naive(&v).map(|dt| part.extract(dt)).unwrap_or(ScalarValue::Null));
    Array::try_from_scalars(&part.output_type(), values)
}

/// Format dates as strings.
pub fn strftime(array: &Array, format: &str) -> Result<Array> {
    check_temporal(array)?;
    let mut builder = ArrayBuilder::with_capacity(DataType::Utf8, array.len());
    for value in array.iter_values() {
        match value_to_naive(&value) {
            Some(dt) => {
                let mut buf = String::new();
                write!(buf, "{}", dt.format(format))
                    .map_err(|_| compute_err!("Invalid format string '{format}'"))?;
                builder.push(ScalarValue::Utf8(buf))?;
            }
            None => builder.push_null(),
        }
    }
    Ok(builder.finish())
}

/// Parse strings into a Date or Datetime using a chrono format string.
///
/// Unparseable values fail the kernel when `strict`, otherwise they become
/// null.
pub fn strptime(array: &Array, datatype: &DataType, format: &str, strict: bool) -> Result<Array> {
    if !array.datatype().is_string() {
        return Err(type_err!("strptime expects strings, got {}", array.datatype()));
    }

    let parse = |s: &str| -> Option<ScalarValue> {
        match datatype {
            DataType::Date => NaiveDate::parse_from_str(s, format)
                .ok()
                .map(|d| ScalarValue::Date(naive_to_date(d))),
            _ => NaiveDateTime::parse_from_str(s, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, format)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(|dt| ScalarValue::Datetime(naive_to_datetime(dt))),
        }
    };

    if !datatype.is_temporal() {
        return Err(type_err!("strptime can only produce Date or Datetime, got {datatype}"));
    }

    let mut failed = Vec::new();
    let mut builder = ArrayBuilder::with_capacity(datatype.clone(), array.len());
    for value in array.iter_values() {
        let Some(s) = value.as_str() else {
            builder.push_null();
            continue;
        };
        match parse(s) {
            Some(parsed) => builder.push(parsed)?,
            None => {
                if failed.len() < MAX_CAST_ERROR_VALUES {
                    failed.push(s.to_string());
                }
                builder.push_null();
            }
        }
    }

    if strict && !failed.is_empty() {
        return Err(DbError::cast(
            format!("Cannot parse strings as {datatype} using '{format}'"),
            failed,
        ));
    }

    Ok(builder.finish())
}

/// Build a column of dates from `start` to `end` inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate, step_days: i64) -> Result<Array> {
    if step_days <= 0 {
        return Err(compute_err!("Date range step must be positive, got {step_days}"));
    }
    let start = naive_to_date(start) as i64;
    let end = naive_to_date(end) as i64;

    let mut days = Vec::new();
    let mut curr = start;
    while curr <= end {
        days.push(curr as i32);
        curr += step_days;
    }

    Array::from(days).reinterpret(DataType::Date)
}

/// Build a column of datetimes from `start` to `end` inclusive.
pub fn datetime_range(start: NaiveDateTime, end: NaiveDateTime, step: Duration) -> Result<Array> {
    let step = step
        .num_microseconds()
        .filter(|step| *step > 0)
        .ok_or_else(|| compute_err!("Datetime range step must be positive"))?;
    let start = naive_to_datetime(start);
    let end = naive_to_datetime(end);

    let mut values = Vec::new();
    let mut curr = start;
    while curr <= end {
        values.push(curr);
        curr += step;
    }

    Array::from(values).reinterpret(DataType::Datetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn epoch_roundtrip() {
        assert_eq!(0, naive_to_date(date(1970, 1, 1)));
        assert_eq!(Some(date(2022, 3, 1)), date_to_naive(naive_to_date(date(2022, 3, 1))));
        let dt = date(1969, 12, 31).and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(Some(dt), datetime_to_naive(naive_to_datetime(dt)));
    }

    #[test]
    fn date_range_inclusive() {
        let arr = date_range(date(2022, 1, 1), date(2022, 1, 5), 2).unwrap();
        assert_eq!(DataType::Date, *arr.datatype());
        let expected: Vec<ScalarValue> = [1, 3, 5]
            .into_iter()
            .map(|d| ScalarValue::from(date(2022, 1, d)))
            .collect();
        assert_eq!(expected, arr.iter_values().collect::<Vec<_>>());
    }

    #[test]
    fn extract_parts() {
        let arr = date_range(date(2022, 12, 30), date(2023, 1, 2), 1).unwrap();
        let years = date_part(&arr, DatePart::Year).unwrap();
        assert_eq!(Array::from(vec![2022, 2022, 2023, 2023]), years);
        let weekdays = date_part(&arr, DatePart::Weekday).unwrap();
        assert_eq!(Array::from(vec![5_i8, 6, 7, 1]), weekdays);
    }

    #[test]
    fn strftime_and_strptime() {
        let arr = date_range(date(2022, 1, 1), date(2022, 1, 2), 1).unwrap();
        let formatted = strftime(&arr, "%d/%m/%Y").unwrap();
        assert_eq!(Array::from(vec!["01/01/2022", "02/01/2022"]), formatted);

        let parsed = strptime(&formatted, &DataType::Date, "%d/%m/%Y", true).unwrap();
        assert_eq!(arr, parsed);
    }

    #[test]
    fn strptime_strict_failure() {
        let arr = Array::from(vec!["2022-01-01", "nope"]);
        let err = strptime(&arr, &DataType::Date, "%Y-%m-%d", true).unwrap_err();
        assert_eq!(vec!["nope".to_string()], err.cast_values());

        let lenient = strptime(&arr, &DataType::Date, "%Y-%m-%d", false).unwrap();
        assert_eq!(1, lenient.null_count());
    }
}
