//! String kernels. Categorical inputs are treated as their string values.
use regex::Regex;
use tabula_error::{Result, compute_err, type_err};

use super::broadcast_arrays;
use super::cast::cast;
use crate::arrays::array::{Array, ArrayBuilder};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

fn string_input(array: &Array) -> Result<Array> {
    match array.datatype() {
        DataType::Utf8 => Ok(array.clone()),
        DataType::Categorical | DataType::Null => cast(array, &DataType::Utf8, true),
        other => Err(type_err!("Expected a string column, got {other}")),
    }
}

fn compile(pattern: &str, literal: bool) -> Result<Regex> {
    let pattern = if literal {
        regex::escape(pattern)
    } else {
        pattern.to_string()
    };
    Regex::new(&pattern).map_err(|e| compute_err!("Invalid regex '{pattern}': {e}"))
}

/// Apply a function to every non-null string.
fn map_strings<F>(array: &Array, output: DataType, f: F) -> Result<Array>
where
    F: Fn(&str) -> ScalarValue,
{
    let array = string_input(array)?;
    let mut builder = ArrayBuilder::with_capacity(output, array.len());
    for value in array.iter_values() {
        match value.as_str() {
            Some(s) => builder.push(f(s))?,
            None => builder.push_null(),
        }
    }
    Ok(builder.finish())
}

fn utf8_list() -> DataType {
    DataType::list(DataType::Utf8)
}

fn string_list<'a>(parts: impl Iterator<Item = &'a str>) -> ScalarValue {
    ScalarValue::List(parts.map(str::to_string).collect::<Vec<_>>().into())
}

/// Length in bytes.
pub fn lengths(array: &Array) -> Result<Array> {
    map_strings(array, DataType::UInt32, |s| ScalarValue::UInt32(s.len() as u32))
}

/// Length in unicode scalar values.
pub fn n_chars(array: &Array) -> Result<Array> {
    map_strings(array, DataType::UInt32, |s| {
        ScalarValue::UInt32(s.chars().count() as u32)
    })
}

pub fn contains(array: &Array, pattern: &str, literal: bool) -> Result<Array> {
    let re = compile(pattern, literal)?;
    map_strings(array, DataType::Boolean, |s| ScalarValue::Boolean(re.is_match(s)))
}

pub fn starts_with(array: &Array, prefix: &str) -> Result<Array> {
    map_strings(array, DataType::Boolean, |s| {
        ScalarValue::Boolean(s.starts_with(prefix))
    })
}

pub fn ends_with(array: &Array, suffix: &str) -> Result<Array> {
    map_strings(array, DataType::Boolean, |s| {
        ScalarValue::Boolean(s.ends_with(suffix))
    })
}

/// Extract a capture group of the first match. No match gives null.
pub fn extract(array: &Array, pattern: &str, group: usize) -> Result<Array> {
    let re = compile(pattern, false)?;
    if group >= re.captures_len() {
        return Err(compute_err!(
            "Regex '{pattern}' has no capture group {group}"
        ));
    }
    map_strings(array, DataType::Utf8, |s| {
        re.captures(s)
            .and_then(|caps| caps.get(group))
            .map(|m| ScalarValue::Utf8(m.as_str().to_string()))
            .unwrap_or(ScalarValue::Null)
    })
}

/// All non-overlapping matches as a list per row.
pub fn extract_all(array: &Array, pattern: &str) -> Result<Array> {
    let re = compile(pattern, false)?;
    map_strings(array, utf8_list(), |s| {
        string_list(re.find_iter(s).map(|m| m.as_str()))
    })
}

/// Replace the first match (or all matches) of a pattern.
pub fn replace(array: &Array, pattern: &str, value: &str, literal: bool, all: bool) -> Result<Array> {
    let re = compile(pattern, literal)?;
    // Treat the replacement as literal text when the pattern is literal.
    let value = if literal {
        value.replace('$', "$$")
    } else {
        value.to_string()
    };
    map_strings(array, DataType::Utf8, |s| {
        let out = if all {
            re.replace_all(s, value.as_str())
        } else {
            re.replace(s, value.as_str())
        };
        ScalarValue::Utf8(out.into_owned())
    })
}

pub fn split(array: &Array, by: &str) -> Result<Array> {
    map_strings(array, utf8_list(), |s| string_list(s.split(by)))
}

pub fn to_uppercase(array: &Array) -> Result<Array> {
    map_strings(array, DataType::Utf8, |s| ScalarValue::Utf8(s.to_uppercase()))
}

pub fn to_lowercase(array: &Array) -> Result<Array> {
    map_strings(array, DataType::Utf8, |s| ScalarValue::Utf8(s.to_lowercase()))
}

/// Remove leading and trailing whitespace.
pub fn strip(array: &Array) -> Result<Array> {
    map_strings(array, DataType::Utf8, |s| ScalarValue::Utf8(s.trim().to_string()))
}

/// Horizontally concatenate the string forms of multiple columns.
///
/// A null in any input makes the output row null.
pub fn concat_str(arrays: &[Array], separator: &str) -> Result<Array> {
    if arrays.is_empty() {
        return Err(compute_err!("concat_str needs at least one input"));
    }
    let refs: Vec<&Array> = arrays.iter().collect();
    let arrays = broadcast_arrays(&refs)?;
    let arrays = arrays
        .iter()
        .map(|arr| cast(arr, &DataType::Utf8, true))
        .collect::<Result<Vec<_>>>()?;

    let len = arrays[0].len();
    let mut builder = ArrayBuilder::with_capacity(DataType::Utf8, len);
    for row in 0..len {
        let parts: Option<Vec<ScalarValue>> = arrays
            .iter()
            .map(|arr| {
                let v = arr.get_value(row);
                (!v.is_null()).then_some(v)
            })
            .collect();
        match parts {
            Some(parts) => {
                let joined = parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(separator);
                builder.push(ScalarValue::Utf8(joined))?;
            }
            None => builder.push_null(),
        }
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn lengths_bytes_and_chars() {
        let arr = Array::from(vec![Some("héllo"), None]);
        assert_eq!(Array::from(vec![Some(6_u32), None]), lengths(&arr).unwrap());
        assert_eq!(Array::from(vec![Some(5_u32), None]), n_chars(&arr).unwrap());
    }

    #[test]
    fn contains_regex_and_literal() {
        let arr = Array::from(vec!["a.c", "abc"]);
        assert_eq!(
            Array::from(vec![true, true]),
            contains(&arr, "a.c", false).unwrap()
        );
        assert_eq!(
            Array::from(vec![true, false]),
            contains(&arr, "a.c", true).unwrap()
        );
    }

    #[test]
    fn extract_group() {
        let arr = Array::from(vec!["id=12", "none"]);
        let got = extract(&arr, r"id=(\d+)", 1).unwrap();
        assert_eq!(Array::from(vec![Some("12"), None]), got);
        assert!(extract(&arr, r"id=(\d+)", 2).is_err());
    }

    #[test]
    fn extract_all_to_list() {
        let arr = Array::from(vec!["1 a 22"]);
        let got = extract_all(&arr, r"\d+").unwrap();
        assert_eq!(
            ScalarValue::List(Array::from(vec!["1", "22"])),
            got.get_value(0)
        );
    }

    #[test]
    fn replace_first_and_all() {
        let arr = Array::from(vec!["aXbXc"]);
        assert_eq!(
            Array::from(vec!["a-bXc"]),
            replace(&arr, "X", "-", true, false).unwrap()
        );
        assert_eq!(
            Array::from(vec!["a$b$c"]),
            replace(&arr, "X", "$", true, true).unwrap()
        );
    }

    #[test]
    fn invalid_regex() {
        let arr = Array::from(vec!["a"]);
        let err = contains(&arr, "(", false).unwrap_err();
        assert_eq!(ErrorKind::Compute, err.kind());
    }

    #[test]
    fn concat_with_null() {
        let a = Array::from(vec![Some("a"), None]);
        let b = Array::from(vec![1_i64, 2]);
        let got = concat_str(&[a, b], "-").unwrap();
        assert_eq!(Array::from(vec![Some("a-1"), None]), got);
    }

    #[test]
    fn non_string_rejected() {
        let arr = Array::from(vec![1_i32]);
        assert_eq!(ErrorKind::Type, to_uppercase(&arr).unwrap_err().kind());
    }
}
