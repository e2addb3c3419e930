//! Kernels over List and fixed size Array columns.
use tabula_error::{Result, type_err};

use super::aggregate::{AggKind, aggregate};
use super::broadcast_arrays;
use super::cast::cast;
use crate::arrays::array::{Array, ArrayBuilder};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

fn inner_type(array: &Array) -> Result<&DataType> {
    array
        .datatype()
        .inner()
        .ok_or_else(|| type_err!("Expected a List or Array column, got {}", array.datatype()))
}

/// Split a list column into one array per row, `None` for null rows.
pub fn list_rows(array: &Array) -> Result<Vec<Option<Array>>> {
    let (offsets, values) = array.list_parts()?;
    Ok((0..array.len())
        .map(|row| {
            array
                .is_valid(row)
                .then(|| values.slice(offsets[row], offsets[row + 1] - offsets[row]))
        })
        .collect())
}

/// Apply a function to each non-null row, producing a new list column.
fn map_rows<F>(array: &Array, f: F) -> Result<Array>
where
    F: Fn(&Array) -> Array,
{
    let inner = inner_type(array)?.clone();
    let rows = list_rows(array)?
        .into_iter()
        .map(|row| row.map(|row| f(&row)))
        .collect();
    Array::try_new_list(DataType::list(inner), rows)
}

/// Reduce each non-null row to a scalar.
fn reduce_rows<F>(array: &Array, output: DataType, f: F) -> Result<Array>
where
    F: Fn(&Array) -> Result<ScalarValue>,
{
    let rows = list_rows(array)?;
    let mut builder = ArrayBuilder::with_capacity(output, rows.len());
    for row in rows {
        match row {
            Some(row) => builder.push(f(&row)?)?,
            None => builder.push_null(),
        }
    }
    Ok(builder.finish())
}

/// Resolve a possibly negative index against a length.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let index = index as usize;
        (index < len).then_some(index)
    } else {
        len.checked_sub(index.unsigned_abs() as usize)
    }
}

pub fn lengths(array: &Array) -> Result<Array> {
    reduce_rows(array, DataType::UInt32, |row| {
        Ok(ScalarValue::UInt32(row.len() as u32))
    })
}

/// Get the value at an index in each row. Negative indices count from the
/// end, out of bounds gives null.
pub fn get(array: &Array, index: i64) -> Result<Array> {
    let inner = inner_type(array)?.clone();
    reduce_rows(array, inner, |row| {
        Ok(resolve_index(index, row.len())
            .map(|idx| row.get_value(idx))
            .unwrap_or(ScalarValue::Null))
    })
}

pub fn head(array: &Array, n: usize) -> Result<Array> {
    map_rows(array, |row| row.slice(0, n))
}

pub fn tail(array: &Array, n: usize) -> Result<Array> {
    map_rows(array, |row| row.slice(row.len().saturating_sub(n), n))
}

/// Slice each row. A negative offset counts from the end of the row.
pub fn slice(array: &Array, offset: i64, len: usize) -> Result<Array> {
    map_rows(array, |row| {
        let start = if offset >= 0 {
            offset as usize
        } else {
            row.len().saturating_sub(offset.unsigned_abs() as usize)
        };
        row.slice(start, len)
    })
}

/// Run an aggregate over each row.
pub fn aggregate_rows(array: &Array, kind: AggKind) -> Result<Array> {
    let output = kind.output_type(inner_type(array)?)?;
    reduce_rows(array, output, |row| aggregate(kind, row))
}

/// Join the strings of each row with a separator. Null elements are
/// skipped.
pub fn join(array: &Array, separator: &str) -> Result<Array> {
    let inner = inner_type(array)?;
    if !inner.is_string() {
        return Err(type_err!("Can only join lists of strings, got {}", array.datatype()));
    }
    reduce_rows(array, DataType::Utf8, |row| {
        let parts: Vec<ScalarValue> = row.iter_values().collect();
        let joined = parts
            .iter()
            .filter_map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(separator);
        Ok(ScalarValue::Utf8(joined))
    })
}

/// Check whether each row contains a value.
pub fn contains(array: &Array, value: &ScalarValue) -> Result<Array> {
    reduce_rows(array, DataType::Boolean, |row| {
        Ok(ScalarValue::Boolean(
            row.iter_values().any(|v| !v.is_null() && v.total_cmp(value).is_eq()),
        ))
    })
}

/// Per input of `concat_list`, the list rows or the plain values cast to the
/// shared element type.
enum ListPart {
    Rows(Vec<Option<Array>>),
    Values(Array),
}

/// Build one list per row out of several columns.
///
/// List inputs contribute the values of their row, other inputs a single
/// value. Length one inputs are broadcast. A null list input makes the whole
/// row null.
pub fn concat_list(inputs: &[Array]) -> Result<Array> {
    let mut inner = DataType::Null;
    for input in inputs {
        let element = input.datatype().inner().unwrap_or(input.datatype());
        inner = DataType::supertype(&inner, element)?;
    }

    let inputs = broadcast_arrays(&inputs.iter().collect::<Vec<_>>())?;
    let len = inputs.first().map_or(0, Array::len);
    let parts = inputs
        .iter()
        .map(|input| {
            Ok(if input.datatype().is_nested() {
                ListPart::Rows(list_rows(input)?)
            } else {
                ListPart::Values(cast(input, &inner, true)?)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(len);
    'rows: for row in 0..len {
        let mut builder = ArrayBuilder::with_capacity(inner.clone(), parts.len());
        for part in &parts {
            match part {
                ListPart::Values(values) => builder.extend_from_array(&values.slice(row, 1))?,
                ListPart::Rows(lists) => match &lists[row] {
                    Some(values) => builder.extend_from_array(&cast(values, &inner, true)?)?,
                    None => {
                        rows.push(None);
                        continue 'rows;
                    }
                },
            }
        }
        rows.push(Some(builder.finish()));
    }
    Array::try_new_list(DataType::list(inner), rows)
}

/// Flatten a list column, one output row per element.
///
/// Null and empty lists produce a single null row. Returns the exploded
/// values and, for every output row, the input row it came from.
pub fn explode(array: &Array) -> Result<(Array, Vec<usize>)> {
    let inner = inner_type(array)?.clone();
    let rows = list_rows(array)?;

    let mut builder = ArrayBuilder::with_capacity(inner, array.len());
    let mut mapping = Vec::with_capacity(array.len());
    for (idx, row) in rows.into_iter().enumerate() {
        match row {
            Some(row) if !row.is_empty() => {
                builder.extend_from_array(&row)?;
                mapping.extend(std::iter::repeat_n(idx, row.len()));
            }
            _ => {
                builder.push_null();
                mapping.push(idx);
            }
        }
    }
    Ok((builder.finish(), mapping))
}

/// Collect a whole column into a single list row.
pub fn implode(array: &Array) -> Result<Array> {
    Array::try_new_list(
        DataType::list(array.datatype().clone()),
        vec![Some(array.clone())],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists() -> Array {
        Array::try_new_list(
            DataType::list(DataType::Int64),
            vec![
                Some(Array::from(vec![1_i64, 2, 3])),
                None,
                Some(Array::from(Vec::<i64>::new())),
                Some(Array::from(vec![Some(4_i64), None])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn concat_list_mixes_lists_and_values() {
        let out = concat_list(&[
            Array::from(vec![Some(1_i32), None, Some(3)]),
            lists().slice(0, 3),
            Array::from(vec![0.5_f64]),
        ])
        .unwrap();
        assert_eq!(&DataType::list(DataType::Float64), out.datatype());

        let rows = list_rows(&out).unwrap();
        assert_eq!(Some(Array::from(vec![1.0, 1.0, 2.0, 3.0, 0.5])), rows[0]);
        assert_eq!(None, rows[1]);
        assert_eq!(Some(Array::from(vec![3.0, 0.5])), rows[2]);
    }

    #[test]
    fn lengths_and_get() {
        let arr = lists();
        assert_eq!(
            Array::from(vec![Some(3_u32), None, Some(0), Some(2)]),
            lengths(&arr).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(3_i64), None, None, None]),
            get(&arr, -1).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(1_i64), None, None, Some(4)]),
            get(&arr, 0).unwrap()
        );
    }

    #[test]
    fn head_tail_slice() {
        let arr = lists();
        assert_eq!(
            ScalarValue::List(Array::from(vec![1_i64, 2])),
            head(&arr, 2).unwrap().get_value(0)
        );
        assert_eq!(
            ScalarValue::List(Array::from(vec![3_i64])),
            tail(&arr, 1).unwrap().get_value(0)
        );
        assert_eq!(
            ScalarValue::List(Array::from(vec![2_i64, 3])),
            slice(&arr, -2, 5).unwrap().get_value(0)
        );
    }

    #[test]
    fn per_row_aggregates() {
        let arr = lists();
        assert_eq!(
            Array::from(vec![Some(6_i64), None, Some(0), Some(4)]),
            aggregate_rows(&arr, AggKind::Sum).unwrap()
        );
        assert_eq!(
            Array::from(vec![Some(2.0), None, None, Some(4.0)]),
            aggregate_rows(&arr, AggKind::Mean).unwrap()
        );
    }

    #[test]
    fn contains_value() {
        let arr = lists();
        assert_eq!(
            Array::from(vec![Some(true), None, Some(false), Some(false)]),
            contains(&arr, &ScalarValue::Int64(2)).unwrap()
        );
    }

    #[test]
    fn explode_mapping() {
        let (values, mapping) = explode(&lists()).unwrap();
        assert_eq!(
            Array::from(vec![Some(1_i64), Some(2), Some(3), None, None, Some(4), None]),
            values
        );
        assert_eq!(vec![0, 0, 0, 1, 2, 3, 3], mapping);
    }

    #[test]
    fn join_strings() {
        let arr = Array::try_new_list(
            DataType::list(DataType::Utf8),
            vec![Some(Array::from(vec![Some("a"), None, Some("b")]))],
        )
        .unwrap();
        assert_eq!(Array::from(vec!["a,b"]), join(&arr, ",").unwrap());
    }
}
