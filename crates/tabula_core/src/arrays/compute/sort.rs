//! Stable sorting kernels.
use std::cmp::Ordering;

use tabula_error::{Result, length_err};

use crate::arrays::array::Array;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SortOptions {
    pub descending: bool,
    /// Nulls are placed first unless set, independent of `descending`.
    pub nulls_last: bool,
}

impl SortOptions {
    pub const fn descending(descending: bool) -> Self {
        SortOptions {
            descending,
            nulls_last: false,
        }
    }
}

fn compare_values(a: &ScalarValue, b: &ScalarValue, options: SortOptions) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if options.nulls_last {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, true) => {
            if options.nulls_last {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, false) => {
            let ord = a.total_cmp(b);
            if options.descending { ord.reverse() } else { ord }
        }
    }
}

/// Indices that would sort the array. Equal values keep their relative
/// order.
pub fn arg_sort(array: &Array, options: SortOptions) -> Vec<usize> {
    let values: Vec<ScalarValue> = array.iter_values().collect();
    let mut indices: Vec<usize> = (0..array.len()).collect();
    indices.sort_by(|&a, &b| compare_values(&values[a], &values[b], options));
    indices
}

/// Indices that would sort rows by multiple keys, earlier keys taking
/// precedence.
pub fn arg_sort_multi(arrays: &[&Array], options: &[SortOptions]) -> Result<Vec<usize>> {
    let len = arrays.first().map(|a| a.len()).unwrap_or(0);
    if let Some(bad) = arrays.iter().find(|a| a.len() != len) {
        return Err(length_err!(
            "Sort keys have different lengths: {len} and {}",
            bad.len()
        ));
    }
    if options.len() != arrays.len() {
        return Err(length_err!(
            "Got {} sort options for {} sort keys",
            options.len(),
            arrays.len()
        ));
    }

    let columns: Vec<Vec<ScalarValue>> = arrays.iter().map(|a| a.iter_values().collect()).collect();
    let mut indices: Vec<usize> = (0..len).collect();
    indices.sort_by(|&a, &b| {
        columns
            .iter()
            .zip(options)
            .map(|(col, opts)| compare_values(&col[a], &col[b], *opts))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(indices)
}

pub fn sort(array: &Array, options: SortOptions) -> Array {
    array.take(&arg_sort(array, options))
}

/// Rank of every value starting at 1, tied values sharing the mean of their
/// positions. Nulls keep a null rank.
pub fn rank(array: &Array, descending: bool) -> Array {
    let values: Vec<ScalarValue> = array.iter_values().collect();
    let order = arg_sort(
        array,
        SortOptions {
            descending,
            nulls_last: true,
        },
    );

    let mut ranks: Vec<Option<f64>> = vec![None; values.len()];
    let mut start = 0;
    while start < order.len() && !values[order[start]].is_null() {
        let first = &values[order[start]];
        let end = order[start..]
            .iter()
            .position(|&idx| values[idx].total_cmp(first) != Ordering::Equal)
            .map_or(order.len(), |offset| start + offset);
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = Some(rank);
        }
        start = end;
    }
    Array::from(ranks)
}

/// Reverse the order of an array.
pub fn reverse(array: &Array) -> Array {
    let indices: Vec<usize> = (0..array.len()).rev().collect();
    array.take(&indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_first_in_both_directions() {
        let arr = Array::from(vec![Some(2_i32), None, Some(1), Some(3)]);
        assert_eq!(vec![1, 2, 0, 3], arg_sort(&arr, SortOptions::default()));
        assert_eq!(vec![1, 3, 0, 2], arg_sort(&arr, SortOptions::descending(true)));
    }

    #[test]
    fn nulls_last() {
        let arr = Array::from(vec![None, Some("b"), Some("a")]);
        let opts = SortOptions {
            descending: false,
            nulls_last: true,
        };
        assert_eq!(vec![2, 1, 0], arg_sort(&arr, opts));
    }

    #[test]
    fn nan_sorts_greatest() {
        let arr = Array::from(vec![f64::NAN, 1.0, f64::INFINITY]);
        assert_eq!(vec![1, 2, 0], arg_sort(&arr, SortOptions::default()));
    }

    #[test]
    fn rank_averages_ties() {
        let arr = Array::from(vec![Some(11_i64), Some(11), Some(15), None]);
        assert_eq!(
            Array::from(vec![Some(2.5), Some(2.5), Some(1.0), None]),
            rank(&arr, true)
        );
        assert_eq!(
            Array::from(vec![Some(1.5), Some(1.5), Some(3.0), None]),
            rank(&arr, false)
        );
    }

    #[test]
    fn stable_multi_key() {
        let a = Array::from(vec![1_i64, 0, 1, 0]);
        let b = Array::from(vec!["x", "y", "w", "y"]);
        let got = arg_sort_multi(
            &[&a, &b],
            &[SortOptions::default(), SortOptions::descending(true)],
        )
        .unwrap();
        assert_eq!(vec![1, 3, 0, 2], got);
    }
}
