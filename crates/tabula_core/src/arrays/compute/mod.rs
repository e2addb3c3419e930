//! Columnar compute kernels.
//!
//! Everything above the array layer calls into these kernels for leaf work,
//! nothing outside this module touches array storage directly.
pub mod aggregate;
pub mod arith;
pub mod boolean;
pub mod cast;
pub mod cmp;
pub mod fill;
pub mod hll;
pub mod list;
pub mod sort;
pub mod string;
pub mod temporal;

use tabula_error::{Result, length_err};

use super::array::Array;

/// Broadcast arrays to a common length.
///
/// Length one arrays are repeated, every other array must have the same
/// length. If all arrays are length one, the output length is one.
pub fn broadcast_arrays(arrays: &[&Array]) -> Result<Vec<Array>> {
    let mut len = None;
    for arr in arrays {
        if arr.len() == 1 {
            continue;
        }
        match len {
            None => len = Some(arr.len()),
            Some(len) if len != arr.len() => {
                return Err(length_err!(
                    "Cannot combine arrays of lengths {len} and {}",
                    arr.len()
                ));
            }
            Some(_) => (),
        }
    }

    let len = len.unwrap_or(1);
    arrays.iter().map(|arr| arr.broadcast(len)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_mixed() {
        let a = Array::from(vec![1_i64, 2, 3]);
        let b = Array::from(vec![4_i64]);
        let out = broadcast_arrays(&[&a, &b]).unwrap();
        assert_eq!(Array::from(vec![4_i64, 4, 4]), out[1]);
    }

    #[test]
    fn broadcast_to_empty() {
        let a = Array::from(Vec::<i64>::new());
        let b = Array::from(vec![4_i64]);
        let out = broadcast_arrays(&[&a, &b]).unwrap();
        assert_eq!(0, out[1].len());
    }

    #[test]
    fn broadcast_mismatch() {
        let a = Array::from(vec![1_i64, 2, 3]);
        let b = Array::from(vec![4_i64, 5]);
        assert!(broadcast_arrays(&[&a, &b]).is_err());
    }
}
