//! Approximate distinct counting.

use ahash::RandomState;
use hashbrown::HashSet;

use crate::arrays::array::Array;
use crate::arrays::scalar::ScalarValue;

/// Register index bits. 2^14 registers gives a standard error of about 0.8%.
const DEFAULT_PRECISION: u8 = 14;

/// Distinct values kept exactly before switching to the sketch.
const EXACT_THRESHOLD: usize = 2048;

/// Fixed seeds so estimates are reproducible across runs and processes.
fn hash_state() -> RandomState {
    RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct HyperLogLog {
    p: u8,
    registers: Vec<u8>,
}

impl HyperLogLog {
    pub fn with_precision(p: u8) -> Self {
        debug_assert!((4..=18).contains(&p));
        HyperLogLog {
            p,
            registers: vec![0; 1 << p],
        }
    }

    pub fn insert_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.p)) as usize;
        let rank = ((hash << self.p).leading_zeros() + 1) as u8;
        self.registers[idx] = self.registers[idx].max(rank);
    }

    /// Merge another sketch with the same precision into this one.
    pub fn merge(&mut self, other: &HyperLogLog) {
        for (a, b) in self.registers.iter_mut().zip(&other.registers) {
            *a = (*a).max(*b);
        }
    }

    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let mut inv_sum = 0.0;
        let mut zeros = 0_u32;
        for &r in &self.registers {
            inv_sum += 2_f64.powi(-(r as i32));
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / inv_sum;
        if raw <= 2.5 * m && zeros > 0 {
            // Linear counting for small cardinalities.
            return (m * (m / zeros as f64).ln()).round().max(0.0) as u64;
        }

        raw.round().max(0.0) as u64
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

pub fn hash_scalar(value: &ScalarValue) -> u64 {
    splitmix64(hash_state().hash_one(value))
}

/// Counts distinct hashes exactly while small, then spills into a
/// HyperLogLog sketch.
#[derive(Debug, Clone, PartialEq)]
pub enum DistinctCounter {
    Exact(HashSet<u64>),
    Sketch(HyperLogLog),
}

impl Default for DistinctCounter {
    fn default() -> Self {
        DistinctCounter::Exact(HashSet::new())
    }
}

impl DistinctCounter {
    pub fn insert(&mut self, value: &ScalarValue) {
        self.insert_hash(hash_scalar(value))
    }

    pub fn insert_hash(&mut self, hash: u64) {
        match self {
            Self::Exact(set) => {
                if set.len() >= EXACT_THRESHOLD && !set.contains(&hash) {
                    let mut hll = HyperLogLog::with_precision(DEFAULT_PRECISION);
                    for &h in set.iter() {
                        hll.insert_hash(h);
                    }
                    hll.insert_hash(hash);
                    *self = Self::Sketch(hll);
                } else {
                    set.insert(hash);
                }
            }
            Self::Sketch(hll) => hll.insert_hash(hash),
        }
    }

    pub fn merge(&mut self, other: &DistinctCounter) {
        match other {
            Self::Exact(set) => {
                for &h in set {
                    self.insert_hash(h);
                }
            }
            Self::Sketch(other_hll) => match self {
                Self::Exact(set) => {
                    let mut hll = other_hll.clone();
                    for &h in set.iter() {
                        hll.insert_hash(h);
                    }
                    *self = Self::Sketch(hll);
                }
                Self::Sketch(hll) => hll.merge(other_hll),
            },
        }
    }

    pub fn estimate(&self) -> u64 {
        match self {
            Self::Exact(set) => set.len() as u64,
            Self::Sketch(hll) => hll.estimate(),
        }
    }
}

/// Estimate the number of distinct values in an array. Null counts as a
/// value.
pub fn approx_n_unique(array: &Array) -> u64 {
    let mut counter = DistinctCounter::default();
    for value in array.iter_values() {
        counter.insert(&value);
    }
    counter.estimate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_inputs_are_exact() {
        let arr = Array::from(vec![Some(1_i64), Some(2), Some(1), None]);
        assert_eq!(3, approx_n_unique(&arr));
    }

    #[test]
    fn nan_counted_once() {
        let arr = Array::from(vec![f64::NAN, f64::NAN, 1.0]);
        assert_eq!(2, approx_n_unique(&arr));
    }

    #[test]
    fn large_inputs_within_error() {
        let n = 100_000_i64;
        let arr = Array::from((0..n).collect::<Vec<_>>());
        let est = approx_n_unique(&arr) as f64;
        let err = (est - n as f64).abs() / n as f64;
        assert!(err < 0.05, "estimate {est} too far from {n}");
    }

    #[test]
    fn merge_matches_single_pass() {
        let mut a = DistinctCounter::default();
        let mut b = DistinctCounter::default();
        let mut all = DistinctCounter::default();
        for v in 0..5000_i64 {
            let value = ScalarValue::Int64(v % 3000);
            if v % 2 == 0 {
                a.insert(&value);
            } else {
                b.insert(&value);
            }
            all.insert(&value);
        }
        a.merge(&b);
        assert_eq!(all.estimate(), a.estimate());
    }
}
