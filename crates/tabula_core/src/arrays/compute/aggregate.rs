//! Aggregate reductions.
//!
//! Every aggregate is implemented as an [`Accumulator`] holding one state per
//! group. Whole-column reductions, eager group by and streaming group by all
//! drive the same accumulators, feeding each group its rows in input order,
//! so floating point results are identical between the three.
use std::cmp::Ordering;
use std::fmt;

use hashbrown::HashSet;
use tabula_error::{Result, type_err};

use super::hll::DistinctCounter;
use crate::arrays::array::{Array, ArrayBuilder};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Var,
    /// Number of non-null values.
    Count,
    NullCount,
    /// Number of rows, nulls included.
    Len,
    First,
    Last,
    /// Distinct values, null counts as a value.
    NUnique,
    ApproxNUnique,
    /// Collect all values into a list.
    Implode,
}

impl AggKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Var => "var",
            Self::Count => "count",
            Self::NullCount => "null_count",
            Self::Len => "len",
            Self::First => "first",
            Self::Last => "last",
            Self::NUnique => "n_unique",
            Self::ApproxNUnique => "approx_n_unique",
            Self::Implode => "implode",
        }
    }

    /// Whether the aggregate can be computed incrementally with constant
    /// state per group (no buffering of the group's values).
    pub fn is_decomposable(&self) -> bool {
        !matches!(
            self,
            Self::Median | Self::Std | Self::Var | Self::Implode | Self::ApproxNUnique
        )
    }

    pub fn output_type(&self, input: &DataType) -> Result<DataType> {
        let numeric_like = input.is_numeric() || input.is_boolean() || *input == DataType::Null;
        Ok(match self {
            Self::Sum => match input {
                DataType::Boolean => DataType::UInt32,
                DataType::Float32 => DataType::Float32,
                DataType::Float64 => DataType::Float64,
                dt if dt.is_unsigned_integer() => DataType::UInt64,
                dt if dt.is_signed_integer() => DataType::Int64,
                DataType::Null => DataType::Int64,
                other => return Err(type_err!("Cannot sum {other}")),
            },
            Self::Mean => match input {
                DataType::Float32 => DataType::Float32,
                _ if numeric_like => DataType::Float64,
                other => return Err(type_err!("Cannot compute mean of {other}")),
            },
            Self::Median | Self::Std | Self::Var => {
                if numeric_like {
                    DataType::Float64
                } else {
                    return Err(type_err!("Cannot compute {} of {input}", self.name()));
                }
            }
            Self::Min | Self::Max | Self::First | Self::Last => input.clone(),
            Self::Count | Self::NullCount | Self::Len | Self::NUnique | Self::ApproxNUnique => {
                DataType::UInt32
            }
            Self::Implode => DataType::list(input.clone()),
        })
    }

    /// Create an accumulator for values of the given type.
    pub fn accumulator(&self, input: &DataType) -> Result<Box<dyn Accumulator>> {
        let output = self.output_type(input)?;
        Ok(match self {
            Self::Sum => Box::new(SumAccumulator::new(output)),
            Self::Mean => Box::new(MeanAccumulator {
                output,
                sums: Vec::new(),
                counts: Vec::new(),
            }),
            Self::Min => Box::new(MinMaxAccumulator::new(output, Ordering::Less)),
            Self::Max => Box::new(MinMaxAccumulator::new(output, Ordering::Greater)),
            Self::Count => Box::new(CountAccumulator::new(CountMode::Valid)),
            Self::NullCount => Box::new(CountAccumulator::new(CountMode::Null)),
            Self::Len => Box::new(CountAccumulator::new(CountMode::All)),
            Self::First => Box::new(FirstLastAccumulator::new(output, false)),
            Self::Last => Box::new(FirstLastAccumulator::new(output, true)),
            Self::NUnique => Box::new(NUniqueAccumulator { sets: Vec::new() }),
            Self::ApproxNUnique => Box::new(ApproxNUniqueAccumulator {
                counters: Vec::new(),
            }),
            Self::Median | Self::Std | Self::Var | Self::Implode => {
                Box::new(BufferedAccumulator {
                    kind: *self,
                    input: input.clone(),
                    output,
                    groups: Vec::new(),
                })
            }
        })
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-group aggregate state.
///
/// Groups are identified by a dense index. Groups that never see an update
/// before `finish` produce the aggregate of an empty input.
pub trait Accumulator: fmt::Debug + Send {
    /// Update the state of a group with the given rows of `values`.
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()>;

    /// Make sure state exists for groups up to `num_groups`.
    fn ensure_groups(&mut self, num_groups: usize);

    /// Produce one value per group.
    fn finish(&mut self) -> Result<Array>;
}

fn grow<T: Clone>(states: &mut Vec<T>, len: usize, init: T) {
    if states.len() < len {
        states.resize(len, init);
    }
}

#[derive(Debug)]
enum SumValues {
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

#[derive(Debug)]
struct SumAccumulator {
    sums: SumValues,
}

impl SumAccumulator {
    fn new(output: DataType) -> Self {
        let sums = match output {
            DataType::UInt64 => SumValues::UInt64(Vec::new()),
            DataType::UInt32 => SumValues::UInt32(Vec::new()),
            DataType::Float32 => SumValues::Float32(Vec::new()),
            DataType::Float64 => SumValues::Float64(Vec::new()),
            _ => SumValues::Int64(Vec::new()),
        };
        SumAccumulator { sums }
    }
}

fn as_u64(value: &ScalarValue) -> Option<u64> {
    match value {
        ScalarValue::UInt8(v) => Some(*v as u64),
        ScalarValue::UInt16(v) => Some(*v as u64),
        ScalarValue::UInt32(v) => Some(*v as u64),
        ScalarValue::UInt64(v) => Some(*v),
        ScalarValue::Boolean(v) => Some(*v as u64),
        _ => None,
    }
}

impl Accumulator for SumAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        for &row in rows {
            let value = values.get_value(row);
            if value.is_null() {
                continue;
            }
            match &mut self.sums {
                SumValues::Int64(sums) => {
                    let v = value
                        .as_i64()
                        .ok_or_else(|| type_err!("Cannot add '{value}' to an Int64 sum"))?;
                    sums[group] = sums[group].wrapping_add(v);
                }
                SumValues::UInt64(sums) => {
                    let v = as_u64(&value)
                        .ok_or_else(|| type_err!("Cannot add '{value}' to a UInt64 sum"))?;
                    sums[group] = sums[group].wrapping_add(v);
                }
                SumValues::UInt32(sums) => {
                    let v = as_u64(&value)
                        .ok_or_else(|| type_err!("Cannot add '{value}' to a UInt32 sum"))?;
                    sums[group] = sums[group].wrapping_add(v as u32);
                }
                SumValues::Float32(sums) => match value {
                    ScalarValue::Float32(v) => sums[group] += v,
                    other => return Err(type_err!("Cannot add '{other}' to a Float32 sum")),
                },
                SumValues::Float64(sums) => {
                    let v = value
                        .as_f64()
                        .ok_or_else(|| type_err!("Cannot add '{value}' to a Float64 sum"))?;
                    sums[group] += v;
                }
            }
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        match &mut self.sums {
            SumValues::Int64(v) => grow(v, num_groups, 0),
            SumValues::UInt64(v) => grow(v, num_groups, 0),
            SumValues::UInt32(v) => grow(v, num_groups, 0),
            SumValues::Float32(v) => grow(v, num_groups, 0.0),
            SumValues::Float64(v) => grow(v, num_groups, 0.0),
        }
    }

    fn finish(&mut self) -> Result<Array> {
        Ok(match &mut self.sums {
            SumValues::Int64(v) => std::mem::take(v).into(),
            SumValues::UInt64(v) => std::mem::take(v).into(),
            SumValues::UInt32(v) => std::mem::take(v).into(),
            SumValues::Float32(v) => std::mem::take(v).into(),
            SumValues::Float64(v) => std::mem::take(v).into(),
        })
    }
}

#[derive(Debug)]
struct MeanAccumulator {
    output: DataType,
    sums: Vec<f64>,
    counts: Vec<u64>,
}

impl Accumulator for MeanAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        for &row in rows {
            let value = values.get_value(row);
            if value.is_null() {
                continue;
            }
            let v = value
                .as_f64()
                .ok_or_else(|| type_err!("Cannot compute mean of '{value}'"))?;
            self.sums[group] += v;
            self.counts[group] += 1;
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.sums, num_groups, 0.0);
        grow(&mut self.counts, num_groups, 0);
    }

    fn finish(&mut self) -> Result<Array> {
        let sums = std::mem::take(&mut self.sums);
        let counts = std::mem::take(&mut self.counts);
        let means = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| (count > 0).then(|| sum / count as f64));

        Ok(match self.output {
            DataType::Float32 => means.map(|v| v.map(|v| v as f32)).collect::<Vec<_>>().into(),
            _ => means.collect::<Vec<_>>().into(),
        })
    }
}

/// Min or max, ignoring NaN unless every value is NaN.
#[derive(Debug)]
struct MinMaxAccumulator {
    output: DataType,
    /// Ordering a new value must have against the current best to replace it.
    replace_when: Ordering,
    best: Vec<Option<ScalarValue>>,
    nan: Vec<Option<ScalarValue>>,
}

impl MinMaxAccumulator {
    fn new(output: DataType, replace_when: Ordering) -> Self {
        MinMaxAccumulator {
            output,
            replace_when,
            best: Vec::new(),
            nan: Vec::new(),
        }
    }
}

impl Accumulator for MinMaxAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        for &row in rows {
            let value = values.get_value(row);
            if value.is_null() {
                continue;
            }
            if value.is_nan() {
                self.nan[group] = Some(value);
                continue;
            }
            let replace = match &self.best[group] {
                Some(best) => value.total_cmp(best) == self.replace_when,
                None => true,
            };
            if replace {
                self.best[group] = Some(value);
            }
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.best, num_groups, None);
        grow(&mut self.nan, num_groups, None);
    }

    fn finish(&mut self) -> Result<Array> {
        let best = std::mem::take(&mut self.best);
        let nan = std::mem::take(&mut self.nan);
        let values = best
            .into_iter()
            .zip(nan)
            .map(|(best, nan)| best.or(nan).unwrap_or(ScalarValue::Null));
        Array::try_from_scalars(&self.output, values)
    }
}

#[derive(Debug, Clone, Copy)]
enum CountMode {
    Valid,
    Null,
    All,
}

#[derive(Debug)]
struct CountAccumulator {
    mode: CountMode,
    counts: Vec<u32>,
}

impl CountAccumulator {
    fn new(mode: CountMode) -> Self {
        CountAccumulator {
            mode,
            counts: Vec::new(),
        }
    }
}

impl Accumulator for CountAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        let count = match self.mode {
            CountMode::All => rows.len(),
            CountMode::Valid => rows.iter().filter(|&&row| values.is_valid(row)).count(),
            CountMode::Null => rows.iter().filter(|&&row| !values.is_valid(row)).count(),
        };
        self.counts[group] += count as u32;
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.counts, num_groups, 0);
    }

    fn finish(&mut self) -> Result<Array> {
        Ok(std::mem::take(&mut self.counts).into())
    }
}

#[derive(Debug)]
struct FirstLastAccumulator {
    output: DataType,
    last: bool,
    /// Outer `None` when the group has not seen a row yet.
    values: Vec<Option<ScalarValue>>,
}

impl FirstLastAccumulator {
    fn new(output: DataType, last: bool) -> Self {
        FirstLastAccumulator {
            output,
            last,
            values: Vec::new(),
        }
    }
}

impl Accumulator for FirstLastAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        let row = if self.last { rows.last() } else { rows.first() };
        if let Some(&row) = row {
            if self.last || self.values[group].is_none() {
                self.values[group] = Some(values.get_value(row));
            }
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.values, num_groups, None);
    }

    fn finish(&mut self) -> Result<Array> {
        let values = std::mem::take(&mut self.values)
            .into_iter()
            .map(|v| v.unwrap_or(ScalarValue::Null));
        Array::try_from_scalars(&self.output, values)
    }
}

#[derive(Debug)]
struct NUniqueAccumulator {
    sets: Vec<HashSet<ScalarValue>>,
}

impl Accumulator for NUniqueAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        for &row in rows {
            self.sets[group].insert(values.get_value(row));
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.sets, num_groups, HashSet::new());
    }

    fn finish(&mut self) -> Result<Array> {
        let counts: Vec<u32> = std::mem::take(&mut self.sets)
            .iter()
            .map(|set| set.len() as u32)
            .collect();
        Ok(counts.into())
    }
}

#[derive(Debug)]
struct ApproxNUniqueAccumulator {
    counters: Vec<DistinctCounter>,
}

impl Accumulator for ApproxNUniqueAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        for &row in rows {
            self.counters[group].insert(&values.get_value(row));
        }
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.counters, num_groups, DistinctCounter::default());
    }

    fn finish(&mut self) -> Result<Array> {
        let counts: Vec<u32> = std::mem::take(&mut self.counters)
            .iter()
            .map(|c| c.estimate() as u32)
            .collect();
        Ok(counts.into())
    }
}

/// Aggregates that need every value of a group before producing a result.
#[derive(Debug)]
struct BufferedAccumulator {
    kind: AggKind,
    input: DataType,
    output: DataType,
    groups: Vec<Vec<ScalarValue>>,
}

impl BufferedAccumulator {
    fn finish_group(&self, values: Vec<ScalarValue>) -> Result<ScalarValue> {
        if self.kind == AggKind::Implode {
            return Ok(ScalarValue::List(Array::try_from_scalars(&self.input, values)?));
        }

        let mut floats = Vec::with_capacity(values.len());
        for value in values.iter().filter(|v| !v.is_null()) {
            let v = value
                .as_f64()
                .ok_or_else(|| type_err!("Cannot compute {} of '{value}'", self.kind))?;
            floats.push(v);
        }

        Ok(match self.kind {
            AggKind::Median => median(&mut floats).into(),
            AggKind::Var => variance(&floats).into(),
            AggKind::Std => variance(&floats).map(f64::sqrt).into(),
            other => return Err(type_err!("{other} is not a buffered aggregate")),
        })
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Sample variance (one delta degree of freedom).
fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    Some(sq / (n - 1.0))
}

impl Accumulator for BufferedAccumulator {
    fn update(&mut self, group: usize, values: &Array, rows: &[usize]) -> Result<()> {
        self.ensure_groups(group + 1);
        self.groups[group].extend(rows.iter().map(|&row| values.get_value(row)));
        Ok(())
    }

    fn ensure_groups(&mut self, num_groups: usize) {
        grow(&mut self.groups, num_groups, Vec::new());
    }

    fn finish(&mut self) -> Result<Array> {
        let groups = std::mem::take(&mut self.groups);
        let mut builder = ArrayBuilder::with_capacity(self.output.clone(), groups.len());
        for values in groups {
            builder.push(self.finish_group(values)?)?;
        }
        Ok(builder.finish())
    }
}

/// Reduce a whole array to a single value.
pub fn aggregate(kind: AggKind, array: &Array) -> Result<ScalarValue> {
    let mut acc = kind.accumulator(array.datatype())?;
    let rows: Vec<usize> = (0..array.len()).collect();
    acc.ensure_groups(1);
    acc.update(0, array, &rows)?;
    Ok(acc.finish()?.get_value(0))
}

/// Reduce every group of rows to a single value, one output row per group.
pub fn aggregate_groups(kind: AggKind, array: &Array, groups: &[Vec<usize>]) -> Result<Array> {
    let mut acc = kind.accumulator(array.datatype())?;
    acc.ensure_groups(groups.len());
    for (idx, rows) in groups.iter().enumerate() {
        acc.update(idx, array, rows)?;
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_and_mean_skip_nulls() {
        let arr = Array::from(vec![Some(1_i64), None, Some(3)]);
        assert_eq!(ScalarValue::Int64(4), aggregate(AggKind::Sum, &arr).unwrap());
        assert_eq!(ScalarValue::Float64(2.0), aggregate(AggKind::Mean, &arr).unwrap());
    }

    #[test]
    fn mean_propagates_nan() {
        let arr = Array::from(vec![1.0, f64::NAN, 3.0]);
        assert!(aggregate(AggKind::Mean, &arr).unwrap().is_nan());
    }

    #[test]
    fn sum_output_types() {
        let arr = Array::from(vec![true, true, false]);
        assert_eq!(ScalarValue::UInt32(2), aggregate(AggKind::Sum, &arr).unwrap());

        let arr = Array::from(vec![1_u8, 255]);
        assert_eq!(ScalarValue::UInt64(256), aggregate(AggKind::Sum, &arr).unwrap());

        let arr = Array::from(vec![1.5_f32, 2.0]);
        assert_eq!(ScalarValue::Float32(3.5), aggregate(AggKind::Sum, &arr).unwrap());

        assert!(aggregate(AggKind::Sum, &Array::from(vec!["a"])).is_err());
    }

    #[test]
    fn empty_inputs() {
        let arr = Array::from(Vec::<Option<i64>>::new());
        assert_eq!(ScalarValue::Int64(0), aggregate(AggKind::Sum, &arr).unwrap());
        assert_eq!(ScalarValue::Null, aggregate(AggKind::Mean, &arr).unwrap());
        assert_eq!(ScalarValue::Null, aggregate(AggKind::Max, &arr).unwrap());
        assert_eq!(ScalarValue::UInt32(0), aggregate(AggKind::Count, &arr).unwrap());
    }

    #[test]
    fn min_max_ignore_nan() {
        let arr = Array::from(vec![2.0, f64::NAN, -1.0]);
        assert_eq!(ScalarValue::Float64(2.0), aggregate(AggKind::Max, &arr).unwrap());
        assert_eq!(ScalarValue::Float64(-1.0), aggregate(AggKind::Min, &arr).unwrap());

        let arr = Array::from(vec![f64::NAN]);
        assert!(aggregate(AggKind::Max, &arr).unwrap().is_nan());
    }

    #[test]
    fn first_last_keep_nulls() {
        let arr = Array::from(vec![None, Some("b"), None]);
        assert_eq!(ScalarValue::Null, aggregate(AggKind::First, &arr).unwrap());
        assert_eq!(ScalarValue::Null, aggregate(AggKind::Last, &arr).unwrap());
    }

    #[test]
    fn counts() {
        let arr = Array::from(vec![Some(1_i32), None, Some(1), None]);
        assert_eq!(ScalarValue::UInt32(2), aggregate(AggKind::Count, &arr).unwrap());
        assert_eq!(ScalarValue::UInt32(2), aggregate(AggKind::NullCount, &arr).unwrap());
        assert_eq!(ScalarValue::UInt32(4), aggregate(AggKind::Len, &arr).unwrap());
        assert_eq!(ScalarValue::UInt32(2), aggregate(AggKind::NUnique, &arr).unwrap());
    }

    #[test]
    fn median_std_var() {
        let arr = Array::from(vec![1_i64, 2, 3, 4]);
        assert_eq!(ScalarValue::Float64(2.5), aggregate(AggKind::Median, &arr).unwrap());
        let var = aggregate(AggKind::Var, &arr).unwrap().as_f64().unwrap();
        assert!((var - 5.0 / 3.0).abs() < 1e-12);

        let single = Array::from(vec![1_i64]);
        assert_eq!(ScalarValue::Null, aggregate(AggKind::Std, &single).unwrap());
    }

    #[test]
    fn grouped() {
        let arr = Array::from(vec![10_i64, 7, 1]);
        let groups = vec![vec![0, 1], vec![2]];
        let got = aggregate_groups(AggKind::Mean, &arr, &groups).unwrap();
        assert_eq!(Array::from(vec![8.5, 1.0]), got);

        let got = aggregate_groups(AggKind::Implode, &arr, &groups).unwrap();
        assert_eq!(
            ScalarValue::List(Array::from(vec![10_i64, 7])),
            got.get_value(0)
        );
    }

    #[test]
    fn incremental_updates_match_single_update() {
        let arr = Array::from(vec![0.1, 0.2, 0.3, 0.4]);
        let mut acc = AggKind::Sum.accumulator(arr.datatype()).unwrap();
        acc.update(0, &arr, &[0, 1]).unwrap();
        acc.update(0, &arr, &[2, 3]).unwrap();
        let incremental = acc.finish().unwrap().get_value(0);
        assert_eq!(aggregate(AggKind::Sum, &arr).unwrap(), incremental);
    }
}
