use hashbrown::HashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tabula_error::{DbError, Result, compute_err, length_err, schema_err};

use super::array::{Array, ArrayBuilder};
use super::column::Column;
use super::compute::aggregate::{AggKind, aggregate};
use super::compute::cast::cast_scalar;
use super::compute::list;
use super::compute::sort::{SortOptions, arg_sort_multi};
use super::datatype::DataType;
use super::field::Schema;
use super::scalar::ScalarValue;

/// An ordered set of equal length, uniquely named columns.
///
/// Tables are immutable, every operation returns a new table sharing the
/// unchanged columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    /// Tracked separately so tables with zero columns still have a height.
    height: usize,
}

impl Table {
    /// Create a table from columns, checking lengths and name uniqueness.
    pub fn try_new(columns: Vec<Column>) -> Result<Self> {
        let height = columns.first().map(|c| c.len()).unwrap_or(0);
        Self::try_new_with_height(columns, height)
    }

    pub fn try_new_with_height(columns: Vec<Column>, height: usize) -> Result<Self> {
        let mut names = hashbrown::HashSet::with_capacity(columns.len());
        for col in &columns {
            if col.len() != height {
                return Err(length_err!(
                    "Column '{}' has length {}, expected {height}",
                    col.name(),
                    col.len()
                ));
            }
            if !names.insert(col.name()) {
                return Err(schema_err!("Duplicate column name '{}'", col.name()));
            }
        }
        // `names` borrows from `columns`.
        drop(names);
        Ok(Table { columns, height })
    }

    /// Create a table from (name, array) pairs.
    pub fn try_from_pairs<S: Into<String>>(
        pairs: impl IntoIterator<Item = (S, Array)>,
    ) -> Result<Self> {
        Self::try_new(
            pairs
                .into_iter()
                .map(|(name, array)| Column::new(name, array))
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Table {
            columns: Vec::new(),
            height: 0,
        }
    }

    /// A table with no rows.
    pub fn empty_with_schema(schema: &Schema) -> Self {
        Table {
            columns: schema
                .iter()
                .map(|(name, datatype)| Column::new(name, Array::new_null(datatype, 0)))
                .collect(),
            height: 0,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.columns.len())
    }

    pub fn schema(&self) -> Schema {
        let mut schema = Schema::new();
        for col in &self.columns {
            schema.insert(col.name(), col.datatype().clone());
        }
        schema
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| {
                schema_err!(
                    "Column '{name}' not found, available columns: [{}]",
                    self.column_names().join(", ")
                )
            })
    }

    /// Get the values of a row.
    pub fn row(&self, idx: usize) -> Vec<ScalarValue> {
        self.columns.iter().map(|c| c.array().get_value(idx)).collect()
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let columns = names
            .iter()
            .map(|name| self.column(name.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        Table::try_new_with_height(columns, self.height)
    }

    fn map_columns<F>(&self, height: usize, f: F) -> Table
    where
        F: Fn(&Array) -> Array,
    {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| c.clone().with_array(f(c.array())))
                .collect(),
            height,
        }
    }

    pub fn take(&self, indices: &[usize]) -> Table {
        self.map_columns(indices.len(), |arr| arr.take(indices))
    }

    pub fn take_opt(&self, indices: &[Option<usize>]) -> Table {
        self.map_columns(indices.len(), |arr| arr.take_opt(indices))
    }

    /// Rows `offset..offset + len`. A negative offset counts from the end.
    /// Out of range slices are clamped.
    pub fn slice(&self, offset: i64, len: usize) -> Table {
        let start = if offset >= 0 {
            (offset as usize).min(self.height)
        } else {
            self.height.saturating_sub(offset.unsigned_abs() as usize)
        };
        let end = start.saturating_add(len).min(self.height);
        let indices: Vec<usize> = (start..end).collect();
        self.take(&indices)
    }

    pub fn head(&self, n: usize) -> Table {
        self.slice(0, n)
    }

    pub fn tail(&self, n: usize) -> Table {
        self.slice(self.height.saturating_sub(n) as i64, n)
    }

    /// Keep rows where the mask is true.
    pub fn filter_mask(&self, mask: &[bool]) -> Result<Table> {
        if mask.len() != self.height {
            return Err(length_err!(
                "Filter mask has length {}, table has {} rows",
                mask.len(),
                self.height
            ));
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(idx, &keep)| keep.then_some(idx))
            .collect();
        Ok(self.take(&indices))
    }

    /// Sample `n` rows without replacement using a seeded generator.
    pub fn sample(&self, n: usize, seed: u64) -> Result<Table> {
        if n > self.height {
            return Err(compute_err!(
                "Cannot sample {n} rows from a table with {} rows",
                self.height
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let indices = rand::seq::index::sample(&mut rng, self.height, n).into_vec();
        Ok(self.take(&indices))
    }

    /// Summary statistics for every column.
    ///
    /// Numeric and boolean columns are described as Float64, other columns
    /// as strings with mean, std and median left null.
    pub fn describe(&self) -> Result<Table> {
        const STATS: [&str; 7] = ["count", "null_count", "mean", "std", "min", "max", "median"];

        let mut columns = vec![Column::new("statistic", Array::from(STATS.to_vec()))];
        for col in &self.columns {
            let arr = col.array();
            let numeric = arr.datatype().is_numeric() || arr.datatype().is_boolean();
            let mut stats = Vec::with_capacity(STATS.len());
            for stat in STATS {
                let value = match stat {
                    "count" => aggregate(AggKind::Count, arr)?,
                    "null_count" => aggregate(AggKind::NullCount, arr)?,
                    "mean" if numeric => aggregate(AggKind::Mean, arr)?,
                    "std" if numeric => aggregate(AggKind::Std, arr)?,
                    "median" if numeric => aggregate(AggKind::Median, arr)?,
                    "min" => aggregate(AggKind::Min, arr)?,
                    "max" => aggregate(AggKind::Max, arr)?,
                    _ => ScalarValue::Null,
                };
                stats.push(value);
            }

            let (out_type, stats): (DataType, Vec<ScalarValue>) = if numeric {
                let stats = stats
                    .iter()
                    .map(|v| cast_scalar(v, &DataType::Float64).unwrap_or(ScalarValue::Null))
                    .collect();
                (DataType::Float64, stats)
            } else {
                let stats = stats
                    .into_iter()
                    .map(|v| match v {
                        ScalarValue::Null => ScalarValue::Null,
                        other => ScalarValue::Utf8(other.to_string()),
                    })
                    .collect();
                (DataType::Utf8, stats)
            };
            columns.push(Column::new(
                col.name(),
                Array::try_from_scalars(&out_type, stats)?,
            ));
        }
        Table::try_new(columns)
    }

    /// One row holding the null count of every column.
    pub fn null_count(&self) -> Result<Table> {
        self.reduce_columns(|arr| aggregate(AggKind::NullCount, arr))
    }

    /// One row holding the mean of every column. Non-numeric columns give
    /// null.
    pub fn mean(&self) -> Result<Table> {
        self.reduce_columns(|arr| {
            if arr.datatype().is_numeric() || arr.datatype().is_boolean() {
                aggregate(AggKind::Mean, arr)
            } else {
                Ok(ScalarValue::Null)
            }
        })
    }

    fn reduce_columns<F>(&self, f: F) -> Result<Table>
    where
        F: Fn(&Array) -> Result<ScalarValue>,
    {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let value = f(c.array())?;
                Ok(Column::new(c.name(), Array::from_scalar(&value, 1)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Table::try_new_with_height(columns, 1)
    }

    /// Prepend a UInt32 row number column starting at `offset`.
    pub fn with_row_count(&self, name: &str, offset: u32) -> Result<Table> {
        let counts: Vec<u32> = (0..self.height as u32).map(|v| v + offset).collect();
        let mut columns = Vec::with_capacity(self.columns.len() + 1);
        columns.push(Column::new(name, Array::from(counts)));
        columns.extend(self.columns.iter().cloned());
        Table::try_new_with_height(columns, self.height)
    }

    /// Explode list columns into one row per element, repeating the other
    /// columns. Every exploded column needs matching list lengths per row.
    pub fn explode<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let Some(first) = names.first() else {
            return Ok(self.clone());
        };

        let mut exploded = HashMap::with_capacity(names.len());
        let (values, mapping) = list::explode(self.column(first.as_ref())?.array())?;
        exploded.insert(first.as_ref().to_string(), values);
        for name in &names[1..] {
            let (values, other_mapping) = list::explode(self.column(name.as_ref())?.array())?;
            if other_mapping != mapping {
                return Err(length_err!(
                    "Exploded columns '{}' and '{}' have different list lengths",
                    first.as_ref(),
                    name.as_ref()
                ));
            }
            exploded.insert(name.as_ref().to_string(), values);
        }

        let columns = self
            .columns
            .iter()
            .map(|c| match exploded.remove(c.name()) {
                Some(values) => c.clone().with_array(values),
                None => c.clone().with_array(c.array().take(&mapping)),
            })
            .collect();
        Table::try_new_with_height(columns, mapping.len())
    }

    pub fn drop<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        for name in names {
            self.column(name.as_ref())?;
        }
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name()))
            .cloned()
            .collect();
        Table::try_new_with_height(columns, self.height)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<Table> {
        let idx = self
            .column_index(from)
            .ok_or_else(|| schema_err!("Cannot rename missing column '{from}'"))?;
        let mut columns = self.columns.clone();
        columns[idx] = columns[idx].clone().rename(to);
        Table::try_new_with_height(columns, self.height)
    }

    /// Add a column, replacing an existing column of the same name in place.
    pub fn with_column(&self, column: Column) -> Result<Table> {
        let mut columns = self.columns.clone();
        let height = if columns.is_empty() {
            column.len()
        } else {
            self.height
        };
        match self.column_index(column.name()) {
            Some(idx) => columns[idx] = column,
            None => columns.push(column),
        }
        Table::try_new_with_height(columns, height)
    }

    /// Append the rows of another table with the same schema.
    pub fn vstack(&self, other: &Table) -> Result<Table> {
        Table::concat(&[self.clone(), other.clone()])
    }

    pub fn concat(tables: &[Table]) -> Result<Table> {
        let Some(first) = tables.first() else {
            return Ok(Table::empty());
        };
        let schema = first.schema();
        for table in &tables[1..] {
            let other = table.schema();
            if other != schema {
                return Err(schema_err!(
                    "Cannot concatenate tables with schemas {schema} and {other}"
                ));
            }
        }

        let height = tables.iter().map(|t| t.height).sum();
        let columns = first
            .columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let arrays: Vec<Array> = tables
                    .iter()
                    .map(|t| t.columns[idx].array().clone())
                    .collect();
                Ok(col.clone().with_array(Array::concat(&arrays)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Table::try_new_with_height(columns, height)
    }

    /// Stable sort by one or more columns.
    pub fn sort<S: AsRef<str>>(&self, by: &[S], descending: &[bool]) -> Result<Table> {
        if by.len() != descending.len() {
            return Err(length_err!(
                "Got {} sort directions for {} sort columns",
                descending.len(),
                by.len()
            ));
        }
        let keys = by
            .iter()
            .map(|name| Ok(self.column(name.as_ref())?.array()))
            .collect::<Result<Vec<_>>>()?;
        let options: Vec<SortOptions> = descending
            .iter()
            .map(|&d| SortOptions::descending(d))
            .collect();
        Ok(self.take(&arg_sort_multi(&keys, &options)?))
    }

    /// Check that two tables have the same schema and the same multiset of
    /// rows, ignoring row order.
    pub fn equals_unordered(&self, other: &Table) -> bool {
        if self.schema() != other.schema() || self.height != other.height {
            return false;
        }
        let mut counts: HashMap<Vec<ScalarValue>, i64> = HashMap::new();
        for idx in 0..self.height {
            *counts.entry(self.row(idx)).or_default() += 1;
        }
        for idx in 0..other.height {
            *counts.entry(other.row(idx)).or_default() -= 1;
        }
        counts.values().all(|c| *c == 0)
    }

    /// Build a table from rows of scalars.
    pub fn try_from_rows(schema: &Schema, rows: &[Vec<ScalarValue>]) -> Result<Table> {
        let mut builders: Vec<ArrayBuilder> = schema
            .iter()
            .map(|(_, datatype)| ArrayBuilder::with_capacity(datatype.clone(), rows.len()))
            .collect();
        for row in rows {
            if row.len() != builders.len() {
                return Err(length_err!(
                    "Row has {} values, schema has {} columns",
                    row.len(),
                    builders.len()
                ));
            }
            for (builder, value) in builders.iter_mut().zip(row) {
                builder.push(value.clone())?;
            }
        }
        let columns = schema
            .names()
            .zip(builders)
            .map(|(name, builder)| Column::new(name, builder.finish()))
            .collect();
        Table::try_new_with_height(columns, rows.len())
    }
}

impl TryFrom<Vec<(&str, Array)>> for Table {
    type Error = DbError;

    fn try_from(pairs: Vec<(&str, Array)>) -> Result<Self> {
        Table::try_from_pairs(pairs)
    }
}

impl From<Column> for Table {
    fn from(column: Column) -> Self {
        Table {
            height: column.len(),
            columns: vec![column],
        }
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    fn table() -> Table {
        Table::try_from_pairs([
            ("a", Array::from(vec![Some(3_i64), None, Some(1)])),
            ("b", Array::from(vec!["x", "y", "z"])),
        ])
        .unwrap()
    }

    #[test]
    fn construction_checks() {
        let err = Table::try_from_pairs([
            ("a", Array::from(vec![1_i64])),
            ("a", Array::from(vec![2_i64])),
        ])
        .unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());

        let err = Table::try_from_pairs([
            ("a", Array::from(vec![1_i64])),
            ("b", Array::from(vec![2_i64, 3])),
        ])
        .unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());

        let t = Table::try_new_with_height(
            vec![
                Column::new("a", Array::from(vec![1_i64, 2])),
                Column::new("b", Array::from(vec!["x", "y"])),
            ],
            2,
        )
        .unwrap();
        assert_eq!(vec!["a", "b"], t.column_names());
        assert_eq!(2, t.height());
    }

    #[test]
    fn shape_and_schema() {
        let t = table();
        assert_eq!((3, 2), t.shape());
        assert_eq!(
            vec![("a", &DataType::Int64), ("b", &DataType::Utf8)],
            t.schema().iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn head_tail_slice() {
        let t = table();
        assert_eq!(2, t.head(2).height());
        assert_eq!(
            Array::from(vec!["y", "z"]),
            *t.tail(2).column("b").unwrap().array()
        );
        assert_eq!(
            Array::from(vec!["z"]),
            *t.slice(-1, 5).column("b").unwrap().array()
        );
    }

    #[test]
    fn sample_is_seeded() {
        let t = table();
        let a = t.sample(2, 42).unwrap();
        let b = t.sample(2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(2, a.height());
        assert!(t.sample(4, 42).is_err());
    }

    #[test]
    fn sort_nulls_first() {
        let t = table().sort(&["a"], &[false]).unwrap();
        assert_eq!(Array::from(vec!["y", "z", "x"]), *t.column("b").unwrap().array());
    }

    #[test]
    fn with_column_replaces_in_place() {
        let t = table()
            .with_column(Column::new("a", Array::from(vec![0_i32, 0, 0])))
            .unwrap();
        assert_eq!(vec!["a", "b"], t.column_names());
        assert_eq!(DataType::Int32, *t.column("a").unwrap().datatype());
    }

    #[test]
    fn vstack_schema_mismatch() {
        let t = table();
        let other = t.rename("b", "c").unwrap();
        assert_eq!(ErrorKind::Schema, t.vstack(&other).unwrap_err().kind());
        assert_eq!(6, t.vstack(&t).unwrap().height());
    }

    #[test]
    fn explode_repeats_other_columns() {
        let lists = Array::try_new_list(
            DataType::list(DataType::Int64),
            vec![Some(Array::from(vec![1_i64, 2])), None],
        )
        .unwrap();
        let t = Table::try_from_pairs([("k", Array::from(vec!["a", "b"])), ("v", lists)]).unwrap();
        let exploded = t.explode(&["v"]).unwrap();
        assert_eq!(
            Array::from(vec!["a", "a", "b"]),
            *exploded.column("k").unwrap().array()
        );
        assert_eq!(
            Array::from(vec![Some(1_i64), Some(2), None]),
            *exploded.column("v").unwrap().array()
        );
    }

    #[test]
    fn row_count_and_drop() {
        let t = table().with_row_count("idx", 10).unwrap();
        assert_eq!(
            Array::from(vec![10_u32, 11, 12]),
            *t.column("idx").unwrap().array()
        );
        let dropped = t.drop(&["a"]).unwrap();
        assert_eq!(vec!["idx", "b"], dropped.column_names());
        assert!(t.drop(&["missing"]).is_err());
    }

    #[test]
    fn describe_and_reductions() {
        let t = table();
        let desc = t.describe().unwrap();
        assert_eq!((7, 3), desc.shape());
        assert_eq!(
            ScalarValue::Float64(2.0),
            desc.column("a").unwrap().array().get_value(2)
        );
        assert_eq!(
            ScalarValue::Utf8("x".to_string()),
            desc.column("b").unwrap().array().get_value(4)
        );

        let nulls = t.null_count().unwrap();
        assert_eq!(
            ScalarValue::UInt32(1),
            nulls.column("a").unwrap().array().get_value(0)
        );
        let means = t.mean().unwrap();
        assert!(means.column("b").unwrap().array().get_value(0).is_null());
    }

    #[test]
    fn unordered_equality() {
        let t = table();
        let reversed = t.take(&[2, 1, 0]);
        assert!(t.equals_unordered(&reversed));
        assert!(!t.equals_unordered(&t.head(2)));
    }
}
