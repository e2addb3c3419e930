//! Row partitioning by key values.
use ahash::RandomState;
use hashbrown::HashMap;
use tabula_error::{Result, length_err};

use crate::arrays::array::Array;
use crate::arrays::compute::sort::{SortOptions, arg_sort_multi};
use crate::arrays::scalar::ScalarValue;

/// Order in which groups are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupOrder {
    /// Ascending by key tuple, nulls first.
    #[default]
    Sorted,
    /// Order in which each key is first seen.
    FirstOccurrence,
}

/// Assigns dense group ids to key tuples in first-occurrence order.
///
/// Used directly by the streaming aggregate, which sees keys one batch at a
/// time.
#[derive(Debug, Default)]
pub struct GroupTable {
    ids: HashMap<Vec<ScalarValue>, usize, RandomState>,
    keys: Vec<Vec<ScalarValue>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_groups(&self) -> usize {
        self.keys.len()
    }

    /// Group id for every row of the key arrays, creating groups for new
    /// keys.
    pub fn insert(&mut self, keys: &[&Array]) -> Result<Vec<usize>> {
        let len = keys.first().map(|k| k.len()).unwrap_or(0);
        if let Some(bad) = keys.iter().find(|k| k.len() != len) {
            return Err(length_err!(
                "Group keys have different lengths: {len} and {}",
                bad.len()
            ));
        }

        let mut ids = Vec::with_capacity(len);
        for row in 0..len {
            let key: Vec<ScalarValue> = keys.iter().map(|k| k.get_value(row)).collect();
            let next = self.keys.len();
            let id = *self.ids.entry(key).or_insert_with_key(|key| {
                self.keys.push(key.clone());
                next
            });
            ids.push(id);
        }
        Ok(ids)
    }

    /// Key tuples indexed by group id.
    pub fn keys(&self) -> &[Vec<ScalarValue>] {
        &self.keys
    }

    /// Permutation of group ids giving the requested output order.
    pub fn output_order(&self, num_key_columns: usize, order: GroupOrder) -> Result<Vec<usize>> {
        match order {
            GroupOrder::FirstOccurrence => Ok((0..self.keys.len()).collect()),
            GroupOrder::Sorted => {
                let columns = (0..num_key_columns)
                    .map(|col| {
                        Array::try_from_scalars_infer(
                            self.keys.iter().map(|key| key[col].clone()).collect(),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&Array> = columns.iter().collect();
                let options = vec![SortOptions::default(); refs.len()];
                arg_sort_multi(&refs, &options)
            }
        }
    }
}

/// Partition of a table's rows into groups.
///
/// Each group holds the indices of its rows in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupContext {
    groups: Vec<Vec<usize>>,
    height: usize,
}

impl GroupContext {
    /// Partition rows by the values of the key arrays. No keys puts every
    /// row in a single group.
    pub fn try_from_keys(keys: &[&Array], height: usize, order: GroupOrder) -> Result<Self> {
        if keys.is_empty() {
            return Ok(Self::single(height));
        }

        let mut table = GroupTable::new();
        let ids = table.insert(keys)?;
        if ids.len() != height {
            return Err(length_err!(
                "Group keys have length {}, table has {height} rows",
                ids.len()
            ));
        }

        let mut groups = vec![Vec::new(); table.num_groups()];
        for (row, id) in ids.into_iter().enumerate() {
            groups[id].push(row);
        }

        let groups = match order {
            GroupOrder::FirstOccurrence => groups,
            GroupOrder::Sorted => {
                let perm = table.output_order(keys.len(), order)?;
                let mut slots: Vec<Option<Vec<usize>>> = groups.into_iter().map(Some).collect();
                perm.into_iter()
                    .filter_map(|id| slots[id].take())
                    .collect()
            }
        };

        Ok(GroupContext { groups, height })
    }

    pub fn single(height: usize) -> Self {
        GroupContext {
            groups: vec![(0..height).collect()],
            height,
        }
    }

    pub fn from_groups(groups: Vec<Vec<usize>>, height: usize) -> Self {
        GroupContext { groups, height }
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Rows of the partitioned table.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn group(&self, idx: usize) -> &[usize] {
        &self.groups[idx]
    }

    /// First row of every group, used to carry the key values through.
    pub fn first_rows(&self) -> Vec<usize> {
        self.groups
            .iter()
            .map(|rows| rows.first().copied().unwrap_or(0))
            .collect()
    }

    pub fn group_sizes(&self) -> Array {
        Array::from(
            self.groups
                .iter()
                .map(|rows| rows.len() as u32)
                .collect::<Vec<_>>(),
        )
    }

    /// Group index of every row.
    pub fn row_to_group(&self) -> Vec<usize> {
        let mut mapping = vec![0; self.height];
        for (group, rows) in self.groups.iter().enumerate() {
            for &row in rows {
                mapping[row] = group;
            }
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_order() {
        let keys = Array::from(vec!["b", "a", "b", "c"]);
        let ctx = GroupContext::try_from_keys(&[&keys], 4, GroupOrder::FirstOccurrence).unwrap();
        assert_eq!(&[vec![0, 2], vec![1], vec![3]], ctx.groups());
        assert_eq!(vec![0, 1, 0, 2], ctx.row_to_group());
    }

    #[test]
    fn sorted_order_nulls_first() {
        let keys = Array::from(vec![Some(3_i64), None, Some(1), Some(3)]);
        let ctx = GroupContext::try_from_keys(&[&keys], 4, GroupOrder::Sorted).unwrap();
        assert_eq!(&[vec![1], vec![2], vec![0, 3]], ctx.groups());
        assert_eq!(Array::from(vec![1_u32, 1, 2]), ctx.group_sizes());
    }

    #[test]
    fn multiple_keys() {
        let a = Array::from(vec![1_i64, 1, 2, 1]);
        let b = Array::from(vec!["x", "y", "x", "x"]);
        let ctx = GroupContext::try_from_keys(&[&a, &b], 4, GroupOrder::Sorted).unwrap();
        assert_eq!(&[vec![0, 3], vec![1], vec![2]], ctx.groups());
        assert_eq!(vec![0, 1, 2], ctx.first_rows());
    }

    #[test]
    fn no_keys_single_group() {
        let ctx = GroupContext::try_from_keys(&[], 3, GroupOrder::Sorted).unwrap();
        assert_eq!(1, ctx.len());
        assert_eq!(&[0, 1, 2], ctx.group(0));
    }

    #[test]
    fn group_table_incremental() {
        let mut table = GroupTable::new();
        let ids = table.insert(&[&Array::from(vec![6_i64, 5])]).unwrap();
        assert_eq!(vec![0, 1], ids);
        let ids = table.insert(&[&Array::from(vec![5_i64, 7, 6])]).unwrap();
        assert_eq!(vec![1, 2, 0], ids);
        assert_eq!(vec![1, 0, 2], table.output_order(1, GroupOrder::Sorted).unwrap());
    }
}
