use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tabula_error::{Result, length_err, schema_err};

use super::group::GroupContext;
use crate::arrays::array::Array;
use crate::arrays::datatype::DataType;
use crate::config::execution::ExecutionConfig;

/// Result of evaluating an expression, shaped by the context it ran in.
#[derive(Debug, Clone, PartialEq)]
pub enum AggState {
    /// Values aligned with the input rows of an ungrouped context.
    Flat(Array),
    /// Values per group, not reduced. Group lengths may differ from the
    /// group sizes after filters or slices.
    Grouped {
        values: Vec<Array>,
        datatype: DataType,
    },
    /// Exactly one value per group.
    Aggregated(Array),
    /// A single value independent of rows and groups.
    Literal(Array),
}

impl AggState {
    pub fn datatype(&self) -> &DataType {
        match self {
            Self::Flat(arr) | Self::Aggregated(arr) | Self::Literal(arr) => arr.datatype(),
            Self::Grouped { datatype, .. } => datatype,
        }
    }

    pub fn grouped(values: Vec<Array>, datatype: DataType) -> Self {
        AggState::Grouped { values, datatype }
    }

    /// Input for a single group.
    pub fn group_input(&self, group: usize) -> Array {
        match self {
            Self::Grouped { values, .. } => values[group].clone(),
            Self::Aggregated(arr) => arr.slice(group, 1),
            Self::Flat(arr) | Self::Literal(arr) => arr.clone(),
        }
    }

    /// Zero length input of the right type, used to find the output type
    /// when there are no groups.
    pub fn empty_input(&self) -> Array {
        match self {
            Self::Grouped { datatype, .. } => Array::new_null(datatype, 0),
            Self::Flat(arr) | Self::Aggregated(arr) => arr.slice(0, 0),
            Self::Literal(arr) => arr.clone(),
        }
    }

    /// Result of an ungrouped evaluation.
    pub fn into_array(self) -> Result<Array> {
        match self {
            Self::Flat(arr) | Self::Literal(arr) | Self::Aggregated(arr) => Ok(arr),
            Self::Grouped { .. } => Err(schema_err!(
                "Grouped values cannot be used outside of a grouped context"
            )),
        }
    }

    /// One output row per group. Values that were not aggregated become a
    /// list per group.
    pub fn finalize_groups(self, num_groups: usize) -> Result<Array> {
        match self {
            Self::Aggregated(arr) => Ok(arr),
            Self::Literal(arr) => arr.broadcast(num_groups),
            Self::Grouped { values, datatype } => {
                Array::try_new_list(DataType::list(datatype), values.into_iter().map(Some).collect())
            }
            Self::Flat(arr) => {
                if arr.len() != num_groups {
                    return Err(length_err!(
                        "Expected {num_groups} values, one per group, got {}",
                        arr.len()
                    ));
                }
                Ok(arr)
            }
        }
    }
}

type PartitionSlot = Arc<Mutex<Option<Arc<GroupContext>>>>;

/// State shared by every expression evaluated in one context call.
///
/// Holds the window partition cache, so window expressions partitioned by
/// the same keys compute the partition once per call.
#[derive(Debug)]
pub struct ExecutionState {
    parallel: bool,
    partitions: Mutex<HashMap<String, PartitionSlot>>,
    partitions_computed: AtomicUsize,
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ExecutionState {
    pub fn new(parallel: bool) -> Self {
        ExecutionState {
            parallel,
            partitions: Mutex::new(HashMap::new()),
            partitions_computed: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.parallel)
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    /// Number of window partitions computed so far.
    pub fn window_partitions_computed(&self) -> usize {
        self.partitions_computed.load(Ordering::Relaxed)
    }

    /// Get the partition for a key, computing it if this is the first
    /// request.
    ///
    /// Concurrent requests for the same key wait on the one computing it.
    pub fn window_partition<F>(&self, key: &str, compute: F) -> Result<Arc<GroupContext>>
    where
        F: FnOnce() -> Result<GroupContext>,
    {
        let slot = {
            let mut partitions = self.partitions.lock();
            match partitions.get(key) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = PartitionSlot::default();
                    partitions.insert(key.to_string(), slot.clone());
                    slot
                }
            }
        };

        let mut slot = slot.lock();
        if let Some(groups) = slot.as_ref() {
            return Ok(groups.clone());
        }

        let groups = Arc::new(compute()?);
        self.partitions_computed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%key, groups = groups.len(), "computed window partition");
        *slot = Some(groups.clone());
        Ok(groups)
    }

    /// Drop cached partitions. The cache is only valid for one input table.
    pub fn clear_window_cache(&self) {
        self.partitions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_computed_once() {
        let state = ExecutionState::new(false);
        let first = state
            .window_partition("[col(\"g\")]", || Ok(GroupContext::single(3)))
            .unwrap();
        let second = state
            .window_partition("[col(\"g\")]", || panic!("should be cached"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, state.window_partitions_computed());

        state
            .window_partition("[col(\"h\")]", || Ok(GroupContext::single(3)))
            .unwrap();
        assert_eq!(2, state.window_partitions_computed());
    }

    #[test]
    fn finalize_grouped_implodes() {
        let state = AggState::grouped(
            vec![Array::from(vec![1_i64, 2]), Array::from(vec![3_i64])],
            DataType::Int64,
        );
        let out = state.finalize_groups(2).unwrap();
        assert_eq!(&DataType::list(DataType::Int64), out.datatype());
        assert_eq!(2, out.len());

        let lit = AggState::Literal(Array::from(vec![7_i64]));
        assert_eq!(Array::from(vec![7_i64, 7, 7]), lit.finalize_groups(3).unwrap());
    }
}
