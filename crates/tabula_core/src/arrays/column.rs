use std::sync::Arc;

use super::array::Array;
use super::datatype::DataType;

/// A named array.
///
/// The array is reference counted, cloning a column or a table holding it is
/// cheap and never copies values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    array: Arc<Array>,
}

impl Column {
    pub fn new(name: impl Into<String>, array: impl Into<Arc<Array>>) -> Self {
        Column {
            name: name.into(),
            array: array.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn array(&self) -> &Array {
        &self.array
    }

    pub fn array_arc(&self) -> &Arc<Array> {
        &self.array
    }

    pub fn datatype(&self) -> &DataType {
        self.array.datatype()
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_array(self, array: Array) -> Self {
        Column::new(self.name, array)
    }
}
