use std::fmt;

use indexmap::IndexMap;
use tabula_error::{Result, schema_err};

use super::datatype::DataType;

/// Ordered mapping of column names to types.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: IndexMap<String, DataType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema, failing on duplicate names.
    pub fn try_from_fields<S: Into<String>>(
        fields: impl IntoIterator<Item = (S, DataType)>,
    ) -> Result<Self> {
        let mut schema = Schema::new();
        for (name, datatype) in fields {
            let name = name.into();
            if schema.contains(&name) {
                return Err(schema_err!("Duplicate column name '{name}'"));
            }
            schema.fields.insert(name, datatype);
        }
        Ok(schema)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.fields.get(name)
    }

    /// Get a column's type, failing with a schema error if it doesn't exist.
    pub fn try_get(&self, name: &str) -> Result<&DataType> {
        self.get(name)
            .ok_or_else(|| schema_err!("Column '{name}' not found in schema {self}"))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace a field. Replaced fields keep their position.
    pub fn insert(&mut self, name: impl Into<String>, datatype: DataType) {
        self.fields.insert(name.into(), datatype);
    }

    /// Keep only the given names, in the given order.
    pub fn project(&self, names: &[String]) -> Result<Schema> {
        Schema::try_from_fields(
            names
                .iter()
                .map(|name| Ok((name.clone(), self.try_get(name)?.clone())))
                .collect::<Result<Vec<_>>>()?,
        )
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (name, datatype)) in self.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {datatype}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn ordered_and_unique() {
        let schema =
            Schema::try_from_fields([("b", DataType::Int64), ("a", DataType::Utf8)]).unwrap();
        assert_eq!(vec!["b", "a"], schema.names().collect::<Vec<_>>());
        assert_eq!("{b: Int64, a: Utf8}", schema.to_string());

        let err = Schema::try_from_fields([("a", DataType::Int64), ("a", DataType::Utf8)])
            .unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }

    #[test]
    fn missing_column() {
        let schema = Schema::try_from_fields([("a", DataType::Int64)]).unwrap();
        assert_eq!(ErrorKind::Schema, schema.try_get("b").unwrap_err().kind());
    }
}
