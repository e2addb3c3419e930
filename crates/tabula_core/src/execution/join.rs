//! Hash equi-join.
//!
//! The right input is the build side. Probing walks the left input in row
//! order, so output rows follow the left input's order, with multiple
//! matches in right input order.
use std::fmt;

use ahash::RandomState;
use hashbrown::HashMap;
use tabula_error::{Result, ResultExt, length_err, schema_err};

use crate::arrays::array::Array;
use crate::arrays::column::Column;
use crate::arrays::compute::cast::cast;
use crate::arrays::datatype::DataType;
use crate::arrays::field::Schema;
use crate::arrays::scalar::ScalarValue;
use crate::arrays::table::Table;

/// Suffix added to right columns whose name is taken by a left column.
pub const RIGHT_SUFFIX: &str = "_right";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    /// Keep unmatched left rows, with nulls for the right columns.
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
        }
    }
}

fn check_keys(left: &Schema, right: &Schema, left_on: &[String], right_on: &[String]) -> Result<()> {
    if left_on.is_empty() || left_on.len() != right_on.len() {
        return Err(length_err!(
            "Join needs the same non-zero number of keys on both sides, got {} and {}",
            left_on.len(),
            right_on.len()
        ));
    }
    for name in left_on {
        left.try_get(name)?;
    }
    for name in right_on {
        right.try_get(name)?;
    }
    Ok(())
}

/// Output name of a right column, `None` for right keys which are dropped.
pub fn right_output_name(left: &Schema, right_on: &[String], name: &str) -> Option<String> {
    if right_on.iter().any(|k| k == name) {
        return None;
    }
    if left.contains(name) {
        Some(format!("{name}{RIGHT_SUFFIX}"))
    } else {
        Some(name.to_string())
    }
}

pub fn join_schema(
    left: &Schema,
    right: &Schema,
    left_on: &[String],
    right_on: &[String],
) -> Result<Schema> {
    check_keys(left, right, left_on, right_on)?;
    let mut schema = left.clone();
    for (name, datatype) in right.iter() {
        if let Some(out) = right_output_name(left, right_on, name) {
            if schema.contains(&out) {
                return Err(schema_err!("Duplicate join output column '{out}'"));
            }
            schema.insert(out, datatype.clone());
        }
    }
    Ok(schema)
}

fn key_arrays(table: &Table, names: &[String], types: &[DataType]) -> Result<Vec<Array>> {
    names
        .iter()
        .zip(types)
        .map(|(name, datatype)| {
            let arr = table.column(name)?.array();
            if arr.datatype() == datatype {
                Ok(arr.clone())
            } else {
                cast(arr, datatype, true)
            }
        })
        .collect()
}

/// Row key, `None` if any key value is null. Null keys never match.
fn row_key(keys: &[Array], row: usize) -> Option<Vec<ScalarValue>> {
    let key: Vec<ScalarValue> = keys.iter().map(|k| k.get_value(row)).collect();
    if key.iter().any(ScalarValue::is_null) {
        None
    } else {
        Some(key)
    }
}

/// Hash table over the right input.
#[derive(Debug)]
pub struct JoinHashTable {
    right: Table,
    right_on: Vec<String>,
    key_types: Vec<DataType>,
    rows: HashMap<Vec<ScalarValue>, Vec<usize>, RandomState>,
}

impl JoinHashTable {
    /// Build the table. Key types are unified with the left key types so
    /// keys compare by value.
    pub fn build(
        left_schema: &Schema,
        right: Table,
        left_on: &[String],
        right_on: &[String],
    ) -> Result<Self> {
        let right_schema = right.schema();
        check_keys(left_schema, &right_schema, left_on, right_on)?;

        let key_types = left_on
            .iter()
            .zip(right_on)
            .map(|(l, r)| DataType::supertype(left_schema.try_get(l)?, right_schema.try_get(r)?))
            .collect::<Result<Vec<_>>>()
            .context("join keys")?;

        let keys = key_arrays(&right, right_on, &key_types)?;
        let mut rows: HashMap<Vec<ScalarValue>, Vec<usize>, RandomState> = HashMap::default();
        for row in 0..right.height() {
            if let Some(key) = row_key(&keys, row) {
                rows.entry(key).or_default().push(row);
            }
        }
        tracing::trace!(rows = right.height(), keys = rows.len(), "built join hash table");

        Ok(JoinHashTable {
            right,
            right_on: right_on.to_vec(),
            key_types,
            rows,
        })
    }

    pub fn probe(&self, left: &Table, left_on: &[String], join_type: JoinType) -> Result<Table> {
        let keys = key_arrays(left, left_on, &self.key_types)?;

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for row in 0..left.height() {
            let matches = row_key(&keys, row).and_then(|key| self.rows.get(&key));
            match matches {
                Some(matches) => {
                    for &right_row in matches {
                        left_rows.push(row);
                        right_rows.push(Some(right_row));
                    }
                }
                None if join_type == JoinType::Left => {
                    left_rows.push(row);
                    right_rows.push(None);
                }
                None => (),
            }
        }

        let left_schema = left.schema();
        let mut columns = left.take(&left_rows).into_columns();
        for column in self.right.columns() {
            if let Some(name) = right_output_name(&left_schema, &self.right_on, column.name()) {
                columns.push(Column::new(name, column.array().take_opt(&right_rows)));
            }
        }
        Table::try_new_with_height(columns, left_rows.len())
    }
}

pub fn hash_join(
    left: &Table,
    right: &Table,
    left_on: &[String],
    right_on: &[String],
    join_type: JoinType,
) -> Result<Table> {
    let table = JoinHashTable::build(&left.schema(), right.clone(), left_on, right_on)?;
    table.probe(left, left_on, join_type)
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn left() -> Table {
        Table::try_from_pairs([
            ("id", Array::from(vec![Some(1_i64), Some(2), None, Some(3)])),
            ("v", Array::from(vec!["a", "b", "c", "d"])),
        ])
        .unwrap()
    }

    fn right() -> Table {
        Table::try_from_pairs([
            ("key", Array::from(vec![Some(3_i32), Some(1), Some(1), None])),
            ("v", Array::from(vec!["x", "y", "z", "n"])),
        ])
        .unwrap()
    }

    #[test]
    fn inner_join_left_order() {
        let out = hash_join(&left(), &right(), &names(&["id"]), &names(&["key"]), JoinType::Inner).unwrap();
        assert_eq!(vec!["id", "v", "v_right"], out.column_names());
        assert_eq!(&Array::from(vec![1_i64, 1, 3]), out.column("id").unwrap().array());
        assert_eq!(&Array::from(vec!["y", "z", "x"]), out.column("v_right").unwrap().array());
    }

    #[test]
    fn left_join_keeps_unmatched() {
        let out = hash_join(&left(), &right(), &names(&["id"]), &names(&["key"]), JoinType::Left).unwrap();
        assert_eq!(5, out.height());
        assert_eq!(
            &Array::from(vec![Some("y"), Some("z"), None, None, Some("x")]),
            out.column("v_right").unwrap().array()
        );
    }

    #[test]
    fn bad_keys() {
        let err = hash_join(&left(), &right(), &names(&["id"]), &names(&["missing"]), JoinType::Inner)
            .unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());

        let err = hash_join(&left(), &right(), &names(&[]), &names(&[]), JoinType::Inner).unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());
    }
}
