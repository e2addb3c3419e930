//! Schema predicates that resolve to concrete column names.
use std::fmt;
use std::ops::{BitAnd, BitOr, Not, Sub};

use regex::Regex;
use tabula_error::{DbError, Result, schema_err};

use super::Expr;
use super::expand::{expand_exprs, output_name};
use crate::arrays::datatype::DataType;
use crate::arrays::field::Schema;

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    ByName(Vec<String>),
    ByDtype(Vec<DataType>),
    /// Positions into the schema, negative counts from the end.
    ByIndex(Vec<i64>),
    /// Regex matched against the full name.
    Matches(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Integer,
    Float,
    Numeric,
    Temporal,
    String,
    Boolean,
    First,
    Last,
    All,
    Union(Box<Selector>, Box<Selector>),
    Intersect(Box<Selector>, Box<Selector>),
    Difference(Box<Selector>, Box<Selector>),
    Complement(Box<Selector>),
}

impl Selector {
    /// Resolve to the selected column names, in schema order.
    pub fn resolve(&self, schema: &Schema) -> Result<Vec<String>> {
        let mask = self.mask(schema)?;
        Ok(schema
            .names()
            .zip(mask)
            .filter_map(|(name, selected)| selected.then(|| name.to_string()))
            .collect())
    }

    pub fn as_expr(&self) -> Expr {
        Expr::Selector(self.clone())
    }

    fn mask(&self, schema: &Schema) -> Result<Vec<bool>> {
        let by_type = |f: fn(&DataType) -> bool| -> Vec<bool> {
            schema.iter().map(|(_, datatype)| f(datatype)).collect()
        };
        let by_name = |f: &dyn Fn(&str) -> bool| -> Vec<bool> {
            schema.names().map(f).collect()
        };

        Ok(match self {
            Self::ByName(names) => {
                for name in names {
                    schema.try_get(name)?;
                }
                by_name(&|name| names.iter().any(|n| n == name))
            }
            Self::ByDtype(datatypes) => schema
                .iter()
                .map(|(_, datatype)| datatypes.contains(datatype))
                .collect(),
            Self::ByIndex(indices) => {
                let mut mask = vec![false; schema.len()];
                for &idx in indices {
                    let pos = resolve_index(idx, schema.len())?;
                    mask[pos] = true;
                }
                mask
            }
            Self::Matches(pattern) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| schema_err!("Invalid selector pattern '{pattern}': {e}"))?;
                by_name(&|name| regex.is_match(name))
            }
            Self::Contains(sub) => by_name(&|name| name.contains(sub.as_str())),
            Self::StartsWith(prefix) => by_name(&|name| name.starts_with(prefix.as_str())),
            Self::EndsWith(suffix) => by_name(&|name| name.ends_with(suffix.as_str())),
            Self::Integer => by_type(DataType::is_integer),
            Self::Float => by_type(DataType::is_float),
            Self::Numeric => by_type(DataType::is_numeric),
            Self::Temporal => by_type(DataType::is_temporal),
            Self::String => by_type(DataType::is_string),
            Self::Boolean => by_type(DataType::is_boolean),
            Self::First => (0..schema.len()).map(|idx| idx == 0).collect(),
            Self::Last => (0..schema.len())
                .map(|idx| idx + 1 == schema.len())
                .collect(),
            Self::All => vec![true; schema.len()],
            Self::Union(a, b) => zip_masks(a.mask(schema)?, b.mask(schema)?, |a, b| a || b),
            Self::Intersect(a, b) => zip_masks(a.mask(schema)?, b.mask(schema)?, |a, b| a && b),
            Self::Difference(a, b) => zip_masks(a.mask(schema)?, b.mask(schema)?, |a, b| a && !b),
            Self::Complement(a) => a.mask(schema)?.into_iter().map(|v| !v).collect(),
        })
    }
}

fn zip_masks(a: Vec<bool>, b: Vec<bool>, f: impl Fn(bool, bool) -> bool) -> Vec<bool> {
    a.into_iter().zip(b).map(|(a, b)| f(a, b)).collect()
}

/// Resolve a possibly negative position into the schema.
pub(crate) fn resolve_index(idx: i64, len: usize) -> Result<usize> {
    let pos = if idx < 0 { len as i64 + idx } else { idx };
    if pos < 0 || pos >= len as i64 {
        return Err(DbError::schema(format!(
            "Column index {idx} out of range for {len} columns"
        )));
    }
    Ok(pos as usize)
}

pub fn by_name<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Selector {
    Selector::ByName(names.into_iter().map(Into::into).collect())
}

pub fn by_dtype(datatypes: impl IntoIterator<Item = DataType>) -> Selector {
    Selector::ByDtype(datatypes.into_iter().collect())
}

pub fn by_index(indices: impl IntoIterator<Item = i64>) -> Selector {
    Selector::ByIndex(indices.into_iter().collect())
}

pub fn matches(pattern: impl Into<String>) -> Selector {
    Selector::Matches(pattern.into())
}

pub fn contains(sub: impl Into<String>) -> Selector {
    Selector::Contains(sub.into())
}

pub fn starts_with(prefix: impl Into<String>) -> Selector {
    Selector::StartsWith(prefix.into())
}

pub fn ends_with(suffix: impl Into<String>) -> Selector {
    Selector::EndsWith(suffix.into())
}

pub fn integer() -> Selector {
    Selector::Integer
}

pub fn float() -> Selector {
    Selector::Float
}

pub fn numeric() -> Selector {
    Selector::Numeric
}

pub fn temporal() -> Selector {
    Selector::Temporal
}

pub fn string() -> Selector {
    Selector::String
}

pub fn boolean() -> Selector {
    Selector::Boolean
}

pub fn first() -> Selector {
    Selector::First
}

pub fn last() -> Selector {
    Selector::Last
}

pub fn all() -> Selector {
    Selector::All
}

/// Names an expression produces once expanded against a schema.
pub fn expand_selector(schema: &Schema, expr: &Expr) -> Result<Vec<String>> {
    expand_exprs(std::slice::from_ref(expr), schema)?
        .iter()
        .map(output_name)
        .collect()
}

/// Whether the expression is a bare selector, not wrapped by anything.
pub fn is_selector(expr: &Expr) -> bool {
    matches!(expr, Expr::Selector(_))
}

impl BitOr for Selector {
    type Output = Selector;

    fn bitor(self, rhs: Self) -> Self::Output {
        Selector::Union(Box::new(self), Box::new(rhs))
    }
}

impl BitAnd for Selector {
    type Output = Selector;

    fn bitand(self, rhs: Self) -> Self::Output {
        Selector::Intersect(Box::new(self), Box::new(rhs))
    }
}

impl Sub for Selector {
    type Output = Selector;

    fn sub(self, rhs: Self) -> Self::Output {
        Selector::Difference(Box::new(self), Box::new(rhs))
    }
}

impl Not for Selector {
    type Output = Selector;

    fn not(self) -> Self::Output {
        Selector::Complement(Box::new(self))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Debug>(items: &[T]) -> String {
            items
                .iter()
                .map(|item| format!("{item:?}"))
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            Self::ByName(names) => write!(f, "cs.by_name({})", list(names)),
            Self::ByDtype(datatypes) => {
                let types: Vec<_> = datatypes.iter().map(|d| d.to_string()).collect();
                write!(f, "cs.by_dtype({})", types.join(", "))
            }
            Self::ByIndex(indices) => write!(f, "cs.by_index({})", list(indices)),
            Self::Matches(pattern) => write!(f, "cs.matches({pattern:?})"),
            Self::Contains(sub) => write!(f, "cs.contains({sub:?})"),
            Self::StartsWith(prefix) => write!(f, "cs.starts_with({prefix:?})"),
            Self::EndsWith(suffix) => write!(f, "cs.ends_with({suffix:?})"),
            Self::Integer => write!(f, "cs.integer()"),
            Self::Float => write!(f, "cs.float()"),
            Self::Numeric => write!(f, "cs.numeric()"),
            Self::Temporal => write!(f, "cs.temporal()"),
            Self::String => write!(f, "cs.string()"),
            Self::Boolean => write!(f, "cs.boolean()"),
            Self::First => write!(f, "cs.first()"),
            Self::Last => write!(f, "cs.last()"),
            Self::All => write!(f, "cs.all()"),
            Self::Union(a, b) => write!(f, "({a} | {b})"),
            Self::Intersect(a, b) => write!(f, "({a} & {b})"),
            Self::Difference(a, b) => write!(f, "({a} - {b})"),
            Self::Complement(a) => write!(f, "~{a}"),
        }
    }
}
