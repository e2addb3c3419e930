//! Opaque user functions embedded in expressions.
//!
//! User functions compare equal only when they share the same allocation,
//! two closures with identical bodies are different functions.
use std::fmt;
use std::sync::Arc;

use tabula_error::Result;

use crate::arrays::array::Array;

type ArrayFn = dyn Fn(&Array) -> Result<Array> + Send + Sync;
type BinaryArrayFn = dyn Fn(&Array, &Array) -> Result<Array> + Send + Sync;
type RenameFn = dyn Fn(&str) -> String + Send + Sync;

/// A function from one array to another, used by `map` and `apply`.
#[derive(Clone)]
pub struct Udf {
    name: String,
    func: Arc<ArrayFn>,
}

impl Udf {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Array) -> Result<Array> + Send + Sync + 'static,
    {
        Self::named("udf", func)
    }

    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Array) -> Result<Array> + Send + Sync + 'static,
    {
        Udf {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, input: &Array) -> Result<Array> {
        (self.func)(input)
    }
}

impl PartialEq for Udf {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Udf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Udf").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Combining function for folds, `acc = f(acc, next)`.
#[derive(Clone)]
pub struct FoldUdf {
    func: Arc<BinaryArrayFn>,
}

impl FoldUdf {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Array, &Array) -> Result<Array> + Send + Sync + 'static,
    {
        FoldUdf {
            func: Arc::new(func),
        }
    }

    pub fn call(&self, acc: &Array, next: &Array) -> Result<Array> {
        (self.func)(acc, next)
    }
}

impl PartialEq for FoldUdf {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for FoldUdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FoldUdf").finish_non_exhaustive()
    }
}

/// Rewrites an output name.
#[derive(Clone)]
pub enum NameMapper {
    Prefix(String),
    Suffix(String),
    Map(Arc<RenameFn>),
}

impl NameMapper {
    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::Prefix(prefix) => format!("{prefix}{name}"),
            Self::Suffix(suffix) => format!("{name}{suffix}"),
            Self::Map(f) => f(name),
        }
    }
}

impl PartialEq for NameMapper {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::Suffix(a), Self::Suffix(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for NameMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Suffix(suffix) => f.debug_tuple("Suffix").field(suffix).finish(),
            Self::Map(_) => f.debug_tuple("Map").finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for NameMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "prefix(\"{prefix}\")"),
            Self::Suffix(suffix) => write!(f, "suffix(\"{suffix}\")"),
            Self::Map(_) => write!(f, "map()"),
        }
    }
}
