//! Error type shared across all tabula crates.
use std::error::Error as StdError;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Maximum number of offending values kept on a cast error.
pub const MAX_CAST_ERROR_VALUES: usize = 10;

/// Broad category of an error.
///
/// `Context` layers are transparent to the kind, a schema error wrapped in
/// any number of contexts is still a schema error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Schema,
    Type,
    LengthMismatch,
    Cast,
    WindowShape,
    UnsupportedPushdown,
    Source,
    Compute,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "SchemaError"),
            Self::Type => write!(f, "TypeError"),
            Self::LengthMismatch => write!(f, "LengthMismatchError"),
            Self::Cast => write!(f, "CastError"),
            Self::WindowShape => write!(f, "WindowShapeError"),
            Self::UnsupportedPushdown => write!(f, "UnsupportedPushdownError"),
            Self::Source => write!(f, "SourceError"),
            Self::Compute => write!(f, "ComputeError"),
            Self::Config => write!(f, "ConfigError"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Duplicate or missing column names, name collisions in outputs.
    #[error("schema error: {0}")]
    Schema(String),

    /// Operation applied to an incompatible type.
    #[error("type error: {0}")]
    Type(String),

    #[error("length mismatch: {0}")]
    LengthMismatch(String),

    /// Strict cast hit values it could not convert.
    #[error("cast error: {msg}, failed values: [{}]", .values.join(", "))]
    Cast { msg: String, values: Vec<String> },

    #[error("window shape error: {0}")]
    WindowShape(String),

    /// Raised by optimizer rules when a rewrite does not apply. Never leaves
    /// the optimizer.
    #[error("pushdown not supported: {0}")]
    UnsupportedPushdown(String),

    #[error("source error: {msg}")]
    Source {
        msg: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("compute error: {0}")]
    Compute(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DbError>,
    },
}

impl DbError {
    pub fn schema(msg: impl Into<String>) -> Self {
        DbError::Schema(msg.into())
    }

    pub fn type_err(msg: impl Into<String>) -> Self {
        DbError::Type(msg.into())
    }

    pub fn length_mismatch(msg: impl Into<String>) -> Self {
        DbError::LengthMismatch(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        DbError::Compute(msg.into())
    }

    pub fn cast(msg: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        DbError::Cast {
            msg: msg.into(),
            values: values.into_iter().take(MAX_CAST_ERROR_VALUES).collect(),
        }
    }

    pub fn source(msg: impl Into<String>) -> Self {
        DbError::Source {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn source_with(
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        DbError::Source {
            msg: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap this error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DbError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Schema,
            Self::Type(_) => ErrorKind::Type,
            Self::LengthMismatch(_) => ErrorKind::LengthMismatch,
            Self::Cast { .. } => ErrorKind::Cast,
            Self::WindowShape(_) => ErrorKind::WindowShape,
            Self::UnsupportedPushdown(_) => ErrorKind::UnsupportedPushdown,
            Self::Source { .. } => ErrorKind::Source,
            Self::Compute(_) => ErrorKind::Compute,
            Self::Config(_) => ErrorKind::Config,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Get the innermost error, skipping all context layers.
    pub fn root(&self) -> &DbError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Offending values carried by a cast error, empty for anything else.
    pub fn cast_values(&self) -> &[String] {
        match self.root() {
            Self::Cast { values, .. } => values,
            _ => &[],
        }
    }
}

/// Attach context to errors.
pub trait ResultExt<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(msg))
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

pub trait OptionExt<T> {
    /// Return a schema error naming what was missing.
    fn required(self, what: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, what: &str) -> Result<T> {
        self.ok_or_else(|| DbError::Schema(format!("Missing required '{what}'")))
    }
}

#[macro_export]
macro_rules! schema_err {
    ($($arg:tt)*) => {
        $crate::DbError::Schema(std::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! type_err {
    ($($arg:tt)*) => {
        $crate::DbError::Type(std::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! compute_err {
    ($($arg:tt)*) => {
        $crate::DbError::Compute(std::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! length_err {
    ($($arg:tt)*) => {
        $crate::DbError::LengthMismatch(std::format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_through_context() {
        let err = DbError::schema("missing column 'a'")
            .with_context("select")
            .with_context("collect");
        assert_eq!(ErrorKind::Schema, err.kind());
        assert_eq!(
            "collect: select: schema error: missing column 'a'",
            err.to_string()
        );
    }

    #[test]
    fn cast_values_truncated() {
        let err = DbError::cast("to Float64", (0..20).map(|v| v.to_string()));
        assert_eq!(MAX_CAST_ERROR_VALUES, err.cast_values().len());
        assert_eq!(ErrorKind::Cast, err.kind());
    }

    #[test]
    fn result_context() {
        let res: Result<()> = Err(type_err!("cannot add Utf8 and Int64"));
        let err = res.context("expression 'a + b'").unwrap_err();
        assert_eq!(ErrorKind::Type, err.kind());
        assert!(err.to_string().starts_with("expression 'a + b'"));
    }

    #[test]
    fn option_required() {
        let v: Option<i32> = None;
        let err = v.required("column 'x'").unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }
}
