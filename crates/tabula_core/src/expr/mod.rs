//! Expression trees.
//!
//! An expression describes how to compute one output column from the
//! columns of an input table. Expressions are plain data: they can be built,
//! displayed, compared and rewritten before anything is evaluated.
//! Evaluation lives in `context`.
pub mod expand;
pub mod function;
pub mod selector;
pub mod udf;

use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Rem, Sub};

use function::{FunctionExpr, ListFunction, StringFunction, TemporalFunction};
use selector::Selector;
use tabula_error::Result;
use udf::{FoldUdf, NameMapper, Udf};

use crate::arrays::array::Array;
use crate::arrays::compute::aggregate::AggKind;
use crate::arrays::compute::arith::{self, ArithOp};
use crate::arrays::compute::boolean::{self, BoolOp};
use crate::arrays::compute::cmp::{self, CmpOp};
use crate::arrays::compute::fill::FillStrategy;
use crate::arrays::compute::sort::SortOptions;
use crate::arrays::compute::temporal::DatePart;
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

/// Name of the column holding a row's list values inside `list().eval(..)`.
pub const ELEMENT_NAME: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    TrueDivide,
    FloorDivide,
    Modulus,
    And,
    Or,
    Xor,
}

impl Operator {
    pub fn evaluate(&self, left: &Array, right: &Array) -> Result<Array> {
        match self {
            Self::Eq => cmp::compare(CmpOp::Eq, left, right),
            Self::NotEq => cmp::compare(CmpOp::NotEq, left, right),
            Self::Lt => cmp::compare(CmpOp::Lt, left, right),
            Self::LtEq => cmp::compare(CmpOp::LtEq, left, right),
            Self::Gt => cmp::compare(CmpOp::Gt, left, right),
            Self::GtEq => cmp::compare(CmpOp::GtEq, left, right),
            Self::Plus => arith::arith(ArithOp::Add, left, right),
            Self::Minus => arith::arith(ArithOp::Sub, left, right),
            Self::Multiply => arith::arith(ArithOp::Mul, left, right),
            Self::TrueDivide => arith::arith(ArithOp::Div, left, right),
            Self::FloorDivide => arith::arith(ArithOp::FloorDiv, left, right),
            Self::Modulus => arith::arith(ArithOp::Rem, left, right),
            Self::And => boolean::boolean_op(BoolOp::And, left, right),
            Self::Or => boolean::boolean_op(BoolOp::Or, left, right),
            Self::Xor => boolean::boolean_op(BoolOp::Xor, left, right),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::TrueDivide => "/",
            Self::FloorDivide => "//",
            Self::Modulus => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        };
        write!(f, "{s}")
    }
}

/// How per-group window results are mapped back onto the input rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WindowMapping {
    /// One value per input row. Aggregated results are broadcast over the
    /// group, other results must have the group's length.
    #[default]
    GroupToRows,
    /// Every row of a group gets the group's whole result as a list.
    Join,
    /// Group results are concatenated, changing the row count.
    Explode,
}

impl fmt::Display for WindowMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupToRows => write!(f, "group_to_rows"),
            Self::Join => write!(f, "join"),
            Self::Explode => write!(f, "explode"),
        }
    }
}

/// Column excluded from a multi-column expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Excluded {
    Name(String),
    Dtype(DataType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference a column by name. A name of the form `^...$` is a regex
    /// matching any number of columns.
    Column(String),
    /// Several columns by name.
    Columns(Vec<String>),
    /// All columns of the given types.
    DtypeColumn(Vec<DataType>),
    /// Column by position, negative counts from the end.
    Nth(i64),
    /// All columns.
    Wildcard,
    Selector(Selector),
    /// Remove columns from the multi-column expression it wraps.
    Exclude(Box<Expr>, Vec<Excluded>),
    /// Constant broadcast to the length of whatever it is combined with.
    Literal(ScalarValue),
    Alias(Box<Expr>, String),
    /// Derive the output name from the input's name.
    RenameAlias {
        expr: Box<Expr>,
        mapper: NameMapper,
    },
    BinaryExpr {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        datatype: DataType,
        strict: bool,
    },
    Sort {
        expr: Box<Expr>,
        options: SortOptions,
    },
    SortBy {
        expr: Box<Expr>,
        by: Vec<Expr>,
        descending: Vec<bool>,
    },
    Filter {
        input: Box<Expr>,
        by: Box<Expr>,
    },
    Slice {
        input: Box<Expr>,
        offset: i64,
        length: usize,
    },
    Agg {
        kind: AggKind,
        input: Box<Expr>,
    },
    /// Number of rows in the current group, or the table.
    Len,
    Ternary {
        predicate: Box<Expr>,
        truthy: Box<Expr>,
        falsy: Box<Expr>,
    },
    Function {
        input: Vec<Expr>,
        function: FunctionExpr,
    },
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        mapping: WindowMapping,
    },
    /// User function over the context's raw column. In a grouped context
    /// this is the ungrouped column, the result is split into groups after.
    Map {
        input: Box<Expr>,
        udf: Udf,
        output_type: Option<DataType>,
    },
    /// User function called once per group.
    Apply {
        input: Box<Expr>,
        udf: Udf,
        output_type: Option<DataType>,
    },
    Fold {
        acc: Box<Expr>,
        function: FoldUdf,
        exprs: Vec<Expr>,
    },
    /// Run `expr` against each row's list values. `expr` refers to them
    /// through `element()`.
    ListEval {
        input: Box<Expr>,
        expr: Box<Expr>,
        parallel: bool,
    },
    Element,
    Explode(Box<Expr>),
}

pub fn col(name: impl Into<String>) -> Expr {
    let name = name.into();
    if name == "*" {
        Expr::Wildcard
    } else {
        Expr::Column(name)
    }
}

pub fn cols<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Expr {
    Expr::Columns(names.into_iter().map(Into::into).collect())
}

pub fn dtype_col(datatype: DataType) -> Expr {
    Expr::DtypeColumn(vec![datatype])
}

pub fn dtype_cols(datatypes: impl IntoIterator<Item = DataType>) -> Expr {
    Expr::DtypeColumn(datatypes.into_iter().collect())
}

pub fn nth(idx: i64) -> Expr {
    Expr::Nth(idx)
}

pub fn all() -> Expr {
    Expr::Wildcard
}

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal(value.into())
}

pub fn element() -> Expr {
    Expr::Element
}

pub fn len() -> Expr {
    Expr::Len
}

/// Same as `len()`, rows in the current group.
pub fn count() -> Expr {
    Expr::Len
}

pub fn when(predicate: impl Into<Expr>) -> When {
    When {
        branches: Vec::new(),
        predicate: predicate.into(),
    }
}

/// Left fold over the columns produced by `exprs`, starting from `acc`.
pub fn fold<F>(acc: impl Into<Expr>, function: F, exprs: Vec<Expr>) -> Expr
where
    F: Fn(&Array, &Array) -> Result<Array> + Send + Sync + 'static,
{
    Expr::Fold {
        acc: Box::new(acc.into()),
        function: FoldUdf::new(function),
        exprs,
    }
}

/// Horizontally concatenate string representations, null if any input is
/// null.
pub fn concat_str(exprs: Vec<Expr>, separator: impl Into<String>) -> Expr {
    Expr::Function {
        input: exprs,
        function: FunctionExpr::ConcatStr {
            separator: separator.into(),
        },
    }
}

/// One list per row holding the values of all inputs, list inputs
/// contributing their elements.
pub fn concat_list(exprs: Vec<Expr>) -> Expr {
    Expr::Function {
        input: exprs,
        function: FunctionExpr::ConcatList,
    }
}

/// Pending `when(..)` waiting for its `then(..)`.
#[derive(Debug, Clone)]
pub struct When {
    branches: Vec<(Expr, Expr)>,
    predicate: Expr,
}

impl When {
    pub fn then(self, value: impl Into<Expr>) -> Then {
        let mut branches = self.branches;
        branches.push((self.predicate, value.into()));
        Then { branches }
    }
}

/// Conditional with at least one branch, finished by `otherwise`.
#[derive(Debug, Clone)]
pub struct Then {
    branches: Vec<(Expr, Expr)>,
}

impl Then {
    pub fn when(self, predicate: impl Into<Expr>) -> When {
        When {
            branches: self.branches,
            predicate: predicate.into(),
        }
    }

    /// Close the conditional. Earlier branches take precedence.
    pub fn otherwise(self, value: impl Into<Expr>) -> Expr {
        self.branches
            .into_iter()
            .rev()
            .fold(value.into(), |falsy, (predicate, truthy)| Expr::Ternary {
                predicate: Box::new(predicate),
                truthy: Box::new(truthy),
                falsy: Box::new(falsy),
            })
    }
}

impl Expr {
    fn binary(self, op: Operator, right: impl Into<Expr>) -> Expr {
        Expr::BinaryExpr {
            left: Box::new(self),
            op,
            right: Box::new(right.into()),
        }
    }

    fn function(self, function: FunctionExpr) -> Expr {
        Expr::Function {
            input: vec![self],
            function,
        }
    }

    fn agg(self, kind: AggKind) -> Expr {
        Expr::Agg {
            kind,
            input: Box::new(self),
        }
    }

    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias(Box::new(self), name.into())
    }

    pub fn name_prefix(self, prefix: impl Into<String>) -> Expr {
        Expr::RenameAlias {
            expr: Box::new(self),
            mapper: NameMapper::Prefix(prefix.into()),
        }
    }

    pub fn name_suffix(self, suffix: impl Into<String>) -> Expr {
        Expr::RenameAlias {
            expr: Box::new(self),
            mapper: NameMapper::Suffix(suffix.into()),
        }
    }

    pub fn map_alias<F>(self, f: F) -> Expr
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Expr::RenameAlias {
            expr: Box::new(self),
            mapper: NameMapper::Map(std::sync::Arc::new(f)),
        }
    }

    pub fn exclude<S: Into<String>>(self, names: impl IntoIterator<Item = S>) -> Expr {
        let excluded = names.into_iter().map(|n| Excluded::Name(n.into()));
        self.exclude_items(excluded)
    }

    pub fn exclude_dtype(self, datatypes: impl IntoIterator<Item = DataType>) -> Expr {
        self.exclude_items(datatypes.into_iter().map(Excluded::Dtype))
    }

    fn exclude_items(self, items: impl Iterator<Item = Excluded>) -> Expr {
        match self {
            Expr::Exclude(inner, mut excluded) => {
                excluded.extend(items);
                Expr::Exclude(inner, excluded)
            }
            other => Expr::Exclude(Box::new(other), items.collect()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::Eq, other)
    }

    pub fn neq(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::NotEq, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::Lt, other)
    }

    pub fn lt_eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::LtEq, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::Gt, other)
    }

    pub fn gt_eq(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::GtEq, other)
    }

    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::And, other)
    }

    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::Or, other)
    }

    pub fn xor(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::Xor, other)
    }

    pub fn floor_div(self, other: impl Into<Expr>) -> Expr {
        self.binary(Operator::FloorDivide, other)
    }

    pub fn is_null(self) -> Expr {
        self.function(FunctionExpr::IsNull)
    }

    pub fn is_not_null(self) -> Expr {
        self.function(FunctionExpr::IsNotNull)
    }

    pub fn is_nan(self) -> Expr {
        self.function(FunctionExpr::IsNan)
    }

    pub fn is_not_nan(self) -> Expr {
        self.function(FunctionExpr::IsNotNan)
    }

    pub fn fill_null(self, value: impl Into<Expr>) -> Expr {
        Expr::Function {
            input: vec![self, value.into()],
            function: FunctionExpr::FillNull,
        }
    }

    /// Replace NaN values. Filling with a null literal turns NaN into
    /// missing values.
    pub fn fill_nan(self, value: impl Into<Expr>) -> Expr {
        Expr::Function {
            input: vec![self, value.into()],
            function: FunctionExpr::FillNan,
        }
    }

    pub fn fill_null_strategy(self, strategy: FillStrategy) -> Expr {
        self.function(FunctionExpr::FillNullStrategy(strategy))
    }

    pub fn abs(self) -> Expr {
        self.function(FunctionExpr::Abs)
    }

    /// Strict cast, any value that can't be converted fails evaluation.
    pub fn cast(self, datatype: DataType) -> Expr {
        self.cast_with(datatype, true)
    }

    pub fn strict_cast(self, datatype: DataType) -> Expr {
        self.cast_with(datatype, true)
    }

    /// Cast with an explicit mode. Non-strict casts turn unconvertible
    /// values into nulls.
    pub fn cast_with(self, datatype: DataType, strict: bool) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            datatype,
            strict,
        }
    }

    pub fn sort(self, options: SortOptions) -> Expr {
        Expr::Sort {
            expr: Box::new(self),
            options,
        }
    }

    pub fn sort_by(self, by: Vec<Expr>, descending: Vec<bool>) -> Expr {
        Expr::SortBy {
            expr: Box::new(self),
            by,
            descending,
        }
    }

    pub fn reverse(self) -> Expr {
        self.function(FunctionExpr::Reverse)
    }

    pub fn head(self, n: usize) -> Expr {
        self.slice(0, n)
    }

    pub fn tail(self, n: usize) -> Expr {
        self.slice(-(n as i64), n)
    }

    pub fn slice(self, offset: i64, length: usize) -> Expr {
        Expr::Slice {
            input: Box::new(self),
            offset,
            length,
        }
    }

    pub fn shift(self, periods: i64) -> Expr {
        self.function(FunctionExpr::Shift(periods))
    }

    pub fn filter(self, by: impl Into<Expr>) -> Expr {
        Expr::Filter {
            input: Box::new(self),
            by: Box::new(by.into()),
        }
    }

    /// Distinct values, sorted unless `maintain_order` is set.
    pub fn unique(self, maintain_order: bool) -> Expr {
        self.function(FunctionExpr::Unique { maintain_order })
    }

    pub fn cum_sum(self) -> Expr {
        self.function(FunctionExpr::CumSum)
    }

    /// Rank of each value, 1 for the smallest or, when descending, the
    /// largest. Tied values share the average of their ranks.
    pub fn rank(self, descending: bool) -> Expr {
        self.function(FunctionExpr::Rank { descending })
    }

    pub fn round(self, decimals: u32) -> Expr {
        self.function(FunctionExpr::Round(decimals))
    }

    pub fn interpolate(self) -> Expr {
        self.function(FunctionExpr::Interpolate)
    }

    pub fn explode(self) -> Expr {
        Expr::Explode(Box::new(self))
    }

    pub fn implode(self) -> Expr {
        self.agg(AggKind::Implode)
    }

    pub fn sum(self) -> Expr {
        self.agg(AggKind::Sum)
    }

    pub fn mean(self) -> Expr {
        self.agg(AggKind::Mean)
    }

    pub fn median(self) -> Expr {
        self.agg(AggKind::Median)
    }

    pub fn min(self) -> Expr {
        self.agg(AggKind::Min)
    }

    pub fn max(self) -> Expr {
        self.agg(AggKind::Max)
    }

    pub fn std(self) -> Expr {
        self.agg(AggKind::Std)
    }

    pub fn var(self) -> Expr {
        self.agg(AggKind::Var)
    }

    /// Number of non-null values.
    pub fn count(self) -> Expr {
        self.agg(AggKind::Count)
    }

    pub fn null_count(self) -> Expr {
        self.agg(AggKind::NullCount)
    }

    pub fn first(self) -> Expr {
        self.agg(AggKind::First)
    }

    pub fn last(self) -> Expr {
        self.agg(AggKind::Last)
    }

    pub fn n_unique(self) -> Expr {
        self.agg(AggKind::NUnique)
    }

    pub fn approx_n_unique(self) -> Expr {
        self.agg(AggKind::ApproxNUnique)
    }

    /// Apply a function to the context's raw column.
    ///
    /// In a grouped context the function sees the whole column before it is
    /// split into groups, so order dependent functions like a shift cross
    /// group boundaries. Use `apply` to run a function per group.
    pub fn map<F>(self, f: F, output_type: Option<DataType>) -> Expr
    where
        F: Fn(&Array) -> Result<Array> + Send + Sync + 'static,
    {
        self.map_udf(Udf::new(f), output_type)
    }

    pub fn map_udf(self, udf: Udf, output_type: Option<DataType>) -> Expr {
        Expr::Map {
            input: Box::new(self),
            udf,
            output_type,
        }
    }

    /// Apply a function to each group's values. In an ungrouped context the
    /// whole column is a single group.
    pub fn apply<F>(self, f: F, output_type: Option<DataType>) -> Expr
    where
        F: Fn(&Array) -> Result<Array> + Send + Sync + 'static,
    {
        self.apply_udf(Udf::new(f), output_type)
    }

    pub fn apply_udf(self, udf: Udf, output_type: Option<DataType>) -> Expr {
        Expr::Apply {
            input: Box::new(self),
            udf,
            output_type,
        }
    }

    pub fn over(self, partition_by: Vec<Expr>) -> Expr {
        self.over_with(partition_by, WindowMapping::default())
    }

    pub fn over_with(self, partition_by: Vec<Expr>, mapping: WindowMapping) -> Expr {
        Expr::Window {
            function: Box::new(self),
            partition_by,
            mapping,
        }
    }

    pub fn str(self) -> StringNameSpace {
        StringNameSpace(self)
    }

    pub fn dt(self) -> DateTimeNameSpace {
        DateTimeNameSpace(self)
    }

    pub fn list(self) -> ListNameSpace {
        ListNameSpace(self)
    }

    /// Fixed width arrays share the list operations.
    pub fn arr(self) -> ListNameSpace {
        ListNameSpace(self)
    }

    /// Direct children used for column resolution and rewrites.
    ///
    /// The nested expression of a list eval is not a child, it runs against
    /// the list values rather than the input table.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_)
            | Expr::Columns(_)
            | Expr::DtypeColumn(_)
            | Expr::Nth(_)
            | Expr::Wildcard
            | Expr::Selector(_)
            | Expr::Literal(_)
            | Expr::Len
            | Expr::Element => Vec::new(),
            Expr::Exclude(expr, _)
            | Expr::Alias(expr, _)
            | Expr::RenameAlias { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Sort { expr, .. }
            | Expr::Slice { input: expr, .. }
            | Expr::Agg { input: expr, .. }
            | Expr::Map { input: expr, .. }
            | Expr::Apply { input: expr, .. }
            | Expr::ListEval { input: expr, .. }
            | Expr::Explode(expr) => vec![expr],
            Expr::BinaryExpr { left, right, .. } => vec![left, right],
            Expr::SortBy { expr, by, .. } => std::iter::once(expr.as_ref()).chain(by).collect(),
            Expr::Filter { input, by } => vec![input, by],
            Expr::Ternary {
                predicate,
                truthy,
                falsy,
            } => vec![predicate, truthy, falsy],
            Expr::Function { input, .. } => input.iter().collect(),
            Expr::Window {
                function,
                partition_by,
                ..
            } => std::iter::once(function.as_ref())
                .chain(partition_by)
                .collect(),
            Expr::Fold { acc, exprs, .. } => std::iter::once(acc.as_ref()).chain(exprs).collect(),
        }
    }

    /// Rebuild this node with each child replaced by `f(child)`.
    pub fn map_children<F>(self, mut f: F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        let mut boxed = |expr: Box<Expr>| -> Result<Box<Expr>> { Ok(Box::new(f(*expr)?)) };

        Ok(match self {
            Expr::Exclude(expr, excluded) => Expr::Exclude(boxed(expr)?, excluded),
            Expr::Alias(expr, name) => Expr::Alias(boxed(expr)?, name),
            Expr::RenameAlias { expr, mapper } => Expr::RenameAlias {
                expr: boxed(expr)?,
                mapper,
            },
            Expr::Cast {
                expr,
                datatype,
                strict,
            } => Expr::Cast {
                expr: boxed(expr)?,
                datatype,
                strict,
            },
            Expr::Sort { expr, options } => Expr::Sort {
                expr: boxed(expr)?,
                options,
            },
            Expr::Slice {
                input,
                offset,
                length,
            } => Expr::Slice {
                input: boxed(input)?,
                offset,
                length,
            },
            Expr::Agg { kind, input } => Expr::Agg {
                kind,
                input: boxed(input)?,
            },
            Expr::Map {
                input,
                udf,
                output_type,
            } => Expr::Map {
                input: boxed(input)?,
                udf,
                output_type,
            },
            Expr::Apply {
                input,
                udf,
                output_type,
            } => Expr::Apply {
                input: boxed(input)?,
                udf,
                output_type,
            },
            Expr::ListEval {
                input,
                expr,
                parallel,
            } => Expr::ListEval {
                input: boxed(input)?,
                expr,
                parallel,
            },
            Expr::Explode(expr) => Expr::Explode(boxed(expr)?),
            Expr::BinaryExpr { left, op, right } => Expr::BinaryExpr {
                left: boxed(left)?,
                op,
                right: boxed(right)?,
            },
            Expr::SortBy {
                expr,
                by,
                descending,
            } => Expr::SortBy {
                expr: boxed(expr)?,
                by: by
                    .into_iter()
                    .map(|e| boxed(Box::new(e)).map(|e| *e))
                    .collect::<Result<_>>()?,
                descending,
            },
            Expr::Filter { input, by } => Expr::Filter {
                input: boxed(input)?,
                by: boxed(by)?,
            },
            Expr::Ternary {
                predicate,
                truthy,
                falsy,
            } => Expr::Ternary {
                predicate: boxed(predicate)?,
                truthy: boxed(truthy)?,
                falsy: boxed(falsy)?,
            },
            Expr::Function { input, function } => Expr::Function {
                input: input
                    .into_iter()
                    .map(|e| boxed(Box::new(e)).map(|e| *e))
                    .collect::<Result<_>>()?,
                function,
            },
            Expr::Window {
                function,
                partition_by,
                mapping,
            } => Expr::Window {
                function: boxed(function)?,
                partition_by: partition_by
                    .into_iter()
                    .map(|e| boxed(Box::new(e)).map(|e| *e))
                    .collect::<Result<_>>()?,
                mapping,
            },
            Expr::Fold {
                acc,
                function,
                exprs,
            } => Expr::Fold {
                acc: boxed(acc)?,
                function,
                exprs: exprs
                    .into_iter()
                    .map(|e| boxed(Box::new(e)).map(|e| *e))
                    .collect::<Result<_>>()?,
            },
            leaf => leaf,
        })
    }

    /// Bottom up rewrite, children are rewritten before their parent.
    pub fn transform_up<F>(self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(Expr) -> Result<Expr>,
    {
        let expr = self.map_children(|child| child.transform_up(f))?;
        f(expr)
    }

    /// Visit this node and all descendants, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Names of all plain column references, in first-reference order.
    pub fn column_refs(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Column(name) = expr {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    /// Whether every output row depends only on the same input row.
    pub fn is_elementwise(&self) -> bool {
        match self {
            Expr::Column(_)
            | Expr::Columns(_)
            | Expr::DtypeColumn(_)
            | Expr::Nth(_)
            | Expr::Wildcard
            | Expr::Selector(_)
            | Expr::Literal(_)
            | Expr::Element => true,
            Expr::Exclude(expr, _)
            | Expr::Alias(expr, _)
            | Expr::RenameAlias { expr, .. }
            | Expr::Cast { expr, .. } => expr.is_elementwise(),
            Expr::ListEval { input, .. } => input.is_elementwise(),
            Expr::BinaryExpr { left, right, .. } => {
                left.is_elementwise() && right.is_elementwise()
            }
            Expr::Ternary {
                predicate,
                truthy,
                falsy,
            } => predicate.is_elementwise() && truthy.is_elementwise() && falsy.is_elementwise(),
            Expr::Function { input, function } => {
                function.is_elementwise() && input.iter().all(Expr::is_elementwise)
            }
            Expr::Fold { acc, exprs, .. } => {
                acc.is_elementwise() && exprs.iter().all(Expr::is_elementwise)
            }
            Expr::Sort { .. }
            | Expr::SortBy { .. }
            | Expr::Filter { .. }
            | Expr::Slice { .. }
            | Expr::Agg { .. }
            | Expr::Len
            | Expr::Window { .. }
            | Expr::Map { .. }
            | Expr::Apply { .. }
            | Expr::Explode(_) => false,
        }
    }

    /// Whether evaluating can fail because of the values it sees, not only
    /// their types.
    pub fn is_fallible(&self) -> bool {
        let mut fallible = false;
        self.walk(&mut |expr| {
            fallible |= match expr {
                Expr::Cast { strict, .. } => *strict,
                Expr::Function {
                    function: FunctionExpr::Str(StringFunction::Strptime { strict, .. }),
                    ..
                } => *strict,
                Expr::ListEval { expr, .. } => expr.is_fallible(),
                Expr::Fold { .. } | Expr::Map { .. } | Expr::Apply { .. } => true,
                _ => false,
            }
        });
        fallible
    }

    pub fn has_window(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| found |= matches!(expr, Expr::Window { .. }));
        found
    }
}

pub struct StringNameSpace(Expr);

impl StringNameSpace {
    fn function(self, function: StringFunction) -> Expr {
        self.0.function(FunctionExpr::Str(function))
    }

    /// Length in bytes.
    pub fn lengths(self) -> Expr {
        self.function(StringFunction::Lengths)
    }

    pub fn n_chars(self) -> Expr {
        self.function(StringFunction::NChars)
    }

    pub fn contains(self, pattern: impl Into<String>, literal: bool) -> Expr {
        self.function(StringFunction::Contains {
            pattern: pattern.into(),
            literal,
        })
    }

    pub fn starts_with(self, prefix: impl Into<String>) -> Expr {
        self.function(StringFunction::StartsWith(prefix.into()))
    }

    pub fn ends_with(self, suffix: impl Into<String>) -> Expr {
        self.function(StringFunction::EndsWith(suffix.into()))
    }

    pub fn extract(self, pattern: impl Into<String>, group: usize) -> Expr {
        self.function(StringFunction::Extract {
            pattern: pattern.into(),
            group,
        })
    }

    pub fn extract_all(self, pattern: impl Into<String>) -> Expr {
        self.function(StringFunction::ExtractAll(pattern.into()))
    }

    /// Replace the first match.
    pub fn replace(self, pattern: impl Into<String>, value: impl Into<String>, literal: bool) -> Expr {
        self.function(StringFunction::Replace {
            pattern: pattern.into(),
            value: value.into(),
            literal,
            all: false,
        })
    }

    pub fn replace_all(
        self,
        pattern: impl Into<String>,
        value: impl Into<String>,
        literal: bool,
    ) -> Expr {
        self.function(StringFunction::Replace {
            pattern: pattern.into(),
            value: value.into(),
            literal,
            all: true,
        })
    }

    pub fn split(self, by: impl Into<String>) -> Expr {
        self.function(StringFunction::Split(by.into()))
    }

    pub fn to_uppercase(self) -> Expr {
        self.function(StringFunction::ToUppercase)
    }

    pub fn to_lowercase(self) -> Expr {
        self.function(StringFunction::ToLowercase)
    }

    pub fn strip(self) -> Expr {
        self.function(StringFunction::Strip)
    }

    pub fn strptime(self, datatype: DataType, format: impl Into<String>, strict: bool) -> Expr {
        self.function(StringFunction::Strptime {
            datatype,
            format: format.into(),
            strict,
        })
    }
}

pub struct DateTimeNameSpace(Expr);

impl DateTimeNameSpace {
    fn part(self, part: DatePart) -> Expr {
        self.0
            .function(FunctionExpr::Temporal(TemporalFunction::Part(part)))
    }

    pub fn year(self) -> Expr {
        self.part(DatePart::Year)
    }

    pub fn month(self) -> Expr {
        self.part(DatePart::Month)
    }

    pub fn day(self) -> Expr {
        self.part(DatePart::Day)
    }

    pub fn hour(self) -> Expr {
        self.part(DatePart::Hour)
    }

    pub fn minute(self) -> Expr {
        self.part(DatePart::Minute)
    }

    pub fn second(self) -> Expr {
        self.part(DatePart::Second)
    }

    /// ISO weekday, Monday is 1.
    pub fn weekday(self) -> Expr {
        self.part(DatePart::Weekday)
    }

    pub fn ordinal_day(self) -> Expr {
        self.part(DatePart::OrdinalDay)
    }

    pub fn strftime(self, format: impl Into<String>) -> Expr {
        self.0
            .function(FunctionExpr::Temporal(TemporalFunction::Strftime(format.into())))
    }

    pub fn to_string(self, format: impl Into<String>) -> Expr {
        self.strftime(format)
    }
}

pub struct ListNameSpace(Expr);

impl ListNameSpace {
    fn function(self, function: ListFunction) -> Expr {
        self.0.function(FunctionExpr::List(function))
    }

    pub fn lengths(self) -> Expr {
        self.function(ListFunction::Lengths)
    }

    pub fn get(self, idx: i64) -> Expr {
        self.function(ListFunction::Get(idx))
    }

    pub fn head(self, n: usize) -> Expr {
        self.function(ListFunction::Head(n))
    }

    pub fn tail(self, n: usize) -> Expr {
        self.function(ListFunction::Tail(n))
    }

    pub fn slice(self, offset: i64, length: usize) -> Expr {
        self.function(ListFunction::Slice { offset, length })
    }

    pub fn sum(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::Sum))
    }

    pub fn mean(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::Mean))
    }

    pub fn min(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::Min))
    }

    pub fn max(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::Max))
    }

    pub fn first(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::First))
    }

    pub fn last(self) -> Expr {
        self.function(ListFunction::Agg(AggKind::Last))
    }

    pub fn join(self, separator: impl Into<String>) -> Expr {
        self.function(ListFunction::Join(separator.into()))
    }

    pub fn contains(self, value: impl Into<ScalarValue>) -> Expr {
        self.function(ListFunction::Contains(value.into()))
    }

    /// Run `expr` on every row's values independently. Rows may run in
    /// parallel when `parallel` is set.
    pub fn eval(self, expr: Expr, parallel: bool) -> Expr {
        Expr::ListEval {
            input: Box::new(self.0),
            expr: Box::new(expr),
            parallel,
        }
    }
}

impl From<ScalarValue> for Expr {
    fn from(value: ScalarValue) -> Self {
        Expr::Literal(value)
    }
}

impl From<Selector> for Expr {
    fn from(selector: Selector) -> Self {
        Expr::Selector(selector)
    }
}

macro_rules! impl_lit_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Literal(value.into())
                }
            }
        )*
    };
}

impl_lit_from!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, String, &str);

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Self::Output {
                self.binary($op, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, Operator::Plus);
impl_binary_op!(Sub, sub, Operator::Minus);
impl_binary_op!(Mul, mul, Operator::Multiply);
impl_binary_op!(Div, div, Operator::TrueDivide);
impl_binary_op!(Rem, rem, Operator::Modulus);
impl_binary_op!(BitAnd, bitand, Operator::And);
impl_binary_op!(BitOr, bitor, Operator::Or);
impl_binary_op!(BitXor, bitxor, Operator::Xor);

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        self.function(FunctionExpr::Not)
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        self.function(FunctionExpr::Negate)
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    write!(f, "[")?;
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{expr}")?;
    }
    write!(f, "]")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "col(\"{name}\")"),
            Expr::Columns(names) => {
                let names: Vec<_> = names.iter().map(|n| format!("\"{n}\"")).collect();
                write!(f, "cols([{}])", names.join(", "))
            }
            Expr::DtypeColumn(datatypes) => {
                let types: Vec<_> = datatypes.iter().map(|d| d.to_string()).collect();
                write!(f, "dtype_columns([{}])", types.join(", "))
            }
            Expr::Nth(idx) => write!(f, "nth({idx})"),
            Expr::Wildcard => write!(f, "*"),
            Expr::Selector(selector) => write!(f, "{selector}"),
            Expr::Exclude(expr, excluded) => {
                let items: Vec<_> = excluded
                    .iter()
                    .map(|e| match e {
                        Excluded::Name(name) => format!("\"{name}\""),
                        Excluded::Dtype(datatype) => datatype.to_string(),
                    })
                    .collect();
                write!(f, "{expr}.exclude([{}])", items.join(", "))
            }
            Expr::Literal(value) => match value {
                ScalarValue::Utf8(s) => write!(f, "\"{s}\""),
                other => write!(f, "{other}"),
            },
            Expr::Alias(expr, name) => write!(f, "{expr}.alias(\"{name}\")"),
            Expr::RenameAlias { expr, mapper } => write!(f, "{expr}.name.{mapper}"),
            Expr::BinaryExpr { left, op, right } => write!(f, "[({left}) {op} ({right})]"),
            Expr::Cast {
                expr,
                datatype,
                strict,
            } => {
                if *strict {
                    write!(f, "{expr}.strict_cast({datatype})")
                } else {
                    write!(f, "{expr}.cast({datatype})")
                }
            }
            Expr::Sort { expr, options } => {
                if options.descending {
                    write!(f, "{expr}.sort(desc)")
                } else {
                    write!(f, "{expr}.sort()")
                }
            }
            Expr::SortBy { expr, by, .. } => {
                write!(f, "{expr}.sort_by(")?;
                fmt_list(f, by)?;
                write!(f, ")")
            }
            Expr::Filter { input, by } => write!(f, "{input}.filter({by})"),
            Expr::Slice {
                input,
                offset,
                length,
            } => write!(f, "{input}.slice({offset}, {length})"),
            Expr::Agg { kind, input } => write!(f, "{input}.{kind}()"),
            Expr::Len => write!(f, "len()"),
            Expr::Ternary {
                predicate,
                truthy,
                falsy,
            } => write!(f, ".when({predicate}).then({truthy}).otherwise({falsy})"),
            Expr::Function { input, function } => match input.split_first() {
                Some((first, [])) => write!(f, "{first}.{function}()"),
                Some((first, rest)) => {
                    write!(f, "{first}.{function}(")?;
                    for (idx, expr) in rest.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{expr}")?;
                    }
                    write!(f, ")")
                }
                None => write!(f, "{function}()"),
            },
            Expr::Window {
                function,
                partition_by,
                mapping,
            } => {
                write!(f, "{function}.over(")?;
                fmt_list(f, partition_by)?;
                if *mapping != WindowMapping::GroupToRows {
                    write!(f, ", {mapping}")?;
                }
                write!(f, ")")
            }
            Expr::Map { input, udf, .. } => write!(f, "{input}.map({})", udf.name()),
            Expr::Apply { input, udf, .. } => write!(f, "{input}.apply({})", udf.name()),
            Expr::Fold { acc, exprs, .. } => {
                write!(f, "fold({acc}, ")?;
                fmt_list(f, exprs)?;
                write!(f, ")")
            }
            Expr::ListEval { input, expr, .. } => write!(f, "{input}.list.eval({expr})"),
            Expr::Element => write!(f, "element()"),
            Expr::Explode(expr) => write!(f, "{expr}.explode()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!("[(col(\"a\")) > (1)]", col("a").gt(1).to_string());
        assert_eq!("col(\"a\").sum()", col("a").sum().to_string());
        assert_eq!(
            "col(\"a\").mean().over([col(\"g\")])",
            col("a").mean().over(vec![col("g")]).to_string()
        );
        assert_eq!(
            "[(col(\"s\")) == (\"x\")]",
            col("s").eq("x").to_string()
        );
        assert_eq!("col(\"a\").shift[1]()", col("a").shift(1).to_string());
        assert_eq!("*", col("*").to_string());
    }

    #[test]
    fn fallible_exprs() {
        assert!(!col("a").gt(1).is_fallible());
        assert!(!col("s").cast(DataType::Float64).gt(1.0).is_fallible());
        assert!(col("s").strict_cast(DataType::Float64).gt(1.0).is_fallible());
        assert!(
            col("s")
                .str()
                .strptime(DataType::Date, "%Y-%m-%d", true)
                .is_not_null()
                .is_fallible()
        );
        assert!(
            col("l")
                .list()
                .eval(element().strict_cast(DataType::Int64), false)
                .is_fallible()
        );
        assert!(!col("l").list().eval(element().rank(false), false).is_fallible());
    }

    #[test]
    fn when_then_chain_nests_left_to_right() {
        let expr = when(col("a").gt(1))
            .then(lit("big"))
            .when(col("a").gt(0))
            .then(lit("small"))
            .otherwise(lit("none"));

        let Expr::Ternary { falsy, .. } = &expr else {
            panic!("expected ternary, got {expr}");
        };
        assert!(matches!(falsy.as_ref(), Expr::Ternary { .. }));
    }

    #[test]
    fn structural_equality() {
        assert_eq!(col("a") + lit(1), col("a") + 1);
        assert_ne!(col("a") + 1, col("a") - 1);

        let udf = Udf::new(|a| Ok(a.clone()));
        let a = col("a").map_udf(udf.clone(), None);
        let b = col("a").map_udf(udf, None);
        assert_eq!(a, b);
        assert_ne!(a, col("a").map(|a| Ok(a.clone()), None));
    }

    #[test]
    fn column_refs_skip_list_eval_body() {
        let expr = (col("a") + col("b") * col("a"))
            .list()
            .eval(element() + col("ignored"), false);
        assert_eq!(vec!["a", "b"], expr.column_refs());
    }

    #[test]
    fn elementwise_detection() {
        assert!((col("a") + 1).is_elementwise());
        assert!(col("a").is_null().is_elementwise());
        assert!(!col("a").sum().is_elementwise());
        assert!(!(col("a") + col("a").mean()).is_elementwise());
        assert!(!col("a").shift(1).is_elementwise());
        assert!(!col("a").map(|a| Ok(a.clone()), None).is_elementwise());
    }

    #[test]
    fn transform_up_rewrites_columns() {
        let expr = (col("a") + col("b")).alias("c");
        let out = expr
            .transform_up(&mut |e| match e {
                Expr::Column(name) => Ok(col(format!("{name}_x"))),
                other => Ok(other),
            })
            .unwrap();
        assert_eq!((col("a_x") + col("b_x")).alias("c"), out);
    }
}
