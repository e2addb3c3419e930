//! Named functions over one or more input columns.
use std::fmt;

use tabula_error::{Result, schema_err};

use crate::arrays::array::Array;
use crate::arrays::compute::aggregate::AggKind;
use crate::arrays::compute::fill::{self, FillStrategy};
use crate::arrays::compute::temporal::{self, DatePart};
use crate::arrays::compute::{arith, boolean, list, sort, string};
use crate::arrays::datatype::DataType;
use crate::arrays::scalar::ScalarValue;

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionExpr {
    Not,
    Negate,
    Abs,
    IsNull,
    IsNotNull,
    IsNan,
    IsNotNan,
    /// Inputs: column, fill value.
    FillNull,
    /// Inputs: column, fill value.
    FillNan,
    FillNullStrategy(FillStrategy),
    Interpolate,
    Shift(i64),
    Reverse,
    Unique { maintain_order: bool },
    CumSum,
    /// Average rank, ties share the mean of their positions.
    Rank { descending: bool },
    Round(u32),
    ConcatStr { separator: String },
    /// One list per row out of all inputs.
    ConcatList,
    Str(StringFunction),
    Temporal(TemporalFunction),
    List(ListFunction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringFunction {
    Lengths,
    NChars,
    Contains { pattern: String, literal: bool },
    StartsWith(String),
    EndsWith(String),
    Extract { pattern: String, group: usize },
    ExtractAll(String),
    Replace {
        pattern: String,
        value: String,
        literal: bool,
        all: bool,
    },
    Split(String),
    ToUppercase,
    ToLowercase,
    Strip,
    Strptime {
        datatype: DataType,
        format: String,
        strict: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemporalFunction {
    Part(DatePart),
    Strftime(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListFunction {
    Lengths,
    Get(i64),
    Head(usize),
    Tail(usize),
    Slice { offset: i64, length: usize },
    Agg(AggKind),
    Join(String),
    Contains(ScalarValue),
}

impl FunctionExpr {
    /// Whether each output row depends only on the same input row.
    ///
    /// Everything else is order dependent and runs per group in a grouped
    /// context.
    pub fn is_elementwise(&self) -> bool {
        !matches!(
            self,
            Self::FillNullStrategy(_)
                | Self::Interpolate
                | Self::Shift(_)
                | Self::Reverse
                | Self::Unique { .. }
                | Self::CumSum
                | Self::Rank { .. }
        )
    }

    pub fn evaluate(&self, inputs: &[Array]) -> Result<Array> {
        let first = inputs
            .first()
            .ok_or_else(|| schema_err!("Function '{self}' requires at least one input"))?;

        match self {
            Self::Not => boolean::not(first),
            Self::Negate => arith::negate(first),
            Self::Abs => arith::abs(first),
            Self::IsNull => Ok(fill::is_null(first)),
            Self::IsNotNull => Ok(fill::is_not_null(first)),
            Self::IsNan => fill::is_nan(first),
            Self::IsNotNan => fill::is_not_nan(first),
            Self::FillNull => fill::fill_null(first, second(self, inputs)?),
            Self::FillNan => fill::fill_nan(first, second(self, inputs)?),
            Self::FillNullStrategy(strategy) => fill::fill_null_strategy(first, *strategy),
            Self::Interpolate => fill::interpolate(first),
            Self::Shift(periods) => Ok(fill::shift(first, *periods)),
            Self::Reverse => Ok(sort::reverse(first)),
            Self::Unique { maintain_order } => Ok(fill::unique(first, *maintain_order)),
            Self::CumSum => fill::cum_sum(first),
            Self::Rank { descending } => Ok(sort::rank(first, *descending)),
            Self::Round(decimals) => arith::round(first, *decimals),
            Self::ConcatStr { separator } => string::concat_str(inputs, separator),
            Self::ConcatList => list::concat_list(inputs),
            Self::Str(func) => func.evaluate(first),
            Self::Temporal(func) => func.evaluate(first),
            Self::List(func) => func.evaluate(first),
        }
    }
}

fn second<'a>(func: &FunctionExpr, inputs: &'a [Array]) -> Result<&'a Array> {
    inputs
        .get(1)
        .ok_or_else(|| schema_err!("Function '{func}' requires two inputs"))
}

impl StringFunction {
    fn evaluate(&self, input: &Array) -> Result<Array> {
        match self {
            Self::Lengths => string::lengths(input),
            Self::NChars => string::n_chars(input),
            Self::Contains { pattern, literal } => string::contains(input, pattern, *literal),
            Self::StartsWith(prefix) => string::starts_with(input, prefix),
            Self::EndsWith(suffix) => string::ends_with(input, suffix),
            Self::Extract { pattern, group } => string::extract(input, pattern, *group),
            Self::ExtractAll(pattern) => string::extract_all(input, pattern),
            Self::Replace {
                pattern,
                value,
                literal,
                all,
            } => string::replace(input, pattern, value, *literal, *all),
            Self::Split(by) => string::split(input, by),
            Self::ToUppercase => string::to_uppercase(input),
            Self::ToLowercase => string::to_lowercase(input),
            Self::Strip => string::strip(input),
            Self::Strptime {
                datatype,
                format,
                strict,
            } => temporal::strptime(input, datatype, format, *strict),
        }
    }
}

impl TemporalFunction {
    fn evaluate(&self, input: &Array) -> Result<Array> {
        match self {
            Self::Part(part) => temporal::date_part(input, *part),
            Self::Strftime(format) => temporal::strftime(input, format),
        }
    }
}

impl ListFunction {
    fn evaluate(&self, input: &Array) -> Result<Array> {
        match self {
            Self::Lengths => list::lengths(input),
            Self::Get(idx) => list::get(input, *idx),
            Self::Head(n) => list::head(input, *n),
            Self::Tail(n) => list::tail(input, *n),
            Self::Slice { offset, length } => list::slice(input, *offset, *length),
            Self::Agg(kind) => list::aggregate_rows(input, *kind),
            Self::Join(separator) => list::join(input, separator),
            Self::Contains(value) => list::contains(input, value),
        }
    }
}

impl fmt::Display for FunctionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "not"),
            Self::Negate => write!(f, "neg"),
            Self::Abs => write!(f, "abs"),
            Self::IsNull => write!(f, "is_null"),
            Self::IsNotNull => write!(f, "is_not_null"),
            Self::IsNan => write!(f, "is_nan"),
            Self::IsNotNan => write!(f, "is_not_nan"),
            Self::FillNull => write!(f, "fill_null"),
            Self::FillNan => write!(f, "fill_nan"),
            Self::FillNullStrategy(strategy) => write!(f, "fill_null[{}]", strategy.name()),
            Self::Interpolate => write!(f, "interpolate"),
            Self::Shift(periods) => write!(f, "shift[{periods}]"),
            Self::Reverse => write!(f, "reverse"),
            Self::Unique { maintain_order } => {
                if *maintain_order {
                    write!(f, "unique_stable")
                } else {
                    write!(f, "unique")
                }
            }
            Self::CumSum => write!(f, "cum_sum"),
            Self::Rank { descending } => {
                if *descending {
                    write!(f, "rank_desc")
                } else {
                    write!(f, "rank")
                }
            }
            Self::Round(decimals) => write!(f, "round[{decimals}]"),
            Self::ConcatStr { separator } => write!(f, "concat_str[{separator:?}]"),
            Self::ConcatList => write!(f, "concat_list"),
            Self::Str(func) => write!(f, "str.{func}"),
            Self::Temporal(func) => write!(f, "dt.{func}"),
            Self::List(func) => write!(f, "list.{func}"),
        }
    }
}

impl fmt::Display for StringFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lengths => write!(f, "lengths"),
            Self::NChars => write!(f, "n_chars"),
            Self::Contains { pattern, .. } => write!(f, "contains[{pattern:?}]"),
            Self::StartsWith(prefix) => write!(f, "starts_with[{prefix:?}]"),
            Self::EndsWith(suffix) => write!(f, "ends_with[{suffix:?}]"),
            Self::Extract { pattern, group } => write!(f, "extract[{pattern:?}, {group}]"),
            Self::ExtractAll(pattern) => write!(f, "extract_all[{pattern:?}]"),
            Self::Replace {
                pattern,
                value,
                all,
                ..
            } => {
                let name = if *all { "replace_all" } else { "replace" };
                write!(f, "{name}[{pattern:?}, {value:?}]")
            }
            Self::Split(by) => write!(f, "split[{by:?}]"),
            Self::ToUppercase => write!(f, "to_uppercase"),
            Self::ToLowercase => write!(f, "to_lowercase"),
            Self::Strip => write!(f, "strip"),
            Self::Strptime {
                datatype, format, ..
            } => write!(f, "strptime[{datatype}, {format:?}]"),
        }
    }
}

impl fmt::Display for TemporalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Part(part) => write!(f, "{}", part.name()),
            Self::Strftime(format) => write!(f, "strftime[{format:?}]"),
        }
    }
}

impl fmt::Display for ListFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lengths => write!(f, "lengths"),
            Self::Get(idx) => write!(f, "get[{idx}]"),
            Self::Head(n) => write!(f, "head[{n}]"),
            Self::Tail(n) => write!(f, "tail[{n}]"),
            Self::Slice { offset, length } => write!(f, "slice[{offset}, {length}]"),
            Self::Agg(kind) => write!(f, "{kind}"),
            Self::Join(separator) => write!(f, "join[{separator:?}]"),
            Self::Contains(value) => write!(f, "contains[{value}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_null_with_value() {
        let input = Array::from(vec![Some(1_i64), None, Some(3)]);
        let fill = Array::from(vec![0_i64]);
        let out = FunctionExpr::FillNull.evaluate(&[input, fill]).unwrap();
        assert_eq!(Array::from(vec![1_i64, 0, 3]), out);
    }

    #[test]
    fn fill_null_missing_value_input() {
        let input = Array::from(vec![Some(1_i64), None]);
        assert!(FunctionExpr::FillNull.evaluate(&[input]).is_err());
    }

    #[test]
    fn string_and_list_functions() {
        let input = Array::from(vec!["a,b", "c"]);
        let split = FunctionExpr::Str(StringFunction::Split(",".to_string()))
            .evaluate(&[input])
            .unwrap();
        let lengths = FunctionExpr::List(ListFunction::Lengths)
            .evaluate(&[split])
            .unwrap();
        assert_eq!(Array::from(vec![2_u32, 1]), lengths);
    }

    #[test]
    fn concat_list_then_rank() {
        let lists = FunctionExpr::ConcatList
            .evaluate(&[
                Array::from(vec![17_i64, 11]),
                Array::from(vec![15_i64, 11]),
                Array::from(vec![16_i64, 15]),
            ])
            .unwrap();
        let rows = list::list_rows(&lists).unwrap();
        let row = rows[1].clone().unwrap();
        assert_eq!(Array::from(vec![11_i64, 11, 15]), row);

        let ranks = FunctionExpr::Rank { descending: true }
            .evaluate(&[row])
            .unwrap();
        assert_eq!(Array::from(vec![2.5, 2.5, 1.0]), ranks);
    }

    #[test]
    fn elementwise_flags() {
        assert!(FunctionExpr::Abs.is_elementwise());
        assert!(!FunctionExpr::Shift(1).is_elementwise());
        assert!(!FunctionExpr::CumSum.is_elementwise());
        assert!(!FunctionExpr::Rank { descending: true }.is_elementwise());
        assert!(FunctionExpr::Round(2).is_elementwise());
        assert!(FunctionExpr::ConcatList.is_elementwise());
    }
}
