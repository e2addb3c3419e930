//! Rewrite multi-column expressions into one expression per column.
//!
//! After expansion an expression only references columns by plain name and
//! every expression has a single output name.
use tabula_error::{DbError, Result, schema_err};

use super::selector::resolve_index;
use super::{Excluded, Expr, FunctionExpr};
use crate::arrays::field::Schema;

fn is_regex_name(name: &str) -> bool {
    name.len() > 1 && name.starts_with('^') && name.ends_with('$')
}

fn is_multi_leaf(expr: &Expr) -> bool {
    match expr {
        Expr::Column(name) => is_regex_name(name),
        Expr::Columns(_) | Expr::DtypeColumn(_) | Expr::Wildcard | Expr::Selector(_) => true,
        _ => false,
    }
}

/// Whether expanding this expression could produce more or fewer than one
/// expression.
pub fn has_multi_leaf(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| found |= is_multi_leaf(e) || matches!(e, Expr::Nth(_)));
    found
}

pub fn expand_exprs(exprs: &[Expr], schema: &Schema) -> Result<Vec<Expr>> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        out.extend(expand_expr(expr.clone(), schema)?);
    }
    Ok(out)
}

fn expand_expr(expr: Expr, schema: &Schema) -> Result<Vec<Expr>> {
    let expr = expand_list_inputs(expr, schema)?;

    let mut excluded = Vec::new();
    expr.walk(&mut |e| {
        if let Expr::Exclude(_, items) = e {
            excluded.extend(items.iter().cloned());
        }
    });

    let expr = expr.transform_up(&mut |e| match e {
        Expr::Exclude(inner, _) => Ok(*inner),
        Expr::Nth(idx) => {
            let pos = resolve_index(idx, schema.len())?;
            let name = schema
                .names()
                .nth(pos)
                .ok_or_else(|| schema_err!("Column index {idx} out of range"))?;
            Ok(Expr::Column(name.to_string()))
        }
        other => Ok(other),
    })?;

    let mut leaves: Vec<&Expr> = Vec::new();
    expr.walk(&mut |e| {
        if is_multi_leaf(e) && !leaves.contains(&e) {
            leaves.push(e);
        }
    });

    let expanded = match leaves.as_slice() {
        [] => vec![expr.clone()],
        [leaf] => {
            let leaf = (*leaf).clone();
            resolve_leaf(&leaf, schema)?
                .into_iter()
                .filter(|name| !is_excluded(name, &excluded, schema))
                .map(|name| replace_leaf(expr.clone(), &leaf, &name))
                .collect::<Result<Vec<_>>>()?
        }
        _ => {
            return Err(schema_err!(
                "Expression '{expr}' combines different multi-column inputs"
            ));
        }
    };

    expanded
        .into_iter()
        .map(resolve_rename_alias)
        .collect()
}

/// Positional list inputs (fold inputs, concat inputs) expand in place
/// instead of multiplying the whole expression.
fn expand_list_inputs(expr: Expr, schema: &Schema) -> Result<Expr> {
    expr.transform_up(&mut |e| match e {
        Expr::Fold {
            acc,
            function,
            exprs,
        } => Ok(Expr::Fold {
            acc,
            function,
            exprs: expand_exprs(&exprs, schema)?,
        }),
        Expr::Function {
            input,
            function: function @ (FunctionExpr::ConcatStr { .. } | FunctionExpr::ConcatList),
        } => Ok(Expr::Function {
            input: expand_exprs(&input, schema)?,
            function,
        }),
        Expr::ListEval {
            input,
            expr,
            parallel,
        } => Ok(Expr::ListEval {
            input,
            expr: Box::new(resolve_element_wildcard(*expr)?),
            parallel,
        }),
        other => Ok(other),
    })
}

/// Inside a list eval `*` is the row's values.
fn resolve_element_wildcard(body: Expr) -> Result<Expr> {
    body.transform_up(&mut |e| match e {
        Expr::Wildcard => Ok(Expr::Element),
        Expr::ListEval {
            input,
            expr,
            parallel,
        } => Ok(Expr::ListEval {
            input,
            expr: Box::new(resolve_element_wildcard(*expr)?),
            parallel,
        }),
        other => Ok(other),
    })
}

fn resolve_leaf(leaf: &Expr, schema: &Schema) -> Result<Vec<String>> {
    match leaf {
        Expr::Column(pattern) => {
            let regex = regex::Regex::new(pattern)
                .map_err(|e| schema_err!("Invalid column pattern '{pattern}': {e}"))?;
            Ok(schema
                .names()
                .filter(|name| regex.is_match(name))
                .map(str::to_string)
                .collect())
        }
        Expr::Columns(names) => {
            for name in names {
                schema.try_get(name)?;
            }
            Ok(names.clone())
        }
        Expr::DtypeColumn(datatypes) => Ok(schema
            .iter()
            .filter(|(_, datatype)| datatypes.contains(datatype))
            .map(|(name, _)| name.to_string())
            .collect()),
        Expr::Wildcard => Ok(schema.names().map(str::to_string).collect()),
        Expr::Selector(selector) => selector.resolve(schema),
        other => Err(DbError::schema(format!("'{other}' is not a multi-column input"))),
    }
}

fn is_excluded(name: &str, excluded: &[Excluded], schema: &Schema) -> bool {
    excluded.iter().any(|item| match item {
        Excluded::Name(n) => n == name,
        Excluded::Dtype(datatype) => schema.get(name) == Some(datatype),
    })
}

fn replace_leaf(expr: Expr, leaf: &Expr, name: &str) -> Result<Expr> {
    expr.transform_up(&mut |e| {
        if &e == leaf {
            Ok(Expr::Column(name.to_string()))
        } else {
            Ok(e)
        }
    })
}

fn resolve_rename_alias(expr: Expr) -> Result<Expr> {
    expr.transform_up(&mut |e| match e {
        Expr::RenameAlias { expr, mapper } => {
            let name = mapper.apply(&output_name(&expr)?);
            Ok(Expr::Alias(expr, name))
        }
        other => Ok(other),
    })
}

/// Name of the column an expression produces.
///
/// Aliases win, otherwise the name comes from the left-most input. Literal
/// roots are named `literal` and `len()` is named `count`.
pub fn output_name(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Alias(_, name) => Ok(name.clone()),
        Expr::Column(name) if !is_regex_name(name) => Ok(name.clone()),
        Expr::Literal(_) => Ok("literal".to_string()),
        Expr::Len => Ok("count".to_string()),
        Expr::Element => Ok(super::ELEMENT_NAME.to_string()),
        Expr::RenameAlias { expr, mapper } => Ok(mapper.apply(&output_name(expr)?)),
        Expr::Ternary { truthy, .. } => output_name(truthy),
        Expr::Fold { acc, .. } => output_name(acc),
        other => match other.children().first() {
            Some(child) if !is_multi_leaf(other) => output_name(child),
            _ => Err(schema_err!(
                "Cannot determine output name of unexpanded expression '{other}'"
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::arrays::datatype::DataType;
    use crate::expr::selector::numeric;
    use crate::expr::{all, col, cols, concat_list, concat_str, dtype_col, element, lit, nth};

    fn schema() -> Schema {
        Schema::try_from_fields([
            ("a", DataType::Int64),
            ("b", DataType::Float64),
            ("s", DataType::Utf8),
            ("a2", DataType::Int64),
        ])
        .unwrap()
    }

    fn names(exprs: &[Expr]) -> Vec<String> {
        exprs.iter().map(|e| output_name(e).unwrap()).collect()
    }

    #[test]
    fn wildcard_with_exclude() {
        let out = expand_exprs(&[all().exclude(["s"]).sum()], &schema()).unwrap();
        assert_eq!(vec!["a", "b", "a2"], names(&out));
        assert_eq!(col("b").sum(), out[1]);
    }

    #[test]
    fn regex_and_dtype_columns() {
        let out = expand_exprs(&[col("^a.*$") * 2], &schema()).unwrap();
        assert_eq!(vec!["a", "a2"], names(&out));

        let out = expand_exprs(&[dtype_col(DataType::Int64).exclude(["a"])], &schema()).unwrap();
        assert_eq!(vec![col("a2")], out);

        let out = expand_exprs(&[all().exclude_dtype([DataType::Int64])], &schema()).unwrap();
        assert_eq!(vec!["b", "s"], names(&out));
    }

    #[test]
    fn prefix_suffix_resolved() {
        let out = expand_exprs(&[cols(["a", "b"]).max().name_suffix("_max")], &schema()).unwrap();
        assert_eq!(vec!["a_max", "b_max"], names(&out));
        assert!(matches!(out[0], Expr::Alias(..)));
    }

    #[test]
    fn nth_and_selector() {
        let out = expand_exprs(&[nth(-1), numeric().as_expr().mean()], &schema()).unwrap();
        assert_eq!(vec!["a2", "a", "b", "a2"], names(&out));
    }

    #[test]
    fn list_inputs_expand_in_place() {
        let out = expand_exprs(&[concat_str(vec![col("^a.*$"), col("s")], "-")], &schema()).unwrap();
        assert_eq!(1, out.len());
        assert_eq!(concat_str(vec![col("a"), col("a2"), col("s")], "-"), out[0]);
    }

    #[test]
    fn concat_list_and_list_eval_wildcard() {
        let expr = concat_list(vec![all().exclude(["s", "b"])])
            .list()
            .eval((element().rank(true) / col("*").count()).round(2), true);
        let out = expand_exprs(&[expr], &schema()).unwrap();
        let expected = concat_list(vec![col("a"), col("a2")])
            .list()
            .eval((element().rank(true) / element().count()).round(2), true);
        assert_eq!(vec![expected], out);
    }

    #[test]
    fn conflicting_multi_leaves() {
        let err = expand_exprs(&[all() + cols(["a"])], &schema()).unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());

        let err = expand_exprs(&[cols(["missing"])], &schema()).unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }

    #[test]
    fn default_names() {
        assert_eq!("literal", output_name(&(lit(1) + col("a"))).unwrap());
        assert_eq!("a", output_name(&(col("a") + lit(1))).unwrap());
        assert_eq!("count", output_name(&crate::expr::len()).unwrap());
        assert!(output_name(&all()).is_err());
    }
}
