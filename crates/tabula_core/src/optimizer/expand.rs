//! Rewrite multi-column expressions in every node into explicit column
//! references against the node's input schema.
use std::sync::Arc;

use tabula_error::{Result, ResultExt, schema_err};

use super::OptimizeRule;
use crate::context::group_by::expand_aggs;
use crate::expr::Expr;
use crate::expr::expand::{expand_exprs, output_name};
use crate::logical::operator::{
    LogicalAggregate,
    LogicalFilter,
    LogicalOperator,
    LogicalProject,
    LogicalSort,
    Node,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandRule;

impl OptimizeRule for ExpandRule {
    fn optimize(&mut self, plan: Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>> {
        let children = plan
            .children()
            .iter()
            .map(|child| self.optimize(child.clone()))
            .collect::<Result<Vec<_>>>()?;

        let expanded = match plan.as_ref() {
            LogicalOperator::Filter(node) => {
                let schema = input_schema(&children)?;
                let mut exprs = expand_exprs(std::slice::from_ref(&node.node.predicate), &schema)?;
                if exprs.len() != 1 {
                    return Err(schema_err!(
                        "Filter predicate '{}' must expand to exactly one expression",
                        node.node.predicate
                    ));
                }
                LogicalOperator::Filter(Node::new(
                    LogicalFilter {
                        predicate: exprs.remove(0),
                    },
                    children,
                ))
            }
            LogicalOperator::Project(node) => {
                let schema = input_schema(&children)?;
                LogicalOperator::Project(Node::new(
                    LogicalProject {
                        exprs: expand_exprs(&node.node.exprs, &schema)?,
                        kind: node.node.kind,
                    },
                    children,
                ))
            }
            LogicalOperator::Aggregate(node) => {
                let schema = input_schema(&children)?;
                let keys = expand_exprs(&node.node.keys, &schema)?;
                let key_names = keys.iter().map(output_name).collect::<Result<Vec<_>>>()?;
                let aggs = expand_aggs(&node.node.aggs, &schema, &key_names)?
                    .into_iter()
                    .map(|(expr, _)| expr)
                    .collect();
                LogicalOperator::Aggregate(Node::new(
                    LogicalAggregate {
                        keys,
                        aggs,
                        maintain_order: node.node.maintain_order,
                    },
                    children,
                ))
            }
            LogicalOperator::Sort(node) => {
                let schema = input_schema(&children)?;
                LogicalOperator::Sort(Node::new(
                    LogicalSort {
                        by: expand_exprs(&node.node.by, &schema)?,
                        descending: node.node.descending.clone(),
                    },
                    children,
                ))
            }
            other => other.with_children(children),
        };
        Ok(Arc::new(expanded))
    }
}

fn input_schema(children: &[Arc<LogicalOperator>]) -> Result<crate::arrays::field::Schema> {
    match children {
        [child] => child
            .schema()
            .context_fn(|| format!("schema of {}", child.name())),
        _ => Err(schema_err!("Expected exactly one input, got {}", children.len())),
    }
}

/// Whether every expression in the node is already expanded.
pub fn is_expanded(exprs: &[Expr]) -> bool {
    !exprs.iter().any(crate::expr::expand::has_multi_leaf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::table::Table;
    use crate::expr::{all, col};
    use crate::expr::selector::numeric;

    #[test]
    fn expands_against_input_schema() {
        let table = Table::try_from_pairs([
            ("k", Array::from(vec!["x", "y"])),
            ("a", Array::from(vec![1_i64, 2])),
            ("b", Array::from(vec![0.5, 1.5])),
        ])
        .unwrap();
        let plan = table
            .lazy()
            .select(vec![all()])
            .group_by(vec![col("k")])
            .agg(vec![numeric().as_expr().sum()])
            .plan()
            .clone();

        let plan = ExpandRule.optimize(plan).unwrap();
        let LogicalOperator::Aggregate(agg) = plan.as_ref() else {
            panic!("expected aggregate, got {plan}");
        };
        assert_eq!(vec![col("a").sum(), col("b").sum()], agg.node.aggs);

        let LogicalOperator::Project(project) = agg.children[0].as_ref() else {
            panic!("expected project");
        };
        assert!(is_expanded(&project.node.exprs));
        assert_eq!(vec![col("k"), col("a"), col("b")], project.node.exprs);
    }
}
