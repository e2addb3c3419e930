//! Only read the columns a plan needs.
use std::sync::Arc;

use hashbrown::HashSet;
use tabula_error::Result;

use super::OptimizeRule;
use super::expand::is_expanded;
use crate::execution::join::right_output_name;
use crate::expr::Expr;
use crate::expr::expand::output_name;
use crate::logical::operator::{LogicalOperator, LogicalScan, Node, ProjectKind};

/// Columns required from a node's output. `None` means all of them.
type Required = Option<HashSet<String>>;

fn refs_of<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> HashSet<String> {
    exprs.into_iter().flat_map(|e| e.column_refs()).collect()
}

fn with_refs<'a>(required: &Required, exprs: impl IntoIterator<Item = &'a Expr>) -> Required {
    required.as_ref().map(|req| {
        let mut req = req.clone();
        req.extend(refs_of(exprs));
        req
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionPushdown;

impl OptimizeRule for ProjectionPushdown {
    fn optimize(&mut self, plan: Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>> {
        push(&plan, &None)
    }
}

fn push(plan: &Arc<LogicalOperator>, required: &Required) -> Result<Arc<LogicalOperator>> {
    let children: Vec<Required> = match plan.as_ref() {
        LogicalOperator::Scan(scan) => return prune_scan(scan, required),
        LogicalOperator::Filter(n) => vec![with_refs(required, [&n.node.predicate])],
        LogicalOperator::Sort(n) => vec![with_refs(required, &n.node.by)],
        LogicalOperator::Limit(_) => vec![required.clone()],
        LogicalOperator::Project(n) => {
            let exprs = &n.node.exprs;
            if !is_expanded(exprs) {
                vec![None]
            } else {
                match (n.node.kind, required) {
                    (ProjectKind::Select, _) => vec![Some(refs_of(exprs))],
                    (ProjectKind::WithColumns, None) => vec![None],
                    (ProjectKind::WithColumns, Some(req)) => {
                        let produced = exprs.iter().map(output_name).collect::<Result<Vec<_>>>()?;
                        let mut child: HashSet<String> = req
                            .iter()
                            .filter(|name| !produced.contains(name))
                            .cloned()
                            .collect();
                        child.extend(refs_of(exprs));
                        vec![Some(child)]
                    }
                }
            }
        }
        LogicalOperator::Aggregate(n) => {
            if is_expanded(&n.node.keys) && is_expanded(&n.node.aggs) {
                vec![Some(refs_of(n.node.keys.iter().chain(&n.node.aggs)))]
            } else {
                vec![None]
            }
        }
        LogicalOperator::Join(n) => match required {
            None => vec![None, None],
            Some(req) => {
                let [left, right] = n.get_two_children_exact()?;
                let left_schema = left.schema()?;
                let right_schema = right.schema()?;

                let mut left_req: HashSet<String> = n.node.left_on.iter().cloned().collect();
                let mut right_req: HashSet<String> = n.node.right_on.iter().cloned().collect();
                for name in left_schema.names() {
                    if req.contains(name) {
                        left_req.insert(name.to_string());
                    }
                }
                for name in right_schema.names() {
                    let Some(out) = right_output_name(&left_schema, &n.node.right_on, name) else {
                        continue;
                    };
                    if req.contains(&out) {
                        right_req.insert(name.to_string());
                        // Keep the colliding left column so the right
                        // column keeps its suffixed name.
                        if left_schema.contains(name) {
                            left_req.insert(name.to_string());
                        }
                    }
                }
                vec![Some(left_req), Some(right_req)]
            }
        },
    };

    let children = plan
        .children()
        .iter()
        .zip(&children)
        .map(|(child, req)| push(child, req))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(plan.with_children(children)))
}

fn prune_scan(scan: &Node<LogicalScan>, required: &Required) -> Result<Arc<LogicalOperator>> {
    let Some(required) = required else {
        return Ok(Arc::new(LogicalOperator::Scan(scan.clone())));
    };

    let schema = scan.node.source.schema()?;
    let available: Vec<String> = match &scan.node.projection {
        Some(names) => names.clone(),
        None => schema.names().map(str::to_string).collect(),
    };
    let projection: Vec<String> = available
        .iter()
        .filter(|name| required.contains(*name))
        .cloned()
        .collect();

    let projection = if scan.node.projection.is_none() && projection.len() == schema.len() {
        None
    } else {
        tracing::debug!(
            source = scan.node.source.name(),
            read = projection.len(),
            available = available.len(),
            "pruned scan columns"
        );
        Some(projection)
    };

    Ok(Arc::new(LogicalOperator::Scan(Node::new(
        LogicalScan {
            source: scan.node.source.clone(),
            projection,
            predicates: scan.node.predicates.clone(),
        },
        scan.children.clone(),
    ))))
}
