//! Move filters towards the scan.
use std::sync::Arc;

use hashbrown::HashMap;
use tabula_error::{DbError, ErrorKind, Result};

use super::OptimizeRule;
use crate::expr::expand::output_name;
use crate::expr::{Expr, Operator};
use crate::execution::join::{JoinType, right_output_name};
use crate::logical::operator::{
    LogicalAggregate,
    LogicalFilter,
    LogicalJoin,
    LogicalOperator,
    LogicalProject,
    LogicalScan,
    LogicalSort,
    Node,
    ProjectKind,
};

/// Recursively split an expression on AND, putting the split expressions in
/// `out`.
pub fn split_conjunction(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryExpr {
            left,
            op: Operator::And,
            right,
        } => {
            split_conjunction(*left, out);
            split_conjunction(*right, out);
        }
        other => out.push(other),
    }
}

/// Combine expressions with AND. `None` if there are none.
pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(|acc, expr| acc.and(expr))
}

/// Plain column an expression passes through unchanged, if any.
fn pass_through_column(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(name) => Some(name),
        Expr::Alias(inner, _) => match inner.as_ref() {
            Expr::Column(name) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

/// Rewrite column references of a filter through a name mapping.
///
/// Fails with `UnsupportedPushdown` if the filter references a column the
/// mapping doesn't resolve to an input column.
fn rewrite_refs(filter: &Expr, mapping: &HashMap<String, Option<String>>) -> Result<Expr> {
    for name in filter.column_refs() {
        if !matches!(mapping.get(&name), Some(Some(_))) {
            return Err(DbError::UnsupportedPushdown(format!(
                "column '{name}' is not available below this node"
            )));
        }
    }
    filter.clone().transform_up(&mut |expr| match expr {
        Expr::Column(name) => match mapping.get(&name) {
            Some(Some(source)) => Ok(Expr::Column(source.clone())),
            _ => Ok(Expr::Column(name)),
        },
        other => Ok(other),
    })
}

/// Conjuncts of one filter node. They see the same rows, conjuncts of
/// different filters don't.
type Stage = Vec<Expr>;

/// Filters collected on the way down, the uppermost first.
#[derive(Debug, Default)]
pub struct PredicatePushdown {
    filters: Vec<Stage>,
}

impl OptimizeRule for PredicatePushdown {
    fn optimize(&mut self, plan: Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>> {
        match plan.as_ref() {
            LogicalOperator::Filter(filter) => self.pushdown_filter(filter),
            LogicalOperator::Sort(sort) => self.pushdown_sort(&plan, sort),
            LogicalOperator::Project(project) => self.pushdown_project(&plan, project),
            LogicalOperator::Aggregate(agg) => self.pushdown_aggregate(agg),
            LogicalOperator::Join(join) => self.pushdown_join(join),
            LogicalOperator::Scan(scan) => Ok(self.pushdown_scan(scan)),
            LogicalOperator::Limit(_) => self.stop_pushdown(&plan),
        }
    }
}

impl PredicatePushdown {
    fn with_filters(filters: Vec<Stage>) -> Self {
        PredicatePushdown { filters }
    }

    /// Adds a filter node's predicate as the lowest stage.
    fn add_filter(&mut self, expr: Expr) {
        let mut stage = Vec::new();
        split_conjunction(expr, &mut stage);
        self.filters.push(stage);
    }

    /// Wrap a plan in one filter per stage, the lowest stage innermost.
    fn wrap_in_filter(plan: Arc<LogicalOperator>, stages: Vec<Stage>) -> Arc<LogicalOperator> {
        stages
            .into_iter()
            .rev()
            .fold(plan, |plan, stage| match and_all(stage) {
                Some(predicate) => Arc::new(LogicalOperator::Filter(Node::new(
                    LogicalFilter { predicate },
                    vec![plan],
                ))),
                None => plan,
            })
    }

    /// Stops the push down for this set of filters, and wraps the plan in new
    /// filter nodes.
    ///
    /// Children get a separate pushdown of their own.
    fn stop_pushdown(&mut self, plan: &Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>> {
        let children = plan
            .children()
            .iter()
            .map(|child| PredicatePushdown::default().optimize(child.clone()))
            .collect::<Result<Vec<_>>>()?;
        let plan = Arc::new(plan.with_children(children));
        Ok(Self::wrap_in_filter(plan, std::mem::take(&mut self.filters)))
    }

    /// Decide for every conjunct which input of a node it moves into, if
    /// any. `place` returns the input index and the rewritten conjunct.
    ///
    /// Stages are visited from the lowest up. Once part of a stage stays
    /// above the node every stage above it stays too, below the node they
    /// would see rows that stage removes.
    ///
    /// Returns the pushed stages per input and the stages left above the
    /// node, both uppermost first.
    fn partition_stages<F>(
        &mut self,
        num_inputs: usize,
        mut place: F,
    ) -> Result<(Vec<Vec<Stage>>, Vec<Stage>)>
    where
        F: FnMut(&Expr) -> Result<Option<(usize, Expr)>>,
    {
        let mut pushed: Vec<Vec<Stage>> = vec![Vec::new(); num_inputs];
        let mut remaining = Vec::new();
        let mut blocked = false;

        for stage in std::mem::take(&mut self.filters).into_iter().rev() {
            if blocked {
                remaining.push(stage);
                continue;
            }
            let mut stage_pushed: Vec<Stage> = vec![Vec::new(); num_inputs];
            let mut stage_remaining = Vec::new();
            for filter in stage {
                match place(&filter)? {
                    Some((input, rewritten)) => stage_pushed[input].push(rewritten),
                    None => {
                        tracing::debug!(%filter, "filter not pushed down");
                        stage_remaining.push(filter);
                    }
                }
            }
            for (input, stage) in stage_pushed.into_iter().enumerate() {
                if !stage.is_empty() {
                    pushed[input].push(stage);
                }
            }
            if !stage_remaining.is_empty() {
                remaining.push(stage_remaining);
                blocked = true;
            }
        }

        for stages in &mut pushed {
            stages.reverse();
        }
        remaining.reverse();
        Ok((pushed, remaining))
    }

    /// Like `partition_stages` for a node with a single input, where a
    /// conjunct moves if its columns resolve through the mapping.
    fn partition_through(
        &mut self,
        mapping: &HashMap<String, Option<String>>,
    ) -> Result<(Vec<Stage>, Vec<Stage>)> {
        let (mut pushed, remaining) =
            self.partition_stages(1, |filter| match rewrite_refs(filter, mapping) {
                Ok(rewritten) => Ok(Some((0, rewritten))),
                Err(e) if e.kind() == ErrorKind::UnsupportedPushdown => Ok(None),
                Err(e) => Err(e),
            })?;
        Ok((pushed.remove(0), remaining))
    }

    fn pushdown_filter(&mut self, filter: &Node<LogicalFilter>) -> Result<Arc<LogicalOperator>> {
        let child = filter.get_one_child_exact()?.clone();
        let predicate = filter.node.predicate.clone();

        // A predicate that looks at more than one row at a time sees
        // different inputs if anything is filtered below it.
        if !predicate.is_elementwise() {
            let child = PredicatePushdown::default().optimize(child)?;
            let plan = Arc::new(LogicalOperator::Filter(filter.with_children(vec![child])));
            return Ok(Self::wrap_in_filter(plan, std::mem::take(&mut self.filters)));
        }

        self.add_filter(predicate);
        self.optimize(child)
    }

    fn pushdown_sort(
        &mut self,
        plan: &Arc<LogicalOperator>,
        sort: &Node<LogicalSort>,
    ) -> Result<Arc<LogicalOperator>> {
        if !sort.node.by.iter().all(Expr::is_elementwise) {
            return self.stop_pushdown(plan);
        }
        let child = self.optimize(sort.get_one_child_exact()?.clone())?;
        Ok(Arc::new(LogicalOperator::Sort(sort.with_children(vec![child]))))
    }

    fn pushdown_project(
        &mut self,
        plan: &Arc<LogicalOperator>,
        project: &Node<LogicalProject>,
    ) -> Result<Arc<LogicalOperator>> {
        let exprs = &project.node.exprs;
        // Filtering below changes the inputs of anything that isn't
        // elementwise. A select of only literals has one row no matter the
        // input.
        let row_preserving = match project.node.kind {
            ProjectKind::Select => exprs.iter().any(|e| !e.column_refs().is_empty()),
            ProjectKind::WithColumns => true,
        };
        if !row_preserving || !exprs.iter().all(Expr::is_elementwise) {
            return self.stop_pushdown(plan);
        }

        let child = project.get_one_child_exact()?.clone();
        let mut mapping: HashMap<String, Option<String>> = HashMap::new();
        if project.node.kind == ProjectKind::WithColumns {
            for name in child.schema()?.names() {
                mapping.insert(name.to_string(), Some(name.to_string()));
            }
        }
        for expr in exprs {
            mapping.insert(
                output_name(expr)?,
                pass_through_column(expr).map(str::to_string),
            );
        }

        let (pushed, remaining) = self.partition_through(&mapping)?;
        if !pushed.is_empty() {
            tracing::debug!(filters = pushed.len(), node = %plan.name(), "pushed filters through projection");
        }
        let child = PredicatePushdown::with_filters(pushed).optimize(child)?;
        let plan = Arc::new(LogicalOperator::Project(project.with_children(vec![child])));
        Ok(Self::wrap_in_filter(plan, remaining))
    }

    fn pushdown_aggregate(&mut self, agg: &Node<LogicalAggregate>) -> Result<Arc<LogicalOperator>> {
        let mut mapping: HashMap<String, Option<String>> = HashMap::new();
        for key in &agg.node.keys {
            mapping.insert(output_name(key)?, pass_through_column(key).map(str::to_string));
        }

        // Without keys there is always exactly one output row, filtering
        // below would not remove it.
        let (pushed, remaining) = if agg.node.keys.is_empty() {
            (Vec::new(), std::mem::take(&mut self.filters))
        } else {
            self.partition_through(&mapping)?
        };

        let child = agg.get_one_child_exact()?.clone();
        let child = PredicatePushdown::with_filters(pushed).optimize(child)?;
        let plan = Arc::new(LogicalOperator::Aggregate(agg.with_children(vec![child])));
        Ok(Self::wrap_in_filter(plan, remaining))
    }

    fn pushdown_join(&mut self, join: &Node<LogicalJoin>) -> Result<Arc<LogicalOperator>> {
        let [left, right] = join.get_two_children_exact()?;
        let left_schema = left.schema()?;
        let right_schema = right.schema()?;

        let left_mapping: HashMap<String, Option<String>> = left_schema
            .names()
            .map(|name| (name.to_string(), Some(name.to_string())))
            .collect();
        let right_mapping: HashMap<String, Option<String>> = right_schema
            .names()
            .filter_map(|name| {
                right_output_name(&left_schema, &join.node.right_on, name)
                    .map(|out| (out, Some(name.to_string())))
            })
            .collect();

        let inner = join.node.join_type == JoinType::Inner;
        let (mut pushed, remaining) = self.partition_stages(2, |filter| {
            // Below an inner join a filter also sees the rows without a
            // match, they must not be able to fail it.
            if inner && filter.is_fallible() {
                return Ok(None);
            }
            if let Ok(rewritten) = rewrite_refs(filter, &left_mapping) {
                return Ok(Some((0, rewritten)));
            }
            // Right side filters would drop the null rows a left join adds.
            if inner {
                if let Ok(rewritten) = rewrite_refs(filter, &right_mapping) {
                    return Ok(Some((1, rewritten)));
                }
            }
            Ok(None)
        })?;
        let right_filters = pushed.pop().unwrap_or_default();
        let left_filters = pushed.pop().unwrap_or_default();
        tracing::debug!(
            left = left_filters.len(),
            right = right_filters.len(),
            remaining = remaining.len(),
            "pushed filters into join inputs"
        );

        let left = PredicatePushdown::with_filters(left_filters).optimize(left.clone())?;
        let right = PredicatePushdown::with_filters(right_filters).optimize(right.clone())?;
        let plan = Arc::new(LogicalOperator::Join(join.with_children(vec![left, right])));
        Ok(Self::wrap_in_filter(plan, remaining))
    }

    /// Stages become scan predicates, applied after any the scan already
    /// has, lowest stage first.
    fn pushdown_scan(&mut self, scan: &Node<LogicalScan>) -> Arc<LogicalOperator> {
        if self.filters.is_empty() {
            return Arc::new(LogicalOperator::Scan(scan.clone()));
        }
        tracing::debug!(
            filters = self.filters.len(),
            source = scan.node.source.name(),
            "pushed filters into scan"
        );

        let mut predicates = scan.node.predicates.clone();
        predicates.extend(self.filters.drain(..).rev().filter_map(|stage| and_all(stage)));
        Arc::new(LogicalOperator::Scan(Node::new(
            LogicalScan {
                source: scan.node.source.clone(),
                projection: scan.node.projection.clone(),
                predicates,
            },
            scan.children.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::table::Table;
    use crate::expr::{col, lit};
    use crate::optimizer::expand::ExpandRule;

    fn table() -> Table {
        Table::try_from_pairs([
            ("k", Array::from(vec!["x", "y", "x"])),
            ("a", Array::from(vec![1_i64, 2, 3])),
        ])
        .unwrap()
    }

    fn pushdown(plan: Arc<LogicalOperator>) -> String {
        let plan = ExpandRule.optimize(plan).unwrap();
        PredicatePushdown::default().optimize(plan).unwrap().explain()
    }

    #[test]
    fn filter_reaches_scan() {
        let plan = table()
            .lazy()
            .with_columns(vec![(col("a") * lit(2)).alias("b")])
            .sort(vec![col("a")], vec![false])
            .filter(col("a").gt(lit(1)).and(col("k").eq(lit("x"))))
            .plan()
            .clone();
        let expected = [
            "Sort: [col(\"a\")] descending=[false]",
            "  WithColumns: [[(col(\"a\")) * (2)].alias(\"b\")]",
            "    Scan: memory predicate=[([(col(\"a\")) > (1)]) & ([(col(\"k\")) == (\"x\")])]",
            "",
        ]
        .join("\n");
        assert_eq!(expected, pushdown(plan));
    }

    #[test]
    fn stacked_filters_stay_separate() {
        let plan = table()
            .lazy()
            .filter(col("k").eq(lit("x")))
            .filter(col("a").gt(lit(1)))
            .plan()
            .clone();
        assert_eq!(
            "Scan: memory predicate=[(col(\"k\")) == (\"x\")] predicate=[(col(\"a\")) > (1)]\n",
            pushdown(plan)
        );
    }

    #[test]
    fn filter_above_blocked_filter_stays() {
        let plan = table()
            .lazy()
            .with_columns(vec![(col("a") * lit(2)).alias("b")])
            .filter(col("b").gt(lit(2)))
            .filter(col("a").lt(lit(3)))
            .plan()
            .clone();
        let expected = [
            "Filter: [(col(\"a\")) < (3)]",
            "  Filter: [(col(\"b\")) > (2)]",
            "    WithColumns: [[(col(\"a\")) * (2)].alias(\"b\")]",
            "      Scan: memory",
            "",
        ]
        .join("\n");
        assert_eq!(expected, pushdown(plan));
    }

    #[test]
    fn computed_column_stays_above() {
        let plan = table()
            .lazy()
            .with_columns(vec![(col("a") * lit(2)).alias("b")])
            .filter(col("b").gt(lit(2)))
            .plan()
            .clone();
        let out = pushdown(plan);
        assert!(out.starts_with("Filter: [(col(\"b\")) > (2)]"), "{out}");
        assert!(out.contains("Scan: memory\n"), "{out}");
    }

    #[test]
    fn renamed_column_rewritten() {
        let plan = table()
            .lazy()
            .select(vec![col("a").alias("renamed")])
            .filter(col("renamed").lt(lit(3)))
            .plan()
            .clone();
        let out = pushdown(plan);
        assert!(out.contains("predicate=[(col(\"a\")) < (3)]"), "{out}");
    }

    #[test]
    fn aggregate_blocks_non_key_filters() {
        let plan = table()
            .lazy()
            .group_by(vec![col("k")])
            .agg(vec![col("a").sum()])
            .filter(col("a").gt(lit(1)).and(col("k").eq(lit("x"))))
            .plan()
            .clone();
        let out = pushdown(plan);
        assert!(out.starts_with("Filter: [(col(\"a\")) > (1)]"), "{out}");
        assert!(out.contains("predicate=[(col(\"k\")) == (\"x\")]"), "{out}");
    }

    #[test]
    fn window_filter_is_a_barrier() {
        let plan = table()
            .lazy()
            .filter(col("a").gt(lit(1)))
            .filter(col("a").lt(col("a").mean().over(vec![col("k")])))
            .plan()
            .clone();
        let out = pushdown(plan);
        assert!(out.starts_with("Filter: [(col(\"a\")) < "), "{out}");
        assert!(out.contains("predicate=[(col(\"a\")) > (1)]"), "{out}");
    }

    #[test]
    fn limit_stops_pushdown() {
        let plan = table().lazy().limit(2).filter(col("a").gt(lit(1))).plan().clone();
        let out = pushdown(plan);
        assert_eq!("Filter: [(col(\"a\")) > (1)]\n  Limit: 2\n    Scan: memory\n", out);
    }
}
