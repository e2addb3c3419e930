//! Immutable logical plan nodes.
use std::fmt;
use std::sync::Arc;

use tabula_error::{DbError, Result};

use crate::arrays::field::Schema;
use crate::arrays::table::Table;
use crate::context::ExecutionState;
use crate::context::group_by::group_by_agg;
use crate::context::select;
use crate::execution::join::{JoinType, join_schema};
use crate::execution::source::DataSource;
use crate::expr::Expr;

/// Wrapper around a node's logic holding its inputs.
///
/// Inputs are shared, rewriting a plan builds new nodes and never mutates an
/// existing one.
#[derive(Debug, Clone)]
pub struct Node<N> {
    pub node: N,
    pub children: Vec<Arc<LogicalOperator>>,
}

impl<N> Node<N> {
    pub fn new(node: N, children: Vec<Arc<LogicalOperator>>) -> Self {
        Node { node, children }
    }

    pub fn get_one_child_exact(&self) -> Result<&Arc<LogicalOperator>> {
        if self.children.len() != 1 {
            return Err(DbError::compute(format!(
                "Expected 1 child to operator, have {}",
                self.children.len()
            )));
        }
        Ok(&self.children[0])
    }

    pub fn get_two_children_exact(&self) -> Result<[&Arc<LogicalOperator>; 2]> {
        if self.children.len() != 2 {
            return Err(DbError::compute(format!(
                "Expected 2 children to operator, have {}",
                self.children.len()
            )));
        }
        Ok([&self.children[0], &self.children[1]])
    }

    /// Same node logic over new inputs.
    pub fn with_children(&self, children: Vec<Arc<LogicalOperator>>) -> Self
    where
        N: Clone,
    {
        Node {
            node: self.node.clone(),
            children,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogicalScan {
    pub source: Arc<dyn DataSource>,
    /// Columns to read, in source order. `None` reads everything.
    pub projection: Option<Vec<String>>,
    /// Predicates applied while reading, in order.
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalFilter {
    pub predicate: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// Output only the expressions.
    Select,
    /// Output the input columns with the expressions added or replaced.
    WithColumns,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalProject {
    pub exprs: Vec<Expr>,
    pub kind: ProjectKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalAggregate {
    pub keys: Vec<Expr>,
    pub aggs: Vec<Expr>,
    pub maintain_order: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalSort {
    pub by: Vec<Expr>,
    pub descending: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalLimit {
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalJoin {
    pub left_on: Vec<String>,
    pub right_on: Vec<String>,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub enum LogicalOperator {
    Scan(Node<LogicalScan>),
    Filter(Node<LogicalFilter>),
    Project(Node<LogicalProject>),
    Aggregate(Node<LogicalAggregate>),
    Sort(Node<LogicalSort>),
    Limit(Node<LogicalLimit>),
    Join(Node<LogicalJoin>),
}

impl LogicalOperator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "Scan",
            Self::Filter(_) => "Filter",
            Self::Project(node) => match node.node.kind {
                ProjectKind::Select => "Select",
                ProjectKind::WithColumns => "WithColumns",
            },
            Self::Aggregate(_) => "Aggregate",
            Self::Sort(_) => "Sort",
            Self::Limit(_) => "Limit",
            Self::Join(_) => "Join",
        }
    }

    pub fn children(&self) -> &[Arc<LogicalOperator>] {
        match self {
            Self::Scan(n) => &n.children,
            Self::Filter(n) => &n.children,
            Self::Project(n) => &n.children,
            Self::Aggregate(n) => &n.children,
            Self::Sort(n) => &n.children,
            Self::Limit(n) => &n.children,
            Self::Join(n) => &n.children,
        }
    }

    /// Same operator over new children.
    pub fn with_children(&self, children: Vec<Arc<LogicalOperator>>) -> LogicalOperator {
        match self {
            Self::Scan(n) => Self::Scan(n.with_children(children)),
            Self::Filter(n) => Self::Filter(n.with_children(children)),
            Self::Project(n) => Self::Project(n.with_children(children)),
            Self::Aggregate(n) => Self::Aggregate(n.with_children(children)),
            Self::Sort(n) => Self::Sort(n.with_children(children)),
            Self::Limit(n) => Self::Limit(n.with_children(children)),
            Self::Join(n) => Self::Join(n.with_children(children)),
        }
    }

    /// Output schema of this node.
    ///
    /// Expression outputs are typed by evaluating the expressions against an
    /// empty table with the input's schema.
    pub fn schema(&self) -> Result<Schema> {
        let state = ExecutionState::new(false);
        match self {
            Self::Scan(scan) => {
                let schema = scan.node.source.schema()?;
                match &scan.node.projection {
                    Some(names) => schema.project(names),
                    None => Ok(schema),
                }
            }
            Self::Filter(n) => n.get_one_child_exact()?.schema(),
            Self::Sort(n) => n.get_one_child_exact()?.schema(),
            Self::Limit(n) => n.get_one_child_exact()?.schema(),
            Self::Project(n) => {
                let input = Table::empty_with_schema(&n.get_one_child_exact()?.schema()?);
                let out = match n.node.kind {
                    ProjectKind::Select => select::select(&input, &n.node.exprs, &state)?,
                    ProjectKind::WithColumns => {
                        select::with_columns(&input, &n.node.exprs, &state)?
                    }
                };
                Ok(out.schema())
            }
            Self::Aggregate(n) => {
                let input = Table::empty_with_schema(&n.get_one_child_exact()?.schema()?);
                let out = group_by_agg(
                    &input,
                    &n.node.keys,
                    &n.node.aggs,
                    n.node.maintain_order,
                    &state,
                )?;
                Ok(out.schema())
            }
            Self::Join(n) => {
                let [left, right] = n.get_two_children_exact()?;
                join_schema(
                    &left.schema()?,
                    &right.schema()?,
                    &n.node.left_on,
                    &n.node.right_on,
                )
            }
        }
    }

    /// Render the plan as an indented tree, one node per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_inner(0, &mut out);
        out
    }

    fn explain_inner(&self, indent: usize, out: &mut String) {
        out.push_str(&" ".repeat(indent * 2));
        out.push_str(&self.to_string());
        out.push('\n');
        for child in self.children() {
            child.explain_inner(indent + 1, out);
        }
    }
}

fn fmt_exprs(exprs: &[Expr]) -> String {
    let exprs: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
    format!("[{}]", exprs.join(", "))
}

/// Single line description of the node, used in explain output and to
/// identify the node in errors.
impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan(n) => {
                write!(f, "Scan: {}", n.node.source.name())?;
                if let Some(projection) = &n.node.projection {
                    write!(f, " projection=[{}]", projection.join(", "))?;
                }
                for predicate in &n.node.predicates {
                    write!(f, " predicate={predicate}")?;
                }
                Ok(())
            }
            Self::Filter(n) => write!(f, "Filter: {}", n.node.predicate),
            Self::Project(n) => write!(f, "{}: {}", self.name(), fmt_exprs(&n.node.exprs)),
            Self::Aggregate(n) => {
                write!(
                    f,
                    "Aggregate: keys={} aggs={}",
                    fmt_exprs(&n.node.keys),
                    fmt_exprs(&n.node.aggs)
                )?;
                if n.node.maintain_order {
                    write!(f, " maintain_order")?;
                }
                Ok(())
            }
            Self::Sort(n) => write!(
                f,
                "Sort: {} descending={:?}",
                fmt_exprs(&n.node.by),
                n.node.descending
            ),
            Self::Limit(n) => write!(f, "Limit: {}", n.node.limit),
            Self::Join(n) => write!(
                f,
                "Join: {} left_on=[{}] right_on=[{}]",
                n.node.join_type,
                n.node.left_on.join(", "),
                n.node.right_on.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::datatype::DataType;
    use crate::execution::source::MemorySource;
    use crate::expr::{col, lit};

    fn scan() -> Arc<LogicalOperator> {
        let table = Table::try_from_pairs([
            ("a", Array::from(vec![1_i64, 2])),
            ("b", Array::from(vec!["x", "y"])),
        ])
        .unwrap();
        Arc::new(LogicalOperator::Scan(Node::new(
            LogicalScan {
                source: Arc::new(MemorySource::new(table)),
                projection: None,
                predicates: Vec::new(),
            },
            Vec::new(),
        )))
    }

    #[test]
    fn schema_from_empty_evaluation() {
        let project = LogicalOperator::Project(Node::new(
            LogicalProject {
                exprs: vec![col("a").mean(), col("b").str().lengths().alias("len")],
                kind: ProjectKind::Select,
            },
            vec![scan()],
        ));
        let schema = project.schema().unwrap();
        assert_eq!(
            vec![("a", &DataType::Float64), ("len", &DataType::UInt32)],
            schema.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn explain_tree() {
        let filter = LogicalOperator::Filter(Node::new(
            LogicalFilter {
                predicate: col("a").gt(lit(1)),
            },
            vec![scan()],
        ));
        assert_eq!(
            "Filter: [(col(\"a\")) > (1)]\n  Scan: memory\n",
            filter.explain()
        );
    }
}
