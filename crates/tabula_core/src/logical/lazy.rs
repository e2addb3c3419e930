//! Deferred query building.
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tabula_error::{DbError, Result};

use super::operator::{
    LogicalAggregate,
    LogicalFilter,
    LogicalJoin,
    LogicalLimit,
    LogicalOperator,
    LogicalProject,
    LogicalScan,
    LogicalSort,
    Node,
    ProjectKind,
};
use crate::arrays::field::Schema;
use crate::arrays::table::Table;
use crate::config::execution::ExecutionConfig;
use crate::execution::eager::execute_plan;
use crate::execution::join::JoinType;
use crate::execution::source::{BatchStream, DataSource, MemorySource};
use crate::execution::streaming::{execute_streaming, stream_plan};
use crate::expr::Expr;
use crate::optimizer::{Optimizer, OptimizerFlags};

type PlanCache = Arc<Mutex<HashMap<OptimizerFlags, Arc<LogicalOperator>>>>;

/// A query plan under construction.
///
/// Every builder call wraps the current plan in a new node and returns a new
/// frame, the plan itself is never modified. Nothing runs until `collect`.
#[derive(Debug, Clone)]
pub struct LazyFrame {
    plan: Arc<LogicalOperator>,
    config: ExecutionConfig,
    /// Optimized plans keyed by the rewrites that produced them.
    optimized: PlanCache,
}

impl LazyFrame {
    pub fn scan(source: Arc<dyn DataSource>) -> Self {
        Self::from_plan(
            LogicalOperator::Scan(Node::new(
                LogicalScan {
                    source,
                    projection: None,
                    predicates: Vec::new(),
                },
                Vec::new(),
            )),
            ExecutionConfig::default(),
        )
    }

    fn from_plan(plan: LogicalOperator, config: ExecutionConfig) -> Self {
        LazyFrame {
            plan: Arc::new(plan),
            config,
            optimized: PlanCache::default(),
        }
    }

    fn wrap<N>(&self, node: N, wrap: fn(Node<N>) -> LogicalOperator) -> Self {
        Self::from_plan(
            wrap(Node::new(node, vec![self.plan.clone()])),
            self.config.clone(),
        )
    }

    /// The unoptimized plan.
    pub fn plan(&self) -> &Arc<LogicalOperator> {
        &self.plan
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Same plan with a different configuration. Optimized plans are shared
    /// with this frame.
    pub fn with_config(&self, config: ExecutionConfig) -> Self {
        LazyFrame {
            plan: self.plan.clone(),
            config,
            optimized: self.optimized.clone(),
        }
    }

    pub fn filter(&self, predicate: impl Into<Expr>) -> Self {
        self.wrap(
            LogicalFilter {
                predicate: predicate.into(),
            },
            LogicalOperator::Filter,
        )
    }

    pub fn select(&self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.wrap(
            LogicalProject {
                exprs: exprs.into_iter().collect(),
                kind: ProjectKind::Select,
            },
            LogicalOperator::Project,
        )
    }

    pub fn with_columns(&self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.wrap(
            LogicalProject {
                exprs: exprs.into_iter().collect(),
                kind: ProjectKind::WithColumns,
            },
            LogicalOperator::Project,
        )
    }

    /// Group by keys, groups are output sorted by key.
    pub fn group_by(&self, keys: impl IntoIterator<Item = Expr>) -> LazyGroupBy {
        LazyGroupBy {
            input: self.clone(),
            keys: keys.into_iter().collect(),
            maintain_order: false,
        }
    }

    /// Group by keys, groups are output in order of first occurrence.
    pub fn group_by_stable(&self, keys: impl IntoIterator<Item = Expr>) -> LazyGroupBy {
        LazyGroupBy {
            input: self.clone(),
            keys: keys.into_iter().collect(),
            maintain_order: true,
        }
    }

    pub fn sort(&self, by: impl IntoIterator<Item = Expr>, descending: Vec<bool>) -> Self {
        self.wrap(
            LogicalSort {
                by: by.into_iter().collect(),
                descending,
            },
            LogicalOperator::Sort,
        )
    }

    pub fn limit(&self, n: usize) -> Self {
        self.wrap(LogicalLimit { limit: n }, LogicalOperator::Limit)
    }

    pub fn head(&self, n: usize) -> Self {
        self.limit(n)
    }

    pub fn join<S: Into<String>>(
        &self,
        other: LazyFrame,
        left_on: impl IntoIterator<Item = S>,
        right_on: impl IntoIterator<Item = S>,
        join_type: JoinType,
    ) -> Self {
        Self::from_plan(
            LogicalOperator::Join(Node::new(
                LogicalJoin {
                    left_on: left_on.into_iter().map(Into::into).collect(),
                    right_on: right_on.into_iter().map(Into::into).collect(),
                    join_type,
                },
                vec![self.plan.clone(), other.plan.clone()],
            )),
            self.config.clone(),
        )
    }

    /// Plan after the rewrites enabled in this frame's config.
    pub fn optimized_plan(&self) -> Result<Arc<LogicalOperator>> {
        let flags = OptimizerFlags::from_config(&self.config);
        if let Some(plan) = self.optimized.lock().get(&flags) {
            return Ok(plan.clone());
        }

        let plan = Optimizer::new(flags).optimize(self.plan.clone())?;
        self.optimized.lock().insert(flags, plan.clone());
        Ok(plan)
    }

    pub fn explain(&self, optimized: bool) -> Result<String> {
        if optimized {
            Ok(self.optimized_plan()?.explain())
        } else {
            Ok(self.plan.explain())
        }
    }

    /// The unoptimized plan as text.
    pub fn describe_plan(&self) -> String {
        self.plan.explain()
    }

    pub fn schema(&self) -> Result<Schema> {
        self.plan.schema()
    }

    pub fn collect(&self) -> Result<Table> {
        let plan = self.optimized_plan()?;
        tracing::debug!(root = plan.name(), "executing plan");
        let out = execute_plan(&plan, &self.config)?;
        tracing::debug!(rows = out.height(), "executed plan");

        if self.config.verify_optimized_plan {
            let unoptimized = Optimizer::new(OptimizerFlags::none()).optimize(self.plan.clone())?;
            let expected = execute_plan(&unoptimized, &self.config)?;
            if !expected.equals_unordered(&out) {
                return Err(DbError::compute(format!(
                    "Optimized plan produced different results\nunoptimized:\n{}optimized:\n{}",
                    unoptimized.explain(),
                    plan.explain()
                )));
            }
        }

        Ok(out)
    }

    /// Execute the plan batch by batch.
    pub fn collect_streaming(&self) -> Result<Table> {
        let plan = self.optimized_plan()?;
        execute_streaming(&plan, &self.config)
    }

    /// Output batches of a streaming execution.
    pub fn stream(&self) -> Result<BatchStream> {
        let plan = self.optimized_plan()?;
        stream_plan(&plan, &self.config)
    }
}

/// Keys of a pending group by.
#[derive(Debug, Clone)]
pub struct LazyGroupBy {
    input: LazyFrame,
    keys: Vec<Expr>,
    maintain_order: bool,
}

impl LazyGroupBy {
    pub fn agg(self, aggs: impl IntoIterator<Item = Expr>) -> LazyFrame {
        self.input.wrap(
            LogicalAggregate {
                keys: self.keys,
                aggs: aggs.into_iter().collect(),
                maintain_order: self.maintain_order,
            },
            LogicalOperator::Aggregate,
        )
    }
}

impl Table {
    /// Start a lazy query over this table.
    pub fn lazy(&self) -> LazyFrame {
        LazyFrame::scan(Arc::new(MemorySource::new(self.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::datatype::DataType;
    use crate::expr::{col, lit};

    fn table() -> Table {
        Table::try_from_pairs([
            ("k", Array::from(vec!["x", "y", "x"])),
            ("a", Array::from(vec![1_i64, 2, 3])),
        ])
        .unwrap()
    }

    #[test]
    fn builder_does_not_modify_input() {
        let base = table().lazy();
        let filtered = base.filter(col("a").gt(lit(1)));
        assert_eq!("Scan: memory\n", base.describe_plan());
        assert_eq!(
            "Filter: [(col(\"a\")) > (1)]\n  Scan: memory\n",
            filtered.describe_plan()
        );
    }

    #[test]
    fn optimized_plan_cached_per_flags() {
        let lf = table().lazy().filter(col("a").gt(lit(1)));
        let first = lf.optimized_plan().unwrap();
        let second = lf.optimized_plan().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let no_pushdown = lf.with_config(ExecutionConfig {
            predicate_pushdown: false,
            ..Default::default()
        });
        let third = no_pushdown.optimized_plan().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(2, lf.optimized.lock().len());
    }

    #[test]
    fn collect_plan() {
        let out = table()
            .lazy()
            .filter(col("a").gt(lit(1)))
            .select(vec![col("k"), (col("a") * lit(10)).alias("a10")])
            .collect()
            .unwrap();
        assert_eq!(&Array::from(vec!["y", "x"]), out.column("k").unwrap().array());
        assert_eq!(&Array::from(vec![20_i64, 30]), out.column("a10").unwrap().array());
    }

    #[test]
    fn verify_optimized_plan() {
        let config = ExecutionConfig {
            verify_optimized_plan: true,
            ..Default::default()
        };
        let out = table()
            .lazy()
            .with_config(config)
            .group_by(vec![col("k")])
            .agg(vec![col("a").sum()])
            .filter(col("k").eq(lit("x")))
            .collect()
            .unwrap();
        assert_eq!(&Array::from(vec![4_i64]), out.column("a").unwrap().array());
    }

    #[test]
    fn schema_without_execution() {
        let schema = table()
            .lazy()
            .group_by(vec![col("k")])
            .agg(vec![col("a").mean()])
            .schema()
            .unwrap();
        assert_eq!(Some(&DataType::Float64), schema.get("a"));
    }
}
