pub mod expand;
pub mod predicate_pushdown;
pub mod projection_pushdown;

use std::sync::Arc;

use expand::ExpandRule;
use predicate_pushdown::PredicatePushdown;
use projection_pushdown::ProjectionPushdown;
use tabula_error::Result;

use crate::config::execution::ExecutionConfig;
use crate::logical::operator::LogicalOperator;

/// Which optional rewrites run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimizerFlags {
    pub predicate_pushdown: bool,
    pub projection_pushdown: bool,
}

impl OptimizerFlags {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        OptimizerFlags {
            predicate_pushdown: config.run_predicate_pushdown(),
            projection_pushdown: config.run_projection_pushdown(),
        }
    }

    /// Only the required rewrites.
    pub const fn none() -> Self {
        OptimizerFlags {
            predicate_pushdown: false,
            projection_pushdown: false,
        }
    }
}

#[derive(Debug)]
pub struct Optimizer {
    flags: OptimizerFlags,
}

impl Optimizer {
    pub fn new(flags: OptimizerFlags) -> Self {
        Optimizer { flags }
    }

    /// Run a logical plan through the optimizer.
    ///
    /// Expansion of multi-column expressions always runs.
    pub fn optimize(&self, plan: Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>> {
        let mut plan = ExpandRule.optimize(plan)?;

        if self.flags.predicate_pushdown {
            plan = PredicatePushdown::default().optimize(plan)?;
        }

        if self.flags.projection_pushdown {
            plan = ProjectionPushdown.optimize(plan)?;
        }

        tracing::debug!(flags = ?self.flags, "optimized plan");
        Ok(plan)
    }
}

pub trait OptimizeRule {
    /// Apply an optimization rule to the logical plan.
    fn optimize(&mut self, plan: Arc<LogicalOperator>) -> Result<Arc<LogicalOperator>>;
}
