//! Batched execution.
//!
//! Scans yield bounded batches and each node handles one batch at a time.
//! Nodes that need their whole input (sorts, aggregates that can't be
//! computed incrementally) collect their input first and then run the same
//! code as the materializing executor.
use std::sync::Arc;

use tabula_error::{DbError, Result, ResultExt};

use super::eager::execute_node;
use super::join::JoinHashTable;
use super::source::{BatchStream, ScanRequest, read_stream};
use crate::arrays::array::Array;
use crate::arrays::column::Column;
use crate::arrays::compute::aggregate::{AggKind, Accumulator};
use crate::arrays::datatype::DataType;
use crate::arrays::field::Schema;
use crate::arrays::table::Table;
use crate::config::execution::ExecutionConfig;
use crate::context::eval::evaluate;
use crate::context::group::GroupTable;
use crate::context::group_by::group_order;
use crate::context::{AggState, ExecutionState, select};
use crate::expr::Expr;
use crate::expr::expand::output_name;
use crate::logical::operator::{
    LogicalAggregate,
    LogicalJoin,
    LogicalOperator,
    LogicalProject,
    Node,
    ProjectKind,
};

/// Execute a plan batch by batch and concatenate the output.
pub fn execute_streaming(plan: &Arc<LogicalOperator>, config: &ExecutionConfig) -> Result<Table> {
    let batches = stream_plan(plan, config)?.collect::<Result<Vec<_>>>()?;
    tracing::debug!(batches = batches.len(), "streamed plan");
    if batches.is_empty() {
        return Ok(Table::empty_with_schema(&plan.schema()?));
    }
    Table::concat(&batches)
}

/// Output batches of a plan.
pub fn stream_plan(plan: &Arc<LogicalOperator>, config: &ExecutionConfig) -> Result<BatchStream> {
    let node = plan.to_string();
    let parallel = config.parallel;

    match plan.as_ref() {
        LogicalOperator::Scan(scan) => {
            let request = ScanRequest::new(scan.node.projection.clone(), scan.node.predicates.clone());
            let stream = read_stream(scan.node.source.as_ref(), &request, config.batch_size)
                .context_fn(|| node.clone())?;
            Ok(Box::new(stream.enumerate().map(move |(idx, batch)| {
                let batch = batch.context_fn(|| node.clone())?;
                tracing::trace!(batch = idx, rows = batch.height(), "read batch");
                Ok(batch)
            })))
        }
        LogicalOperator::Filter(n) if n.node.predicate.is_elementwise() => {
            let input = stream_plan(n.get_one_child_exact()?, config)?;
            let predicate = n.node.predicate.clone();
            Ok(map_batches(input, node, move |batch| {
                select::filter(&batch, &predicate, &ExecutionState::new(parallel))
            }))
        }
        LogicalOperator::Project(n) if project_is_streamable(&n.node) => {
            let input = stream_plan(n.get_one_child_exact()?, config)?;
            let project = n.node.clone();
            Ok(map_batches(input, node, move |batch| {
                let state = ExecutionState::new(parallel);
                match project.kind {
                    ProjectKind::Select => select::select(&batch, &project.exprs, &state),
                    ProjectKind::WithColumns => {
                        select::with_columns(&batch, &project.exprs, &state)
                    }
                }
            }))
        }
        LogicalOperator::Limit(n) => {
            let input = stream_plan(n.get_one_child_exact()?, config)?;
            Ok(Box::new(LimitStream {
                input,
                remaining: n.node.limit,
            }))
        }
        LogicalOperator::Aggregate(n) => match StreamingAggregate::try_new(n, &plan.schema()?)? {
            Some(agg) => {
                let input = stream_plan(n.get_one_child_exact()?, config)?;
                Ok(Box::new(std::iter::once_with(move || {
                    agg.run(input, parallel).context_fn(|| node)
                })))
            }
            None => materialize(plan, config),
        },
        LogicalOperator::Join(n) => stream_join(n, node, config),
        _ => materialize(plan, config),
    }
}

fn map_batches<F>(input: BatchStream, node: String, f: F) -> BatchStream
where
    F: Fn(Table) -> Result<Table> + Send + 'static,
{
    Box::new(input.map(move |batch| f(batch?).context_fn(|| node.clone())))
}

/// Whether a projection gives the same rows when run per batch.
///
/// Every expression must be elementwise, and a select needs a column
/// reference, otherwise each batch would produce its own row of literals.
fn project_is_streamable(project: &LogicalProject) -> bool {
    if !project.exprs.iter().all(Expr::is_elementwise) {
        return false;
    }
    match project.kind {
        ProjectKind::WithColumns => true,
        ProjectKind::Select => project.exprs.iter().any(|e| !e.column_refs().is_empty()),
    }
}

/// Collect the children's batches and run the node once over all of them.
fn materialize(plan: &Arc<LogicalOperator>, config: &ExecutionConfig) -> Result<BatchStream> {
    tracing::warn!(node = plan.name(), "materializing input of blocking operator");

    let inputs = plan
        .children()
        .iter()
        .map(|child| Ok((stream_plan(child, config)?, child.clone())))
        .collect::<Result<Vec<_>>>()?;
    let plan = plan.clone();
    let config = config.clone();

    Ok(Box::new(std::iter::once_with(move || {
        let tables = inputs
            .into_iter()
            .map(|(stream, child)| collect_input(stream, &child))
            .collect::<Result<Vec<_>>>()?;
        execute_node(&plan, tables, &config).context_fn(|| plan.to_string())
    })))
}

fn collect_input(stream: BatchStream, plan: &LogicalOperator) -> Result<Table> {
    let batches = stream.collect::<Result<Vec<_>>>()?;
    if batches.is_empty() {
        return Ok(Table::empty_with_schema(&plan.schema()?));
    }
    Table::concat(&batches)
}

/// Stops pulling from its input once enough rows were produced.
struct LimitStream {
    input: BatchStream,
    remaining: usize,
}

impl Iterator for LimitStream {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.input.next()? {
            Ok(batch) => {
                let batch = batch.head(self.remaining);
                self.remaining -= batch.height();
                Some(Ok(batch))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

/// Input of an aggregate that can be updated batch by batch.
#[derive(Debug, Clone)]
enum AggInput {
    Values { kind: AggKind, input: Expr },
    Rows,
}

impl AggInput {
    fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Alias(inner, _) => Self::from_expr(inner),
            Expr::Len => Some(AggInput::Rows),
            Expr::Agg { kind, input }
                if kind.is_decomposable()
                    && input.is_elementwise()
                    && !input.column_refs().is_empty() =>
            {
                Some(AggInput::Values {
                    kind: *kind,
                    input: input.as_ref().clone(),
                })
            }
            _ => None,
        }
    }
}

/// Group by with running per-group accumulators.
struct StreamingAggregate {
    keys: Vec<Expr>,
    key_types: Vec<(String, DataType)>,
    aggs: Vec<(AggInput, String)>,
    accumulators: Vec<Box<dyn Accumulator>>,
    maintain_order: bool,
}

impl StreamingAggregate {
    /// `None` if some key or aggregate can't be computed incrementally.
    fn try_new(node: &Node<LogicalAggregate>, output: &Schema) -> Result<Option<Self>> {
        let agg = &node.node;
        let streamable_key = |key: &Expr| key.is_elementwise() && !key.column_refs().is_empty();
        if !agg.keys.iter().all(streamable_key) {
            return Ok(None);
        }

        let mut aggs = Vec::with_capacity(agg.aggs.len());
        for expr in &agg.aggs {
            match AggInput::from_expr(expr) {
                Some(input) => aggs.push((input, output_name(expr)?)),
                None => return Ok(None),
            }
        }

        // Accumulators are typed by their input, found by evaluating against
        // an empty input.
        let empty = Table::empty_with_schema(&node.get_one_child_exact()?.schema()?);
        let state = ExecutionState::new(false);
        let accumulators = aggs
            .iter()
            .map(|(input, _)| match input {
                AggInput::Values { kind, input } => {
                    kind.accumulator(eval_flat(input, &empty, &state)?.datatype())
                }
                AggInput::Rows => AggKind::Len.accumulator(&DataType::Null),
            })
            .collect::<Result<Vec<_>>>()?;

        let key_types = agg
            .keys
            .iter()
            .map(|key| {
                let name = output_name(key)?;
                let datatype = output.try_get(&name)?.clone();
                Ok((name, datatype))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(StreamingAggregate {
            keys: agg.keys.clone(),
            key_types,
            aggs,
            accumulators,
            maintain_order: agg.maintain_order,
        }))
    }

    fn num_groups(&self, groups: &GroupTable) -> usize {
        if self.keys.is_empty() {
            1
        } else {
            groups.num_groups()
        }
    }

    fn run(mut self, input: BatchStream, parallel: bool) -> Result<Table> {
        let mut groups = GroupTable::new();
        let mut num_batches = 0;

        for batch in input {
            let batch = batch?;
            let state = ExecutionState::new(parallel);
            num_batches += 1;

            let ids = if self.keys.is_empty() {
                vec![0; batch.height()]
            } else {
                let keys = self
                    .keys
                    .iter()
                    .map(|key| eval_flat(key, &batch, &state))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&Array> = keys.iter().collect();
                groups.insert(&refs)?
            };
            let num_groups = self.num_groups(&groups);
            let rows = rows_by_group(&ids, num_groups);

            for ((input, _), acc) in self.aggs.iter().zip(&mut self.accumulators) {
                let values = match input {
                    AggInput::Values { input, .. } => eval_flat(input, &batch, &state)?,
                    AggInput::Rows => Array::new_null(&DataType::Null, batch.height()),
                };
                acc.ensure_groups(num_groups);
                for (group, rows) in rows.iter().enumerate() {
                    if !rows.is_empty() {
                        acc.update(group, &values, rows)?;
                    }
                }
            }
            tracing::trace!(batch = num_batches, groups = num_groups, "aggregated batch");
        }

        let num_groups = self.num_groups(&groups);
        tracing::debug!(batches = num_batches, groups = num_groups, "finished streaming aggregate");

        let order = if self.keys.is_empty() {
            vec![0]
        } else {
            groups.output_order(self.keys.len(), group_order(self.maintain_order))?
        };

        let mut columns = Vec::with_capacity(self.key_types.len() + self.aggs.len());
        for (col, (name, datatype)) in self.key_types.iter().enumerate() {
            let values = order.iter().map(|&id| groups.keys()[id][col].clone());
            columns.push(Column::new(name.clone(), Array::try_from_scalars(datatype, values)?));
        }
        for ((_, name), acc) in self.aggs.iter().zip(&mut self.accumulators) {
            acc.ensure_groups(num_groups);
            columns.push(Column::new(name.clone(), acc.finish()?.take(&order)));
        }

        Table::try_new_with_height(columns, num_groups)
    }
}

fn eval_flat(expr: &Expr, batch: &Table, state: &ExecutionState) -> Result<Array> {
    evaluate(expr, batch, None, state)
        .and_then(AggState::into_array)
        .and_then(|arr| arr.broadcast(batch.height()))
        .context_fn(|| format!("expression '{expr}'"))
}

/// Rows of the batch per group id, in batch order.
fn rows_by_group(ids: &[usize], num_groups: usize) -> Vec<Vec<usize>> {
    let mut rows = vec![Vec::new(); num_groups];
    for (row, &id) in ids.iter().enumerate() {
        rows[id].push(row);
    }
    rows
}

/// Build the right side once, then probe it with each left batch.
fn stream_join(
    join: &Node<LogicalJoin>,
    node: String,
    config: &ExecutionConfig,
) -> Result<BatchStream> {
    let [left, right] = join.get_two_children_exact()?;
    let left_stream = stream_plan(left, config)?;
    let mut right_input = Some((stream_plan(right, config)?, right.clone()));
    let logical = join.node.clone();
    let mut table: Option<JoinHashTable> = None;

    Ok(Box::new(left_stream.map(move |batch| {
        let batch = batch?;
        if table.is_none() {
            if let Some((stream, plan)) = right_input.take() {
                let right = collect_input(stream, &plan)?;
                let built = JoinHashTable::build(&batch.schema(), right, &logical.left_on, &logical.right_on)
                    .context_fn(|| node.clone())?;
                table = Some(built);
            }
        }
        match &table {
            Some(table) => table
                .probe(&batch, &logical.left_on, logical.join_type)
                .context_fn(|| node.clone()),
            None => Err(DbError::compute("Join hash table was not built")),
        }
    })))
}
