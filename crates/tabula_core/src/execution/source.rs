//! Sources of tables for scans.
use std::fmt::Debug;
use std::sync::Arc;

use tabula_error::{DbError, Result};

use crate::arrays::field::Schema;
use crate::arrays::table::Table;
use crate::context::ExecutionState;
use crate::context::select;
use crate::expr::Expr;

/// A non-restartable sequence of row batches.
pub type BatchStream = Box<dyn Iterator<Item = Result<Table>> + Send>;

/// What a scan asks of a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanRequest {
    /// Columns to return, in order. `None` reads every column.
    pub projection: Option<Vec<String>>,
    /// Rows to keep, applied one after another. A later predicate only sees
    /// rows the earlier ones kept. Only passed to sources that support
    /// predicates.
    pub predicates: Vec<Expr>,
}

impl ScanRequest {
    pub fn new(projection: Option<Vec<String>>, predicates: Vec<Expr>) -> Self {
        ScanRequest {
            projection,
            predicates,
        }
    }
}

/// Filter a table by each predicate in turn.
pub fn filter_in_order(table: Table, predicates: &[Expr]) -> Result<Table> {
    let state = ExecutionState::new(false);
    predicates
        .iter()
        .try_fold(table, |table, predicate| select::filter(&table, predicate, &state))
}

/// A reader producing tables, either in one piece or batch by batch.
///
/// Sources that don't support projection or predicates may ignore those parts
/// of the request, the engine applies them after reading.
pub trait DataSource: Debug + Sync + Send {
    /// Name used in plan output.
    fn name(&self) -> &str;

    /// Schema of the full source.
    fn schema(&self) -> Result<Schema>;

    fn read(&self, request: ScanRequest) -> Result<Table>;

    fn read_batches(&self, request: ScanRequest, batch_size: usize) -> Result<BatchStream>;

    fn supports_projection(&self) -> bool {
        false
    }

    fn supports_predicate(&self) -> bool {
        false
    }
}

/// Source serving an in-memory table.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    table: Arc<Table>,
}

impl MemorySource {
    pub fn new(table: Table) -> Self {
        Self::with_name("memory", table)
    }

    pub fn with_name(name: impl Into<String>, table: Table) -> Self {
        MemorySource {
            name: name.into(),
            table: Arc::new(table),
        }
    }

    fn apply_request(&self, table: Table, request: &ScanRequest) -> Result<Table> {
        let table = filter_in_order(table, &request.predicates)?;
        match &request.projection {
            Some(names) => table.select_columns(names),
            None => Ok(table),
        }
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Result<Schema> {
        Ok(self.table.schema())
    }

    fn read(&self, request: ScanRequest) -> Result<Table> {
        self.apply_request(self.table.as_ref().clone(), &request)
    }

    fn read_batches(&self, request: ScanRequest, batch_size: usize) -> Result<BatchStream> {
        if batch_size == 0 {
            return Err(DbError::Config("Batch size must be positive".to_string()));
        }
        let source = self.clone();
        let height = self.table.height();
        let stream = (0..height).step_by(batch_size).map(move |offset| {
            let batch = source.table.slice(offset as i64, batch_size);
            source.apply_request(batch, &request)
        });
        Ok(Box::new(stream))
    }

    fn supports_projection(&self) -> bool {
        true
    }

    fn supports_predicate(&self) -> bool {
        true
    }
}

/// Source handing out a fixed list of batches. Used to feed arbitrary batch
/// splits through the streaming executor.
#[derive(Debug, Clone)]
pub struct BatchSource {
    name: String,
    schema: Schema,
    batches: Arc<Vec<Table>>,
}

impl BatchSource {
    pub fn try_new(batches: Vec<Table>) -> Result<Self> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| DbError::source("Batch source needs at least one batch"))?;
        if let Some(bad) = batches.iter().find(|b| b.schema() != schema) {
            return Err(DbError::source(format!(
                "Batch schema {} differs from {schema}",
                bad.schema()
            )));
        }
        Ok(BatchSource {
            name: "batches".to_string(),
            schema,
            batches: Arc::new(batches),
        })
    }
}

impl DataSource for BatchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    fn read(&self, _request: ScanRequest) -> Result<Table> {
        Table::concat(&self.batches)
    }

    /// Batches are returned as they were given, ignoring the batch size.
    fn read_batches(&self, _request: ScanRequest, _batch_size: usize) -> Result<BatchStream> {
        let batches = self.batches.clone();
        let stream = (0..batches.len()).map(move |idx| Ok(batches[idx].clone()));
        Ok(Box::new(stream))
    }
}

/// Read a scan's table, applying whatever part of the request the source
/// doesn't support.
pub fn read_table(source: &dyn DataSource, request: &ScanRequest) -> Result<Table> {
    let (source_request, post) = split_request(source, request);
    let table = source.read(source_request).map_err(into_source_error)?;
    post.apply(table)
}

/// Like [`read_table`] but batch by batch.
pub fn read_stream(
    source: &dyn DataSource,
    request: &ScanRequest,
    batch_size: usize,
) -> Result<BatchStream> {
    let (source_request, post) = split_request(source, request);
    let stream = source
        .read_batches(source_request, batch_size)
        .map_err(into_source_error)?;
    Ok(Box::new(stream.map(move |batch| {
        post.apply(batch.map_err(into_source_error)?)
    })))
}

fn into_source_error(err: DbError) -> DbError {
    use tabula_error::ErrorKind;
    match err.kind() {
        // Evaluating a pushed down predicate or projection keeps its kind.
        ErrorKind::Source
        | ErrorKind::Schema
        | ErrorKind::Type
        | ErrorKind::LengthMismatch
        | ErrorKind::Cast => err,
        _ => DbError::source_with("Failed to read from source", err),
    }
}

/// Work left to the engine after a source read.
#[derive(Debug)]
struct PostRead {
    predicates: Vec<Expr>,
    projection: Option<Vec<String>>,
}

impl PostRead {
    fn apply(&self, table: Table) -> Result<Table> {
        let table = filter_in_order(table, &self.predicates)?;
        match &self.projection {
            Some(names) => table.select_columns(names),
            None => Ok(table),
        }
    }
}

fn split_request(source: &dyn DataSource, request: &ScanRequest) -> (ScanRequest, PostRead) {
    let predicate_pushed = request.predicates.is_empty() || source.supports_predicate();
    let post_predicates = if predicate_pushed {
        Vec::new()
    } else {
        request.predicates.clone()
    };

    let mut source_projection = request.projection.clone();
    if let Some(names) = &mut source_projection {
        // The engine needs the predicates' columns to filter after reading.
        for name in post_predicates.iter().flat_map(Expr::column_refs) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let projection_pushed = source.supports_projection();
    let post_projection = if projection_pushed && post_predicates.is_empty() {
        None
    } else {
        request.projection.clone()
    };

    let source_request = ScanRequest {
        projection: if projection_pushed {
            source_projection
        } else {
            None
        },
        predicates: if predicate_pushed {
            request.predicates.clone()
        } else {
            Vec::new()
        },
    };
    (
        source_request,
        PostRead {
            predicates: post_predicates,
            projection: post_projection,
        },
    )
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;
    use crate::arrays::array::Array;
    use crate::arrays::datatype::DataType;
    use crate::expr::{col, lit};

    fn table() -> Table {
        Table::try_from_pairs([
            ("a", Array::from(vec![1_i64, 2, 3, 4, 5])),
            ("b", Array::from(vec!["v", "w", "x", "y", "z"])),
        ])
        .unwrap()
    }

    #[test]
    fn memory_source_batches() {
        let source = MemorySource::new(table());
        let request = ScanRequest::new(Some(vec!["b".to_string()]), vec![col("a").gt(1)]);
        let batches: Vec<Table> = source
            .read_batches(request, 2)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(3, batches.len());
        assert_eq!(vec![1, 2, 1], batches.iter().map(|b| b.height()).collect::<Vec<_>>());
        assert_eq!(vec!["b"], batches[0].column_names());
    }

    #[derive(Debug)]
    struct PlainSource(Table);

    impl DataSource for PlainSource {
        fn name(&self) -> &str {
            "plain"
        }

        fn schema(&self) -> Result<Schema> {
            Ok(self.0.schema())
        }

        fn read(&self, _request: ScanRequest) -> Result<Table> {
            Ok(self.0.clone())
        }

        fn read_batches(&self, _request: ScanRequest, _batch_size: usize) -> Result<BatchStream> {
            Ok(Box::new(std::iter::once(Ok(self.0.clone()))))
        }
    }

    #[derive(Debug)]
    struct FailingSource;

    impl DataSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn schema(&self) -> Result<Schema> {
            Ok(Schema::new())
        }

        fn read(&self, _request: ScanRequest) -> Result<Table> {
            Err(DbError::source_with(
                "unreadable",
                std::io::Error::other("disk gone"),
            ))
        }

        fn read_batches(&self, _request: ScanRequest, _batch_size: usize) -> Result<BatchStream> {
            Err(DbError::compute("stream broke"))
        }
    }

    #[test]
    fn engine_applies_unsupported_request() {
        let source = PlainSource(table());
        let request = ScanRequest::new(Some(vec!["b".to_string()]), vec![col("a").lt(3)]);
        let out = read_table(&source, &request).unwrap();
        assert_eq!(vec!["b"], out.column_names());
        assert_eq!(&Array::from(vec!["v", "w"]), out.column("b").unwrap().array());
    }

    #[test]
    fn predicates_apply_in_order() {
        let table = Table::try_from_pairs([(
            "s",
            Array::from(vec!["1.5", "oops", "3.0"]),
        )])
        .unwrap();
        let predicates = vec![
            col("s").neq(lit("oops")),
            col("s").strict_cast(DataType::Float64).gt(lit(2.0)),
        ];

        let source = MemorySource::new(table.clone());
        let out = source.read(ScanRequest::new(None, predicates.clone())).unwrap();
        assert_eq!(&Array::from(vec!["3.0"]), out.column("s").unwrap().array());

        // The engine filters in the same order for sources without predicate
        // support.
        let request = ScanRequest::new(None, predicates);
        let out = read_table(&PlainSource(table), &request).unwrap();
        assert_eq!(&Array::from(vec!["3.0"]), out.column("s").unwrap().array());
    }

    #[test]
    fn source_errors() {
        let err = read_table(&FailingSource, &ScanRequest::default()).unwrap_err();
        assert_eq!(ErrorKind::Source, err.kind());

        let err = read_stream(&FailingSource, &ScanRequest::default(), 8)
            .err()
            .unwrap();
        assert_eq!(ErrorKind::Source, err.kind());
    }
}
