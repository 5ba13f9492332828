use crate::{
    Affected, ChainError, DataSource, DriverLimits, Insert, Link, LinkEvents, Materialize,
    Materializer, PreparedHook, PreparingHook, Result, RunState, TableRef, ToRow, WriteOptions,
    log_error,
};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Rows per statement given the parameters of one row, `None` when unbounded.
pub fn batch_size(
    table: &TableRef,
    parameters_per_row: usize,
    limits: &DriverLimits,
) -> Result<Option<usize>> {
    if parameters_per_row == 0 {
        return Err(ChainError::invalid_argument("rows", "the row has no column").into());
    }
    let by_parameters = match limits.max_parameters {
        Some(max_parameters) if max_parameters < parameters_per_row => {
            return Err(log_error!(ChainError::BatchTooWide {
                table: table.full_name(),
                parameters: parameters_per_row,
                max_parameters,
            }));
        }
        Some(max_parameters) => Some(max_parameters / parameters_per_row),
        None => None,
    };
    let size = match (by_parameters, limits.max_rows_per_values) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    Ok(size.map(|v| v.max(1)))
}

/// Inserts a sequence of objects in as many multi-row statements as the provider limits require.
///
/// The batches run one after the other and the output is the sum of the affected rows. A failure
/// leaves the previous batches committed: wrap the run in a transaction when that matters.
pub struct InsertBatchSplitter<T> {
    data_source: DataSource,
    table: TableRef,
    objects: Vec<T>,
    options: WriteOptions,
    events: LinkEvents,
}

impl<T: ToRow + Send + Sync> InsertBatchSplitter<T> {
    /// Splits the objects, `None` when there is nothing to insert.
    fn batches(&self) -> Result<Option<std::slice::Chunks<'_, T>>> {
        let Some(sample) = self.objects.first() else {
            log::debug!("Nothing to insert into {}", self.table);
            return Ok(None);
        };
        let parameters = self.options.apply(sample.to_row()).len();
        let size = batch_size(&self.table, parameters, &self.data_source.executor().limits())?
            .unwrap_or(self.objects.len());
        log::debug!(
            "Inserting {} rows into {} in batches of {}",
            self.objects.len(),
            self.table,
            size
        );
        Ok(Some(self.objects.chunks(size)))
    }

    fn batch(&self, rows: &[T]) -> Materializer<Insert, Affected> {
        self.data_source
            .insert_batch(self.table.clone(), rows, self.options.clone())
            .to_affected()
            .with_events(self.events.clone())
    }
}

impl<T: ToRow + Send + Sync> Link for InsertBatchSplitter<T> {
    type Output = u64;

    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn on_preparing(&mut self, hook: PreparingHook) {
        self.events.push_preparing(hook);
    }
    fn on_prepared(&mut self, hook: PreparedHook) {
        self.events.push_prepared(hook);
    }

    fn run(&self, state: &RunState) -> Result<u64> {
        let Some(batches) = self.batches()? else {
            return Ok(0);
        };
        let mut total = 0;
        for rows in batches {
            total += self.batch(rows).run(state)?;
        }
        Ok(total)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<u64>> + Send + 'a {
        async move {
            let Some(batches) = self.batches()? else {
                return Ok(0);
            };
            let mut total = 0;
            for rows in batches {
                total += self.batch(rows).run_async(cancel, state).await?;
            }
            Ok(total)
        }
    }
}

impl DataSource {
    /// Batched insert of `objects`, sized on the provider limits.
    pub fn insert_multiple_batch<T: ToRow + Send + Sync>(
        &self,
        table: impl Into<TableRef>,
        objects: Vec<T>,
        options: WriteOptions,
    ) -> InsertBatchSplitter<T> {
        InsertBatchSplitter {
            data_source: self.clone(),
            table: table.into(),
            objects,
            options,
            events: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_parameters: Option<usize>, max_rows_per_values: Option<usize>) -> DriverLimits {
        DriverLimits {
            max_parameters,
            max_rows_per_values,
        }
    }

    #[test]
    fn size_from_parameters() {
        let table = TableRef::new("trades");
        assert_eq!(
            batch_size(&table, 7, &limits(Some(100), None)).unwrap(),
            Some(14)
        );
        assert_eq!(
            batch_size(&table, 7, &limits(Some(100), Some(10))).unwrap(),
            Some(10)
        );
        assert_eq!(
            batch_size(&table, 7, &limits(None, Some(1000))).unwrap(),
            Some(1000)
        );
        assert_eq!(batch_size(&table, 7, &limits(None, None)).unwrap(), None);
        assert_eq!(
            batch_size(&table, 7, &limits(Some(7), None)).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn row_wider_than_the_limit() {
        let error = batch_size(&TableRef::new("trades"), 9, &limits(Some(8), None)).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ChainError>(),
            Some(ChainError::BatchTooWide {
                parameters: 9,
                max_parameters: 8,
                ..
            })
        ));
        assert!(batch_size(&TableRef::new("trades"), 0, &limits(None, None)).is_err());
    }
}
