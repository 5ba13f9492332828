use crate::{Command, GenericSqlWriter, QueryResult, Result, SqlWriter};
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

static GENERIC_SQL_WRITER: GenericSqlWriter = GenericSqlWriter::new();

/// Statement size limits of a provider. `None` means unbounded.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverLimits {
    /// Maximum number of parameters in a single statement.
    pub max_parameters: Option<usize>,
    /// Maximum number of rows in a single `VALUES` clause.
    pub max_rows_per_values: Option<usize>,
}

/// Provider side of a data source: runs physical commands.
///
/// Implementations own connections and are shared by every chain built against the same
/// `DataSource`, so they must be safe to call concurrently.
pub trait Executor: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    fn limits(&self) -> DriverLimits {
        DriverLimits::default()
    }

    fn sql_writer(&self) -> &dyn SqlWriter {
        &GENERIC_SQL_WRITER
    }

    /// Run one command, handing each result to `consumer` as it is read.
    fn run(
        &self,
        command: &Command,
        consumer: &mut dyn FnMut(QueryResult) -> Result<()>,
    ) -> Result<()>;

    /// Run one command, streaming the results.
    ///
    /// The cancellation token is the one given to the chain, the provider decides how to abort.
    fn run_async<'s>(
        &'s self,
        command: &'s Command,
        cancel: &'s CancellationToken,
    ) -> BoxStream<'s, Result<QueryResult>>;
}
