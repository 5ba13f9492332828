use crate::{
    CacheAdapter, ChainError, Error, ExecutionToken, Executor, QueryResult, Result, RowsAffected,
    log_error, truncate_long,
};
use futures::StreamExt;
use std::{
    any::Any,
    fmt::{self, Debug},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// Caller supplied value handed unchanged to the execution listeners of one run.
#[derive(Default, Clone)]
pub struct RunState(Option<Arc<dyn Any + Send + Sync>>);

impl RunState {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(..) => f.write_str("RunState(..)"),
            None => f.write_str("RunState(None)"),
        }
    }
}

/// Lifecycle notification of one logical operation (all the statements of a token chain).
#[derive(Debug)]
pub enum ExecutionEvent<'a> {
    Started {
        token: &'a ExecutionToken,
        state: &'a RunState,
    },
    Finished {
        token: &'a ExecutionToken,
        state: &'a RunState,
        duration: Duration,
        rows_affected: Option<RowsAffected>,
    },
    Failed {
        token: &'a ExecutionToken,
        state: &'a RunState,
        duration: Duration,
        error: &'a Error,
    },
}

impl ExecutionEvent<'_> {
    pub fn token(&self) -> &ExecutionToken {
        match self {
            ExecutionEvent::Started { token, .. }
            | ExecutionEvent::Finished { token, .. }
            | ExecutionEvent::Failed { token, .. } => token,
        }
    }
}

pub type ExecutionListener = Arc<dyn Fn(&ExecutionEvent<'_>) + Send + Sync>;

/// Settings of a data source.
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    pub name: String,
    /// Timeout given to every command, appenders can override it.
    pub default_timeout: Option<Duration>,
    /// Strict mode refuses UPDATE and DELETE without a filter.
    pub strict_mode: bool,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            default_timeout: None,
            strict_mode: true,
        }
    }
}

struct DataSourceInner {
    config: DataSourceConfig,
    executor: Arc<dyn Executor>,
    cache: Option<Arc<dyn CacheAdapter>>,
    listeners: Vec<ExecutionListener>,
}

/// The database a chain targets: an `Executor`, an optional cache adapter and the listeners of
/// the execution lifecycle. Cheap to clone, every clone shares the same collaborators.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<DataSourceInner>,
}

impl DataSource {
    pub fn builder(executor: Arc<dyn Executor>) -> DataSourceBuilder {
        DataSourceBuilder {
            config: Default::default(),
            executor,
            cache: None,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &dyn Executor {
        self.inner.executor.as_ref()
    }

    /// The cache adapter, a missing one is a configuration error.
    pub fn cache(&self) -> Result<&Arc<dyn CacheAdapter>> {
        self.inner.cache.as_ref().ok_or_else(|| {
            log_error!(ChainError::MissingCache {
                data_source: self.name().to_owned(),
            })
        })
    }

    fn notify(&self, event: &ExecutionEvent<'_>) {
        for listener in &self.inner.listeners {
            listener(event);
        }
    }

    fn finish(
        &self,
        token: &ExecutionToken,
        state: &RunState,
        started: Instant,
        result: Result<Option<RowsAffected>>,
    ) -> Result<Option<RowsAffected>> {
        let duration = started.elapsed();
        match &result {
            Ok(rows_affected) => self.notify(&ExecutionEvent::Finished {
                token,
                state,
                duration,
                rows_affected: *rows_affected,
            }),
            Err(error) => {
                log::error!(
                    "Operation `{}` failed after {:?}: {:#}",
                    token.operation_name(),
                    duration,
                    error
                );
                self.notify(&ExecutionEvent::Failed {
                    token,
                    state,
                    duration,
                    error,
                })
            }
        }
        result
    }

    /// Runs every statement of `token`, feeding the results to `consumer`.
    ///
    /// Returns the affected rows summed over all statements, `None` when no statement reported
    /// any.
    pub fn execute(
        &self,
        token: &ExecutionToken,
        consumer: &mut dyn FnMut(QueryResult) -> Result<()>,
        state: &RunState,
    ) -> Result<Option<RowsAffected>> {
        let started = Instant::now();
        self.notify(&ExecutionEvent::Started { token, state });
        let mut result = Ok(None);
        for statement in token.iter() {
            match self.execute_statement(statement, consumer) {
                Ok(affected) => result = Ok(merge(result.ok().flatten(), affected)),
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.finish(token, state, started, result)
    }

    fn execute_statement(
        &self,
        statement: &ExecutionToken,
        consumer: &mut dyn FnMut(QueryResult) -> Result<()>,
    ) -> Result<Option<RowsAffected>> {
        let command = statement.build_command(self.inner.config.default_timeout);
        log::debug!(
            "{} runs `{}`:\n{}",
            self.inner.executor.name(),
            statement.operation_name(),
            truncate_long!(command.text)
        );
        let mut affected = None;
        self.inner.executor.run(&command, &mut |result| {
            if let QueryResult::Affected(v) = &result {
                affected = merge(affected, Some(*v));
            }
            consumer(result)
        })?;
        statement.fire_command_executed(affected);
        Ok(affected)
    }

    /// Asynchronous twin of [`DataSource::execute`].
    ///
    /// `cancel` is forwarded to the executor. A failure observed while it is cancelled becomes
    /// [`ChainError::Canceled`].
    pub async fn execute_async(
        &self,
        token: &ExecutionToken,
        consumer: &mut (dyn FnMut(QueryResult) -> Result<()> + Send),
        cancel: &CancellationToken,
        state: &RunState,
    ) -> Result<Option<RowsAffected>> {
        let started = Instant::now();
        self.notify(&ExecutionEvent::Started { token, state });
        let mut result = Ok(None);
        for statement in token.iter() {
            if cancel.is_cancelled() {
                result = Err(canceled(statement));
                break;
            }
            match self
                .execute_statement_async(statement, consumer, cancel)
                .await
            {
                Ok(affected) => result = Ok(merge(result.ok().flatten(), affected)),
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.finish(token, state, started, result)
    }

    async fn execute_statement_async(
        &self,
        statement: &ExecutionToken,
        consumer: &mut (dyn FnMut(QueryResult) -> Result<()> + Send),
        cancel: &CancellationToken,
    ) -> Result<Option<RowsAffected>> {
        let command = statement.build_command(self.inner.config.default_timeout);
        log::debug!(
            "{} runs `{}`:\n{}",
            self.inner.executor.name(),
            statement.operation_name(),
            truncate_long!(command.text)
        );
        let mut affected = None;
        let mut stream = self.inner.executor.run_async(&command, cancel);
        while let Some(result) = stream.next().await {
            let result = match result {
                Ok(v) => v,
                Err(error) if cancel.is_cancelled() => {
                    log::debug!("Provider error while canceled: {:#}", error);
                    return Err(canceled(statement));
                }
                Err(error) => return Err(error),
            };
            if let QueryResult::Affected(v) = &result {
                affected = merge(affected, Some(*v));
            }
            consumer(result)?;
        }
        drop(stream);
        statement.fire_command_executed(affected);
        Ok(affected)
    }
}

fn merge(lhs: Option<RowsAffected>, rhs: Option<RowsAffected>) -> Option<RowsAffected> {
    match (lhs, rhs) {
        (Some(mut lhs), Some(rhs)) => {
            lhs.extend([rhs]);
            Some(lhs)
        }
        (lhs, rhs) => lhs.or(rhs),
    }
}

fn canceled(statement: &ExecutionToken) -> Error {
    ChainError::Canceled {
        operation: statement.operation_name().to_owned(),
    }
    .into()
}

impl Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("config", &self.inner.config)
            .field("executor", &self.inner.executor.name())
            .field("cache", &self.inner.cache.is_some())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

pub struct DataSourceBuilder {
    config: DataSourceConfig,
    executor: Arc<dyn Executor>,
    cache: Option<Arc<dyn CacheAdapter>>,
    listeners: Vec<ExecutionListener>,
}

impl DataSourceBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }
    pub fn cache(mut self, cache: Arc<dyn CacheAdapter>) -> Self {
        self.cache = Some(cache);
        self
    }
    pub fn listener(mut self, listener: ExecutionListener) -> Self {
        self.listeners.push(listener);
        self
    }
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }
    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.config.strict_mode = strict;
        self
    }
    pub fn build(self) -> DataSource {
        DataSource {
            inner: Arc::new(DataSourceInner {
                config: self.config,
                executor: self.executor,
                cache: self.cache,
                listeners: self.listeners,
            }),
        }
    }
}
