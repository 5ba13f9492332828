use anyhow::anyhow;
use async_stream::try_stream;
use futures::{StreamExt, stream::BoxStream};
use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};
use tether_core::{
    CancellationToken, Command, DataSource, DriverLimits, Executor, QueryResult, Result,
    RowsAffected,
};

pub type Responder = Box<dyn Fn(&Command) -> Result<Vec<QueryResult>> + Send + Sync>;

/// In-memory `Executor` answering every command through a responder, recording what it ran.
pub struct ScriptedExecutor {
    name: String,
    limits: DriverLimits,
    delay: Option<Duration>,
    responder: Responder,
    commands: Mutex<Vec<Command>>,
}

impl ScriptedExecutor {
    pub fn new(responder: impl Fn(&Command) -> Result<Vec<QueryResult>> + Send + Sync + 'static) -> Self {
        Self {
            name: "scripted".into(),
            limits: DriverLimits::default(),
            delay: None,
            responder: Box::new(responder),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds affecting `rows` rows.
    pub fn affecting(rows: u64) -> Self {
        Self::new(move |_| Ok(vec![RowsAffected::new(rows).into()]))
    }

    /// Every command fails with `message`.
    pub fn failing(message: &'static str) -> Self {
        Self::new(move |_| Err(anyhow!(message)))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_limits(mut self, limits: DriverLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Waits before answering, the asynchronous path gives up when canceled.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn into_data_source(self) -> (Arc<Self>, DataSource) {
        let executor = Arc::new(self);
        let data_source = DataSource::builder(executor.clone()).build();
        (executor, data_source)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lock().iter().map(|v| v.text.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Command>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command: &Command) {
        log::trace!("Scripted command:\n{}", command.text);
        self.lock().push(command.clone());
    }
}

impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> DriverLimits {
        self.limits
    }

    fn run(
        &self,
        command: &Command,
        consumer: &mut dyn FnMut(QueryResult) -> Result<()>,
    ) -> Result<()> {
        self.record(command);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        for result in (self.responder)(command)? {
            consumer(result)?;
        }
        Ok(())
    }

    fn run_async<'s>(
        &'s self,
        command: &'s Command,
        cancel: &'s CancellationToken,
    ) -> BoxStream<'s, Result<QueryResult>> {
        try_stream! {
            self.record(command);
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                Err::<(), _>(anyhow!("the connection was interrupted"))?;
            }
            for result in (self.responder)(command)? {
                yield result;
            }
        }
        .boxed()
    }
}
