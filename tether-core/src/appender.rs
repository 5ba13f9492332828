use crate::{
    Command, DataSource, ExecutionToken, Link, PreparedHook, PreparingHook, Result, RunState,
    StatementOptions,
};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Pass-through link that only registers hooks on its predecessor.
pub struct Appender<L> {
    previous: L,
}

impl<L: Link> Appender<L> {
    pub fn new(previous: L) -> Self {
        Self { previous }
    }

    pub fn preparing(mut self, hook: impl Fn(&mut StatementOptions) + Send + Sync + 'static) -> Self {
        self.previous.on_preparing(Arc::new(hook));
        self
    }

    pub fn prepared(mut self, hook: impl Fn(&mut ExecutionToken) + Send + Sync + 'static) -> Self {
        self.previous.on_prepared(Arc::new(hook));
        self
    }

    /// Registers `hook` on every command of the prepared token.
    pub fn command_built(self, hook: impl Fn(&mut Command) + Send + Sync + 'static) -> Self {
        let hook = Arc::new(hook);
        self.prepared(move |token| token.on_command_built(hook.clone()))
    }

    pub fn previous(&self) -> &L {
        &self.previous
    }

    pub fn into_inner(self) -> L {
        self.previous
    }
}

impl<L: Link> Link for Appender<L> {
    type Output = L::Output;

    fn data_source(&self) -> &DataSource {
        self.previous.data_source()
    }
    fn on_preparing(&mut self, hook: PreparingHook) {
        self.previous.on_preparing(hook);
    }
    fn on_prepared(&mut self, hook: PreparedHook) {
        self.previous.on_prepared(hook);
    }
    fn run(&self, state: &RunState) -> Result<Self::Output> {
        self.previous.run(state)
    }
    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        self.previous.run_async(cancel, state)
    }
}

/// Maps the output of the previous link.
pub struct Transform<L: Link, U> {
    previous: L,
    f: Box<dyn Fn(L::Output) -> Result<U> + Send + Sync>,
}

impl<L: Link, U: Send> Transform<L, U> {
    pub fn new(previous: L, f: impl Fn(L::Output) -> Result<U> + Send + Sync + 'static) -> Self {
        Self {
            previous,
            f: Box::new(f),
        }
    }
}

impl<L: Link, U: Send> Link for Transform<L, U> {
    type Output = U;

    fn data_source(&self) -> &DataSource {
        self.previous.data_source()
    }
    fn on_preparing(&mut self, hook: PreparingHook) {
        self.previous.on_preparing(hook);
    }
    fn on_prepared(&mut self, hook: PreparedHook) {
        self.previous.on_prepared(hook);
    }
    fn run(&self, state: &RunState) -> Result<U> {
        (self.f)(self.previous.run(state)?)
    }
    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<U>> + Send + 'a {
        async move { (self.f)(self.previous.run_async(cancel, state).await?) }
    }
}
