use crate::{
    Appender, CacheAllItems, CachePolicy, CacheResult, Cacheable, CachedKeys, DataSource,
    ExecutionToken, InvalidateCache, JoinOptions, KeyJoin, Pair, PredicateJoin, ReadOrCache,
    Result, RunState, StatementOptions, Transform,
};
use std::{future::Future, hash::Hash, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Fired before the command builder runs, can change its options.
pub type PreparingHook = Arc<dyn Fn(&mut StatementOptions) + Send + Sync>;
/// Fired once the execution token exists, can register command hooks on it.
pub type PreparedHook = Arc<dyn Fn(&mut ExecutionToken) + Send + Sync>;

/// A lazily executed unit of work producing `Output`.
///
/// Building a chain never touches the database: `run` and `run_async` do, and each call is an
/// independent execution that prepares a new token. Appenders own their predecessor and forward
/// hook registrations to it, so the hooks end up on the materializer at the root of the chain,
/// in the order they were registered.
pub trait Link: Send + Sync {
    type Output: Send;

    fn data_source(&self) -> &DataSource;
    fn on_preparing(&mut self, hook: PreparingHook);
    fn on_prepared(&mut self, hook: PreparedHook);
    fn run(&self, state: &RunState) -> Result<Self::Output>;
    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a;
}

/// Fluent construction of chains and their execution.
pub trait LinkExt: Link + Sized {
    fn execute(&self) -> Result<Self::Output> {
        self.run(&RunState::default())
    }

    fn execute_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move { self.run_async(cancel, &RunState::default()).await }
    }

    fn with_timeout(self, timeout: Duration) -> Appender<Self> {
        Appender::new(self).command_built(move |command| command.timeout = Some(timeout))
    }

    /// Strict mode refuses UPDATE and DELETE without a filter.
    fn with_strict_mode(self, strict: bool) -> Appender<Self> {
        Appender::new(self).preparing(move |options| options.strict = strict)
    }

    /// Names the statements of the chain: the name is written as a leading comment, attached to
    /// the command tags and used in the log records of the execution.
    fn with_tracing(self, name: impl Into<String>) -> Appender<Self> {
        let name: Arc<str> = name.into().into();
        let comment = name.clone();
        Appender::new(self)
            .preparing(move |options| options.comment = Some(comment.to_string()))
            .prepared(move |token| {
                let built = name.clone();
                token.on_command_built(Arc::new(move |command| {
                    command.tags.push(("trace".into(), built.to_string()));
                    log::debug!("[{}] built `{}`", built, command.text);
                }));
                let executed = name.clone();
                token.on_command_executed(Arc::new(move |event| {
                    log::debug!(
                        "[{}] executed, rows affected: {:?}",
                        executed,
                        event.rows_affected.map(|v| v.rows_affected)
                    );
                }));
            })
    }

    /// Maps the output with `f`, a failure of `f` fails the chain.
    fn transform<U, F>(self, f: F) -> Transform<Self, U>
    where
        U: Send,
        F: Fn(Self::Output) -> Result<U> + Send + Sync + 'static,
    {
        Transform::new(self, f)
    }

    /// Read-or-populate: the cached value when present, otherwise runs the chain and caches the
    /// result.
    fn read_or_cache(
        self,
        key: impl Into<String>,
        policy: Option<CachePolicy>,
    ) -> Result<ReadOrCache<Self>>
    where
        Self::Output: Cacheable,
    {
        ReadOrCache::new(self, key.into(), policy)
    }

    /// Populate-on-success under `key`.
    fn cache(self, key: impl Into<String>, policy: Option<CachePolicy>) -> Result<CacheResult<Self>>
    where
        Self::Output: Cacheable,
    {
        CacheResult::new(self, key.into(), policy)
    }

    /// Populate-on-success with one entry per item, keyed by `key`.
    fn cache_all_items<T, F>(self, key: F, policy: Option<CachePolicy>) -> Result<CacheAllItems<Self, F>>
    where
        Self: Link<Output = Vec<T>>,
        T: Cacheable,
        F: Fn(&T) -> String + Send + Sync,
    {
        CacheAllItems::new(self, key, policy)
    }

    /// Invalidates `key` once the chain succeeded.
    fn invalidate_cache(self, key: impl Into<String>) -> Result<InvalidateCache<Self>> {
        InvalidateCache::new(self, vec![key.into()], None)
    }

    /// Invalidates several keys once the chain succeeded.
    fn invalidate_cache_keys<S: Into<String>>(
        self,
        keys: impl IntoIterator<Item = S>,
    ) -> Result<InvalidateCache<Self>> {
        InvalidateCache::new(self, keys.into_iter().map(Into::into).collect(), None)
    }

    /// Invalidates the keys recorded by a [`crate::CacheAllItems`] once the chain succeeded.
    fn invalidate_cached_keys(self, keys: CachedKeys) -> Result<InvalidateCache<Self>> {
        InvalidateCache::new(self, Vec::new(), Some(keys))
    }

    /// Runs `self` then `other`, producing both outputs.
    fn pair<O: Link>(self, other: O) -> Pair<Self, O> {
        Pair::new(self, other)
    }

    /// Attaches the children to the parents having the same key.
    fn join<P, C, K, PK, CK, T>(
        self,
        parent_key: PK,
        child_key: CK,
        target: T,
        options: JoinOptions,
    ) -> KeyJoin<Self, K, PK, CK, T>
    where
        Self: Link<Output = (Vec<P>, Vec<C>)>,
        P: Send + Sync,
        C: Clone + std::fmt::Debug + Send + Sync + 'static,
        K: Eq + Hash + Send + Sync,
        PK: Fn(&P) -> K + Send + Sync,
        CK: Fn(&C) -> K + Send + Sync,
        T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
    {
        KeyJoin::new(self, parent_key, child_key, target, options)
    }

    /// Attaches the children to the parents accepted by `predicate`.
    fn join_where<P, C, M, T>(self, predicate: M, target: T, options: JoinOptions) -> PredicateJoin<Self, M, T>
    where
        Self: Link<Output = (Vec<P>, Vec<C>)>,
        P: Send + Sync,
        C: Clone + std::fmt::Debug + Send + Sync + 'static,
        M: Fn(&P, &C) -> bool + Send + Sync,
        T: Fn(&mut P) -> &mut Vec<C> + Send + Sync,
    {
        PredicateJoin::new(self, predicate, target, options)
    }
}

impl<L: Link> LinkExt for L {}
