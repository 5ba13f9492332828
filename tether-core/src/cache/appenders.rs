use crate::{
    CacheAdapter, CachePolicy, CacheValue, Cacheable, ChainError, DataSource, Link, PreparedHook,
    PreparingHook, Result, RunState, log_error,
};
use std::{
    any,
    collections::BTreeSet,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio_util::sync::CancellationToken;

fn cache_key(key: String) -> Result<String> {
    if key.trim().is_empty() {
        return Err(ChainError::invalid_argument("key", "the cache key is empty").into());
    }
    Ok(key)
}

fn cached<T: Cacheable>(key: &str, value: Option<CacheValue>) -> Result<Option<T>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match T::from_cache_value(&value) {
        Some(v) => Ok(Some(v)),
        None => Err(log_error!(ChainError::CacheCorruption {
            key: key.to_owned(),
            expected: any::type_name::<T>(),
        })),
    }
}

macro_rules! forward_hooks {
    () => {
        fn data_source(&self) -> &DataSource {
            self.previous.data_source()
        }
        fn on_preparing(&mut self, hook: PreparingHook) {
            self.previous.on_preparing(hook);
        }
        fn on_prepared(&mut self, hook: PreparedHook) {
            self.previous.on_prepared(hook);
        }
    };
}

/// Returns the cached value when present, the predecessor does not run at all. On a miss it runs
/// the predecessor and caches its result.
pub struct ReadOrCache<L> {
    previous: L,
    cache: Arc<dyn CacheAdapter>,
    key: String,
    policy: Option<CachePolicy>,
}

impl<L: Link> ReadOrCache<L>
where
    L::Output: Cacheable,
{
    pub fn new(previous: L, key: String, policy: Option<CachePolicy>) -> Result<Self> {
        let cache = previous.data_source().cache()?.clone();
        Ok(Self {
            key: cache_key(key)?,
            previous,
            cache,
            policy,
        })
    }
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<L: Link> Link for ReadOrCache<L>
where
    L::Output: Cacheable,
{
    type Output = L::Output;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Self::Output> {
        if let Some(value) = cached(&self.key, self.cache.try_read(&self.key)?)? {
            log::debug!("Cache hit `{}`", self.key);
            return Ok(value);
        }
        log::debug!("Cache miss `{}`", self.key);
        let value = self.previous.run(state)?;
        self.cache.write(
            &self.key,
            value.clone().into_cache_value(),
            self.policy.as_ref(),
        )?;
        Ok(value)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let found = self.cache.try_read_async(&self.key).await?;
            if let Some(value) = cached(&self.key, found)? {
                log::debug!("Cache hit `{}`", self.key);
                return Ok(value);
            }
            log::debug!("Cache miss `{}`", self.key);
            let value = self.previous.run_async(cancel, state).await?;
            self.cache
                .write_async(
                    &self.key,
                    value.clone().into_cache_value(),
                    self.policy.as_ref(),
                )
                .await?;
            Ok(value)
        }
    }
}

/// Always runs the predecessor and caches its result once it succeeded.
pub struct CacheResult<L> {
    previous: L,
    cache: Arc<dyn CacheAdapter>,
    key: String,
    policy: Option<CachePolicy>,
}

impl<L: Link> CacheResult<L>
where
    L::Output: Cacheable,
{
    pub fn new(previous: L, key: String, policy: Option<CachePolicy>) -> Result<Self> {
        let cache = previous.data_source().cache()?.clone();
        Ok(Self {
            key: cache_key(key)?,
            previous,
            cache,
            policy,
        })
    }
}

impl<L: Link> Link for CacheResult<L>
where
    L::Output: Cacheable,
{
    type Output = L::Output;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Self::Output> {
        let value = self.previous.run(state)?;
        self.cache.write(
            &self.key,
            value.clone().into_cache_value(),
            self.policy.as_ref(),
        )?;
        Ok(value)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let value = self.previous.run_async(cancel, state).await?;
            self.cache
                .write_async(
                    &self.key,
                    value.clone().into_cache_value(),
                    self.policy.as_ref(),
                )
                .await?;
            Ok(value)
        }
    }
}

/// Keys written by a [`CacheAllItems`], shared with the chains that later invalidate them.
///
/// The set only grows while items are cached. A key leaves it once an invalidating chain has
/// evicted it, or when [`CachedKeys::clear`] forgets every key.
#[derive(Default, Debug, Clone)]
pub struct CachedKeys(Arc<Mutex<BTreeSet<String>>>);

impl CachedKeys {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn keys(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
    pub fn contains(&self, key: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn insert(&self, key: String) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }
    /// Forgets the keys without touching the cache.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
    fn remove(&self, key: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Always runs the predecessor and caches every item of the resulting collection under its own
/// key, recording the keys in [`CacheAllItems::cached_keys`].
pub struct CacheAllItems<L, F> {
    previous: L,
    cache: Arc<dyn CacheAdapter>,
    key: F,
    policy: Option<CachePolicy>,
    keys: CachedKeys,
}

impl<L, T, F> CacheAllItems<L, F>
where
    L: Link<Output = Vec<T>>,
    T: Cacheable,
    F: Fn(&T) -> String + Send + Sync,
{
    pub fn new(previous: L, key: F, policy: Option<CachePolicy>) -> Result<Self> {
        let cache = previous.data_source().cache()?.clone();
        Ok(Self {
            previous,
            cache,
            key,
            policy,
            keys: CachedKeys::new(),
        })
    }

    /// Handle on the keys written so far, usable by [`crate::LinkExt::invalidate_cached_keys`].
    pub fn cached_keys(&self) -> CachedKeys {
        self.keys.clone()
    }

    fn item_key(&self, item: &T) -> Result<String> {
        cache_key((self.key)(item))
    }
}

impl<L, T, F> Link for CacheAllItems<L, F>
where
    L: Link<Output = Vec<T>>,
    T: Cacheable,
    F: Fn(&T) -> String + Send + Sync,
{
    type Output = Vec<T>;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Vec<T>> {
        let items = self.previous.run(state)?;
        for item in &items {
            let key = self.item_key(item)?;
            self.cache
                .write(&key, item.clone().into_cache_value(), self.policy.as_ref())?;
            self.keys.insert(key);
        }
        log::debug!("Cached {} items", items.len());
        Ok(items)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Vec<T>>> + Send + 'a {
        async move {
            let items = self.previous.run_async(cancel, state).await?;
            for item in &items {
                let key = self.item_key(item)?;
                self.cache
                    .write_async(&key, item.clone().into_cache_value(), self.policy.as_ref())
                    .await?;
                self.keys.insert(key);
            }
            log::debug!("Cached {} items", items.len());
            Ok(items)
        }
    }
}

/// Runs the predecessor and, only once it succeeded, removes the keys from the cache.
pub struct InvalidateCache<L> {
    previous: L,
    cache: Arc<dyn CacheAdapter>,
    keys: Vec<String>,
    tracked: Option<CachedKeys>,
}

impl<L: Link> InvalidateCache<L> {
    pub fn new(previous: L, keys: Vec<String>, tracked: Option<CachedKeys>) -> Result<Self> {
        if keys.is_empty() && tracked.is_none() {
            return Err(ChainError::invalid_argument("keys", "there is no key to invalidate").into());
        }
        let keys = keys.into_iter().map(cache_key).collect::<Result<Vec<_>>>()?;
        let cache = previous.data_source().cache()?.clone();
        Ok(Self {
            previous,
            cache,
            keys,
            tracked,
        })
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.keys.clone();
        if let Some(tracked) = &self.tracked {
            keys.extend(tracked.keys());
        }
        keys
    }

    /// A tracked key is forgotten only once it left the cache.
    fn evicted(&self, key: &str) {
        if let Some(tracked) = &self.tracked {
            tracked.remove(key);
        }
    }
}

impl<L: Link> Link for InvalidateCache<L> {
    type Output = L::Output;

    forward_hooks!();

    fn run(&self, state: &RunState) -> Result<Self::Output> {
        let value = self.previous.run(state)?;
        for key in self.keys() {
            log::debug!("Invalidating `{}`", key);
            self.cache.invalidate(&key)?;
            self.evicted(&key);
        }
        Ok(value)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let value = self.previous.run_async(cancel, state).await?;
            for key in self.keys() {
                log::debug!("Invalidating `{}`", key);
                self.cache.invalidate_async(&key).await?;
                self.evicted(&key);
            }
            Ok(value)
        }
    }
}
