mod appenders;
mod memory;

pub use appenders::*;
pub use memory::*;

use crate::{Result, RowLabeled, RowsAffected, Value};
use futures::future::{self, BoxFuture, FutureExt};
use std::{
    any::Any,
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};
use time::OffsetDateTime;

/// Expiration rules of a cache entry. Both bounds apply when both are set.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub absolute_expiration: Option<OffsetDateTime>,
    pub sliding_expiration: Option<Duration>,
}

impl CachePolicy {
    pub fn absolute(expiration: OffsetDateTime) -> Self {
        Self {
            absolute_expiration: Some(expiration),
            sliding_expiration: None,
        }
    }
    pub fn sliding(expiration: Duration) -> Self {
        Self {
            absolute_expiration: None,
            sliding_expiration: Some(expiration),
        }
    }
}

/// Payload stored in a cache. `Null` is the sentinel of a cached NULL result, distinct from a
/// missing entry.
#[derive(Clone)]
pub enum CacheValue {
    Null,
    Value(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        CacheValue::Value(Arc::new(value))
    }
    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null)
    }
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            CacheValue::Null => None,
            CacheValue::Value(v) => v.downcast_ref::<T>(),
        }
    }
}

impl Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Null => f.write_str("Null"),
            CacheValue::Value(..) => f.write_str("Value(..)"),
        }
    }
}

/// A type that can go through a cache adapter.
///
/// The defaults store the value itself; `Option<T>` stores `None` as [`CacheValue::Null`].
/// Application types opt in with an empty `impl Cacheable for MyType {}`.
pub trait Cacheable: Clone + Send + Sync + 'static {
    fn into_cache_value(self) -> CacheValue {
        CacheValue::new(self)
    }
    /// `None` when the cached payload is not a `Self`.
    fn from_cache_value(value: &CacheValue) -> Option<Self> {
        value.downcast_ref::<Self>().cloned()
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    fn into_cache_value(self) -> CacheValue {
        match self {
            Some(v) => v.into_cache_value(),
            None => CacheValue::Null,
        }
    }
    fn from_cache_value(value: &CacheValue) -> Option<Self> {
        match value {
            CacheValue::Null => Some(None),
            _ => T::from_cache_value(value).map(Some),
        }
    }
}

impl<T: Cacheable> Cacheable for Vec<T> {}
impl<K, V> Cacheable for HashMap<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
}

macro_rules! impl_cacheable {
    ($($source:ty),+ $(,)?) => {
        $(impl Cacheable for $source {})+
    };
}

impl_cacheable!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    Cow<'static, str>,
    rust_decimal::Decimal,
    uuid::Uuid,
    time::Date,
    time::PrimitiveDateTime,
    OffsetDateTime,
    Value,
    RowLabeled,
    RowsAffected,
);

/// Key/value store used by the cache appenders.
///
/// Shared by every chain of a data source and called without any external locking, so
/// implementations must be internally synchronized. The async forms default to the sync ones.
pub trait CacheAdapter: Send + Sync {
    /// `Some(CacheValue::Null)` is a cached NULL, `None` a miss.
    fn try_read(&self, key: &str) -> Result<Option<CacheValue>>;
    fn write(&self, key: &str, value: CacheValue, policy: Option<&CachePolicy>) -> Result<()>;
    fn invalidate(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;

    fn try_read_async<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheValue>>> {
        future::ready(self.try_read(key)).boxed()
    }
    fn write_async<'a>(
        &'a self,
        key: &'a str,
        value: CacheValue,
        policy: Option<&'a CachePolicy>,
    ) -> BoxFuture<'a, Result<()>> {
        future::ready(self.write(key, value, policy)).boxed()
    }
    fn invalidate_async<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(self.invalidate(key)).boxed()
    }
    fn clear_async(&self) -> BoxFuture<'_, Result<()>> {
        future::ready(self.clear()).boxed()
    }
}
