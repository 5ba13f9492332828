#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };
    use tether::{
        CacheAdapter, CachePolicy, CacheValue, CancellationToken, ChainError, DataSource, Filter,
        LinkExt, Materialize, MemoryCache,
    };
    use tether_tests::{Customer, ScriptedExecutor, customer_row, init_logs, silent_logs};

    fn customers() -> Vec<Customer> {
        vec![Customer::new(1, "Ann"), Customer::new(2, "Bob")]
    }

    fn setup(executor: ScriptedExecutor) -> (Arc<ScriptedExecutor>, Arc<MemoryCache>, DataSource) {
        let executor = Arc::new(executor);
        let cache = Arc::new(MemoryCache::new());
        let data_source = DataSource::builder(executor.clone())
            .cache(cache.clone())
            .build();
        (executor, cache, data_source)
    }

    fn customers_executor() -> ScriptedExecutor {
        ScriptedExecutor::new(|_| Ok(customers().iter().map(customer_row).collect()))
    }

    /// Memory cache whose `fail_on`-th invalidation fails.
    struct FlakyCache {
        inner: MemoryCache,
        invalidations: AtomicUsize,
        fail_on: usize,
    }

    impl FlakyCache {
        fn new(fail_on: usize) -> Self {
            Self {
                inner: MemoryCache::new(),
                invalidations: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    impl CacheAdapter for FlakyCache {
        fn try_read(&self, key: &str) -> tether::Result<Option<CacheValue>> {
            self.inner.try_read(key)
        }
        fn write(
            &self,
            key: &str,
            value: CacheValue,
            policy: Option<&CachePolicy>,
        ) -> tether::Result<()> {
            self.inner.write(key, value, policy)
        }
        fn invalidate(&self, key: &str) -> tether::Result<()> {
            if self.invalidations.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(anyhow::anyhow!("cache unavailable"));
            }
            self.inner.invalidate(key)
        }
        fn clear(&self) -> tether::Result<()> {
            self.inner.clear()
        }
    }

    fn flaky_setup(fail_on: usize) -> (Arc<FlakyCache>, DataSource) {
        let cache = Arc::new(FlakyCache::new(fail_on));
        let data_source = DataSource::builder(Arc::new(customers_executor()))
            .cache(cache.clone())
            .build();
        (cache, data_source)
    }

    #[tokio::test]
    async fn read_or_cache_runs_once() {
        init_logs();
        let (executor, cache, data_source) = setup(customers_executor());
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .read_or_cache("customers:all", None)
            .unwrap();
        assert_eq!(chain.execute().unwrap(), customers());
        assert_eq!(executor.count(), 1);
        assert!(cache.contains_key("customers:all"));
        assert_eq!(chain.execute().unwrap(), customers());
        let cancel = CancellationToken::new();
        assert_eq!(chain.execute_async(&cancel).await.unwrap(), customers());
        assert_eq!(executor.count(), 1, "a warm cache must skip the database");
    }

    #[tokio::test]
    async fn read_or_cache_async_populates() {
        init_logs();
        let (executor, _, data_source) = setup(customers_executor());
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .read_or_cache("customers:all", Some(CachePolicy::sliding(Duration::from_secs(60))))
            .unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(chain.execute_async(&cancel).await.unwrap(), customers());
        assert_eq!(chain.execute().unwrap(), customers());
        assert_eq!(executor.count(), 1);
    }

    #[test]
    fn null_round_trip() {
        init_logs();
        let (executor, cache, data_source) = setup(ScriptedExecutor::new(|_| Ok(vec![])));
        let chain = data_source
            .from("customers")
            .filter(Filter::equals("id", 99))
            .to_object_or_none::<Customer>(Default::default())
            .read_or_cache("customer:99", None)
            .unwrap();
        assert_eq!(chain.execute().unwrap(), None);
        assert!(matches!(
            cache.try_read("customer:99").unwrap(),
            Some(CacheValue::Null)
        ));
        assert_eq!(chain.execute().unwrap(), None);
        assert_eq!(executor.count(), 1, "a cached NULL is a hit");
    }

    #[test]
    fn configuration_errors() {
        init_logs();
        let (_, data_source) = customers_executor().into_data_source();
        silent_logs! {
            let missing = data_source
                .from("customers")
                .to_collection::<Customer>()
                .read_or_cache("customers:all", None);
            assert!(matches!(
                missing.err().and_then(|v| v.downcast::<ChainError>().ok()),
                Some(ChainError::MissingCache { .. })
            ));
        }
        let (_, _, data_source) = setup(customers_executor());
        let empty = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache(" ", None);
        assert!(matches!(
            empty.err().and_then(|v| v.downcast::<ChainError>().ok()),
            Some(ChainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn wrong_type_is_corruption() {
        init_logs();
        let (executor, cache, data_source) = setup(customers_executor());
        cache
            .write("customers:all", CacheValue::new("not a list".to_string()), None)
            .unwrap();
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .read_or_cache("customers:all", None)
            .unwrap();
        silent_logs! {
            let error = chain.execute().unwrap_err();
            assert!(matches!(
                error.downcast_ref::<ChainError>(),
                Some(ChainError::CacheCorruption { key, .. }) if key == "customers:all"
            ));
        }
        assert_eq!(executor.count(), 0);
    }

    #[test]
    fn cache_on_success_only() {
        init_logs();
        let (_, cache, data_source) = setup(ScriptedExecutor::failing("timeout"));
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache("customers:all", None)
            .unwrap();
        silent_logs! {
            assert!(chain.execute().is_err());
        }
        assert!(!cache.contains_key("customers:all"));

        let (executor, cache, data_source) = setup(customers_executor());
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache("customers:all", None)
            .unwrap();
        chain.execute().unwrap();
        chain.execute().unwrap();
        assert_eq!(executor.count(), 2, "populating never skips the database");
        assert!(cache.contains_key("customers:all"));
    }

    #[tokio::test]
    async fn cache_items_then_invalidate_them() {
        init_logs();
        let (_, cache, data_source) = setup(customers_executor());
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache_all_items(|v: &Customer| format!("customer:{}", v.id), None)
            .unwrap();
        let keys = chain.cached_keys();
        let cancel = CancellationToken::new();
        chain.execute_async(&cancel).await.unwrap();
        assert_eq!(keys.keys(), ["customer:1", "customer:2"]);
        let cached = cache.try_read("customer:2").unwrap().unwrap();
        assert_eq!(cached.downcast_ref::<Customer>(), Some(&Customer::new(2, "Bob")));

        let delete = data_source
            .delete("customers", Some(Filter::sql("true")))
            .to_affected()
            .invalidate_cached_keys(keys.clone())
            .unwrap();
        delete.execute_async(&cancel).await.unwrap();
        assert!(!cache.contains_key("customer:1"));
        assert!(!cache.contains_key("customer:2"));
        assert!(keys.is_empty());
    }

    #[test]
    fn invalidate_after_success() {
        init_logs();
        let present_during_write = Arc::new(AtomicBool::new(false));
        let cache = Arc::new(MemoryCache::new());
        let executor = {
            let cache = cache.clone();
            let present = present_during_write.clone();
            Arc::new(ScriptedExecutor::new(move |command| {
                present.store(cache.contains_key("customer:1"), Ordering::SeqCst);
                if command.text.contains("fail") {
                    return Err(anyhow::anyhow!("rejected"));
                }
                Ok(vec![tether::RowsAffected::new(1).into()])
            }))
        };
        let data_source = DataSource::builder(executor.clone())
            .cache(cache.clone())
            .build();
        let customer = Customer::new(1, "Ann");
        cache
            .write("customer:1", CacheValue::new(customer.clone()), None)
            .unwrap();

        let update = data_source
            .update("customers", &customer, &["id"])
            .to_affected()
            .invalidate_cache("customer:1")
            .unwrap();
        assert_eq!(update.execute().unwrap(), 1);
        assert!(present_during_write.load(Ordering::SeqCst));
        assert!(!cache.contains_key("customer:1"));

        cache
            .write("customer:1", CacheValue::new(customer.clone()), None)
            .unwrap();
        let failing = data_source
            .sql("UPDATE customers SET fail = 1")
            .to_affected()
            .invalidate_cache_keys(["customer:1", "customers:all"])
            .unwrap();
        silent_logs! {
            assert!(failing.execute().is_err());
        }
        assert!(cache.contains_key("customer:1"), "a failed write must not evict");
    }

    #[tokio::test]
    async fn invalidate_after_success_async() {
        init_logs();
        let cache = Arc::new(MemoryCache::new());
        let executor = {
            let cache = cache.clone();
            Arc::new(ScriptedExecutor::new(move |command| {
                assert!(cache.contains_key("customer:1"), "evicted before the write");
                if command.text.contains("fail") {
                    return Err(anyhow::anyhow!("rejected"));
                }
                Ok(vec![tether::RowsAffected::new(1).into()])
            }))
        };
        let data_source = DataSource::builder(executor).cache(cache.clone()).build();
        let customer = Customer::new(1, "Ann");
        let cancel = CancellationToken::new();

        cache
            .write("customer:1", CacheValue::new(customer.clone()), None)
            .unwrap();
        let failing = data_source
            .sql("UPDATE customers SET fail = 1")
            .to_affected()
            .invalidate_cache("customer:1")
            .unwrap();
        let failed;
        silent_logs! {
            failed = failing.execute_async(&cancel).await.is_err();
        }
        assert!(failed);
        assert!(cache.contains_key("customer:1"), "a failed write must not evict");

        let update = data_source
            .update("customers", &customer, &["id"])
            .to_affected()
            .invalidate_cache("customer:1")
            .unwrap();
        assert_eq!(update.execute_async(&cancel).await.unwrap(), 1);
        assert!(!cache.contains_key("customer:1"));
    }

    #[test]
    fn failed_invalidation_keeps_tracked_keys() {
        init_logs();
        let (cache, data_source) = flaky_setup(2);
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache_all_items(|v: &Customer| format!("customer:{}", v.id), None)
            .unwrap();
        let keys = chain.cached_keys();
        chain.execute().unwrap();
        let delete = data_source
            .delete("customers", Some(Filter::sql("true")))
            .to_affected()
            .invalidate_cached_keys(keys.clone())
            .unwrap();
        silent_logs! {
            assert!(delete.execute().is_err());
        }
        assert!(!cache.inner.contains_key("customer:1"));
        assert!(cache.inner.contains_key("customer:2"));
        assert_eq!(keys.keys(), ["customer:2"]);

        delete.execute().unwrap();
        assert!(!cache.inner.contains_key("customer:2"));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn failed_invalidation_keeps_tracked_keys_async() {
        init_logs();
        let (cache, data_source) = flaky_setup(1);
        let cancel = CancellationToken::new();
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache_all_items(|v: &Customer| format!("customer:{}", v.id), None)
            .unwrap();
        let keys = chain.cached_keys();
        chain.execute_async(&cancel).await.unwrap();
        let delete = data_source
            .delete("customers", Some(Filter::sql("true")))
            .to_affected()
            .invalidate_cached_keys(keys.clone())
            .unwrap();
        let failed;
        silent_logs! {
            failed = delete.execute_async(&cancel).await.is_err();
        }
        assert!(failed);
        assert!(cache.inner.contains_key("customer:1"));
        assert!(cache.inner.contains_key("customer:2"));
        assert_eq!(keys.keys(), ["customer:1", "customer:2"]);

        delete.execute_async(&cancel).await.unwrap();
        assert!(!cache.inner.contains_key("customer:1"));
        assert!(!cache.inner.contains_key("customer:2"));
        assert!(keys.is_empty());
    }

    #[test]
    fn forget_cached_keys() {
        init_logs();
        let (_, cache, data_source) = setup(customers_executor());
        let chain = data_source
            .from("customers")
            .to_collection::<Customer>()
            .cache_all_items(|v: &Customer| format!("customer:{}", v.id), None)
            .unwrap();
        let keys = chain.cached_keys();
        chain.execute().unwrap();
        assert_eq!(keys.len(), 2);
        keys.clear();
        assert!(keys.is_empty());
        assert!(cache.contains_key("customer:1"), "clearing the keys keeps the entries");
    }
}
