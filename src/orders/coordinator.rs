use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::contracts::{AdminBackend, LockOwner, OrderRepository, SequenceError, WorkflowError};
use crate::lock::{keys, LockManager, WithLockOptions};
use crate::orders::order_id::{validate_order_id, OrderId};
use crate::orders::OrderIdService;

/// Order workflow glue: identifier allocation plus per-entity serialization
/// of mutations through the lock manager.
///
/// Every mutating call takes the caller's `LockOwner` (typically one per
/// request) so that a handler re-entering its own critical section is
/// refused instead of waiting on itself.
pub struct OrderCoordinator<R, A> {
    ids: Arc<OrderIdService>,
    locks: LockManager,
    repository: Arc<R>,
    admin: Arc<A>,
}

impl<R, A> OrderCoordinator<R, A>
where
    R: OrderRepository,
    A: AdminBackend,
{
    pub fn new(
        ids: Arc<OrderIdService>,
        locks: LockManager,
        repository: Arc<R>,
        admin: Arc<A>,
    ) -> Self {
        Self {
            ids,
            locks,
            repository,
            admin,
        }
    }

    /// Mutations run once per lock acquisition; a failed write is reported,
    /// not replayed.
    fn mutation_options(&self) -> WithLockOptions {
        WithLockOptions::from_config(self.locks.config()).retries(1)
    }

    /// Allocates an identifier for today and inserts the order under it.
    pub async fn create_order(&self, payload: &Value) -> Result<OrderId, WorkflowError> {
        self.create_order_on(chrono::Local::now().date_naive(), payload)
            .await
    }

    /// Allocates an identifier for `date` and inserts the order under it.
    ///
    /// Allocation commits before the insert. If the insert fails the
    /// identifier is left unused: the day's sequence has a gap, never a
    /// duplicate.
    pub async fn create_order_on(
        &self,
        date: NaiveDate,
        payload: &Value,
    ) -> Result<OrderId, WorkflowError> {
        let order_id = self.ids.generate_order_id_on(date).await?;
        let raw = order_id.to_string();

        if let Err(e) = self.repository.insert_order(&raw, payload).await {
            tracing::warn!(
                order_id = %raw,
                error = %e,
                "Order insert failed, identifier left unused"
            );
            return Err(e.into());
        }

        tracing::info!(order_id = %raw, "Order created");
        Ok(order_id)
    }

    pub async fn update_order(
        &self,
        owner: &LockOwner,
        order_id: &str,
        patch: &Value,
    ) -> Result<(), WorkflowError> {
        check_order_id(order_id)?;
        let repository = &*self.repository;
        self.locks
            .with_lock(
                &keys::order_update(order_id),
                owner,
                self.mutation_options(),
                || repository.update_order(order_id, patch),
            )
            .await?;
        Ok(())
    }

    pub async fn update_quote(
        &self,
        owner: &LockOwner,
        order_id: &str,
        provider: &str,
        quote: &Value,
    ) -> Result<(), WorkflowError> {
        check_order_id(order_id)?;
        let repository = &*self.repository;
        self.locks
            .with_lock(
                &keys::quote_update(order_id, provider),
                owner,
                self.mutation_options(),
                || repository.upsert_quote(order_id, provider, quote),
            )
            .await?;
        Ok(())
    }

    pub async fn select_provider(
        &self,
        owner: &LockOwner,
        order_id: &str,
        provider: &str,
    ) -> Result<(), WorkflowError> {
        check_order_id(order_id)?;
        let repository = &*self.repository;
        self.locks
            .with_lock(
                &keys::provider_selection(order_id),
                owner,
                self.mutation_options(),
                || repository.set_selected_provider(order_id, provider),
            )
            .await?;
        tracing::info!(order_id = %order_id, provider = %provider, "Provider selected");
        Ok(())
    }

    /// Builds missing indexes. Overlapping admin requests run one at a time;
    /// the lease is renewed while the build runs.
    pub async fn build_indexes(&self, owner: &LockOwner) -> Result<usize, WorkflowError> {
        let admin = &*self.admin;
        let created = self
            .locks
            .with_lock(
                keys::INDEX_CREATION_GLOBAL,
                owner,
                self.mutation_options().auto_renew(true),
                || admin.create_indexes(),
            )
            .await?;
        tracing::info!(created, "Index build finished");
        Ok(created)
    }

    pub async fn invalidate_cache(
        &self,
        owner: &LockOwner,
        scope: &str,
    ) -> Result<usize, WorkflowError> {
        let admin = &*self.admin;
        let removed = self
            .locks
            .with_lock(
                &keys::cache_invalidation(scope),
                owner,
                self.mutation_options(),
                || admin.invalidate_cache(scope),
            )
            .await?;
        tracing::debug!(scope = %scope, removed, "Cache invalidated");
        Ok(removed)
    }
}

fn check_order_id(order_id: &str) -> Result<(), WorkflowError> {
    if validate_order_id(order_id) {
        Ok(())
    } else {
        Err(SequenceError::MalformedOrderId(order_id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::contracts::{BackendError, LockError, LockToken};
    use crate::lock::LockConfig;
    use crate::metrics::SequenceMetrics;
    use crate::storage::{RocksDbSequenceStore, TransactionConfig, TransactionManager};

    #[derive(Default)]
    struct MemoryRepository {
        orders: Mutex<HashMap<String, Value>>,
        fail_inserts: AtomicBool,
    }

    impl OrderRepository for MemoryRepository {
        async fn insert_order(&self, order_id: &str, payload: &Value) -> Result<(), BackendError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(BackendError::new("insert_order", "connection reset"));
            }
            self.orders
                .lock()
                .unwrap()
                .insert(order_id.to_string(), payload.clone());
            Ok(())
        }

        async fn update_order(&self, order_id: &str, patch: &Value) -> Result<(), BackendError> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| BackendError::new("update_order", "not found"))?;
            if let (Some(target), Some(fields)) = (order.as_object_mut(), patch.as_object()) {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
            Ok(())
        }

        async fn upsert_quote(
            &self,
            order_id: &str,
            provider: &str,
            quote: &Value,
        ) -> Result<(), BackendError> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| BackendError::new("upsert_quote", "not found"))?;
            order["quotes"][provider] = quote.clone();
            Ok(())
        }

        async fn set_selected_provider(
            &self,
            order_id: &str,
            provider: &str,
        ) -> Result<(), BackendError> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| BackendError::new("set_selected_provider", "not found"))?;
            order["selected_provider"] = json!(provider);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingAdmin {
        running: AtomicUsize,
        max_running: AtomicUsize,
        builds: AtomicUsize,
    }

    impl AdminBackend for CountingAdmin {
        async fn create_indexes(&self) -> Result<usize, BackendError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        }

        async fn invalidate_cache(&self, _scope: &str) -> Result<usize, BackendError> {
            Ok(7)
        }
    }

    struct Fixture {
        coordinator: Arc<OrderCoordinator<MemoryRepository, CountingAdmin>>,
        repository: Arc<MemoryRepository>,
        admin: Arc<CountingAdmin>,
        locks: LockManager,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksDbSequenceStore::open(dir.path()).unwrap());
        let config = TransactionConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
        };
        let metrics = Arc::new(SequenceMetrics::default());
        let ids = Arc::new(OrderIdService::new(
            TransactionManager::new(store, config),
            metrics,
        ));
        let locks = LockManager::new(LockConfig {
            default_max_wait: Duration::from_millis(500),
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
            jitter: Duration::from_millis(1),
            ..LockConfig::default()
        });
        let repository = Arc::new(MemoryRepository::default());
        let admin = Arc::new(CountingAdmin::default());
        let coordinator = Arc::new(OrderCoordinator::new(
            ids,
            locks.clone(),
            Arc::clone(&repository),
            Arc::clone(&admin),
        ));
        Fixture {
            coordinator,
            repository,
            admin,
            locks,
            _dir: dir,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 25).unwrap()
    }

    #[tokio::test]
    async fn create_then_mutate_order() {
        let f = fixture();
        let owner = LockOwner::generate("req");

        let id = f
            .coordinator
            .create_order_on(day(), &json!({"patient": "p-1"}))
            .await
            .unwrap();
        assert_eq!(id.to_string(), "RX250625-001");
        let raw = id.to_string();

        f.coordinator
            .update_order(&owner, &raw, &json!({"status": "quoted"}))
            .await
            .unwrap();
        f.coordinator
            .update_quote(&owner, &raw, "acme", &json!({"price": 12}))
            .await
            .unwrap();
        f.coordinator
            .select_provider(&owner, &raw, "acme")
            .await
            .unwrap();

        let orders = f.repository.orders.lock().unwrap();
        let order = &orders[&raw];
        assert_eq!(order["status"], "quoted");
        assert_eq!(order["quotes"]["acme"]["price"], 12);
        assert_eq!(order["selected_provider"], "acme");
        drop(orders);

        assert!(f.locks.stats().locks.is_empty());
    }

    #[tokio::test]
    async fn failed_insert_leaves_gap_not_duplicate() {
        let f = fixture();
        f.repository.fail_inserts.store(true, Ordering::SeqCst);
        let err = f
            .coordinator
            .create_order_on(day(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Backend(_)));

        f.repository.fail_inserts.store(false, Ordering::SeqCst);
        let id = f
            .coordinator
            .create_order_on(day(), &json!({}))
            .await
            .unwrap();
        assert_eq!(id.to_string(), "RX250625-002");
        assert_eq!(f.repository.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mutation_times_out_while_entity_locked() {
        let f = fixture();
        let raw = f
            .coordinator
            .create_order_on(day(), &json!({}))
            .await
            .unwrap()
            .to_string();

        // Another request holds the order for longer than our max wait
        let token = LockToken::generate();
        assert!(f.locks.try_acquire(
            &keys::order_update(&raw),
            &LockOwner::new("other-request"),
            &token,
            Duration::from_secs(30),
        ));

        let result = f
            .coordinator
            .update_order(&LockOwner::new("me"), &raw, &json!({"a": 2}))
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Lock(LockError::Unavailable { .. }))
        ));
        assert!(f.locks.release(&keys::order_update(&raw), &token));
    }

    #[tokio::test]
    async fn malformed_order_id_is_rejected_before_locking() {
        let f = fixture();
        let err = f
            .coordinator
            .update_order(&LockOwner::new("me"), "RX25062-001", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Sequence(SequenceError::MalformedOrderId(_))
        ));
        assert_eq!(f.locks.stats().acquired_total, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn index_builds_never_overlap() {
        let f = fixture();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coordinator = Arc::clone(&f.coordinator);
                tokio::spawn(async move {
                    coordinator
                        .build_indexes(&LockOwner::new(format!("admin-{}", i)))
                        .await
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 2);
        }
        assert_eq!(f.admin.builds.load(Ordering::SeqCst), 4);
        assert_eq!(f.admin.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_cache_reports_removed_entries() {
        let f = fixture();
        let removed = f
            .coordinator
            .invalidate_cache(&LockOwner::new("me"), "orders")
            .await
            .unwrap();
        assert_eq!(removed, 7);
        assert!(!f.locks.is_locked(&keys::cache_invalidation("orders")));
    }
}
