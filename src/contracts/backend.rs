use std::future::Future;

use serde_json::Value;

use crate::contracts::error::BackendError;

/// Persistence of order rows and their child records.
///
/// Implementations own validation and the actual SQL; callers are expected to
/// have serialized concurrent mutations of the same entity beforehand.
pub trait OrderRepository: Send + Sync {
    /// Inserts a new order row under an already-allocated identifier.
    fn insert_order(
        &self,
        order_id: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Applies a partial update to an existing order.
    fn update_order(
        &self,
        order_id: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Inserts or replaces the quote a provider submitted for an order.
    fn upsert_quote(
        &self,
        order_id: &str,
        provider: &str,
        quote: &Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Records the provider chosen to fulfil an order.
    fn set_selected_provider(
        &self,
        order_id: &str,
        provider: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Administrative operations that must never overlap with themselves.
pub trait AdminBackend: Send + Sync {
    /// Creates any missing secondary indexes. Returns the number created.
    fn create_indexes(&self) -> impl Future<Output = Result<usize, BackendError>> + Send;

    /// Drops cached entries for a scope. Returns the number of entries removed.
    fn invalidate_cache(
        &self,
        scope: &str,
    ) -> impl Future<Output = Result<usize, BackendError>> + Send;
}
