//! Resource keys for the critical sections the order workflow serializes.

/// Serializes overlapping index-build requests.
pub const INDEX_CREATION_GLOBAL: &str = "index_creation_global";

/// Key guarding updates to one order row.
pub fn order_update(order_id: &str) -> String {
    format!("order_update_{}", order_id)
}

/// Key guarding one provider's quote on one order.
pub fn quote_update(order_id: &str, provider: &str) -> String {
    format!("quote_update_{}_{}", order_id, provider)
}

/// Key guarding the provider selection of one order.
pub fn provider_selection(order_id: &str) -> String {
    format!("provider_sel_{}", order_id)
}

/// Key guarding invalidation of one cache scope.
pub fn cache_invalidation(scope: &str) -> String {
    format!("cache_inv_{}", scope)
}
