#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use rxcoord::contracts::{LockOwner, LockToken};
use rxcoord::lock::{keys, LockConfig, LockManager};

fuzz_target!(|data: &[u8]| {
    // Arbitrary strings as keys, owners and scopes: special characters,
    // unicode, empty input
    let input = String::from_utf8_lossy(data);
    let locks = LockManager::new(LockConfig::default());
    let owner = LockOwner::new(input.as_ref());
    let lease = Duration::from_secs(30);

    for key in [
        input.to_string(),
        keys::order_update(&input),
        keys::quote_update(&input, &input),
        keys::provider_selection(&input),
        keys::cache_invalidation(&input),
    ] {
        let token = LockToken::generate();
        let forged = LockToken::from(input.as_ref());

        assert!(locks.try_acquire(&key, &owner, &token, lease));
        assert!(!locks.try_acquire(&key, &owner, &forged, lease));
        assert!(!locks.release(&key, &forged));
        assert!(locks.renew(&key, &token, lease));
        assert!(locks.release(&key, &token));
        assert!(!locks.is_locked(&key));
    }
});
