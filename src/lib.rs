pub mod contracts;
pub mod lock;
pub mod metrics;
pub mod orders;
pub mod storage;
