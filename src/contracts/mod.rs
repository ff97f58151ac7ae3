pub mod backend;
pub mod error;
pub mod lock;
pub mod sequence;
pub mod sweeper;

pub use backend::{AdminBackend, OrderRepository};
pub use error::{
    BackendError, LockError, LockResultExt, RxError, SequenceError, StorageError, WorkflowError,
};
pub use lock::{LockInfo, LockOwner, LockStats, LockToken};
pub use sequence::{DateKey, SequenceRow, SequenceStore, SequenceTransaction};
pub use sweeper::Sweeper;
