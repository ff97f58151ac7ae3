//! Order identifier allocation and the order workflow built on it.

mod coordinator;
mod order_id;
mod service;

pub use coordinator::OrderCoordinator;
pub use order_id::{
    parse_order_id, validate_order_id, OrderId, MAX_SEQUENCE, ORDER_ID_LEN, ORDER_ID_PREFIX,
};
pub use service::OrderIdService;
