//! Order store: the transactional persistence boundary for orders,
//! order items and carts.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use model::{
    Cart, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus,
    order_number_for_session,
};
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
