//! External service traits used after an order is committed.

pub mod notifier;

pub use notifier::{
    InMemoryNotifier, LogNotifier, Notifier, NotifyError, OrderSummary, SummaryLine,
};
