//! Reconciliation of subscriptions and feeds against the cached catalog,
//! and the concurrent dispatch of the resulting deliveries.

mod catalog;
mod dispatch;
mod reconcile;

pub use catalog::Catalog;
pub use dispatch::{DispatchSettings, Dispatcher, RunReport};
