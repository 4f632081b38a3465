pub mod arranger;
pub mod outbox;
pub mod seed;
pub mod store;
pub mod tracker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use arranger::TaskArranger;
pub use outbox::{OutboxRelay, OutboxRow, OutboxSource};
pub use store::{PgStore, SchedulerStore};
pub use tracker::StatusTracker;
