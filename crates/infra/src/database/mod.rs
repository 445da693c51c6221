//! Database implementations

mod columns;
pub mod calendar_event_repository;
pub mod integration_repository;
pub mod manager;
pub mod pool;
pub mod sync_log_repository;

pub use calendar_event_repository::*;
pub use integration_repository::*;
pub use manager::*;
pub use pool::*;
pub use sync_log_repository::*;
