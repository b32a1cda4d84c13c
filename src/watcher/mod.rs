pub mod repository;
pub mod service;

pub use repository::{PgWatcherRepository, WatcherRepository};
pub use service::{WatcherService, WatcherUpdate};
