pub mod alerts;
pub mod config;
pub mod db;
pub mod error;
pub mod explorer;
pub mod models;
pub mod notify;
pub mod price;
pub mod redis;
pub mod tasks;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, WatcherError};
