pub mod client;
pub mod keep_alive;

pub use client::{ExplorerService, HttpExplorerClient};
pub use keep_alive::{KeepAlive, resubscribe_all, run_keep_alive};
