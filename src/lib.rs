pub mod api;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod filter;
pub mod lock;
pub mod logging;
pub mod repo;
pub mod tools;
pub mod tracking;
pub mod utils;
pub mod watcher;

#[cfg(test)]
pub mod test_utils;
