pub mod config;
pub mod counters;
pub mod db;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod keys;
pub mod models;
pub mod preprocessing;
pub mod processing;
pub mod retention;
pub mod scope;
pub mod sentiment;
pub mod store;
pub mod words;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};
