//! In-memory key/value server speaking the Redis wire protocol, with key
//! expiry, RDB snapshot loading, and primary-to-replica replication.

pub mod commands;
pub mod db;
pub mod error;
pub mod handler;
pub mod propagator;
pub mod rdb;
pub mod replication;
pub mod resp;
pub mod server;
pub mod types;

pub use server::{Server, ServerState};
pub use types::Config;
