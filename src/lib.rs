//! Sharded pattern serving tier.
//!
//! Every node serves the chunks of mined patterns it owns over a JSON-RPC endpoint. The
//! [`client`] scatters a query to all registered nodes and merges the authoritative answers.

pub mod client;
pub mod collab;
pub mod database;
pub mod eager_env;
pub mod environment;
pub mod pattern;
pub mod rpc;
pub mod server;
pub mod store;
pub mod topology;
mod utils;
