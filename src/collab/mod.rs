//! Cluster membership and shard ownership.
//!
//! Nodes register their `ip:port` in the coordination keyspace under a lease. The sorted list of
//! registered addresses gives every node an index, and each project, model and chunk key belongs
//! to the node whose index equals the key's FNV-1a hash modulo the node count.

pub mod coordination;
pub mod network;
pub mod sharding;
pub mod state;
pub mod watcher;
