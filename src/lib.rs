//! Peer-to-Peer Compute Cluster Library
//!
//! This library crate defines the modules that make up one cluster node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! There is no central broker. Every node runs the same components:
//!
//! - **`protocol`**: The binary frame format (magic, version, type, length,
//!   zlib-compressed JSON body) and the one-shot request/reply client.
//! - **`membership`**: The node directory, registration and heartbeat bookkeeping,
//!   failure detection and host resource probes.
//! - **`executor`**: Task model, the priority queue with its state machine, the
//!   processor registry, the bounded local worker pool and the built-in processors.
//! - **`balancer`**: Node scoring and per-(node, task type) execution history.
//! - **`scheduler`**: The placement loop that runs tasks locally or dispatches them
//!   to the best peer.
//! - **`health`**: Cluster-wide aggregates and lifetime counters.
//! - **`cluster`**: Configuration, the TCP server, heartbeat/sweep loops and the
//!   `ClusterManager` that ties everything together.

pub mod balancer;
pub mod cluster;
pub mod error;
pub mod executor;
pub mod health;
pub mod membership;
pub mod protocol;
pub mod scheduler;
pub mod time;
