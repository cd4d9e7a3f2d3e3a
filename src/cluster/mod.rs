//! Cluster Node Module
//!
//! Wires the components of one node together and exposes them to callers.
//!
//! ## Submodules
//! - **`config`**: `ClusterConfig` and its defaults.
//! - **`manager`**: `ClusterManager`, the composition root and caller-facing API.
//! - **`server`**: The TCP accept loop and per-message handlers.
//! - **`heartbeat`**: Heartbeat and sweep loops, joining and leaving.

pub mod config;
pub mod heartbeat;
pub mod manager;
pub mod server;

pub use config::ClusterConfig;
pub use manager::ClusterManager;

#[cfg(test)]
mod tests;
