//! Membership & Discovery Module
//!
//! Maintains this node's view of the cluster: who exists, where they listen, and how
//! loaded they are.
//!
//! ## Core Mechanisms
//! - **Registration**: Nodes announce themselves with NODE_REGISTRATION; repeating it updates the entry.
//! - **Heartbeats**: Periodic HEARTBEAT messages refresh liveness and dynamic load figures.
//! - **Failure Detection**: A sweep evicts any node silent for longer than the dead threshold.
//! - **Probes**: Local load and capacity figures come from a pluggable `ResourceProbe`.

pub mod directory;
pub mod probe;
pub mod types;
