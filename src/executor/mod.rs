//! Task Executor Module
//!
//! Everything a node needs to own and run tasks locally.
//!
//! ## Architecture Overview
//! 1. **Submission**: Tasks enter the `TaskQueue` as PENDING, ordered by priority.
//! 2. **Placement**: The scheduler claims ready tasks and assigns them to a node.
//! 3. **Execution**: Tasks placed on this node run in the bounded `TaskExecutor` pool,
//!    which resolves a processor from the `ProcessorRegistry` by task type.
//! 4. **Completion**: The outcome is written back to the queue as a terminal state.
//!
//! ## Submodules
//! - **`types`**: Task, priority, status state machine and outcomes.
//! - **`queue`**: The lifecycle book (pending, active, finished).
//! - **`executor`**: The worker pool.
//! - **`registry`**: The `TaskProcessor` trait and the type-to-processor map.
//! - **`processors`**: Built-in `compute` and `data_processing` processors.

pub mod executor;
pub mod processors;
pub mod queue;
pub mod registry;
pub mod types;
