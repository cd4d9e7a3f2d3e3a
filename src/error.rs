//! Cluster Error Taxonomy
//!
//! Every fallible operation in the library returns [`ClusterError`]. Binary code and
//! task processors work with `anyhow`, the library boundary stays typed.

/// Errors raised by the cluster core.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A frame failed header validation, was truncated, or its payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A NODE_REGISTRATION payload did not describe a valid node record.
    #[error("registration error: {0}")]
    Registration(String),

    /// A remote node could not be reached, timed out, or rejected the assignment.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// A registered processor failed while executing a task.
    #[error("processor error: {0}")]
    Processor(String),

    /// Local execution was attempted for a task type with no registered processor.
    #[error("no processor registered for task type '{0}'")]
    NoProcessor(String),

    /// No node in the directory is eligible to run the task.
    #[error("no candidate node for task {0}")]
    NoCandidateNode(String),

    /// The task id is already tracked by this node.
    #[error("task {0} is already tracked by this node")]
    DuplicateTask(String),

    /// The listening endpoint could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
