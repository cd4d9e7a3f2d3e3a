use crate::error::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading bytes of every frame.
pub const MAGIC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Only protocol version understood by this node.
pub const VERSION: u8 = 1;

/// Fixed header size: magic, version, type, payload length.
pub const HEADER_LEN: usize = 10;

/// Upper bound on a declared payload length and on the decompressed body.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Message type carried in byte 5 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Heartbeat = 0x01,
    TaskAssignment = 0x02,
    TaskResult = 0x03,
    NodeRegistration = 0x04,
    NodeDiscovery = 0x05,
    ClusterStatus = 0x06,
    Error = 0x07,
    Shutdown = 0x08,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::Heartbeat,
        MessageType::TaskAssignment,
        MessageType::TaskResult,
        MessageType::NodeRegistration,
        MessageType::NodeDiscovery,
        MessageType::ClusterStatus,
        MessageType::Error,
        MessageType::Shutdown,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ClusterError;

    fn try_from(code: u8) -> Result<Self, ClusterError> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| ClusterError::Protocol(format!("unknown message type 0x{code:02x}")))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::TaskAssignment => "TASK_ASSIGNMENT",
            MessageType::TaskResult => "TASK_RESULT",
            MessageType::NodeRegistration => "NODE_REGISTRATION",
            MessageType::NodeDiscovery => "NODE_DISCOVERY",
            MessageType::ClusterStatus => "CLUSTER_STATUS",
            MessageType::Error => "ERROR",
            MessageType::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}
