//! Inbound Connection Handling
//!
//! One accept loop, one spawned handler per connection. Each handler reads exactly
//! one frame, answers it and closes. Frames that fail to decode drop the connection
//! without a reply; frames that decode but carry an invalid body get an ERROR reply.

use crate::error::{ClusterError, Result};
use crate::executor::queue::TaskQueue;
use crate::health::ClusterHealth;
use crate::health::stats::ClusterStats;
use crate::membership::directory::{NodeDirectory, Registration};
use crate::membership::types::{NodeRecord, NodeRole};
use crate::protocol::messages::{
    ClusterStatusReply, DiscoveryReply, Heartbeat, HeartbeatAck, RegistrationReply, ResultAck,
    ShutdownNotice, StatusAck, TaskAssignment, TaskResultReport,
};
use crate::protocol::{Frame, MessageType, read_frame, write_frame};
use crate::scheduler::Scheduler;
use crate::time::now_ms;

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

pub struct NodeServer {
    directory: Arc<NodeDirectory>,
    queue: Arc<TaskQueue>,
    scheduler: Arc<Scheduler>,
    stats: Arc<ClusterStats>,
    role: NodeRole,
    started_at: u64,
    connection_timeout: Duration,
}

impl NodeServer {
    pub fn new(
        directory: Arc<NodeDirectory>,
        queue: Arc<TaskQueue>,
        scheduler: Arc<Scheduler>,
        stats: Arc<ClusterStats>,
        role: NodeRole,
        started_at: u64,
        connection_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            directory,
            queue,
            scheduler,
            stats,
            role,
            started_at,
            connection_timeout,
        })
    }

    /// Accepts connections until `shutdown` flips to `true`.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Listener stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let exchange = async {
            let frame = read_frame(&mut stream).await?;
            tracing::debug!("Received {} from {}", frame.message_type, peer);
            let reply = self.handle_frame(frame);
            write_frame(&mut stream, &reply).await
        };

        match tokio::time::timeout(self.connection_timeout, exchange).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Dropping connection from {}: {}", peer, e),
            Err(_) => tracing::warn!(
                "Dropping connection from {}: no complete frame within {:?}",
                peer,
                self.connection_timeout
            ),
        }
    }

    /// Answers one decoded frame.
    pub fn handle_frame(&self, frame: Frame) -> Frame {
        let message_type = frame.message_type;

        let reply = match message_type {
            MessageType::Heartbeat => self.on_heartbeat(&frame),
            MessageType::NodeRegistration => self.on_registration(&frame),
            MessageType::NodeDiscovery => self.on_discovery(),
            MessageType::TaskAssignment => self.on_assignment(&frame),
            MessageType::TaskResult => self.on_result(&frame),
            MessageType::ClusterStatus => self.on_status(),
            MessageType::Shutdown => self.on_shutdown(&frame),
            MessageType::Error => {
                tracing::warn!("Peer sent an unsolicited ERROR: {:?}", frame.payload.get("error"));
                Ok(Frame::error("ERROR frames are not accepted as requests"))
            }
        };

        reply.unwrap_or_else(|e| {
            tracing::warn!("Rejecting {} request: {}", message_type, e);
            Frame::error(e.to_string())
        })
    }

    fn on_heartbeat(&self, frame: &Frame) -> Result<Frame> {
        let heartbeat: Heartbeat = frame.parse()?;
        let known = self.directory.apply_heartbeat(&heartbeat, now_ms());

        reply(
            MessageType::Heartbeat,
            &HeartbeatAck {
                status: "ok".to_string(),
                known,
            },
        )
    }

    fn on_registration(&self, frame: &Frame) -> Result<Frame> {
        let record: NodeRecord = frame
            .parse()
            .map_err(|e| ClusterError::Registration(e.to_string()))?;

        if self.directory.register(record, now_ms())? == Registration::Joined {
            self.stats.node_joined();
        }

        let coordinator = self
            .role
            .coordinates()
            .then(|| self.directory.local_id().clone());

        reply(
            MessageType::NodeRegistration,
            &RegistrationReply {
                status: "registered".to_string(),
                cluster_size: self.directory.len(),
                coordinator,
            },
        )
    }

    fn on_discovery(&self) -> Result<Frame> {
        reply(
            MessageType::NodeDiscovery,
            &DiscoveryReply {
                nodes: self.directory.snapshot(),
            },
        )
    }

    fn on_assignment(&self, frame: &Frame) -> Result<Frame> {
        let assignment: TaskAssignment = frame.parse()?;
        let answer = self.scheduler.host_remote(assignment);
        reply(MessageType::TaskAssignment, &answer)
    }

    fn on_result(&self, frame: &Frame) -> Result<Frame> {
        let report: TaskResultReport = frame.parse()?;
        let known = self.scheduler.complete_remote(report);

        reply(
            MessageType::TaskResult,
            &ResultAck {
                status: "acknowledged".to_string(),
                known,
            },
        )
    }

    fn on_status(&self) -> Result<Frame> {
        let nodes = self.directory.snapshot();
        let health = ClusterHealth::compute(
            &nodes,
            &self.queue.counts(),
            self.started_at,
            now_ms(),
            self.directory.dead_threshold(),
        );

        reply(
            MessageType::ClusterStatus,
            &ClusterStatusReply {
                node_id: self.directory.local_id().clone(),
                health,
                nodes,
                stats: self.stats.snapshot(),
            },
        )
    }

    fn on_shutdown(&self, frame: &Frame) -> Result<Frame> {
        let notice: ShutdownNotice = frame.parse()?;
        self.directory.mark_disconnected(&notice.node_id);
        reply(MessageType::Shutdown, &StatusAck::new("acknowledged"))
    }
}

fn reply<T: Serialize>(message_type: MessageType, body: &T) -> Result<Frame> {
    Frame::from_message(message_type, body)
}
