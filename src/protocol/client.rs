use super::codec::{Frame, read_frame, write_frame};
use crate::error::{ClusterError, Result};

use std::time::Duration;
use tokio::net::TcpStream;

/// Sends one frame to `addr` over a fresh connection and waits for the reply frame.
///
/// The whole exchange (connect, write, read) is bounded by `timeout`. Connection
/// failures and timeouts surface as [`ClusterError::Dispatch`].
pub async fn request(addr: &str, frame: &Frame, timeout: Duration) -> Result<Frame> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClusterError::Dispatch(format!("connect to {addr} failed: {e}")))?;

        write_frame(&mut stream, frame).await?;
        read_frame(&mut stream).await
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::Dispatch(format!(
            "{} to {addr} timed out after {timeout:?}",
            frame.message_type
        ))),
    }
}
