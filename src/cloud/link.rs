//! TCP link to the cloud endpoint
//!
//! Each update is one short-lived connection carrying a single framed
//! [`UpdateRequest`] and its [`UpdateReply`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use device_agent_shared::codec::{self, UpdateReply, UpdateRequest};
use device_agent_shared::CommandPatch;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::sender::{CloudError, CommandUpdateSender};

/// Reply message the server uses when it no longer trusts the device
pub const INVALID_CREDENTIALS_REPLY: &str = "invalid_credentials";

/// Configuration for the cloud link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Cloud endpoint address
    pub address: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Time allowed for sending a request and reading its reply
    pub request_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct CloudLink {
    config: LinkConfig,
}

impl CloudLink {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    async fn exchange(
        &self,
        mut stream: TcpStream,
        request: &UpdateRequest,
    ) -> Result<UpdateReply, CloudError> {
        let frame = codec::encode(request)?;
        stream.write_all(&frame).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(1024);
        loop {
            if let Some(reply) = codec::decode::<UpdateReply>(&mut buf)? {
                return Ok(reply);
            }
            let n = stream.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(CloudError::Closed);
            }
        }
    }
}

#[async_trait]
impl CommandUpdateSender for CloudLink {
    async fn update_command(
        &self,
        command_id: &str,
        patch: &CommandPatch,
    ) -> Result<(), CloudError> {
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .map_err(|_| CloudError::Timeout)??;

        let request = UpdateRequest {
            command_id: command_id.to_owned(),
            patch: patch.clone(),
        };
        let reply = timeout(self.config.request_timeout, self.exchange(stream, &request))
            .await
            .map_err(|_| CloudError::Timeout)??;

        if reply.accepted {
            debug!("Update for command {} accepted", command_id);
            return Ok(());
        }

        let message = reply.message.unwrap_or_default();
        warn!("Update for command {} rejected: {}", command_id, message);
        if message == INVALID_CREDENTIALS_REPLY {
            Err(CloudError::InvalidCredentials)
        } else {
            Err(CloudError::Rejected(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_agent_shared::codec::FrameDecoder;
    use device_agent_shared::CommandStatus;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve one connection: read a request, answer with `reply` (or close
    /// the socket when `reply` is `None`)
    async fn serve_once(
        reply: Option<UpdateReply>,
    ) -> (String, oneshot::Receiver<UpdateRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr").to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut decoder = FrameDecoder::new();
            let mut chunk = [0u8; 256];
            let request = loop {
                if let Some(request) = decoder.decode_next::<UpdateRequest>().expect("frame") {
                    break request;
                }
                let n = socket.read(&mut chunk).await.expect("read");
                decoder.extend(&chunk[..n]);
            };
            let _ = tx.send(request);
            if let Some(reply) = reply {
                let frame = codec::encode(&reply).expect("encode");
                socket.write_all(&frame).await.expect("write");
            }
        });

        (address, rx)
    }

    fn link(address: String) -> CloudLink {
        CloudLink::new(LinkConfig {
            address,
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
        })
    }

    #[tokio::test]
    async fn test_accepted_update() {
        let (address, request) = serve_once(Some(UpdateReply {
            accepted: true,
            message: None,
        }))
        .await;

        let patch = CommandPatch::with_state(CommandStatus::Done);
        link(address)
            .update_command("12", &patch)
            .await
            .expect("accepted");

        let request = request.await.expect("request seen");
        assert_eq!(request.command_id, "12");
        assert_eq!(request.patch, patch);
    }

    #[tokio::test]
    async fn test_rejected_update() {
        let (address, _) = serve_once(Some(UpdateReply {
            accepted: false,
            message: Some("unknown command".into()),
        }))
        .await;

        let err = link(address)
            .update_command("12", &CommandPatch::with_state(CommandStatus::Done))
            .await
            .expect_err("rejected");
        assert!(matches!(err, CloudError::Rejected(ref m) if m == "unknown command"));
        assert!(!err.is_credentials_error());
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let (address, _) = serve_once(Some(UpdateReply {
            accepted: false,
            message: Some(INVALID_CREDENTIALS_REPLY.into()),
        }))
        .await;

        let err = link(address)
            .update_command("12", &CommandPatch::with_state(CommandStatus::Done))
            .await
            .expect_err("credentials");
        assert!(err.is_credentials_error());
    }

    #[tokio::test]
    async fn test_connection_closed_without_reply() {
        let (address, _) = serve_once(None).await;
        let err = link(address)
            .update_command("12", &CommandPatch::with_state(CommandStatus::Done))
            .await
            .expect_err("no reply");
        assert!(matches!(err, CloudError::Closed | CloudError::Io(_)));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr").to_string();
        tokio::spawn(async move {
            // Accept and hold the socket open without answering
            let (_socket, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = link(address)
            .update_command("12", &CommandPatch::with_state(CommandStatus::Done))
            .await
            .expect_err("timeout");
        assert!(matches!(err, CloudError::Timeout));
    }
}
