//! UDP cohort transport
//!
//! Each round message is one JSON datagram sent to every configured peer
//! address, this peer's own included. Loss and reordering are tolerated by
//! the round protocol, so nothing here retries or acknowledges.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::channel::{CohortChannel, RoundMessage};

/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65_507;
const INBOX_CAPACITY: usize = 1024;

pub struct UdpCohortChannel {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
    tx: broadcast::Sender<RoundMessage>,
    recv_task: JoinHandle<()>,
}

impl UdpCohortChannel {
    pub async fn bind(bind_addr: SocketAddr, peers: Vec<SocketAddr>) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind cohort socket on {}", bind_addr))?;
        Ok(Self::from_socket(socket, peers))
    }

    pub fn from_socket(socket: UdpSocket, peers: Vec<SocketAddr>) -> Self {
        let socket = Arc::new(socket);
        let (tx, _) = broadcast::channel(INBOX_CAPACITY);
        let recv_task = tokio::spawn(Self::receive_loop(Arc::clone(&socket), tx.clone()));

        if let Ok(local) = socket.local_addr() {
            tracing::info!(local = %local, peers = peers.len(), "✅ Cohort UDP channel bound");
        }

        Self {
            socket,
            peers,
            tx,
            recv_task,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn receive_loop(socket: Arc<UdpSocket>, tx: broadcast::Sender<RoundMessage>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => match serde_json::from_slice::<RoundMessage>(&buf[..len]) {
                    Ok(message) => {
                        tracing::debug!(
                            from = %from,
                            round = %message.round,
                            sender = %message.sender,
                            "Cohort message received"
                        );
                        let _ = tx.send(message);
                    }
                    Err(e) => {
                        tracing::warn!(from = %from, error = %e, "Malformed cohort datagram dropped");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Cohort socket receive failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

#[async_trait]
impl CohortChannel for UdpCohortChannel {
    async fn broadcast(&self, message: &RoundMessage) -> Result<()> {
        let bytes = serde_json::to_vec(message).context("Failed to encode round message")?;
        if bytes.len() > MAX_DATAGRAM {
            bail!(
                "round message for {} is {} bytes, over the datagram limit",
                message.round,
                bytes.len()
            );
        }

        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(&bytes, peer).await {
                tracing::warn!(peer = %peer, round = %message.round, error = %e, "Send to peer failed");
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RoundMessage> {
        self.tx.subscribe()
    }
}

impl Drop for UdpCohortChannel {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
