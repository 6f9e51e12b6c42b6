use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use super::codec::{self, GossipMessage, RECV_BUFFER_BYTES};
use crate::error::{ClusterError, Result};

/// One logical UDP channel (discovery or protocol).
#[derive(Debug)]
pub struct UdpChannel {
    name: &'static str,
    socket: UdpSocket,
    send_timeout: Duration,
}

impl UdpChannel {
    /// Binds the socket. Failure is reported as [`ClusterError::Bind`].
    pub async fn bind(
        name: &'static str,
        addr: SocketAddr,
        broadcast: bool,
        send_timeout: Duration,
    ) -> Result<Self> {
        let bind_err = |source| ClusterError::Bind {
            channel: name,
            addr,
            source,
        };

        let socket = UdpSocket::bind(addr).await.map_err(bind_err)?;
        if broadcast {
            socket.set_broadcast(true).map_err(bind_err)?;
        }

        tracing::info!("{} channel bound on {}", name, socket.local_addr()?);

        Ok(Self {
            name,
            socket,
            send_timeout,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Encodes and sends one envelope, bounded by the send timeout.
    pub async fn send(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<()> {
        let bytes = codec::encode(msg)?;
        match tokio::time::timeout(self.send_timeout, self.socket.send_to(&bytes, addr)).await {
            Ok(Ok(_)) => {
                tracing::trace!("{} -> {} ({} bytes) on {}", msg.kind.name(), addr, bytes.len(), self.name);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClusterError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("send to {} timed out", addr),
            ))),
        }
    }

    /// Receives one datagram. The outer error is a socket failure; the inner result
    /// is the decode of that single datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(SocketAddr, Result<GossipMessage>)> {
        let (len, src) = self.socket.recv_from(buf).await?;
        Ok((src, codec::decode(&buf[..len])))
    }

    pub fn recv_buffer() -> Vec<u8> {
        vec![0u8; RECV_BUFFER_BYTES]
    }
}
