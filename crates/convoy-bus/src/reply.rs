//! Synchronous request/reply channel between a campaign and its local agent.
//!
//! Frames are a 4-byte big-endian length followed by the body. A campaign
//! sends one request (the serialized DAG) and waits for one reply, [`ACK`].

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::debug;

use crate::error::BusError;

/// Acknowledgement sent for every received request.
pub const ACK: &[u8] = b"ACK";

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one frame.
///
/// # Errors
///
/// Returns an error if `body` exceeds [`MAX_FRAME_LEN`] or the write fails.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), BusError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(BusError::FrameTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| BusError::FrameTooLarge(body.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` if the peer closed before a new frame began.
///
/// # Errors
///
/// Returns an error if the announced length exceeds [`MAX_FRAME_LEN`] or the
/// stream ends mid-frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, BusError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BusError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Agent side: accepts campaign connections.
pub struct ReplyListener {
    listener: TcpListener,
}

impl ReplyListener {
    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, BusError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Bound address (useful after binding port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next campaign connection.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn accept(&self) -> Result<ReplyConnection, BusError> {
        let (stream, peer) = self.listener.accept().await?;
        debug!(peer = %peer, "Campaign connected");
        Ok(ReplyConnection { stream, peer })
    }
}

/// One accepted campaign connection.
pub struct ReplyConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ReplyConnection {
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Next request, or `None` once the campaign hung up.
    ///
    /// # Errors
    ///
    /// Returns an error on a malformed or truncated frame.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, BusError> {
        read_frame(&mut self.stream).await
    }

    /// Reply to the last request.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn reply(&mut self, body: &[u8]) -> Result<(), BusError> {
        write_frame(&mut self.stream, body).await
    }
}

/// Campaign side: a bounded-time client for one request/reply exchange.
pub struct RequestClient {
    stream: TcpStream,
    send_timeout: Duration,
    recv_timeout: Duration,
}

impl RequestClient {
    /// Connect to the agent at `addr`. The send timeout also bounds the
    /// connection attempt.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] or [`BusError::ConnectionFailed`] if the
    /// agent cannot be reached.
    pub async fn connect(
        addr: &str,
        send_timeout: Duration,
        recv_timeout: Duration,
    ) -> Result<Self, BusError> {
        let stream = timeout(send_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| BusError::Timeout("connect"))?
            .map_err(|e| BusError::ConnectionFailed(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        // Closing resets the connection instead of draining it.
        stream.set_linger(Some(Duration::ZERO))?;

        Ok(Self {
            stream,
            send_timeout,
            recv_timeout,
        })
    }

    /// Send one request.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] if the send timeout expires.
    pub async fn send(&mut self, body: &[u8]) -> Result<(), BusError> {
        timeout(self.send_timeout, write_frame(&mut self.stream, body))
            .await
            .map_err(|_| BusError::Timeout("send"))?
    }

    /// Wait for one reply.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] if the receive timeout expires, or
    /// [`BusError::ConnectionFailed`] if the agent hung up without replying.
    pub async fn recv(&mut self) -> Result<Vec<u8>, BusError> {
        timeout(self.recv_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| BusError::Timeout("receive"))??
            .ok_or_else(|| BusError::ConnectionFailed("connection closed by agent".into()))
    }

    /// Send `body` and wait for the reply.
    ///
    /// # Errors
    ///
    /// See [`RequestClient::send`] and [`RequestClient::recv`].
    pub async fn request(&mut self, body: &[u8]) -> Result<Vec<u8>, BusError> {
        self.send(body).await?;
        self.recv().await
    }

    /// Close without waiting for unsent data.
    pub async fn close(self) {
        drop(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_request_reply() {
        let listener = ReplyListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let request = conn.recv().await.unwrap().unwrap();
            conn.reply(ACK).await.unwrap();
            request
        });

        let mut client = RequestClient::connect(&addr, SHORT, SHORT).await.unwrap();
        let reply = client.request(b"dag-bytes").await.unwrap();
        client.close().await;

        assert_eq!(reply, ACK);
        assert_eq!(server.await.unwrap(), b"dag-bytes");
    }

    #[tokio::test]
    async fn test_client_does_not_linger() {
        let listener = ReplyListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.ok()?;
            conn.recv().await.ok().flatten()
        });

        let client = RequestClient::connect(&addr, SHORT, SHORT).await.unwrap();
        assert_eq!(client.stream.linger().unwrap(), Some(Duration::ZERO));
        client.close().await;

        // The agent sees the connection go away without a request.
        let request = tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_recv_timeout_when_agent_is_silent() {
        let listener = ReplyListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let _ = conn.recv().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut client = RequestClient::connect(&addr, SHORT, SHORT).await.unwrap();
        assert!(matches!(
            client.request(b"dag").await,
            Err(BusError::Timeout("receive"))
        ));
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port nobody listens on.
        let listener = ReplyListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = RequestClient::connect(&addr, SHORT, SHORT).await;
        assert!(matches!(
            result,
            Err(BusError::ConnectionFailed(_) | BusError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = u32::try_from(MAX_FRAME_LEN + 1).unwrap();
        a.write_all(&len.to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(BusError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }
}
