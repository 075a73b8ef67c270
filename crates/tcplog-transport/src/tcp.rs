use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tcplog_protocol::{
    Framing, TelemetryConfig, TelemetryError, TelemetryResult, Transport, TransportFactory,
    TransportTarget,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Opens one TCP connection per session.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    resolve_timeout: Duration,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            host: config.host_name.clone(),
            port: config.port,
            resolve_timeout: config.resolve_timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn resolve_timeout(mut self, limit: Duration) -> Self {
        self.resolve_timeout = limit;
        self
    }

    pub fn connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = limit;
        self
    }

    async fn resolve(&self) -> TelemetryResult<Vec<SocketAddr>> {
        self.resolve_with(lookup_host((self.host.as_str(), self.port)))
            .await
    }

    /// Runs `lookup` under the resolve timeout.
    async fn resolve_with<F, I>(&self, lookup: F) -> TelemetryResult<Vec<SocketAddr>>
    where
        F: Future<Output = std::io::Result<I>>,
        I: Iterator<Item = SocketAddr>,
    {
        let failed = |reason: String| TelemetryError::ResolutionFailed {
            host: self.host.clone(),
            reason,
        };

        let addrs: Vec<SocketAddr> = match timeout(self.resolve_timeout, lookup).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(error)) => return Err(failed(error.to_string())),
            Err(_) => {
                return Err(failed(format!(
                    "timed out after {} ms",
                    self.resolve_timeout.as_millis()
                )));
            }
        };

        if addrs.is_empty() {
            return Err(failed("no addresses returned".into()));
        }
        debug!(count = addrs.len(), "host resolved");
        Ok(addrs)
    }

    /// Tries each address in order, each attempt bounded by the connect timeout.
    async fn connect_first<C, F>(
        &self,
        addrs: Vec<SocketAddr>,
        connect: C,
    ) -> TelemetryResult<(TcpStream, SocketAddr)>
    where
        C: Fn(SocketAddr) -> F,
        F: Future<Output = std::io::Result<TcpStream>>,
    {
        let mut last_error = String::from("no address accepted the connection");
        for addr in addrs {
            match timeout(self.connect_timeout, connect(addr)).await {
                Ok(Ok(stream)) => return Ok((stream, addr)),
                Ok(Err(error)) => {
                    warn!(%addr, %error, "connect attempt failed");
                    last_error = error.to_string();
                }
                Err(_) => {
                    warn!(%addr, "connect attempt timed out");
                    last_error = format!(
                        "timed out after {} ms",
                        self.connect_timeout.as_millis()
                    );
                }
            }
        }

        Err(TelemetryError::ConnectFailed {
            host: self.host.clone(),
            port: self.port,
            reason: last_error,
        })
    }
}

#[async_trait]
impl TransportFactory for TcpConnector {
    #[instrument(
        skip(self, target),
        fields(host = %self.host, port = self.port, session_id = %target.session_id)
    )]
    async fn open(&self, target: &TransportTarget) -> TelemetryResult<Box<dyn Transport>> {
        let addrs = self.resolve().await?;
        let (stream, addr) = self.connect_first(addrs, TcpStream::connect).await?;
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%error, "failed to disable nagle");
        }
        info!(%addr, "connected to collector");
        Ok(Box::new(TcpTransport {
            stream: Some(stream),
            peer: addr,
        }))
    }
}

/// Connected collector socket. Each session line is sent in full.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

impl TcpTransport {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn stream(&mut self) -> TelemetryResult<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| TelemetryError::WriteFailed("socket already closed".into()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    async fn write(&mut self, bytes: &[u8]) -> TelemetryResult<()> {
        let peer = self.peer;
        // write_all keeps sending until every byte is accepted or the socket errors.
        self.stream()?
            .write_all(bytes)
            .await
            .map_err(|error| TelemetryError::WriteFailed(format!("send to {peer}: {error}")))
    }

    async fn flush(&mut self) -> TelemetryResult<()> {
        let peer = self.peer;
        self.stream()?
            .flush()
            .await
            .map_err(|error| TelemetryError::WriteFailed(format!("flush to {peer}: {error}")))
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let result = stream.shutdown().await;
        drop(stream);
        info!(peer = %self.peer, "collector socket closed");
        match result {
            Ok(()) => Ok(()),
            // Peer already gone; the descriptor is released either way.
            Err(error) if error.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(error) => Err(TelemetryError::WriteFailed(format!("shutdown: {error}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Instant;
    use tcplog_protocol::SessionId;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn target() -> TransportTarget {
        TransportTarget {
            session_id: SessionId::from_string("tcp-test"),
        }
    }

    #[tokio::test]
    async fn sends_bytes_to_collector() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let collector = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut received = String::new();
            socket.read_to_string(&mut received).await?;
            Ok::<_, std::io::Error>(received)
        });

        let connector = TcpConnector::new("127.0.0.1", port);
        let mut transport = connector.open(&target()).await?;
        assert_eq!(transport.framing(), Framing::Lines);
        transport.write(b"{\"eventName\":\"A\"}\n").await?;
        transport.write(b"{\"eventName\":\"B\"}\n").await?;
        transport.flush().await?;
        transport.close().await?;

        let received = collector.await??;
        assert_eq!(received, "{\"eventName\":\"A\"}\n{\"eventName\":\"B\"}\n");
        Ok(())
    }

    #[tokio::test]
    async fn large_payload_arrives_whole() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let collector = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await?;
            Ok::<_, std::io::Error>(received)
        });

        let payload = vec![b'x'; 4 * 1024 * 1024];
        let mut transport = TcpConnector::new("127.0.0.1", port).open(&target()).await?;
        transport.write(&payload).await?;
        transport.close().await?;

        assert_eq!(collector.await??.len(), payload.len());
        Ok(())
    }

    #[tokio::test]
    async fn refused_connection_is_connect_failure() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let err = TcpConnector::new("127.0.0.1", port)
            .open(&target())
            .await
            .err()
            .expect("connect should fail");
        assert!(matches!(err, TelemetryError::ConnectFailed { .. }), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn unresolvable_host_is_resolution_failure() {
        let err = TcpConnector::new("collector.invalid", 4000)
            .resolve_timeout(Duration::from_secs(3))
            .open(&target())
            .await
            .err()
            .expect("resolution should fail");
        assert!(matches!(err, TelemetryError::ResolutionFailed { .. }), "{err}");
    }

    #[tokio::test]
    async fn stalled_resolution_times_out() {
        let connector =
            TcpConnector::new("localhost", 4000).resolve_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = connector
            .resolve_with(std::future::pending::<
                std::io::Result<std::vec::IntoIter<SocketAddr>>,
            >())
            .await
            .err()
            .expect("resolution should time out");
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            TelemetryError::ResolutionFailed { host, reason } => {
                assert_eq!(host, "localhost");
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn tiny_resolve_timeout_is_still_bounded() {
        let started = Instant::now();
        let result = TcpConnector::new("localhost", 4000)
            .resolve_timeout(Duration::from_nanos(1))
            .resolve()
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        if let Err(err) = result {
            assert!(matches!(err, TelemetryError::ResolutionFailed { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn stalled_connect_times_out_per_address() {
        let connector =
            TcpConnector::new("127.0.0.1", 4000).connect_timeout(Duration::from_millis(50));
        let addrs: Vec<SocketAddr> = vec![
            "127.0.0.1:4000".parse().unwrap(),
            "127.0.0.1:4001".parse().unwrap(),
        ];
        let started = Instant::now();
        let err = connector
            .connect_first(addrs, |_| std::future::pending())
            .await
            .err()
            .expect("connect should time out");
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            TelemetryError::ConnectFailed { port, reason, .. } => {
                assert_eq!(port, 4000);
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn write_after_close_fails() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let mut transport = TcpConnector::new("127.0.0.1", port).open(&target()).await?;
        accept.await??;
        transport.close().await?;
        transport.close().await?;
        assert!(matches!(
            transport.write(b"late").await,
            Err(TelemetryError::WriteFailed(_))
        ));
        Ok(())
    }
}
