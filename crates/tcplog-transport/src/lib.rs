//! Transports that carry encoded session output.
//!
//! - [`TcpConnector`] / [`TcpTransport`] — stream socket to a collector,
//!   newline-delimited JSON.
//! - [`FileSink`] / [`FileTransport`] — one durable JSON document per session.
//! - [`FanoutFactory`] / [`FanoutTransport`] — several transports fed the same
//!   bytes, presented as one.
//! - [`MemorySink`] / [`MemoryTransport`] — in-process capture with failure
//!   injection.

use std::sync::Arc;

use tcplog_protocol::{SinkKind, TelemetryConfig, TransportFactory};

mod fanout;
mod file;
mod memory;
mod tcp;

pub use fanout::{FanoutFactory, FanoutTransport};
pub use file::{FileSink, FileTransport, session_file_name};
pub use memory::{MemoryRecording, MemorySink, MemoryTransport};
pub use tcp::{TcpConnector, TcpTransport};

/// Factory for the sink selected by `config`.
pub fn factory_for(config: &TelemetryConfig) -> Arc<dyn TransportFactory> {
    let network = || -> Arc<dyn TransportFactory> { Arc::new(TcpConnector::from_config(config)) };
    match config.sink {
        SinkKind::Network => network(),
        SinkKind::File => Arc::new(FileSink::new(&config.file_directory)),
        // The network child decides the framing, so the file holds JSON lines.
        SinkKind::Both => Arc::new(FanoutFactory::new(vec![
            network(),
            Arc::new(FileSink::lines(&config.file_directory)),
        ])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcplog_protocol::{Framing, SessionId, TransportTarget};

    #[tokio::test]
    async fn file_config_opens_document_transport() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!(
            "tcplog-factory-{}",
            std::process::id()
        ));
        let factory = factory_for(&TelemetryConfig::file(&root));
        let mut transport = factory
            .open(&TransportTarget {
                session_id: SessionId::from_string("factory"),
            })
            .await?;
        assert_eq!(transport.framing(), Framing::Document);
        transport.close().await?;
        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn fanned_out_file_is_named_for_lines() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let root = std::env::temp_dir().join(format!(
            "tcplog-factory-both-{}",
            std::process::id()
        ));
        let config = TelemetryConfig::new("127.0.0.1", port)
            .sink(SinkKind::Both)
            .file_directory(&root);
        let id = SessionId::from_string("both");
        let mut transport = factory_for(&config)
            .open(&TransportTarget {
                session_id: id.clone(),
            })
            .await?;
        accept.await??;
        assert_eq!(transport.framing(), Framing::Lines);
        transport.close().await?;

        assert!(tokio::fs::try_exists(root.join("both.jsonl")).await?);
        assert!(!tokio::fs::try_exists(root.join("both.json")).await?);
        let _ = tokio::fs::remove_dir_all(root).await;
        Ok(())
    }
}
