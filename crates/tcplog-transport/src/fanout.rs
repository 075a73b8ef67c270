use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tcplog_protocol::{
    Framing, TelemetryError, TelemetryResult, Transport, TransportFactory, TransportTarget,
};
use tracing::{instrument, warn};

/// Opens every child factory for each session.
#[derive(Clone)]
pub struct FanoutFactory {
    children: Vec<Arc<dyn TransportFactory>>,
}

impl FanoutFactory {
    /// The first child decides the framing of the combined stream.
    pub fn new(children: Vec<Arc<dyn TransportFactory>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl TransportFactory for FanoutFactory {
    #[instrument(skip(self, target), fields(children = self.children.len(), session_id = %target.session_id))]
    async fn open(&self, target: &TransportTarget) -> TelemetryResult<Box<dyn Transport>> {
        if self.children.is_empty() {
            return Err(TelemetryError::OpenFailed {
                path: "fanout".into(),
                reason: "no child transports configured".into(),
            });
        }

        let mut opened: Vec<Box<dyn Transport>> = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match child.open(target).await {
                Ok(transport) => opened.push(transport),
                Err(error) => {
                    for transport in &mut opened {
                        if let Err(close_error) = transport.close().await {
                            warn!(%close_error, "failed to close partially opened transport");
                        }
                    }
                    return Err(error);
                }
            }
        }

        Ok(Box::new(FanoutTransport::new(opened)))
    }
}

/// Writes the same bytes to several transports.
pub struct FanoutTransport {
    children: Vec<Box<dyn Transport>>,
}

impl FanoutTransport {
    pub fn new(children: Vec<Box<dyn Transport>>) -> Self {
        Self { children }
    }

    /// Every child is attempted; any failure fails the whole operation.
    fn combine(results: Vec<TelemetryResult<()>>) -> TelemetryResult<()> {
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|result| result.err().map(|error| error.to_string()))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::WriteFailed(failures.join("; ")))
        }
    }
}

#[async_trait]
impl Transport for FanoutTransport {
    fn framing(&self) -> Framing {
        self.children
            .first()
            .map_or(Framing::Lines, |child| child.framing())
    }

    async fn write(&mut self, bytes: &[u8]) -> TelemetryResult<()> {
        let results = join_all(self.children.iter_mut().map(|child| child.write(bytes))).await;
        Self::combine(results)
    }

    async fn flush(&mut self) -> TelemetryResult<()> {
        let results = join_all(self.children.iter_mut().map(|child| child.flush())).await;
        Self::combine(results)
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        let results = join_all(self.children.iter_mut().map(|child| child.close())).await;
        Self::combine(results)
    }
}
