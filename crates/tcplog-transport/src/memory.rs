use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tcplog_protocol::{
    Framing, SessionId, TelemetryError, TelemetryResult, Transport, TransportFactory,
    TransportTarget,
};

/// Everything one opened transport received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecording {
    pub session_id: SessionId,
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub flushes: usize,
    pub closed: bool,
}

impl MemoryRecording {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug, Default)]
struct Switches {
    fail_opens: AtomicBool,
    fail_writes: AtomicBool,
}

/// In-process sink. Clones share recordings and failure switches.
#[derive(Debug, Clone)]
pub struct MemorySink {
    framing: Framing,
    recordings: Arc<Mutex<Vec<MemoryRecording>>>,
    switches: Arc<Switches>,
}

impl MemorySink {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            recordings: Arc::new(Mutex::new(Vec::new())),
            switches: Arc::new(Switches::default()),
        }
    }

    /// Make subsequent opens fail with `OpenFailed`.
    pub fn fail_opens(&self, enabled: bool) {
        self.switches.fail_opens.store(enabled, Ordering::SeqCst);
    }

    /// Make writes, flushes (and the trailer) on open transports fail.
    pub fn fail_writes(&self, enabled: bool) {
        self.switches.fail_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn recordings(&self) -> Vec<MemoryRecording> {
        self.recordings.lock().clone()
    }

    /// Total bytes written across all sessions.
    pub fn total_bytes(&self) -> usize {
        self.recordings.lock().iter().map(|r| r.bytes.len()).sum()
    }
}

#[async_trait]
impl TransportFactory for MemorySink {
    async fn open(&self, target: &TransportTarget) -> TelemetryResult<Box<dyn Transport>> {
        if self.switches.fail_opens.load(Ordering::SeqCst) {
            return Err(TelemetryError::OpenFailed {
                path: format!("memory://{}", target.session_id),
                reason: "open failure injected".into(),
            });
        }
        let index = {
            let mut recordings = self.recordings.lock();
            recordings.push(MemoryRecording {
                session_id: target.session_id.clone(),
                bytes: Vec::new(),
                writes: 0,
                flushes: 0,
                closed: false,
            });
            recordings.len() - 1
        };
        Ok(Box::new(MemoryTransport {
            framing: self.framing,
            index,
            recordings: Arc::clone(&self.recordings),
            switches: Arc::clone(&self.switches),
        }))
    }
}

/// Handle onto one [`MemoryRecording`].
#[derive(Debug)]
pub struct MemoryTransport {
    framing: Framing,
    index: usize,
    recordings: Arc<Mutex<Vec<MemoryRecording>>>,
    switches: Arc<Switches>,
}

impl MemoryTransport {
    fn with_recording<T>(
        &self,
        apply: impl FnOnce(&mut MemoryRecording) -> TelemetryResult<T>,
    ) -> TelemetryResult<T> {
        let mut recordings = self.recordings.lock();
        let recording = recordings
            .get_mut(self.index)
            .ok_or_else(|| TelemetryError::WriteFailed("recording missing".into()))?;
        if recording.closed {
            return Err(TelemetryError::WriteFailed("transport already closed".into()));
        }
        apply(recording)
    }

    fn injected_failure(&self) -> TelemetryResult<()> {
        if self.switches.fail_writes.load(Ordering::SeqCst) {
            Err(TelemetryError::WriteFailed("write failure injected".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn framing(&self) -> Framing {
        self.framing
    }

    async fn write(&mut self, bytes: &[u8]) -> TelemetryResult<()> {
        self.injected_failure()?;
        self.with_recording(|recording| {
            recording.bytes.extend_from_slice(bytes);
            recording.writes += 1;
            Ok(())
        })
    }

    async fn flush(&mut self) -> TelemetryResult<()> {
        self.injected_failure()?;
        self.with_recording(|recording| {
            recording.flushes += 1;
            Ok(())
        })
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        let mut recordings = self.recordings.lock();
        if let Some(recording) = recordings.get_mut(self.index) {
            recording.closed = true;
        }
        Ok(())
    }
}
