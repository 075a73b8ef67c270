use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tcplog_protocol::{
    Framing, SessionId, TelemetryError, TelemetryResult, Transport, TransportFactory,
    TransportTarget,
};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// File name for a session's document. Characters outside
/// `[A-Za-z0-9._{}-]` become `_`, and a leading dot is replaced so the file is
/// never hidden or a parent reference.
pub fn session_file_name(session_id: &SessionId) -> String {
    format!("{}.json", sanitized_stem(session_id))
}

fn sanitized_stem(session_id: &SessionId) -> String {
    let mut name: String = session_id
        .as_str()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '{' | '}' => c,
            _ => '_',
        })
        .collect();
    if name.is_empty() {
        name.push_str("session");
    }
    if name.starts_with('.') {
        name.replace_range(0..1, "_");
    }
    name
}

/// Creates one file per session under a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    directory: PathBuf,
    extension: &'static str,
}

impl FileSink {
    /// Sessions stored as `<id>.json` documents.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: "json",
        }
    }

    /// Sessions stored as `<id>.jsonl`, for when the file receives
    /// newline-delimited records from a fan-out.
    pub fn lines(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: "jsonl",
        }
    }

    pub fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.directory
            .join(format!("{}.{}", sanitized_stem(session_id), self.extension))
    }

    fn open_failed(path: &Path, error: std::io::Error) -> TelemetryError {
        TelemetryError::OpenFailed {
            path: path.display().to_string(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl TransportFactory for FileSink {
    #[instrument(skip(self, target), fields(session_id = %target.session_id))]
    async fn open(&self, target: &TransportTarget) -> TelemetryResult<Box<dyn Transport>> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|error| Self::open_failed(&self.directory, error))?;

        let path = self.path_for(&target.session_id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|error| Self::open_failed(&path, error))?;

        info!(path = %path.display(), "session file created");
        Ok(Box::new(FileTransport {
            file: Some(file),
            path,
        }))
    }
}

/// Durable session document. Writes are appended in order.
#[derive(Debug)]
pub struct FileTransport {
    file: Option<File>,
    path: PathBuf,
}

impl FileTransport {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> TelemetryResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| TelemetryError::WriteFailed("session file already closed".into()))
    }

    fn write_failed(&self, error: std::io::Error) -> TelemetryError {
        TelemetryError::WriteFailed(format!("{}: {error}", self.path.display()))
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn framing(&self) -> Framing {
        Framing::Document
    }

    async fn write(&mut self, bytes: &[u8]) -> TelemetryResult<()> {
        let file = self.file()?;
        // tokio's flush waits for the background write, so the bytes have
        // reached the OS when this returns.
        let result = match file.write_all(bytes).await {
            Ok(()) => file.flush().await,
            Err(error) => Err(error),
        };
        result.map_err(|error| self.write_failed(error))
    }

    async fn flush(&mut self) -> TelemetryResult<()> {
        let file = self.file()?;
        let result = match file.flush().await {
            Ok(()) => file.sync_data().await,
            Err(error) => Err(error),
        };
        debug!(path = %self.path.display(), "session file synced");
        result.map_err(|error| self.write_failed(error))
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let result = match file.flush().await {
            Ok(()) => file.sync_all().await,
            Err(error) => Err(error),
        };
        drop(file);
        info!(path = %self.path.display(), "session file closed");
        result.map_err(|error| self.write_failed(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn target(id: &str) -> TransportTarget {
        TransportTarget {
            session_id: SessionId::from_string(id),
        }
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(
            session_file_name(&SessionId::from_string("alice-20240101T000000.000Z")),
            "alice-20240101T000000.000Z.json"
        );
        assert_eq!(
            session_file_name(&SessionId::from_string("../etc/passwd")),
            "_._etc_passwd.json"
        );
        assert_eq!(session_file_name(&SessionId::from_string("")), "session.json");
        assert_eq!(
            session_file_name(&SessionId::from_string("{AB-12}")),
            "{AB-12}.json"
        );
    }

    #[test]
    fn lines_sink_uses_jsonl_extension() {
        let id = SessionId::from_string("{AB-12}");
        assert_eq!(
            FileSink::lines("out").path_for(&id),
            Path::new("out").join("{AB-12}.jsonl")
        );
        assert_eq!(
            FileSink::new("out").path_for(&id),
            Path::new("out").join("{AB-12}.json")
        );
    }

    #[tokio::test]
    async fn writes_are_appended_and_synced() -> Result<()> {
        let root = unique_test_root("tcplog-file");
        let sink = FileSink::new(root.join("nested"));
        let mut transport = sink.open(&target("S1")).await?;
        assert_eq!(transport.framing(), Framing::Document);

        transport.write(b"{\"events\":[").await?;
        transport.write(b"1,2").await?;
        transport.flush().await?;
        transport.write(b"]}").await?;
        transport.close().await?;

        let contents = fs::read_to_string(sink.path_for(&SessionId::from_string("S1"))).await?;
        assert_eq!(contents, "{\"events\":[1,2]}");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn reopening_a_session_truncates() -> Result<()> {
        let root = unique_test_root("tcplog-file-truncate");
        let sink = FileSink::new(&root);

        let mut first = sink.open(&target("S1")).await?;
        first.write(b"a much longer first document").await?;
        first.close().await?;

        let mut second = sink.open(&target("S1")).await?;
        second.write(b"short").await?;
        second.close().await?;

        let contents = fs::read_to_string(root.join("S1.json")).await?;
        assert_eq!(contents, "short");

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_directory_is_open_failure() -> Result<()> {
        let root = unique_test_root("tcplog-file-blocked");
        fs::write(&root, b"not a directory").await?;

        let err = FileSink::new(root.join("inner"))
            .open(&target("S1"))
            .await
            .err()
            .expect("open should fail");
        assert!(matches!(err, TelemetryError::OpenFailed { .. }), "{err}");

        let _ = fs::remove_file(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn write_after_close_fails() -> Result<()> {
        let root = unique_test_root("tcplog-file-closed");
        let mut transport = FileSink::new(&root).open(&target("S1")).await?;
        transport.close().await?;
        assert!(matches!(
            transport.write(b"late").await,
            Err(TelemetryError::WriteFailed(_))
        ));
        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
