//! Backend reader
//!
//! The content-addressed store is reached through the [`Backend`] trait,
//! which only needs two capabilities: describing a node and reading a byte
//! range of a file node. [`BackendReader`] layers the gateway's rules on top:
//! only regular files can be opened, and every call runs under a deadline.

mod kubo;
mod memory;

pub use kubo::KuboBackend;
pub use memory::MemoryBackend;

use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::models::{BackendPath, ByteRange};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Kind of node found at a backend path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Other,
}

/// Description of a backend node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    pub kind: NodeKind,
    pub size: u64,
    /// Modification time, when the node records one
    pub modified: Option<SystemTime>,
}

/// Storage capability the gateway depends on
#[async_trait]
pub trait Backend: Send + Sync {
    /// Describe the node at `path`
    ///
    /// Fails with `NotFound` when nothing lives at the path.
    async fn stat(&self, path: &BackendPath) -> Result<NodeStat>;

    /// Read `range` (inclusive) of the file at `path`
    async fn read(&self, path: &BackendPath, range: ByteRange) -> Result<Bytes>;
}

/// Deadline-bounded access to regular files in a backend
#[derive(Clone)]
pub struct BackendReader {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl BackendReader {
    /// Create a reader applying `timeout` to every backend call
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        BackendReader {
            backend,
            timeout,
            metrics: None,
        }
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the regular file at `path`
    ///
    /// # Returns
    /// * `Ok(BackendFile)` handle supporting ranged reads
    /// * `Err(GatewayError::NotFound)` if no node exists at `path`
    /// * `Err(GatewayError::InvalidTarget)` if the node is not a regular file
    /// * `Err(GatewayError::Timeout)` if the backend misses the deadline
    pub async fn open(&self, path: &BackendPath) -> Result<BackendFile> {
        debug!("Opening backend path={}", path);

        let stat = call_with_deadline(
            self.timeout,
            "stat",
            path,
            self.metrics.as_deref(),
            self.backend.stat(path),
        )
        .await?;

        if stat.kind != NodeKind::File {
            debug!("Backend node is not a regular file: path={}, kind={:?}", path, stat.kind);
            return Err(GatewayError::InvalidTarget(path.to_string()));
        }

        Ok(BackendFile {
            path: path.clone(),
            size: stat.size,
            modified: stat.modified,
            reader: self.clone(),
        })
    }
}

/// Random-access handle on a regular backend file
#[derive(Clone)]
pub struct BackendFile {
    path: BackendPath,
    size: u64,
    modified: Option<SystemTime>,
    reader: BackendReader,
}

impl BackendFile {
    pub fn path(&self) -> &BackendPath {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Read an inclusive byte range of the file
    pub async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        if range.end >= self.size {
            return Err(GatewayError::InternalError(format!(
                "range {}-{} exceeds size {} of {}",
                range.start, range.end, self.size, self.path
            )));
        }

        let data = call_with_deadline(
            self.reader.timeout,
            "read",
            &self.path,
            self.reader.metrics.as_deref(),
            self.reader.backend.read(&self.path, range),
        )
        .await?;

        if data.len() as u64 != range.size() {
            warn!(
                "Short read from backend: path={}, expected={}, got={}",
                self.path,
                range.size(),
                data.len()
            );
            return Err(GatewayError::Backend(format!(
                "short read of {}: expected {} bytes, got {}",
                self.path,
                range.size(),
                data.len()
            )));
        }

        Ok(data)
    }

    /// Read the whole file in one call; meant for small files such as
    /// descriptor candidates, content bodies go through `FileBody`
    pub async fn read_all(&self) -> Result<Bytes> {
        match ByteRange::full(self.size) {
            Some(range) => self.read_range(range).await,
            None => Ok(Bytes::new()),
        }
    }
}

async fn call_with_deadline<T>(
    timeout: Duration,
    operation: &str,
    path: &BackendPath,
    metrics: Option<&GatewayMetrics>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "Backend {} timed out after {:?}: path={}",
                operation, timeout, path
            );
            Err(GatewayError::Timeout(format!(
                "backend {} of {} exceeded {:?}",
                operation, path, timeout
            )))
        }
    };

    if let Some(metrics) = metrics {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics.record_backend_call(operation, outcome);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identifier;

    fn path(raw: &str) -> BackendPath {
        BackendPath::root(&Identifier::parse(raw).unwrap())
    }

    #[tokio::test]
    async fn test_open_and_read_file() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("abc123", Bytes::from_static(b"hello world"));
        let reader = BackendReader::new(backend.clone(), Duration::from_secs(1));

        let file = reader.open(&path("abc123")).await.unwrap();
        assert_eq!(file.size(), 11);
        assert_eq!(file.read_all().await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(
            file.read_range(ByteRange::new(6, 10).unwrap()).await.unwrap(),
            Bytes::from_static(b"world")
        );
    }

    #[tokio::test]
    async fn test_open_directory_is_invalid_target() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("dir1/a.txt", Bytes::from_static(b"a"));
        let reader = BackendReader::new(backend, Duration::from_secs(1));

        let result = reader.open(&path("dir1")).await;
        assert!(matches!(result, Err(GatewayError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let reader = BackendReader::new(Arc::new(MemoryBackend::new()), Duration::from_secs(1));
        let result = reader.open(&path("missing")).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout() {
        let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(200)));
        backend.insert_file("slow", Bytes::from_static(b"data"));
        let reader = BackendReader::new(backend, Duration::from_millis(20));

        let result = reader.open(&path("slow")).await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_empty_file_reads_without_backend_call() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("empty", Bytes::new());
        let reader = BackendReader::new(backend.clone(), Duration::from_secs(1));

        let file = reader.open(&path("empty")).await.unwrap();
        assert!(file.read_all().await.unwrap().is_empty());
        assert_eq!(backend.read_calls(), 0);
    }

    #[tokio::test]
    async fn test_range_past_end_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("abc123", Bytes::from_static(b"0123"));
        let reader = BackendReader::new(backend, Duration::from_secs(1));

        let file = reader.open(&path("abc123")).await.unwrap();
        assert!(file.read_range(ByteRange::new(2, 4).unwrap()).await.is_err());
    }
}
