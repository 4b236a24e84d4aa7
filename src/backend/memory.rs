//! In-memory backend
//!
//! Holds files and directories in a map keyed by absolute backend path and
//! counts every call, which makes cache behaviour observable in tests.

use super::{Backend, NodeKind, NodeStat};
use crate::error::{GatewayError, Result};
use crate::models::{BackendPath, ByteRange, IPFS_NAMESPACE};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
enum MemoryNode {
    File {
        data: Bytes,
        modified: Option<SystemTime>,
    },
    Directory,
}

/// Backend serving nodes from memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    nodes: RwLock<HashMap<String, MemoryNode>>,
    latency: Option<Duration>,
    read_latency: Option<Duration>,
    stat_calls: AtomicU64,
    read_calls: AtomicU64,
    largest_read: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay only `read` calls by `latency`, on top of any general latency
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Absolute path for `id[/sub]`, or `path` itself when already absolute
    fn absolute(path: &str) -> String {
        if path.starts_with('/') {
            path.trim_end_matches('/').to_string()
        } else {
            format!("{}/{}", IPFS_NAMESPACE, path.trim_end_matches('/'))
        }
    }

    /// Store a file at `path` (`"<id>"`, `"<id>/<sub>"` or `"/ipfs/..."`)
    ///
    /// Missing parent nodes below the namespace are created as directories.
    pub fn insert_file(&self, path: &str, data: impl Into<Bytes>) {
        self.insert_node(
            path,
            MemoryNode::File {
                data: data.into(),
                modified: None,
            },
        );
    }

    /// Store a file with a modification time
    pub fn insert_file_with_mtime(&self, path: &str, data: impl Into<Bytes>, modified: SystemTime) {
        self.insert_node(
            path,
            MemoryNode::File {
                data: data.into(),
                modified: Some(modified),
            },
        );
    }

    pub fn insert_directory(&self, path: &str) {
        self.insert_node(path, MemoryNode::Directory);
    }

    fn insert_node(&self, path: &str, node: MemoryNode) {
        let path = Self::absolute(path);
        let mut nodes = match self.nodes.write() {
            Ok(nodes) => nodes,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut parent = path.as_str();
        while let Some((dir, _)) = parent.rsplit_once('/') {
            if dir.len() <= IPFS_NAMESPACE.len() {
                break;
            }
            nodes
                .entry(dir.to_string())
                .or_insert(MemoryNode::Directory);
            parent = dir;
        }

        nodes.insert(path, node);
    }

    fn node(&self, path: &BackendPath) -> Option<MemoryNode> {
        let nodes = match self.nodes.read() {
            Ok(nodes) => nodes,
            Err(poisoned) => poisoned.into_inner(),
        };
        nodes.get(path.as_str()).cloned()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn stat_calls(&self) -> u64 {
        self.stat_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    /// Size in bytes of the largest range requested by a single `read`
    pub fn largest_read(&self) -> u64 {
        self.largest_read.load(Ordering::SeqCst)
    }

    /// Total number of backend calls of any kind
    pub fn total_calls(&self) -> u64 {
        self.stat_calls() + self.read_calls()
    }

    pub fn reset_counters(&self) {
        self.stat_calls.store(0, Ordering::SeqCst);
        self.read_calls.store(0, Ordering::SeqCst);
        self.largest_read.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn stat(&self, path: &BackendPath) -> Result<NodeStat> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        match self.node(path) {
            Some(MemoryNode::File { data, modified }) => Ok(NodeStat {
                kind: NodeKind::File,
                size: data.len() as u64,
                modified,
            }),
            Some(MemoryNode::Directory) => Ok(NodeStat {
                kind: NodeKind::Directory,
                size: 0,
                modified: None,
            }),
            None => Err(GatewayError::NotFound(path.to_string())),
        }
    }

    async fn read(&self, path: &BackendPath, range: ByteRange) -> Result<Bytes> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.largest_read.fetch_max(range.size(), Ordering::SeqCst);
        self.delay().await;
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }

        match self.node(path) {
            Some(MemoryNode::File { data, .. }) => {
                let len = data.len() as u64;
                if range.start >= len {
                    return Ok(Bytes::new());
                }
                let end = range.end.min(len - 1);
                Ok(data.slice(range.start as usize..=end as usize))
            }
            Some(MemoryNode::Directory) => Err(GatewayError::InvalidTarget(path.to_string())),
            None => Err(GatewayError::NotFound(path.to_string())),
        }
    }
}
