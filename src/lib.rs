//! SEP Gateway
//!
//! An HTTP gateway in front of a content-addressed store (a Kubo node) that
//! understands standard records: small JSON descriptors that redirect an
//! identifier to other content and carry metadata about it.
//!
//! # Overview
//!
//! A request names an identifier and, optionally, a sub-path. The identifier
//! either names the content to serve directly, or names a standard record
//! whose structural section points at the real content and its default entry
//! point. Parsed records are kept in a bounded LRU cache, so repeated requests
//! for the same record never touch the store again.
//!
//! # Features
//!
//! - **Descriptor Resolution**: Transparent redirection through standard records
//! - **Descriptor Caching**: Bounded LRU cache of parsed records
//! - **Range Requests**: Single byte ranges answered with 206
//! - **Streaming**: File bodies are read from the backend in bounded chunks
//! - **Conditional Requests**: `If-Match`, `If-None-Match`, `If-Modified-Since`,
//!   `If-Unmodified-Since` and `If-Range`
//! - **Deadlines**: Every backend call and every request is time-bounded
//! - **Metrics Collection**: Prometheus metrics on `/metrics`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sep_gateway::{Gateway, GatewayConfig, KuboBackend};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::new("/ip4/127.0.0.1/tcp/5001", 1000)?;
//! let backend = Arc::new(KuboBackend::new(config.backend_url()?)?);
//! let gateway = Arc::new(Gateway::new(&config, backend)?);
//!
//! let listener = TcpListener::bind(config.listen_addr()?).await?;
//! gateway.serve(listener).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`DescriptorCache`]: LRU cache of parsed standard records
//! - [`BackendReader`]: Deadline-bounded access to regular files in a [`Backend`]
//! - [`DescriptorResolver`]: Identifier and sub-path to backend path
//! - [`ContentServer`]: File bytes with range and conditional handling
//! - [`FileBody`]: Chunked response body over a backend file
//! - [`MetadataServer`]: Descriptive sections of a standard record
//! - [`Gateway`]: Routing, CORS and error mapping over HTTP
//! - [`GatewayMetrics`]: Prometheus metrics
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file or from the environment:
//!
//! ```yaml
//! backend_address: "/ip4/127.0.0.1/tcp/5001"
//! cache_capacity: 1000
//! port: 8080
//! request_timeout_secs: 10
//! ```
//!
//! See [`GatewayConfig`] for every option.

pub mod backend;
pub mod body;
pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod mime;
pub mod models;
pub mod record;
pub mod resolver;
pub mod server;

// Re-export commonly used types
pub use backend::{Backend, BackendFile, BackendReader, KuboBackend, MemoryBackend, NodeKind, NodeStat};
pub use body::{FileBody, GatewayBody};
pub use cache::{CacheStats, DescriptorCache};
pub use config::GatewayConfig;
pub use content::ContentServer;
pub use error::{GatewayError, Result};
pub use metadata::MetadataServer;
pub use metrics::GatewayMetrics;
pub use models::{BackendPath, ByteRange, Identifier, RangeRequest, ResolvedTarget};
pub use record::{DescriptorLookup, MetadataDocument, StandardRecord};
pub use resolver::DescriptorResolver;
pub use server::{Gateway, Route};
