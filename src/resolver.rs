//! Descriptor resolution
//!
//! Turns a raw identifier and an optional sub-path into the backend path that
//! should actually be served. An identifier either names content directly or
//! names a standard record whose structural section redirects to the real
//! content and supplies a default entry point.

use crate::backend::BackendReader;
use crate::cache::DescriptorCache;
use crate::error::Result;
use crate::metrics::GatewayMetrics;
use crate::models::{BackendPath, Identifier, ResolvedTarget};
use crate::record::{last_segment, DescriptorLookup};
use std::sync::Arc;
use tracing::{debug, info};

/// Default upper bound on the size of a file read as a descriptor candidate
pub const DEFAULT_MAX_DESCRIPTOR_BYTES: u64 = 1024 * 1024;

/// Resolves identifiers, consulting and populating the descriptor cache
pub struct DescriptorResolver {
    reader: BackendReader,
    cache: Arc<DescriptorCache>,
    max_descriptor_bytes: u64,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl DescriptorResolver {
    pub fn new(reader: BackendReader, cache: Arc<DescriptorCache>) -> Self {
        DescriptorResolver {
            reader,
            cache,
            max_descriptor_bytes: DEFAULT_MAX_DESCRIPTOR_BYTES,
            metrics: None,
        }
    }

    /// Files larger than `limit` are never read as descriptor candidates
    pub fn with_max_descriptor_bytes(mut self, limit: u64) -> Self {
        self.max_descriptor_bytes = limit;
        self
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn reader(&self) -> &BackendReader {
        &self.reader
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    fn record_lookup(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_descriptor_lookup(result);
        }
    }

    /// Decide whether `id` names a standard record
    ///
    /// Cached records are returned without touching the backend. On a miss
    /// the node is read and parsed; only a successful parse is cached. A
    /// node that is missing, is not a regular file, is larger than the
    /// descriptor limit or does not parse is reported as `DirectFile`.
    ///
    /// # Errors
    /// Deadline expiry and backend transport failures are returned as-is.
    pub async fn lookup(&self, id: &Identifier) -> Result<DescriptorLookup> {
        if let Some(record) = self.cache.get(id.as_str()) {
            self.record_lookup("hit");
            return Ok(DescriptorLookup::Descriptor(record));
        }
        self.record_lookup("miss");

        let lookup = match self.fetch_candidate(id).await {
            Ok(lookup) => lookup,
            Err(e) if e.allows_direct_fallback() => {
                debug!("Identifier {} is not a readable descriptor: {}", id, e);
                DescriptorLookup::DirectFile
            }
            Err(e) => return Err(e),
        };

        match &lookup {
            DescriptorLookup::Descriptor(record) => {
                self.cache.put(id.as_str(), Arc::clone(record));
                self.record_lookup("descriptor");
            }
            DescriptorLookup::DirectFile => self.record_lookup("direct_file"),
        }

        Ok(lookup)
    }

    async fn fetch_candidate(&self, id: &Identifier) -> Result<DescriptorLookup> {
        let file = self.reader.open(&BackendPath::root(id)).await?;

        if file.size() > self.max_descriptor_bytes {
            debug!(
                "Identifier {} too large for a descriptor ({} > {} bytes)",
                id,
                file.size(),
                self.max_descriptor_bytes
            );
            return Ok(DescriptorLookup::DirectFile);
        }

        let bytes = file.read_all().await?;
        Ok(DescriptorLookup::interpret(&bytes))
    }

    /// Resolve `raw_id` and an optional `sub_path` (empty for none)
    ///
    /// An explicit sub-path always wins over a descriptor's default path; the
    /// descriptor then only redirects the address.
    ///
    /// # Errors
    /// * `BadIdentifier` if `raw_id` is malformed
    /// * `InvalidSubPath` if the sub-path tries to leave its root
    /// * `Timeout` if the backend misses its deadline
    pub async fn resolve(&self, raw_id: &str, sub_path: &str) -> Result<ResolvedTarget> {
        let id = Identifier::parse(raw_id)?;
        debug!("Attempt to find id {}", id);

        let (effective_address, sub_path, display_name) = match self.lookup(&id).await? {
            DescriptorLookup::Descriptor(record) => {
                info!("Matched standard record with id {}", id);
                let address = record.structural.address.clone();

                if sub_path.is_empty() {
                    let default_path = record.structural.relative_path.clone();
                    let name = last_segment(&default_path).to_string();
                    debug!("Using default record path {:?}", default_path);
                    (address, default_path, name)
                } else {
                    (address, sub_path.to_string(), sub_path.to_string())
                }
            }
            DescriptorLookup::DirectFile => (id, sub_path.to_string(), sub_path.to_string()),
        };

        let path = BackendPath::join(&effective_address, &sub_path)?;
        debug!("Resolved {} to {}", raw_id, path);

        Ok(ResolvedTarget {
            effective_address,
            sub_path,
            display_name,
            path,
        })
    }
}
