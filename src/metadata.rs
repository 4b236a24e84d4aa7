//! Metadata serving
//!
//! Returns the descriptive sections of a standard record. Only identifiers
//! that name a record have metadata; the target file is never read.

use crate::content::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{GatewayError, Result};
use crate::models::Identifier;
use crate::record::{DescriptorLookup, MetadataDocument};
use crate::resolver::DescriptorResolver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Serves the metadata of standard records
pub struct MetadataServer {
    resolver: Arc<DescriptorResolver>,
    request_timeout: Duration,
}

impl MetadataServer {
    pub fn new(resolver: Arc<DescriptorResolver>) -> Self {
        MetadataServer {
            resolver,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Look up the metadata of `raw_id`
    ///
    /// # Returns
    /// * `Ok(MetadataDocument)` if `raw_id` names a standard record
    /// * `Err(GatewayError::NotFound)` if it names a plain file or nothing
    /// * `Err(GatewayError::Timeout)` if the request deadline expires
    pub async fn serve_meta(&self, raw_id: &str) -> Result<MetadataDocument> {
        let id = Identifier::parse(raw_id)?;

        let lookup = match tokio::time::timeout(self.request_timeout, self.resolver.lookup(&id)).await
        {
            Ok(lookup) => lookup?,
            Err(_) => {
                warn!("Metadata request for {} exceeded {:?}", id, self.request_timeout);
                return Err(GatewayError::Timeout(format!(
                    "metadata request exceeded {:?}",
                    self.request_timeout
                )));
            }
        };

        match lookup {
            DescriptorLookup::Descriptor(record) => Ok(MetadataDocument::from(record.as_ref())),
            DescriptorLookup::DirectFile => {
                debug!("No standard record behind {}", id);
                Err(GatewayError::NotFound(format!("no metadata for {}", id)))
            }
        }
    }
}
