//! Response bodies
//!
//! Small bodies (errors, metadata, metrics) are sent from memory. File bodies
//! are streamed: the selected range is split into chunks of at most
//! `chunk_size` bytes and each chunk is read from the backend only when the
//! connection asks for the next frame, under the backend call deadline.

use crate::backend::BackendFile;
use crate::error::{GatewayError, Result};
use crate::models::ByteRange;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, SizeHint};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

/// Largest single backend read issued while streaming a file
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Body type of every gateway response
pub type GatewayBody = UnsyncBoxBody<Bytes, GatewayError>;

/// Body holding `data` in memory
pub fn full(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

pub fn empty() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

type ReadFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Streams a byte range of a backend file chunk by chunk
pub struct FileBody {
    file: BackendFile,
    /// Next offset to read
    next: u64,
    /// One past the last offset to send
    end: u64,
    chunk_size: u64,
    pending: Option<ReadFuture>,
}

impl FileBody {
    /// Stream `range` of `file` (`None` for an empty body)
    pub fn new(file: BackendFile, range: Option<ByteRange>, chunk_size: u64) -> Self {
        let (next, end) = match range {
            Some(range) => (range.start, range.end + 1),
            None => (0, 0),
        };

        FileBody {
            file,
            next,
            end,
            chunk_size: chunk_size.max(1),
            pending: None,
        }
    }

    /// Bytes not yet sent
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    /// Range of the next chunk to read, if any
    fn next_chunk(&self) -> Option<ByteRange> {
        if self.next >= self.end {
            return None;
        }
        let last = (self.next + self.chunk_size).min(self.end) - 1;
        Some(ByteRange {
            start: self.next,
            end: last,
        })
    }

    pub fn boxed(self) -> GatewayBody {
        BodyExt::boxed_unsync(self)
    }
}

impl Body for FileBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, GatewayError>>> {
        let this = self.get_mut();

        if this.pending.is_none() {
            let chunk = match this.next_chunk() {
                Some(chunk) => chunk,
                None => return Poll::Ready(None),
            };
            let file = this.file.clone();
            this.pending = Some(Box::pin(async move { file.read_range(chunk).await }));
        }

        let result = match this.pending.as_mut() {
            Some(read) => match read.as_mut().poll(cx) {
                Poll::Ready(result) => result,
                Poll::Pending => return Poll::Pending,
            },
            None => return Poll::Ready(None),
        };
        this.pending = None;

        match result {
            Ok(data) => {
                this.next += data.len() as u64;
                Poll::Ready(Some(Ok(Frame::data(data))))
            }
            Err(e) => {
                warn!(
                    "Aborting body of {} at offset {}: {}",
                    this.file.path(),
                    this.next,
                    e
                );
                this.next = this.end;
                Poll::Ready(Some(Err(e)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.next >= self.end
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining())
    }
}
