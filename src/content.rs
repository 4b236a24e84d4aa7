//! Content serving
//!
//! Resolves an identifier, opens the resolved backend file and builds the
//! HTTP response for it: range requests, conditional requests and the
//! validators (`ETag`, `Last-Modified`) they are evaluated against.
//!
//! The request deadline covers resolution, the open and the content type
//! probe. The body itself is streamed afterwards in bounded chunks, each
//! under the backend call deadline.

use crate::body::{self, FileBody, GatewayBody, DEFAULT_CHUNK_SIZE};
use crate::error::{GatewayError, Result};
use crate::mime;
use crate::models::{ByteRange, RangeRequest};
use crate::resolver::DescriptorResolver;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, LAST_MODIFIED, RANGE,
};
use http::{Response, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default deadline for a whole content or metadata request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Characters escaped when a backend path is used as an entity tag
const ETAG_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'\\');

/// Validators of one backend file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Strong entity tag, quoted
    pub etag: String,
    /// Modification time truncated to whole seconds
    pub last_modified: Option<DateTime<Utc>>,
}

impl Validators {
    pub fn new(path: &str, modified: Option<SystemTime>) -> Self {
        Validators {
            etag: format!("\"{}\"", utf8_percent_encode(path, ETAG_ESCAPE)),
            last_modified: modified.and_then(truncate_to_seconds),
        }
    }
}

fn truncate_to_seconds(time: SystemTime) -> Option<DateTime<Utc>> {
    let time: DateTime<Utc> = time.into();
    DateTime::from_timestamp(time.timestamp(), 0)
}

/// Format a timestamp as an IMF-fixdate
pub fn format_http_date(time: &DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date header value
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Outcome of evaluating the request preconditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Serve the representation
    Proceed,
    /// Answer 304
    NotModified,
    /// Answer 412
    Failed,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &http::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Whether any tag of an `If-Match`/`If-None-Match` list matches `etag`
fn etag_list_matches(list: &str, etag: &str, weak: bool) -> bool {
    list.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        match candidate.strip_prefix("W/") {
            Some(opaque) => weak && opaque == etag,
            None => candidate == etag,
        }
    })
}

/// Evaluate `If-Match`, `If-Unmodified-Since`, `If-None-Match` and
/// `If-Modified-Since`, in that order
///
/// A date condition is only consulted when the matching tag condition is
/// absent, and is ignored when the file has no modification time.
pub fn evaluate_preconditions(headers: &HeaderMap, validators: &Validators) -> Precondition {
    if let Some(list) = header_str(headers, &IF_MATCH) {
        if !etag_list_matches(list, &validators.etag, false) {
            return Precondition::Failed;
        }
    } else if let (Some(since), Some(modified)) = (
        header_str(headers, &IF_UNMODIFIED_SINCE).and_then(parse_http_date),
        validators.last_modified,
    ) {
        if modified > since {
            return Precondition::Failed;
        }
    }

    if let Some(list) = header_str(headers, &IF_NONE_MATCH) {
        if etag_list_matches(list, &validators.etag, true) {
            return Precondition::NotModified;
        }
    } else if let (Some(since), Some(modified)) = (
        header_str(headers, &IF_MODIFIED_SINCE).and_then(parse_http_date),
        validators.last_modified,
    ) {
        if modified <= since {
            return Precondition::NotModified;
        }
    }

    Precondition::Proceed
}

/// The `Range` header to honour, after checking `If-Range`
pub fn effective_range<'a>(headers: &'a HeaderMap, validators: &Validators) -> Option<&'a str> {
    let range = header_str(headers, &RANGE)?;

    let if_range = match header_str(headers, &IF_RANGE) {
        Some(value) => value.trim(),
        None => return Some(range),
    };

    let fresh = if if_range.starts_with('"') {
        if_range == validators.etag
    } else if if_range.starts_with("W/") {
        false
    } else {
        match (parse_http_date(if_range), validators.last_modified) {
            (Some(date), Some(modified)) => date == modified,
            _ => false,
        }
    };

    if fresh {
        Some(range)
    } else {
        debug!("If-Range {:?} is stale, serving full body", if_range);
        None
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::InternalError(format!("Invalid header value: {}", e)))
}

/// Serves resolved backend files over HTTP
pub struct ContentServer {
    resolver: Arc<DescriptorResolver>,
    request_timeout: Duration,
    chunk_size: u64,
}

impl ContentServer {
    pub fn new(resolver: Arc<DescriptorResolver>) -> Self {
        ContentServer {
            resolver,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Deadline covering everything up to the first body byte
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Largest backend read issued while streaming a body
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    /// Serve `raw_id` and an optional `sub_path` (empty for none)
    ///
    /// # Returns
    /// * `Ok(Response)` with status 200, 206, 304, 412 or 416
    /// * `Err(GatewayError::Timeout)` if the request deadline expires
    /// * `Err(GatewayError)` for any resolution or read failure
    pub async fn serve(
        &self,
        raw_id: &str,
        sub_path: &str,
        headers: &HeaderMap,
    ) -> Result<Response<GatewayBody>> {
        match tokio::time::timeout(self.request_timeout, self.serve_file(raw_id, sub_path, headers))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Content request for {}/{} exceeded {:?}",
                    raw_id, sub_path, self.request_timeout
                );
                Err(GatewayError::Timeout(format!(
                    "content request exceeded {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn serve_file(
        &self,
        raw_id: &str,
        sub_path: &str,
        headers: &HeaderMap,
    ) -> Result<Response<GatewayBody>> {
        let target = self.resolver.resolve(raw_id, sub_path).await?;
        let file = self.resolver.reader().open(&target.path).await?;
        let size = file.size();
        let validators = Validators::new(target.path.as_str(), file.modified());

        let mut response_headers = HeaderMap::new();
        response_headers.insert(ETAG, header_value(&validators.etag)?);
        if let Some(modified) = &validators.last_modified {
            response_headers.insert(LAST_MODIFIED, header_value(&format_http_date(modified))?);
        }

        match evaluate_preconditions(headers, &validators) {
            Precondition::Proceed => {}
            Precondition::NotModified => {
                debug!("Not modified: {}", target.path);
                return build_response(
                    StatusCode::NOT_MODIFIED,
                    response_headers,
                    body::empty(),
                    None,
                );
            }
            Precondition::Failed => {
                debug!("Precondition failed: {}", target.path);
                return build_response(
                    StatusCode::PRECONDITION_FAILED,
                    response_headers,
                    body::empty(),
                    Some(0),
                );
            }
        }

        response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let (status, range) = match RangeRequest::parse(effective_range(headers, &validators), size)
        {
            RangeRequest::Full => (StatusCode::OK, ByteRange::full(size)),
            RangeRequest::Partial(range) => {
                response_headers.insert(CONTENT_RANGE, header_value(&range.to_content_range(size))?);
                (StatusCode::PARTIAL_CONTENT, Some(range))
            }
            RangeRequest::Unsatisfiable => {
                debug!("Unsatisfiable range for {} (size {})", target.path, size);
                response_headers.insert(CONTENT_RANGE, header_value(&format!("bytes */{}", size))?);
                response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(mime::types::PLAIN));
                let message = Bytes::from_static(b"invalid range: failed to overlap\n");
                let length = message.len() as u64;
                return build_response(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    response_headers,
                    body::full(message),
                    Some(length),
                );
            }
        };

        let content_type = match mime::from_name(&target.display_name) {
            Some(known) => known,
            // sniff the head of the file, whatever slice is served
            None => match ByteRange::full(size.min(mime::SNIFF_LEN)) {
                Some(head) => mime::sniff(&file.read_range(head).await?),
                None => mime::sniff(&[]),
            },
        };
        response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));

        let length = range.map(|r| r.size()).unwrap_or(0);
        debug!(
            "Serving {} status={} bytes={} content_type={}",
            target.path,
            status.as_u16(),
            length,
            content_type
        );

        let body = FileBody::new(file, range, self.chunk_size).boxed();
        build_response(status, response_headers, body, Some(length))
    }
}

fn build_response(
    status: StatusCode,
    headers: HeaderMap,
    body: GatewayBody,
    content_length: Option<u64>,
) -> Result<Response<GatewayBody>> {
    let mut builder = Response::builder().status(status);
    if let Some(length) = content_length {
        builder = builder.header(CONTENT_LENGTH, length);
    }
    let mut response = builder
        .body(body)
        .map_err(|e| GatewayError::InternalError(format!("Failed to build response: {}", e)))?;
    response.headers_mut().extend(headers);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendReader, MemoryBackend};
    use crate::cache::DescriptorCache;
    use http_body_util::BodyExt;
    use std::time::UNIX_EPOCH;

    fn server(backend: Arc<MemoryBackend>) -> ContentServer {
        let reader = BackendReader::new(backend, Duration::from_secs(1));
        let cache = Arc::new(DescriptorCache::new(8).unwrap());
        ContentServer::new(Arc::new(DescriptorResolver::new(reader, cache)))
    }

    async fn body_of(response: Response<GatewayBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    fn headers(pairs: &[(http::header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_http_date_round_trip() {
        let date = DateTime::from_timestamp(784_111_777, 0).unwrap();
        assert_eq!(format_http_date(&date), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(date));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_etag_escapes_path() {
        let validators = Validators::new("/ipfs/abc123/my file.png", None);
        assert_eq!(validators.etag, "\"/ipfs/abc123/my%20file.png\"");
    }

    #[test]
    fn test_precondition_order() {
        let modified = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let validators = Validators::new("/ipfs/abc123", Some(modified));

        let h = headers(&[(IF_MATCH, "\"other\"")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::Failed);

        let h = headers(&[(IF_MATCH, "*"), (IF_NONE_MATCH, "\"/ipfs/abc123\"")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::NotModified);

        let h = headers(&[(IF_NONE_MATCH, "W/\"/ipfs/abc123\"")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::NotModified);

        let h = headers(&[(IF_MODIFIED_SINCE, "Mon, 01 Jan 2024 00:00:00 GMT")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::NotModified);

        let h = headers(&[(IF_UNMODIFIED_SINCE, "Thu, 01 Jan 1970 00:00:00 GMT")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::Failed);

        // tag condition present, date condition ignored
        let h = headers(&[
            (IF_NONE_MATCH, "\"other\""),
            (IF_MODIFIED_SINCE, "Mon, 01 Jan 2024 00:00:00 GMT"),
        ]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::Proceed);
    }

    #[test]
    fn test_date_conditions_ignored_without_mtime() {
        let validators = Validators::new("/ipfs/abc123", None);
        let h = headers(&[(IF_MODIFIED_SINCE, "Mon, 01 Jan 2024 00:00:00 GMT")]);
        assert_eq!(evaluate_preconditions(&h, &validators), Precondition::Proceed);
    }

    #[test]
    fn test_if_range() {
        let validators = Validators::new("/ipfs/abc123", None);
        let h = headers(&[(RANGE, "bytes=0-1"), (IF_RANGE, "\"/ipfs/abc123\"")]);
        assert_eq!(effective_range(&h, &validators), Some("bytes=0-1"));

        let h = headers(&[(RANGE, "bytes=0-1"), (IF_RANGE, "\"stale\"")]);
        assert_eq!(effective_range(&h, &validators), None);

        let h = headers(&[(IF_RANGE, "\"/ipfs/abc123\"")]);
        assert_eq!(effective_range(&h, &validators), None);
    }

    #[tokio::test]
    async fn test_serve_full_and_partial() {
        let backend = Arc::new(MemoryBackend::new());
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        backend.insert_file("abc123", data.clone());
        let server = server(backend);

        let response = server.serve("abc123", "", &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], "\"/ipfs/abc123\"");
        assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[CONTENT_LENGTH], "1000");
        assert_eq!(body_of(response).await, Bytes::from(data.clone()));

        let h = headers(&[(RANGE, "bytes=100-199")]);
        let response = server.serve("abc123", "", &h).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(body_of(response).await, Bytes::from(data[100..200].to_vec()));
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("abc123", Bytes::from_static(b"short"));
        let server = server(backend);

        let h = headers(&[(RANGE, "bytes=10-20")]);
        let response = server.serve("abc123", "", &h).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */5");
    }

    #[tokio::test]
    async fn test_content_type_from_name_then_sniff() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("site1/style.css", Bytes::from_static(b"body {}"));
        backend.insert_file("img1", Bytes::from_static(b"\x89PNG\r\n\x1A\n\x00\x00\x00\x0DIHDR"));
        let server = server(backend);

        let response = server.serve("site1", "style.css", &HeaderMap::new()).await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], mime::types::CSS);

        let h = headers(&[(RANGE, "bytes=4-7")]);
        let response = server.serve("img1", "", &h).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_TYPE], mime::types::PNG);
    }

    #[tokio::test]
    async fn test_last_modified_and_not_modified() {
        let backend = Arc::new(MemoryBackend::new());
        let modified = UNIX_EPOCH + Duration::from_secs(784_111_777);
        backend.insert_file_with_mtime("abc123", Bytes::from_static(b"data"), modified);
        let server = server(backend);

        let response = server.serve("abc123", "", &HeaderMap::new()).await.unwrap();
        assert_eq!(response.headers()[LAST_MODIFIED], "Sun, 06 Nov 1994 08:49:37 GMT");

        let h = headers(&[(IF_MODIFIED_SINCE, "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let response = server.serve("abc123", "", &h).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_request_deadline() {
        let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(100)));
        backend.insert_file("abc123", Bytes::from_static(b"data"));
        let server = server(backend).with_request_timeout(Duration::from_millis(30));

        let result = server.serve("abc123", "", &HeaderMap::new()).await;
        assert!(matches!(result, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_body_streams_in_bounded_reads() {
        let backend = Arc::new(MemoryBackend::new());
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 241) as u8).collect();
        backend.insert_file("site1/clip.mp4", data.clone());
        let server = server(backend.clone()).with_chunk_size(1024);

        let response = server.serve("site1", "clip.mp4", &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "10000");
        // nothing has been read before the body is polled
        assert_eq!(backend.read_calls(), 0);

        assert_eq!(body_of(response).await, Bytes::from(data.clone()));
        assert_eq!(backend.read_calls(), 10);
        assert_eq!(backend.largest_read(), 1024);

        backend.reset_counters();
        let h = headers(&[(RANGE, "bytes=1000-3999")]);
        let response = server.serve("site1", "clip.mp4", &h).await.unwrap();
        assert_eq!(body_of(response).await, Bytes::from(data[1000..4000].to_vec()));
        assert!(backend.largest_read() <= 1024);
    }

    #[tokio::test]
    async fn test_streaming_outlives_request_deadline() {
        let backend = Arc::new(MemoryBackend::new().with_read_latency(Duration::from_millis(40)));
        let data = vec![b'x'; 640];
        backend.insert_file("site1/long.txt", data.clone());
        let server = server(backend)
            .with_request_timeout(Duration::from_millis(100))
            .with_chunk_size(64);

        // ten reads of 40ms each, far past the request deadline
        let response = server.serve("site1", "long.txt", &HeaderMap::new()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, Bytes::from(data));
    }
}
