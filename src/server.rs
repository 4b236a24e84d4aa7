//! HTTP front end
//!
//! Routes requests to the content and metadata servers, applies CORS and
//! maps every failure to its status code. One tokio task serves each
//! connection.
//!
//! # Endpoints
//! - `GET /content/{id}/` and `GET /content/{id}/{sub...}` - file bytes
//! - `GET /metadata/{id}/` - standard record metadata as JSON
//! - `GET /healthcheck/` - liveness probe
//! - `GET /metrics` - Prometheus metrics

use crate::backend::{Backend, BackendReader};
use crate::body::{self, GatewayBody};
use crate::cache::DescriptorCache;
use crate::config::GatewayConfig;
use crate::content::ContentServer;
use crate::error::{GatewayError, Result};
use crate::metadata::MetadataServer;
use crate::metrics::GatewayMetrics;
use crate::resolver::DescriptorResolver;
use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ALLOW, CONTENT_TYPE, ORIGIN, VARY,
};
use http::{Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

const NOT_FOUND_BODY: &str = "404 page not found\n";
const PREFLIGHT_ALLOWED_HEADERS: &str = "Accept, Authorization, Content-Type, X-CSRF-Token";
const PREFLIGHT_MAX_AGE_SECS: &str = "300";

/// Request routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Content { id: String, sub_path: String },
    Metadata { id: String },
    HealthCheck,
    Metrics,
    NotFound,
}

impl Route {
    /// Match a request path
    ///
    /// Identifier and sub-path are percent-decoded; a path that does not
    /// decode to UTF-8 matches nothing.
    pub fn parse(path: &str) -> Self {
        if path == "/healthcheck/" || path == "/healthcheck" {
            return Route::HealthCheck;
        }
        if path == "/metrics" {
            return Route::Metrics;
        }

        if let Some(rest) = path.strip_prefix("/content/") {
            let (id, sub_path) = rest.split_once('/').unwrap_or((rest, ""));
            return match (decode(id), decode(sub_path)) {
                (Some(id), Some(sub_path)) if !id.is_empty() => Route::Content { id, sub_path },
                _ => Route::NotFound,
            };
        }

        if let Some(rest) = path.strip_prefix("/metadata/") {
            let id = rest.strip_suffix('/').unwrap_or(rest);
            return match decode(id) {
                Some(id) if !id.is_empty() && !id.contains('/') => Route::Metadata { id },
                _ => Route::NotFound,
            };
        }

        Route::NotFound
    }

    /// Label used for request metrics
    pub fn endpoint(&self) -> &'static str {
        match self {
            Route::Content { .. } => "content",
            Route::Metadata { .. } => "metadata",
            Route::HealthCheck => "healthcheck",
            Route::Metrics => "metrics",
            Route::NotFound => "unknown",
        }
    }
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn text_response(status: StatusCode, text: impl Into<Bytes>) -> Response<GatewayBody> {
    let mut response = Response::new(body::full(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Response for a failed content or metadata request
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    let status = StatusCode::from_u16(err.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status == StatusCode::NOT_FOUND {
        text_response(status, NOT_FOUND_BODY)
    } else {
        text_response(status, format!("{}\n", status))
    }
}

/// The assembled gateway
pub struct Gateway {
    content: ContentServer,
    metadata: MetadataServer,
    metrics: Arc<GatewayMetrics>,
    cache: Arc<DescriptorCache>,
}

impl Gateway {
    /// Wire up cache, resolver, servers and metrics over `backend`
    pub fn new(config: &GatewayConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new().map_err(|e| {
            GatewayError::InternalError(format!("Failed to register metrics: {}", e))
        })?);
        let cache = Arc::new(DescriptorCache::new(config.cache_capacity)?);

        let reader =
            BackendReader::new(backend, config.backend_timeout()).with_metrics(Arc::clone(&metrics));
        let resolver = Arc::new(
            DescriptorResolver::new(reader, Arc::clone(&cache))
                .with_max_descriptor_bytes(config.max_descriptor_bytes)
                .with_metrics(Arc::clone(&metrics)),
        );

        Ok(Gateway {
            content: ContentServer::new(Arc::clone(&resolver))
                .with_request_timeout(config.request_timeout()),
            metadata: MetadataServer::new(resolver).with_request_timeout(config.request_timeout()),
            metrics,
            cache,
        })
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Handle one request; never fails
    pub async fn handle<B>(&self, req: Request<B>) -> Response<GatewayBody> {
        let start = Instant::now();
        // request bodies are never read
        let (parts, _) = req.into_parts();
        let route = Route::parse(parts.uri.path());

        let mut response = if parts.method == Method::OPTIONS {
            preflight_response()
        } else if parts.method != Method::GET {
            let mut response =
                text_response(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed\n");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, OPTIONS"));
            response
        } else {
            self.dispatch(&route, &parts.headers).await
        };

        apply_cors(&parts.headers, &mut response);

        let elapsed = start.elapsed();
        self.metrics
            .record_request(route.endpoint(), response.status().as_u16(), elapsed);
        info!(
            "{} {} -> {} in {:?}",
            parts.method,
            parts.uri.path(),
            response.status().as_u16(),
            elapsed
        );

        response
    }

    async fn dispatch(&self, route: &Route, headers: &HeaderMap) -> Response<GatewayBody> {
        match route {
            Route::Content { id, sub_path } => {
                match self.content.serve(id, sub_path, headers).await {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("Content request for {} failed: {}", id, e);
                        error_response(&e)
                    }
                }
            }
            Route::Metadata { id } => match self.metadata.serve_meta(id).await {
                Ok(doc) => match serde_json::to_vec(&doc) {
                    Ok(json) => {
                        let mut response = Response::new(body::full(json));
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                        response
                    }
                    Err(e) => error_response(&GatewayError::from(e)),
                },
                Err(e) => {
                    debug!("Metadata request for {} failed: {}", id, e);
                    error_response(&e)
                }
            },
            Route::HealthCheck => text_response(StatusCode::OK, "ok"),
            Route::Metrics => match self.metrics.render() {
                Ok(text) => {
                    let mut response = Response::new(body::full(text));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                    );
                    response
                }
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 internal server error\n")
                }
            },
            Route::NotFound => text_response(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
        }
    }

    /// Accept connections on `listener` until it fails
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("SEP gateway listening on http://{}", addr);
        }

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let gateway = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

fn preflight_response() -> Response<GatewayBody> {
    let mut response = Response::new(body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOWED_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
    );
    response
}

/// Echo `http(s)://` origins back to the client
fn apply_cors(request_headers: &HeaderMap, response: &mut Response<GatewayBody>) {
    let origin = match request_headers.get(ORIGIN) {
        Some(origin) => origin,
        None => return,
    };
    let allowed = origin
        .to_str()
        .map(|o| o.starts_with("http://") || o.starts_with("https://"))
        .unwrap_or(false);

    let headers = response.headers_mut();
    headers.append(VARY, HeaderValue::from_static("Origin"));
    if allowed {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use http_body_util::BodyExt;

    fn gateway(backend: Arc<MemoryBackend>) -> Gateway {
        let config = GatewayConfig::new("/ip4/127.0.0.1/tcp/5001", 8).unwrap();
        Gateway::new(&config, backend).unwrap()
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    async fn body_of(response: Response<GatewayBody>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(
            Route::parse("/content/abc123/"),
            Route::Content { id: "abc123".into(), sub_path: "".into() }
        );
        assert_eq!(
            Route::parse("/content/abc123/img/my%20cover.png"),
            Route::Content { id: "abc123".into(), sub_path: "img/my cover.png".into() }
        );
        assert_eq!(Route::parse("/metadata/def456/"), Route::Metadata { id: "def456".into() });
        assert_eq!(Route::parse("/metadata/def456/extra"), Route::NotFound);
        assert_eq!(Route::parse("/content/"), Route::NotFound);
        assert_eq!(Route::parse("/healthcheck/"), Route::HealthCheck);
        assert_eq!(Route::parse("/metrics"), Route::Metrics);
        assert_eq!(Route::parse("/"), Route::NotFound);
        assert_eq!(Route::parse("/content/%FF/"), Route::NotFound);
    }

    #[test]
    fn test_error_mapping() {
        let response = error_response(&GatewayError::Timeout("slow".into()));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = error_response(&GatewayError::InvalidTarget("dir".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_healthcheck_touches_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let gateway = gateway(backend.clone());

        let response = gateway.handle(get("/healthcheck/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, Bytes::from_static(b"ok"));
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_bad_identifier_is_uniform_404() {
        let gateway = gateway(Arc::new(MemoryBackend::new()));
        let response = gateway.handle(get("/content/not%20valid/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, Bytes::from_static(NOT_FOUND_BODY.as_bytes()));
    }

    #[tokio::test]
    async fn test_methods_and_cors() {
        let gateway = gateway(Arc::new(MemoryBackend::new()));

        let req = Request::builder()
            .method(Method::POST)
            .uri("/content/abc123/")
            .body(())
            .unwrap();
        assert_eq!(gateway.handle(req).await.status(), StatusCode::METHOD_NOT_ALLOWED);

        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/content/abc123/")
            .header(ORIGIN, "https://app.example")
            .body(())
            .unwrap();
        let response = gateway.handle(req).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET");
        assert_eq!(response.headers()[ACCESS_CONTROL_MAX_AGE], "300");

        let req = Request::builder()
            .uri("/healthcheck/")
            .header(ORIGIN, "file://local")
            .body(())
            .unwrap();
        let response = gateway.handle(req).await;
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(response.headers()[VARY], "Origin");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_counts_requests() {
        let gateway = gateway(Arc::new(MemoryBackend::new()));
        gateway.handle(get("/healthcheck/")).await;

        let body = body_of(gateway.handle(get("/metrics")).await).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("sep_gateway_requests_total{endpoint=\"healthcheck\",status=\"200\"} 1"));
    }

    #[tokio::test]
    async fn test_content_sent_with_identity_encoding() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_file("site1/app.js", Bytes::from_static(b"console.log(1);"));
        let gateway = gateway(backend);

        let req = Request::builder()
            .uri("/content/site1/app.js")
            .header(http::header::ACCEPT_ENCODING, "gzip, deflate")
            .body(())
            .unwrap();
        let response = gateway.handle(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(http::header::CONTENT_ENCODING).is_none());
        assert_eq!(response.headers()[http::header::CONTENT_LENGTH], "15");
        assert_eq!(body_of(response).await, Bytes::from_static(b"console.log(1);"));
    }
}
