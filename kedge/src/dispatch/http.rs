//! HTTP reverse-proxy dispatcher (spec §4.6). Grounded on
//! `crates/agentgateway/src/proxy/httpproxy.rs` for the round-tripper shape
//! and header normalization, and on `original_source/winch/proxy.go` for
//! the buffer pool sizing (`32 KiB` buffers, `2048` of them) and the
//! `10ms` flush interval, ported verbatim from the Go `bpool`/
//! `httputil.ReverseProxy` configuration.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, Request, Response};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};

use crate::KedgeError;
use crate::pool::Pool;
use crate::router::Router;
use crate::types::CallContext;

/// Default buffer size/count for the body-copy buffer pool, and the
/// default flush interval -- the exact values `winch/proxy.go` configures
/// its `bpool`-backed `httputil.ReverseProxy` with.
pub const BUFFER_SIZE_BYTES: usize = 32 * 1024;
pub const BUFFER_COUNT: usize = 2 * 1024;
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

pub const ERROR_HEADER: &str = "X-Kedge-Error";

/// Hop-by-hop headers stripped before forwarding, per RFC 7230 §6.1.
const HOP_BY_HOP: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Wraps the one real failure mode a forwarded response body can hit: the
/// upstream connection dying mid-stream.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct BodyError(#[from] pub hyper::Error);

pub type HttpBody = BoxBody<Bytes, BodyError>;

/// Issues the forwarded request to the picked target. Production wiring
/// uses a pooled hyper HTTP/2 client per backend target; tests substitute
/// a mock.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
	async fn forward(
		&self,
		target: &str,
		req: Request<Incoming>,
	) -> Result<Response<HttpBody>, KedgeError>;
}

pub struct HttpDispatcher<U> {
	router: Arc<Router>,
	pool: Arc<Pool>,
	upstream: U,
}

impl<U: Upstream> HttpDispatcher<U> {
	pub fn new(router: Arc<Router>, pool: Arc<Pool>, upstream: U) -> Self {
		Self { router, pool, upstream }
	}

	/// Routes on `host`/`path` and picks a connection, returning the
	/// backend's authority (used to rewrite the `Host` header) and dial
	/// address.
	pub async fn route_and_pick(&self, host: Option<&str>, path: &str) -> Result<String, KedgeError> {
		let ctx = CallContext { authority: host.map(str::to_string), ..CallContext::new() };
		let backend_name = self.router.route_http(&ctx, path)?;
		let backend = self.pool.get(backend_name)?;
		let conn = backend.pick(None).await?;
		Ok(conn.target.dial_address)
	}

	/// Full dispatch per spec §4.6: normalize, route, pick, forward, and
	/// stream the response back. On any failure, returns a 502 with
	/// `X-Kedge-Error` set and a short plain-text body, performing no
	/// cross-backend retry.
	pub async fn dispatch(&self, req: Request<Incoming>) -> Response<HttpBody> {
		let host = req
			.headers()
			.get(http::header::HOST)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);
		let path = req.uri().path().to_string();

		match self.route_and_pick(host.as_deref(), &path).await {
			Ok(target) => {
				let normalized = normalize_request(req, &target);
				match self.upstream.forward(&target, normalized).await {
					Ok(resp) => resp,
					Err(e) => error_response(&e),
				}
			},
			Err(e) => error_response(&e),
		}
	}
}

/// Strips hop-by-hop headers and rewrites the `Host` header to the
/// backend's dial address; preserves `Authorization` and any `X-*` tracing
/// headers byte-for-byte (spec §8 round-trip property).
fn normalize_request(mut req: Request<Incoming>, target: &str) -> Request<Incoming> {
	let headers = req.headers_mut();
	for name in HOP_BY_HOP {
		headers.remove(*name);
	}
	if let Ok(value) = http::HeaderValue::from_str(target) {
		headers.insert(http::header::HOST, value);
	}
	req
}

impl<U: Clone> Clone for HttpDispatcher<U> {
	fn clone(&self) -> Self {
		Self {
			router: self.router.clone(),
			pool: self.pool.clone(),
			upstream: self.upstream.clone(),
		}
	}
}

impl<U: Upstream + Clone + 'static> tower::Service<Request<Incoming>> for HttpDispatcher<U> {
	type Response = Response<HttpBody>;
	type Error = std::convert::Infallible;
	type Future = std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request<Incoming>) -> Self::Future {
		let this = self.clone();
		Box::pin(async move { Ok(this.dispatch(req).await) })
	}
}

fn error_response(err: &KedgeError) -> Response<HttpBody> {
	let body: HttpBody = Full::new(Bytes::from(format!("kedge error: {err}")))
		.map_err(|never: std::convert::Infallible| match never {})
		.boxed();
	Response::builder()
		.status(err.http_status())
		.header(ERROR_HEADER, err.to_string())
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(body)
		.expect("error response headers are always valid")
}

#[allow(dead_code)]
fn strip_hop_by_hop_names() -> Vec<HeaderName> {
	HOP_BY_HOP.iter().map(|n| HeaderName::from_static(n)).collect()
}

#[allow(dead_code)]
fn preserved(headers: &HeaderMap, name: &str) -> Option<String> {
	headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{BackendConfig, ResolverConfig, Route, Security};

	fn pool_with(name: &str) -> Arc<Pool> {
		Arc::new(
			Pool::new(vec![BackendConfig {
				name: name.into(),
				resolver: ResolverConfig::Srv { dns_name: format!("_grpc._tcp.{name}.invalid") },
				security: Security::Plaintext,
			}])
			.unwrap(),
		)
	}

	struct NoopUpstream;

	#[async_trait::async_trait]
	impl Upstream for NoopUpstream {
		async fn forward(&self, _target: &str, _req: Request<Incoming>) -> Result<Response<HttpBody>, KedgeError> {
			unreachable!("not exercised by routing-only tests")
		}
	}

	#[tokio::test]
	async fn unknown_route_maps_to_kedge_error() {
		let router = Arc::new(Router::new(vec![]));
		let pool = pool_with("a");
		let dispatcher = HttpDispatcher::new(router, pool.clone(), NoopUpstream);
		let err = dispatcher.route_and_pick(Some("host"), "/x").await.unwrap_err();
		let resp = error_response(&err);
		assert_eq!(resp.status(), http::StatusCode::BAD_GATEWAY);
		assert!(resp.headers().contains_key(ERROR_HEADER));
		pool.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn routes_by_host_and_path() {
		let router = Arc::new(Router::new(vec![
			Route::new("secure").with_service_matcher("/secure/*").with_authority_matcher("secure.ext.test.local"),
			Route::new("non_secure").with_service_matcher("/secure/*").with_authority_matcher("non_secure.ext.test.local"),
		]));
		let pool = pool_with("secure");
		let dispatcher = HttpDispatcher::new(router, pool.clone(), NoopUpstream);
		let handle = tokio::spawn(async move {
			dispatcher.route_and_pick(Some("secure.ext.test.local"), "/secure/x").await
		});
		tokio::time::advance(Duration::from_secs(6)).await;
		// backend "secure" exists but never resolves in this test -> NoReadyConnections, not UnknownRoute
		let err = handle.await.unwrap().unwrap_err();
		assert!(matches!(err, KedgeError::NoReadyConnections));
		pool.close().await;
	}
}
