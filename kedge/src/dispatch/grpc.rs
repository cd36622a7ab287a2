//! gRPC dispatcher (spec §4.5): registered as the server's unknown-service
//! handler so every inbound method is intercepted, routed, and piped
//! through to the picked backend without ever decoding the protobuf
//! payload. Grounded on the teacher's `tonic`-based transport usage
//! (`tonic::transport`) for server-side scaffolding and status mapping, and
//! on `proxy/gateway.rs`'s bind/accept/protocol-sniff structure for how a
//! catch-all handler plugs into the HTTP/2 server.
//!
//! Frame transparency (spec §9) is achieved by never invoking a protobuf
//! codec at all: the inbound `http::Request`'s body is streamed verbatim to
//! the upstream connection and its response streamed back, so message
//! frames are neither encoded nor decoded by kedge itself.

use std::sync::Arc;

use http::{HeaderMap, Request, Response};
use http_body_util::{BodyExt, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use tower::Service;

use crate::KedgeError;
use crate::pool::Pool;
use crate::router::Router;
use crate::types::CallContext;

pub type GrpcBody = BoxBody<Bytes, tonic::Status>;

/// Per-target client used to open an upstream gRPC stream. Production
/// wiring constructs this over an h2/tonic connection to the backend's
/// picked target; tests substitute a mock.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
	async fn call(
		&self,
		target: &str,
		req: Request<Incoming>,
	) -> Result<Response<GrpcBody>, KedgeError>;
}

pub struct GrpcDispatcher<C> {
	router: Arc<Router>,
	pool: Arc<Pool>,
	client: C,
}

impl<C: UpstreamClient> GrpcDispatcher<C> {
	pub fn new(router: Arc<Router>, pool: Arc<Pool>, client: C) -> Self {
		Self { router, pool, client }
	}

	/// Routes and picks a connection for `full_method`, returning the dial
	/// address to forward to. Split out from `dispatch` so the router/pool
	/// error mapping (steps 2-4 of spec §4.5) can be unit tested without a
	/// live transport.
	pub async fn route_and_pick(
		&self,
		ctx: &CallContext,
		full_method: &str,
	) -> Result<String, KedgeError> {
		let backend_name = self.router.route(ctx, full_method)?;
		let backend = self.pool.get(backend_name)?;
		let conn = backend.pick(None).await?;
		Ok(conn.target.dial_address)
	}

	/// Full dispatch: route, pick, forward, and pipe the response back
	/// frame-transparently. On any routing/pool/pick error, fails the
	/// stream with the mapped gRPC status instead of forwarding.
	pub async fn dispatch(&self, req: Request<Incoming>) -> Response<GrpcBody> {
		let full_method = req.uri().path().to_string();
		let ctx = call_context_from_headers(req.headers());

		match self.route_and_pick(&ctx, &full_method).await {
			Ok(target) => match self.client.call(&target, req).await {
				Ok(resp) => resp,
				Err(e) => status_response(e.grpc_code(), &e.to_string()),
			},
			Err(e) => status_response(e.grpc_code(), &e.to_string()),
		}
	}
}

fn call_context_from_headers(headers: &HeaderMap) -> CallContext {
	let mut ctx = CallContext::new();
	if let Some(authority) = headers.get(http::header::HOST).and_then(|v| v.to_str().ok()) {
		ctx.authority = Some(authority.to_string());
	}
	for (name, value) in headers.iter() {
		if let Ok(value) = value.to_str() {
			ctx.metadata.insert(name.as_str().to_lowercase(), value.to_string());
		}
	}
	ctx
}

/// Builds a trailers-only gRPC error response: `grpc-status`/`grpc-message`
/// set directly as headers on an empty-bodied 200 response, the standard
/// way a gRPC server fails a call before any message has been sent.
fn status_response(code: tonic::Code, message: &str) -> Response<GrpcBody> {
	let body = BoxBody::new(http_body_util::Empty::new().map_err(|never: std::convert::Infallible| match never {}));
	Response::builder()
		.status(http::StatusCode::OK)
		.header("content-type", "application/grpc")
		.header("grpc-status", (code as i32).to_string())
		.header("grpc-message", message)
		.body(body)
		.expect("status response headers are always valid")
}

impl<C> Clone for GrpcDispatcher<C>
where
	C: Clone,
{
	fn clone(&self) -> Self {
		Self {
			router: self.router.clone(),
			pool: self.pool.clone(),
			client: self.client.clone(),
		}
	}
}

impl<C: UpstreamClient + Clone + 'static> Service<Request<Incoming>> for GrpcDispatcher<C> {
	type Response = Response<GrpcBody>;
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
