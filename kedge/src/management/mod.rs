//! Admin HTTP surface: `/_healthz`, `/_healthz/ready`, `/metrics` (spec §6,
//! grounded on `management/{readiness_server.rs,metrics_server.rs}`).

use std::sync::Arc;

use anyhow::{Context, Result};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use kedge_core::drain::DrainWatcher;
use kedge_core::readiness::Ready;
use kedge_core::version::BuildInfo;

type AdminBody = BoxBody<Bytes, std::convert::Infallible>;

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<AdminBody> {
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(Full::new(body.into()).map_err(|never: std::convert::Infallible| match never {}).boxed())
		.expect("admin response headers are always valid")
}

async fn handle(req: Request<Incoming>, ready: Ready, registry: Arc<Mutex<Registry>>) -> Response<AdminBody> {
	match req.uri().path() {
		"/_healthz" => text_response(StatusCode::OK, "kedge isok"),
		"/_healthz/ready" => {
			if ready.is_ready() {
				text_response(StatusCode::OK, "ready")
			} else {
				text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
			}
		},
		"/metrics" => {
			let mut buf = String::new();
			let registry = registry.lock().await;
			match encode(&mut buf, &registry) {
				Ok(()) => Response::builder()
					.status(StatusCode::OK)
					.header(http::header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")
					.body(Full::new(Bytes::from(buf)).map_err(|never: std::convert::Infallible| match never {}).boxed())
					.expect("metrics response headers are always valid"),
				Err(_) => text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics"),
			}
		},
		_ => text_response(StatusCode::NOT_FOUND, "not found"),
	}
}

/// Serves the admin surface until `drain` signals shutdown.
pub async fn serve(
	addr: &str,
	ready: Ready,
	registry: Arc<Mutex<Registry>>,
	drain: DrainWatcher,
) -> Result<()> {
	let listener = TcpListener::bind(addr).await.with_context(|| format!("binding admin {addr}"))?;
	debug!(addr, build = %BuildInfo::new(), "admin surface listening");

	loop {
		let (stream, peer) = tokio::select! {
			res = listener.accept() => res.context("accepting admin connection")?,
			_ = drain.clone().wait_for_drain() => return Ok(()),
		};
		let ready = ready.clone();
		let registry = registry.clone();
		let conn_drain = drain.clone();
		tokio::spawn(async move {
			let io = TokioIo::new(stream);
			let service = hyper::service::service_fn(move |req| {
				let ready = ready.clone();
				let registry = registry.clone();
				async move { Ok::<_, std::convert::Infallible>(handle(req, ready, registry).await) }
			});
			let builder = auto::Builder::new(TokioExecutor::new());
			let conn = builder.serve_connection(io, service);
			let guarded = conn_drain.wrap_connection(conn);
			if let Err(e) = guarded.await {
				warn!(%peer, error = %e, "admin connection closed with error");
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn readiness_reflects_blocking_tasks() {
		let ready = Ready::new();
		let block = ready.register_task();
		assert!(!ready.is_ready());
		drop(block);
		assert!(ready.is_ready());
	}
}
