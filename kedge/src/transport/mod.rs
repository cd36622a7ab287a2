//! TLS termination and the content-type bouncer that dispatches each
//! inbound call to the gRPC or HTTP dispatcher (spec §6 "A bouncer at the
//! TLS port dispatches by `content-type` prefix"). Grounded on
//! `proxy/gateway.rs`'s bind/accept/protocol-sniff structure, simplified
//! from its dynamic multi-bind model to kedge's static, config-driven
//! listener set, and on `original_source/server/main.go`'s
//! `httpsBouncerServer`, the component this module is named after.

pub mod client;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, warn};

use kedge_core::drain::DrainWatcher;

use crate::dispatch::grpc::GrpcBody;
use crate::dispatch::http::{BodyError, HttpBody};

/// Loads a PEM certificate chain + private key into a rustls server config
/// with ALPN set for both HTTP/2 (gRPC) and HTTP/1.1 (HTTP), so TLS
/// negotiation alone does not need to choose a protocol; the bouncer
/// decides per-request instead.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
	let cert_file = std::fs::File::open(cert_path)
		.with_context(|| format!("opening TLS cert {}", cert_path.display()))?;
	let key_file =
		std::fs::File::open(key_path).with_context(|| format!("opening TLS key {}", key_path.display()))?;

	let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
		.collect::<Result<Vec<_>, _>>()
		.context("parsing TLS certificate chain")?;
	let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
		.context("parsing TLS private key")?
		.context("no private key found in key file")?;

	let mut config = ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(certs, key)
		.context("building rustls server config")?;
	config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	Ok(Arc::new(config))
}

/// The bouncer: either protocol's dispatcher, selected per-request by the
/// inbound `content-type` (spec §6). gRPC traffic is any `content-type`
/// beginning with `application/grpc`; everything else goes to the HTTP
/// dispatcher.
pub struct Bouncer<G, H> {
	pub grpc: G,
	pub http: H,
}

impl<G, H> Clone for Bouncer<G, H>
where
	G: Clone,
	H: Clone,
{
	fn clone(&self) -> Self {
		Self { grpc: self.grpc.clone(), http: self.http.clone() }
	}
}

impl<G, H> Service<Request<Incoming>> for Bouncer<G, H>
where
	G: Service<Request<Incoming>, Response = Response<GrpcBody>, Error = std::convert::Infallible>
		+ Clone
		+ Send
		+ 'static,
	G::Future: Send,
	H: Service<Request<Incoming>, Response = Response<HttpBody>, Error = std::convert::Infallible>
		+ Clone
		+ Send
		+ 'static,
	H::Future: Send,
{
	type Response = Response<BouncedBody>;
	type Error = std::convert::Infallible;
	type Future = std::pin::Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request<Incoming>) -> Self::Future {
		let is_grpc = req
			.headers()
			.get(http::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.is_some_and(|ct| ct.starts_with("application/grpc"));

		let mut grpc = self.grpc.clone();
		let mut http = self.http.clone();
		Box::pin(async move {
			if is_grpc {
				let resp = grpc.call(req).await.expect("infallible");
				Ok(resp.map(BouncedBody::Grpc))
			} else {
				let resp = http.call(req).await.expect("infallible");
				Ok(resp.map(BouncedBody::Http))
			}
		})
	}
}

/// Unifies the two dispatchers' distinct body types behind one
/// `http_body::Body` impl so the bounced response can be served by a
/// single hyper connection.
pub enum BouncedBody {
	Grpc(GrpcBody),
	Http(HttpBody),
}

impl http_body::Body for BouncedBody {
	type Data = hyper::body::Bytes;
	type Error = BouncedBodyError;

	fn poll_frame(
		self: std::pin::Pin<&mut Self>,
		cx: &mut std::task::Context<'_>,
	) -> std::task::Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
		match self.get_mut() {
			BouncedBody::Grpc(b) => std::pin::Pin::new(b).poll_frame(cx).map(|o| {
				o.map(|r| r.map_err(BouncedBodyError::Grpc))
			}),
			BouncedBody::Http(b) => {
				std::pin::Pin::new(b).poll_frame(cx).map(|o| o.map(|r| r.map_err(BouncedBodyError::Http)))
			},
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum BouncedBodyError {
	#[error(transparent)]
	Grpc(tonic::Status),
	#[error(transparent)]
	Http(#[from] BodyError),
}

/// Binds a TLS listener and serves `make_service` (typically a [`Bouncer`])
/// over it until the drain watcher signals shutdown. Connections hold a
/// clone of `drain` for the duration of their lifetime (spec §5).
pub async fn serve_tls<S>(
	addr: &str,
	tls_config: Arc<ServerConfig>,
	make_service: impl Fn() -> S + Send + Sync + 'static,
	drain: DrainWatcher,
) -> Result<()>
where
	S: Service<Request<Incoming>, Response = Response<BouncedBody>, Error = std::convert::Infallible>
		+ Clone
		+ Send
		+ 'static,
	S::Future: Send,
{
	let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
	let acceptor = TlsAcceptor::from(tls_config);
	debug!(addr, "listening");

	loop {
		let (stream, peer) = tokio::select! {
			res = listener.accept() => res.context("accepting connection")?,
			_ = drain.clone().wait_for_drain() => {
				debug!(addr, "listener shutting down");
				return Ok(());
			}
		};

		let acceptor = acceptor.clone();
		let service = make_service();
		let conn_drain = drain.clone();
		tokio::spawn(async move {
			let tls_stream = match acceptor.accept(stream).await {
				Ok(s) => s,
				Err(e) => {
					warn!(%peer, error = %e, "TLS handshake failed");
					return;
				},
			};
			let io = TokioIo::new(tls_stream);
			let builder = auto::Builder::new(TokioExecutor::new());
			let conn = builder.serve_connection(io, hyper_util::service::TowerToHyperService::new(service));
			let guarded = conn_drain.wrap_connection(conn);
			if let Err(e) = guarded.await {
				debug!(%peer, error = %e, "connection closed with error");
			}
		});
	}
}
