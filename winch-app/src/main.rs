//! Client-side forward-proxy binary. Maps an outbound request's authority
//! to a kedge hop, rewrites the request to that hop while preserving the
//! original `Host` header, and streams the response back (spec §4.7).
//! Serves the matching PAC file at `/pac` and `/_healthz`. Grounded on
//! `original_source/winch/server/main.go` (default port `8070`) and
//! `original_source/winch/proxy.go`/`pac.go`.

use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use http::{Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use kedge::dispatch::http::ERROR_HEADER;
use kedge::winch::{Mapper, pac};
use kedge_core::{drain, signal, telemetry, version};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

mod config;

#[derive(Debug, Parser)]
#[command(name = "winch", about = "client-side forward proxy for kedge")]
struct Args {
	#[arg(long, default_value = "/etc/winch/winch.yaml")]
	config: PathBuf,

	#[arg(long)]
	log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
	let args = Args::parse();
	let _logging_guard = telemetry::setup_logging(args.log_dir.as_deref());
	info!(build = %version::BuildInfo::new(), "starting winch");

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("building tokio runtime")?
		.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
	let cfg = config::load(&args.config).with_context(|| format!("loading winch config {}", args.config.display()))?;
	let mapper = Arc::new(Mapper::new(cfg.rules));
	let pac_body =
		Arc::new(pac::generate(&cfg.listen_addr, &mapper).context("generating PAC file")?);

	let https = HttpsConnectorBuilder::new()
		.with_native_roots()
		.context("loading native root certificates")?
		.https_or_http()
		.enable_http1()
		.enable_http2()
		.build();
	let client = Client::builder(TokioExecutor::new()).build(https);

	let (drain_trigger, drain_watcher) = drain::new();
	let shutdown = signal::shutdown();

	let listener = TcpListener::bind(&cfg.listen_addr)
		.await
		.with_context(|| format!("binding winch listener on {}", cfg.listen_addr))?;
	info!(addr = %cfg.listen_addr, "winch ready");

	let serve_drain = drain_watcher.clone();
	let serve_task = tokio::spawn(async move {
		loop {
			let (stream, peer) = tokio::select! {
				res = listener.accept() => match res {
					Ok(pair) => pair,
					Err(e) => { warn!(error = %e, "accept failed"); continue; }
				},
				_ = serve_drain.clone().wait_for_drain() => return,
			};
			let mapper = mapper.clone();
			let pac_body = pac_body.clone();
			let client = client.clone();
			let conn_drain = serve_drain.clone();
			tokio::spawn(async move {
				let io = TokioIo::new(stream);
				let service = hyper::service::service_fn(move |req| {
					let mapper = mapper.clone();
					let pac_body = pac_body.clone();
					let client = client.clone();
					async move { Ok::<_, Infallible>(handle(req, mapper, pac_body, client).await) }
				});
				let builder = auto::Builder::new(TokioExecutor::new());
				let conn = builder.serve_connection(io, service);
				if let Err(e) = conn_drain.wrap_connection(conn).await {
					debug!(%peer, error = %e, "winch connection closed with error");
				}
			});
		}
	});

	shutdown.signaled().await;
	info!("shutdown requested, draining winch listener");
	drain_trigger.start_drain_and_wait(drain::DrainMode::Graceful).await;
	let _ = serve_task.await;
	info!("winch shutdown complete");
	Ok(())
}

type ProxyBody = BoxBody<Bytes, hyper_util::client::legacy::Error>;

async fn handle(
	req: Request<Incoming>,
	mapper: Arc<Mapper>,
	pac_body: Arc<String>,
	client: Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Incoming>,
) -> Response<ProxyBody> {
	match req.uri().path() {
		"/_healthz" => text_response(StatusCode::OK, "kedge isok"),
		"/pac" => Response::builder()
			.status(StatusCode::OK)
			.header(http::header::CONTENT_TYPE, "application/x-ns-proxy-autoconfig")
			.body(body_from(pac_body.as_str().to_string()))
			.expect("pac response headers are always valid"),
		_ => forward(req, &mapper, &client).await,
	}
}

async fn forward(
	mut req: Request<Incoming>,
	mapper: &Mapper,
	client: &Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Incoming>,
) -> Response<ProxyBody> {
	let authority = req
		.headers()
		.get(http::header::HOST)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);

	let Some(authority) = authority else {
		return error_response(StatusCode::BAD_GATEWAY, "no Host header");
	};

	let kedge_url = match mapper.map(&authority) {
		Ok(url) => url,
		Err(e) => return error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
	};

	let path_and_query = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
	let rewritten = match Uri::from_str(&format!("{kedge_url}{path_and_query}")) {
		Ok(uri) => uri,
		Err(e) => return error_response(StatusCode::BAD_GATEWAY, &format!("invalid kedge url: {e}")),
	};
	// The original authority is preserved in the `Host` header (spec §4.7);
	// only the connection target (the request URI) changes.
	*req.uri_mut() = rewritten;

	match client.request(req).await {
		Ok(resp) => resp.map(|body| body.map_err(|e| e).boxed()),
		Err(e) => error_response(StatusCode::BAD_GATEWAY, &e.to_string()),
	}
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<ProxyBody> {
	Response::builder()
		.status(status)
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(body_from(body.into()))
		.expect("text response headers are always valid")
}

fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
	Response::builder()
		.status(status)
		.header(ERROR_HEADER, message)
		.header(http::header::CONTENT_TYPE, "text/plain")
		.body(body_from(format!("winch error: {message}")))
		.expect("error response headers are always valid")
}

fn body_from(s: String) -> ProxyBody {
	Full::new(Bytes::from(s))
		.map_err(|never: Infallible| match never {})
		.boxed()
}
