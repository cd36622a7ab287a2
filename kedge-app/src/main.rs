//! Reverse-proxy binary. Wires `kedge-core`'s ambient concerns (drain,
//! signal, readiness, logging) and `kedge`'s domain components into a
//! running process. Grounded on `crates/agentgateway-app/src/main.rs` for
//! the bootstrap shape and `original_source/server/main.go` for flag
//! names/defaults (`--bind-addr`, `--grpc-tls-port`, `--http-tls-port`,
//! `--http-port`, mirrored here as kebab-case clap flags).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kedge_core::{drain, readiness, signal, telemetry, version};
use prometheus_client::registry::Registry;
use tokio::sync::Mutex;
use tracing::info;

use kedge::config;
use kedge::dispatch::{GrpcDispatcher, HttpDispatcher};
use kedge::pool::Pool;
use kedge::router::Router;
use kedge::transport::{self, Bouncer};
use kedge::transport::client::HyperUpstream;

#[derive(Debug, Parser)]
#[command(name = "kedge", about = "dual-protocol gRPC+HTTPS reverse proxy")]
struct Args {
	/// Path to the YAML config file.
	#[arg(long, default_value = "/etc/kedge/kedge.yaml")]
	config: PathBuf,

	/// Directory to additionally write newline-delimited JSON logs to.
	#[arg(long)]
	log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
	let args = Args::parse();
	let _logging_guard = telemetry::setup_logging(args.log_dir.as_deref());
	info!(build = %version::BuildInfo::new(), "starting kedge");

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("building tokio runtime")?
		.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
	let cfg = config::load(&args.config).with_context(|| format!("loading config {}", args.config.display()))?;

	let ready = readiness::Ready::new();
	let registry = Arc::new(Mutex::new(Registry::default()));

	let router = Arc::new(Router::new(cfg.routes));
	let http_router = Arc::new(Router::new(cfg.http_routes));
	let pool = Arc::new(Pool::new(cfg.backends).context("constructing backend pool")?);
	let upstream = HyperUpstream::new();

	let tls_config = transport::load_tls_config(
		std::path::Path::new(&cfg.listen.tls_cert_path),
		std::path::Path::new(&cfg.listen.tls_key_path),
	)
	.context("loading TLS config")?;

	let (drain_trigger, drain_watcher) = drain::new();
	let shutdown = signal::shutdown();

	// The gRPC-TLS port and the bounced HTTPS port both run the same
	// content-type bouncer (spec §6): the gRPC-only port simply never sees
	// non-gRPC traffic in practice, so one listener implementation serves
	// both.
	let bouncer = Bouncer {
		grpc: GrpcDispatcher::new(router.clone(), pool.clone(), upstream.clone()),
		http: HttpDispatcher::new(http_router.clone(), pool.clone(), upstream.clone()),
	};

	let grpc_block = ready.register_task();
	let grpc_bouncer = bouncer.clone();
	let grpc_addr = cfg.listen.grpc_tls_addr.clone();
	let grpc_tls = tls_config.clone();
	let grpc_drain = drain_watcher.clone();
	let grpc_task = tokio::spawn(async move {
		drop(grpc_block);
		transport::serve_tls(&grpc_addr, grpc_tls, move || grpc_bouncer.clone(), grpc_drain).await
	});

	let http_block = ready.register_task();
	let http_bouncer = bouncer.clone();
	let http_addr = cfg.listen.http_tls_addr.clone();
	let http_tls = tls_config.clone();
	let http_drain = drain_watcher.clone();
	let http_task = tokio::spawn(async move {
		drop(http_block);
		transport::serve_tls(&http_addr, http_tls, move || http_bouncer.clone(), http_drain).await
	});

	let admin_addr = cfg.listen.admin_addr.clone().unwrap_or_else(|| cfg.listen.http_addr.clone());
	let admin_ready = ready.clone();
	let admin_registry = registry.clone();
	let admin_drain = drain_watcher.clone();
	let admin_task = tokio::spawn(async move {
		kedge::management::serve(&admin_addr, admin_ready, admin_registry, admin_drain).await
	});

	info!("kedge ready");

	shutdown.signaled().await;
	info!("shutdown requested, draining listeners");
	drain_trigger.start_drain_and_wait(drain::DrainMode::Graceful).await;

	for task in [grpc_task, http_task, admin_task] {
		let _ = task.await;
	}
	pool.close().await;
	info!("shutdown complete");
	Ok(())
}
