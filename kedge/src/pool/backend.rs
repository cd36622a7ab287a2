//! A named backend: owns a resolver and a round-robin set of connections to
//! its resolved targets (spec §4.2). Grounded on the keyed-connection,
//! readiness-tracked shape of `hbone/src/pool.rs`, simplified to a single
//! tier of round-robin (no HBONE multiplexing, no per-key write locks).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::timeout;

use crate::KedgeError;
use crate::types::{BackendConfig, ResolverConfig, Security, Target};

use super::resolver::{ResolverError, TargetResolver};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	Connecting,
	Ready,
	TransientFailure,
	Shutdown,
}

/// One dialed connection to a target. Actual transport (HTTP/2 client,
/// gRPC channel) is constructed by the dispatchers; the pool only tracks
/// readiness and identity so `pick` can round-robin over READY entries.
#[derive(Debug, Clone)]
pub struct Connection {
	pub target: Target,
	pub security: Security,
	state: Arc<ArcSwap<ConnState>>,
}

impl Connection {
	fn new(target: Target, security: Security) -> Self {
		Self {
			target,
			security,
			state: Arc::new(ArcSwap::new(Arc::new(ConnState::Ready))),
		}
	}

	pub fn state(&self) -> ConnState {
		**self.state.load()
	}

	/// Marks this connection as broken. Reconnection is left to the
	/// transport layer; the backend simply stops handing it out.
	pub fn mark_failed(&self) {
		self.state.store(Arc::new(ConnState::TransientFailure));
	}

	fn mark_shutdown(&self) {
		self.state.store(Arc::new(ConnState::Shutdown));
	}
}

struct Snapshot {
	connections: Vec<Connection>,
}

/// Owns a resolver task and the connection set derived from its membership.
/// Destroyed only when the owning pool is closed.
pub struct Backend {
	name: String,
	security: Security,
	resolver: tokio::sync::Mutex<TargetResolver>,
	snapshot: Arc<ArcSwap<Snapshot>>,
	rr_counter: AtomicUsize,
	sync_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
	closed: Arc<std::sync::atomic::AtomicBool>,
}

impl Backend {
	/// Builds a backend from config, eagerly starting its resolver.
	pub fn new(config: BackendConfig) -> Result<Arc<Self>, KedgeError> {
		let ResolverConfig::Srv { dns_name } = &config.resolver;
		let resolver = TargetResolver::spawn(dns_name.clone()).map_err(|e| match e {
			ResolverError::Permanent => KedgeError::UpstreamError(format!("invalid dns name: {dns_name}")),
			ResolverError::Transient => KedgeError::UpstreamError(format!("dns unavailable: {dns_name}")),
		})?;

		let backend = Arc::new(Self {
			name: config.name,
			security: config.security,
			resolver: tokio::sync::Mutex::new(resolver),
			snapshot: Arc::new(ArcSwap::new(Arc::new(Snapshot { connections: Vec::new() }))),
			rr_counter: AtomicUsize::new(0),
			sync_task: tokio::sync::Mutex::new(None),
			closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
		});

		backend.clone().start_sync_task();
		Ok(backend)
	}

	fn start_sync_task(self: Arc<Self>) {
		let weak = Arc::downgrade(&self);
		let handle = tokio::spawn(async move {
			loop {
				let Some(this) = weak.upgrade() else { return };
				if this.closed.load(Ordering::Relaxed) {
					return;
				}
				this.sync_from_resolver().await;
				let resolver = this.resolver.lock().await;
				resolver.changed().await;
			}
		});
		// Stash the handle; best-effort, only used so `close` can abort it.
		if let Ok(mut guard) = self.sync_task.try_lock() {
			*guard = Some(handle);
		}
	}

	async fn sync_from_resolver(&self) {
		let membership = {
			let resolver = self.resolver.lock().await;
			resolver.current()
		};
		let previous = self.snapshot.load();
		let mut connections = Vec::with_capacity(membership.targets.len());
		for target in &membership.targets {
			if let Some(existing) = previous
				.connections
				.iter()
				.find(|c| c.target.dial_address == target.dial_address)
			{
				connections.push(existing.clone());
			} else {
				connections.push(Connection::new(target.clone(), self.security.clone()));
			}
		}
		self.snapshot.store(Arc::new(Snapshot { connections }));
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Round-robins across the current READY set; blocks up to `deadline`
	/// for one to become ready if none currently is.
	pub async fn pick(&self, deadline: Option<Duration>) -> Result<Connection, KedgeError> {
		if let Some(conn) = self.try_pick() {
			return Ok(conn);
		}
		let wait = async {
			loop {
				tokio::time::sleep(Duration::from_millis(20)).await;
				if let Some(conn) = self.try_pick() {
					return conn;
				}
			}
		};
		match timeout(deadline.unwrap_or(DEFAULT_CONNECT_TIMEOUT), wait).await {
			Ok(conn) => Ok(conn),
			Err(_) => Err(KedgeError::NoReadyConnections),
		}
	}

	fn try_pick(&self) -> Option<Connection> {
		let snapshot = self.snapshot.load();
		let ready: Vec<&Connection> = snapshot
			.connections
			.iter()
			.filter(|c| c.state() == ConnState::Ready)
			.collect();
		if ready.is_empty() {
			return None;
		}
		let idx = self.rr_counter.fetch_add(1, Ordering::Relaxed) % ready.len();
		Some(ready[idx].clone())
	}

	/// Tears down all connections and stops the resolver loop. Idempotent.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		{
			let mut resolver = self.resolver.lock().await;
			resolver.stop();
		}
		if let Some(handle) = self.sync_task.lock().await.take() {
			handle.abort();
		}
		let snapshot = self.snapshot.load();
		for conn in &snapshot.connections {
			conn.mark_shutdown();
		}
	}
}

impl Backend {
	#[cfg(test)]
	fn new_with_resolver(name: &str, security: Security, resolver: TargetResolver) -> Arc<Self> {
		let backend = Arc::new(Self {
			name: name.into(),
			security,
			resolver: tokio::sync::Mutex::new(resolver),
			snapshot: Arc::new(ArcSwap::new(Arc::new(Snapshot { connections: Vec::new() }))),
			rr_counter: AtomicUsize::new(0),
			sync_task: tokio::sync::Mutex::new(None),
			closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
		});
		backend.clone().start_sync_task();
		backend
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(dns_name: &str) -> BackendConfig {
		BackendConfig {
			name: "test".into(),
			resolver: ResolverConfig::Srv { dns_name: dns_name.into() },
			security: Security::Plaintext,
		}
	}

	#[tokio::test]
	async fn construction_fails_on_empty_dns_name() {
		assert!(Backend::new(config("")).is_err());
	}

	#[tokio::test]
	async fn pick_fails_fast_with_no_ready_connections() {
		let backend = Backend::new(config("_grpc._tcp.nowhere.invalid")).unwrap();
		let result = backend.pick(Some(Duration::from_millis(50))).await;
		assert!(matches!(result, Err(KedgeError::NoReadyConnections)));
		backend.close().await;
	}

	#[tokio::test]
	async fn close_is_idempotent() {
		let backend = Backend::new(config("_grpc._tcp.nowhere.invalid")).unwrap();
		backend.close().await;
		backend.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn round_robins_fairly_across_five_targets() {
		let resolver = TargetResolver::spawn_mock("svc", Duration::from_secs(60), || {
			Ok((0..5)
				.map(|i| Target { dial_address: format!("10.0.0.{i}:80"), ttl: Duration::from_secs(60) })
				.collect())
		});
		let backend = Backend::new_with_resolver("five", Security::Plaintext, resolver);
		// let the sync task publish the initial snapshot
		tokio::time::sleep(Duration::from_millis(10)).await;

		let mut counts = std::collections::HashMap::new();
		for _ in 0..50 {
			let conn = backend.pick(Some(Duration::from_millis(50))).await.unwrap();
			*counts.entry(conn.target.dial_address).or_insert(0) += 1;
		}
		assert_eq!(counts.len(), 5);
		for count in counts.values() {
			assert_eq!(*count, 10, "round-robin should split 50 calls evenly across 5 targets");
		}
		backend.close().await;
	}
}
