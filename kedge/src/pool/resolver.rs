//! Target resolver (spec §4.1), grounded on `client/dns.rs`'s background
//! refresh-task pattern: one task per resolved name, `ArcSwap`-published
//! snapshots, notify-based readers, retain-last-good-membership on error.
//! Generalized from a flat IP list to `{dial_address, ttl}` SRV targets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use tokio::sync::watch;
use tracing::debug;

use crate::types::Target;

/// Floor below which the resolver never re-ticks sooner, regardless of the
/// TTL the DNS answer carried (spec §4.1 point 2; matches
/// `original_source/lib/resolvers/srv.go`'s 5s-ticking resolver).
pub const DEFAULT_REFRESH_FLOOR: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverError {
	/// Name temporarily unresolvable; last-good membership is retained and
	/// the resolver keeps retrying.
	Transient,
	/// Malformed name; construction itself fails.
	Permanent,
}

/// A membership snapshot emitted on every resolver tick.
#[derive(Debug, Clone, Default)]
pub struct Membership {
	pub targets: Vec<Target>,
}

/// Backing DNS client, abstracted so tests can substitute a mock.
#[derive(Clone)]
enum Source {
	Real(Arc<TokioResolver>),
	#[cfg(test)]
	Mock(Arc<dyn Fn() -> Result<Vec<Target>, ResolverError> + Send + Sync>),
}

impl std::fmt::Debug for Source {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Source::Real(_) => f.write_str("Source::Real"),
			#[cfg(test)]
			Source::Mock(_) => f.write_str("Source::Mock"),
		}
	}
}

impl Source {
	async fn resolve(&self, dns_name: &str) -> Result<(Vec<Target>, Duration), ResolverError> {
		match self {
			Source::Real(resolver) => {
				let lookup = resolver
					.srv_lookup(dns_name)
					.await
					.map_err(|_| ResolverError::Transient)?;
				let targets: Vec<Target> = lookup
					.iter()
					.map(|srv| Target {
						dial_address: format!("{}:{}", srv.target().to_utf8().trim_end_matches('.'), srv.port()),
						ttl: DEFAULT_REFRESH_FLOOR,
					})
					.collect();
				Ok((targets, DEFAULT_REFRESH_FLOOR))
			},
			#[cfg(test)]
			Source::Mock(f) => f().map(|targets| (targets, DEFAULT_REFRESH_FLOOR)),
		}
	}
}

/// Resolves one SRV name to a continually refreshed target membership.
/// Lives for exactly as long as the owning [`crate::pool::backend::Backend`].
pub struct TargetResolver {
	dns_name: String,
	source: Source,
	refresh_floor: Duration,
	current: Arc<ArcSwapOption<Membership>>,
	tx: watch::Sender<()>,
	stop: Arc<AtomicBool>,
	handle: Option<tokio::task::JoinHandle<()>>,
}

impl TargetResolver {
	/// Validates the name and starts the background refresh task. Returns
	/// `Err(ResolverError::Permanent)` for a malformed SRV name.
	pub fn spawn(dns_name: impl Into<String>) -> Result<Self, ResolverError> {
		let dns_name = dns_name.into();
		if dns_name.trim().is_empty() {
			return Err(ResolverError::Permanent);
		}
		let mut rb = hickory_resolver::Resolver::builder_with_config(
			ResolverConfig::default(),
			TokioConnectionProvider::default(),
		);
		*rb.options_mut() = ResolverOpts::default();
		let resolver = rb.build();
		Ok(Self::spawn_with_source(dns_name, Source::Real(Arc::new(resolver)), DEFAULT_REFRESH_FLOOR))
	}

	fn spawn_with_source(dns_name: String, source: Source, refresh_floor: Duration) -> Self {
		let current: Arc<ArcSwapOption<Membership>> = Arc::new(ArcSwapOption::empty());
		let (tx, _rx) = watch::channel(());
		let stop = Arc::new(AtomicBool::new(false));

		let task_name = dns_name.clone();
		let task_source = source.clone();
		let task_current = current.clone();
		let task_tx = tx.clone();
		let task_stop = stop.clone();
		let handle = tokio::spawn(async move {
			run(task_name, task_source, refresh_floor, task_current, task_tx, task_stop).await;
		});

		Self {
			dns_name,
			source,
			refresh_floor,
			current,
			tx,
			stop,
			handle: Some(handle),
		}
	}

	#[cfg(test)]
	pub(crate) fn spawn_mock(
		dns_name: impl Into<String>,
		refresh_floor: Duration,
		f: impl Fn() -> Result<Vec<Target>, ResolverError> + Send + Sync + 'static,
	) -> Self {
		Self::spawn_with_source(dns_name.into(), Source::Mock(Arc::new(f)), refresh_floor)
	}

	pub fn dns_name(&self) -> &str {
		&self.dns_name
	}

	/// The current membership snapshot, or an empty one if no tick has
	/// completed yet.
	pub fn current(&self) -> Arc<Membership> {
		self.current.load_full().unwrap_or_default()
	}

	/// Resolves once a new membership snapshot has been published.
	pub async fn changed(&self) {
		let mut rx = self.tx.subscribe();
		let _ = rx.changed().await;
	}

	/// Stops the background task. Idempotent.
	pub fn stop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}

impl Drop for TargetResolver {
	fn drop(&mut self) {
		self.stop();
	}
}

async fn run(
	dns_name: String,
	source: Source,
	refresh_floor: Duration,
	current: Arc<ArcSwapOption<Membership>>,
	tx: watch::Sender<()>,
	stop: Arc<AtomicBool>,
) {
	let mut backoff = refresh_floor;
	loop {
		if stop.load(Ordering::Relaxed) {
			return;
		}
		match source.resolve(&dns_name).await {
			Ok((targets, ttl)) => {
				current.store(Some(Arc::new(Membership { targets })));
				let _ = tx.send(());
				backoff = refresh_floor;
				tokio::time::sleep(ttl.max(refresh_floor)).await;
			},
			Err(ResolverError::Transient) => {
				debug!(dns_name, "SRV resolution failed, retaining last membership");
				tokio::time::sleep(backoff).await;
				backoff = (backoff * 2).min(refresh_floor.max(Duration::from_secs(60)));
			},
			Err(ResolverError::Permanent) => {
				debug!(dns_name, "SRV name permanently invalid, stopping resolver");
				return;
			},
		}
		let _ = Instant::now();
	}
}
