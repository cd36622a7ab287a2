//! Name→Backend registry (spec §4.3), grounded on the
//! `store/discovery.rs` pattern of a name-keyed, immutable-after-construction
//! store.

pub mod backend;
pub mod resolver;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::KedgeError;
use crate::types::BackendConfig;

use backend::Backend;

pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Write-once at startup, read-only thereafter.
pub struct Pool {
	backends: HashMap<String, Arc<Backend>>,
}

impl Pool {
	/// Validates name uniqueness and constructs every backend, eagerly
	/// starting its resolver. Fails if any backend fails to construct or a
	/// name is duplicated.
	pub fn new(configs: Vec<BackendConfig>) -> Result<Self, KedgeError> {
		let mut backends = HashMap::with_capacity(configs.len());
		for config in configs {
			let name = config.name.clone();
			if backends.contains_key(&name) {
				return Err(KedgeError::UpstreamError(format!("duplicate backend name: {name}")));
			}
			let backend = Backend::new(config)?;
			backends.insert(name, backend);
		}
		Ok(Self { backends })
	}

	pub fn get(&self, name: &str) -> Result<Arc<Backend>, KedgeError> {
		self.backends.get(name).cloned().ok_or(KedgeError::UnknownBackend)
	}

	/// Closes every backend; idempotent, waits up to `DEFAULT_DRAIN_GRACE`
	/// for in-flight dispatches before force-closing.
	pub async fn close(&self) {
		let grace = tokio::time::timeout(DEFAULT_DRAIN_GRACE, async {
			for backend in self.backends.values() {
				backend.close().await;
			}
		});
		if grace.await.is_err() {
			warn!("pool close exceeded grace period, some backends force-closed");
		}
	}
}
