//! Tracks whether the process is ready to serve traffic.
//!
//! Startup work (binding listeners, priming the target resolver) registers a
//! [`BlockReady`] task before it starts and drops it on completion; the
//! admin `/_healthz/ready` endpoint reports ready once every registered task
//! has dropped its handle.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct Ready {
	tx: Arc<watch::Sender<usize>>,
}

impl Default for Ready {
	fn default() -> Self {
		Self::new()
	}
}

impl Ready {
	pub fn new() -> Self {
		Self {
			tx: Arc::new(watch::channel(0).0),
		}
	}

	/// Registers a pending task. The process is not ready until every
	/// `BlockReady` returned by this method has been dropped.
	pub fn register_task(&self) -> BlockReady {
		self.tx.send_modify(|count| *count += 1);
		BlockReady { tx: self.tx.clone() }
	}

	pub fn is_ready(&self) -> bool {
		*self.tx.borrow() == 0
	}

	/// Resolves once every outstanding `BlockReady` has been dropped.
	pub async fn when_ready(&self) {
		let mut rx = self.tx.subscribe();
		let _ = rx.wait_for(|count| *count == 0).await;
	}
}

pub struct BlockReady {
	tx: Arc<watch::Sender<usize>>,
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		self.tx.send_modify(|count| *count -= 1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn not_ready_until_all_blocks_drop() {
		let ready = Ready::new();
		assert!(ready.is_ready());

		let a = ready.register_task();
		let b = ready.register_task();
		assert!(!ready.is_ready());

		drop(a);
		assert!(!ready.is_ready());

		drop(b);
		assert!(ready.is_ready());
	}

	#[tokio::test]
	async fn when_ready_resolves_after_last_drop() {
		let ready = Ready::new();
		let block = ready.register_task();
		let ready2 = ready.clone();
		let waiter = tokio::spawn(async move { ready2.when_ready().await });
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
		assert!(!waiter.is_finished());
		drop(block);
		tokio::time::timeout(std::time::Duration::from_millis(100), waiter)
			.await
			.expect("when_ready should resolve")
			.unwrap();
	}
}
