//! Listens for process shutdown signals (`SIGINT`/`SIGTERM` on unix,
//! Ctrl-C on windows) and exposes a single future that resolves once one
//! arrives.

use tracing::info;

/// Resolves once a shutdown signal has been received.
pub struct Shutdown {
	rx: tokio::sync::oneshot::Receiver<()>,
}

impl Shutdown {
	pub async fn signaled(self) {
		let _ = self.rx.await;
	}
}

/// Spawns the signal-listening task and returns a [`Shutdown`] future.
pub fn shutdown() -> Shutdown {
	let (tx, rx) = tokio::sync::oneshot::channel();
	tokio::spawn(async move {
		wait_for_signal().await;
		info!("received shutdown signal");
		let _ = tx.send(());
	});
	Shutdown { rx }
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
	let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
	tokio::select! {
		_ = sigint.recv() => {},
		_ = sigterm.recv() => {},
	}
}

#[cfg(windows)]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resolves_once_signaled() {
		let (tx, rx) = tokio::sync::oneshot::channel();
		let shutdown = Shutdown { rx };
		tx.send(()).unwrap();
		tokio::time::timeout(std::time::Duration::from_millis(100), shutdown.signaled())
			.await
			.expect("shutdown should resolve promptly once signaled");
	}
}
