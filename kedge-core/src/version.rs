//! Build/version metadata reported by the admin surface and startup log
//! line. Simplified relative to the teacher's build-script-injected
//! `AGENTGATEWAY_BUILD_*` env vars: this crate has no build script, so it
//! falls back to what cargo gives every crate for free.

use std::fmt;

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
}

impl BuildInfo {
	pub const fn new() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
			rust_version: env!("CARGO_PKG_RUST_VERSION"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "kedge/{} (rustc {})", self.version, self.rust_version)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_version() {
		let info = BuildInfo::new();
		assert!(format!("{info}").contains(info.version));
	}
}
