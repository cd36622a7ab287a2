//! The data model shared by the router, pool and dispatchers (spec §3).

use std::collections::HashMap;
use std::time::Instant;

/// A matcher string following kedge's shared wildcard grammar: empty or `*`
/// matches anything, a trailing `*` is a prefix match on the literal before
/// it, anything else is an exact match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher(pub String);

impl Matcher {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	pub fn matches(&self, candidate: &str) -> bool {
		if self.0.is_empty() || self.0 == "*" {
			return true;
		}
		if let Some(prefix) = self.0.strip_suffix('*') {
			return candidate.starts_with(prefix);
		}
		self.0 == candidate
	}
}

/// An exact-or-any matcher used for authority/host (no wildcard support
/// beyond "empty means any").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityMatcher(pub Option<String>);

impl AuthorityMatcher {
	pub fn any() -> Self {
		Self(None)
	}

	pub fn exact(s: impl Into<String>) -> Self {
		Self(Some(s.into()))
	}

	pub fn matches(&self, authority: Option<&str>) -> bool {
		match &self.0 {
			None => true,
			Some(expected) => authority == Some(expected.as_str()),
		}
	}
}

/// An immutable routing rule. `service_name_matcher`/`path_matcher` play the
/// same role for gRPC/HTTP respectively, as do `authority_matcher`/
/// `host_matcher`.
#[derive(Debug, Clone)]
pub struct Route {
	pub service_name_matcher: Matcher,
	pub authority_matcher: AuthorityMatcher,
	/// Expected metadata key (already lower-cased) -> expected value.
	pub metadata_matcher: HashMap<String, String>,
	pub backend_name: String,
}

impl Route {
	pub fn new(backend_name: impl Into<String>) -> Self {
		Self {
			service_name_matcher: Matcher::new("*"),
			authority_matcher: AuthorityMatcher::any(),
			metadata_matcher: HashMap::new(),
			backend_name: backend_name.into(),
		}
	}

	pub fn with_service_matcher(mut self, matcher: impl Into<String>) -> Self {
		self.service_name_matcher = Matcher::new(matcher);
		self
	}

	pub fn with_authority_matcher(mut self, matcher: impl Into<String>) -> Self {
		self.authority_matcher = AuthorityMatcher::exact(matcher);
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata_matcher.insert(key.into().to_lowercase(), value.into());
		self
	}
}

/// A concrete `host:port` resolved from a backend's SRV name. Pure value,
/// replaced wholesale at each resolver tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	pub dial_address: String,
	pub ttl: std::time::Duration,
}

/// What to resolve for a backend. Currently only SRV is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverConfig {
	Srv { dns_name: String },
}

/// TLS / plaintext policy for a backend's connections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Security {
	#[default]
	Plaintext,
	Tls {
		insecure_skip_verify: bool,
		ca_bundle: Option<String>,
	},
}

/// Static configuration for one backend, as loaded from config.
#[derive(Debug, Clone)]
pub struct BackendConfig {
	pub name: String,
	pub resolver: ResolverConfig,
	pub security: Security,
}

/// Per-request ephemeral state: inbound metadata, deadline and cancellation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
	pub authority: Option<String>,
	/// Metadata keys are stored lower-cased.
	pub metadata: HashMap<String, String>,
	pub deadline: Option<Instant>,
}

impl CallContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
		self.authority = Some(authority.into());
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into().to_lowercase(), value.into());
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matcher_wildcard_semantics() {
		assert!(Matcher::new("*").matches("anything"));
		assert!(Matcher::new("").matches("anything"));
		assert!(Matcher::new("foo.*").matches("foo.Bar/X"));
		assert!(!Matcher::new("foo.*").matches("fo/X"));
		assert!(Matcher::new("exact").matches("exact"));
		assert!(!Matcher::new("exact").matches("exactly"));
	}

	#[test]
	fn authority_matcher_any_vs_exact() {
		assert!(AuthorityMatcher::any().matches(None));
		assert!(AuthorityMatcher::any().matches(Some("foo")));
		let exact = AuthorityMatcher::exact("foo.example.com");
		assert!(exact.matches(Some("foo.example.com")));
		assert!(!exact.matches(Some("bar.example.com")));
		assert!(!exact.matches(None));
	}
}
