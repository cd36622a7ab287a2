//! Deterministic first-match routing (spec §4.4), ported from the original
//! `grpc/director/router/router.go`: a fully-qualified gRPC method or an
//! HTTP host/path pair is matched against an ordered, immutable rule list.

use crate::KedgeError;
use crate::types::{CallContext, Route};

/// Immutable once constructed; safely shared by every request task (spec
/// §5 "Router rule list").
#[derive(Debug, Clone)]
pub struct Router {
	routes: Vec<Route>,
}

impl Router {
	pub fn new(routes: Vec<Route>) -> Self {
		Self { routes }
	}

	/// Matches a gRPC call: `full_method_name` is the path-form method name
	/// (e.g. `/foo.Bar/Method`, leading slash optional).
	pub fn route(&self, ctx: &CallContext, full_method_name: &str) -> Result<&str, KedgeError> {
		let method = full_method_name.strip_prefix('/').unwrap_or(full_method_name);
		self.first_match(ctx, method)
	}

	/// Matches an HTTP request: `host` plays the authority role, `path`
	/// plays the service-name role; wildcard semantics are identical.
	pub fn route_http(&self, ctx: &CallContext, path: &str) -> Result<&str, KedgeError> {
		self.first_match(ctx, path)
	}

	fn first_match(&self, ctx: &CallContext, subject: &str) -> Result<&str, KedgeError> {
		for route in &self.routes {
			if !route.service_name_matcher.matches(subject) {
				continue;
			}
			if !route.authority_matcher.matches(ctx.authority.as_deref()) {
				continue;
			}
			if !metadata_matches(&ctx.metadata, &route.metadata_matcher) {
				continue;
			}
			return Ok(&route.backend_name);
		}
		Err(KedgeError::UnknownRoute)
	}
}

fn metadata_matches(
	actual: &std::collections::HashMap<String, String>,
	expected: &std::collections::HashMap<String, String>,
) -> bool {
	expected.iter().all(|(k, v)| actual.get(k).is_some_and(|av| av == v))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn router_with(routes: Vec<Route>) -> Router {
		Router::new(routes)
	}

	#[test]
	fn first_rule_wins() {
		let router = router_with(vec![
			Route::new("a").with_service_matcher("foo.*"),
			Route::new("b").with_service_matcher("foo.*"),
		]);
		let ctx = CallContext::new();
		assert_eq!(router.route(&ctx, "/foo.Bar/X").unwrap(), "a");
	}

	#[test]
	fn wildcard_matches_everything() {
		let router = router_with(vec![Route::new("catchall")]);
		let ctx = CallContext::new();
		assert_eq!(router.route(&ctx, "/anything/Method").unwrap(), "catchall");
	}

	#[test]
	fn trailing_wildcard_prefix_match() {
		let router = router_with(vec![Route::new("a").with_service_matcher("foo.*")]);
		let ctx = CallContext::new();
		assert_eq!(router.route(&ctx, "foo.Bar/X").unwrap(), "a");
		assert!(matches!(router.route(&ctx, "fo/X"), Err(KedgeError::UnknownRoute)));
	}

	#[test]
	fn authority_rejects_missing_header_when_required() {
		let router = router_with(vec![Route::new("a").with_authority_matcher("secure.ext.test.local")]);
		let ctx = CallContext::new();
		assert!(matches!(router.route(&ctx, "/x/Y"), Err(KedgeError::UnknownRoute)));

		let ctx = CallContext::new().with_authority("secure.ext.test.local");
		assert_eq!(router.route(&ctx, "/x/Y").unwrap(), "a");
	}

	#[test]
	fn metadata_keys_case_insensitive_values_case_sensitive() {
		let router = router_with(vec![Route::new("a").with_metadata("X-Api-Key", "secret")]);
		let ctx = CallContext::new().with_metadata("x-api-key", "secret");
		assert_eq!(router.route(&ctx, "/x/Y").unwrap(), "a");

		let ctx = CallContext::new().with_metadata("x-api-key", "Secret");
		assert!(matches!(router.route(&ctx, "/x/Y"), Err(KedgeError::UnknownRoute)));
	}

	#[test]
	fn no_rule_matches_yields_unknown_route() {
		let router = router_with(vec![]);
		let ctx = CallContext::new();
		assert!(matches!(router.route(&ctx, "/x/Y"), Err(KedgeError::UnknownRoute)));
	}

	#[test]
	fn common_prefix_split_by_authority() {
		let router = router_with(vec![
			Route::new("secure")
				.with_service_matcher("hand_rolled.common.*")
				.with_authority_matcher("secure.ext.test.local"),
			Route::new("non_secure")
				.with_service_matcher("hand_rolled.common.*")
				.with_authority_matcher("non_secure.ext.test.local"),
		]);
		let ctx = CallContext::new().with_authority("secure.ext.test.local");
		assert_eq!(router.route(&ctx, "/hand_rolled.common.Svc/M").unwrap(), "secure");
		let ctx = CallContext::new().with_authority("non_secure.ext.test.local");
		assert_eq!(router.route(&ctx, "/hand_rolled.common.Svc/M").unwrap(), "non_secure");
	}
}
