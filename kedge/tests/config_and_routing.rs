//! End-to-end config-load -> router-decision scenarios (spec §8), covering
//! the "common prefix split by authority" case and the unknown-route/
//! unknown-backend error paths without requiring a live backend connection.

use kedge::KedgeError;
use kedge::types::CallContext;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("kedge.yaml");
	std::fs::write(&path, contents).unwrap();
	(dir, path)
}

#[test]
fn loads_config_and_splits_routes_by_authority() {
	let (_dir, path) = write_config(
		r#"
listen:
  grpc_tls_addr: "0.0.0.0:8444"
  http_tls_addr: "0.0.0.0:8443"
  http_addr: "0.0.0.0:8080"
  tls_cert_path: "/etc/kedge/tls.crt"
  tls_key_path: "/etc/kedge/tls.key"
backends:
  - name: secure
    resolver:
      srv:
        dns_name: "_grpc._tcp.secure.backends.test.local"
  - name: non_secure
    resolver:
      srv:
        dns_name: "_grpc._tcp.nonsecure.backends.test.local"
routes:
  - backend_name: secure
    service_name_matcher: "hand_rolled.secure.*"
    authority_matcher: "secure.ext.test.local"
  - backend_name: non_secure
    service_name_matcher: "hand_rolled.secure.*"
    authority_matcher: "non_secure.ext.test.local"
"#,
	);

	let cfg = kedge::config::load(&path).unwrap();
	let router = kedge::router::Router::new(cfg.routes);

	let ctx = CallContext { authority: Some("secure.ext.test.local".into()), ..CallContext::new() };
	assert_eq!(router.route(&ctx, "hand_rolled.secure.method").unwrap(), "secure");

	let ctx = CallContext { authority: Some("non_secure.ext.test.local".into()), ..CallContext::new() };
	assert_eq!(router.route(&ctx, "hand_rolled.secure.method").unwrap(), "non_secure");
}

#[tokio::test]
async fn unknown_route_is_reported_distinctly_from_unknown_backend() {
	let (_dir, path) = write_config(
		r#"
listen:
  grpc_tls_addr: "0.0.0.0:8444"
  http_tls_addr: "0.0.0.0:8443"
  http_addr: "0.0.0.0:8080"
  tls_cert_path: "/etc/kedge/tls.crt"
  tls_key_path: "/etc/kedge/tls.key"
backends:
  - name: known
    resolver:
      srv:
        dns_name: "_grpc._tcp.known.backends.test.local"
routes:
  - backend_name: known
    service_name_matcher: "svc.Known.*"
"#,
	);

	let cfg = kedge::config::load(&path).unwrap();
	let router = kedge::router::Router::new(cfg.routes);
	let pool = kedge::pool::Pool::new(cfg.backends).unwrap();

	let ctx = CallContext::new();
	let err = router.route(&ctx, "svc.Unmatched.Method").unwrap_err();
	assert!(matches!(err, KedgeError::UnknownRoute));

	let backend_name = router.route(&ctx, "svc.Known.Method").unwrap();
	assert_eq!(backend_name, "known");
	assert!(pool.get(backend_name).is_ok());
	assert!(matches!(pool.get("missing"), Err(KedgeError::UnknownBackend)));
	pool.close().await;
}
