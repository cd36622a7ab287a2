//! End-to-end winch config -> mapper -> PAC scenario (spec §8 "winch with a
//! direct rule and a regexp rule" and "winch with no matching rule").

use kedge::winch::{Mapper, pac};

#[test]
fn direct_and_regexp_rules_resolve_and_no_match_yields_error() {
	let config_yaml = r#"
listen:
  grpc_tls_addr: "0.0.0.0:8444"
  http_tls_addr: "0.0.0.0:8443"
  http_addr: "0.0.0.0:8080"
  tls_cert_path: "/etc/kedge/tls.crt"
  tls_key_path: "/etc/kedge/tls.key"
winch_rules:
  - direct:
      key: resource1.ext.example.com
      kedge_url: https://kedge0.example.com
  - regexp:
      exp: "^.*\\.(?P<cluster>[a-z0-9-]+)\\.internal\\.example\\.com$"
      cluster_group_name: cluster
      kedge_url: "https://kedge-{cluster}.internal"
"#;
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("kedge.yaml");
	std::fs::write(&path, config_yaml).unwrap();

	let cfg = kedge::config::load(&path).unwrap();
	let mapper = Mapper::new(cfg.winch_rules);

	assert_eq!(mapper.map("resource1.ext.example.com").unwrap(), "https://kedge0.example.com");
	assert_eq!(
		mapper.map("service1.ab1-prod.internal.example.com").unwrap(),
		"https://kedge-ab1-prod.internal"
	);
	assert!(mapper.map("unrelated.example.org").is_err());

	let rendered = pac::generate("winch.example.com:8070", &mapper).unwrap();
	assert!(rendered.contains("dnsDomainIs(host, \"resource1.ext.example.com\")"));
	assert!(rendered.contains("shExpMatch(host,"));
	assert!(rendered.contains("PROXY winch.example.com:8070; DIRECT"));
}
