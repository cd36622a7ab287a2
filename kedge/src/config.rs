//! Static configuration loading (spec §6), grounded on the teacher's
//! `NormalizedLocalConfig::from` pattern: a `serde`-deserialized on-disk
//! shape with `deny_unknown_fields`, env-var expansion via `shellexpand`,
//! converted once at startup into the internal types used by every
//! component thereafter. No process-wide mutable state (spec §9).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::{BackendConfig, ResolverConfig, Route, Security};
use crate::winch::mapper::Rule as WinchRule;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	#[serde(default)]
	backends: Vec<RawBackend>,
	#[serde(default)]
	routes: Vec<RawRoute>,
	#[serde(default)]
	winch_rules: Vec<RawWinchRule>,
	listen: RawListen,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawListen {
	grpc_tls_addr: String,
	http_tls_addr: String,
	http_addr: String,
	#[serde(default)]
	admin_addr: Option<String>,
	tls_cert_path: String,
	tls_key_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackend {
	name: String,
	resolver: RawResolver,
	#[serde(default)]
	security: RawSecurity,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResolver {
	srv: RawSrv,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSrv {
	dns_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawSecurity {
	#[serde(default)]
	tls: bool,
	#[serde(default)]
	insecure_skip_verify: bool,
	#[serde(default)]
	ca_bundle: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoute {
	backend_name: String,
	#[serde(default)]
	service_name_matcher: Option<String>,
	#[serde(default)]
	path_matcher: Option<String>,
	#[serde(default)]
	authority_matcher: Option<String>,
	#[serde(default)]
	host_matcher: Option<String>,
	#[serde(default)]
	metadata_matcher: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
enum RawWinchRule {
	Direct { key: String, kedge_url: String },
	Regexp { exp: String, cluster_group_name: String, kedge_url: String },
}

/// Top-level static configuration, loaded once at startup and threaded
/// through every component by `Arc` (spec §3 `Config`).
#[derive(Debug)]
pub struct Config {
	pub backends: Vec<BackendConfig>,
	pub routes: Vec<Route>,
	pub http_routes: Vec<Route>,
	pub winch_rules: Vec<WinchRule>,
	pub listen: Listen,
}

#[derive(Debug)]
pub struct Listen {
	pub grpc_tls_addr: String,
	pub http_tls_addr: String,
	pub http_addr: String,
	pub admin_addr: Option<String>,
	pub tls_cert_path: String,
	pub tls_key_path: String,
}

/// Loads and validates a YAML config file, expanding `$VARS` in string
/// values via `shellexpand` the way the teacher's loader does.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
	let path = path.as_ref();
	let raw_text = std::fs::read_to_string(path)
		.with_context(|| format!("reading config file {}", path.display()))?;
	let expanded = shellexpand::env(&raw_text)
		.with_context(|| "expanding environment variables in config")?
		.into_owned();
	let raw: RawConfig = serde_yaml::from_str(&expanded)
		.with_context(|| format!("parsing config file {}", path.display()))?;

	let backends = raw
		.backends
		.into_iter()
		.map(|b| BackendConfig {
			name: b.name,
			resolver: ResolverConfig::Srv { dns_name: b.resolver.srv.dns_name },
			security: if b.security.tls {
				Security::Tls {
					insecure_skip_verify: b.security.insecure_skip_verify,
					ca_bundle: b.security.ca_bundle,
				}
			} else {
				Security::Plaintext
			},
		})
		.collect();

	let mut routes = Vec::new();
	let mut http_routes = Vec::new();
	for r in raw.routes {
		let is_http = r.path_matcher.is_some() || r.host_matcher.is_some();
		let service_or_path = r
			.service_name_matcher
			.or(r.path_matcher)
			.unwrap_or_else(|| "*".to_string());
		let authority_or_host = r.authority_matcher.or(r.host_matcher);
		let mut route = Route::new(r.backend_name).with_service_matcher(service_or_path);
		if let Some(authority) = authority_or_host {
			route = route.with_authority_matcher(authority);
		}
		for (k, v) in r.metadata_matcher {
			route = route.with_metadata(k, v);
		}
		if is_http {
			http_routes.push(route);
		} else {
			routes.push(route);
		}
	}

	let winch_rules = raw
		.winch_rules
		.into_iter()
		.map(|r| match r {
			RawWinchRule::Direct { key, kedge_url } => WinchRule::Direct { authority: key, kedge_url },
			RawWinchRule::Regexp { exp, cluster_group_name, kedge_url } => {
				WinchRule::regexp(exp, cluster_group_name, kedge_url)
			},
		})
		.collect::<Result<Vec<_>>>()?;

	let listen = Listen {
		grpc_tls_addr: raw.listen.grpc_tls_addr,
		http_tls_addr: raw.listen.http_tls_addr,
		http_addr: raw.listen.http_addr,
		admin_addr: raw.listen.admin_addr,
		tls_cert_path: raw.listen.tls_cert_path,
		tls_key_path: raw.listen.tls_key_path,
	};

	Ok(Config { backends, routes, http_routes, winch_rules, listen })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loads_minimal_config() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kedge.yaml");
		std::fs::write(
			&path,
			r#"
listen:
  grpc_tls_addr: "0.0.0.0:8444"
  http_tls_addr: "0.0.0.0:8443"
  http_addr: "0.0.0.0:8080"
  tls_cert_path: "/etc/kedge/tls.crt"
  tls_key_path: "/etc/kedge/tls.key"
backends:
  - name: non_secure
    resolver:
      srv:
        dns_name: "_grpc._tcp.nonsecure.backends.test.local"
routes:
  - backend_name: non_secure
    service_name_matcher: "hand_rolled.non_secure.*"
winch_rules:
  - direct:
      key: resource1.ext.example.com
      kedge_url: https://kedge0.example.com
"#,
		)
		.unwrap();

		let config = load(&path).unwrap();
		assert_eq!(config.backends.len(), 1);
		assert_eq!(config.routes.len(), 1);
		assert_eq!(config.winch_rules.len(), 1);
		assert_eq!(config.listen.grpc_tls_addr, "0.0.0.0:8444");
	}

	#[test]
	fn rejects_unknown_fields() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kedge.yaml");
		std::fs::write(
			&path,
			r#"
listen:
  grpc_tls_addr: "0.0.0.0:8444"
  http_tls_addr: "0.0.0.0:8443"
  http_addr: "0.0.0.0:8080"
  tls_cert_path: "/etc/kedge/tls.crt"
  tls_key_path: "/etc/kedge/tls.key"
bogus_field: true
"#,
		)
		.unwrap();
		assert!(load(&path).is_err());
	}
}
