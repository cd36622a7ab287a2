//! PAC (Proxy Auto-Configuration) JavaScript generation, grounded on
//! `original_source/winch/pac.go`'s `pacTemplate`. The original renders it
//! with Go's `text/template`; this reproduces the same output using
//! `minijinja`, the templating crate the teacher already vendors.

use minijinja::{Environment, context};

use super::mapper::{Mapper, Rule};

const PAC_TEMPLATE: &str = r#"function FindProxyForURL(url, host) {
    var proxy = "PROXY {{ winch_host_port }}; DIRECT";
    var direct = "DIRECT";

    // no proxy for local hosts without domain:
    if (isPlainHostName(host)) return direct;

    // We only proxy http, not even https.
    if (
        url.substring(0, 4) == "ftp:" ||
        url.substring(0, 6) == "rsync:" ||
        url.substring(0, 6) == "https:"
    )
    return direct;

    {% for rule in direct_rules -%}
    if (dnsDomainIs(host, "{{ rule.authority }}")) {
        return proxy;
    }
    {% endfor -%}
    {% for rule in regexp_rules -%}
    if (shExpMatch(host, "{{ rule.pattern }}")) {
        return proxy;
    }
    {% endfor -%}

    return direct;
}"#;

/// Renders the PAC file for the given winch rule list.
pub fn generate(winch_host_port: &str, mapper: &Mapper) -> anyhow::Result<String> {
	#[derive(serde::Serialize)]
	struct DirectEntry<'a> {
		authority: &'a str,
	}
	#[derive(serde::Serialize)]
	struct RegexpEntry<'a> {
		pattern: &'a str,
	}

	let mut direct_rules = Vec::new();
	let mut regexp_rules = Vec::new();
	for rule in mapper.rules() {
		match rule {
			Rule::Direct { authority, .. } if !authority.is_empty() => {
				direct_rules.push(DirectEntry { authority });
			},
			Rule::Direct { .. } => {},
			Rule::Regexp { pattern, .. } => {
				regexp_rules.push(RegexpEntry { pattern: pattern.as_str() });
			},
		}
	}

	let mut env = Environment::new();
	env.add_template("pac", PAC_TEMPLATE)?;
	let tmpl = env.get_template("pac")?;
	let rendered = tmpl.render(context! {
		winch_host_port => winch_host_port,
		direct_rules => direct_rules,
		regexp_rules => regexp_rules,
	})?;
	Ok(rendered)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_direct_and_regexp_rules() {
		let mapper = Mapper::new(vec![
			Rule::Direct {
				authority: "resource1.ext.example.com".into(),
				kedge_url: "https://kedge0.example.com".into(),
			},
			Rule::regexp(r"^.*\.(?P<cluster>[a-z0-9-]+)\.internal\.example\.com$", "cluster", "https://kedge-{cluster}.internal").unwrap(),
		]);
		let pac = generate("winch.local:9999", &mapper).unwrap();
		assert!(pac.contains("FindProxyForURL"));
		assert!(pac.contains("PROXY winch.local:9999; DIRECT"));
		assert!(pac.contains("dnsDomainIs(host, \"resource1.ext.example.com\")"));
		assert!(pac.contains("shExpMatch(host,"));
	}
}
