//! Winch's own static configuration: the mapper rule list plus the HTTP
//! listen address, loaded the same way as kedge's config (spec §6
//! "Winch rules", `config::load` in `kedge::config`).

use std::path::Path;

use anyhow::{Context, Result};
use kedge::winch::Rule;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	listen_addr: String,
	#[serde(default)]
	rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
enum RawRule {
	Direct { key: String, kedge_url: String },
	Regexp { exp: String, cluster_group_name: String, kedge_url: String },
}

pub struct Config {
	pub listen_addr: String,
	pub rules: Vec<Rule>,
}

pub fn load(path: impl AsRef<Path>) -> Result<Config> {
	let path = path.as_ref();
	let raw_text =
		std::fs::read_to_string(path).with_context(|| format!("reading winch config {}", path.display()))?;
	let expanded = shellexpand::env(&raw_text)?.into_owned();
	let raw: RawConfig = serde_yaml::from_str(&expanded)
		.with_context(|| format!("parsing winch config {}", path.display()))?;

	let rules = raw
		.rules
		.into_iter()
		.map(|r| match r {
			RawRule::Direct { key, kedge_url } => Ok(Rule::Direct { authority: key, kedge_url }),
			RawRule::Regexp { exp, cluster_group_name, kedge_url } => {
				Rule::regexp(exp, cluster_group_name, kedge_url)
			},
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(Config { listen_addr: raw.listen_addr, rules })
}
