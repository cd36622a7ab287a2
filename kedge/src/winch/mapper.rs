//! Client-side authority→kedge-URL mapping (spec §4.7), grounded on
//! `original_source/winch/mapper.go`. The original's `NewMapper`/`single`
//! path is unfinished (`single` is never defined and `Map`'s body is
//! empty); per spec §9's resolved open question, this module implements
//! only the `StaticRoutes` path the integration tests actually exercise,
//! modeling a single-target mapper as one unconditional direct rule.

use regex::Regex;

use crate::KedgeError;

/// One winch rule. Evaluated in list order; first match wins.
#[derive(Debug, Clone)]
pub enum Rule {
	/// Exact authority match -> fixed kedge URL.
	Direct { authority: String, kedge_url: String },
	/// Regex over the authority with a named capture group substituted
	/// into `kedge_url_template` (e.g. `https://kedge-{cluster}.internal`).
	Regexp {
		pattern: Regex,
		capture_name: String,
		kedge_url_template: String,
	},
}

impl Rule {
	pub fn regexp(
		exp: impl AsRef<str>,
		capture_name: impl Into<String>,
		kedge_url_template: impl Into<String>,
	) -> anyhow::Result<Self> {
		Ok(Rule::Regexp {
			pattern: Regex::new(exp.as_ref())?,
			capture_name: capture_name.into(),
			kedge_url_template: kedge_url_template.into(),
		})
	}

	/// A single-target mapper: matches any authority, always returns the
	/// same kedge URL. The degenerate case named in spec §9.
	pub fn static_single(kedge_url: impl Into<String>) -> Self {
		Rule::Direct { authority: String::new(), kedge_url: kedge_url.into() }
	}

	fn matches_all(&self) -> bool {
		matches!(self, Rule::Direct { authority, .. } if authority.is_empty())
	}

	fn try_map(&self, authority: &str) -> Option<String> {
		match self {
			Rule::Direct { authority: expected, kedge_url } => {
				if self.matches_all() || expected == authority {
					Some(kedge_url.clone())
				} else {
					None
				}
			},
			Rule::Regexp { pattern, capture_name, kedge_url_template } => {
				let captures = pattern.captures(authority)?;
				let value = captures.name(capture_name)?.as_str();
				Some(kedge_url_template.replace(&format!("{{{capture_name}}}"), value))
			},
		}
	}
}

/// Ordered, immutable rule list (`StaticRoutes`, spec §9).
#[derive(Debug, Clone)]
pub struct Mapper {
	rules: Vec<Rule>,
}

impl Mapper {
	pub fn new(rules: Vec<Rule>) -> Self {
		Self { rules }
	}

	pub fn rules(&self) -> &[Rule] {
		&self.rules
	}

	/// Maps an outbound authority to a kedge hop URL, or `NoRoute` if no
	/// rule matches.
	pub fn map(&self, authority: &str) -> Result<String, KedgeError> {
		self
			.rules
			.iter()
			.find_map(|rule| rule.try_map(authority))
			.ok_or(KedgeError::NoRoute)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn direct_rule_exact_match() {
		let mapper = Mapper::new(vec![Rule::Direct {
			authority: "resource1.ext.example.com".into(),
			kedge_url: "https://kedge0.example.com".into(),
		}]);
		assert_eq!(
			mapper.map("resource1.ext.example.com").unwrap(),
			"https://kedge0.example.com"
		);
	}

	#[test]
	fn regexp_rule_substitutes_named_capture() {
		let mapper = Mapper::new(vec![Rule::regexp(
			r"^.*\.(?P<cluster>[a-z0-9-]+)\.internal\.example\.com$",
			"cluster",
			"https://kedge-{cluster}.internal",
		)
		.unwrap()]);
		assert_eq!(
			mapper.map("service1.ab1-prod.internal.example.com").unwrap(),
			"https://kedge-ab1-prod.internal"
		);
	}

	#[test]
	fn no_match_yields_no_route() {
		let mapper = Mapper::new(vec![Rule::Direct {
			authority: "known.example.com".into(),
			kedge_url: "https://kedge0.example.com".into(),
		}]);
		assert!(matches!(mapper.map("unknown.example.com"), Err(KedgeError::NoRoute)));
	}

	#[test]
	fn first_rule_wins_in_order() {
		let mapper = Mapper::new(vec![
			Rule::regexp(r"^.*\.(?P<cluster>[a-z0-9-]+)\.internal\.example\.com$", "cluster", "https://hop0-{cluster}")
				.unwrap(),
			Rule::regexp(r"^.*\.(?P<cluster>[a-z0-9-]+)\.internal\.example\.com$", "cluster", "https://hop2-{cluster}")
				.unwrap(),
		]);
		assert_eq!(mapper.map("service1.ab1-prod.internal.example.com").unwrap(), "https://hop0-ab1-prod");
	}

	#[test]
	fn static_single_matches_every_authority() {
		let mapper = Mapper::new(vec![Rule::static_single("https://only-kedge.example.com")]);
		assert_eq!(mapper.map("anything.at.all").unwrap(), "https://only-kedge.example.com");
	}
}
