//! Directive mini-language used to bootstrap the registry.
//!
//! One directive per line: a service name followed by options written as
//! `-key:value` or `/key:value`. Tokens are separated by whitespace. `;`
//! starts a comment anywhere, `//` starts one at the beginning of a token,
//! and `/* ... */` comments may span lines.
//!
//! ```text
//! ; start two services
//! Heartbeat -interval-ms:250   // quick pulse
//! Echo /greeting:hello /* inline */ -mode:ro
//! ```

use crate::ConfigProperties;

/// One parsed directive line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
	pub service: String,
	pub options: ConfigProperties,
}

/// Parses a single directive line. Returns `None` for blank or comment-only
/// lines.
pub fn parse_line(line: &str) -> Option<Directive> {
	let text = strip_comments(line);
	let mut tokens = text.split_whitespace();
	let service = tokens.next()?.to_string();
	let mut options = ConfigProperties::new();
	for token in tokens {
		match parse_option(token) {
			Some((key, value)) => {
				tracing::trace!(%service, key, value, "host.directive.option");
				options.set(key, value);
			}
			None => tracing::debug!(%service, token, "host.directive.ignored_token"),
		}
	}
	Some(Directive { service, options })
}

/// Parses a whole script, one directive per non-empty line.
pub fn parse_script(text: &str) -> Vec<Directive> {
	strip_comments(text).lines().filter_map(parse_line).collect()
}

fn parse_option(token: &str) -> Option<(&str, &str)> {
	let body = token.strip_prefix('-').or_else(|| token.strip_prefix('/'))?;
	let (key, value) = body.split_once(':')?;
	(!key.is_empty()).then_some((key, value))
}

/// Removes comments, keeping line breaks so line structure survives.
pub fn strip_comments(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut rest = text;
	let mut token_start = true;
	let mut in_block = false;

	while let Some(c) = rest.chars().next() {
		if in_block {
			if let Some(after) = rest.strip_prefix("*/") {
				in_block = false;
				token_start = true;
				out.push(' ');
				rest = after;
				continue;
			}
			if c == '\n' {
				out.push('\n');
			}
			rest = &rest[c.len_utf8()..];
			continue;
		}

		if c == ';' || (token_start && rest.starts_with("//")) {
			let end = rest.find('\n').unwrap_or(rest.len());
			rest = &rest[end..];
			continue;
		}
		if token_start && rest.starts_with("/*") {
			in_block = true;
			rest = &rest[2..];
			continue;
		}

		token_start = c.is_whitespace();
		out.push(c);
		rest = &rest[c.len_utf8()..];
	}
	out
}
