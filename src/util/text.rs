//! This module provides facilities for comparing and picking apart plugin filenames.

use std::sync::OnceLock;

use regex::Regex;

/// The extension appended to a plugin's filename when it is ghosted.
pub const GHOST_EXTENSION: &str = ".ghost";

/// Folds a filename for case-insensitive identity.
/// Every filename comparison in this library goes through this one helper.
pub fn normalize_filename(name: &str) -> String {
	name.to_lowercase()
}

/// Compares two filenames while ignoring case.
pub fn iequals(lhs: &str, rhs: &str) -> bool {
	normalize_filename(lhs) == normalize_filename(rhs)
}

/// Trims a trailing '.ghost' extension, if one is present.
pub fn trim_ghost_extension(name: &str) -> &str {
	let folded = normalize_filename(name);

	match folded.ends_with(GHOST_EXTENSION) {
		true => &name[..name.len() - GHOST_EXTENSION.len()],
		false => name,
	}
}

/// Returns a plugin filename's folded basename, with its extension stripped.
/// A '.ghost' suffix is trimmed before the real extension, so 'A.esp.ghost' and 'a.ESP' agree.
pub fn folded_basename(name: &str) -> String {
	let trimmed = trim_ghost_extension(name);

	let stem = match trimmed.rfind('.') {
		Some(pos) => &trimmed[..pos],
		None => trimmed,
	};

	normalize_filename(stem)
}

/// Matches timestamps that use slashes as date separators.
const DATE_PATTERN: &str = r"(\d{1,2}/\d{1,2}/\d{1,4} \d{1,2}:\d{1,2}:\d{1,2})";

/// Matches dotted version strings, optionally carrying alphanumeric suffixes.
const DOTTED_PATTERN: &str = r"(\d+(?:\.\d+)+(?:[-._:]?[A-Za-z0-9]+)*)";

/// Extracts a version string from free text, like a plugin header's description.
/// The patterns are tried in order of how specific they are, and the first capture wins.
pub fn extract_version(text: &str) -> Option<String> {
	static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

	let patterns = PATTERNS.get_or_init(|| {
		vec![
			Regex::new(&format!("(?i){DATE_PATTERN}")).unwrap(),
			Regex::new(&format!(r"(?i)version:?\s{DOTTED_PATTERN}")).unwrap(),
			Regex::new(&format!(r"(?i)(?:^|v|\s){DOTTED_PATTERN}")).unwrap(),
			Regex::new(r"(?i)(?:^|v|version:\s*)(\d+)").unwrap(),
		]
	});

	for pattern in patterns.iter() {
		for captures in pattern.captures_iter(text) {
			let Some(capture) = captures.get(1) else { continue; };

			// A version followed by a comma is usually part of a list, not a version.
			if text[capture.end()..].starts_with(',') { continue; }

			let version = capture.as_str().trim();
			if !version.is_empty() { return Some(version.to_owned()); }
		}
	}

	None
}
