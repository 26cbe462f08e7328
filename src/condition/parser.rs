//! This module parses condition strings into an evaluatable tree.
//!
//! The grammar is whitespace-insensitive with case-sensitive keywords:
//!
//! ```text
//! expr      := term ( "or" term )*
//! term      := factor ( "and" factor )*
//! factor    := "not"? ( "(" expr ")" | predicate )
//! predicate := file | active | many | many_active | checksum | version
//! ```
//!
//! Path safety and regex validity are checked here, at parse time, so both
//! evaluation modes reject the same strings.

use std::path::PathBuf;

use regex::{Regex, RegexBuilder};

use crate::prelude::*;

/// The deepest a condition is allowed to nest.
const MAX_DEPTH: usize = 64;

/// Characters that mark a quoted argument as a regex rather than a literal path.
/// These are never valid in a real filename, but all have meaning in regexes.
const REGEX_MARKERS: [char; 5] = [':', '\\', '*', '?', '|'];

/// Characters that may not appear in a literal file path argument.
const INVALID_PATH_CHARS: [char; 6] = [':', '*', '?', '<', '>', '|'];

/// A parsed condition expression.
#[derive(Clone, Debug)]
pub enum Expr {
	Or(Vec<Expr>),
	And(Vec<Expr>),
	Not(Box<Expr>),
	Predicate(Predicate),
}

/// A quoted argument that is either a literal path or a filename regex.
#[derive(Clone, Debug)]
pub enum PathArg {
	Exact(String),
	Pattern(DirPattern),
}

/// A filename regex anchored under a literal parent directory.
#[derive(Clone, Debug)]
pub struct DirPattern {
	/// The literal directory to scan, relative to the data directory.
	pub parent: PathBuf,

	/// The compiled filename pattern.
	pub pattern: Regex,
}

/// One of the condition language's built-in predicates.
#[derive(Clone, Debug)]
pub enum Predicate {
	/// file("..."): the named file, plugin, or any regex match exists.
	FilePresent(PathArg),

	/// active("..."): the named plugin, or any regex match, is active.
	PluginActive(PathArg),

	/// many("..."): at least two files match the regex.
	ManyPresent(DirPattern),

	/// many_active("..."): at least two matching plugins are active.
	ManyActive(DirPattern),

	/// checksum("...", hex): the file's CRC-32 equals the given value.
	ChecksumMatches { path: String, crc: u32 },

	/// version("...", "...", cmp): compare the file's version against the given one.
	VersionCompare {
		path: String,
		version: String,
		comparator: Comparator,
	},
}

/// A comparison operator accepted by the version predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparator {
	Equal,
	NotEqual,
	LessThan,
	GreaterThan,
	AtMost,
	AtLeast,
}

impl Comparator {
	/// Applies this comparator to an already-computed ordering.
	pub fn matches(&self, order: std::cmp::Ordering) -> bool {
		use std::cmp::Ordering::*;

		match self {
			Comparator::Equal => order == Equal,
			Comparator::NotEqual => order != Equal,
			Comparator::LessThan => order == Less,
			Comparator::GreaterThan => order == Greater,
			Comparator::AtMost => order != Greater,
			Comparator::AtLeast => order != Less,
		}
	}
}

/// Parses a condition string.
/// An empty (or all-whitespace) condition parses to *None* and means "always true".
pub fn parse_condition(text: &str) -> AppResult<Option<Expr>> {
	if text.trim().is_empty() { return Ok(None); }

	let mut parser = Parser { text, pos: 0 };

	let expr = parser.parse_expr(0)?;
	parser.skip_whitespace();

	if parser.pos != parser.text.len() {
		return Err(parser.error("trailing input after the expression"));
	}

	Ok(Some(expr))
}

/// Checks whether a quoted argument should be interpreted as a regex.
fn is_regex_argument(text: &str) -> bool {
	text.contains(REGEX_MARKERS)
}

/// Rejects paths that walk up out of the data directory.
/// A '..' component directly following another '..' is the tell.
pub(crate) fn validate_path(path: &str) -> AppResult<()> {
	let mut previous = None;

	for component in path.split(['/', '\\']) {
		if component == "." || component.is_empty() { continue; }

		if component == ".." && previous == Some("..") {
			return Err(AppError::ConditionSyntax(format!("invalid file path: {path}")));
		}

		previous = Some(component);
	}

	Ok(())
}

/// Splits a regex argument at its final slash into a literal parent directory
/// and a compiled filename pattern. Only the filename may be a regex; letting
/// every component match would make directory scans unbounded.
pub(crate) fn split_regex(text: &str) -> AppResult<DirPattern> {
	let (parent, filename) = match text.rfind('/') {
		Some(pos) => (&text[..pos], &text[pos + 1..]),
		None => ("", text),
	};

	validate_path(parent)?;

	let pattern = RegexBuilder::new(&format!("^(?:{filename})$"))
		.case_insensitive(true)
		.build()
		.map_err(|e| AppError::ConditionSyntax(format!("invalid regex '{filename}': {e}")))?;

	Ok(DirPattern { parent: PathBuf::from(parent), pattern })
}

struct Parser<'a> {
	text: &'a str,
	pos: usize,
}

impl<'a> Parser<'a> {
	fn error(&self, details: impl AsRef<str>) -> AppError {
		AppError::ConditionSyntax(format!(
			"failed to parse condition \"{}\": {} at offset {}",
			self.text,
			details.as_ref(),
			self.pos,
		))
	}

	fn rest(&self) -> &'a str {
		&self.text[self.pos..]
	}

	fn skip_whitespace(&mut self) {
		let trimmed = self.rest().trim_start();
		self.pos = self.text.len() - trimmed.len();
	}

	/// Consumes a literal if it is next in the input.
	fn eat(&mut self, literal: &str) -> bool {
		match self.rest().starts_with(literal) {
			true => {
				self.pos += literal.len();
				true
			}
			false => false,
		}
	}

	/// Consumes a keyword, requiring it to end at a word boundary.
	fn eat_keyword(&mut self, keyword: &str) -> bool {
		let rest = self.rest();

		let followed_by_word = rest.len() > keyword.len()
			&& rest[keyword.len()..]
				.chars()
				.next()
				.is_some_and(|c| c.is_alphanumeric() || c == '_');

		match rest.starts_with(keyword) && !followed_by_word {
			true => {
				self.pos += keyword.len();
				true
			}
			false => false,
		}
	}

	fn parse_expr(&mut self, depth: usize) -> AppResult<Expr> {
		let mut terms = vec![self.parse_term(depth)?];

		loop {
			self.skip_whitespace();
			if !self.eat_keyword("or") { break; }

			terms.push(self.parse_term(depth)?);
		}

		match terms.len() {
			1 => Ok(terms.pop().unwrap()),
			_ => Ok(Expr::Or(terms)),
		}
	}

	fn parse_term(&mut self, depth: usize) -> AppResult<Expr> {
		let mut factors = vec![self.parse_factor(depth)?];

		loop {
			self.skip_whitespace();
			if !self.eat_keyword("and") { break; }

			factors.push(self.parse_factor(depth)?);
		}

		match factors.len() {
			1 => Ok(factors.pop().unwrap()),
			_ => Ok(Expr::And(factors)),
		}
	}

	fn parse_factor(&mut self, depth: usize) -> AppResult<Expr> {
		if depth >= MAX_DEPTH {
			return Err(self.error("condition is nested too deeply"));
		}

		self.skip_whitespace();

		if self.eat_keyword("not") {
			let inner = self.parse_factor(depth + 1)?;
			return Ok(Expr::Not(Box::new(inner)));
		}

		if self.eat("(") {
			let inner = self.parse_expr(depth + 1)?;

			self.skip_whitespace();
			if !self.eat(")") {
				return Err(self.error("expected ')'"));
			}

			return Ok(inner);
		}

		Ok(Expr::Predicate(self.parse_predicate()?))
	}

	fn parse_predicate(&mut self) -> AppResult<Predicate> {
		let name: String = self.rest()
			.chars()
			.take_while(|c| c.is_ascii_lowercase() || *c == '_')
			.collect();

		self.pos += name.len();

		self.skip_whitespace();
		if !self.eat("(") {
			return Err(self.error("expected '(' after a predicate name"));
		}

		let predicate = match name.as_str() {
			"file" => Predicate::FilePresent(self.parse_path_argument()?),
			"active" => Predicate::PluginActive(self.parse_path_argument()?),
			"many" => Predicate::ManyPresent(split_regex(&self.parse_quoted()?)?),
			"many_active" => Predicate::ManyActive(split_regex(&self.parse_quoted()?)?),

			"checksum" => {
				let path = self.parse_literal_path()?;
				self.expect_comma()?;
				let crc = self.parse_hex()?;

				Predicate::ChecksumMatches { path, crc }
			}

			"version" => {
				let path = self.parse_literal_path()?;
				self.expect_comma()?;
				let version = self.parse_quoted()?;
				self.expect_comma()?;
				let comparator = self.parse_comparator()?;

				Predicate::VersionCompare { path, version, comparator }
			}

			other => return Err(self.error(format!("unknown predicate '{other}'"))),
		};

		self.skip_whitespace();
		if !self.eat(")") {
			return Err(self.error("expected ')'"));
		}

		Ok(predicate)
	}

	/// Parses a file/active argument, deciding between a literal path and a regex.
	fn parse_path_argument(&mut self) -> AppResult<PathArg> {
		let text = self.parse_quoted()?;

		match is_regex_argument(&text) {
			true => Ok(PathArg::Pattern(split_regex(&text)?)),
			false => {
				validate_path(&text)?;
				Ok(PathArg::Exact(text))
			}
		}
	}

	/// Parses a quoted path that must be literal, like checksum and version take.
	fn parse_literal_path(&mut self) -> AppResult<String> {
		let text = self.parse_quoted()?;

		if text.contains(INVALID_PATH_CHARS) {
			return Err(self.error(format!("'{text}' is not a valid file path")));
		}

		validate_path(&text)?;
		Ok(text)
	}

	fn parse_quoted(&mut self) -> AppResult<String> {
		self.skip_whitespace();

		if !self.eat("\"") {
			return Err(self.error("expected a quoted string"));
		}

		let Some(length) = self.rest().find('"') else {
			return Err(self.error("unterminated quoted string"));
		};

		if length == 0 {
			return Err(self.error("quoted string is empty"));
		}

		let content = self.rest()[..length].to_owned();
		self.pos += length + 1;

		Ok(content)
	}

	fn expect_comma(&mut self) -> AppResult<()> {
		self.skip_whitespace();

		match self.eat(",") {
			true => Ok(()),
			false => Err(self.error("expected ','")),
		}
	}

	fn parse_hex(&mut self) -> AppResult<u32> {
		self.skip_whitespace();

		// An optional 0x prefix is tolerated, as metadata files often carry one.
		self.eat("0x") || self.eat("0X");

		let digits: String = self.rest()
			.chars()
			.take_while(|c| c.is_ascii_hexdigit())
			.collect();

		if digits.is_empty() || digits.len() > 8 {
			return Err(self.error("expected 1 to 8 hex digits"));
		}

		self.pos += digits.len();

		u32::from_str_radix(&digits, 16)
			.map_err(|_| self.error("invalid checksum value"))
	}

	fn parse_comparator(&mut self) -> AppResult<Comparator> {
		self.skip_whitespace();

		if !self.eat("\"") {
			// Bare comparators are the documented form, but some lists quote them.
			return self.parse_bare_comparator();
		}

		let comparator = self.parse_bare_comparator()?;

		match self.eat("\"") {
			true => Ok(comparator),
			false => Err(self.error("unterminated quoted comparator")),
		}
	}

	fn parse_bare_comparator(&mut self) -> AppResult<Comparator> {
		for (symbol, comparator) in [
			("==", Comparator::Equal),
			("!=", Comparator::NotEqual),
			("<=", Comparator::AtMost),
			(">=", Comparator::AtLeast),
			("<", Comparator::LessThan),
			(">", Comparator::GreaterThan),
		] {
			if self.eat(symbol) { return Ok(comparator); }
		}

		Err(self.error("expected a comparison operator"))
	}
}
