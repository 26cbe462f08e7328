//! This module evaluates parsed conditions against a game's data directory.
//!
//! The evaluator runs in one of two modes. Without a game cache and load-order
//! handler it only checks syntax, treating every predicate as false. With them
//! it queries the real game state, memoising each full condition string in the
//! cache so repeated metadata evaluation stays cheap.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::condition::parser::{
	parse_condition, Comparator, DirPattern, Expr, PathArg, Predicate,
};
use crate::game::cache::GameCache;
use crate::game::loadorder::LoadOrderHandler;
use crate::game::GameKind;
use crate::prelude::*;
use crate::util::misc::file_crc32;
use crate::util::text::GHOST_EXTENSION;

/// The sentinel filename that refers to the host application itself.
pub const SELF_SENTINEL: &str = "Loadcrab";

/// Evaluates condition strings, and rewrites metadata through them.
pub struct ConditionEvaluator<'a> {
	game: GameKind,
	data_path: &'a Path,
	live: Option<Live<'a>>,
	self_path: Option<PathBuf>,
}

/// The game state needed for live evaluation.
struct Live<'a> {
	cache: &'a GameCache,
	load_order: &'a LoadOrderHandler,
}

impl<'a> ConditionEvaluator<'a> {
	/// Builds an evaluator that only verifies syntax.
	pub fn parse_only(game: GameKind, data_path: &'a Path) -> Self {
		Self { game, data_path, live: None, self_path: None }
	}

	/// Builds an evaluator backed by real game state.
	pub fn live(
		game: GameKind,
		data_path: &'a Path,
		cache: &'a GameCache,
		load_order: &'a LoadOrderHandler,
	) -> Self {
		Self {
			game,
			data_path,
			live: Some(Live { cache, load_order }),
			self_path: None,
		}
	}

	/// Tells the evaluator where the host application's own binary lives.
	/// Without this, a checksum over the self sentinel never matches.
	pub fn with_self_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.self_path = Some(path.into());
		self
	}

	/// Evaluates a condition string.
	/// An empty condition is always true; results are cached per full string.
	pub fn evaluate(&self, condition: &str) -> AppResult<bool> {
		let Some(expr) = parse_condition(condition)? else {
			return Ok(true);
		};

		let Some(live) = &self.live else {
			// Parse-only mode still walks the tree, with every predicate false.
			return self.eval_expr(&expr);
		};

		if let Some(result) = live.cache.cached_condition(condition) {
			return Ok(result);
		}

		trace!("evaluating condition: {condition}");
		let result = self.eval_expr(&expr)?;
		live.cache.cache_condition(condition, result);

		Ok(result)
	}

	/// Rewrites a metadata entry, keeping only the parts whose conditions hold.
	/// The surviving parts have their conditions erased.
	pub fn evaluate_all(&self, metadata: &PluginMetadata) -> AppResult<PluginMetadata> {
		let Some(live) = &self.live else {
			return Ok(metadata.clone());
		};

		let mut evaluated = PluginMetadata::new(metadata.name())?;
		evaluated.set_enabled(metadata.is_enabled());
		evaluated.set_local_priority(metadata.local_priority());
		evaluated.set_global_priority(metadata.global_priority());
		evaluated.set_locations(metadata.locations().iter().cloned());

		if metadata.is_group_explicit() {
			evaluated.set_group(metadata.group());
		}

		evaluated.set_load_after(self.retain_files(metadata.load_after())?);
		evaluated.set_requirements(self.retain_files(metadata.requirements())?);
		evaluated.set_incompatibilities(self.retain_files(metadata.incompatibilities())?);

		let mut messages = Vec::new();
		for message in metadata.messages() {
			if self.evaluate(&message.condition)? {
				messages.push(message.without_condition());
			}
		}
		evaluated.set_messages(messages);

		let mut tags = Vec::new();
		for tag in metadata.tags() {
			if self.evaluate(&tag.condition)? {
				tags.push(tag.without_condition());
			}
		}
		evaluated.set_tags(tags);

		// Cleaning data is keyed to an exact plugin revision, so it can't
		// meaningfully apply to a whole regex family.
		if !metadata.is_regex_entry() {
			let actual_crc = self.plugin_crc(live, metadata.name());

			evaluated.set_dirty_info(
				metadata.dirty_info()
					.iter()
					.filter(|data| Some(data.crc) == actual_crc)
					.cloned(),
			);

			evaluated.set_clean_info(
				metadata.clean_info()
					.iter()
					.filter(|data| Some(data.crc) == actual_crc)
					.cloned(),
			);
		}

		Ok(evaluated)
	}

	fn retain_files(&self, files: &IndexSet<File>) -> AppResult<Vec<File>> {
		let mut retained = Vec::new();

		for file in files {
			if self.evaluate(&file.condition)? {
				retained.push(file.without_condition());
			}
		}

		Ok(retained)
	}

	fn eval_expr(&self, expr: &Expr) -> AppResult<bool> {
		match expr {
			Expr::Or(terms) => {
				for term in terms {
					if self.eval_expr(term)? { return Ok(true); }
				}
				Ok(false)
			}

			Expr::And(factors) => {
				for factor in factors {
					if !self.eval_expr(factor)? { return Ok(false); }
				}
				Ok(true)
			}

			Expr::Not(inner) => Ok(!self.eval_expr(inner)?),

			Expr::Predicate(predicate) => self.eval_predicate(predicate),
		}
	}

	fn eval_predicate(&self, predicate: &Predicate) -> AppResult<bool> {
		let Some(live) = &self.live else {
			return Ok(false);
		};

		match predicate {
			Predicate::FilePresent(PathArg::Exact(path)) => Ok(self.file_present(live, path)),
			Predicate::FilePresent(PathArg::Pattern(pattern)) => {
				self.count_matches(pattern, 1, |_| true)
			}

			Predicate::PluginActive(PathArg::Exact(name)) => Ok(self.plugin_active(live, name)),
			Predicate::PluginActive(PathArg::Pattern(pattern)) => {
				self.count_matches(pattern, 1, |name| self.plugin_active(live, name))
			}

			Predicate::ManyPresent(pattern) => self.count_matches(pattern, 2, |_| true),
			Predicate::ManyActive(pattern) => {
				self.count_matches(pattern, 2, |name| self.plugin_active(live, name))
			}

			Predicate::ChecksumMatches { path, crc } => Ok(self.checksum_matches(live, path, *crc)),

			Predicate::VersionCompare { path, version, comparator } => {
				Ok(self.version_matches(live, path, version, *comparator))
			}
		}
	}

	/// True if the path names the host application, a loaded plugin, or a real file.
	/// Ghosted plugins count as present.
	fn file_present(&self, live: &Live, path: &str) -> bool {
		if path == SELF_SENTINEL { return true; }

		if live.cache.plugin(path).is_some() { return true; }

		if self.data_path.join(path).exists() { return true; }

		self.game.is_plugin_filename(path)
			&& self.data_path.join(format!("{path}{GHOST_EXTENSION}")).exists()
	}

	/// True if the named plugin is currently active.
	/// The self sentinel is never active.
	fn plugin_active(&self, live: &Live, name: &str) -> bool {
		if name == SELF_SENTINEL { return false; }

		live.load_order.is_plugin_active(name)
	}

	/// Scans the pattern's parent directory and counts matching entries.
	/// Returns true once `needed` entries have passed the extra filter.
	fn count_matches(
		&self,
		pattern: &DirPattern,
		needed: usize,
		filter: impl Fn(&str) -> bool,
	) -> AppResult<bool> {
		let directory = self.data_path.join(&pattern.parent);

		if !directory.is_dir() {
			trace!("'{}' is not a data subdirectory", directory.display());
			return Ok(false);
		}

		let mut found = 0;
		for entry in WalkDir::new(&directory)
			.min_depth(1)
			.max_depth(1)
			.into_iter()
			.filter_map(|r| r.ok())
		{
			let name = entry.file_name().to_string_lossy();

			if pattern.pattern.is_match(&name) && filter(&name) {
				found += 1;
				if found >= needed { return Ok(true); }
			}
		}

		Ok(false)
	}

	/// The CRC of the named plugin, from the cache when possible, else from disk.
	fn plugin_crc(&self, live: &Live, name: &str) -> Option<u32> {
		if let Some(crc) = live.cache.plugin(name).and_then(|p| p.crc) {
			return Some(crc);
		}

		let direct = self.data_path.join(name);
		if direct.exists() {
			return file_crc32(&direct).ok();
		}

		if self.game.is_plugin_filename(name) {
			let ghosted = self.data_path.join(format!("{name}{GHOST_EXTENSION}"));
			if ghosted.exists() {
				return file_crc32(&ghosted).ok();
			}
		}

		None
	}

	fn checksum_matches(&self, live: &Live, path: &str, expected: u32) -> bool {
		let actual = match path == SELF_SENTINEL {
			true => self.self_path.as_ref().and_then(|p| file_crc32(p).ok()),
			false => self.plugin_crc(live, path),
		};

		actual == Some(expected)
	}

	fn version_matches(&self, live: &Live, path: &str, version: &str, comparator: Comparator) -> bool {
		if !self.file_present(live, path) {
			// A missing file has no version, so only the permissive comparators hold.
			return matches!(
				comparator,
				Comparator::NotEqual | Comparator::LessThan | Comparator::AtMost,
			);
		}

		let actual = Version::new(self.version_of(live, path));
		let given = Version::new(version);
		trace!("comparing version '{actual}' of '{path}' against '{given}'");

		comparator.matches(actual.cmp(&given))
	}

	/// The version string carried by the named plugin's header, if any.
	fn version_of(&self, live: &Live, path: &str) -> String {
		live.cache
			.plugin(path)
			.and_then(|plugin| plugin.version())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;
	use crate::game::loadorder::LoadOrderProvider;
	use crate::game::plugin::Plugin;

	struct FixedLoadOrder {
		active: Vec<String>,
		order: Vec<String>,
	}

	impl LoadOrderProvider for FixedLoadOrder {
		fn active_plugins(&self) -> Vec<String> {
			self.active.clone()
		}

		fn load_order(&self) -> Vec<String> {
			self.order.clone()
		}
	}

	struct Fixture {
		directory: tempfile::TempDir,
		cache: GameCache,
		load_order: LoadOrderHandler,
	}

	impl Fixture {
		fn new(active: &[&str]) -> Self {
			let directory = tempfile::tempdir().unwrap();

			let mut cache = GameCache::default();
			cache.add_plugin(Plugin::new("Blank.esm"));

			let load_order = LoadOrderHandler::new(Box::new(FixedLoadOrder {
				active: active.iter().map(|s| s.to_string()).collect(),
				order: Vec::new(),
			}));

			Self { directory, cache, load_order }
		}

		fn evaluator(&self) -> ConditionEvaluator<'_> {
			ConditionEvaluator::live(
				GameKind::SkyrimSE,
				self.directory.path(),
				&self.cache,
				&self.load_order,
			)
		}
	}

	#[test]
	fn empty_conditions_are_true() {
		let fixture = Fixture::new(&[]);
		assert!(fixture.evaluator().evaluate("").unwrap());
	}

	#[test]
	fn parse_only_mode_checks_syntax_without_touching_state() {
		let directory = tempfile::tempdir().unwrap();
		let evaluator = ConditionEvaluator::parse_only(GameKind::SkyrimSE, directory.path());

		assert!(!evaluator.evaluate(r#"file("Blank.esm")"#).unwrap());
		assert!(evaluator.evaluate(r#"not file("Blank.esm")"#).unwrap());
		assert!(evaluator.evaluate(r#"file("#).is_err());
	}

	#[test]
	fn file_predicate_sees_cached_plugins_and_real_files() {
		let fixture = Fixture::new(&[]);
		let evaluator = fixture.evaluator();

		// A loaded plugin, even though it isn't on disk.
		assert!(evaluator.evaluate(r#"file("Blank.esm")"#).unwrap());

		// The self sentinel.
		assert!(evaluator.evaluate(&format!(r#"file("{SELF_SENTINEL}")"#)).unwrap());

		assert!(!evaluator.evaluate(r#"file("Missing.esp")"#).unwrap());

		fs::write(fixture.directory.path().join("loose.txt"), b"x").unwrap();
		assert!(evaluator.evaluate(r#"file("loose.txt")"#).unwrap());
	}

	#[test]
	fn file_predicate_sees_ghosted_plugins() {
		let fixture = Fixture::new(&[]);
		fs::write(fixture.directory.path().join("Hidden.esp.ghost"), b"x").unwrap();

		assert!(fixture.evaluator().evaluate(r#"file("Hidden.esp")"#).unwrap());
	}

	#[test]
	fn active_predicate_delegates_to_the_load_order() {
		let fixture = Fixture::new(&["Blank.esm"]);
		let evaluator = fixture.evaluator();

		assert!(evaluator.evaluate(r#"active("Blank.esm")"#).unwrap());
		assert!(!evaluator.evaluate(r#"active("Blank.esp")"#).unwrap());
		assert!(!evaluator.evaluate(&format!(r#"active("{SELF_SENTINEL}")"#)).unwrap());
	}

	#[test]
	fn many_needs_two_matches_and_file_needs_one() {
		let fixture = Fixture::new(&["sub/First.esp"]);
		let subdir = fixture.directory.path().join("sub");
		fs::create_dir(&subdir).unwrap();
		fs::write(subdir.join("First.esp"), b"x").unwrap();

		let evaluator = fixture.evaluator();
		assert!(evaluator.evaluate(r#"file("sub/.*\.esp")"#).unwrap());
		assert!(!evaluator.evaluate(r#"many("sub/.*\.esp")"#).unwrap());

		fs::write(subdir.join("Second.esp"), b"x").unwrap();

		// The first result was cached under the old state; a fresh string shows the change.
		assert!(evaluator.evaluate(r#"many("sub/.+\.esp")"#).unwrap());
	}

	#[test]
	fn many_active_counts_only_active_matches() {
		let fixture = Fixture::new(&["First.esp"]);
		fs::write(fixture.directory.path().join("First.esp"), b"x").unwrap();
		fs::write(fixture.directory.path().join("Second.esp"), b"x").unwrap();

		let evaluator = fixture.evaluator();
		assert!(!evaluator.evaluate(r#"many_active(".*\.esp")"#).unwrap());
		assert!(evaluator.evaluate(r#"active(".*\.esp")"#).unwrap());
	}

	#[test]
	fn missing_scan_directory_is_false() {
		let fixture = Fixture::new(&[]);
		assert!(!fixture.evaluator().evaluate(r#"many("nowhere/.*\.esp")"#).unwrap());
	}

	#[test]
	fn checksum_compares_file_contents() {
		let fixture = Fixture::new(&[]);
		fs::write(fixture.directory.path().join("data.bin"), b"123456789").unwrap();

		let evaluator = fixture.evaluator();
		assert!(evaluator.evaluate(r#"checksum("data.bin", CBF43926)"#).unwrap());
		assert!(!evaluator.evaluate(r#"checksum("data.bin", DEADBEEF)"#).unwrap());
		assert!(!evaluator.evaluate(r#"checksum("missing.bin", CBF43926)"#).unwrap());
	}

	#[test]
	fn version_against_a_missing_file_matches_only_permissive_comparators() {
		let fixture = Fixture::new(&[]);
		let evaluator = fixture.evaluator();

		assert!(evaluator.evaluate(r#"version("Missing.esp", "1.0", !=)"#).unwrap());
		assert!(evaluator.evaluate(r#"version("Missing.esp", "1.0", <)"#).unwrap());
		assert!(evaluator.evaluate(r#"version("Missing.esp", "1.0", <=)"#).unwrap());
		assert!(!evaluator.evaluate(r#"version("Missing.esp", "1.0", ==)"#).unwrap());
		assert!(!evaluator.evaluate(r#"version("Missing.esp", "1.0", >=)"#).unwrap());
	}

	#[test]
	fn version_reads_the_plugin_header_description() {
		let fixture = Fixture::new(&[]);

		let mut cache = GameCache::default();
		let mut plugin = Plugin::new("Versioned.esm");
		plugin.description = Some("My Mod v1.2.3 for SSE".into());
		cache.add_plugin(plugin);

		let load_order = LoadOrderHandler::new(Box::new(FixedLoadOrder {
			active: Vec::new(),
			order: Vec::new(),
		}));

		let evaluator = ConditionEvaluator::live(
			GameKind::SkyrimSE,
			fixture.directory.path(),
			&cache,
			&load_order,
		);

		assert!(evaluator.evaluate(r#"version("Versioned.esm", "1.2.3", ==)"#).unwrap());
		assert!(evaluator.evaluate(r#"version("Versioned.esm", "1.3", <)"#).unwrap());
		assert!(!evaluator.evaluate(r#"version("Versioned.esm", "1.0", <)"#).unwrap());
	}

	#[test]
	fn results_are_memoised_per_condition_string() {
		let fixture = Fixture::new(&[]);
		let path = fixture.directory.path().join("flip.txt");
		fs::write(&path, b"x").unwrap();

		let evaluator = fixture.evaluator();
		assert!(evaluator.evaluate(r#"file("flip.txt")"#).unwrap());

		// The file is gone, but the cached answer stands until the cache is cleared.
		fs::remove_file(&path).unwrap();
		assert!(evaluator.evaluate(r#"file("flip.txt")"#).unwrap());

		fixture.cache.clear_cached_conditions();
		assert!(!evaluator.evaluate(r#"file("flip.txt")"#).unwrap());
	}

	#[test]
	fn evaluate_all_filters_and_strips_conditions() {
		let fixture = Fixture::new(&[]);

		let mut metadata = PluginMetadata::new("Blank.esm").unwrap();
		metadata.set_load_after([
			File { name: "Kept.esp".into(), display: String::new(), condition: r#"file("Blank.esm")"#.into() },
			File { name: "Dropped.esp".into(), display: String::new(), condition: r#"file("Missing.esp")"#.into() },
		]);

		let mut message = Message::new(MessageKind::Warn, "conditional");
		message.condition = r#"file("Missing.esp")"#.into();
		metadata.set_messages([message, Message::new(MessageKind::Say, "plain")]);

		let evaluated = fixture.evaluator().evaluate_all(&metadata).unwrap();

		assert_eq!(evaluated.load_after().len(), 1);
		let kept = evaluated.load_after().iter().next().unwrap();
		assert_eq!(kept.name, "Kept.esp");
		assert!(kept.condition.is_empty());

		assert_eq!(evaluated.messages().len(), 1);
		assert_eq!(evaluated.messages()[0].kind, MessageKind::Say);
	}

	#[test]
	fn evaluate_all_keeps_only_matching_cleaning_data() {
		let directory = tempfile::tempdir().unwrap();
		fs::write(directory.path().join("Dirty.esp"), b"123456789").unwrap();

		let cache = GameCache::default();
		let load_order = LoadOrderHandler::new(Box::new(FixedLoadOrder {
			active: Vec::new(),
			order: Vec::new(),
		}));
		let evaluator =
			ConditionEvaluator::live(GameKind::SkyrimSE, directory.path(), &cache, &load_order);

		let mut metadata = PluginMetadata::new("Dirty.esp").unwrap();
		metadata.set_dirty_info([
			PluginCleaningData::new(0xCBF43926, "TES5Edit"),
			PluginCleaningData::new(0x11111111, "TES5Edit"),
		]);

		let evaluated = evaluator.evaluate_all(&metadata).unwrap();
		assert_eq!(evaluated.dirty_info().len(), 1);
		assert_eq!(evaluated.dirty_info().iter().next().unwrap().crc, 0xCBF43926);
	}
}
