//! This module caches everything the library has learned about a game install.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::game::plugin::Plugin;
use crate::prelude::*;
use crate::util::text::normalize_filename;

/// An in-process registry of loaded plugin descriptors, archive paths, and
/// previously-evaluated conditions.
///
/// Condition results are only valid for one snapshot of game state, so the
/// condition cache is dropped whenever the plugin set or archive set changes.
/// The library is single-threaded per database, which is why a *RefCell* is
/// enough for the interior mutability the condition cache needs.
#[derive(Debug, Default)]
pub struct GameCache {
	plugins: IndexMap<String, Plugin>,
	archive_paths: IndexSet<PathBuf>,
	conditions: RefCell<HashMap<String, bool>>,
}

impl GameCache {
	/// Registers a plugin, replacing any previous entry with the same folded name.
	pub fn add_plugin(&mut self, plugin: Plugin) {
		let key = normalize_filename(&plugin.name);

		trace!("caching plugin '{}'", plugin.name);
		self.plugins.insert(key, plugin);
		self.clear_cached_conditions();
	}

	/// Looks up a plugin by name, ignoring case.
	pub fn plugin(&self, name: &str) -> Option<&Plugin> {
		self.plugins.get(&normalize_filename(name))
	}

	/// Iterates over every cached plugin, in insertion order.
	pub fn plugins(&self) -> impl Iterator<Item = &Plugin> {
		self.plugins.values()
	}

	/// Returns *true* if no plugins are cached.
	pub fn is_empty(&self) -> bool {
		self.plugins.is_empty()
	}

	/// Replaces the set of known archive paths.
	pub fn cache_archive_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
		self.archive_paths = paths.into_iter().collect();
		self.clear_cached_conditions();
	}

	/// The archive paths last cached.
	pub fn archive_paths(&self) -> &IndexSet<PathBuf> {
		&self.archive_paths
	}

	/// Remembers the result of evaluating a condition string.
	pub fn cache_condition(&self, condition: &str, result: bool) {
		self.conditions.borrow_mut().insert(condition.to_owned(), result);
	}

	/// Recalls a previously-evaluated condition, keyed by the exact string.
	pub fn cached_condition(&self, condition: &str) -> Option<bool> {
		self.conditions.borrow().get(condition).copied()
	}

	/// Forgets every cached plugin.
	pub fn clear_cached_plugins(&mut self) {
		self.plugins.clear();
		self.clear_cached_conditions();
	}

	/// Forgets every cached condition result.
	/// Call this whenever the load order changes out from under the cache.
	pub fn clear_cached_conditions(&self) {
		self.conditions.borrow_mut().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plugin_lookup_is_case_insensitive() {
		let mut cache = GameCache::default();
		cache.add_plugin(Plugin::new("Blank.esm"));

		assert!(cache.plugin("blank.ESM").is_some());
		assert!(cache.plugin("Other.esm").is_none());
	}

	#[test]
	fn re_adding_a_plugin_replaces_the_old_entry() {
		let mut cache = GameCache::default();

		let mut original = Plugin::new("Blank.esm");
		original.crc = Some(1);
		cache.add_plugin(original);

		let mut replacement = Plugin::new("BLANK.esm");
		replacement.crc = Some(2);
		cache.add_plugin(replacement);

		assert_eq!(cache.plugins().count(), 1);
		assert_eq!(cache.plugin("blank.esm").unwrap().crc, Some(2));
	}

	#[test]
	fn condition_cache_is_keyed_by_exact_string() {
		let cache = GameCache::default();
		cache.cache_condition(r#"file("A.esp")"#, true);

		assert_eq!(cache.cached_condition(r#"file("A.esp")"#), Some(true));
		assert_eq!(cache.cached_condition(r#"file( "A.esp" )"#), None);
	}

	#[test]
	fn state_changes_drop_cached_conditions() {
		let mut cache = GameCache::default();
		cache.cache_condition("x", true);

		cache.add_plugin(Plugin::new("Blank.esm"));
		assert_eq!(cache.cached_condition("x"), None);

		cache.cache_condition("x", true);
		cache.cache_archive_paths([PathBuf::from("Blank.bsa")]);
		assert_eq!(cache.cached_condition("x"), None);

		cache.cache_condition("x", true);
		cache.clear_cached_plugins();
		assert_eq!(cache.cached_condition("x"), None);
	}
}
