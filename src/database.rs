//! This module is the facade the host talks to: it owns the loaded metadata
//! documents and the game caches, and orchestrates lookups, writes, and sorts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::condition::ConditionEvaluator;
use crate::document::MetadataDocument;
use crate::game::cache::GameCache;
use crate::game::loadorder::{LoadOrderHandler, LoadOrderProvider};
use crate::game::GameKind;
use crate::masterlist::{Masterlist, MasterlistInfo};
use crate::prelude::*;
use crate::sorting::{sort_plugins, PluginSortingData};

/// One game's metadata database.
///
/// Not thread-safe: all state is sequenced on the caller's thread, and callers
/// wanting parallelism should use one database per game instance.
pub struct Database {
	game: GameKind,
	data_path: PathBuf,
	cache: GameCache,
	load_order: LoadOrderHandler,
	masterlist: Masterlist,
	userlist: MetadataDocument,
}

impl Database {
	/// Builds a database for a game whose data directory lives at `data_path`.
	pub fn new(
		game: GameKind,
		data_path: impl Into<PathBuf>,
		provider: Box<dyn LoadOrderProvider>,
	) -> Self {
		Self {
			game,
			data_path: data_path.into(),
			cache: GameCache::default(),
			load_order: LoadOrderHandler::new(provider),
			masterlist: Masterlist::default(),
			userlist: MetadataDocument::default(),
		}
	}

	pub fn game(&self) -> GameKind {
		self.game
	}

	pub fn data_path(&self) -> &Path {
		&self.data_path
	}

	/// The cache of plugin descriptors the host has registered.
	pub fn cache(&self) -> &GameCache {
		&self.cache
	}

	/// Mutable access to the cache, for registering plugins and archives.
	pub fn cache_mut(&mut self) -> &mut GameCache {
		&mut self.cache
	}

	/// The host's view of the current load order.
	pub fn load_order(&self) -> &LoadOrderHandler {
		&self.load_order
	}

	/// A live condition evaluator over this database's state.
	pub fn evaluator(&self) -> ConditionEvaluator<'_> {
		ConditionEvaluator::live(self.game, &self.data_path, &self.cache, &self.load_order)
	}

	/// Loads the masterlist, and optionally a userlist, replacing current state.
	/// Neither document is replaced if either fails to load.
	pub fn load_lists(
		&mut self,
		masterlist_path: &Path,
		userlist_path: Option<&Path>,
	) -> AppResult<()> {
		let mut masterlist = Masterlist::default();
		masterlist
			.load(masterlist_path)
			.tap_err(|e| error!("failed to load the masterlist: {e}"))?;

		let mut userlist = MetadataDocument::default();
		if let Some(path) = userlist_path {
			userlist
				.load(path)
				.tap_err(|e| error!("failed to load the userlist: {e}"))?;
		}

		self.masterlist = masterlist;
		self.userlist = userlist;

		Ok(())
	}

	/// Updates the masterlist from its remote repository.
	/// Returns *true* if the working copy changed.
	pub fn update_masterlist(
		&mut self,
		masterlist_path: &Path,
		repo_url: &str,
		branch: &str,
	) -> AppResult<bool> {
		let parent_is_usable = masterlist_path
			.parent()
			.is_some_and(|parent| parent.as_os_str().is_empty() || !parent.is_file());

		if !parent_is_usable {
			return Err(AppError::InvalidArgument(format!(
				"masterlist path '{}' does not have a usable parent directory",
				masterlist_path.display(),
			)));
		}

		let mut updated = Masterlist::default();
		match updated.update(masterlist_path, repo_url, branch)? {
			true => {
				self.masterlist = updated;
				Ok(true)
			}
			false => Ok(false),
		}
	}

	/// Reports the revision of the masterlist checkout at the given path.
	pub fn masterlist_revision(
		masterlist_path: &Path,
		short_id: bool,
	) -> AppResult<MasterlistInfo> {
		Masterlist::info(masterlist_path, short_id)
	}

	/// Returns *true* if the masterlist checkout is at its remote branch tip.
	pub fn is_latest_masterlist(masterlist_path: &Path, branch: &str) -> AppResult<bool> {
		Masterlist::is_latest(masterlist_path, branch)
	}

	/// Every Bash Tag named by either list.
	pub fn known_bash_tags(&self) -> IndexSet<String> {
		let mut tags = self.masterlist.document().bash_tags().clone();
		tags.extend(self.userlist.bash_tags().iter().cloned());

		tags
	}

	/// The general messages from both lists, masterlist first.
	/// When evaluating, conditions are re-checked from a clean cache.
	pub fn general_messages(&self, evaluate: bool) -> AppResult<Vec<Message>> {
		let messages = self.masterlist
			.document()
			.messages()
			.iter()
			.chain(self.userlist.messages())
			.cloned();

		if !evaluate {
			return Ok(messages.collect());
		}

		self.cache.clear_cached_conditions();
		let evaluator = self.evaluator();

		let mut retained = Vec::new();
		for message in messages {
			if evaluator.evaluate(&message.condition)? {
				retained.push(message);
			}
		}

		Ok(retained)
	}

	/// The metadata that applies to one plugin, merged across the lists.
	///
	/// The masterlist entry is the base and the userlist entry wins on top of
	/// it. When evaluating, conditional parts that don't hold are dropped.
	pub fn plugin_metadata(
		&self,
		plugin_name: &str,
		include_user_metadata: bool,
		evaluate: bool,
	) -> AppResult<Option<PluginMetadata>> {
		let mut found = self.masterlist.document().find_plugin(plugin_name)?;

		if include_user_metadata {
			if let Some(user) = self.userlist.find_plugin(plugin_name)? {
				found = Some(match found {
					Some(base) => base.merge(&user),
					None => user,
				});
			}
		}

		match (found, evaluate) {
			(Some(metadata), true) => Ok(Some(self.evaluator().evaluate_all(&metadata)?)),
			(found, _) => Ok(found),
		}
	}

	/// The metadata the user has written for one plugin.
	pub fn plugin_user_metadata(
		&self,
		plugin_name: &str,
		evaluate: bool,
	) -> AppResult<Option<PluginMetadata>> {
		let found = self.userlist.find_plugin(plugin_name)?;

		match (found, evaluate) {
			(Some(metadata), true) => Ok(Some(self.evaluator().evaluate_all(&metadata)?)),
			(found, _) => Ok(found),
		}
	}

	/// Replaces the user's metadata for one plugin.
	pub fn set_plugin_user_metadata(&mut self, metadata: PluginMetadata) -> AppResult<()> {
		self.userlist.erase_plugin(metadata.name());
		self.userlist.add_plugin(metadata)
	}

	/// Removes the user's exact entry for one plugin.
	pub fn discard_plugin_user_metadata(&mut self, plugin_name: &str) {
		self.userlist.erase_plugin(plugin_name);
	}

	/// Removes all user metadata.
	pub fn discard_all_user_metadata(&mut self) {
		self.userlist.clear();
	}

	/// Writes the user's metadata document out.
	pub fn write_user_metadata(&self, output: &Path, overwrite: bool) -> AppResult<()> {
		check_output_path(output, overwrite)?;

		self.userlist
			.save(output)
			.tap_err(|e| error!("failed to write user metadata: {e}"))
	}

	/// Writes a minimal masterlist holding only tag and dirty-plugin data.
	/// Everything else is dropped, entry by entry.
	pub fn write_minimal_list(&self, output: &Path, overwrite: bool) -> AppResult<()> {
		check_output_path(output, overwrite)?;

		let mut plugins = Vec::new();
		for entry in self.masterlist.document().plugins() {
			if entry.tags().is_empty() && entry.dirty_info().is_empty() {
				continue;
			}

			let mut minimal = PluginMetadata::new(entry.name())?;
			minimal.set_tags(entry.tags().iter().cloned());
			minimal.set_dirty_info(entry.dirty_info().iter().cloned());

			plugins.push(minimal);
		}

		#[derive(Serialize)]
		struct MinimalOut {
			plugins: Vec<PluginMetadata>,
		}

		let text = serde_yaml::to_string(&MinimalOut { plugins })
			.map_err(|e| AppError::file_access(output, e))?;

		let temp = output.with_extension("tmp");
		fs::write(&temp, text).map_err(|e| AppError::file_access(&temp, e))?;
		fs::rename(&temp, output).map_err(|e| AppError::file_access(output, e))?;

		Ok(())
	}

	/// Sorts the cached plugins into a load order.
	///
	/// Each plugin's masterlist and userlist metadata is merged and evaluated,
	/// then the sorter does the rest. The current load order is used for
	/// tie-breaking, so the caller should refresh it first.
	pub fn sort_plugins(&self) -> AppResult<Vec<String>> {
		info!("merging and evaluating metadata for every cached plugin");

		let mut data = Vec::new();
		for plugin in self.cache.plugins() {
			trace!("getting and evaluating metadata for plugin \"{}\"", plugin.name);

			let metadata = self.plugin_metadata(&plugin.name, true, true)?
				.map(Ok)
				.unwrap_or_else(|| PluginMetadata::new(&plugin.name))?;

			data.push(PluginSortingData::new(plugin, &metadata));
		}

		let old_load_order = self.load_order.load_order();
		info!("current load order: {old_load_order:?}");

		sort_plugins(data, &old_load_order)
	}
}

/// Shared overwrite protection for the metadata writers.
fn check_output_path(output: &Path, overwrite: bool) -> AppResult<()> {
	let parent_exists = match output.parent() {
		Some(parent) => parent.as_os_str().is_empty() || parent.exists(),
		None => false,
	};

	if !parent_exists {
		return Err(AppError::InvalidArgument(format!(
			"output directory for '{}' does not exist",
			output.display(),
		)));
	}

	if output.exists() && !overwrite {
		return Err(AppError::file_access(
			output,
			"output file exists and overwriting was not requested",
		));
	}

	Ok(())
}
