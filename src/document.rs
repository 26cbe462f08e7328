//! This module loads and saves the YAML metadata documents: the shared
//! masterlist and the user's own overlay.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::condition::parser::parse_condition;
use crate::condition::ConditionEvaluator;
use crate::prelude::*;
use crate::structs::metadata::DEFAULT_GROUP;
use crate::util::text::normalize_filename;

/// One parsed metadata document.
///
/// Exact entries are keyed by folded filename; regex entries keep their
/// declaration order, since later entries build on earlier ones when merged.
#[derive(Clone, Debug, Default)]
pub struct MetadataDocument {
	bash_tags: IndexSet<String>,
	groups: IndexSet<Group>,
	messages: Vec<Message>,
	plugins: IndexMap<String, PluginMetadata>,
	regex_plugins: Vec<PluginMetadata>,
}

/// The document's top-level YAML shape.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentRepr {
	#[serde(default)]
	bash_tags: Vec<String>,
	#[serde(default)]
	globals: Vec<Message>,
	#[serde(default)]
	groups: Vec<Group>,
	#[serde(default)]
	plugins: Vec<PluginMetadata>,
}

#[derive(Serialize)]
struct DocumentOut<'a> {
	bash_tags: &'a IndexSet<String>,
	groups: Vec<&'a Group>,
	globals: &'a [Message],
	plugins: Vec<&'a PluginMetadata>,
}

impl MetadataDocument {
	/// Loads a document, replacing this one's contents.
	/// On any failure the document is left empty, never half-loaded.
	pub fn load(&mut self, path: impl AsRef<Path>) -> AppResult<()> {
		let path = path.as_ref();

		self.clear();
		debug!("loading metadata file: {}", path.display());

		let text = fs::read_to_string(path)
			.map_err(|e| AppError::file_access(path, e))?;

		let repr: DocumentRepr = serde_yaml::from_str(&text)
			.map_err(|e| AppError::file_access(path, e))?;

		let mut loaded = MetadataDocument {
			bash_tags: repr.bash_tags.into_iter().collect(),
			groups: repr.groups.into_iter().collect(),
			messages: repr.globals,
			..Default::default()
		};

		for plugin in repr.plugins {
			if plugin.is_regex_entry() {
				loaded.regex_plugins.push(plugin);
				continue;
			}

			let key = normalize_filename(plugin.name());
			if loaded.plugins.insert(key, plugin).is_some() {
				return Err(AppError::file_access(
					path,
					"more than one entry exists for the same plugin",
				));
			}
		}

		loaded.validate_conditions()?;

		*self = loaded;
		debug!("metadata file loaded successfully");

		Ok(())
	}

	/// Saves this document, omitting name-only entries.
	/// The write goes through a sibling temp file, so failures can't truncate the target.
	pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
		let path = path.as_ref();
		trace!("saving metadata list to: {}", path.display());

		let out = DocumentOut {
			bash_tags: &self.bash_tags,
			groups: self.groups.iter().collect(),
			globals: &self.messages,
			plugins: self.plugins()
				.filter(|plugin| !plugin.has_name_only())
				.collect(),
		};

		let text = serde_yaml::to_string(&out)
			.map_err(|e| AppError::file_access(path, e))?;

		let temp = path.with_extension("tmp");
		fs::write(&temp, text).map_err(|e| AppError::file_access(&temp, e))?;
		fs::rename(&temp, path).map_err(|e| AppError::file_access(path, e))?;

		Ok(())
	}

	/// Empties the document.
	pub fn clear(&mut self) {
		*self = Self::default();
	}

	/// The document's known Bash Tag names.
	pub fn bash_tags(&self) -> &IndexSet<String> {
		&self.bash_tags
	}

	/// The document's general messages.
	pub fn messages(&self) -> &[Message] {
		&self.messages
	}

	/// Appends a general message.
	pub fn append_message(&mut self, message: Message) {
		self.messages.push(message);
	}

	/// The document's groups, with the default group always present.
	pub fn groups(&self) -> IndexSet<Group> {
		let mut groups = IndexSet::new();
		groups.insert(Group::default());
		groups.extend(self.groups.iter().cloned());

		groups
	}

	/// Replaces the document's groups.
	/// The default group needs no declaration, so it is not stored.
	pub fn set_groups(&mut self, groups: impl IntoIterator<Item = Group>) {
		self.groups = groups.into_iter()
			.filter(|group| group.name != DEFAULT_GROUP)
			.collect();
	}

	/// Iterates every plugin entry, exact entries first, then regex entries.
	pub fn plugins(&self) -> impl Iterator<Item = &PluginMetadata> {
		self.plugins.values().chain(self.regex_plugins.iter())
	}

	/// Collects all the metadata that applies to one plugin.
	///
	/// The exact entry, if any, is the base; every matching regex entry is
	/// merged into it in declaration order. Returns *None* when nothing applies.
	pub fn find_plugin(&self, name: &str) -> AppResult<Option<PluginMetadata>> {
		let mut found = self.plugins.get(&normalize_filename(name)).cloned();

		for entry in self.regex_plugins.iter().filter(|e| e.applies_to(name)) {
			found = Some(match found {
				Some(existing) => existing.merge(entry),
				None => PluginMetadata::new(name)?.merge(entry),
			});
		}

		Ok(found)
	}

	/// Adds a plugin entry.
	/// Fails if an exact entry already exists for the same folded name.
	pub fn add_plugin(&mut self, plugin: PluginMetadata) -> AppResult<()> {
		if plugin.is_regex_entry() {
			self.regex_plugins.push(plugin);
			return Ok(());
		}

		let key = normalize_filename(plugin.name());
		if self.plugins.contains_key(&key) {
			return Err(AppError::InvalidArgument(format!(
				"cannot add \"{}\": another entry already exists",
				plugin.name(),
			)));
		}

		self.plugins.insert(key, plugin);
		Ok(())
	}

	/// Removes the exact entry for a plugin.
	/// Regex entries stay, as they may also apply to other plugins.
	pub fn erase_plugin(&mut self, name: &str) {
		self.plugins.shift_remove(&normalize_filename(name));
	}

	/// Re-evaluates every condition in the document, dropping whatever fails.
	/// On error the document is left untouched.
	pub fn eval_all_conditions(&mut self, evaluator: &ConditionEvaluator) -> AppResult<()> {
		let mut plugins = IndexMap::new();
		for (key, entry) in &self.plugins {
			plugins.insert(key.clone(), evaluator.evaluate_all(entry)?);
		}

		let mut regex_plugins = Vec::new();
		for entry in &self.regex_plugins {
			regex_plugins.push(evaluator.evaluate_all(entry)?);
		}

		let mut messages = Vec::new();
		for message in &self.messages {
			if evaluator.evaluate(&message.condition)? {
				messages.push(message.clone());
			}
		}

		self.plugins = plugins;
		self.regex_plugins = regex_plugins;
		self.messages = messages;

		Ok(())
	}

	/// Checks that every condition in the document at least parses.
	fn validate_conditions(&self) -> AppResult<()> {
		for message in &self.messages {
			parse_condition(&message.condition)?;
		}

		for plugin in self.plugins() {
			let files = plugin.load_after()
				.iter()
				.chain(plugin.requirements())
				.chain(plugin.incompatibilities());

			for file in files {
				parse_condition(&file.condition)?;
			}

			for message in plugin.messages() {
				parse_condition(&message.condition)?;
			}

			for tag in plugin.tags() {
				parse_condition(&tag.condition)?;
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	const DOCUMENT: &str = r#"
bash_tags:
  - 'C.Climate'
  - 'Relev'

globals:
  - type: say
    content: 'A general message.'

groups:
  - name: 'early'
  - name: 'late'
    after: ['early']

plugins:
  - name: 'Blank.esm'
    priority: 3
  - name: 'Blank.esp'
    after: ['Blank.esm']
    tag: ['Relev']
    dirty:
      - crc: 0x5
        util: 'TES5Edit'
  - name: 'Blank.+\.esp'
    msg:
      - type: warn
        content: 'Applies to the whole family.'
"#;

	fn write_document(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("masterlist.yaml");
		fs::write(&path, text).unwrap();

		(dir, path)
	}

	#[test]
	fn load_reads_every_section() {
		let (_dir, path) = write_document(DOCUMENT);

		let mut document = MetadataDocument::default();
		document.load(&path).unwrap();

		assert_eq!(document.bash_tags().len(), 2);
		assert_eq!(document.messages().len(), 1);
		assert_eq!(document.plugins().count(), 3);

		// The default group joins the two declared ones.
		assert_eq!(document.groups().len(), 3);
	}

	#[test]
	fn load_failure_leaves_the_document_empty() {
		let (_dir, path) = write_document(DOCUMENT);

		let mut document = MetadataDocument::default();
		document.load(&path).unwrap();

		let missing = path.with_file_name("missing.yaml");
		assert!(matches!(document.load(missing), Err(AppError::FileAccess { .. })));
		assert_eq!(document.plugins().count(), 0);
	}

	#[test]
	fn load_rejects_non_mapping_roots() {
		let (_dir, path) = write_document("- just\n- a\n- list\n");

		let mut document = MetadataDocument::default();
		assert!(matches!(document.load(&path), Err(AppError::FileAccess { .. })));
	}

	#[test]
	fn load_rejects_duplicate_exact_entries() {
		let (_dir, path) = write_document(
			"plugins:\n  - name: 'Blank.esp'\n    group: 'early'\n  - name: 'BLANK.esp'\n    group: 'late'\n",
		);

		let mut document = MetadataDocument::default();
		assert!(matches!(document.load(&path), Err(AppError::FileAccess { .. })));
	}

	#[test]
	fn load_rejects_bad_conditions() {
		let (_dir, path) = write_document(
			"plugins:\n  - name: 'Blank.esp'\n    after:\n      - name: 'A.esp'\n        condition: 'file('\n",
		);

		let mut document = MetadataDocument::default();
		assert!(matches!(document.load(&path), Err(AppError::ConditionSyntax(_))));
	}

	#[test]
	fn find_plugin_merges_matching_regex_entries() {
		let (_dir, path) = write_document(DOCUMENT);

		let mut document = MetadataDocument::default();
		document.load(&path).unwrap();

		let found = document.find_plugin("Blank.esp").unwrap().unwrap();
		assert_eq!(found.load_after().len(), 1);
		assert_eq!(found.messages().len(), 1, "the regex family message should merge in");

		// Matching is case-insensitive for exact and regex entries alike.
		assert!(document.find_plugin("BLANK.ESP").unwrap().is_some());

		assert!(document.find_plugin("Other.esp").unwrap().is_none());
	}

	#[test]
	fn save_round_trips_and_prunes_name_only_entries() {
		let (_dir, path) = write_document(DOCUMENT);

		let mut document = MetadataDocument::default();
		document.load(&path).unwrap();

		document.add_plugin(PluginMetadata::new("NameOnly.esp").unwrap()).unwrap();

		let saved = path.with_file_name("out.yaml");
		document.save(&saved).unwrap();

		let mut reloaded = MetadataDocument::default();
		reloaded.load(&saved).unwrap();

		assert_eq!(reloaded.plugins().count(), 3, "the name-only entry should be pruned");
		assert_eq!(reloaded.bash_tags(), document.bash_tags());

		// Saving what was just loaded changes nothing further.
		let resaved = path.with_file_name("out2.yaml");
		reloaded.save(&resaved).unwrap();
		assert_eq!(fs::read_to_string(&saved).unwrap(), fs::read_to_string(&resaved).unwrap());
	}

	#[test]
	fn set_groups_replaces_declared_groups() {
		let mut document = MetadataDocument::default();

		// The default group needs no declaration and is filtered out.
		document.set_groups([Group::default(), Group::new("early")]);

		let groups = document.groups();
		assert_eq!(groups.len(), 2);
		assert!(groups.contains(&Group::new("early")));
		assert!(groups.contains(&Group::default()));
	}

	#[test]
	fn add_plugin_rejects_duplicates() {
		let mut document = MetadataDocument::default();
		document.add_plugin(PluginMetadata::new("Blank.esp").unwrap()).unwrap();

		let duplicate = PluginMetadata::new("blank.ESP").unwrap();
		assert!(matches!(
			document.add_plugin(duplicate),
			Err(AppError::InvalidArgument(_)),
		));
	}

	#[test]
	fn erase_plugin_leaves_regex_entries() {
		let (_dir, path) = write_document(DOCUMENT);

		let mut document = MetadataDocument::default();
		document.load(&path).unwrap();

		document.erase_plugin("Blank.esp");

		// The regex family entry still applies.
		let found = document.find_plugin("Blank.esp").unwrap().unwrap();
		assert_eq!(found.messages().len(), 1);
		assert!(found.load_after().is_empty());
	}
}
