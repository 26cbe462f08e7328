//! This module defines per-plugin metadata and how two sets of it merge.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::prelude::*;
use crate::structs::metadata::{
	File, Group, Location, Message, PluginCleaningData, Priority, Tag, DEFAULT_GROUP,
};
use crate::util::text::iequals;

/// Characters that mark a metadata entry's name as a regular expression.
/// None of them are valid in a real filename, but all have meaning in a regex.
const NAME_REGEX_MARKERS: [char; 5] = [':', '\\', '*', '?', '|'];

/// The magnitude at which a serialised priority stops being local.
const GLOBAL_PRIORITY_DIVISOR: i64 = 1_000_000;

/// All the curated metadata attached to one plugin, or to a regex family of plugins.
#[derive(Clone, Debug, Default)]
pub struct PluginMetadata {
	name: String,
	enabled: bool,
	group: Option<String>,
	local_priority: Priority,
	global_priority: Priority,
	load_after: IndexSet<File>,
	requirements: IndexSet<File>,
	incompatibilities: IndexSet<File>,
	messages: Vec<Message>,
	tags: IndexSet<Tag>,
	dirty_info: IndexSet<PluginCleaningData>,
	clean_info: IndexSet<PluginCleaningData>,
	locations: IndexSet<Location>,
}

impl PluginMetadata {
	/// Builds an empty metadata entry for the named plugin.
	/// Fails with *ConditionSyntax* if the name looks like a regex but doesn't compile.
	pub fn new(name: impl Into<String>) -> AppResult<Self> {
		let name = name.into();

		if name.contains(NAME_REGEX_MARKERS) {
			compile_name_regex(&name)?;
		}

		Ok(Self { name, enabled: true, ..Default::default() })
	}

	/// The plugin filename, or regex, this entry applies to.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Returns *true* if this entry's name is a regular expression.
	pub fn is_regex_entry(&self) -> bool {
		self.name.contains(NAME_REGEX_MARKERS)
	}

	/// Returns *true* if this entry applies to the given plugin filename.
	pub fn applies_to(&self, plugin_name: &str) -> bool {
		match self.is_regex_entry() {
			// The regex compiled when this entry was built, so failure here is unreachable.
			true => compile_name_regex(&self.name)
				.map(|regex| regex.is_match(plugin_name))
				.unwrap_or(false),
			false => iequals(&self.name, plugin_name),
		}
	}

	/// Whether this plugin's metadata should be applied at all.
	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	/// The group this plugin belongs to, falling back to the default group.
	pub fn group(&self) -> &str {
		self.group.as_deref().unwrap_or(DEFAULT_GROUP)
	}

	/// Returns *true* if a group was set on purpose rather than defaulted.
	pub fn is_group_explicit(&self) -> bool {
		self.group.is_some()
	}

	pub fn set_group(&mut self, group: impl Into<String>) {
		self.group = Some(group.into());
	}

	pub fn local_priority(&self) -> Priority {
		self.local_priority
	}

	pub fn set_local_priority(&mut self, priority: Priority) {
		self.local_priority = priority;
	}

	pub fn global_priority(&self) -> Priority {
		self.global_priority
	}

	pub fn set_global_priority(&mut self, priority: Priority) {
		self.global_priority = priority;
	}

	pub fn load_after(&self) -> &IndexSet<File> {
		&self.load_after
	}

	pub fn set_load_after(&mut self, files: impl IntoIterator<Item = File>) {
		self.load_after = files.into_iter().collect();
	}

	pub fn requirements(&self) -> &IndexSet<File> {
		&self.requirements
	}

	pub fn set_requirements(&mut self, files: impl IntoIterator<Item = File>) {
		self.requirements = files.into_iter().collect();
	}

	pub fn incompatibilities(&self) -> &IndexSet<File> {
		&self.incompatibilities
	}

	pub fn set_incompatibilities(&mut self, files: impl IntoIterator<Item = File>) {
		self.incompatibilities = files.into_iter().collect();
	}

	pub fn messages(&self) -> &[Message] {
		&self.messages
	}

	pub fn set_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
		self.messages = messages.into_iter().collect();
	}

	pub fn tags(&self) -> &IndexSet<Tag> {
		&self.tags
	}

	pub fn set_tags(&mut self, tags: impl IntoIterator<Item = Tag>) {
		self.tags = tags.into_iter().collect();
	}

	pub fn dirty_info(&self) -> &IndexSet<PluginCleaningData> {
		&self.dirty_info
	}

	pub fn set_dirty_info(&mut self, info: impl IntoIterator<Item = PluginCleaningData>) {
		self.dirty_info = info.into_iter().collect();
	}

	pub fn clean_info(&self) -> &IndexSet<PluginCleaningData> {
		&self.clean_info
	}

	pub fn set_clean_info(&mut self, info: impl IntoIterator<Item = PluginCleaningData>) {
		self.clean_info = info.into_iter().collect();
	}

	pub fn locations(&self) -> &IndexSet<Location> {
		&self.locations
	}

	pub fn set_locations(&mut self, locations: impl IntoIterator<Item = Location>) {
		self.locations = locations.into_iter().collect();
	}

	/// Returns *true* if every field other than the name still holds its default.
	/// Name-only entries are pruned before serialization.
	pub fn has_name_only(&self) -> bool {
		self.enabled
			&& self.group.is_none()
			&& !self.local_priority.is_explicit()
			&& !self.global_priority.is_explicit()
			&& self.load_after.is_empty()
			&& self.requirements.is_empty()
			&& self.incompatibilities.is_empty()
			&& self.messages.is_empty()
			&& self.tags.is_empty()
			&& self.dirty_info.is_empty()
			&& self.clean_info.is_empty()
			&& self.locations.is_empty()
	}

	/// Merges another entry into a copy of this one, and returns the copy.
	///
	/// Scalars take the incoming side unless it still holds its default; sets union
	/// with identity-based dedup; messages concatenate. For priorities, the larger
	/// absolute value wins, and ties go to the incoming side.
	pub fn merge(&self, other: &PluginMetadata) -> PluginMetadata {
		let mut merged = self.clone();

		if other.has_name_only() { return merged; }

		merged.enabled = self.enabled && other.enabled;

		if other.is_group_explicit() {
			merged.group = other.group.clone();
		}

		merged.local_priority = merge_priority(self.local_priority, other.local_priority);
		merged.global_priority = merge_priority(self.global_priority, other.global_priority);

		merged.load_after.extend(other.load_after.iter().cloned());
		merged.requirements.extend(other.requirements.iter().cloned());
		merged.incompatibilities.extend(other.incompatibilities.iter().cloned());
		merged.tags.extend(other.tags.iter().cloned());
		merged.dirty_info.extend(other.dirty_info.iter().cloned());
		merged.clean_info.extend(other.clean_info.iter().cloned());
		merged.locations.extend(other.locations.iter().cloned());

		merged.messages.extend(other.messages.iter().cloned());

		merged
	}
}

/// Decides which of two priorities survives a merge.
fn merge_priority(ours: Priority, theirs: Priority) -> Priority {
	let wins = theirs.is_explicit()
		&& theirs.value().unsigned_abs() >= ours.value().unsigned_abs();

	match wins {
		true => theirs,
		false => ours,
	}
}

/// Compiles an entry name as a case-insensitive, fully-anchored regex.
fn compile_name_regex(name: &str) -> AppResult<regex::Regex> {
	regex::RegexBuilder::new(&format!("^(?:{name})$"))
		.case_insensitive(true)
		.build()
		.map_err(|e| AppError::ConditionSyntax(format!("invalid regex name '{name}': {e}")))
}

/// Splits a serialised priority integer into its global and local parts.
/// Values within a million of zero are purely local.
fn split_priority(value: i64) -> (Priority, Priority) {
	if value.abs() < GLOBAL_PRIORITY_DIVISOR {
		return (Priority::default(), Priority::new(value.clamp(i32::MIN as i64, i32::MAX as i64) as i32));
	}

	// Split at the nearest million so negative locals survive the round trip.
	let offset = match value >= 0 {
		true => GLOBAL_PRIORITY_DIVISOR / 2,
		false => -(GLOBAL_PRIORITY_DIVISOR / 2),
	};

	let global = (value + offset) / GLOBAL_PRIORITY_DIVISOR;
	let local = value - global * GLOBAL_PRIORITY_DIVISOR;

	(Priority::new(global as i32), Priority::new(local as i32))
}

/// Reassembles the single priority integer from its two parts.
fn join_priority(global: Priority, local: Priority) -> i64 {
	i64::from(global.value()) * GLOBAL_PRIORITY_DIVISOR + i64::from(local.value())
}

fn default_enabled() -> bool {
	true
}

fn is_true(value: &bool) -> bool {
	*value
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PluginMetadataRepr {
	name: String,
	#[serde(default = "default_enabled")]
	enabled: bool,
	group: Option<String>,
	priority: Option<i64>,
	#[serde(default)]
	after: Vec<File>,
	#[serde(default)]
	req: Vec<File>,
	#[serde(default)]
	inc: Vec<File>,
	#[serde(default)]
	msg: Vec<Message>,
	#[serde(default)]
	tag: Vec<Tag>,
	#[serde(default)]
	dirty: Vec<PluginCleaningData>,
	#[serde(default)]
	clean: Vec<PluginCleaningData>,
	#[serde(default)]
	url: Vec<Location>,
}

impl<'de> Deserialize<'de> for PluginMetadata {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let repr = PluginMetadataRepr::deserialize(deserializer)?;

		let mut metadata = PluginMetadata::new(repr.name).map_err(D::Error::custom)?;
		metadata.set_enabled(repr.enabled);

		if let Some(group) = repr.group {
			metadata.set_group(group);
		}

		if let Some(value) = repr.priority {
			let (global, local) = split_priority(value);
			metadata.set_global_priority(global);
			metadata.set_local_priority(local);
		}

		metadata.set_load_after(repr.after);
		metadata.set_requirements(repr.req);
		metadata.set_incompatibilities(repr.inc);
		metadata.set_messages(repr.msg);
		metadata.set_tags(repr.tag);
		metadata.set_dirty_info(repr.dirty);
		metadata.set_clean_info(repr.clean);
		metadata.set_locations(repr.url);

		Ok(metadata)
	}
}

impl Serialize for PluginMetadata {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		#[derive(Serialize)]
		struct Out<'a> {
			name: &'a str,
			#[serde(skip_serializing_if = "is_true")]
			enabled: bool,
			#[serde(skip_serializing_if = "Option::is_none")]
			group: Option<&'a str>,
			#[serde(skip_serializing_if = "Option::is_none")]
			priority: Option<i64>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			after: &'a IndexSet<File>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			req: &'a IndexSet<File>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			inc: &'a IndexSet<File>,
			#[serde(skip_serializing_if = "<[_]>::is_empty")]
			msg: &'a [Message],
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			tag: &'a IndexSet<Tag>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			dirty: &'a IndexSet<PluginCleaningData>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			clean: &'a IndexSet<PluginCleaningData>,
			#[serde(skip_serializing_if = "IndexSet::is_empty")]
			url: &'a IndexSet<Location>,
		}

		let priority = match self.local_priority.is_explicit() || self.global_priority.is_explicit() {
			true => Some(join_priority(self.global_priority, self.local_priority)),
			false => None,
		};

		Out {
			name: &self.name,
			enabled: self.enabled,
			group: self.group.as_deref(),
			priority,
			after: &self.load_after,
			req: &self.requirements,
			inc: &self.incompatibilities,
			msg: &self.messages,
			tag: &self.tags,
			dirty: &self.dirty_info,
			clean: &self.clean_info,
			url: &self.locations,
		}
		.serialize(serializer)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::structs::metadata::{MessageKind, TagSuggestion};

	#[test]
	fn regex_entries_are_detected_and_validated() {
		let exact = PluginMetadata::new("Blank.esp").unwrap();
		assert!(!exact.is_regex_entry());

		let pattern = PluginMetadata::new(r"Blank.*\.esp").unwrap();
		assert!(pattern.is_regex_entry());
		assert!(pattern.applies_to("Blank - Different.esp"));
		assert!(!pattern.applies_to("Other.esp"));

		assert!(PluginMetadata::new(r"Blank(\.esp").is_err());
	}

	#[test]
	fn exact_names_match_case_insensitively() {
		let metadata = PluginMetadata::new("Blank.esp").unwrap();
		assert!(metadata.applies_to("blank.ESP"));
	}

	#[test]
	fn fresh_entries_have_name_only() {
		let mut metadata = PluginMetadata::new("Blank.esp").unwrap();
		assert!(metadata.has_name_only());

		metadata.set_group("late");
		assert!(!metadata.has_name_only());
	}

	#[test]
	fn explicit_zero_priority_is_not_name_only() {
		let mut metadata = PluginMetadata::new("Blank.esp").unwrap();
		metadata.set_local_priority(Priority::new(0));
		assert!(!metadata.has_name_only());
	}

	#[test]
	fn merge_unions_sets_and_concatenates_messages() {
		let mut ours = PluginMetadata::new("Blank.esp").unwrap();
		ours.set_load_after([File::new("A.esp"), File::new("B.esp")]);
		ours.set_messages([Message::new(MessageKind::Say, "first")]);

		let mut theirs = PluginMetadata::new("Blank.esp").unwrap();
		theirs.set_load_after([File::new("b.ESP"), File::new("C.esp")]);
		theirs.set_messages([Message::new(MessageKind::Warn, "second")]);

		let merged = ours.merge(&theirs);
		assert_eq!(merged.load_after().len(), 3);
		assert_eq!(merged.messages().len(), 2);
	}

	#[test]
	fn merge_respects_explicit_group() {
		let mut ours = PluginMetadata::new("Blank.esp").unwrap();
		ours.set_group("early");

		let theirs = PluginMetadata::new("Blank.esp").unwrap();

		// An implicit group never overrides an explicit one.
		let merged = ours.merge(&theirs);
		assert_eq!(merged.group(), "early");

		let mut explicit = PluginMetadata::new("Blank.esp").unwrap();
		explicit.set_group("late");
		explicit.set_enabled(true);
		explicit.set_local_priority(Priority::new(1));

		let merged = ours.merge(&explicit);
		assert_eq!(merged.group(), "late");
	}

	#[test]
	fn merge_keeps_larger_absolute_priority() {
		let mut ours = PluginMetadata::new("Blank.esp").unwrap();
		ours.set_global_priority(Priority::new(-50));

		let mut theirs = PluginMetadata::new("Blank.esp").unwrap();
		theirs.set_global_priority(Priority::new(20));

		assert_eq!(ours.merge(&theirs).global_priority().value(), -50);

		theirs.set_global_priority(Priority::new(50));
		assert_eq!(ours.merge(&theirs).global_priority().value(), 50);
	}

	#[test]
	fn merge_ignores_name_only_entries() {
		let mut ours = PluginMetadata::new("Blank.esp").unwrap();
		ours.set_enabled(false);

		let theirs = PluginMetadata::new("Blank.esp").unwrap();
		assert!(!ours.merge(&theirs).is_enabled());
	}

	#[test]
	fn priority_round_trips_through_the_split() {
		for (global, local) in [(0, 5), (0, -5), (2, -5), (-2, 5), (1, 127), (-1, -127)] {
			let joined = join_priority(Priority::new(global), Priority::new(local));
			let (g, l) = split_priority(joined);
			assert_eq!((g.value(), l.value()), (global as i16, local as i16), "for {joined}");
		}
	}

	#[test]
	fn yaml_entry_reads_every_documented_key() {
		let text = r#"
name: 'Blank.esp'
priority: 2000003
after: ['A.esp']
req: [{name: 'B.esp', condition: 'file("C.esp")'}]
msg:
  - type: warn
    content: 'Watch out.'
tag: ['C.Water', '-C.Climate']
dirty:
  - crc: 0x5
    util: 'TES5Edit'
    itm: 1
url: ['https://example.com']
"#;

		let metadata: PluginMetadata = serde_yaml::from_str(text).unwrap();
		assert_eq!(metadata.global_priority().value(), 2);
		assert_eq!(metadata.local_priority().value(), 3);
		assert_eq!(metadata.load_after().len(), 1);
		assert_eq!(metadata.requirements().len(), 1);
		assert_eq!(metadata.tags().len(), 2);
		assert_eq!(metadata.dirty_info().len(), 1);
		assert_eq!(metadata.locations().len(), 1);

		let removal = metadata.tags().iter().find(|t| !t.is_addition()).unwrap();
		assert_eq!(removal.suggestion, TagSuggestion::Removal);
	}

	#[test]
	fn yaml_entry_rejects_unknown_keys() {
		assert!(serde_yaml::from_str::<PluginMetadata>("{name: 'A.esp', nonsense: 1}").is_err());
	}
}
