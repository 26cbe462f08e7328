//! This module defines the small value types that plugin metadata is built from.
//! Each type also knows how to read and write its YAML form, which is frequently
//! a scalar shorthand for the common case and a map for the full form.

use std::hash::{Hash, Hasher};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::util::text::normalize_filename;

/// The language used when a message has no better match for the caller.
pub const DEFAULT_LANGUAGE: &str = "en";

/// The name of the pseudo-group every plugin belongs to by default.
pub const DEFAULT_GROUP: &str = "default";

/// A sorting priority, clamped to the range [-127, 127].
/// A zero priority can still be explicit, which matters when merging metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct Priority {
	value: i16,
	explicit_zero: bool,
}

impl Priority {
	/// Builds an explicit priority, clamping the value into range.
	pub fn new(value: i32) -> Self {
		Self {
			value: value.clamp(-127, 127) as i16,
			explicit_zero: true,
		}
	}

	/// Returns the clamped priority value.
	pub fn value(&self) -> i16 {
		self.value
	}

	/// Returns *true* if this priority was set on purpose, even to zero.
	pub fn is_explicit(&self) -> bool {
		self.value != 0 || self.explicit_zero
	}
}

impl PartialEq for Priority {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value
	}
}

impl Eq for Priority {}

impl PartialOrd for Priority {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Priority {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.value.cmp(&other.value)
	}
}

/// A file referenced by plugin metadata, like a load-after target or requirement.
/// Identity is the case-folded name; the display text and condition don't count.
#[derive(Clone, Debug, Default)]
pub struct File {
	/// The file's name on disk, relative to the data directory.
	pub name: String,

	/// An optional friendlier name to show users instead.
	pub display: String,

	/// An optional condition gating whether this entry applies.
	pub condition: String,
}

impl File {
	/// Builds a file entry carrying only a name.
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), ..Default::default() }
	}

	/// Returns the name to show users: the display text when present, else the raw name.
	pub fn display_name(&self) -> &str {
		match self.display.is_empty() {
			true => &self.name,
			false => &self.display,
		}
	}

	/// Returns a copy of this entry with its condition cleared.
	pub fn without_condition(&self) -> Self {
		Self { condition: String::new(), ..self.clone() }
	}
}

impl PartialEq for File {
	fn eq(&self, other: &Self) -> bool {
		normalize_filename(&self.name) == normalize_filename(&other.name)
	}
}

impl Eq for File {}

impl Hash for File {
	fn hash<H: Hasher>(&self, state: &mut H) {
		normalize_filename(&self.name).hash(state);
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileRepr {
	Name(String),
	Full {
		name: String,
		#[serde(default)]
		display: String,
		#[serde(default)]
		condition: String,
	},
}

impl<'de> Deserialize<'de> for File {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let file = match FileRepr::deserialize(deserializer)? {
			FileRepr::Name(name) => File::new(name),
			FileRepr::Full { name, display, condition } => File { name, display, condition },
		};

		Ok(file)
	}
}

impl Serialize for File {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		if self.display.is_empty() && self.condition.is_empty() {
			return serializer.serialize_str(&self.name);
		}

		#[derive(Serialize)]
		struct Full<'a> {
			name: &'a str,
			#[serde(skip_serializing_if = "str::is_empty")]
			display: &'a str,
			#[serde(skip_serializing_if = "str::is_empty")]
			condition: &'a str,
		}

		Full { name: &self.name, display: &self.display, condition: &self.condition }
			.serialize(serializer)
	}
}

/// Whether a Bash Tag should be added to or removed from a plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagSuggestion {
	Addition,
	Removal,
}

/// A Bash Tag suggestion.
/// Identity is the tag's name plus the direction of the suggestion.
#[derive(Clone, Debug)]
pub struct Tag {
	/// The name of the tag, without any direction prefix.
	pub name: String,

	/// Whether the tag should be added or removed.
	pub suggestion: TagSuggestion,

	/// An optional condition gating this suggestion.
	pub condition: String,
}

impl Tag {
	/// Builds an addition suggestion for the named tag.
	pub fn addition(name: impl Into<String>) -> Self {
		Self { name: name.into(), suggestion: TagSuggestion::Addition, condition: String::new() }
	}

	/// Builds a removal suggestion for the named tag.
	pub fn removal(name: impl Into<String>) -> Self {
		Self { name: name.into(), suggestion: TagSuggestion::Removal, condition: String::new() }
	}

	/// Returns *true* if this suggestion asks for the tag to be added.
	pub fn is_addition(&self) -> bool {
		self.suggestion == TagSuggestion::Addition
	}

	/// Returns a copy of this suggestion with its condition cleared.
	pub fn without_condition(&self) -> Self {
		Self { condition: String::new(), ..self.clone() }
	}

	/// Splits a scalar form like '-C.Water' into a direction and a bare name.
	fn from_scalar(scalar: &str, condition: String) -> Self {
		match scalar.strip_prefix('-') {
			Some(name) => Self { name: name.to_owned(), suggestion: TagSuggestion::Removal, condition },
			None => Self { name: scalar.to_owned(), suggestion: TagSuggestion::Addition, condition },
		}
	}

	/// The scalar form of this tag's name, with a '-' prefix for removals.
	fn to_scalar(&self) -> String {
		match self.suggestion {
			TagSuggestion::Addition => self.name.clone(),
			TagSuggestion::Removal => format!("-{}", self.name),
		}
	}
}

impl PartialEq for Tag {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name && self.suggestion == other.suggestion
	}
}

impl Eq for Tag {}

impl Hash for Tag {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.name.hash(state);
		self.suggestion.hash(state);
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagRepr {
	Scalar(String),
	Full {
		name: String,
		#[serde(default)]
		condition: String,
	},
}

impl<'de> Deserialize<'de> for Tag {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let tag = match TagRepr::deserialize(deserializer)? {
			TagRepr::Scalar(scalar) => Tag::from_scalar(&scalar, String::new()),
			TagRepr::Full { name, condition } => Tag::from_scalar(&name, condition),
		};

		Ok(tag)
	}
}

impl Serialize for Tag {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		if self.condition.is_empty() {
			return serializer.serialize_str(&self.to_scalar());
		}

		#[derive(Serialize)]
		struct Full {
			name: String,
			condition: String,
		}

		Full { name: self.to_scalar(), condition: self.condition.clone() }.serialize(serializer)
	}
}

/// A single localisation of a message's text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageContent {
	/// The text itself.
	pub text: String,

	/// The language the text is written in, as a code like 'en' or 'pt_BR'.
	#[serde(rename = "lang", default = "default_language")]
	pub language: String,
}

fn default_language() -> String {
	DEFAULT_LANGUAGE.to_owned()
}

impl MessageContent {
	/// Builds an English content string.
	pub fn new(text: impl Into<String>) -> Self {
		Self { text: text.into(), language: DEFAULT_LANGUAGE.to_owned() }
	}

	/// Builds a content string in the given language.
	pub fn localized(text: impl Into<String>, language: impl Into<String>) -> Self {
		Self { text: text.into(), language: language.into() }
	}

	/// Picks the best content for a language: an exact match, else English, else the first entry.
	pub fn choose<'a>(content: &'a [MessageContent], language: &str) -> Option<&'a MessageContent> {
		content.iter()
			.find(|c| c.language == language)
			.or_else(|| content.iter().find(|c| c.language == DEFAULT_LANGUAGE))
			.or_else(|| content.first())
	}
}

/// How urgent a message is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
	Say,
	Warn,
	Error,
}

/// A message attached to a plugin or to the whole metadata document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
	/// How prominently the message should be shown.
	pub kind: MessageKind,

	/// The message's text, in one or more languages.
	pub content: Vec<MessageContent>,

	/// An optional condition gating this message.
	pub condition: String,
}

impl Message {
	/// Builds an unconditional English message.
	pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
		Self { kind, content: vec![MessageContent::new(text)], condition: String::new() }
	}

	/// Picks this message's text for a preferred language.
	pub fn text_for(&self, language: &str) -> Option<&MessageContent> {
		MessageContent::choose(&self.content, language)
	}

	/// Returns a copy of this message with its condition cleared.
	pub fn without_condition(&self) -> Self {
		Self { condition: String::new(), ..self.clone() }
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentRepr {
	One(String),
	Many(Vec<MessageContent>),
}

impl ContentRepr {
	fn into_content<E: DeError>(self) -> Result<Vec<MessageContent>, E> {
		let content = match self {
			ContentRepr::One(text) => vec![MessageContent::new(text)],
			ContentRepr::Many(content) => content,
		};

		// A multilingual message is useless without a fallback translation.
		let has_default = content.len() < 2
			|| content.iter().any(|c| c.language == DEFAULT_LANGUAGE);

		match has_default {
			true => Ok(content),
			false => Err(E::custom("multilingual content must include an 'en' string")),
		}
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MessageRepr {
	#[serde(rename = "type")]
	kind: MessageKind,
	content: ContentRepr,
	#[serde(default)]
	condition: String,
	#[serde(default)]
	subs: Vec<String>,
}

impl<'de> Deserialize<'de> for Message {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let repr = MessageRepr::deserialize(deserializer)?;
		let mut content = repr.content.into_content()?;

		// Substitutions fill '%1%'-style placeholders in every localisation.
		for (index, value) in repr.subs.iter().enumerate() {
			let placeholder = format!("%{}%", index + 1);
			for entry in content.iter_mut() {
				entry.text = entry.text.replace(&placeholder, value);
			}
		}

		Ok(Message { kind: repr.kind, content, condition: repr.condition })
	}
}

impl Serialize for Message {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		#[derive(Serialize)]
		#[serde(untagged)]
		enum ContentOut<'a> {
			One(&'a str),
			Many(&'a [MessageContent]),
		}

		#[derive(Serialize)]
		struct Out<'a> {
			#[serde(rename = "type")]
			kind: MessageKind,
			content: ContentOut<'a>,
			#[serde(skip_serializing_if = "str::is_empty")]
			condition: &'a str,
		}

		let content = match self.content.as_slice() {
			[only] if only.language == DEFAULT_LANGUAGE => ContentOut::One(&only.text),
			many => ContentOut::Many(many),
		};

		Out { kind: self.kind, content, condition: &self.condition }.serialize(serializer)
	}
}

/// A record of one cleaning (or verification) of a specific plugin revision.
/// Identity is the CRC of the plugin file the record describes.
#[derive(Clone, Debug)]
pub struct PluginCleaningData {
	/// The CRC of the plugin revision this data applies to.
	pub crc: u32,

	/// How many identical-to-master records the plugin carries.
	pub itm_count: u32,

	/// How many deleted references the plugin carries.
	pub deleted_reference_count: u32,

	/// How many deleted navmeshes the plugin carries.
	pub deleted_navmesh_count: u32,

	/// The utility (and version) that produced this data.
	pub cleaning_utility: String,

	/// Extra information for users, in one or more languages.
	pub info: Vec<MessageContent>,
}

impl PluginCleaningData {
	/// Builds cleaning data for a plugin revision.
	pub fn new(crc: u32, cleaning_utility: impl Into<String>) -> Self {
		Self {
			crc,
			itm_count: 0,
			deleted_reference_count: 0,
			deleted_navmesh_count: 0,
			cleaning_utility: cleaning_utility.into(),
			info: Vec::new(),
		}
	}
}

impl PartialEq for PluginCleaningData {
	fn eq(&self, other: &Self) -> bool {
		self.crc == other.crc
	}
}

impl Eq for PluginCleaningData {}

impl Hash for PluginCleaningData {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.crc.hash(state);
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CleaningRepr {
	crc: u32,
	util: String,
	#[serde(default)]
	itm: u32,
	#[serde(default)]
	udr: u32,
	#[serde(default)]
	nav: u32,
	info: Option<ContentRepr>,
}

impl<'de> Deserialize<'de> for PluginCleaningData {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let repr = CleaningRepr::deserialize(deserializer)?;

		let info = match repr.info {
			Some(content) => content.into_content()?,
			None => Vec::new(),
		};

		Ok(PluginCleaningData {
			crc: repr.crc,
			itm_count: repr.itm,
			deleted_reference_count: repr.udr,
			deleted_navmesh_count: repr.nav,
			cleaning_utility: repr.util,
			info,
		})
	}
}

impl Serialize for PluginCleaningData {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		#[derive(Serialize)]
		struct Out<'a> {
			crc: u32,
			util: &'a str,
			#[serde(skip_serializing_if = "is_zero")]
			itm: u32,
			#[serde(skip_serializing_if = "is_zero")]
			udr: u32,
			#[serde(skip_serializing_if = "is_zero")]
			nav: u32,
			#[serde(skip_serializing_if = "<[_]>::is_empty")]
			info: &'a [MessageContent],
		}

		Out {
			crc: self.crc,
			util: &self.cleaning_utility,
			itm: self.itm_count,
			udr: self.deleted_reference_count,
			nav: self.deleted_navmesh_count,
			info: &self.info,
		}
		.serialize(serializer)
	}
}

fn is_zero(value: &u32) -> bool {
	*value == 0
}

/// A place a plugin can be obtained from. Identity is the URL.
#[derive(Clone, Debug)]
pub struct Location {
	/// The URL itself.
	pub url: String,

	/// An optional label describing what the URL points at.
	pub name: String,
}

impl Location {
	/// Builds an unlabelled location.
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: url.into(), name: String::new() }
	}
}

impl PartialEq for Location {
	fn eq(&self, other: &Self) -> bool {
		self.url == other.url
	}
}

impl Eq for Location {}

impl Hash for Location {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.url.hash(state);
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationRepr {
	Url(String),
	Full {
		link: String,
		#[serde(default)]
		name: String,
	},
}

impl<'de> Deserialize<'de> for Location {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let location = match LocationRepr::deserialize(deserializer)? {
			LocationRepr::Url(url) => Location::new(url),
			LocationRepr::Full { link, name } => Location { url: link, name },
		};

		Ok(location)
	}
}

impl Serialize for Location {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		if self.name.is_empty() {
			return serializer.serialize_str(&self.url);
		}

		#[derive(Serialize)]
		struct Full<'a> {
			link: &'a str,
			name: &'a str,
		}

		Full { link: &self.url, name: &self.name }.serialize(serializer)
	}
}

/// A named bucket that coarsely positions a family of plugins.
/// Groups form a DAG through their 'after' sets; identity is the name.
#[derive(Clone, Debug)]
pub struct Group {
	/// The group's name.
	pub name: String,

	/// Names of the groups this one loads after.
	pub after: Vec<String>,
}

impl Group {
	/// Builds a group with an empty 'after' set.
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), after: Vec::new() }
	}
}

impl Default for Group {
	fn default() -> Self {
		Self::new(DEFAULT_GROUP)
	}
}

impl PartialEq for Group {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name
	}
}

impl Eq for Group {}

impl Hash for Group {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.name.hash(state);
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupRepr {
	name: String,
	#[serde(default)]
	after: Vec<String>,
}

impl<'de> Deserialize<'de> for Group {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let repr = GroupRepr::deserialize(deserializer)?;
		Ok(Group { name: repr.name, after: repr.after })
	}
}

impl Serialize for Group {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		#[derive(Serialize)]
		struct Out<'a> {
			name: &'a str,
			#[serde(skip_serializing_if = "<[_]>::is_empty")]
			after: &'a [String],
		}

		Out { name: &self.name, after: &self.after }.serialize(serializer)
	}
}
