//! This module defines the merged view of a plugin that the sorter works on.

use crate::game::plugin::PluginData;
use crate::prelude::*;

/// Everything the sorter needs to know about one plugin: the header facts from
/// its descriptor, plus its merged and evaluated metadata.
///
/// These values only live for the duration of a single sort. Priorities start
/// from the metadata and are then raised in place by propagation.
pub struct PluginSortingData<'a, P: PluginData> {
	plugin: &'a P,
	local_priority: Priority,
	global_priority: Priority,
	load_after: IndexSet<File>,
	requirements: IndexSet<File>,
}

impl<'a, P: PluginData> PluginSortingData<'a, P> {
	/// Pairs a plugin descriptor with its evaluated metadata.
	pub fn new(plugin: &'a P, metadata: &PluginMetadata) -> Self {
		Self {
			plugin,
			local_priority: metadata.local_priority(),
			global_priority: metadata.global_priority(),
			load_after: metadata.load_after().clone(),
			requirements: metadata.requirements().clone(),
		}
	}

	pub fn name(&self) -> &str {
		self.plugin.name()
	}

	/// Whether this plugin partitions with the masters.
	/// Light and medium plugins load in the master block, so they count too.
	pub fn is_master(&self) -> bool {
		self.plugin.is_master_flagged()
			|| self.plugin.is_light_flagged()
			|| self.plugin.is_medium_flagged()
	}

	pub fn loads_archive(&self) -> bool {
		self.plugin.loads_archive()
	}

	pub fn masters(&self) -> &[String] {
		self.plugin.masters()
	}

	pub fn override_record_count(&self) -> usize {
		self.plugin.override_record_count()
	}

	pub fn overlaps_with(&self, other: &Self) -> bool {
		self.plugin.records_overlap(other.plugin)
	}

	pub fn load_after(&self) -> &IndexSet<File> {
		&self.load_after
	}

	pub fn requirements(&self) -> &IndexSet<File> {
		&self.requirements
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

	/// Returns *true* if either priority is set away from zero.
	pub fn has_nonzero_priority(&self) -> bool {
		self.local_priority.value() != 0 || self.global_priority.value() != 0
	}
}
