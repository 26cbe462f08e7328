//! This module wraps the host's view of the game's load order.

use crate::prelude::*;
use crate::util::text::normalize_filename;

/// Capability provided by the host's game-install probe.
/// Loadcrab never reads load-order state off disk itself.
pub trait LoadOrderProvider {
	/// The plugins that are currently active, in no particular order.
	fn active_plugins(&self) -> Vec<String>;

	/// Every known plugin, in its current load order.
	fn load_order(&self) -> Vec<String>;
}

/// Answers load-order queries by delegating to a provider.
pub struct LoadOrderHandler {
	provider: Box<dyn LoadOrderProvider>,
}

impl LoadOrderHandler {
	/// Wraps a host-supplied provider.
	pub fn new(provider: Box<dyn LoadOrderProvider>) -> Self {
		Self { provider }
	}

	/// Returns *true* if the named plugin is currently active.
	pub fn is_plugin_active(&self, name: &str) -> bool {
		let folded = normalize_filename(name);

		self.provider
			.active_plugins()
			.iter()
			.any(|active| normalize_filename(active) == folded)
	}

	/// The set of active plugins.
	pub fn active_plugins(&self) -> IndexSet<String> {
		self.provider.active_plugins().into_iter().collect()
	}

	/// The current load order.
	pub fn load_order(&self) -> Vec<String> {
		self.provider.load_order()
	}
}
