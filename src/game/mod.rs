//! This module holds the game-facing side of the library: which game is being
//! managed, the plugin descriptors the host feeds in, and the caches built on top.

pub mod cache;
pub mod loadorder;
pub mod plugin;

pub use cache::GameCache;
pub use loadorder::{LoadOrderHandler, LoadOrderProvider};
pub use plugin::{Plugin, PluginData};

use crate::util::text::{normalize_filename, trim_ghost_extension};

/// The games Loadcrab knows how to sort plugins for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameKind {
	Oblivion,
	Skyrim,
	SkyrimSE,
	Fallout3,
	FalloutNV,
	Fallout4,
}

impl GameKind {
	/// Returns *true* if this game supports light (.esl) plugins.
	pub fn supports_light_plugins(&self) -> bool {
		matches!(self, GameKind::SkyrimSE | GameKind::Fallout4)
	}

	/// Returns *true* if the filename carries a plugin extension for this game.
	/// A trailing '.ghost' is ignored, as ghosted plugins are still plugins.
	pub fn is_plugin_filename(&self, name: &str) -> bool {
		let folded = normalize_filename(trim_ghost_extension(name));

		folded.ends_with(".esp")
			|| folded.ends_with(".esm")
			|| (self.supports_light_plugins() && folded.ends_with(".esl"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn plugin_extensions_depend_on_the_game() {
		assert!(GameKind::Skyrim.is_plugin_filename("Blank.esp"));
		assert!(GameKind::Skyrim.is_plugin_filename("Blank.ESM"));
		assert!(GameKind::Skyrim.is_plugin_filename("Blank.esp.ghost"));
		assert!(!GameKind::Skyrim.is_plugin_filename("Blank.esl"));
		assert!(!GameKind::Skyrim.is_plugin_filename("readme.txt"));

		assert!(GameKind::SkyrimSE.is_plugin_filename("Blank.esl"));
		assert!(GameKind::Fallout4.is_plugin_filename("Blank.esl.ghost"));
	}
}
