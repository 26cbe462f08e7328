//! Loadcrab is a load order optimisation library for Bethesda games.
//!
//! Given the plugins a host has decoded, the curated metadata shipped in a
//! masterlist, and the user's own overrides, it computes a correct and stable
//! load order. The host stays in charge of everything game-specific: finding
//! the install, decoding plugin headers, and applying the sorted order.

mod prelude;

pub mod condition;
pub mod database;
pub mod document;
pub mod game;
pub mod masterlist;
pub mod sorting;
pub mod structs;
pub mod util;

pub use condition::ConditionEvaluator;
pub use database::Database;
pub use document::MetadataDocument;
pub use game::{GameCache, GameKind, LoadOrderHandler, LoadOrderProvider, Plugin, PluginData};
pub use masterlist::{Masterlist, MasterlistInfo};
pub use structs::error::{AppError, AppResult};
pub use structs::metadata::{
	File, Group, Location, Message, MessageContent, MessageKind, PluginCleaningData, Priority,
	Tag, TagSuggestion,
};
pub use structs::plugin::PluginMetadata;
pub use structs::version::Version;
