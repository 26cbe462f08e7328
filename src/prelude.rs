//! This module re-exports a bunch of utilities used across this library.

#![allow(unused_imports)]

pub use tap::prelude::*;

pub use indexmap::{IndexMap, IndexSet};
pub use itertools::Itertools;
pub use thiserror::Error;

pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;

pub use crate::structs::error::{AppError, AppResult};

pub use crate::structs::metadata::{
	File, Group, Location, Message, MessageContent, MessageKind, PluginCleaningData, Priority,
	Tag, TagSuggestion,
};
pub use crate::structs::plugin::PluginMetadata;
pub use crate::structs::version::Version;
