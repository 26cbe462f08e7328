//! This module contains the errors used all over this codebase.

use std::path::PathBuf;

use crate::prelude::*;

/// Convenience wrapper around *Result<T, AppError>*.
pub type AppResult<T> = Result<T, AppError>;

/// Error returned by several functions in Loadcrab.
#[derive(Error, Debug)]
pub enum AppError {
	/// Error returned when a file could not be read, written, or parsed.
	/// Most of these occur at a metadata document boundary.
	#[error("failed to access '{}': {details}", .path.display())]
	FileAccess {
		/// The file that could not be accessed.
		path: PathBuf,

		/// A short description of what actually went wrong.
		details: String,
	},

	/// Error returned when a condition is malformed or names an unsafe path.
	#[error("invalid condition: {0}")]
	ConditionSyntax(String),

	/// Error returned when two or more plugins ask to load after each other.
	/// This is fatal for the current sort, but the caller may retry after fixing its metadata.
	#[error("cyclic interaction between '{from}' and '{target}': {}", .trail.join(", "))]
	CyclicInteraction {
		/// The plugin the offending edge starts from.
		from: String,

		/// The plugin the offending edge points back to.
		target: String,

		/// Every plugin along the cycle, in the order the sorter walked them.
		trail: Vec<String>,
	},

	/// Error returned when the masterlist repository is missing or in an unexpected state.
	#[error("masterlist repository error: {0}")]
	GitState(String),

	/// Error returned when a caller passes something nonsensical, like an empty branch name
	/// or a second metadata entry for the same plugin.
	#[error("{0}")]
	InvalidArgument(String),

	/// Error returned when an internal invariant is broken.
	/// Seeing one of these is a bug in Loadcrab itself.
	#[error("internal logic error: {0}")]
	Logic(String),
}

impl AppError {
	/// Builds a *FileAccess* error for the provided path.
	pub fn file_access(path: impl Into<PathBuf>, details: impl ToString) -> Self {
		Self::FileAccess {
			path: path.into(),
			details: details.to_string(),
		}
	}
}

impl From<git2::Error> for AppError {
	fn from(value: git2::Error) -> Self {
		Self::GitState(value.message().to_owned())
	}
}
