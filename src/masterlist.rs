//! This module keeps the shared masterlist in sync with its remote repository.
//!
//! The masterlist is a metadata document distributed through a git repository.
//! Updating means fetching the remote, resetting a local tracking branch onto
//! the remote tip, and then parsing the checked-out file. If the freshest
//! revision doesn't parse, the checkout walks back one commit at a time until
//! one does, so a broken upstream push never leaves users without metadata.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{BranchType, Repository, Status};

use crate::document::MetadataDocument;
use crate::prelude::*;

/// Revision details for a masterlist checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterlistInfo {
	/// The checked-out commit id, long or short as requested.
	pub revision_id: String,

	/// The commit date, as a UTC `yyyy-mm-dd` string.
	pub revision_date: String,

	/// Whether the working copy of the masterlist differs from the commit.
	pub is_modified: bool,
}

/// A metadata document tracked by a remote git repository.
#[derive(Clone, Debug, Default)]
pub struct Masterlist {
	document: MetadataDocument,
}

impl Masterlist {
	/// The parsed document behind this masterlist.
	pub fn document(&self) -> &MetadataDocument {
		&self.document
	}

	/// Loads the masterlist straight from a file, without touching git.
	pub fn load(&mut self, path: impl AsRef<Path>) -> AppResult<()> {
		self.document.load(path)
	}

	/// Fetches the latest masterlist revision and parses it.
	///
	/// Returns *true* if the working copy changed, and *false* if it was
	/// already at the remote tip with the file unmodified.
	pub fn update(&mut self, path: &Path, repo_url: &str, branch: &str) -> AppResult<bool> {
		if repo_url.is_empty() || branch.is_empty() {
			return Err(AppError::InvalidArgument(
				"the masterlist repository URL and branch must not be empty".into(),
			));
		}

		let Some(repo_dir) = path.parent() else {
			return Err(AppError::InvalidArgument(format!(
				"masterlist path '{}' has no parent directory",
				path.display(),
			)));
		};

		let filename = path.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.ok_or_else(|| AppError::InvalidArgument(format!(
				"masterlist path '{}' has no filename",
				path.display(),
			)))?;

		trace!("checking for a git repository at: {}", repo_dir.display());

		let repo = match Repository::open(repo_dir) {
			Ok(repo) => {
				let up_to_date = Self::sync_to_remote(&repo, repo_url, branch, &filename)?;
				if up_to_date {
					info!("local branch and masterlist file are already up to date");
					return Ok(false);
				}

				repo
			}

			Err(_) => {
				info!("cloning masterlist repository from {repo_url}");
				fs::create_dir_all(repo_dir)
					.map_err(|e| AppError::file_access(repo_dir, e))?;

				git2::build::RepoBuilder::new()
					.branch(branch)
					.clone(repo_url, repo_dir)?
			}
		};

		// The working directory now holds the newest masterlist. Parse it; on
		// failure, detach one commit back and try again until one parses.
		loop {
			match self.document.load(path) {
				Ok(()) => return Ok(true),

				Err(parse_error) => {
					warn!("masterlist parsing failed, rolling back a revision: {parse_error}");

					let head = repo.head()?.peel_to_commit()?;
					let parent = head.parent(0).map_err(|_| {
						AppError::GitState(
							"no masterlist revision parses, and there is nothing left to roll back to".into(),
						)
					})?;

					repo.set_head_detached(parent.id())?;
					repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
				}
			}
		}
	}

	/// Reports the revision of an existing masterlist checkout.
	pub fn info(path: &Path, short_id: bool) -> AppResult<MasterlistInfo> {
		if !path.exists() {
			return Err(AppError::file_access(path, "no masterlist present"));
		}

		let repo_dir = path.parent().unwrap_or(Path::new("."));
		let repo = Repository::open(repo_dir).map_err(|_| {
			AppError::GitState(format!("'{}' is not a git repository", repo_dir.display()))
		})?;

		let head = repo.head()?.peel_to_commit()?;

		let revision_id = match short_id {
			true => head.as_object()
				.short_id()?
				.as_str()
				.unwrap_or_default()
				.to_owned(),
			false => head.id().to_string(),
		};

		let revision_date = DateTime::<Utc>::from_timestamp(head.time().seconds(), 0)
			.map(|date| date.format("%Y-%m-%d").to_string())
			.unwrap_or_default();

		let filename = path.file_name().unwrap_or_default();
		let is_modified = Self::is_file_modified(&repo, Path::new(filename))?;

		Ok(MasterlistInfo { revision_id, revision_date, is_modified })
	}

	/// Returns *true* if the checkout is at the remote tip of the given branch.
	pub fn is_latest(path: &Path, branch: &str) -> AppResult<bool> {
		if branch.is_empty() {
			return Err(AppError::InvalidArgument("the repository branch must not be empty".into()));
		}

		let repo_dir = path.parent().unwrap_or(Path::new("."));
		let repo = Repository::open(repo_dir).map_err(|_| {
			AppError::GitState(format!("'{}' is not a git repository", repo_dir.display()))
		})?;

		// Fetching with no explicit refspecs uses the remote's configured ones,
		// which keeps the origin/* tracking refs current.
		repo.find_remote("origin")?.fetch(&[] as &[&str], None, None)?;

		let Ok(local) = repo.find_branch(branch, BranchType::Local) else {
			return Ok(false);
		};

		let remote_tip = repo
			.find_branch(&format!("origin/{branch}"), BranchType::Remote)?
			.get()
			.peel_to_commit()?
			.id();

		// Object ids compare by value; equal bytes mean the same revision.
		let at_tip = local.get().peel_to_commit()?.id() == remote_tip;

		Ok(at_tip && local.is_head())
	}

	/// Fetches the remote and puts the local tracking branch at its tip.
	/// Returns *true* if everything was already up to date.
	fn sync_to_remote(
		repo: &Repository,
		repo_url: &str,
		branch: &str,
		filename: &str,
	) -> AppResult<bool> {
		// A single-URL remote called "origin" is assumed, as clones create one.
		repo.remote_set_url("origin", repo_url)?;
		repo.find_remote("origin")?.fetch(&[] as &[&str], None, None)?;

		let remote_commit = repo
			.find_branch(&format!("origin/{branch}"), BranchType::Remote)?
			.get()
			.peel_to_commit()?;

		debug!("checking if branch {branch} is up to date and checked out without edits");

		if let Ok(mut local) = repo.find_branch(branch, BranchType::Local) {
			let at_tip = local.get().peel_to_commit()?.id() == remote_commit.id();

			if at_tip && local.is_head() && !Self::is_file_modified(repo, Path::new(filename))? {
				return Ok(true);
			}

			// The local branch is stale, diverged, or dirty. Rebuilding it from
			// the remote tip covers fast-forward and reset alike. HEAD has to be
			// detached first, as a checked-out branch can't be deleted.
			let checkout = local.get().peel_to_commit()?;
			repo.set_head_detached(checkout.id())?;
			local.delete()?;
		}

		repo.branch(branch, &remote_commit, true)?;
		repo.set_head(&format!("refs/heads/{branch}"))?;
		repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

		Ok(false)
	}

	/// Returns *true* if the working copy of a file differs from HEAD.
	fn is_file_modified(repo: &Repository, file: &Path) -> AppResult<bool> {
		let status = repo.status_file(file)?;

		Ok(status.intersects(
			Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_NEW | Status::INDEX_MODIFIED,
		))
	}
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::path::PathBuf;

	use git2::Signature;

	use super::*;

	/// Builds a bare "remote" repository with a masterlist history, and returns
	/// its URL along with the directory that keeps it alive.
	fn build_remote(revisions: &[&str]) -> (tempfile::TempDir, String) {
		let dir = tempfile::tempdir().unwrap();
		let work = dir.path().join("upstream");
		fs::create_dir(&work).unwrap();

		let repo = Repository::init(&work).unwrap();
		let signature = Signature::now("curator", "curator@example.com").unwrap();

		let mut parent = None;
		for text in revisions {
			fs::write(work.join("masterlist.yaml"), text).unwrap();

			let mut index = repo.index().unwrap();
			index.add_path(Path::new("masterlist.yaml")).unwrap();
			index.write().unwrap();

			let tree_id = index.write_tree().unwrap();
			let tree = repo.find_tree(tree_id).unwrap();

			let parents: Vec<_> = parent.iter().collect();
			let commit = repo
				.commit(Some("HEAD"), &signature, &signature, "update", &tree, &parents)
				.unwrap();
			parent = Some(repo.find_commit(commit).unwrap());
		}

		let url = format!("file://{}", work.display());
		(dir, url)
	}

	fn local_masterlist_path(dir: &tempfile::TempDir) -> PathBuf {
		dir.path().join("checkout").join("masterlist.yaml")
	}

	const GOOD: &str = "plugins:\n  - name: 'Blank.esp'\n    group: 'late'\n";
	const BETTER: &str = "plugins:\n  - name: 'Blank.esp'\n    group: 'late'\n  - name: 'Blank.esm'\n    group: 'early'\n";
	const BROKEN: &str = "plugins:\n  - name: 'Blank.esp'\n    condition: [\n";

	#[test]
	fn update_clones_and_parses() {
		let (remote_dir, url) = build_remote(&[GOOD]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		assert!(masterlist.update(&path, &url, "master").unwrap());
		assert_eq!(masterlist.document().plugins().count(), 1);
	}

	#[test]
	fn update_is_idempotent_at_the_tip() {
		let (remote_dir, url) = build_remote(&[GOOD]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		assert!(masterlist.update(&path, &url, "master").unwrap());
		assert!(!masterlist.update(&path, &url, "master").unwrap());
	}

	#[test]
	fn update_rolls_back_until_a_revision_parses() {
		let (remote_dir, url) = build_remote(&[GOOD, BROKEN]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		assert!(masterlist.update(&path, &url, "master").unwrap());

		// The tip is broken, so the checkout should hold the older revision.
		assert_eq!(fs::read_to_string(&path).unwrap(), GOOD);
		assert_eq!(masterlist.document().plugins().count(), 1);
	}

	#[test]
	fn update_follows_new_remote_revisions() {
		let (remote_dir, url) = build_remote(&[GOOD]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		assert!(masterlist.update(&path, &url, "master").unwrap());

		// Push another revision upstream, then update again.
		let upstream = remote_dir.path().join("upstream");
		let repo = Repository::open(&upstream).unwrap();
		let signature = Signature::now("curator", "curator@example.com").unwrap();

		fs::write(upstream.join("masterlist.yaml"), BETTER).unwrap();
		let mut index = repo.index().unwrap();
		index.add_path(Path::new("masterlist.yaml")).unwrap();
		index.write().unwrap();
		let tree_id = index.write_tree().unwrap();
		let tree = repo.find_tree(tree_id).unwrap();
		let head = repo.head().unwrap().peel_to_commit().unwrap();
		repo.commit(Some("HEAD"), &signature, &signature, "update", &tree, &[&head]).unwrap();

		assert!(masterlist.update(&path, &url, "master").unwrap());
		assert_eq!(masterlist.document().plugins().count(), 2);
	}

	#[test]
	fn update_rejects_empty_arguments() {
		let mut masterlist = Masterlist::default();
		let result = masterlist.update(Path::new("somewhere/masterlist.yaml"), "", "master");

		assert!(matches!(result, Err(AppError::InvalidArgument(_))));
	}

	#[test]
	fn info_reports_revision_and_modification() {
		let (remote_dir, url) = build_remote(&[GOOD]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		masterlist.update(&path, &url, "master").unwrap();

		let info = Masterlist::info(&path, true).unwrap();
		assert!(!info.revision_id.is_empty());
		assert!(info.revision_id.len() < 40);
		assert!(!info.is_modified);

		let long = Masterlist::info(&path, false).unwrap();
		assert_eq!(long.revision_id.len(), 40);
		assert!(long.revision_id.starts_with(&info.revision_id));

		// Dates come out as UTC yyyy-mm-dd.
		assert_eq!(info.revision_date.len(), 10);

		fs::write(&path, "plugins: []\n").unwrap();
		assert!(Masterlist::info(&path, true).unwrap().is_modified);
	}

	#[test]
	fn info_fails_without_a_file_or_repository() {
		assert!(matches!(
			Masterlist::info(Path::new("nowhere/masterlist.yaml"), true),
			Err(AppError::FileAccess { .. }),
		));

		let dir = tempfile::tempdir().unwrap();
		let loose = dir.path().join("masterlist.yaml");
		fs::write(&loose, GOOD).unwrap();

		assert!(matches!(
			Masterlist::info(&loose, true),
			Err(AppError::GitState(_)),
		));
	}

	#[test]
	fn is_latest_tracks_the_remote_tip() {
		let (remote_dir, url) = build_remote(&[GOOD]);
		let path = local_masterlist_path(&remote_dir);

		let mut masterlist = Masterlist::default();
		masterlist.update(&path, &url, "master").unwrap();

		assert!(Masterlist::is_latest(&path, "master").unwrap());
		assert!(matches!(
			Masterlist::is_latest(&path, ""),
			Err(AppError::InvalidArgument(_)),
		));
	}
}
