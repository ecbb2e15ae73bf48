/*
* File: src/git.rs
*
* The git workspace: clone-or-fetch a remote repository to a local path,
* check out a revision, and tear the workspace down again. Every
* distinct failure surfaces as an `Error::Internal` wrapped with a
* stage-specific message (clone/open/fetch/checkout/pull/head/cleanup).
* No retries happen inside this module; the queue-worker boundary owns
* that.
*
* `git2` is a synchronous library, so every call here runs inside
* `tokio::task::spawn_blocking`, the same pattern
* `phkaiser13-PeitchGIT`'s `git_ops::perform_git_operations` uses to keep
* libgit2 off the async executor's threads.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};

/// Owns an optional bearer credential used for HTTP(S) remotes. The
/// credential is sent as basic-auth with an arbitrary non-empty username
/// and the token as the password, only when a non-empty token was
/// configured.
#[derive(Clone, Default)]
pub struct GitWorkspace {
    token: Option<String>,
}

impl GitWorkspace {
    pub fn new(token: Option<String>) -> Self {
        let token = token.filter(|t| !t.is_empty());
        Self { token }
    }

    fn remote_callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(token) = &self.token {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("git", token)
            });
        }
        callbacks
    }

    /// Clone `url` into `path` if it does not exist yet, otherwise open
    /// the existing repository and force-fetch. "Already up to date" is
    /// not an error.
    pub async fn sync(&self, url: String, path: PathBuf) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.sync_blocking(&url, &path))
            .await
            .map_err(|e| Error::Internal(format!("git sync task panicked: {e}")))?
    }

    fn sync_blocking(&self, url: &str, path: &Path) -> Result<()> {
        if !path.exists() {
            let mut fetch_options = FetchOptions::new();
            fetch_options.remote_callbacks(self.remote_callbacks());
            let mut builder = git2::build::RepoBuilder::new();
            builder.fetch_options(fetch_options);
            builder
                .clone(url, path)
                .map_err(|e| Error::Internal(format!("clone-failed: {e}")))?;
            return Ok(());
        }

        let repo = Repository::open(path)
            .map_err(|e| Error::Internal(format!("open-failed: {e}")))?;

        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| Error::Internal(format!("fetch-failed: no origin remote: {e}")))?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.remote_callbacks());
        match remote.fetch(&[] as &[&str], Some(&mut fetch_options), None) {
            Ok(()) => Ok(()),
            Err(e) if is_already_up_to_date(&e) => Ok(()),
            Err(e) => Err(Error::Internal(format!("fetch-failed: {e}"))),
        }
    }

    /// Check out `revision` as a branch reference (force), pull (force),
    /// and return the resolved HEAD commit id as lowercase hex.
    pub async fn checkout(&self, path: PathBuf, revision: String) -> Result<String> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.checkout_blocking(&path, &revision))
            .await
            .map_err(|e| Error::Internal(format!("git checkout task panicked: {e}")))?
    }

    fn checkout_blocking(&self, path: &Path, revision: &str) -> Result<String> {
        let repo = Repository::open(path)
            .map_err(|e| Error::Internal(format!("open-failed: {e}")))?;

        let branch_ref = format!("refs/remotes/origin/{revision}");
        let commit = repo
            .revparse_single(&branch_ref)
            .or_else(|_| repo.revparse_single(revision))
            .map_err(|e| Error::Internal(format!("checkout-failed: {e}")))?;

        repo.checkout_tree(&commit, Some(git2::build::CheckoutBuilder::new().force()))
            .map_err(|e| Error::Internal(format!("checkout-failed: {e}")))?;
        repo.set_head_detached(commit.id())
            .map_err(|e| Error::Internal(format!("checkout-failed: {e}")))?;

        // Pull: fast-forward the detached HEAD to the remote tip again in
        // case new commits landed between the sync and this checkout.
        let mut remote = repo
            .find_remote("origin")
            .map_err(|e| Error::Internal(format!("pull-failed: no origin remote: {e}")))?;
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(self.remote_callbacks());
        match remote.fetch(&[revision], Some(&mut fetch_options), None) {
            Ok(()) => {}
            Err(e) if is_already_up_to_date(&e) => {}
            Err(e) => return Err(Error::Internal(format!("pull-failed: {e}"))),
        }

        let head = repo
            .head()
            .map_err(|e| Error::Internal(format!("head-unreadable: {e}")))?;
        let oid = head
            .target()
            .ok_or_else(|| Error::Internal("head-unreadable: HEAD has no target".to_string()))?;

        Ok(oid.to_string())
    }

    /// Recursively remove the workspace directory. Idempotent on a
    /// missing path.
    pub async fn cleanup(&self, path: PathBuf) -> Result<()> {
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(());
            }
            std::fs::remove_dir_all(&path)
                .map_err(|e| Error::Internal(format!("cleanup-failed: {e}")))
        })
        .await
        .map_err(|e| Error::Internal(format!("cleanup task panicked: {e}")))?
    }
}

fn is_already_up_to_date(e: &git2::Error) -> bool {
    e.code() == git2::ErrorCode::NotFound && e.class() == git2::ErrorClass::Reference
        || e.message().to_lowercase().contains("up to date")
        || e.message().to_lowercase().contains("up-to-date")
}

/// Computes `⟨tmp⟩/⟨app-name⟩/⟨sanitized-repo-url⟩`, replacing
/// path-separator characters in the repository URL with underscores.
pub fn workspace_path(app_name: &str, repository: &str) -> PathBuf {
    let sanitized = repository.replace(['/', '\\'], "_");
    std::env::temp_dir().join(app_name).join(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_path_sanitizes_separators() {
        let p = workspace_path("app-one", "git://example/ok.git");
        assert_eq!(
            p,
            std::env::temp_dir()
                .join("app-one")
                .join("git:__example_ok.git")
        );
    }

    #[test]
    fn token_filtering_drops_empty_strings() {
        let ws = GitWorkspace::new(Some(String::new()));
        assert!(ws.token.is_none());
        let ws = GitWorkspace::new(Some("abc".to_string()));
        assert!(ws.token.is_some());
    }
}
