//! Core GitWorkspace implementation

use git2::{Error as GitError, Repository, Signature};
use std::path::Path;

/// Handle on the shared git workspace (or one of its worktree clones)
pub struct GitWorkspace {
    pub(crate) repo: Repository,
}

impl GitWorkspace {
    /// Open an existing repository (works for worktrees too)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Initialize a fresh repository with an initial commit
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::init(path)?;
        let workspace = Self { repo };
        workspace.create_initial_commit()?;
        Ok(workspace)
    }

    /// Commit signature, falling back when the repo has no configured identity
    pub(crate) fn signature(&self) -> Result<Signature<'static>, GitError> {
        self.repo
            .signature()
            .or_else(|_| Signature::now("Foreman", "foreman@localhost"))
    }

    /// Stage everything and commit, returning the commit id
    pub fn commit_all(&self, message: &str) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;
        let parent = self.repo.head()?.peel_to_commit()?;

        let commit_id = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&parent],
        )?;

        Ok(commit_id.to_string())
    }
}
