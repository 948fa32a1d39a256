//! Branch operations for GitWorkspace

use git2::{BranchType, Error as GitError};

use crate::git::GitWorkspace;

impl GitWorkspace {
    /// Create a branch at the current HEAD. A no-op when it already exists.
    pub fn ensure_branch(&self, name: &str) -> Result<(), GitError> {
        if self.branch_exists(name) {
            return Ok(());
        }

        // Handle the unborn-branch case for a repo with no commits yet
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                log::info!("[Git] No commits found, creating initial commit");
                self.create_initial_commit()?;
                self.repo.head()?
            }
            Err(e) => return Err(e),
        };

        let head_commit = head.peel_to_commit()?;
        self.repo.branch(name, &head_commit, false)?;
        Ok(())
    }

    /// Create an initial empty commit for a new repository
    pub(crate) fn create_initial_commit(&self) -> Result<(), GitError> {
        let tree_id = self.repo.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let signature = self.signature()?;

        self.repo
            .commit(Some("HEAD"), &signature, &signature, "Initial commit", &tree, &[])?;

        Ok(())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Delete a local branch
    pub fn delete_branch(&self, name: &str) -> Result<(), GitError> {
        let mut branch = self.repo.find_branch(name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    }

    /// Checkout a branch
    pub fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        let obj = self.repo.revparse_single(&format!("refs/heads/{}", name))?;

        self.repo.checkout_tree(&obj, None)?;
        self.repo.set_head(&format!("refs/heads/{}", name))?;

        Ok(())
    }

    /// Name of the branch HEAD points to
    pub fn current_branch_name(&self) -> Result<String, GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(GitError::from_str("HEAD is not a branch"));
        }
        Ok(head.shorthand().unwrap_or("").to_string())
    }

    /// Default branch resolution: HEAD branch, then "main"/"master", then "main"
    pub fn default_branch_name(&self) -> String {
        if let Ok(head) = self.repo.head() {
            if head.is_branch() {
                if let Some(name) = head.shorthand() {
                    return name.to_string();
                }
            }
        }

        for name in &["main", "master"] {
            if self.branch_exists(name) {
                return (*name).to_string();
            }
        }

        "main".to_string()
    }
}
