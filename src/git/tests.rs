//! Tests for GitWorkspace

#[cfg(test)]
mod tests {
    use crate::git::GitWorkspace;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn setup_test_repo() -> (TempDir, GitWorkspace) {
        let temp_dir = TempDir::new().unwrap();
        let workspace = GitWorkspace::init(temp_dir.path()).unwrap();

        fs::write(temp_dir.path().join("test.txt"), "Hello, World!\n").unwrap();
        workspace.commit_all("Add test file").unwrap();

        (temp_dir, workspace)
    }

    fn write_and_commit(repo_path: &Path, workspace: &GitWorkspace, file: &str, content: &str) {
        fs::write(repo_path.join(file), content).unwrap();
        workspace.commit_all(&format!("Update {}", file)).unwrap();
    }

    #[test]
    fn test_init_creates_initial_commit() {
        let (_temp_dir, workspace) = setup_test_repo();
        let branch = workspace.current_branch_name().unwrap();
        assert!(branch == "main" || branch == "master");
    }

    #[test]
    fn test_ensure_branch_and_checkout() {
        let (_temp_dir, workspace) = setup_test_repo();

        workspace.ensure_branch("task/t1").unwrap();
        assert!(workspace.branch_exists("task/t1"));

        // Idempotent
        workspace.ensure_branch("task/t1").unwrap();

        workspace.checkout_branch("task/t1").unwrap();
        assert_eq!(workspace.current_branch_name().unwrap(), "task/t1");
    }

    #[test]
    fn test_delete_branch() {
        let (_temp_dir, workspace) = setup_test_repo();

        workspace.ensure_branch("to-delete").unwrap();
        workspace.delete_branch("to-delete").unwrap();
        assert!(!workspace.branch_exists("to-delete"));
    }

    #[test]
    fn test_add_worktree() {
        let (temp_dir, workspace) = setup_test_repo();

        let worktree_path = temp_dir.path().join("wt-t1");
        let info = workspace
            .add_worktree("task/t1", &worktree_path)
            .unwrap();

        assert_eq!(info.name, "task-t1");
        assert!(worktree_path.exists());
        assert_eq!(info.branch.as_deref(), Some("task/t1"));
    }

    #[test]
    fn test_remove_worktree() {
        let (temp_dir, workspace) = setup_test_repo();

        let worktree_path = temp_dir.path().join("wt-t2");
        workspace.add_worktree("task/t2", &worktree_path).unwrap();
        assert!(worktree_path.exists());

        workspace.remove_worktree(&worktree_path).unwrap();
        assert!(!worktree_path.exists());
    }

    #[test]
    fn test_clean_merge_produces_commit() {
        let (temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        write_and_commit(temp_dir.path(), &workspace, "feature.txt", "new feature\n");

        let outcome = workspace.merge_into("task/t1", &main).unwrap();
        assert!(outcome.success);
        assert!(outcome.conflict_files.is_empty());
        assert!(temp_dir.path().join("feature.txt").exists());
    }

    #[test]
    fn test_merge_already_up_to_date() {
        let (_temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/noop").unwrap();
        let outcome = workspace.merge_into("task/noop", &main).unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.message, "Already up to date");
    }

    #[test]
    fn test_conflicting_merge_reports_files() {
        let (temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        // Diverge the same file on both branches
        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        write_and_commit(temp_dir.path(), &workspace, "test.txt", "branch version\n");

        workspace.checkout_branch(&main).unwrap();
        write_and_commit(temp_dir.path(), &workspace, "test.txt", "main version\n");

        let outcome = workspace.merge_into("task/t1", &main).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.conflict_files, vec!["test.txt"]);

        // Conflict details expose all three sides
        let details = workspace.conflict_details().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].path, "test.txt");
        assert!(details[0].our_content.contains("main version"));
        assert!(details[0].their_content.contains("branch version"));
        assert!(details[0].ancestor_content.contains("Hello, World!"));
        assert!(details[0].conflict_markers.contains("<<<<<<<"));

        workspace.abort_merge().unwrap();
        let content = fs::read_to_string(temp_dir.path().join("test.txt")).unwrap();
        assert_eq!(content, "main version\n");
    }

    #[test]
    fn test_resolve_and_finish_merge() {
        let (temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        write_and_commit(temp_dir.path(), &workspace, "test.txt", "branch version\n");

        workspace.checkout_branch(&main).unwrap();
        write_and_commit(temp_dir.path(), &workspace, "test.txt", "main version\n");

        let outcome = workspace.merge_into("task/t1", &main).unwrap();
        assert!(!outcome.success);

        workspace
            .resolve_conflicted_file("test.txt", "resolved version\n")
            .unwrap();
        let commit_id = workspace.finish_merge("Resolve conflict in test.txt").unwrap();
        assert!(!commit_id.is_empty());

        let content = fs::read_to_string(temp_dir.path().join("test.txt")).unwrap();
        assert_eq!(content, "resolved version\n");
    }

    #[test]
    fn test_finish_merge_outside_merge_state() {
        let (_temp_dir, workspace) = setup_test_repo();
        assert!(workspace.finish_merge("nope").is_err());
    }

    #[test]
    fn test_diff_summary() {
        let (temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        write_and_commit(temp_dir.path(), &workspace, "feature.txt", "line one\nline two\n");

        let summary = workspace.diff_summary("task/t1", &main).unwrap();
        assert_eq!(summary.files, vec!["feature.txt"]);
        assert_eq!(summary.insertions, 2);
        assert_eq!(summary.deletions, 0);

        let patch = workspace.diff_patch("task/t1", &main, 64 * 1024).unwrap();
        assert!(patch.contains("+line one"));
    }

    #[test]
    fn test_diff_summary_empty_branch() {
        let (_temp_dir, workspace) = setup_test_repo();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/empty").unwrap();
        let summary = workspace.diff_summary("task/empty", &main).unwrap();
        assert!(summary.is_empty());
    }
}
