//! File-backed mailbox store
//!
//! All cross-process state lives as JSON documents under `.foreman/` in the
//! project root. The store guarantees:
//! - Total reads: a missing or malformed document reads as the type's default
//! - Atomic writes: every update goes through temp-file-then-rename
//! - Single-update discipline: multi-writer documents (outbox, inbox, pool,
//!   assignments) take an advisory lock for the read-modify-write span
//!
//! ## Layout
//!
//! Project-local storage (`.foreman/` in project root):
//! - `project.json` - project record
//! - `plan.json` - accepted task plan
//! - `outbox.json` / `inbox.json` - message logs
//! - `pool.json` - agent pool
//! - `assignments.json` - assignment log
//! - `state.json` - last-known scheduler snapshot
//! - `tasks/<task-id>/` - per-task transient markers
//! - `workspaces/` - agent worktrees (gitignored)

pub mod markers;
pub mod snapshot;

use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

/// Common file operations result type
pub type FileResult<T> = Result<T, String>;

/// Get the .foreman directory for a project
pub fn foreman_dir(project_path: &Path) -> PathBuf {
    project_path.join(".foreman")
}

/// Get the per-task marker directory
pub fn task_dir(project_path: &Path, task_id: &str) -> PathBuf {
    foreman_dir(project_path).join("tasks").join(task_id)
}

/// Get the agent workspaces directory
pub fn workspaces_dir(project_path: &Path) -> PathBuf {
    foreman_dir(project_path).join("workspaces")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> FileResult<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory {:?}: {}", path, e))?;
    }
    Ok(())
}

/// Write data to a file atomically (temp file + rename)
pub fn atomic_write(path: &Path, content: &str) -> FileResult<()> {
    let temp_path = path.with_extension("tmp");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    // Write to temp file
    fs::write(&temp_path, content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;

    // Atomic rename
    fs::rename(&temp_path, path)
        .map_err(|e| format!("Failed to rename {:?} to {:?}: {}", temp_path, path, e))?;

    Ok(())
}

/// Read a JSON file and deserialize it
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> FileResult<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read file {:?}: {}", path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse JSON from {:?}: {}", path, e))
}

/// Read a JSON file, falling back to the default on a missing or malformed
/// document. Store reads must be total: a half-written or corrupted file
/// never aborts the orchestrator loop.
pub fn read_json_or_default<T>(path: &Path) -> T
where
    T: serde::de::DeserializeOwned + Default,
{
    if !path.exists() {
        return T::default();
    }

    match read_json(path) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("[Store] Treating unreadable document as empty: {}", e);
            T::default()
        }
    }
}

/// Write data as pretty-printed JSON atomically
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> FileResult<()> {
    let content = serde_json::to_string_pretty(data)
        .map_err(|e| format!("Failed to serialize to JSON: {}", e))?;

    atomic_write(path, &content)
}

/// Read-modify-write a shared document under an advisory lock.
///
/// The lock lives in a `.lock` sidecar so the document itself can still be
/// replaced by rename. Readers never take the lock; they rely on the atomic
/// rename for a consistent view.
pub fn locked_update<T, F, R>(path: &Path, update: F) -> FileResult<R>
where
    T: serde::de::DeserializeOwned + serde::Serialize + Default,
    F: FnOnce(&mut T) -> R,
{
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let lock_path = path.with_extension("lock");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {:?}: {}", lock_path, e))?;

    lock_file
        .lock_exclusive()
        .map_err(|e| format!("Failed to lock {:?}: {}", lock_path, e))?;

    let mut document: T = read_json_or_default(path);
    let outcome = update(&mut document);
    let write_result = write_json(path, &document);

    if let Err(e) = lock_file.unlock() {
        log::warn!("[Store] Failed to release lock {:?}: {}", lock_path, e);
    }

    write_result.map(|_| outcome)
}

/// Initialize the .foreman directory for a project with .gitignore
pub fn init_foreman_dir(project_path: &Path) -> FileResult<PathBuf> {
    let dir = foreman_dir(project_path);
    ensure_dir(&dir)?;
    ensure_dir(&dir.join("tasks"))?;
    ensure_dir(&dir.join("workspaces"))?;

    // Runtime files are machine-local; keep them out of the shared history
    let gitignore_path = dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore_content = r#"# Runtime files (not for sharing)
*.lock
*.tmp
workspaces/
"#;
        fs::write(&gitignore_path, gitignore_content)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct TestDoc {
        name: String,
        value: i32,
    }

    #[test]
    fn test_foreman_dir() {
        let project_path = Path::new("/home/user/my-project");
        assert_eq!(
            foreman_dir(project_path),
            PathBuf::from("/home/user/my-project/.foreman")
        );
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("c");

        assert!(!nested_path.exists());
        ensure_dir(&nested_path).unwrap();
        assert!(nested_path.exists());
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        atomic_write(&file_path, "Hello, World!").unwrap();

        assert!(file_path.exists());
        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[test]
    fn test_read_write_json() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        let data = TestDoc {
            name: "test".to_string(),
            value: 42,
        };

        write_json(&file_path, &data).unwrap();
        let read_data: TestDoc = read_json(&file_path).unwrap();

        assert_eq!(data, read_data);
    }

    #[test]
    fn test_read_json_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let doc: TestDoc = read_json_or_default(&temp_dir.path().join("absent.json"));
        assert_eq!(doc, TestDoc::default());
    }

    #[test]
    fn test_read_json_or_default_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("broken.json");
        fs::write(&file_path, "{ not json at all").unwrap();

        let doc: TestDoc = read_json_or_default(&file_path);
        assert_eq!(doc, TestDoc::default());
    }

    #[test]
    fn test_locked_update_creates_and_mutates() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("doc.json");

        locked_update::<TestDoc, _, _>(&file_path, |doc| {
            doc.name = "first".to_string();
            doc.value = 1;
        })
        .unwrap();

        let returned = locked_update::<TestDoc, _, _>(&file_path, |doc| {
            doc.value += 10;
            doc.value
        })
        .unwrap();

        assert_eq!(returned, 11);
        let doc: TestDoc = read_json(&file_path).unwrap();
        assert_eq!(doc.name, "first");
        assert_eq!(doc.value, 11);
    }

    #[test]
    fn test_init_foreman_dir() {
        let temp_dir = TempDir::new().unwrap();

        let dir = init_foreman_dir(temp_dir.path()).unwrap();

        assert!(dir.exists());
        assert!(dir.join("tasks").exists());
        assert!(dir.join("workspaces").exists());
        assert!(dir.join(".gitignore").exists());

        let gitignore_content = fs::read_to_string(dir.join(".gitignore")).unwrap();
        assert!(gitignore_content.contains("workspaces/"));
    }
}
