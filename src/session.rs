//! Mutable state of one command-loop run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::commands::CommandKind;
use crate::commands::files::add_line_numbers;

/// Path to content, ordered so prompts and hashes are deterministic.
pub type FileMap = BTreeMap<String, String>;

/// Directory names never read back from disk.
const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", "venv"];

/// Files larger than this are not read back from disk.
const MAX_READBACK_BYTES: u64 = 512 * 1024;

/// State owned by a single command loop.
///
/// `files` is the authoritative overlay that commands mutate. The snapshot
/// taken at creation is kept unchanged for diffing.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub files: FileMap,
    original_files: FileMap,
    /// Append-only transcript of command echoes and results.
    pub scratch: String,
    /// Material retrieved from disk that the transcript has not shown yet.
    pub context: FileMap,
    pub last_command: Option<CommandKind>,
    target_dir: PathBuf,
    /// What is believed to be on disk under `target_dir`.
    disk_view: FileMap,
}

impl SessionState {
    pub fn new(files: FileMap, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            original_files: files.clone(),
            disk_view: files.clone(),
            files,
            scratch: String::new(),
            context: FileMap::new(),
            last_command: None,
            target_dir: target_dir.into(),
        }
    }

    pub fn original_files(&self) -> &FileMap {
        &self.original_files
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Append one transcript entry on its own line.
    pub fn record(&mut self, entry: &str) {
        self.scratch.push('\n');
        self.scratch.push_str(entry);
    }

    /// Pending context rendered for the next prompt.
    pub fn render_context(&self) -> String {
        self.context
            .iter()
            .map(|(path, text)| format!("{}:\n{}\n", path, text))
            .collect()
    }

    /// Write the overlay to disk so external processes see it.
    pub async fn flush_to_disk(&mut self) -> std::io::Result<()> {
        for (path, content) in &self.files {
            if self.disk_view.get(path) != Some(content) {
                let full = self.target_dir.join(path);
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&full, content).await?;
            }
        }

        for path in self.disk_view.keys() {
            if !self.files.contains_key(path) {
                match tokio::fs::remove_file(self.target_dir.join(path)).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.disk_view = self.files.clone();
        Ok(())
    }

    /// Re-read the tree after an external process ran.
    ///
    /// Files whose content changed, or that appeared, are also placed in
    /// `context`. Files that disappeared leave both maps. Overlay entries the
    /// tree walk skips (hidden directories, large files) are re-read by path
    /// and kept while they still exist.
    pub async fn reload_from_disk(&mut self) -> std::io::Result<()> {
        let root = self.target_dir.clone();
        let mut on_disk = tokio::task::spawn_blocking(move || read_tree(&root))
            .await
            .map_err(std::io::Error::other)??;

        for (path, previous) in &self.files {
            if on_disk.contains_key(path) {
                continue;
            }
            let full = self.target_dir.join(path);
            if !tokio::fs::try_exists(&full).await? {
                continue;
            }
            let content = tokio::fs::read_to_string(&full)
                .await
                .unwrap_or_else(|_| previous.clone());
            on_disk.insert(path.clone(), content);
        }

        for (path, content) in &on_disk {
            if self.files.get(path) != Some(content) {
                self.context.insert(path.clone(), add_line_numbers(content));
            }
        }
        self.context
            .retain(|path, _| on_disk.contains_key(path));

        self.files = on_disk.clone();
        self.disk_view = on_disk;
        Ok(())
    }
}

/// Read every UTF-8 text file under `root`, skipping hidden and build directories.
pub fn read_tree(root: &Path) -> std::io::Result<FileMap> {
    let mut files = FileMap::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !(entry.file_type().is_dir() && (name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())))
    });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_READBACK_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, content);
    }

    Ok(files)
}

/// Read the given paths under `root`, skipping unreadable or binary files.
pub async fn read_files(root: &Path, paths: &[String]) -> FileMap {
    let mut files = FileMap::new();
    for path in paths {
        match tokio::fs::read_to_string(root.join(path)).await {
            Ok(content) => {
                files.insert(path.clone(), content);
            }
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Skipping unreadable file");
            }
        }
    }
    files
}
