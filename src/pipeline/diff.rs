//! Comparing file mappings and writing the result to a working copy.

use std::path::Path;

use crate::commands::files::list_files;
use crate::session::FileMap;

/// Entries that differ between `old` and `new`, on each side.
///
/// Unchanged paths are dropped. Removed paths appear only in the old half,
/// added paths only in the new half.
pub fn filter_changed(old: &FileMap, new: &FileMap) -> (FileMap, FileMap) {
    let old_changed = old
        .iter()
        .filter(|(path, content)| new.get(*path) != Some(*content))
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    let new_changed = new
        .iter()
        .filter(|(path, content)| old.get(*path) != Some(*content))
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    (old_changed, new_changed)
}

/// Every file in `files`, numbered, as shown to the reviewer.
pub fn render_files(files: &FileMap) -> String {
    let names: Vec<String> = files.keys().cloned().collect();
    list_files(files, &names)
}

/// Write added or changed files and delete removed ones under `dir`.
pub async fn sync_to_disk(dir: &Path, old: &FileMap, new: &FileMap) -> std::io::Result<()> {
    for (path, content) in new {
        if old.get(path) == Some(content) {
            continue;
        }
        let full = dir.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
    }

    for path in old.keys().filter(|p| !new.contains_key(*p)) {
        match tokio::fs::remove_file(dir.join(path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
