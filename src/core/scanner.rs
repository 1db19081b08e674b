use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively list every regular file under `root`, in a stable order.
///
/// Entries that cannot be read are logged and skipped. Paths under
/// `exclude` (typically the output directory when it sits inside the input)
/// are not descended into.
pub fn discover_files(root: &Path, exclude: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match exclude {
            Some(excluded) => !entry.path().starts_with(excluded),
            None => true,
        });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable entry under {}: {}", root.display(), e),
        }
    }

    files
}
