// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use tracing::debug;

/// Recursive size in bytes of the library at `path`.
///
/// Returns `None` when the path does not exist. Unreadable entries are
/// skipped rather than failing the scan, so a library the process may not
/// read reports zero bytes.
pub fn library_size(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.is_file() {
        return Some(metadata.len());
    }

    let mut total_bytes = 0u64;
    let mut skipped = 0u64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(directory) = stack.pop() {
        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else {
                skipped += 1;
                continue;
            };

            let entry_path = entry.path();
            let metadata = match fs::symlink_metadata(&entry_path) {
                Ok(metadata) => metadata,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            if metadata.is_dir() {
                stack.push(entry_path);
            } else if metadata.is_file() {
                total_bytes = total_bytes.saturating_add(metadata.len());
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} unreadable entries under {:?}", skipped, path);
    }

    Some(total_bytes)
}
