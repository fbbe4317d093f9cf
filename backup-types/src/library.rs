// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Reachability of the configured photo library.
///
/// Derived on demand from the configured path and a fresh filesystem scan,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryStatus {
    Accessible,
    PermissionDenied,
    Unreachable,
    Unconfigured,
}

impl LibraryStatus {
    pub fn is_accessible(self) -> bool {
        matches!(self, LibraryStatus::Accessible)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LibraryStatus::Accessible => "accessible",
            LibraryStatus::PermissionDenied => "permission denied",
            LibraryStatus::Unreachable => "unreachable",
            LibraryStatus::Unconfigured => "unconfigured",
        }
    }
}

impl std::fmt::Display for LibraryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a library from its configured path and the recursive size scan.
///
/// `measured_size` is `None` when the scan failed (path missing). A zero-byte
/// library that exists is what a sandboxed read without permission looks
/// like, so it maps to [`LibraryStatus::PermissionDenied`].
///
/// # Panics
///
/// Panics when no path is configured but a size is supplied; callers
/// only measure a configured path.
pub fn classify(configured: Option<&Path>, measured_size: Option<u64>) -> LibraryStatus {
    match (configured, measured_size) {
        (Some(_), Some(size)) if size > 0 => LibraryStatus::Accessible,
        (Some(_), Some(_)) => LibraryStatus::PermissionDenied,
        (Some(_), None) => LibraryStatus::Unreachable,
        (None, None) => LibraryStatus::Unconfigured,
        (None, Some(_)) => unreachable!("library size measured without a configured library path"),
    }
}

/// Whether a backup of `source_size` bytes fits on a volume of `capacity`
/// bytes. Unknown values are never feasible and equal sizes do not fit.
pub fn backup_feasible(capacity: Option<u64>, source_size: Option<u64>) -> bool {
    match (capacity, source_size) {
        (Some(capacity), Some(source)) => capacity > source,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_reachable_combination() {
        let path = Path::new("/tmp/Photos Library.photoslibrary");
        assert_eq!(classify(Some(path), Some(4096)), LibraryStatus::Accessible);
        assert_eq!(classify(Some(path), Some(0)), LibraryStatus::PermissionDenied);
        assert_eq!(classify(Some(path), None), LibraryStatus::Unreachable);
        assert_eq!(classify(None, None), LibraryStatus::Unconfigured);
    }

    #[test]
    #[should_panic(expected = "without a configured library path")]
    fn unset_path_with_measured_size_panics() {
        let _ = classify(None, Some(10));
    }

    #[test]
    fn feasibility_requires_strictly_more_capacity() {
        assert!(backup_feasible(Some(2_000), Some(500)));
        assert!(!backup_feasible(Some(500), Some(500)));
        assert!(!backup_feasible(Some(100), Some(500)));
        assert!(!backup_feasible(None, Some(500)));
        assert!(!backup_feasible(Some(2_000), None));
        assert!(!backup_feasible(None, None));
    }
}
