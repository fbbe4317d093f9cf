// SPDX-License-Identifier: GPL-3.0-only

//! Common utility helpers shared across models

use num_format::{Locale, ToFormattedString};

/// Bytes in the megabyte unit used for image sizes (`hdiutil -size <N>m`)
pub const MEGABYTE: u64 = 1024 * 1024;

pub fn megabytes_to_bytes(size_mb: u64) -> u64 {
    size_mb.saturating_mul(MEGABYTE)
}

/// Render a byte count as whole megabytes with thousands separators,
/// e.g. `1,234 MB`.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{} MB", (bytes / MEGABYTE).to_formatted_string(&Locale::en))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_megabytes_with_separators() {
        assert_eq!(format_megabytes(0), "0 MB");
        assert_eq!(format_megabytes(500 * MEGABYTE), "500 MB");
        assert_eq!(format_megabytes(1_234 * MEGABYTE + 17), "1,234 MB");
    }

    #[test]
    fn megabyte_conversion_saturates() {
        assert_eq!(megabytes_to_bytes(2), 2 * MEGABYTE);
        assert_eq!(megabytes_to_bytes(u64::MAX), u64::MAX);
    }
}
