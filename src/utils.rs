//! Utility functions and helpers shared by the image source and the similarity engine

use std::collections::HashSet;
use std::path::Path;

/// Extensions accepted when none are configured
pub(crate) const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Normalize a configured extension: trimmed, lowercase, without the leading dot
pub(crate) fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Normalize a list of configured extensions, dropping empty entries and repeats
pub(crate) fn normalize_extensions<S: AsRef<str>>(extensions: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    extensions
        .iter()
        .map(|e| normalize_extension(e.as_ref()))
        .filter(|e| !e.is_empty() && seen.insert(e.clone()))
        .collect()
}

/// Validate that a file has an allowed extension (case-insensitive)
pub(crate) fn has_allowed_extension(path: &Path, allowed_extensions: &[String]) -> bool {
    if let Some(ext) = path.extension() {
        if let Some(ext_str) = ext.to_str() {
            return allowed_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext_str));
        }
    }
    false
}

/// Identity of an image: its file name with the extension removed
pub(crate) fn file_stem_identity(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

/// Round to two decimal places
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
