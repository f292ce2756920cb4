//! Output file naming

use std::collections::HashSet;
use std::path::Path;

/// Split an output name into its base and extension parts.
///
/// `{filename}` in `file_naming` becomes the input's stem, `{ext}` in
/// `file_extension` becomes `output_format`. A leading `.` is added to the
/// extension when missing.
pub fn output_file_parts(
    input: &Path,
    file_naming: &str,
    file_extension: &str,
    output_format: &str,
) -> (String, String) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = file_naming.replace("{filename}", &stem);
    let mut ext = file_extension.replace("{ext}", output_format);
    if !ext.starts_with('.') {
        ext.insert(0, '.');
    }
    (name, ext)
}

/// Output file name for `input`, e.g. `photo_compressed.webp`
pub fn output_file_name(
    input: &Path,
    file_naming: &str,
    file_extension: &str,
    output_format: &str,
) -> String {
    let (name, ext) = output_file_parts(input, file_naming, file_extension, output_format);
    name + &ext
}

/// Hands out names that are unique within one batch.
///
/// Comparison is case-insensitive; a taken name gets `_1`, `_2`, ...
/// inserted before the extension.
#[derive(Debug, Default)]
pub struct UniqueNames {
    claimed: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name + ext`, or the first free suffixed variant
    pub fn claim(&mut self, name: &str, ext: &str) -> String {
        let mut candidate = format!("{}{}", name, ext);
        let mut n = 1;
        while !self.claimed.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}{}", name, n, ext);
            n += 1;
        }
        candidate
    }
}
