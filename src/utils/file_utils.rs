//! File system utilities

use std::path::{Path, PathBuf};

/// Sanitize a name for use as a file or directory name. Reserved
/// characters and control characters are removed, surrounding whitespace
/// trimmed.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// `{output}/{title}/Season {s}/{title} - S{s}E{n}.{ext}`
pub fn episode_file_path(
    output_dir: &Path,
    title: &str,
    season: u32,
    number: u32,
    extension: &str,
) -> PathBuf {
    output_dir
        .join(title)
        .join(format!("Season {}", season))
        .join(format!("{} - S{}E{}.{}", title, season, number, extension))
}
