//! Uniquely named temporary siblings for write-then-rename output.
//!
//! Every writer gets its own `<name>.<random>.partial` file in the target
//! directory, so concurrent writers of the same final path never share a
//! temporary file. Only the rename is visible at the final path. If the
//! temporary file is dropped before it is persisted, it is deleted.

use std::io;
use std::path::Path;

use tempfile::NamedTempFile;

const PARTIAL_SUFFIX: &str = ".partial";

/// Create an empty temporary file next to `final_path`.
pub fn create_partial_file(final_path: &Path) -> io::Result<NamedTempFile> {
    let dir = final_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = match final_path.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => ".".to_string(),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix).suffix(PARTIAL_SUFFIX);
    // Temp files default to 0600; outputs should be readable like any other file.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

/// True for names produced by [`create_partial_file`].
pub fn is_partial_name(name: &str) -> bool {
    name.ends_with(PARTIAL_SUFFIX)
}
