use std::io;
use std::path::{Component, Path, PathBuf};

/// Canonicalize a path, stripping the Windows extended path prefix (\\?\) if present.
pub fn safe_canonicalize(path: &Path) -> io::Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)?;
    Ok(strip_extended_path_prefix(canonical))
}

/// Resolve a path to the form used as identity input.
///
/// Existing paths are canonicalized (symlinks followed). Paths that do not exist
/// are made absolute against the current directory and lexically normalized, so
/// they still resolve to one deterministic spelling.
pub fn resolve_identity_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = safe_canonicalize(path) {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(windows)]
pub fn strip_extended_path_prefix(path: PathBuf) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        path
    }
}

#[cfg(not(windows))]
pub fn strip_extended_path_prefix(path: PathBuf) -> PathBuf {
    path
}
