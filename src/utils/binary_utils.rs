use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedBinary {
    pub path: String,
    pub version: Option<String>,
    pub is_symlink: bool,
    pub symlink_target: Option<String>,
}

const COMMON_BIN_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"];

/// Find a multiplexer binary: explicit override, then `PATH`, then well-known
/// install locations that GUI-launched processes often miss.
pub fn resolve_binary(command: &str, override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        if is_executable(path) {
            debug!("Using configured {command} binary at {}", path.display());
            return Some(path.to_path_buf());
        }
        debug!(
            "Configured {command} binary {} is not executable, searching PATH",
            path.display()
        );
    }

    if let Ok(path) = which::which(command) {
        return Some(path);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/bin"));
        candidates.push(home.join("bin"));
    }
    candidates.extend(COMMON_BIN_DIRS.iter().map(PathBuf::from));

    candidates
        .into_iter()
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return false;
        }
    }

    true
}

pub fn check_binary(path: &Path) -> Option<DetectedBinary> {
    let symlink_metadata = fs::symlink_metadata(path).ok()?;
    let is_symlink = symlink_metadata.file_type().is_symlink();

    if !is_executable(path) {
        return None;
    }

    let symlink_target = if is_symlink {
        fs::read_link(path)
            .ok()
            .map(|p| p.to_string_lossy().to_string())
    } else {
        None
    };

    let version = detect_version(path);

    info!(
        "Found {} binary at: {} ({})",
        path.file_name()?.to_string_lossy(),
        path.display(),
        if is_symlink { "symlink" } else { "binary" }
    );

    Some(DetectedBinary {
        path: path.to_string_lossy().to_string(),
        version,
        is_symlink,
        symlink_target,
    })
}

fn detect_version(path: &Path) -> Option<String> {
    for flag in ["-V", "--version", "version"] {
        let Ok(output) = Command::new(path).arg(flag).output() else {
            continue;
        };
        if !output.status.success() {
            continue;
        }

        let version_output = String::from_utf8_lossy(&output.stdout);
        let version = version_output.lines().next().unwrap_or("").trim();
        if !version.is_empty() {
            debug!("Detected version for {}: {}", path.display(), version);
            return Some(version.to_string());
        }
    }

    debug!("Could not detect version for: {}", path.display());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn make_temp_script(contents: &str, executable: bool) -> PathBuf {
        let id = std::process::id();
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("pane-keeper-test-binary-{id}-{counter}"));
        fs::write(&path, contents).expect("failed to write temp script");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(if executable { 0o755 } else { 0o644 });
            fs::set_permissions(&path, perms).unwrap();
        }
        #[cfg(not(unix))]
        let _ = executable;

        path
    }

    #[cfg(unix)]
    #[test]
    fn detects_version_from_executable() {
        let path = make_temp_script("#!/bin/sh\necho \"tmux 3.4\"\n", true);
        let detected = check_binary(&path).expect("expected binary to be detected");
        assert_eq!(detected.version, Some("tmux 3.4".to_string()));
        let _ = fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn override_must_be_executable() {
        let path = make_temp_script("#!/bin/sh\n", false);
        assert!(!is_executable(&path));
        let resolved = resolve_binary("pane-keeper-no-such-binary", Some(&path));
        assert_ne!(resolved.as_deref(), Some(path.as_path()));
        let _ = fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn executable_override_wins() {
        let path = make_temp_script("#!/bin/sh\n", true);
        assert_eq!(resolve_binary("tmux", Some(&path)), Some(path.clone()));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unknown_binary_is_not_resolved() {
        assert!(resolve_binary("pane-keeper-no-such-binary-xyz", None).is_none());
    }
}
