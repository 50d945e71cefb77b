//! CLI binary resolution with caching.
//!
//! Dashboards launched from a desktop session don't inherit the user's shell
//! PATH, so `git` and the node package managers (`npm`, `yarn`, `tnpm`, ...)
//! are often not found by name. This module probes well-known directories
//! and caches the results for the lifetime of the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Well-known directories where git and node tooling live but that
/// desktop-launched processes don't have on PATH. Computed once.
fn extra_bin_dirs() -> &'static [String] {
    static DIRS: OnceLock<Vec<String>> = OnceLock::new();
    DIRS.get_or_init(|| {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();

        let mut dirs = Vec::new();

        #[cfg(target_os = "macos")]
        {
            dirs.extend([
                "/usr/local/bin".to_string(),
                "/opt/homebrew/bin".to_string(),
            ]);
        }

        #[cfg(target_os = "linux")]
        {
            dirs.extend([
                "/usr/bin".to_string(),
                "/usr/local/bin".to_string(),
                format!("{home}/.local/bin"),
            ]);
        }

        // Node version managers and global package prefixes
        #[cfg(not(target_os = "windows"))]
        {
            dirs.extend([
                format!("{home}/.volta/bin"),
                format!("{home}/.yarn/bin"),
                format!("{home}/.npm-global/bin"),
            ]);
        }

        #[cfg(target_os = "windows")]
        {
            let program_files =
                std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".to_string());
            dirs.extend([
                format!("{program_files}\\Git\\cmd"),
                format!("{program_files}\\nodejs"),
                format!("{home}\\AppData\\Roaming\\npm"),
                format!("{home}\\scoop\\shims"),
            ]);
        }

        dirs
    })
}

/// File names a binary may have on disk. Node package managers ship as
/// `.cmd` shims on Windows.
fn candidate_names(name: &str) -> Vec<String> {
    if cfg!(target_os = "windows") {
        vec![format!("{name}.exe"), format!("{name}.cmd"), name.to_string()]
    } else {
        vec![name.to_string()]
    }
}

/// Resolve a CLI binary to its full path, probing well-known directories.
///
/// Falls back to the bare name (PATH lookup at spawn time) when no
/// candidate exists. Results are cached per binary name.
pub(crate) fn resolve_cli(name: &str) -> String {
    static CACHE: OnceLock<parking_lot::Mutex<HashMap<String, String>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| parking_lot::Mutex::new(HashMap::new()));

    if let Some(cached) = cache.lock().get(name) {
        return cached.clone();
    }

    let resolved = resolve_cli_uncached(name);
    cache.lock().insert(name.to_string(), resolved.clone());
    resolved
}

fn resolve_cli_uncached(name: &str) -> String {
    // Explicit paths are used as given
    if name.contains('/') || name.contains('\\') {
        return name.to_string();
    }
    for dir in extra_bin_dirs() {
        for file in candidate_names(name) {
            let candidate = Path::new(dir).join(file);
            if candidate.is_file() {
                return candidate.to_string_lossy().to_string();
            }
        }
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_bin_dirs_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for dir in extra_bin_dirs() {
            assert!(seen.insert(dir), "Duplicate directory in extra_bin_dirs: {dir}");
        }
    }

    #[test]
    fn test_resolve_cli_returns_name_when_not_found() {
        let result = resolve_cli("nonexistent_binary_xyz_12345");
        assert_eq!(result, "nonexistent_binary_xyz_12345");
    }

    #[test]
    fn test_resolve_cli_keeps_explicit_paths() {
        assert_eq!(resolve_cli("/opt/tools/yarn"), "/opt/tools/yarn");
    }

    #[test]
    fn test_resolve_cli_caches_result() {
        let first = resolve_cli("nonexistent_cached_test_abc");
        let second = resolve_cli("nonexistent_cached_test_abc");
        assert_eq!(first, second);
    }
}
