//! Configuration, log and discovery paths

use std::path::{Path, PathBuf};

/// Name used for platform directories
const APP_NAME: &str = "script-tester";

/// Per-directory configuration file
pub const LOCAL_CONFIG_NAME: &str = "tester.toml";

/// Generated editor stub file; never treated as a scenario
pub const STUB_FILENAME: &str = "spec.lua";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/script-tester/`
/// - macOS: `~/Library/Application Support/script-tester/`
/// - Windows: `%APPDATA%\script-tester\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Whether `path` is a scenario script with the given extension
pub fn is_script(path: &Path, extension: &str) -> bool {
    let is_stub = path
        .file_name()
        .map(|name| name == STUB_FILENAME)
        .unwrap_or(false);
    !is_stub && path.extension().map(|e| e == extension).unwrap_or(false)
}

/// List scenario scripts directly inside `dir`, sorted by name
pub fn discover(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_script(&path, extension) {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_stub_is_not_a_script() {
        assert!(is_script(Path::new("/t/users.lua"), "lua"));
        assert!(!is_script(Path::new("/t/spec.lua"), "lua"));
        assert!(!is_script(Path::new("/t/notes.md"), "lua"));
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.lua", "a.lua", "spec.lua", "readme.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let found = discover(dir.path(), "lua").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.lua", "b.lua"]);
    }
}
