//! Explicit environment for spawned tools
//!
//! Processes started by the runner get their environment from an `EnvMap`
//! rather than from the ambient process environment, so adding an SDK
//! directory to `PATH` never leaks into unrelated code.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap {
    vars: BTreeMap<String, String>,
}

impl EnvMap {
    /// Snapshot of the current process environment. Entries that are not
    /// valid UTF-8 are skipped.
    pub fn from_process() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        let vars = vars
            .into_iter()
            .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                (Ok(key), Err(_)) => {
                    log::warn!("Skipping environment variable {} with non-UTF-8 value", key);
                    None
                }
                (Err(key), _) => {
                    log::warn!(
                        "Skipping environment variable with non-UTF-8 name {}",
                        key.to_string_lossy()
                    );
                    None
                }
            })
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Returns a copy with `key` set to `value`
    pub fn with_var(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.vars.insert(key.into(), value.into());
        next
    }

    /// Returns a copy whose `PATH` starts with `dir`
    pub fn with_path_prepended(&self, dir: &Path) -> Self {
        let mut entries: Vec<PathBuf> = vec![dir.to_path_buf()];
        if let Some(existing) = self.get("PATH") {
            entries.extend(std::env::split_paths(existing).filter(|p| p != dir));
        }
        let joined = std::env::join_paths(entries)
            .map(|s: OsString| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| dir.display().to_string());
        self.with_var("PATH", joined)
    }

    /// Directories listed in `PATH`
    pub fn path_entries(&self) -> Vec<PathBuf> {
        self.get("PATH")
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_var_does_not_touch_original() {
        let base = EnvMap::default().with_var("A", "1");
        let next = base.with_var("B", "2");
        assert_eq!(base.get("B"), None);
        assert_eq!(next.get("A"), Some("1"));
        assert_eq!(next.get("B"), Some("2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_entries_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let bad = OsString::from_vec(vec![0xff, 0xfe]);
        let env = EnvMap::from_os_vars(vec![
            (OsString::from("HOME"), OsString::from("/home/ci")),
            (OsString::from("BAD_VALUE"), bad.clone()),
            (bad, OsString::from("bad name")),
        ]);
        assert_eq!(env.get("HOME"), Some("/home/ci"));
        assert_eq!(env.get("BAD_VALUE"), None);
        assert_eq!(env.iter().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_from_process_tolerates_non_utf8_value() {
        use std::os::unix::ffi::OsStringExt;

        let key = "MAESTRO_RUNNER_TEST_NON_UTF8";
        std::env::set_var(key, OsString::from_vec(vec![0xff, 0xfe]));
        let env = EnvMap::from_process();
        std::env::remove_var(key);
        assert_eq!(env.get(key), None);
    }

    #[test]
    fn test_path_prepended_once() {
        let base = EnvMap::default().with_var("PATH", "/usr/bin:/bin");
        let sdk = Path::new("/opt/sdk/platform-tools");
        let next = base.with_path_prepended(sdk).with_path_prepended(sdk);
        let entries = next.path_entries();
        assert_eq!(entries[0], PathBuf::from("/opt/sdk/platform-tools"));
        assert_eq!(entries.len(), 3);
        assert_eq!(base.path_entries().len(), 2);
    }
}
