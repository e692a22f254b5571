use super::env::EnvMap;
use anyhow::Result;
use std::path::PathBuf;

/// Find a binary on the `PATH` of the given environment
pub fn find_binary(name: &str, env: &EnvMap) -> Result<PathBuf> {
    let entries = env.path_entries();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    if !entries.is_empty() {
        let joined = std::env::join_paths(&entries)?;
        if let Ok(path) = which::which_in(name, Some(joined), &cwd) {
            return Ok(path);
        }
    }

    Err(anyhow::anyhow!(
        "Could not find '{}'. Checked PATH:\n{}",
        name,
        entries
            .iter()
            .map(|p| format!("  {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n")
    ))
}

/// Android SDK root from `ANDROID_HOME` or `ANDROID_SDK_ROOT`
pub fn android_sdk_root(env: &EnvMap) -> Option<PathBuf> {
    env.get("ANDROID_HOME")
        .or_else(|| env.get("ANDROID_SDK_ROOT"))
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Environment with the SDK `platform-tools` and `emulator` dirs on `PATH`
pub fn with_android_sdk(env: &EnvMap) -> EnvMap {
    match android_sdk_root(env) {
        Some(root) => env
            .with_path_prepended(&root.join("platform-tools"))
            .with_path_prepended(&root.join("emulator")),
        None => env.clone(),
    }
}

/// Environment with the default maestro install dir (`~/.maestro/bin`) on `PATH`
pub fn with_maestro(env: &EnvMap) -> EnvMap {
    match dirs::home_dir() {
        Some(home) => env.with_path_prepended(&home.join(".maestro").join("bin")),
        None => env.clone(),
    }
}

pub fn find_adb(env: &EnvMap) -> Result<PathBuf> {
    find_binary("adb", env)
}

pub fn find_emulator(env: &EnvMap) -> Result<PathBuf> {
    find_binary("emulator", env)
}

pub fn find_xcrun(env: &EnvMap) -> Result<PathBuf> {
    find_binary("xcrun", env)
}

pub fn find_maestro(env: &EnvMap) -> Result<PathBuf> {
    find_binary("maestro", env)
}
