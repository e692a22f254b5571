//! On-disk AVD cloning
//!
//! An AVD is a `<name>.ini` pointer file plus a `<name>.avd/` directory.
//! Cloning copies the directory (minus lock files left by a running
//! emulator) and rewrites the name-bearing keys.

use crate::utils::env::EnvMap;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory holding AVDs
pub fn avd_home(env: &EnvMap) -> Result<PathBuf> {
    if let Some(dir) = env.get("ANDROID_AVD_HOME").filter(|s| !s.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    if let Some(dir) = env.get("ANDROID_USER_HOME").filter(|s| !s.is_empty()) {
        return Ok(PathBuf::from(dir).join("avd"));
    }
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".android").join("avd"))
}

fn is_lock(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "lock")
}

/// Copy AVD `source` to a new AVD called `dest`
pub fn clone_avd(home: &Path, source: &str, dest: &str) -> Result<()> {
    let source_dir = home.join(format!("{}.avd", source));
    let dest_dir = home.join(format!("{}.avd", dest));
    let source_ini = home.join(format!("{}.ini", source));

    if !source_dir.is_dir() {
        anyhow::bail!("AVD directory not found: {}", source_dir.display());
    }
    if dest_dir.exists() {
        anyhow::bail!("AVD {} already exists", dest);
    }

    let walker = WalkDir::new(&source_dir)
        .into_iter()
        .filter_entry(|e| !is_lock(e.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", source_dir.display()))?;
        let rel = entry.path().strip_prefix(&source_dir)?;
        let target = dest_dir.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }

    let ini = fs::read_to_string(&source_ini)
        .with_context(|| format!("Failed to read {}", source_ini.display()))?;
    let ini = rewrite_keys(
        &ini,
        &[
            ("path", dest_dir.display().to_string()),
            ("path.rel", format!("avd/{}.avd", dest)),
        ],
    );
    fs::write(home.join(format!("{}.ini", dest)), ini)?;

    let config_path = dest_dir.join("config.ini");
    if config_path.is_file() {
        let config = fs::read_to_string(&config_path)?;
        let config = rewrite_keys(
            &config,
            &[
                ("AvdId", dest.to_string()),
                ("avd.ini.displayname", dest.to_string()),
            ],
        );
        fs::write(&config_path, config)?;
    }

    Ok(())
}

/// Remove an AVD's directory and pointer file
pub fn delete_avd(home: &Path, name: &str) -> Result<()> {
    let dir = home.join(format!("{}.avd", name));
    let ini = home.join(format!("{}.ini", name));
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    if ini.exists() {
        fs::remove_file(&ini).with_context(|| format!("Failed to remove {}", ini.display()))?;
    }
    Ok(())
}

/// Replace `key=value` lines for the given keys, leaving the rest untouched
fn rewrite_keys(content: &str, replacements: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let key = line.split_once('=').map(|(k, _)| k.trim());
        match key.and_then(|k| replacements.iter().find(|(rk, _)| *rk == k)) {
            Some((k, v)) => out.push_str(&format!("{}={}", k, v)),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}
