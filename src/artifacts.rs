//! Artifact upload seam
//!
//! The runner hands finished files and directories to an `ArtifactUploader`.
//! `LocalArtifactUploader` stores them under one directory, bundling
//! directories as `.tar.gz`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Upload one file under `name`
    async fn upload_file(&self, path: &Path, name: &str) -> Result<()>;

    /// Upload a whole directory as one bundle called `name`
    async fn upload_directory(&self, dir: &Path, name: &str) -> Result<()>;
}

/// Whether `dir` exists and holds at least one entry
pub fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Upload `dir` if it has content. Empty or missing directories and upload
/// errors are warnings only. Returns whether the upload happened.
pub async fn upload_directory_if_not_empty(
    uploader: &dyn ArtifactUploader,
    dir: &Path,
    name: &str,
) -> bool {
    if !has_entries(dir) {
        log::warn!("{} is empty, not uploading {}", dir.display(), name);
        return false;
    }
    match uploader.upload_directory(dir, name).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to upload {}: {:#}", name, e);
            false
        }
    }
}

/// Stores artifacts in a local directory
#[derive(Debug, Clone)]
pub struct LocalArtifactUploader {
    artifacts_dir: PathBuf,
}

impl LocalArtifactUploader {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactUploader for LocalArtifactUploader {
    async fn upload_file(&self, path: &Path, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.artifacts_dir).await?;
        let file_name = match path.extension() {
            Some(ext) => format!("{}.{}", name, ext.to_string_lossy()),
            None => name.to_string(),
        };
        let dest = self.artifacts_dir.join(file_name);
        tokio::fs::copy(path, &dest)
            .await
            .with_context(|| format!("Failed to copy {} to {}", path.display(), dest.display()))?;
        log::info!("Stored artifact {}", dest.display());
        Ok(())
    }

    async fn upload_directory(&self, dir: &Path, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.artifacts_dir).await?;
        let dest = self.artifacts_dir.join(format!("{}.tar.gz", name));
        let dir = dir.to_path_buf();
        let prefix = name.to_string();
        let archive = dest.clone();

        tokio::task::spawn_blocking(move || write_tar_gz(&dir, &prefix, &archive))
            .await
            .context("Archive task panicked")??;

        log::info!("Stored artifact {}", dest.display());
        Ok(())
    }
}

fn write_tar_gz(dir: &Path, prefix: &str, dest: &Path) -> Result<()> {
    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(prefix, dir)
        .with_context(|| format!("Failed to archive {}", dir.display()))?;
    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_directory_bundle_contains_files() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("0-login.xml"), "<testsuites/>").unwrap();
        let out = TempDir::new().unwrap();

        let uploader = LocalArtifactUploader::new(out.path());
        assert!(upload_directory_if_not_empty(&uploader, src.path(), "maestro-reports").await);

        let file = File::open(out.path().join("maestro-reports.tar.gz")).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "maestro-reports/0-login.xml"));
    }

    #[tokio::test]
    async fn test_empty_directory_is_skipped() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let uploader = LocalArtifactUploader::new(out.path().join("artifacts"));

        assert!(!upload_directory_if_not_empty(&uploader, src.path(), "logs").await);
        assert!(!upload_directory_if_not_empty(&uploader, &src.path().join("missing"), "logs").await);
        assert!(!out.path().join("artifacts").exists());
    }

    #[tokio::test]
    async fn test_file_keeps_extension() {
        let src = TempDir::new().unwrap();
        let video = src.path().join("raw.mp4");
        std::fs::write(&video, b"mp4").unwrap();
        let out = TempDir::new().unwrap();

        LocalArtifactUploader::new(out.path())
            .upload_file(&video, "maestro-recording-0-2")
            .await
            .unwrap();
        assert!(out.path().join("maestro-recording-0-2.mp4").is_file());
    }
}
