use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reportd_core::{OrgId, ReportFormat, RunId};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Location and fingerprint of a written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lower-case hex SHA-256 of the content.
    pub checksum: String,
}

/// Report bytes on disk, one file per run:
/// `{root}/org_{org_id}/run_{run_id}.{ext}`.
pub struct ArtifactStore {
    root: PathBuf,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, org_id: OrgId, run_id: RunId, format: ReportFormat) -> PathBuf {
        self.root
            .join(format!("org_{org_id}"))
            .join(format!("run_{run_id}.{}", format.extension()))
    }

    /// Write the artifact of a run. Fails if the run already has one.
    pub async fn write(
        &self,
        org_id: OrgId,
        run_id: RunId,
        format: ReportFormat,
        content: &[u8],
    ) -> std::io::Result<StoredArtifact> {
        let path = self.path_for(org_id, run_id, format);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;

        let stored = StoredArtifact {
            path,
            bytes: content.len() as u64,
            checksum: sha256_hex(content),
        };
        debug!(org_id, run_id, path = %stored.path.display(), bytes = stored.bytes, "artifact written");
        Ok(stored)
    }

    /// Read an artifact back. `Ok(None)` when the file is gone.
    pub async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an artifact. Returns `false` if it was already missing.
    pub async fn remove(&self, path: &Path) -> std::io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
