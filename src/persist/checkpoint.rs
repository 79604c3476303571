use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    error::Result,
    types::{Checkpoint, Cursor},
};

/// Standalone file holding the last durable [`Cursor`].
///
/// Reads both the bare block number format and the full cursor object,
/// always writes the full cursor.
#[derive(Clone, Debug)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint, `None` if the file does not exist.
    pub async fn read(&self) -> Result<Option<Cursor>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(content.trim())?;
        Ok(Some(checkpoint.into()))
    }

    /// Replaces the checkpoint atomically via a synced temporary file and
    /// rename.
    pub async fn write(&self, cursor: Cursor) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&serde_json::to_vec(&Checkpoint::Cursor(cursor))?).await?;
        file.sync_data().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        debug!(block = cursor.number(), path = %self.path.display(), "Checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("checkpoint.json"));
        assert_eq!(checkpoint.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("state").join("checkpoint.json"));

        let cursor = Cursor::new(77, None, Some(1_700_000_000));
        checkpoint.write(cursor).await.unwrap();
        assert_eq!(checkpoint.read().await.unwrap(), Some(cursor));

        checkpoint.write(Cursor::at(78)).await.unwrap();
        assert_eq!(checkpoint.read().await.unwrap(), Some(Cursor::at(78)));
    }

    #[tokio::test]
    async fn test_write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = CheckpointFile::new(&path);
        std::fs::write(path.with_extension("tmp"), "stale").unwrap();

        checkpoint.write(Cursor::at(90)).await.unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"number":90}"#);
    }

    #[tokio::test]
    async fn test_reads_legacy_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "65000000\n").unwrap();

        let checkpoint = CheckpointFile::new(path);
        assert_eq!(checkpoint.read().await.unwrap(), Some(Cursor::at(65000000)));
    }
}
