use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

use super::{Snapshot, SnapshotRecord, SnapshotStore};
use crate::{
    classify::{SetId, TraderHash},
    error::{Error, Result},
    types::Cursor,
};

/// Snapshot store keeping one append-only JSON-lines file per set in a
/// directory.
///
/// Every save appends one record and syncs it to disk before returning.
/// A torn final line left by a crash mid-write is ignored on load and cut
/// off before the next record is appended.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store, creating `dir` if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File the deltas of `set_id` are appended to.
    pub fn path(&self, set_id: SetId) -> PathBuf {
        self.dir.join(format!("{set_id}.jsonl"))
    }
}

impl SnapshotStore for FileStore {
    async fn save(
        &self,
        set_id: SetId,
        delta: &[TraderHash],
        cumulative_count: u64,
        cursor: Cursor,
    ) -> Result<()> {
        let record = SnapshotRecord {
            hashes: delta.to_vec(),
            cumulative_count,
            cursor: Some(cursor),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let path = self.path(set_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;
        end_at_record_boundary(set_id, &mut file).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        debug!(
            %set_id,
            delta = delta.len(),
            cumulative_count,
            block = cursor.number(),
            "Snapshot delta appended"
        );
        Ok(())
    }

    async fn load(&self, set_id: SetId) -> Result<Option<Snapshot>> {
        let path = self.path(set_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            match serde_json::from_str::<SnapshotRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if idx + 1 == lines.len() && !content.ends_with('\n') => {
                    warn!(%set_id, ?e, "Ignoring incomplete trailing snapshot record");
                }
                Err(e) => {
                    return Err(Error::MalformedSnapshot(
                        path.display().to_string(),
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(Snapshot::from_records(records))
    }
}

/// Makes sure the next appended record starts on its own line.
///
/// A trailing fragment without a newline is terminated when it parses as a
/// whole record and truncated otherwise, the same way `load` reads it.
async fn end_at_record_boundary(set_id: SetId, file: &mut fs::File) -> Result<()> {
    if file.metadata().await?.len() == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut content = Vec::new();
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut content).await?;
    let boundary = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |idx| idx + 1);

    if serde_json::from_slice::<SnapshotRecord>(&content[boundary..]).is_ok() {
        file.write_all(b"\n").await?;
    } else {
        warn!(
            %set_id,
            discarded = content.len() - boundary,
            "Discarding incomplete trailing snapshot record"
        );
        file.set_len(boundary as u64).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[tokio::test]
    async fn test_save_and_load_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("snapshots")).await.unwrap();

        assert_eq!(store.load(SetId::Insider).await.unwrap(), None);

        store
            .save(SetId::Insider, &[1, 2], 2, Cursor::at(100))
            .await
            .unwrap();
        store
            .save(SetId::Insider, &[3], 3, Cursor::at(130))
            .await
            .unwrap();
        store
            .save(SetId::NotInsider, &[9], 1, Cursor::at(130))
            .await
            .unwrap();

        let insider = store.load(SetId::Insider).await.unwrap().unwrap();
        assert_eq!(insider.hashes, HashSet::from([1, 2, 3]));
        assert_eq!(insider.cumulative_count, 3);
        assert_eq!(insider.cursor, Some(Cursor::at(130)));

        let not_insider = store.load(SetId::NotInsider).await.unwrap().unwrap();
        assert_eq!(not_insider.hashes, HashSet::from([9]));
    }

    #[tokio::test]
    async fn test_torn_trailing_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save(SetId::Insider, &[1], 1, Cursor::at(5))
            .await
            .unwrap();

        let path = store.path(SetId::Insider);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(r#"{"hashes":[2,"#);
        std::fs::write(&path, content).unwrap();

        let snapshot = store.load(SetId::Insider).await.unwrap().unwrap();
        assert_eq!(snapshot.hashes, HashSet::from([1]));
        assert_eq!(snapshot.cursor, Some(Cursor::at(5)));
    }

    #[tokio::test]
    async fn test_corrupted_record_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::write(
            store.path(SetId::NotInsider),
            "garbage\n{\"hashes\":[],\"cumulative_count\":0}\n",
        )
        .unwrap();

        assert!(matches!(
            store.load(SetId::NotInsider).await,
            Err(Error::MalformedSnapshot(..))
        ));
    }

    #[tokio::test]
    async fn test_save_after_torn_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save(SetId::Insider, &[1], 1, Cursor::at(5))
            .await
            .unwrap();

        let path = store.path(SetId::Insider);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str(r#"{"hashes":[2,"#);
        std::fs::write(&path, content).unwrap();

        store
            .save(SetId::Insider, &[3], 2, Cursor::at(6))
            .await
            .unwrap();
        store
            .save(SetId::Insider, &[4], 3, Cursor::at(7))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(!content.contains(r#"[2,"#));

        let snapshot = store.load(SetId::Insider).await.unwrap().unwrap();
        assert_eq!(snapshot.hashes, HashSet::from([1, 3, 4]));
        assert_eq!(snapshot.cumulative_count, 3);
        assert_eq!(snapshot.cursor, Some(Cursor::at(7)));
    }

    #[tokio::test]
    async fn test_save_after_unterminated_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let path = store.path(SetId::NotInsider);
        std::fs::write(&path, r#"{"hashes":[8],"cumulative_count":1}"#).unwrap();

        store
            .save(SetId::NotInsider, &[9], 2, Cursor::at(12))
            .await
            .unwrap();

        let snapshot = store.load(SetId::NotInsider).await.unwrap().unwrap();
        assert_eq!(snapshot.hashes, HashSet::from([8, 9]));
        assert_eq!(snapshot.cumulative_count, 2);
        assert_eq!(snapshot.cursor, Some(Cursor::at(12)));
    }

    #[tokio::test]
    async fn test_save_after_fragment_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let path = store.path(SetId::Insider);
        std::fs::write(&path, r#"{"hash"#).unwrap();

        store
            .save(SetId::Insider, &[5], 1, Cursor::at(3))
            .await
            .unwrap();

        let snapshot = store.load(SetId::Insider).await.unwrap().unwrap();
        assert_eq!(snapshot.hashes, HashSet::from([5]));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }
}
