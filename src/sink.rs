//! Durable storage of harvested pages.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to create directory '{path}': {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Where successful page payloads go.
///
/// `store` must be idempotent per `(chapter, page)`: storing the same bytes
/// twice leaves the same state as storing them once.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn store(&self, chapter: u32, page: u32, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Writes `<root>/<chapter:04>/<page:03>.png`.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chapter_dir(&self, chapter: u32) -> PathBuf {
        self.root.join(format!("{chapter:04}"))
    }

    pub fn page_path(&self, chapter: u32, page: u32) -> PathBuf {
        self.chapter_dir(chapter).join(format!("{page:03}.png"))
    }
}

#[async_trait]
impl Sink for FsSink {
    async fn store(&self, chapter: u32, page: u32, bytes: &[u8]) -> Result<(), SinkError> {
        let dir = self.chapter_dir(chapter);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| SinkError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        let path = self.page_path(chapter, page);
        if same_content(&path, bytes).await {
            return Ok(());
        }

        write_replace(&path, bytes)
            .await
            .map_err(|source| SinkError::Write { path, source })
    }
}

/// True when `path` already holds exactly `bytes`.
async fn same_content(path: &Path, bytes: &[u8]) -> bool {
    match tokio::fs::read(path).await {
        Ok(existing) => {
            existing.len() == bytes.len() && Sha256::digest(&existing) == Sha256::digest(bytes)
        }
        Err(_) => false,
    }
}

/// Write through a sibling temp file and rename over `dst`, so readers never
/// see a partial page.
async fn write_replace(dst: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};
    // Unpredictable suffix; create_new refuses a pre-planted path.
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{suffix:016x}"));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, dst).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tankobon_sink_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_layout() {
        let sink = FsSink::new("/data/one_piece");
        assert_eq!(
            sink.page_path(12, 3),
            PathBuf::from("/data/one_piece/0012/003.png")
        );
    }

    #[tokio::test]
    async fn test_store_creates_chapter_directory() {
        let root = temp_root("create");
        let sink = FsSink::new(&root);

        sink.store(1, 1, b"page-one").await.unwrap();

        assert_eq!(std::fs::read(root.join("0001/001.png")).unwrap(), b"page-one");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let root = temp_root("idempotent");
        let sink = FsSink::new(&root);

        sink.store(4, 2, b"same bytes").await.unwrap();
        let path = sink.page_path(4, 2);
        let first = std::fs::metadata(&path).unwrap().modified().unwrap();
        sink.store(4, 2, b"same bytes").await.unwrap();
        let second = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&path).unwrap(), b"same bytes");
        let entries = std::fs::read_dir(sink.chapter_dir(4)).unwrap().count();
        assert_eq!(entries, 1, "no temp files left behind");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_store_replaces_different_content() {
        let root = temp_root("replace");
        let sink = FsSink::new(&root);

        sink.store(2, 9, b"truncated").await.unwrap();
        sink.store(2, 9, b"complete page").await.unwrap();

        assert_eq!(std::fs::read(sink.page_path(2, 9)).unwrap(), b"complete page");
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_store_reports_unwritable_root() {
        let root = temp_root("blocked");
        std::fs::write(&root, b"a file, not a directory").unwrap();
        let sink = FsSink::new(&root);

        let err = sink.store(1, 1, b"x").await.unwrap_err();

        assert!(matches!(err, SinkError::CreateDir { .. }));
        std::fs::remove_file(&root).unwrap();
    }
}
