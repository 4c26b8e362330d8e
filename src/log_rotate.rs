//! Size-based rotation of the console log
//!
//! `vctui.log` becomes `vctui.log.1`, `.1` becomes `.2` and so on; the
//! oldest generation beyond `keep` is removed.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::Result;

pub struct LogRotator {
    path: PathBuf,
    max_bytes: u64,
    keep: usize,
}

impl LogRotator {
    pub fn new(path: PathBuf, max_bytes: u64, keep: usize) -> Self {
        Self {
            path,
            max_bytes,
            keep,
        }
    }

    /// Default log file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(crate::config::ConfigFile::dir()?.join("vctui.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn generation(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Rotate when the current log has reached the size threshold.
    /// Returns whether a rotation happened.
    pub async fn rotate_if_needed(&self) -> Result<bool> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if size < self.max_bytes {
            return Ok(false);
        }

        if self.keep == 0 {
            fs::remove_file(&self.path).await?;
            return Ok(true);
        }

        let oldest = self.generation(self.keep);
        if fs::try_exists(&oldest).await? {
            fs::remove_file(&oldest).await?;
        }
        for n in (1..self.keep).rev() {
            let from = self.generation(n);
            if fs::try_exists(&from).await? {
                fs::rename(&from, self.generation(n + 1)).await?;
            }
        }
        fs::rename(&self.path, self.generation(1)).await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    async fn read(p: PathBuf) -> String {
        fs::read_to_string(p).await.unwrap()
    }

    #[tokio::test]
    async fn test_small_or_missing_log_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vctui.log");
        let rotator = LogRotator::new(path.clone(), 10, 2);

        assert!(!rotator.rotate_if_needed().await.unwrap());

        fs::write(&path, "short").await.unwrap();
        assert!(!rotator.rotate_if_needed().await.unwrap());
        assert_eq!(read(path).await, "short");
    }

    #[tokio::test]
    async fn test_generations_shift_and_oldest_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vctui.log");
        let rotator = LogRotator::new(path.clone(), 4, 2);

        for content in ["first", "second", "third"] {
            fs::write(&path, content).await.unwrap();
            assert!(assert_ok!(rotator.rotate_if_needed().await));
        }

        assert!(!path.exists());
        assert_eq!(read(rotator.generation(1)).await, "third");
        assert_eq!(read(rotator.generation(2)).await, "second");
        assert!(!rotator.generation(3).exists());
    }

    #[tokio::test]
    async fn test_keep_zero_deletes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vctui.log");
        fs::write(&path, "0123456789").await.unwrap();

        let rotator = LogRotator::new(path.clone(), 1, 0);
        assert!(rotator.rotate_if_needed().await.unwrap());
        assert!(!path.exists());
    }
}
