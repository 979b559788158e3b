//! Small filesystem helpers shared by the persistent caches and stores.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

/// Sibling path used while a file is being replaced.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `bytes` so readers only ever see the old or the new
/// contents: write a sibling temp file, flush it to disk, then rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/data/cache/abc.json");
        assert_eq!(temp_path(p), PathBuf::from("/data/cache/abc.json.tmp"));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("file.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_remove_if_exists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.json");
        remove_if_exists(&path).await.unwrap();
        std::fs::write(&path, b"x").unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }
}
