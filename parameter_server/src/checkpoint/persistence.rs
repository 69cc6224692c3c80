use std::{
    fmt, io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};

/// Durable object storage for checkpoints.
///
/// Keys are `/` separated relative paths, the first segment names the checkpoint.
#[async_trait]
pub trait Persistence: Send + Sync + fmt::Debug {
    /// Stores `data` under `key`, a reader never sees a partially written object.
    async fn put(&self, key: &str, data: Vec<u8>) -> io::Result<()>;

    /// Fetches the object under `key`, `None` if it doesn't exist.
    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Lists the first segment of every stored key.
    async fn list(&self) -> io::Result<Vec<String>>;

    /// Removes every object whose first segment is `prefix`.
    async fn delete(&self, prefix: &str) -> io::Result<()>;
}

/// A `Persistence` backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsPersistence {
    root: PathBuf,
}

impl FsPersistence {
    /// Creates a new `FsPersistence` rooted at `root`, created lazily on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid persistence key {key:?}"),
            ));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Persistence for FsPersistence {
    async fn put(&self, key: &str, data: Vec<u8>) -> io::Result<()> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await
    }

    async fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(key)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> io::Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }

        Ok(names)
    }

    async fn delete(&self, prefix: &str) -> io::Result<()> {
        let path = self.path(prefix)?;

        let res = match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path).await,
            Ok(_) => fs::remove_file(&path).await,
            Err(e) => Err(e),
        };

        match res {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            res => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FsPersistence::new(dir.path().join("ckpts"));

        assert!(persistence.list().await.unwrap().is_empty());
        assert_eq!(persistence.get("a/blob").await.unwrap(), None);

        persistence.put("a/blob", vec![1, 2, 3]).await.unwrap();
        persistence.put("a/blob", vec![4]).await.unwrap();
        persistence.put("b/blob", vec![5]).await.unwrap();

        assert_eq!(persistence.get("a/blob").await.unwrap(), Some(vec![4]));

        let mut names = persistence.list().await.unwrap();
        names.sort();
        assert_eq!(names, ["a", "b"]);

        persistence.delete("a").await.unwrap();
        persistence.delete("a").await.unwrap();
        assert_eq!(persistence.list().await.unwrap(), ["b"]);
    }

    #[tokio::test]
    async fn test_keys_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FsPersistence::new(dir.path());

        for key in ["", "../x", "/etc/passwd", "a/../../x"] {
            let err = persistence.put(key, vec![]).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{key:?}");
        }
    }
}
