use super::{validate_key, Object, ObjectMeta, ObjectStore, Result, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const TEMP_MARKER: &str = ".quarry-tmp-";

/// Bucket backed by a directory tree.
///
/// Object keys map to relative paths under `root`. Content types are not
/// persisted; they are inferred from the key's extension on read.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    temp_counter: Arc<AtomicU64>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }

    /// Deepest directory every key under `prefix` lives in, with its key
    /// prefix. `None` when no valid key can start with `prefix`.
    fn walk_start(&self, prefix: &str) -> Option<(PathBuf, String)> {
        let dir_prefix = match prefix.rfind('/') {
            Some(i) => &prefix[..=i],
            None => "",
        };
        let mut path = self.root.clone();
        for segment in dir_prefix.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return None;
            }
            path.push(segment);
        }
        if dir_prefix.starts_with('/') || dir_prefix.contains("//") {
            return None;
        }
        Some((path, dir_prefix.to_string()))
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}{}{}-{}", name, TEMP_MARKER, std::process::id(), n))
    }
}

/// Infers a content type from a key's extension.
fn content_type_for(key: &str) -> Option<String> {
    let ext = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    let content_type = match ext.as_str() {
        "txt" | "md" | "rst" | "csv" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/yaml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(content_type.to_string())
}

fn map_not_found(e: std::io::Error, key: &str) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, key: &str) -> Result<Object> {
        let path = self.path_for(key)?;
        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let body = fs::read(&path).await.map_err(|e| map_not_found(e, key))?;
        Ok(Object {
            key: key.to_string(),
            body,
            content_type: content_type_for(key),
        })
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path_for(&path);
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut listed = Vec::new();
        let Some((start, key_prefix)) = self.walk_start(prefix) else {
            return Ok(listed);
        };
        if !fs::metadata(&start).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(listed);
        }
        collect_recursive(&start, key_prefix, &mut listed).await?;
        listed.retain(|meta| meta.key.starts_with(prefix));
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

fn collect_recursive<'a>(
    dir: &'a Path,
    key_prefix: String,
    listed: &'a mut Vec<ObjectMeta>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(TEMP_MARKER) {
                continue;
            }
            let key = format!("{}{}", key_prefix, name);
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                collect_recursive(&entry.path(), format!("{}/", key), listed).await?;
            } else if file_type.is_file() {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                listed.push(ObjectMeta { key, size });
            }
        }

        Ok(())
    })
}
