/// Key patterns used to decide which stored objects are documents worth indexing.

/// Default patterns to exclude when listing documents.
/// A key is skipped when any of its `/`-separated segments contains one of these.
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        // Version control
        ".git".to_string(),
        ".svn".to_string(),
        ".hg".to_string(),

        // OS
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),

        // Temp/cache
        ".cache".to_string(),
        "__pycache__".to_string(),
    ]
}

/// Extensions that never hold text worth embedding.
pub fn binary_extensions() -> Vec<&'static str> {
    vec![
        // Images
        "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff",
        // Audio/video
        "mp3", "wav", "flac", "mp4", "mov", "avi", "mkv",
        // Archives
        "zip", "gz", "tgz", "bz2", "xz", "7z", "tar", "rar",
        // Executables/objects
        "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "wasm",
        // Data blobs
        "parquet", "arrow", "npy", "faiss", "index", "vec",
    ]
}

/// Checks if a key is a folder marker (`docs/`), which is never a document.
pub fn is_folder_marker(key: &str) -> bool {
    key.ends_with('/')
}

/// Checks if any segment of `key` matches an exclude pattern.
pub fn is_excluded(key: &str, patterns: &[String]) -> bool {
    key.split('/')
        .any(|segment| patterns.iter().any(|pattern| segment.contains(pattern.as_str())))
}

/// Checks if the key's extension marks a binary payload.
pub fn has_binary_extension(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            binary_extensions().iter().any(|b| *b == ext)
        }
        _ => false,
    }
}

/// Checks if a declared content type can be read as text.
///
/// Objects without a content type are assumed to be text.
pub fn is_text_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence.is_empty()
        || essence.starts_with("text/")
        || essence == "application/json"
        || essence == "application/xml"
        || essence == "application/x-yaml"
        || essence == "application/yaml"
        || essence == "application/octet-stream"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_marker() {
        assert!(is_folder_marker("docs/"));
        assert!(!is_folder_marker("docs/a.txt"));
    }

    #[test]
    fn test_is_excluded() {
        let patterns = default_exclude_patterns();
        assert!(is_excluded("docs/.git/config", &patterns));
        assert!(is_excluded("docs/.DS_Store", &patterns));
        assert!(!is_excluded("docs/guide.md", &patterns));
    }

    #[test]
    fn test_binary_extension() {
        assert!(has_binary_extension("docs/photo.PNG"));
        assert!(has_binary_extension("index/my.faiss"));
        assert!(!has_binary_extension("docs/readme.txt"));
        assert!(!has_binary_extension("docs/Makefile"));
        assert!(!has_binary_extension("docs/.png"));
    }

    #[test]
    fn test_text_content_types() {
        assert!(is_text_content_type(None));
        assert!(is_text_content_type(Some("text/plain; charset=utf-8")));
        assert!(is_text_content_type(Some("application/json")));
        assert!(!is_text_content_type(Some("image/png")));
        assert!(!is_text_content_type(Some("application/pdf")));
    }
}
