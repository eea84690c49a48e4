//! Small filesystem helpers shared by the stages.

use std::path::{Path, PathBuf};
use tokio::fs;

/// Sibling temp path used while writing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    create_parent(path).await?;
    let tmp = temp_path(path);

    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Atomically replaces `path` unless it already holds exactly `contents`.
///
/// Returns `true` when the file was written.
pub async fn write_if_changed(path: &Path, contents: &[u8]) -> std::io::Result<bool> {
    match fs::read(path).await {
        Ok(existing) if existing == contents => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    write_atomic(path, contents).await?;
    Ok(true)
}

/// Writes `contents` only if the file does not exist yet.
///
/// The contents go to a temp file first and are hard-linked into place,
/// which fails instead of replacing an existing file. `path` therefore
/// either does not exist or holds the complete contents.
///
/// Returns `false` when the file was already there.
pub async fn write_new(path: &Path, contents: &[u8]) -> std::io::Result<bool> {
    if fs::try_exists(path).await? {
        return Ok(false);
    }
    create_parent(path).await?;
    let tmp = temp_path(path);

    if let Err(e) = fs::write(&tmp, contents).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    let linked = fs::hard_link(&tmp, path).await;
    let _ = fs::remove_file(&tmp).await;
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Lists `*.xml` files in `dir`, sorted by path. A missing directory is empty.
pub async fn list_xml_files(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if is_visible_xml(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_visible_xml(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().map(|e| e == "xml").unwrap_or(false)
}

/// File name as a `String` (lossy).
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File stem as a `String` (lossy).
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_if_changed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.xml");

        assert!(write_if_changed(&path, b"<a/>").await.unwrap());
        assert!(!write_if_changed(&path, b"<a/>").await.unwrap());
        assert!(write_if_changed(&path, b"<b/>").await.unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"<b/>");
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/out.xml");

        write_atomic(&path, b"<x/>").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"<x/>");

        let leftovers = list_xml_files(&temp.path().join("a/b"), false).await.unwrap();
        assert_eq!(leftovers, vec![path]);
    }

    #[tokio::test]
    async fn test_write_new_never_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("h.xml");

        assert!(write_new(&path, b"first").await.unwrap());
        assert!(!write_new(&path, b"second").await.unwrap());
        assert_eq!(fs::read(&path).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_write_new_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("headers/h.xml");

        assert!(write_new(&path, b"<TEI/>").await.unwrap());
        assert!(!write_new(&path, b"<other/>").await.unwrap());

        let mut names: Vec<String> = std::fs::read_dir(temp.path().join("headers"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["h.xml"]);
        assert_eq!(fs::read(&path).await.unwrap(), b"<TEI/>");
    }

    #[tokio::test]
    async fn test_write_new_failure_creates_nothing() {
        let temp = TempDir::new().unwrap();
        // The parent is a file, so nothing can be created below it.
        let blocker = temp.path().join("headers");
        std::fs::write(&blocker, "not a directory").unwrap();
        let path = blocker.join("h.xml");

        assert!(write_new(&path, b"<TEI/>").await.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read(&blocker).unwrap(), b"not a directory");
    }

    #[tokio::test]
    async fn test_list_xml_files_sorted_and_recursive() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub")).await.unwrap();
        fs::write(temp.path().join("b.xml"), "").await.unwrap();
        fs::write(temp.path().join("a.xml"), "").await.unwrap();
        fs::write(temp.path().join("notes.txt"), "").await.unwrap();
        fs::write(temp.path().join("sub/c.xml"), "").await.unwrap();

        let flat = list_xml_files(temp.path(), false).await.unwrap();
        assert_eq!(flat.len(), 2);
        assert!(flat[0].ends_with("a.xml"));

        let deep = list_xml_files(temp.path(), true).await.unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let files = list_xml_files(Path::new("/nonexistent/okar"), true).await.unwrap();
        assert!(files.is_empty());
    }
}
