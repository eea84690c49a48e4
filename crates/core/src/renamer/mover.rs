//! Batch file moves with backup and rollback.
//!
//! A batch is planned up front and executed in order. Each move is an
//! atomic rename; across filesystems it falls back to a copy whose SHA-256
//! is checked against the source before the source is removed. A replaced
//! destination is first renamed to a backup next to it. When a move fails,
//! every completed move is undone and the backups are restored.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 64 * 1024;

/// Errors that can occur while moving files.
#[derive(Debug, Error)]
pub enum RenameError {
    #[error("Source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Failed to copy {source_path} to {destination}: {source}")]
    CopyFailed {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Failed to back up {path}: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rollback failed: {reason}")]
    RollbackFailed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenameError {
    fn copy_failed(source: &Path, destination: &Path, e: std::io::Error) -> Self {
        Self::CopyFailed {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
            source: e,
        }
    }
}

/// One planned move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    /// Document id, when the edition carries one.
    pub doc_id: Option<String>,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A completed move and the backup of what it replaced.
#[derive(Debug, Clone)]
struct CompletedMove {
    source: PathBuf,
    destination: PathBuf,
    backup: Option<PathBuf>,
}

/// Moves done so far in a batch, in order.
#[derive(Debug, Clone, Default)]
pub struct RollbackPlan {
    completed: Vec<CompletedMove>,
}

impl RollbackPlan {
    pub fn has_changes(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Attempts an atomic rename. `Ok(false)` means the paths are on different
/// filesystems.
async fn try_atomic_move(source: &Path, destination: &Path) -> Result<bool, std::io::Error> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// SHA-256 of a file, hex encoded.
pub async fn sha256_file(path: &Path) -> Result<String, std::io::Error> {
    let file = File::open(path).await?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut hasher = Sha256::new();
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Copies `source` to `destination`, hashing while copying, then checks the
/// written file against that hash.
pub async fn copy_verified(source: &Path, destination: &Path) -> Result<String, RenameError> {
    let source_file = File::open(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RenameError::SourceNotFound {
                path: source.to_path_buf(),
            }
        } else {
            RenameError::Io(e)
        }
    })?;
    let dest_file = File::create(destination)
        .await
        .map_err(|e| RenameError::copy_failed(source, destination, e))?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut hasher = Sha256::new();

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| RenameError::copy_failed(source, destination, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|e| RenameError::copy_failed(source, destination, e))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| RenameError::copy_failed(source, destination, e))?;

    let expected = format!("{:x}", hasher.finalize());
    let actual = sha256_file(destination).await?;
    if actual != expected {
        let _ = fs::remove_file(destination).await;
        return Err(RenameError::ChecksumMismatch {
            path: destination.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(expected)
}

/// Moves one file, falling back to copy + verify + remove.
pub async fn move_file(source: &Path, destination: &Path) -> Result<(), RenameError> {
    if fs::metadata(source).await.is_err() {
        return Err(RenameError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }
    if try_atomic_move(source, destination).await? {
        return Ok(());
    }
    debug!(source = %source.display(), "Cross-device move, copying");
    copy_verified(source, destination).await?;
    fs::remove_file(source).await?;
    Ok(())
}

fn backup_path(destination: &Path, tag: &str) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.bak", name, tag))
}

/// Executes planned moves as one batch.
#[derive(Debug, Clone)]
pub struct BatchMover {
    /// Distinguishes backups of concurrent or crashed runs.
    tag: String,
}

impl BatchMover {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    async fn apply(&self, planned: &PlannedMove, plan: &mut RollbackPlan) -> Result<(), RenameError> {
        if let Some(parent) = planned.destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let backup = match fs::metadata(&planned.destination).await {
            Ok(_) => {
                let backup = backup_path(&planned.destination, &self.tag);
                fs::rename(&planned.destination, &backup)
                    .await
                    .map_err(|e| RenameError::BackupFailed {
                        path: planned.destination.clone(),
                        source: e,
                    })?;
                Some(backup)
            }
            Err(_) => None,
        };

        if let Err(e) = move_file(&planned.source, &planned.destination).await {
            if let Some(backup) = &backup {
                let _ = fs::rename(backup, &planned.destination).await;
            }
            return Err(e);
        }

        plan.completed.push(CompletedMove {
            source: planned.source.clone(),
            destination: planned.destination.clone(),
            backup,
        });
        Ok(())
    }

    /// Runs every move; on failure undoes the completed ones.
    pub async fn execute(&self, moves: &[PlannedMove]) -> Result<usize, RenameError> {
        let mut plan = RollbackPlan::default();

        for planned in moves {
            if let Err(e) = self.apply(planned, &mut plan).await {
                warn!(
                    source = %planned.source.display(),
                    completed = plan.len(),
                    error = %e,
                    "Move failed, rolling back"
                );
                if plan.has_changes() {
                    self.rollback(plan).await?;
                }
                return Err(e);
            }
        }

        for done in &plan.completed {
            if let Some(backup) = &done.backup {
                if let Err(e) = fs::remove_file(backup).await {
                    warn!(path = %backup.display(), error = %e, "Failed to remove backup");
                }
            }
        }
        Ok(plan.len())
    }

    /// Moves files back to their sources and restores backups, newest first.
    pub async fn rollback(&self, plan: RollbackPlan) -> Result<(), RenameError> {
        let mut errors = Vec::new();

        for done in plan.completed.iter().rev() {
            if let Err(e) = move_file(&done.destination, &done.source).await {
                errors.push(format!("{}: {}", done.destination.display(), e));
                continue;
            }
            if let Some(backup) = &done.backup {
                if let Err(e) = fs::rename(backup, &done.destination).await {
                    errors.push(format!("{}: {}", backup.display(), e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RenameError::RollbackFailed {
                reason: errors.join(", "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn planned(source: PathBuf, destination: PathBuf) -> PlannedMove {
        PlannedMove {
            doc_id: None,
            source,
            destination,
        }
    }

    #[tokio::test]
    async fn test_batch_moves_and_drops_backups() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        let editions = temp.path().join("editions");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&editions).unwrap();
        std::fs::write(staging.join("1.xml"), "new").unwrap();
        std::fs::write(editions.join("A.xml"), "old").unwrap();

        let moved = BatchMover::new("run")
            .execute(&[planned(staging.join("1.xml"), editions.join("A.xml"))])
            .await
            .unwrap();

        assert_eq!(moved, 1);
        assert_eq!(std::fs::read_to_string(editions.join("A.xml")).unwrap(), "new");
        assert!(!staging.join("1.xml").exists());
        assert!(!editions.join(".A.xml.run.bak").exists());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_completed_moves() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        let editions = temp.path().join("editions");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::create_dir_all(&editions).unwrap();
        std::fs::write(staging.join("1.xml"), "one").unwrap();
        std::fs::write(editions.join("A.xml"), "previous A").unwrap();

        let moves = [
            planned(staging.join("1.xml"), editions.join("A.xml")),
            planned(staging.join("2.xml"), editions.join("B.xml")),
        ];
        let err = BatchMover::new("run").execute(&moves).await.unwrap_err();

        assert!(matches!(err, RenameError::SourceNotFound { .. }));
        assert_eq!(std::fs::read_to_string(staging.join("1.xml")).unwrap(), "one");
        assert_eq!(
            std::fs::read_to_string(editions.join("A.xml")).unwrap(),
            "previous A"
        );
        assert!(!editions.join("B.xml").exists());
    }

    #[tokio::test]
    async fn test_copy_verified() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.xml");
        let destination = temp.path().join("b.xml");
        std::fs::write(&source, "<TEI/>").unwrap();

        let checksum = copy_verified(&source, &destination).await.unwrap();
        assert_eq!(checksum, sha256_file(&source).await.unwrap());
        assert_eq!(std::fs::read(&destination).unwrap(), b"<TEI/>");
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let temp = TempDir::new().unwrap();
        let err = copy_verified(&temp.path().join("none.xml"), &temp.path().join("b.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenameError::SourceNotFound { .. }));
    }
}
