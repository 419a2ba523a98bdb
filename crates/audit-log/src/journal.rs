use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::AuditEntry;

/// Errors that can occur during journal I/O.
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("failed to create parent directories: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open journal file: {0}")]
    OpenFile(std::io::Error),

    #[error("failed to serialize journal entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write to journal: {0}")]
    Write(std::io::Error),

    #[error("failed to flush journal: {0}")]
    Flush(std::io::Error),
}

/// Append-only JSON-lines writer.
///
/// Lines are collected in an in-memory buffer; nothing is guaranteed to be
/// on disk until [`flush`](Self::flush) returns.
pub struct JournalWriter {
    file: BufWriter<File>,
    written: u64,
}

impl JournalWriter {
    /// Open (or create) the journal at `path` in append mode, creating
    /// missing parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(AuditWriteError::CreateDir)?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(AuditWriteError::OpenFile)?;

        Ok(Self {
            file: BufWriter::new(file),
            written: 0,
        })
    }

    /// Serialise `entry` as one newline-terminated JSON object.
    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .await
            .map_err(AuditWriteError::Write)?;
        self.written += 1;

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.file.flush().await.map_err(AuditWriteError::Flush)
    }

    /// Entries written since the journal was opened.
    pub fn written(&self) -> u64 {
        self.written
    }
}
