use std::path::Path;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::journal::{AuditWriteError, JournalWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// A cheap, cloneable handle used to submit [`AuditEntry`] values into the
/// background journal writer.
///
/// Async code calls [`log`](Self::log); code running outside the runtime,
/// such as an engine thread, calls [`record`](Self::record), which never
/// blocks.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Open the journal at `path` and spawn the background writer task.
    ///
    /// The task drains entries in batches, flushing after each batch, and
    /// performs a final flush once every `AuditSink` clone has been dropped.
    /// Await the returned handle to be sure the journal is complete.
    ///
    /// I/O errors inside the task are logged via `tracing::error` and the
    /// entry is skipped; the task does not panic.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);

        let writer = JournalWriter::open(path).await?;
        let handle = tokio::spawn(run_writer_loop(writer, rx));

        Ok((Self { tx }, handle))
    }

    /// Send an entry, waiting for channel space if needed.
    ///
    /// If the background task has already exited the entry is dropped and a
    /// warning is logged.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "journal channel closed; entry dropped"
            );
        }
    }

    /// Send an entry without waiting. A full or closed channel drops the
    /// entry with a warning.
    pub fn record(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => tracing::warn!(
                event_type = ?entry.event_type,
                "journal channel full; entry dropped"
            ),
            Err(TrySendError::Closed(entry)) => tracing::warn!(
                event_type = ?entry.event_type,
                "journal channel closed; entry dropped"
            ),
        }
    }
}

async fn run_writer_loop(mut writer: JournalWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    while let Some(entry) = rx.recv().await {
        write_entry(&mut writer, &entry).await;
        // Take whatever else is already queued before paying for a flush.
        while let Ok(entry) = rx.try_recv() {
            write_entry(&mut writer, &entry).await;
        }
        if let Err(err) = writer.flush().await {
            tracing::error!(%err, "journal flush failed");
        }
    }

    if let Err(err) = writer.flush().await {
        tracing::error!(%err, "failed to flush journal on shutdown");
    }
    tracing::debug!(entries = writer.written(), "journal writer shutting down");
}

async fn write_entry(writer: &mut JournalWriter, entry: &AuditEntry) {
    if let Err(err) = writer.write(entry).await {
        tracing::error!(%err, event_type = ?entry.event_type, "failed to write journal entry");
    }
}
