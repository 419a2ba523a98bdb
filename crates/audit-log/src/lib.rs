//! Append-only structured JSON-lines journal for the tcp-relay project.
//!
//! Rule lifecycle changes and session events are serialised as one
//! newline-terminated JSON object each and appended to a journal file,
//! producing a [JSON Lines](https://jsonlines.org/) stream that is easy to
//! ship, parse, and replay.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, writer) = AuditSink::start("/var/log/tcp-relay/journal.jsonl").await?;
//!
//! sink.log(AuditEntry::new(
//!     AuditEventType::RuleStarted,
//!     AuditSource::new("rules").with_rule(1),
//!     serde_json::json!({"listen": "0.0.0.0:8080"}),
//! ))
//! .await;
//!
//! drop(sink);
//! writer.await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod journal;
pub mod sink;

// Re-export primary public types at the crate root for convenience.
pub use entry::{AuditEntry, AuditEventType, AuditSource};
pub use journal::{AuditWriteError, JournalWriter};
pub use sink::AuditSink;
