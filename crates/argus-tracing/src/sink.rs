//! Submission sink collaborator and reference implementations
//!
//! The tracing core hands each completed transaction, with its span tree
//! flattened, to a [`TransactionSink`] exactly once. Anything beyond
//! acceptance, such as batching or transport, is the sink's concern.

use crate::context::SpanContext;
use crate::error::Result;
use argus_types::SpanStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Serializable snapshot of one finished child span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    /// The span's identity.
    pub context: SpanContext,

    /// When the span started.
    pub start_timestamp: DateTime<Utc>,

    /// When the span finished.
    pub end_timestamp: Option<DateTime<Utc>>,

    /// The recorded outcome.
    pub status: Option<SpanStatus>,

    /// String tags.
    pub tags: HashMap<String, String>,

    /// Arbitrary structured data.
    pub data: HashMap<String, Value>,
}

/// A completed transaction ready for transport: the root span's own data
/// plus the flattened list of child span records in registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedTransaction {
    /// The transaction's name.
    pub name: String,

    /// The root span's identity.
    pub context: SpanContext,

    /// When the transaction started.
    pub start_timestamp: DateTime<Utc>,

    /// When the transaction finished.
    pub end_timestamp: DateTime<Utc>,

    /// The transaction's outcome.
    pub status: SpanStatus,

    /// Root span tags.
    pub tags: HashMap<String, String>,

    /// Root span data.
    pub data: HashMap<String, Value>,

    /// Child span records, flattened in registration order.
    pub spans: Vec<SpanRecord>,
}

impl FinishedTransaction {
    /// Total wall-clock duration of the transaction.
    pub fn duration(&self) -> chrono::Duration {
        self.end_timestamp - self.start_timestamp
    }
}

/// Accepts finished transactions for transport.
///
/// The tracing core never awaits a submission inline and never reacts to
/// its outcome beyond logging; implementations own their failure handling.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    /// Accept a finished transaction.
    async fn submit(&self, transaction: FinishedTransaction) -> Result<()>;
}

/// In-memory sink for tests and local development.
pub struct MemorySink {
    transactions: RwLock<Vec<FinishedTransaction>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(Vec::new()),
        }
    }

    /// All transactions submitted so far.
    pub fn transactions(&self) -> Vec<FinishedTransaction> {
        self.transactions.read().clone()
    }

    /// Number of transactions submitted so far.
    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    /// Drop all recorded transactions.
    pub fn clear(&self) {
        self.transactions.write().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSink for MemorySink {
    async fn submit(&self, transaction: FinishedTransaction) -> Result<()> {
        self.transactions.write().push(transaction);
        Ok(())
    }
}

/// Append-only JSONL file sink, one serialized transaction per line.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    /// Create a sink writing to `path`, creating parent directories if
    /// needed.
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self { path })
    }

    /// The file path transactions are appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back all transactions written so far.
    pub async fn read_all(&self) -> Result<Vec<FinishedTransaction>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut transactions = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let transaction: FinishedTransaction = serde_json::from_str(&line)?;
            transactions.push(transaction);
        }

        Ok(transactions)
    }
}

#[async_trait]
impl TransactionSink for JsonLinesSink {
    async fn submit(&self, transaction: FinishedTransaction) -> Result<()> {
        let json = serde_json::to_string(&transaction)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(())
    }
}
