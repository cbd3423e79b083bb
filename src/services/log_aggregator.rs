//! Central log writer
//!
//! Batch tasks never touch the persistence sink directly. They submit
//! records into a bounded channel drained by a single task, so a slow or
//! broken sink applies backpressure instead of unbounded buffering, and a
//! failed write only bumps a counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::LogRecord;
use crate::repositories::LogSink;

enum LogCommand {
    Append(LogRecord),
    /// Acknowledged once every earlier command has been handled
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct AggregatorStats {
    written: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable sender side handed to every batch
#[derive(Clone)]
pub struct LogAggregatorHandle {
    sender: mpsc::Sender<LogCommand>,
    stats: Arc<AggregatorStats>,
}

pub struct LogAggregator;

impl LogAggregator {
    /// Start the writer task. It exits once every handle has been dropped.
    pub fn spawn(sink: Arc<dyn LogSink>, capacity: usize) -> (LogAggregatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(AggregatorStats::default());

        let task = tokio::spawn(Self::run(sink, receiver, stats.clone()));

        (LogAggregatorHandle { sender, stats }, task)
    }

    async fn run(
        sink: Arc<dyn LogSink>,
        mut receiver: mpsc::Receiver<LogCommand>,
        stats: Arc<AggregatorStats>,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                LogCommand::Append(record) => match sink.append(&record).await {
                    Ok(()) => {
                        stats.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let failed = stats.failed.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            session_id = %record.session_id,
                            batch_index = ?record.batch_index,
                            failed_writes = failed,
                            "Failed to persist log record: {}",
                            e
                        );
                    }
                },
                LogCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!(
            "Log aggregator stopped after {} writes ({} failed)",
            stats.written.load(Ordering::Relaxed),
            stats.failed.load(Ordering::Relaxed)
        );
    }
}

impl LogAggregatorHandle {
    /// Queue a record, waiting for room when the channel is full
    pub async fn submit(&self, record: LogRecord) {
        if self.sender.send(LogCommand::Append(record)).await.is_err() {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Log aggregator is closed, dropping log record");
        }
    }

    /// Wait until everything submitted before this call has been written
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(LogCommand::Flush(ack)).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    pub fn failed_writes(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}
