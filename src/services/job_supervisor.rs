//! Job supervisor
//!
//! Owns every batch started in this process. Each batch runs its transcoder
//! on its own tokio task and keeps its record behind its own lock, so a busy
//! batch never blocks status reads or starts on another index. The batch
//! table lock is only held for lookups and inserts.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamingConfig;
use crate::errors::{StreamError, StreamResult};
use crate::models::{BatchState, BatchView, LogRecord, LogType, StreamParams};
use crate::services::log_aggregator::LogAggregatorHandle;
use crate::services::log_tail::LogTail;
use crate::services::process_runner::{ProcessRunner, RunLogger, TerminationResult};
use crate::utils::mask_secret;

/// Mutable part of a batch
#[derive(Debug)]
struct BatchRecord {
    state: BatchState,
    params: StreamParams,
    target_display: String,
    started_at: chrono::DateTime<Utc>,
    ended_at: Option<chrono::DateTime<Utc>>,
    failure: Option<String>,
    log_tail: LogTail,
}

struct BatchHandle {
    index: u32,
    record: RwLock<BatchRecord>,
    cancel: CancellationToken,
    state_tx: watch::Sender<BatchState>,
}

impl BatchHandle {
    async fn view(&self) -> BatchView {
        let record = self.record.read().await;
        BatchView {
            batch_index: self.index,
            state: record.state,
            start_time: Some(record.started_at),
            ended_at: record.ended_at,
            video_path: record.params.video_path.clone(),
            target_display: record.target_display.clone(),
            duration_limit_secs: record.params.duration_limit_secs,
            failure: record.failure.clone(),
            log_tail: record.log_tail.snapshot(),
        }
    }

    async fn state(&self) -> BatchState {
        self.record.read().await.state
    }

    async fn finish(&self, result: TerminationResult) {
        let state = {
            let mut record = self.record.write().await;
            match result {
                TerminationResult::Success | TerminationResult::Stopped => {
                    record.state = BatchState::Stopped;
                }
                TerminationResult::Failure(e) => {
                    record.state = BatchState::Failed;
                    record.failure = Some(e.to_string());
                }
            }
            record.ended_at = Some(Utc::now());
            record.state
        };

        self.state_tx.send_replace(state);
        info!(batch_index = self.index, state = %state, "Batch finished");
    }
}

/// Routes a run's lines into the batch tail and the log aggregator
struct BatchLogger {
    handle: Arc<BatchHandle>,
    logs: LogAggregatorHandle,
    session_id: String,
    video_path: String,
    masked_key: Option<String>,
    channel_name: Option<String>,
}

#[async_trait::async_trait]
impl RunLogger for BatchLogger {
    async fn log(&self, log_type: LogType, message: String) {
        let mut record = LogRecord::new(&self.session_id, log_type, message).with_batch(self.handle.index);
        record.video_path = Some(self.video_path.clone());
        record.stream_key = self.masked_key.clone();
        record.channel_name = self.channel_name.clone();

        // Tail first; persistence trouble must not hold it back
        self.handle
            .record
            .write()
            .await
            .log_tail
            .push(record.display_line());

        self.logs.submit(record).await;
    }
}

#[derive(Clone)]
pub struct JobSupervisor {
    batches: Arc<RwLock<HashMap<u32, Arc<BatchHandle>>>>,
    history: Arc<RwLock<VecDeque<BatchView>>>,
    runner: Arc<ProcessRunner>,
    logs: LogAggregatorHandle,
    session_id: String,
    log_tail_capacity: usize,
    history_capacity: usize,
}

impl JobSupervisor {
    pub fn new(
        runner: ProcessRunner,
        logs: LogAggregatorHandle,
        session_id: impl Into<String>,
        streaming: &StreamingConfig,
    ) -> Self {
        Self {
            batches: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            runner: Arc::new(runner),
            logs,
            session_id: session_id.into(),
            log_tail_capacity: streaming.log_tail_capacity,
            history_capacity: streaming.history_capacity,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Start a batch and return without waiting for the transcoder.
    ///
    /// Fails with [`StreamError::AlreadyRunning`] while `index` is running;
    /// the running batch is left untouched. A finished batch under the same
    /// index is moved to history and replaced.
    pub async fn start_batch(&self, index: u32, params: StreamParams) -> StreamResult<()> {
        params.validate()?;

        let target_display = self.runner.masked_output_url(&params);
        let masked_key = params.target.stream_key().map(mask_secret);
        let video_path = params.video_path.display().to_string();
        let channel_name = params.channel_name.clone();

        let handle = {
            let mut batches = self.batches.write().await;

            if let Some(existing) = batches.get(&index) {
                if existing.state().await == BatchState::Running {
                    warn!(batch_index = index, "Rejected start, batch already running");
                    return Err(StreamError::AlreadyRunning(index));
                }
                let finished = existing.view().await;
                self.push_history(finished).await;
            }

            let (state_tx, _) = watch::channel(BatchState::Running);
            let handle = Arc::new(BatchHandle {
                index,
                record: RwLock::new(BatchRecord {
                    state: BatchState::Running,
                    params: params.clone(),
                    target_display: target_display.clone(),
                    started_at: Utc::now(),
                    ended_at: None,
                    failure: None,
                    log_tail: LogTail::new(self.log_tail_capacity),
                }),
                cancel: CancellationToken::new(),
                state_tx,
            });
            batches.insert(index, handle.clone());
            handle
        };

        info!(
            batch_index = index,
            video = %video_path,
            target = %target_display,
            "Starting batch"
        );

        let logger = BatchLogger {
            handle: handle.clone(),
            logs: self.logs.clone(),
            session_id: self.session_id.clone(),
            video_path,
            masked_key,
            channel_name,
        };
        let runner = self.runner.clone();

        tokio::spawn(async move {
            let result = runner.run(&params, &logger, handle.cancel.clone()).await;
            handle.finish(result).await;
        });

        Ok(())
    }

    /// Ask a running batch to stop. The state flips to Stopped once the
    /// process exit is observed or the kill wait times out.
    pub async fn stop_batch(&self, index: u32) -> StreamResult<()> {
        let handle = self.handle(index).await?;
        if handle.state().await != BatchState::Running {
            debug!(batch_index = index, "Stop requested for a batch that is not running");
            return Ok(());
        }
        info!(batch_index = index, "Stopping batch");
        handle.cancel.cancel();
        Ok(())
    }

    /// Request a stop for every running batch; returns the indices signalled
    pub async fn stop_all(&self) -> Vec<u32> {
        let handles: Vec<_> = self.batches.read().await.values().cloned().collect();
        let mut stopped = Vec::new();
        for handle in handles {
            if handle.state().await == BatchState::Running {
                handle.cancel.cancel();
                stopped.push(handle.index);
            }
        }
        stopped.sort_unstable();
        if !stopped.is_empty() {
            info!("Stopping {} running batches", stopped.len());
        }
        stopped
    }

    pub async fn status(&self, index: u32) -> StreamResult<BatchView> {
        Ok(self.handle(index).await?.view().await)
    }

    pub async fn list_active(&self) -> BTreeSet<u32> {
        let handles: Vec<_> = self.batches.read().await.values().cloned().collect();
        let mut active = BTreeSet::new();
        for handle in handles {
            if handle.state().await == BatchState::Running {
                active.insert(handle.index);
            }
        }
        active
    }

    /// Latest snapshot of every known index, ordered by index
    pub async fn list_all(&self) -> Vec<BatchView> {
        let handles: Vec<_> = self.batches.read().await.values().cloned().collect();
        let mut views = Vec::with_capacity(handles.len());
        for handle in handles {
            views.push(handle.view().await);
        }
        views.sort_by_key(|v| v.batch_index);
        views
    }

    /// Finished batches replaced by a restart, most recent first
    pub async fn history(&self) -> Vec<BatchView> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Wait until the batch leaves Running and return its final snapshot
    pub async fn wait_for_batch(&self, index: u32) -> StreamResult<BatchView> {
        let handle = self.handle(index).await?;
        let mut state_rx = handle.state_tx.subscribe();
        // The sender lives in the handle, so the channel cannot close here
        let _ = state_rx.wait_for(|state| state.is_terminal()).await;
        Ok(handle.view().await)
    }

    async fn handle(&self, index: u32) -> StreamResult<Arc<BatchHandle>> {
        self.batches
            .read()
            .await
            .get(&index)
            .cloned()
            .ok_or(StreamError::NotFound(index))
    }

    async fn push_history(&self, view: BatchView) {
        let mut history = self.history.write().await;
        history.push_front(view);
        history.truncate(self.history_capacity);
    }
}
