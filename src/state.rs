//! Process-wide supervisor state
//!
//! Built once at startup and torn down explicitly at shutdown. Owns the
//! persistence stores, the log aggregator task, the session registry and
//! the job supervisor.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::repositories::{
    ChannelRepository, ChannelStore, InMemoryStore, LogRecordRepository, LogSink,
    SessionRepository, SessionStore,
};
use crate::services::{JobSupervisor, LogAggregator, LogAggregatorHandle, ProcessRunner, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Sqlite,
    /// Database unavailable at startup; nothing outlives the process
    InMemory,
}

/// Persistence backends handed to [`SupervisorState::with_stores`]
#[derive(Clone)]
pub struct Stores {
    pub logs: Arc<dyn LogSink>,
    pub sessions: Arc<dyn SessionStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub mode: PersistenceMode,
}

impl Stores {
    pub fn sqlite(database: &Database) -> Self {
        Self {
            logs: Arc::new(LogRecordRepository::new(database.pool())),
            sessions: Arc::new(SessionRepository::new(database.pool())),
            channels: Arc::new(ChannelRepository::new(database.pool())),
            mode: PersistenceMode::Sqlite,
        }
    }

    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        Self {
            logs: Arc::new(store.clone()),
            sessions: Arc::new(store.clone()),
            channels: Arc::new(store),
            mode: PersistenceMode::InMemory,
        }
    }
}

pub struct SupervisorState {
    pub config: Config,
    pub supervisor: JobSupervisor,
    pub sessions: Arc<SessionRegistry>,
    pub channels: Arc<dyn ChannelStore>,
    pub log_sink: Arc<dyn LogSink>,
    pub logs: LogAggregatorHandle,
    pub persistence: PersistenceMode,
    log_task: JoinHandle<()>,
}

impl SupervisorState {
    /// Open the configured database, falling back to in-memory stores with a
    /// warning when it cannot be created or migrated
    pub async fn initialize(config: Config) -> Self {
        let stores = match Self::open_database(&config).await {
            Ok(database) => {
                info!("Using SQLite persistence at {}", config.database.url);
                Stores::sqlite(&database)
            }
            Err(e) => {
                warn!(
                    "Database {} unavailable ({}), continuing with in-memory persistence",
                    config.database.url, e
                );
                Stores::in_memory()
            }
        };
        Self::with_stores(config, stores)
    }

    async fn open_database(config: &Config) -> anyhow::Result<Database> {
        let database = Database::new(&config.database).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Must be called from within a tokio runtime
    pub fn with_stores(config: Config, stores: Stores) -> Self {
        let (logs, log_task) =
            LogAggregator::spawn(stores.logs.clone(), config.streaming.log_channel_capacity);
        let sessions = Arc::new(SessionRegistry::new(stores.sessions.clone()));
        let supervisor = JobSupervisor::new(
            ProcessRunner::from_config(&config.ffmpeg),
            logs.clone(),
            sessions.current_session_id(),
            &config.streaming,
        );

        Self {
            config,
            supervisor,
            sessions,
            channels: stores.channels,
            log_sink: stores.logs,
            logs,
            persistence: stores.mode,
            log_task,
        }
    }

    pub fn session_id(&self) -> &str {
        self.sessions.current_session_id()
    }

    /// Stop every running batch, wait for each to finish, then drain the log queue
    pub async fn shutdown(self) {
        let stopping = self.supervisor.stop_all().await;
        // Each runner bounds its own kill wait; allow a little on top
        let wait = Duration::from_secs(self.config.ffmpeg.stop_timeout_seconds + 5);

        for index in stopping {
            match tokio::time::timeout(wait, self.supervisor.wait_for_batch(index)).await {
                Ok(Ok(view)) => info!(batch_index = index, state = %view.state, "Batch shut down"),
                Ok(Err(e)) => warn!(batch_index = index, "Batch vanished during shutdown: {}", e),
                Err(_) => warn!(batch_index = index, "Batch did not finish within {:?}", wait),
            }
        }

        self.logs.flush().await;
        let failed = self.logs.failed_writes();
        if failed > 0 {
            warn!("{} log records could not be persisted", failed);
        }

        // Batch tasks may still hold handles; the writer is idle after the flush
        self.log_task.abort();
        info!("Supervisor state shut down");
    }
}
