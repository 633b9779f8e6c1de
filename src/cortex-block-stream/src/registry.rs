//! Tracking of active runs per session.
//!
//! A session has at most one active run. Starting a new run stops the
//! previous one, so a regenerated answer never interleaves with the stale
//! one on the session topic.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcast::BlockBroadcaster;
use crate::config::BlockStreamConfig;
use crate::error::BlockStreamResult;
use crate::orchestrator::{BlockStreamHandle, BlockStreamer, StreamEndSummary};

/// Registry of running block streams, keyed by session id.
pub struct StreamRegistry {
    runs: DashMap<String, BlockStreamHandle>,
    config: BlockStreamConfig,
    broadcaster: Arc<dyn BlockBroadcaster>,
}

impl StreamRegistry {
    /// Create a registry that spawns runs with `config`.
    pub fn new(config: BlockStreamConfig, broadcaster: Arc<dyn BlockBroadcaster>) -> Self {
        Self {
            runs: DashMap::new(),
            config,
            broadcaster,
        }
    }

    /// Default configuration for new runs.
    pub fn config(&self) -> &BlockStreamConfig {
        &self.config
    }

    /// Start a run for a session with the registry's configuration.
    ///
    /// A run id is generated when none is given.
    pub async fn start_run(
        &self,
        session_id: &str,
        run_id: Option<String>,
    ) -> BlockStreamResult<BlockStreamHandle> {
        self.start_run_with_config(session_id, run_id, self.config.clone())
            .await
    }

    /// Start a run with a per-run configuration.
    pub async fn start_run_with_config(
        &self,
        session_id: &str,
        run_id: Option<String>,
        config: BlockStreamConfig,
    ) -> BlockStreamResult<BlockStreamHandle> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let handle = BlockStreamer::spawn(
            session_id,
            run_id.clone(),
            config,
            Arc::clone(&self.broadcaster),
        )?;

        let previous = self.runs.insert(session_id.to_string(), handle.clone());
        if let Some(previous) = previous {
            info!(
                session_id = %session_id,
                previous_run_id = %previous.run_id(),
                run_id = %run_id,
                "Replacing active block stream"
            );
            previous.stop().await;
        }

        Ok(handle)
    }

    /// Handle for a specific run, if it is the session's active one.
    pub fn get(&self, session_id: &str, run_id: &str) -> Option<BlockStreamHandle> {
        self.runs
            .get(session_id)
            .filter(|handle| handle.run_id() == run_id)
            .map(|handle| handle.clone())
    }

    /// Handle for the session's active run.
    pub fn active_run(&self, session_id: &str) -> Option<BlockStreamHandle> {
        self.runs.get(session_id).map(|handle| handle.clone())
    }

    /// End a run's stream and release it.
    ///
    /// Returns `None` when the run is not the session's active one.
    pub async fn finish_run(
        &self,
        session_id: &str,
        run_id: &str,
    ) -> BlockStreamResult<Option<StreamEndSummary>> {
        let Some((_, handle)) = self
            .runs
            .remove_if(session_id, |_, handle| handle.run_id() == run_id)
        else {
            return Ok(None);
        };

        let summary = handle.stream_end().await;
        handle.stop().await;
        debug!(session_id = %session_id, run_id = %run_id, "Block stream finished");
        summary.map(Some)
    }

    /// Stop the session's active run without flushing. Returns whether one existed.
    pub async fn stop_session(&self, session_id: &str) -> bool {
        let Some((_, handle)) = self.runs.remove(session_id) else {
            return false;
        };
        handle.stop().await;
        true
    }

    /// Stop every active run.
    pub async fn stop_all(&self) {
        let sessions: Vec<String> = self.runs.iter().map(|e| e.key().clone()).collect();
        for session_id in sessions {
            self.stop_session(&session_id).await;
        }
    }

    /// Drop entries whose run has ended or whose actor already exited.
    ///
    /// The actor of a finished run exits once the last outside handle is
    /// dropped. Returns how many entries were removed.
    pub fn prune_closed(&self) -> usize {
        let before = self.runs.len();
        self.runs
            .retain(|_, handle| !handle.is_closed() && !handle.is_finished());
        before - self.runs.len()
    }

    /// Number of tracked runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
