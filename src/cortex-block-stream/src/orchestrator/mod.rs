//! Per-run block stream orchestration.
//!
//! Each generation run gets its own actor task wrapping one [`Segmenter`],
//! the optional merge stage and pacing. Callers talk to it through a
//! [`BlockStreamHandle`]; commands are queued and applied strictly in order.
//!
//! [`Segmenter`]: crate::segmenter::Segmenter

mod actor;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::broadcast::BlockBroadcaster;
use crate::config::{BlockStreamConfig, BreakMode};
use crate::error::{BlockStreamError, BlockStreamResult};

use self::actor::{Command, RunActor};

/// Result of ending a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamEndSummary {
    /// Blocks emitted by this call, in order.
    pub blocks: Vec<String>,
    /// Blocks emitted over the whole run.
    pub total_emitted: usize,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStreamSnapshot {
    pub session_id: String,
    pub run_id: String,
    pub enabled: bool,
    pub break_mode: BreakMode,
    /// Whether `stream_end` already ran.
    pub finished: bool,
    /// Characters held by the segmenter.
    pub buffered_chars: usize,
    /// Characters held raw while in `stream_end` mode.
    pub raw_buffered_chars: usize,
    pub in_fenced_block: bool,
    pub pending_merge_blocks: usize,
    /// Pending merge content once joined.
    pub pending_merge_chars: usize,
    pub idle_timer_armed: bool,
    pub emitted_count: usize,
}

/// Starts block stream actors.
pub struct BlockStreamer;

impl BlockStreamer {
    /// Spawn the actor for one run on the current tokio runtime.
    pub fn spawn(
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        config: BlockStreamConfig,
        broadcaster: Arc<dyn BlockBroadcaster>,
    ) -> BlockStreamResult<BlockStreamHandle> {
        config.validate()?;

        let session_id = session_id.into();
        let run_id = run_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let actor = RunActor::new(
            session_id.clone(),
            run_id.clone(),
            config,
            broadcaster,
            cancel.clone(),
            Arc::clone(&finished),
        );
        tokio::spawn(actor.run(rx));

        Ok(BlockStreamHandle {
            session_id: session_id.into(),
            run_id: run_id.into(),
            tx,
            cancel,
            finished,
        })
    }
}

/// Cloneable handle to a running block stream.
#[derive(Debug, Clone)]
pub struct BlockStreamHandle {
    session_id: Arc<str>,
    run_id: Arc<str>,
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl BlockStreamHandle {
    /// Session this run publishes to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Whether the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether `stream_end` has completed. A finished run accepts no more input.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn send(&self, command: Command) -> BlockStreamResult<()> {
        self.tx
            .send(command)
            .map_err(|_| BlockStreamError::closed(&*self.session_id, &*self.run_id))
    }

    /// Queue generated text.
    pub fn feed(&self, text: impl Into<String>) -> BlockStreamResult<()> {
        self.send(Command::Feed(text.into()))
    }

    /// Mark the end of one generated text segment.
    pub fn segment_end(&self) -> BlockStreamResult<()> {
        self.send(Command::SegmentEnd)
    }

    /// Flush everything, emit it, and finish the run.
    ///
    /// Calling it again afterwards returns an empty summary.
    pub async fn stream_end(&self) -> BlockStreamResult<StreamEndSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StreamEnd(reply))?;
        rx.await
            .map_err(|_| BlockStreamError::closed(&*self.session_id, &*self.run_id))
    }

    /// Snapshot counters and buffer sizes.
    pub async fn inspect(&self) -> BlockStreamResult<BlockStreamSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Inspect(reply))?;
        rx.await
            .map_err(|_| BlockStreamError::closed(&*self.session_id, &*self.run_id))
    }

    /// Stop the actor, abandoning pending timers and undelivered blocks.
    ///
    /// Waits until the actor has exited. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(Command::Stop);
        self.tx.closed().await;
    }
}
