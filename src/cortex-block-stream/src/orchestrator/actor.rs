//! The per-run actor loop.
//!
//! One task owns all run state and processes commands strictly in arrival
//! order. The merge idle timer is a deadline polled alongside the command
//! queue, so arming it replaces any previous one and disarming is just
//! clearing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broadcast::{BlockBroadcaster, BlockEvent, topic_for_session};
use crate::config::{BlockStreamConfig, BreakMode};
use crate::merge::{MergeBuffer, MergeDecision};
use crate::pacing::Pacer;
use crate::segmenter::Segmenter;

use super::{BlockStreamSnapshot, StreamEndSummary};

/// Commands accepted by a run actor.
#[derive(Debug)]
pub(super) enum Command {
    Feed(String),
    SegmentEnd,
    StreamEnd(oneshot::Sender<StreamEndSummary>),
    Inspect(oneshot::Sender<BlockStreamSnapshot>),
    Stop,
}

enum Wake {
    Command(Option<Command>),
    Idle,
    Cancelled,
}

pub(super) struct RunActor {
    session_id: String,
    run_id: String,
    topic: String,
    config: BlockStreamConfig,
    segmenter: Segmenter,
    raw_buffer: String,
    merge: Option<MergeBuffer>,
    idle_deadline: Option<Instant>,
    pacer: Pacer,
    emitted_count: usize,
    finished: Arc<AtomicBool>,
    broadcaster: Arc<dyn BlockBroadcaster>,
    cancel: CancellationToken,
}

impl RunActor {
    pub(super) fn new(
        session_id: String,
        run_id: String,
        config: BlockStreamConfig,
        broadcaster: Arc<dyn BlockBroadcaster>,
        cancel: CancellationToken,
        finished: Arc<AtomicBool>,
    ) -> Self {
        let merge = config
            .merge
            .map(|merge| MergeBuffer::new(merge, config.chunk.break_preference));
        Self {
            topic: topic_for_session(&session_id),
            segmenter: Segmenter::new(&config.chunk),
            pacer: Pacer::new(&config.pacing),
            session_id,
            run_id,
            config,
            raw_buffer: String::new(),
            merge,
            idle_deadline: None,
            emitted_count: 0,
            finished,
            broadcaster,
            cancel,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            enabled = self.config.enabled,
            break_mode = ?self.config.break_mode,
            "Block stream started"
        );

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                command = commands.recv() => Wake::Command(command),
                _ = idle_elapsed(self.idle_deadline) => Wake::Idle,
            };

            match wake {
                Wake::Cancelled | Wake::Command(None) | Wake::Command(Some(Command::Stop)) => {
                    break;
                }
                Wake::Idle => self.on_idle().await,
                Wake::Command(Some(command)) => self.handle(command).await,
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        self.shutdown();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Feed(text) => self.feed(text).await,
            Command::SegmentEnd => self.segment_end().await,
            Command::StreamEnd(reply) => {
                let summary = self.stream_end().await;
                let _ = reply.send(summary);
            }
            Command::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Stop => {}
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn accepts_input(&self, operation: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.is_finished() {
            warn!(
                session_id = %self.session_id,
                run_id = %self.run_id,
                operation,
                "Ignoring input after stream end"
            );
            return false;
        }
        true
    }

    async fn feed(&mut self, text: String) {
        if !self.accepts_input("feed") {
            return;
        }

        match self.config.break_mode {
            BreakMode::StreamEnd => self.raw_buffer.push_str(&text),
            BreakMode::SegmentEnd => {
                let blocks = self.segmenter.feed(&text);
                self.route(blocks).await;
            }
        }
    }

    async fn segment_end(&mut self) {
        if !self.accepts_input("segment_end") || self.config.break_mode != BreakMode::SegmentEnd {
            return;
        }

        if let Some(block) = self.segmenter.flush() {
            self.route(vec![block]).await;
        }
    }

    async fn stream_end(&mut self) -> StreamEndSummary {
        if !self.config.enabled || self.is_finished() {
            self.finished.store(true, Ordering::Release);
            return StreamEndSummary {
                blocks: Vec::new(),
                total_emitted: self.emitted_count,
            };
        }

        let mut blocks = Vec::new();
        if !self.raw_buffer.is_empty() {
            let raw = std::mem::take(&mut self.raw_buffer);
            blocks.extend(self.segmenter.feed(&raw));
        }
        blocks.extend(self.segmenter.flush());

        let mut emitted = self.route(blocks).await;

        self.idle_deadline = None;
        if let Some(merged) = self.merge.as_mut().and_then(MergeBuffer::drain) {
            emitted.extend(self.emit(vec![merged]).await);
        }

        self.finished.store(true, Ordering::Release);
        info!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            emitted = emitted.len(),
            total_emitted = self.emitted_count,
            "Block stream ended"
        );

        StreamEndSummary {
            blocks: emitted,
            total_emitted: self.emitted_count,
        }
    }

    async fn on_idle(&mut self) {
        self.idle_deadline = None;
        let Some(merged) = self.merge.as_mut().and_then(MergeBuffer::drain) else {
            return;
        };
        debug!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            chars = merged.chars().count(),
            "Merge idle timeout, flushing pending blocks"
        );
        self.emit(vec![merged]).await;
    }

    /// Send blocks through the merge stage, emitting whatever comes out.
    async fn route(&mut self, blocks: Vec<String>) -> Vec<String> {
        let ready = match self.merge.as_mut() {
            None => blocks,
            Some(merge) => {
                let mut ready = Vec::new();
                for block in blocks.into_iter().filter(|b| !b.is_empty()) {
                    self.idle_deadline = None;
                    match merge.push(block) {
                        MergeDecision::Emit(merged) => ready.push(merged),
                        MergeDecision::Hold { reached_min } => {
                            trace!(
                                pending = merge.len(),
                                pending_chars = merge.combined_chars(),
                                reached_min,
                                "Holding blocks for merge"
                            );
                            self.idle_deadline = Some(Instant::now() + merge.idle_timeout());
                        }
                    }
                }
                ready
            }
        };

        self.emit(ready).await
    }

    /// Pace and publish blocks. Stops early if the run is cancelled.
    async fn emit(&mut self, blocks: Vec<String>) -> Vec<String> {
        let mut emitted = Vec::new();

        for block in blocks.into_iter().filter(|b| !b.is_empty()) {
            if let Some(delay) = self.pacer.delay_before(self.emitted_count) {
                let cancelled = tokio::select! {
                    _ = self.cancel.cancelled() => true,
                    _ = sleep(delay) => false,
                };
                if cancelled {
                    debug!(
                        session_id = %self.session_id,
                        run_id = %self.run_id,
                        "Cancelled during pacing delay"
                    );
                    break;
                }
            }

            let block_index = self.emitted_count;
            let event = BlockEvent {
                session_id: self.session_id.clone(),
                run_id: self.run_id.clone(),
                block_index,
                content: block.clone(),
            };
            if let Err(e) = self.broadcaster.publish(&self.topic, event).await {
                warn!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    block_index,
                    error = %e,
                    "Failed to publish block"
                );
            }
            debug!(
                session_id = %self.session_id,
                run_id = %self.run_id,
                block_index,
                chars = block.chars().count(),
                "Block emitted"
            );

            self.emitted_count += 1;
            emitted.push(block);
        }

        emitted
    }

    fn snapshot(&self) -> BlockStreamSnapshot {
        BlockStreamSnapshot {
            session_id: self.session_id.clone(),
            run_id: self.run_id.clone(),
            enabled: self.config.enabled,
            break_mode: self.config.break_mode,
            finished: self.is_finished(),
            buffered_chars: self.segmenter.buffered_chars(),
            raw_buffered_chars: self.raw_buffer.chars().count(),
            in_fenced_block: self.segmenter.in_fenced_block(),
            pending_merge_blocks: self.merge.as_ref().map_or(0, MergeBuffer::len),
            pending_merge_chars: self.merge.as_ref().map_or(0, MergeBuffer::combined_chars),
            idle_timer_armed: self.idle_deadline.is_some(),
            emitted_count: self.emitted_count,
        }
    }

    fn shutdown(&mut self) {
        self.idle_deadline = None;
        let discarded = self.segmenter.flush().map_or(0, |b| b.chars().count())
            + self.raw_buffer.chars().count()
            + self.merge.as_ref().map_or(0, MergeBuffer::combined_chars);
        self.raw_buffer.clear();
        if let Some(merge) = self.merge.as_mut() {
            merge.drain();
        }

        debug!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            emitted = self.emitted_count,
            discarded_chars = discarded,
            "Block stream stopped"
        );
    }
}

async fn idle_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
