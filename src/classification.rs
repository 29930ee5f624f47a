use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::errors::{HatCheckError, HatCheckResult};
use crate::feedback::{Feedback, FeedbackSink};
use crate::frame::{capture, Capture, Frame, FrameSource};
use crate::lifecycle::LoopState;
use crate::policy::decide;
use crate::scores::{ScoreSet, Vocabulary};
use crate::scoring::Scorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Pause between the end of one tick and the start of the next.
    pub tick_delay: Duration,
    pub scoring_timeout: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_delay: Duration::from_millis(16),
            scoring_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The loop is not running; nothing was done.
    Halted,
    NotReady,
    Verdict(bool),
    Failed,
    /// A stop arrived while scoring; the result was dropped.
    Discarded,
}

/// Self-paced capture → score → decide loop.
///
/// `tick` borrows the loop mutably and awaits the whole cycle, so cycles
/// never overlap and at most one scoring call is outstanding.
pub struct ClassificationLoop<F> {
    source: F,
    scorer: Arc<dyn Scorer>,
    sink: Arc<dyn FeedbackSink>,
    vocabulary: Vocabulary,
    settings: LoopSettings,
    state: watch::Receiver<LoopState>,
    cycles: u64,
}

impl<F: FrameSource> ClassificationLoop<F> {
    pub fn new(
        source: F,
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn FeedbackSink>,
        vocabulary: Vocabulary,
        settings: LoopSettings,
        state: watch::Receiver<LoopState>,
    ) -> Self {
        Self {
            source,
            scorer,
            sink,
            vocabulary,
            settings,
            state,
            cycles: 0,
        }
    }

    fn is_running(&self) -> bool {
        *self.state.borrow() == LoopState::Running
    }

    /// Number of scoring cycles attempted so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub async fn tick(&mut self) -> TickOutcome {
        if !self.is_running() {
            return TickOutcome::Halted;
        }

        let frame = match capture(&mut self.source) {
            Capture::Frame(f) => f,
            Capture::NotReady => return TickOutcome::NotReady,
        };

        self.cycles += 1;
        let cycle = self.cycles;
        trace!(cycle, width = frame.width(), height = frame.height(), "frame captured");
        self.sink.emit(Feedback::Analyzing);

        let result = self.score(&frame).await;

        if !self.is_running() {
            debug!(cycle, "stopped while scoring, discarding result");
            return TickOutcome::Discarded;
        }

        match result {
            Ok(scores) => {
                let verdict = decide(&scores);
                debug!(cycle, ?scores, verdict, "frame classified");
                self.sink.emit(Feedback::from_verdict(verdict));
                TickOutcome::Verdict(verdict)
            }
            Err(e) => {
                warn!(cycle, "scoring failed: {e}");
                self.sink.emit(Feedback::Error(e.to_string()));
                TickOutcome::Failed
            }
        }
    }

    async fn score(&self, frame: &Frame) -> HatCheckResult<ScoreSet> {
        let scoring = self.scorer.classify(frame, &self.vocabulary);
        match self.settings.scoring_timeout {
            Some(limit) => tokio::time::timeout(limit, scoring)
                .await
                .unwrap_or_else(|_| Err(HatCheckError::Scoring(format!("timed out after {limit:?}")))),
            None => scoring.await,
        }
    }

    /// Ticks until the state leaves `Running`. A stop request is observed
    /// at the next tick boundary; an in-flight cycle always completes.
    pub async fn run(mut self) {
        debug!("classification loop started");
        while self.is_running() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick_delay) => {}
                changed = self.state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(cycles = self.cycles, "classification loop stopped");
    }
}
