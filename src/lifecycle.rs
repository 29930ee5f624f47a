use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::classification::{ClassificationLoop, LoopSettings};
use crate::errors::{HatCheckError, HatCheckResult};
use crate::feedback::{Feedback, FeedbackSink};
use crate::frame::StreamProvider;
use crate::scores::Vocabulary;
use crate::scoring::Scorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Uninitialized,
    ModelLoading,
    Ready,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::ModelLoading => "loading the model",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Owns the [`LoopState`] and drives the classification loop through it.
///
/// This is the only writer of the state; the running loop holds a read-only
/// receiver. The loop task is spawned with [`tokio::task::spawn_local`], so
/// [`Controller::start`] must be called from within a `LocalSet`.
pub struct Controller<P: StreamProvider> {
    provider: P,
    sink: Arc<dyn FeedbackSink>,
    vocabulary: Vocabulary,
    settings: LoopSettings,
    scorer: Option<Arc<dyn Scorer>>,
    state: watch::Sender<LoopState>,
    task: Option<JoinHandle<()>>,
}

impl<P: StreamProvider> Controller<P> {
    pub fn new(
        provider: P,
        sink: Arc<dyn FeedbackSink>,
        vocabulary: Vocabulary,
        settings: LoopSettings,
    ) -> Self {
        let (state, _rx) = watch::channel(LoopState::Uninitialized);
        Self {
            provider,
            sink,
            vocabulary,
            settings,
            scorer: None,
            state,
            task: None,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn transition(&self, to: LoopState) {
        let from = self.state.send_replace(to);
        info!(%from, to = %to, "lifecycle transition");
    }

    fn invalid(&self, action: &'static str) -> HatCheckError {
        HatCheckError::InvalidTransition {
            from: self.state(),
            action,
        }
    }

    pub fn begin_loading(&mut self) -> HatCheckResult<()> {
        if self.state() != LoopState::Uninitialized {
            return Err(self.invalid("load the model"));
        }
        self.transition(LoopState::ModelLoading);
        self.sink.emit(Feedback::Loading);
        Ok(())
    }

    /// Settles model loading. A load error is terminal.
    pub fn finish_loading<S: Scorer + 'static>(
        &mut self,
        loaded: HatCheckResult<S>,
    ) -> HatCheckResult<()> {
        if self.state() != LoopState::ModelLoading {
            return Err(self.invalid("finish loading the model"));
        }
        match loaded {
            Ok(scorer) => {
                self.scorer = Some(Arc::new(scorer));
                self.transition(LoopState::Ready);
                self.sink.emit(Feedback::Idle);
                Ok(())
            }
            Err(e) => {
                error!("failed to load model: {e}");
                self.transition(LoopState::Failed);
                self.sink.emit(Feedback::Error(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn initialize<Fut, S>(&mut self, load: Fut) -> HatCheckResult<()>
    where
        Fut: Future<Output = HatCheckResult<S>>,
        S: Scorer + 'static,
    {
        self.begin_loading()?;
        let loaded = load.await;
        self.finish_loading(loaded)
    }

    /// Handles the start trigger: acquires a stream and spawns the loop.
    ///
    /// If the stream is unavailable the state is left untouched so the
    /// trigger can be retried.
    pub async fn start(&mut self) -> HatCheckResult<()> {
        match self.state() {
            LoopState::Ready | LoopState::Stopped => {}
            _ => return Err(self.invalid("start")),
        }
        let Some(scorer) = self.scorer.clone() else {
            return Err(self.invalid("start"));
        };

        if let Some(previous) = self.task.take() {
            debug!("waiting for previous loop to finish");
            if let Err(e) = previous.await {
                warn!("previous loop ended abnormally: {e}");
            }
        }

        let stream = match self.provider.acquire() {
            Ok(s) => s,
            Err(e) => {
                warn!("stream acquisition failed: {e}");
                self.sink.emit(Feedback::Error(e.to_string()));
                return Err(e);
            }
        };

        self.transition(LoopState::Running);
        let classification = ClassificationLoop::new(
            stream,
            scorer,
            self.sink.clone(),
            self.vocabulary.clone(),
            self.settings,
            self.state.subscribe(),
        );
        self.task = Some(tokio::task::spawn_local(classification.run()));
        Ok(())
    }

    /// Handles the stop trigger. Takes effect at the loop's next tick boundary;
    /// a cycle still in flight is discarded without emitting anything.
    pub fn stop(&mut self) -> HatCheckResult<()> {
        if self.state() != LoopState::Running {
            return Err(self.invalid("stop"));
        }
        self.transition(LoopState::Stopped);
        self.sink.emit(Feedback::Idle);
        Ok(())
    }

    /// Stops a running loop and waits for its task to exit.
    pub async fn shutdown(&mut self) {
        if self.state() == LoopState::Running {
            self.transition(LoopState::Stopped);
            self.sink.emit(Feedback::Idle);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("loop ended abnormally: {e}");
            }
        }
    }
}
