use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{info, warn};

/// What the user should currently be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Feedback {
    Loading,
    /// Model ready, loop not running.
    Idle,
    Analyzing,
    Pass,
    Fail,
    Error(String),
}

impl Feedback {
    pub fn from_verdict(verdict: bool) -> Self {
        if verdict {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading model..."),
            Self::Idle => f.write_str("Waiting to start"),
            Self::Analyzing => f.write_str("Analyzing image..."),
            Self::Pass => f.write_str("You may pass"),
            Self::Fail => f.write_str("Put on a hat!"),
            Self::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

pub trait FeedbackSink: Send + Sync {
    fn emit(&self, feedback: Feedback);
}

/// Logs every message and keeps the latest one for status queries.
pub struct StatusBoard {
    tx: watch::Sender<Feedback>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Feedback::Loading);
        Self { tx }
    }

    pub fn current(&self) -> Feedback {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Feedback> {
        self.tx.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackSink for StatusBoard {
    fn emit(&self, feedback: Feedback) {
        match &feedback {
            Feedback::Pass | Feedback::Fail => info!(verdict = %feedback, "screening result"),
            Feedback::Error(reason) => warn!(%reason, "screening error"),
            Feedback::Loading | Feedback::Idle | Feedback::Analyzing => {}
        }
        self.tx.send_replace(feedback);
    }
}
