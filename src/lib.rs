pub mod ai;
pub mod camera;
pub mod classification;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod feedback;
pub mod frame;
pub mod grabber;
pub mod ipc;
pub mod lifecycle;
pub mod policy;
pub mod scores;
pub mod scoring;
pub mod tokenizer;

pub use classification::{ClassificationLoop, LoopSettings, TickOutcome};
pub use cli::{execute, run_cli, Cli, Commands, ConfigSubcommand};
pub use errors::{HatCheckError, HatCheckResult};
pub use feedback::{Feedback, FeedbackSink, StatusBoard};
pub use frame::{capture, Capture, Frame, FrameSource, StreamProvider};
pub use lifecycle::{Controller, LoopState};
pub use policy::{decide, HAT_LABEL, HAT_SCORE};
pub use scores::{ScoreEntry, ScoreSet, Vocabulary};
pub use scoring::Scorer;
