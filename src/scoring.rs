use async_trait::async_trait;

use crate::errors::HatCheckResult;
use crate::frame::Frame;
use crate::scores::{ScoreSet, Vocabulary};

/// Zero-shot scoring of a frame against caller-supplied concepts.
///
/// Implementations do not retry; a failed call surfaces as
/// [`HatCheckError::Scoring`](crate::errors::HatCheckError::Scoring) and the
/// caller decides what happens next.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn classify(&self, frame: &Frame, vocabulary: &Vocabulary) -> HatCheckResult<ScoreSet>;
}
