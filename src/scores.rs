use serde::{Deserialize, Serialize};

use crate::errors::{HatCheckError, HatCheckResult};

/// Ordered, non-empty list of concepts sent with every scoring request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary(Vec<String>);

impl Vocabulary {
    pub fn new<I, S>(labels: I) -> HatCheckResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(HatCheckError::Vocabulary("at least one concept is required".into()));
        }
        if let Some(blank) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(HatCheckError::Vocabulary(format!("concept #{blank} is blank")));
        }
        Ok(Self(labels))
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = HatCheckError;

    fn try_from(labels: Vec<String>) -> HatCheckResult<Self> {
        Self::new(labels)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
}

impl ScoreEntry {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Scores returned for one classification cycle.
pub type ScoreSet = Vec<ScoreEntry>;
