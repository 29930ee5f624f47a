use crate::scores::ScoreEntry;

/// Concept that must be present for a subject to pass.
pub const HAT_LABEL: &str = "hat";

/// Minimum confidence for the hat concept.
pub const HAT_SCORE: f32 = 0.8;

/// Returns `true` when the first `hat` entry scores at least [`HAT_SCORE`]
/// and strictly beats every entry carrying another label.
///
/// A tie with a non-hat concept fails. Duplicate `hat` entries are never
/// compared against the first one.
pub fn decide(scores: &[ScoreEntry]) -> bool {
    let Some(hat) = scores.iter().find(|entry| entry.label == HAT_LABEL) else {
        return false;
    };

    if hat.score < HAT_SCORE {
        return false;
    }

    scores
        .iter()
        .all(|entry| entry.label == HAT_LABEL || entry.score < hat.score)
}
