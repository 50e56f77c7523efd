use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four answer slots a question offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionKey {
    A,
    B,
    C,
    D,
}

impl OptionKey {
    /// Every option key in display order.
    pub const ALL: [OptionKey; 4] = [OptionKey::A, OptionKey::B, OptionKey::C, OptionKey::D];

    /// Position of the option inside the ordered 4-tuple.
    pub fn index(self) -> usize {
        match self {
            OptionKey::A => 0,
            OptionKey::B => 1,
            OptionKey::C => 2,
            OptionKey::D => 3,
        }
    }

    /// Inverse of [`OptionKey::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Parse a single letter, accepting either case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "A" | "a" => Some(OptionKey::A),
            "B" | "b" => Some(OptionKey::B),
            "C" | "c" => Some(OptionKey::C),
            "D" | "d" => Some(OptionKey::D),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptionKey::A => "A",
            OptionKey::B => "B",
            OptionKey::C => "C",
            OptionKey::D => "D",
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vote tally for the four options of a question.
///
/// Tallies only grow while voting is open, so merging two observations of the
/// same question keeps the per-option maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteCounts([u32; 4]);

impl VoteCounts {
    pub fn new(counts: [u32; 4]) -> Self {
        Self(counts)
    }

    pub fn get(&self, key: OptionKey) -> u32 {
        self.0[key.index()]
    }

    pub fn set(&mut self, key: OptionKey, count: u32) {
        self.0[key.index()] = count;
    }

    /// Sum of all options.
    pub fn total(&self) -> u64 {
        self.0.iter().map(|count| u64::from(*count)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionKey, u32)> + '_ {
        OptionKey::ALL.iter().map(|key| (*key, self.get(*key)))
    }

    /// Merge `other` into `self` keeping the per-option maximum.
    ///
    /// Returns `true` when at least one option grew.
    pub fn merge_max(&mut self, other: &VoteCounts) -> bool {
        let mut grew = false;
        for (slot, incoming) in self.0.iter_mut().zip(other.0.iter()) {
            if *incoming > *slot {
                *slot = *incoming;
                grew = true;
            }
        }
        grew
    }
}

/// Server-driven lifecycle of a single question.
///
/// The derived ordering is the lifecycle order; a question never moves back.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPhase {
    /// Question shown, votes are being collected.
    #[default]
    Open,
    /// Voting closed, tally frozen while the server counts.
    Counting,
    /// Correct option shown.
    Revealed,
}

/// Complete point-in-time record of the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Sequence number of the question inside the quiz run (as sent by the server).
    pub question_index: u32,
    /// Number of questions in the run.
    pub question_total: u32,
    /// Question text.
    pub question_body: String,
    /// Ordered option texts for A, B, C and D.
    pub options: [String; 4],
    pub vote_counts: VoteCounts,
    pub phase: QuestionPhase,
    /// Present once the result has been revealed.
    pub correct_option: Option<OptionKey>,
    pub explanation: Option<String>,
    /// Seconds participants have to answer, when the server announced it.
    pub answer_time_secs: Option<u32>,
    /// Wall-clock milliseconds at which this observation was made.
    pub timestamp_ms: i64,
}

impl Snapshot {
    /// Build the snapshot of a freshly opened question.
    pub fn open(
        question_index: u32,
        question_total: u32,
        question_body: impl Into<String>,
        options: [String; 4],
        timestamp_ms: i64,
    ) -> Self {
        Self {
            question_index,
            question_total,
            question_body: question_body.into(),
            options,
            vote_counts: VoteCounts::default(),
            phase: QuestionPhase::Open,
            correct_option: None,
            explanation: None,
            answer_time_secs: None,
            timestamp_ms,
        }
    }

    pub fn result_revealed(&self) -> bool {
        self.phase == QuestionPhase::Revealed
    }

    pub fn option_text(&self, key: OptionKey) -> &str {
        &self.options[key.index()]
    }
}

/// A chat line relayed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChatMessage {
    pub author: String,
    pub body: String,
    pub emitted_at_ms: i64,
}

/// A participant's score on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_keys_parse_either_case() {
        assert_eq!(OptionKey::parse("a"), Some(OptionKey::A));
        assert_eq!(OptionKey::parse(" D "), Some(OptionKey::D));
        assert_eq!(OptionKey::parse("E"), None);
        assert_eq!(OptionKey::parse(""), None);
        assert_eq!(OptionKey::from_index(2), Some(OptionKey::C));
        assert_eq!(OptionKey::from_index(4), None);
    }

    #[test]
    fn merge_max_only_grows() {
        let mut counts = VoteCounts::new([3, 0, 5, 1]);
        assert!(counts.merge_max(&VoteCounts::new([2, 4, 5, 0])));
        assert_eq!(counts, VoteCounts::new([3, 4, 5, 1]));
        assert!(!counts.merge_max(&VoteCounts::new([1, 1, 1, 1])));
        assert_eq!(counts.total(), 13);
    }

    #[test]
    fn phases_are_ordered_by_lifecycle() {
        assert!(QuestionPhase::Open < QuestionPhase::Counting);
        assert!(QuestionPhase::Counting < QuestionPhase::Revealed);
    }
}
