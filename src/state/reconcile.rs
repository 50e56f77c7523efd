use thiserror::Error;

use crate::state::{
    snapshot::{OptionKey, QuestionPhase, Snapshot, VoteCounts},
    store::LocalStateStore,
};

/// Server-driven step in a single question's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Voting closed, the tally is being counted.
    VotingClosed,
    /// The correct option was announced.
    ResultsRevealed {
        /// Option the server marked as correct.
        correct: OptionKey,
        /// Optional explanation shown with the result.
        explanation: Option<String>,
        /// Final tally, when the server attached one.
        votes: Option<VoteCounts>,
    },
}

/// Error returned when a lifecycle step cannot be applied to the held question.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    /// No question has been received yet.
    #[error("no question is active")]
    NoQuestion,
    /// The step would move the question backwards.
    #[error("invalid phase transition: {event:?} on question {question} while {from:?}")]
    InvalidTransition {
        /// Index of the held question.
        question: u32,
        /// Phase the question was in.
        from: QuestionPhase,
        /// Rejected step.
        event: PhaseEvent,
    },
}

/// Parts of the snapshot touched by an applied candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    /// A different question (or its text) is now held.
    pub question: bool,
    /// The lifecycle phase or the revealed answer changed.
    pub phase: bool,
    /// At least one vote count grew.
    pub votes: bool,
}

impl Changes {
    fn everything() -> Self {
        Self {
            question: true,
            phase: true,
            votes: true,
        }
    }

    /// `false` when only the freshness timestamp advanced.
    pub fn is_visible(&self) -> bool {
        self.question || self.phase || self.votes
    }
}

/// Why a candidate was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The candidate belongs to an earlier question.
    OlderQuestion {
        /// Index carried by the candidate.
        candidate: u32,
        /// Index held by the store.
        current: u32,
    },
    /// Same question, but observed before the held snapshot.
    OlderTimestamp {
        /// Timestamp carried by the candidate.
        candidate_ms: i64,
        /// Timestamp held by the store.
        current_ms: i64,
    },
    /// Same question, but in an earlier lifecycle phase.
    PhaseRegression {
        /// Phase carried by the candidate.
        candidate: QuestionPhase,
        /// Phase held by the store.
        current: QuestionPhase,
    },
    /// A partial update tagged for a question other than the held one.
    OtherQuestion {
        /// Index the update was tagged with.
        candidate: u32,
        /// Index held by the store, if any.
        current: Option<u32>,
    },
}

/// Result of offering a candidate to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The store now reflects the candidate.
    Applied(Changes),
    /// The candidate carried nothing the store did not already hold.
    Duplicate,
    /// The candidate was older than the store and was dropped.
    Stale(StaleReason),
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

/// Merges candidate snapshots from any transport into the local store.
///
/// Ordering is by question index first, then by observation timestamp. A
/// question only ever moves forward through its lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    store: LocalStateStore,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &LocalStateStore {
        &self.store
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.store.current()
    }

    /// Offer a complete snapshot.
    ///
    /// Applied when its index is greater than the held one, or equal with a
    /// timestamp that is not older. Same-question candidates are merged so vote
    /// counts never shrink and a revealed answer is never forgotten.
    pub fn apply(&mut self, candidate: Snapshot) -> ApplyOutcome {
        let Some(current) = self.store.current() else {
            self.store.replace(candidate);
            return ApplyOutcome::Applied(Changes::everything());
        };

        if candidate.question_index < current.question_index {
            return ApplyOutcome::Stale(StaleReason::OlderQuestion {
                candidate: candidate.question_index,
                current: current.question_index,
            });
        }
        if candidate.question_index > current.question_index {
            self.store.replace(candidate);
            return ApplyOutcome::Applied(Changes::everything());
        }
        if candidate.timestamp_ms < current.timestamp_ms {
            return ApplyOutcome::Stale(StaleReason::OlderTimestamp {
                candidate_ms: candidate.timestamp_ms,
                current_ms: current.timestamp_ms,
            });
        }
        if candidate.phase < current.phase {
            return ApplyOutcome::Stale(StaleReason::PhaseRegression {
                candidate: candidate.phase,
                current: current.phase,
            });
        }

        let merged = merge_same_question(current, candidate);
        if merged == *current {
            return ApplyOutcome::Duplicate;
        }
        let changes = Changes {
            question: merged.question_body != current.question_body
                || merged.options != current.options
                || merged.question_total != current.question_total,
            phase: merged.phase != current.phase
                || merged.correct_option != current.correct_option,
            votes: merged.vote_counts != current.vote_counts,
        };
        self.store.replace(merged);
        ApplyOutcome::Applied(changes)
    }

    /// Merge a vote tally for the held question.
    ///
    /// Timestamp ordering is skipped since tallies only grow; a tally tagged
    /// for any other question is refused.
    pub fn apply_votes(
        &mut self,
        question_index: u32,
        votes: VoteCounts,
        observed_at_ms: i64,
    ) -> ApplyOutcome {
        let Some(current) = self.store.current_mut() else {
            return ApplyOutcome::Stale(StaleReason::OtherQuestion {
                candidate: question_index,
                current: None,
            });
        };
        if current.question_index != question_index {
            return ApplyOutcome::Stale(StaleReason::OtherQuestion {
                candidate: question_index,
                current: Some(current.question_index),
            });
        }
        if !current.vote_counts.merge_max(&votes) {
            return ApplyOutcome::Duplicate;
        }
        current.timestamp_ms = current.timestamp_ms.max(observed_at_ms);
        ApplyOutcome::Applied(Changes {
            votes: true,
            ..Changes::default()
        })
    }

    /// Move the held question forward through its lifecycle.
    ///
    /// `question_index` is the question the step was observed for, when known;
    /// steps for another question are reported as stale.
    pub fn advance(
        &mut self,
        event: PhaseEvent,
        question_index: Option<u32>,
        timestamp_ms: i64,
    ) -> Result<ApplyOutcome, PhaseError> {
        let current = self.store.current().ok_or(PhaseError::NoQuestion)?;
        if let Some(index) = question_index {
            if index != current.question_index {
                return Ok(ApplyOutcome::Stale(StaleReason::OtherQuestion {
                    candidate: index,
                    current: Some(current.question_index),
                }));
            }
        }

        let next = next_phase(current.phase, &event).ok_or_else(|| {
            PhaseError::InvalidTransition {
                question: current.question_index,
                from: current.phase,
                event: event.clone(),
            }
        })?;

        let mut candidate = current.clone();
        candidate.phase = next;
        candidate.timestamp_ms = timestamp_ms.max(current.timestamp_ms);
        if let PhaseEvent::ResultsRevealed {
            correct,
            explanation,
            votes,
        } = event
        {
            candidate.correct_option = Some(correct);
            if explanation.is_some() {
                candidate.explanation = explanation;
            }
            if let Some(votes) = votes {
                candidate.vote_counts.merge_max(&votes);
            }
        }
        Ok(self.apply(candidate))
    }

    /// Forget the held question once the quiz is seen stopped.
    ///
    /// A new run restarts numbering, so its first question must not be judged
    /// against the previous run. Observations older than the held snapshot are
    /// ignored and `None` is returned.
    pub fn end_run(&mut self, observed_at_ms: i64) -> Option<Snapshot> {
        let current = self.store.current()?;
        if observed_at_ms < current.timestamp_ms {
            return None;
        }
        self.store.clear()
    }
}

fn next_phase(from: QuestionPhase, event: &PhaseEvent) -> Option<QuestionPhase> {
    match (from, event) {
        (QuestionPhase::Open | QuestionPhase::Counting, PhaseEvent::VotingClosed) => {
            Some(QuestionPhase::Counting)
        }
        (_, PhaseEvent::ResultsRevealed { .. }) => Some(QuestionPhase::Revealed),
        (QuestionPhase::Revealed, PhaseEvent::VotingClosed) => None,
    }
}

fn merge_same_question(current: &Snapshot, candidate: Snapshot) -> Snapshot {
    let mut merged = candidate;
    merged.vote_counts.merge_max(&current.vote_counts);
    if merged.correct_option.is_none() {
        merged.correct_option = current.correct_option;
    }
    if merged.explanation.is_none() {
        merged.explanation.clone_from(&current.explanation);
    }
    if merged.answer_time_secs.is_none() {
        merged.answer_time_secs = current.answer_time_secs;
    }
    if merged.question_body.is_empty() {
        merged.question_body.clone_from(&current.question_body);
    }
    if merged.options.iter().all(String::is_empty) {
        merged.options.clone_from(&current.options);
    }
    if merged.question_total == 0 {
        merged.question_total = current.question_total;
    }
    merged
}
