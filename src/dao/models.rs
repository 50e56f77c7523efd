use serde::{Deserialize, Serialize};

use crate::state::{OptionKey, QuestionPhase, Snapshot, VoteCounts};

/// Locally persisted copy of the last reconciled snapshot.
///
/// Field names follow the record layout earlier clients already wrote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// The question as displayed.
    pub current_question: PersistedQuestion,
    /// Sequence number of the question.
    pub question_number: u32,
    pub total_questions: u32,
    /// Tally for A, B, C and D.
    #[serde(default)]
    pub votes: VoteCounts,
    #[serde(default)]
    pub phase: QuestionPhase,
    /// Wall-clock milliseconds of the last reconciled update.
    pub last_update_time_ms: i64,
}

/// Question content inside a [`PersistedRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQuestion {
    pub question: String,
    pub options: [String; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<OptionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_time: Option<u32>,
}

impl PersistedRecord {
    /// Capture a snapshot for persistence.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            current_question: PersistedQuestion {
                question: snapshot.question_body.clone(),
                options: snapshot.options.clone(),
                correct_answer: snapshot.correct_option,
                explanation: snapshot.explanation.clone(),
                answer_time: snapshot.answer_time_secs,
            },
            question_number: snapshot.question_index,
            total_questions: snapshot.question_total,
            votes: snapshot.vote_counts,
            phase: snapshot.phase,
            last_update_time_ms: snapshot.timestamp_ms,
        }
    }

    /// Rebuild the snapshot the record was captured from.
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot {
            question_index: self.question_number,
            question_total: self.total_questions,
            question_body: self.current_question.question,
            options: self.current_question.options,
            vote_counts: self.votes,
            phase: self.phase,
            correct_option: self.current_question.correct_answer,
            explanation: self.current_question.explanation,
            answer_time_secs: self.current_question.answer_time,
            timestamp_ms: self.last_update_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uses_camel_case_layout() {
        let mut snapshot = Snapshot::open(
            5,
            12,
            "Capital of France?",
            ["Paris".into(), "Rome".into(), "Lima".into(), "Oslo".into()],
            1_700_000_000_000,
        );
        snapshot.vote_counts = VoteCounts::new([7, 1, 0, 2]);
        let record = PersistedRecord::from_snapshot(&snapshot);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["questionNumber"], 5);
        assert_eq!(json["totalQuestions"], 12);
        assert_eq!(json["lastUpdateTimeMs"], 1_700_000_000_000_i64);
        assert_eq!(json["currentQuestion"]["question"], "Capital of France?");
        assert!(json["currentQuestion"].get("correctAnswer").is_none());

        assert_eq!(record.into_snapshot(), snapshot);
    }

    #[test]
    fn records_without_phase_default_to_open() {
        let raw = r#"{
            "currentQuestion": {"question": "Q", "options": ["a", "b", "c", "d"]},
            "questionNumber": 2,
            "totalQuestions": 4,
            "lastUpdateTimeMs": 10
        }"#;
        let record: PersistedRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.phase, QuestionPhase::Open);
        assert_eq!(record.votes, VoteCounts::default());
    }
}
