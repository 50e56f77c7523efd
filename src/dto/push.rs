//! Frames exchanged over the push channel.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": {...}}`.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        common::{ChatMessageDto, QuestionDto, RankingDto, VotesDto},
        validation::{validate_option_letter, validate_question_number},
    },
    state::{Command, OptionKey},
};

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Failure to turn a text frame into a [`PushInbound`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or not an `{event, data}` object.
    #[error("malformed push frame")]
    Envelope(#[source] serde_json::Error),
    /// The payload does not have the shape of its event.
    #[error("malformed `{event}` payload")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// The payload parsed but carries unusable values.
    #[error("invalid `{event}` payload")]
    Invalid {
        event: &'static str,
        #[source]
        source: ValidationErrors,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub quiz_running: bool,
}

/// Reply to a start/stop request, also sent on connect.
#[derive(Debug, Clone, Deserialize)]
pub struct QuizStatusPayload {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub quiz_running: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextQuestionPayload {
    pub question: QuestionDto,
    /// 1-based sequence number.
    pub question_num: u32,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub answer_time: Option<u32>,
}

impl Validate for NextQuestionPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = validate_question_number(self.question_num) {
            errors.add("question_num", err);
        }
        if let Err(question_errors) = self.question.validate() {
            errors.merge_self("question", Err(question_errors));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VotesPayload {
    pub votes: VotesDto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountingPayload {
    /// Seconds the count is displayed.
    #[serde(default)]
    pub time: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPayload {
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub votes: Option<VotesDto>,
}

impl Validate for ResultsPayload {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(err) = validate_option_letter(&self.correct_answer) {
            errors.add("correct_answer", err);
        }
        if let Some(Err(err)) = self.votes.as_ref().map(VotesDto::to_counts) {
            errors.add("votes", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingPayload {
    pub ranking: RankingDto,
}

/// Reply to `get_ranking`.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingUpdatePayload {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub ranking: Option<RankingDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepAlivePayload {
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Set by the server around high-traffic moments.
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerPayload {
    pub time: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
}

/// Decoded server-to-client frame.
#[derive(Debug, Clone)]
pub enum PushInbound {
    Status(StatusPayload),
    QuizStatus(QuizStatusPayload),
    NextQuestion(NextQuestionPayload),
    UpdateVotes(VotesPayload),
    ShowCountingVotes(CountingPayload),
    ShowResults(ResultsPayload),
    ChatMessage(ChatMessageDto),
    UpdateRanking(RankingPayload),
    RankingUpdate(RankingUpdatePayload),
    KeepAlive(KeepAlivePayload),
    Pong,
    UpdateTimer(TimerPayload),
    Error(ErrorPayload),
    /// Event this client does not handle.
    Unknown(String),
}

/// Decode a text frame.
pub fn decode(text: &str) -> Result<PushInbound, DecodeError> {
    let Envelope { event, data } = serde_json::from_str(text).map_err(DecodeError::Envelope)?;
    let data = if data.is_null() {
        Value::Object(Map::new())
    } else {
        data
    };

    let frame = match event.as_str() {
        "status" => PushInbound::Status(payload("status", data)?),
        "quiz_status" => PushInbound::QuizStatus(payload("quiz_status", data)?),
        "next_question" => PushInbound::NextQuestion(validated("next_question", data)?),
        "update_votes" => {
            let votes: VotesPayload = payload("update_votes", data)?;
            if let Err(err) = votes.votes.to_counts() {
                let mut errors = ValidationErrors::new();
                errors.add("votes", err);
                return Err(DecodeError::Invalid {
                    event: "update_votes",
                    source: errors,
                });
            }
            PushInbound::UpdateVotes(votes)
        }
        "show_counting_votes" => {
            PushInbound::ShowCountingVotes(payload("show_counting_votes", data)?)
        }
        "show_results" => PushInbound::ShowResults(validated("show_results", data)?),
        "chat_message" => PushInbound::ChatMessage(validated("chat_message", data)?),
        "update_ranking" => PushInbound::UpdateRanking(payload("update_ranking", data)?),
        "ranking_update" => PushInbound::RankingUpdate(payload("ranking_update", data)?),
        "keep_alive" => PushInbound::KeepAlive(payload("keep_alive", data)?),
        "pong_response" => PushInbound::Pong,
        "update_timer" => PushInbound::UpdateTimer(payload("update_timer", data)?),
        "error" => PushInbound::Error(payload("error", data)?),
        _ => PushInbound::Unknown(event),
    };
    Ok(frame)
}

fn payload<T: DeserializeOwned>(event: &'static str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { event, source })
}

fn validated<T: DeserializeOwned + Validate>(
    event: &'static str,
    data: Value,
) -> Result<T, DecodeError> {
    let value: T = payload(event, data)?;
    value
        .validate()
        .map_err(|source| DecodeError::Invalid { event, source })?;
    Ok(value)
}

fn default_true() -> bool {
    true
}

/// Client heartbeat.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingPayload {
    /// Unix milliseconds at send time.
    pub timestamp: i64,
    pub question_number: u32,
    pub critical: bool,
    pub rate_limited: bool,
}

/// Answer to a server `keep_alive`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeepAliveResponsePayload {
    pub timestamp: i64,
    pub question_number: u32,
    pub client_id: Uuid,
}

/// Client-to-server frame.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushOutbound {
    StartQuiz,
    StopQuiz,
    CastVote { option: OptionKey },
    GetQuizStatus,
    GetRanking,
    GetVotes,
    PingServer(PingPayload),
    KeepAliveResponse(KeepAliveResponsePayload),
}

impl PushOutbound {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Command> for PushOutbound {
    fn from(command: Command) -> Self {
        match command {
            Command::StartQuiz => PushOutbound::StartQuiz,
            Command::StopQuiz => PushOutbound::StopQuiz,
            Command::CastVote(option) => PushOutbound::CastVote { option },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_next_question() {
        let frame = decode(
            r#"{"event": "next_question", "data": {
                "question": {
                    "question": "Sky colour?",
                    "options": ["Blue", "Red", "Green", "Pink"]
                },
                "question_num": 3, "total_questions": 10, "answer_time": 20
            }}"#,
        )
        .unwrap();
        let PushInbound::NextQuestion(payload) = frame else {
            panic!("unexpected frame {frame:?}");
        };
        assert_eq!(payload.question_num, 3);
        assert_eq!(payload.answer_time, Some(20));
    }

    #[test]
    fn invalid_question_number_is_rejected() {
        let err = decode(
            r#"{"event": "next_question", "data": {
                "question": {"question": "Q", "options": ["a", "b", "c", "d"]},
                "question_num": 0
            }}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { event: "next_question", .. }));
    }

    #[test]
    fn missing_fields_are_payload_errors() {
        let err = decode(r#"{"event": "update_votes", "data": {}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { event: "update_votes", .. }));
        assert!(matches!(decode("not json"), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn results_require_a_known_letter() {
        let ok = decode(
            r#"{"event": "show_results", "data": {"correct_answer": "c", "votes": {"A": 1}}}"#,
        );
        assert!(matches!(ok, Ok(PushInbound::ShowResults(_))));
        let err = decode(r#"{"event": "show_results", "data": {"correct_answer": "Z"}}"#);
        assert!(matches!(err, Err(DecodeError::Invalid { .. })));
    }

    #[test]
    fn events_without_data_and_unknown_events() {
        assert!(matches!(
            decode(r#"{"event": "show_counting_votes"}"#),
            Ok(PushInbound::ShowCountingVotes(CountingPayload { time: None }))
        ));
        assert!(matches!(
            decode(r#"{"event": "pong_response", "data": {"timestamp": 1.0}}"#),
            Ok(PushInbound::Pong)
        ));
        assert!(matches!(
            decode(r#"{"event": "confetti", "data": {}}"#),
            Ok(PushInbound::Unknown(name)) if name == "confetti"
        ));
    }

    #[test]
    fn outbound_frames_use_event_envelope() {
        let start = serde_json::to_value(PushOutbound::from(Command::StartQuiz)).unwrap();
        assert_eq!(start, json!({"event": "start_quiz"}));

        let vote =
            serde_json::to_value(PushOutbound::from(Command::CastVote(OptionKey::B))).unwrap();
        assert_eq!(vote, json!({"event": "cast_vote", "data": {"option": "B"}}));

        let ping = PushOutbound::PingServer(PingPayload {
            timestamp: 5,
            question_number: 3,
            critical: true,
            rate_limited: false,
        });
        assert_eq!(
            serde_json::to_value(ping).unwrap(),
            json!({"event": "ping_server", "data": {
                "timestamp": 5, "questionNumber": 3, "critical": true, "rateLimited": false
            }})
        );
    }
}
