//! Request and response bodies of the poll endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        common::{ChatMessageDto, QuestionDto, RankingDto, VotesDto},
        validation::validate_question_number,
    },
    state::OptionKey,
};

/// `GET /api/quiz/status-http`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatusResponse {
    #[serde(default)]
    pub quiz_running: bool,
}

/// `GET /api/quiz/current-question-http`; a 404 means no question is active.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentQuestionResponse {
    pub question: QuestionDto,
    /// 1-based sequence number.
    pub question_num: u32,
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub remaining_time: Option<u32>,
}

impl Validate for CurrentQuestionResponse {
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

/// `GET /api/quiz/votes-http`; a 404 means the quiz is not running.
#[derive(Debug, Clone, Deserialize)]
pub struct VotesResponse {
    pub votes: VotesDto,
    /// Some servers tag the tally with its question.
    #[serde(default)]
    pub question_num: Option<u32>,
}

/// `GET /api/quiz/chat-http?since=<secs>`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChatResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessageDto>,
}

/// `GET /api/ranking-http`
#[derive(Debug, Clone, Deserialize)]
pub struct RankingResponse {
    #[serde(default)]
    pub ranking: Option<RankingDto>,
}

/// Answer of the start, stop and vote endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /api/quiz/vote-http`
#[derive(Debug, Clone, Serialize)]
pub struct VoteRequest {
    pub option: OptionKey,
}

/// `POST /api/quiz/keep-alive-http`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeepAliveRequest {
    pub timestamp: i64,
    pub question_number: u32,
    pub client_id: Uuid,
    pub critical: bool,
}
