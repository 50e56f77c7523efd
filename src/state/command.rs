use std::fmt;

use serde::Serialize;

use crate::state::snapshot::OptionKey;

/// User intent routed to whichever transport is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "command", content = "option", rename_all = "snake_case")]
pub enum Command {
    StartQuiz,
    StopQuiz,
    CastVote(OptionKey),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StartQuiz => f.write_str("start quiz"),
            Command::StopQuiz => f.write_str("stop quiz"),
            Command::CastVote(option) => write!(f, "cast vote {option}"),
        }
    }
}
