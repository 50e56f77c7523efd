use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    clock::secs_to_ms,
    state::{ChatMessage, LeaderboardEntry, OptionKey, VoteCounts},
};

/// Question content as sent by either transport.
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionDto {
    /// Push sends `question`, the poll endpoint sends `text`.
    #[serde(alias = "text")]
    pub question: String,
    pub options: OptionsDto,
}

impl Validate for QuestionDto {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.question.trim().is_empty() {
            let mut err = ValidationError::new("question_empty");
            err.message = Some("Question text must not be empty".into());
            errors.add("question", err);
        }
        if let Err(err) = self.options.to_options() {
            errors.add("options", err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Option texts, either as an ordered list or keyed by letter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OptionsDto {
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

impl OptionsDto {
    /// Normalise into the ordered A-D tuple.
    ///
    /// Lists shorter than four entries are padded with empty texts; a keyed
    /// map must name at least one letter.
    pub fn to_options(&self) -> Result<[String; 4], ValidationError> {
        let mut options: [String; 4] = Default::default();
        match self {
            OptionsDto::List(list) => {
                if list.is_empty() || list.len() > 4 {
                    let mut err = ValidationError::new("options_count");
                    err.message =
                        Some(format!("Expected 1 to 4 options (got {})", list.len()).into());
                    return Err(err);
                }
                for (slot, text) in options.iter_mut().zip(list) {
                    slot.clone_from(text);
                }
            }
            OptionsDto::Map(map) => {
                let mut matched = false;
                for (key, text) in map {
                    if let Some(option) = OptionKey::parse(key) {
                        options[option.index()].clone_from(text);
                        matched = true;
                    }
                }
                if !matched {
                    let mut err = ValidationError::new("options_keys");
                    err.message = Some("Option map must use the letters A to D".into());
                    return Err(err);
                }
            }
        }
        Ok(options)
    }
}

/// Vote tally, either a 4-entry list or a letter-keyed map.
///
/// Extra keys such as `correct_percentage` are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum VotesDto {
    List(Vec<u32>),
    Map(IndexMap<String, Value>),
}

impl VotesDto {
    pub fn to_counts(&self) -> Result<VoteCounts, ValidationError> {
        let mut counts = VoteCounts::default();
        match self {
            VotesDto::List(list) => {
                if list.len() > 4 {
                    let mut err = ValidationError::new("votes_count");
                    err.message =
                        Some(format!("Expected 4 vote counts (got {})", list.len()).into());
                    return Err(err);
                }
                for (index, count) in list.iter().enumerate() {
                    if let Some(option) = OptionKey::from_index(index) {
                        counts.set(option, *count);
                    }
                }
            }
            VotesDto::Map(map) => {
                for (key, value) in map {
                    let Some(option) = OptionKey::parse(key) else {
                        continue;
                    };
                    let count = value
                        .as_u64()
                        .and_then(|count| u32::try_from(count).ok())
                        .ok_or_else(|| {
                            let mut err = ValidationError::new("votes_value");
                            err.message = Some(
                                format!("Vote count for {option} must be a non-negative integer")
                                    .into(),
                            );
                            err
                        })?;
                    counts.set(option, count);
                }
            }
        }
        Ok(counts)
    }
}

/// Ranking as a list of entries or a name to score map.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RankingDto {
    List(Vec<RankingEntryDto>),
    Map(IndexMap<String, i64>),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RankingEntryDto {
    pub name: String,
    pub score: i64,
}

impl RankingDto {
    /// Entries in the order the server listed them.
    pub fn into_entries(self) -> Vec<LeaderboardEntry> {
        match self {
            RankingDto::List(list) => list
                .into_iter()
                .map(|entry| LeaderboardEntry {
                    name: entry.name,
                    score: entry.score,
                })
                .collect(),
            RankingDto::Map(map) => map
                .into_iter()
                .map(|(name, score)| LeaderboardEntry { name, score })
                .collect(),
        }
    }
}

/// A chat line as relayed by the server.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChatMessageDto {
    #[validate(length(min = 1))]
    pub author: String,
    #[validate(length(min = 1))]
    pub message: String,
    /// Float seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl ChatMessageDto {
    /// Convert to the domain type, stamping untimed lines with `received_at_ms`.
    pub fn into_message(self, received_at_ms: i64) -> ChatMessage {
        ChatMessage {
            author: self.author,
            body: self.message,
            emitted_at_ms: self.timestamp.map(secs_to_ms).unwrap_or(received_at_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn votes_accept_either_case_and_ignore_extras() {
        let dto: VotesDto = serde_json::from_str(
            r#"{"a": 3, "b": 1, "c": 0, "d": 7, "correct_percentage": 27.3}"#,
        )
        .unwrap();
        assert_eq!(dto.to_counts().unwrap(), VoteCounts::new([3, 1, 0, 7]));

        let dto: VotesDto = serde_json::from_str(r#"{"A": 2, "C": 5}"#).unwrap();
        assert_eq!(dto.to_counts().unwrap(), VoteCounts::new([2, 0, 5, 0]));

        let dto: VotesDto = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(dto.to_counts().unwrap(), VoteCounts::new([1, 2, 3, 4]));
    }

    #[test]
    fn negative_or_fractional_votes_are_rejected() {
        let dto: VotesDto = serde_json::from_str(r#"{"A": -1}"#).unwrap();
        assert!(dto.to_counts().is_err());
        let dto: VotesDto = serde_json::from_str(r#"{"B": 1.5}"#).unwrap();
        assert!(dto.to_counts().is_err());
    }

    #[test]
    fn options_normalise_lists_and_maps() {
        let list = OptionsDto::List(vec!["x".into(), "y".into()]);
        assert_eq!(
            list.to_options().unwrap(),
            ["x".to_string(), "y".into(), String::new(), String::new()]
        );

        let map: OptionsDto =
            serde_json::from_str(r#"{"B": "two", "A": "one", "D": "four", "C": "three"}"#)
                .unwrap();
        assert_eq!(
            map.to_options().unwrap(),
            ["one".to_string(), "two".into(), "three".into(), "four".into()]
        );

        assert!(OptionsDto::List(Vec::new()).to_options().is_err());
    }

    #[test]
    fn question_text_alias_and_validation() {
        let dto: QuestionDto =
            serde_json::from_str(r#"{"text": "2+2?", "options": ["3", "4", "5", "22"]}"#).unwrap();
        assert_eq!(dto.question, "2+2?");
        assert!(dto.validate().is_ok());

        let dto: QuestionDto = serde_json::from_str(r#"{"question": " ", "options": []}"#).unwrap();
        let errors = dto.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("question"));
        assert!(errors.field_errors().contains_key("options"));
    }

    #[test]
    fn ranking_map_keeps_insertion_order() {
        let dto: RankingDto = serde_json::from_str(r#"{"zoe": 3, "adam": 5}"#).unwrap();
        let names: Vec<_> = dto.into_entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["zoe", "adam"]);
    }

    #[test]
    fn chat_timestamp_is_converted_to_millis() {
        let dto: ChatMessageDto =
            serde_json::from_str(r#"{"author": "ana", "message": "oi", "timestamp": 12.5}"#)
                .unwrap();
        assert_eq!(dto.clone().into_message(0).emitted_at_ms, 12_500);

        let untimed = ChatMessageDto {
            timestamp: None,
            ..dto
        };
        assert_eq!(untimed.into_message(99).emitted_at_ms, 99);
    }
}
