//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::OptionKey;

/// Validates that an answer is a single option letter, A to D in either case.
///
/// # Examples
///
/// ```ignore
/// validate_option_letter("B") // Ok
/// validate_option_letter("c") // Ok
/// validate_option_letter("E") // Err
/// ```
pub fn validate_option_letter(raw: &str) -> Result<(), ValidationError> {
    if OptionKey::parse(raw).is_some() {
        return Ok(());
    }
    let mut err = ValidationError::new("option_letter");
    err.message = Some(format!("Answer must be one of A, B, C or D (got {raw:?})").into());
    Err(err)
}

/// Validates that a question sequence number is 1-based.
pub fn validate_question_number(number: u32) -> Result<(), ValidationError> {
    if number == 0 {
        let mut err = ValidationError::new("question_number");
        err.message = Some("Question numbers start at 1".into());
        return Err(err);
    }
    Ok(())
}
