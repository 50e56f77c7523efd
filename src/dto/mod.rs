//! Wire payloads for both transports, with their validation.

pub mod common;
pub mod poll;
pub mod push;
pub mod validation;
