use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static AGE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").expect("valid regex"));

pub const MAX_AGE: u8 = 130;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgeError {
  #[error("age must be a whole number")]
  InvalidFormat,
  #[error("age must not exceed {MAX_AGE}")]
  OutOfRange,
}

pub fn parse_age(input: &str) -> Result<u8, AgeError> {
  let trimmed = input.trim();
  if !AGE_PATTERN.is_match(trimmed) {
    return Err(AgeError::InvalidFormat);
  }

  let value = trimmed.parse::<u16>().map_err(|_| AgeError::InvalidFormat)?;
  if value > MAX_AGE as u16 {
    return Err(AgeError::OutOfRange);
  }
  Ok(value as u8)
}

/// Shortens free text for log fields, respecting char boundaries.
pub fn preview(text: &str, max_chars: usize) -> String {
  let mut chars = text.chars();
  let head: String = chars.by_ref().take(max_chars).collect();
  if chars.next().is_some() {
    format!("{head}…")
  } else {
    head
  }
}
