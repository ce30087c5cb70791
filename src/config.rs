use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SUMMARY_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 500;
const DEFAULT_SUMMARY_CANDIDATES: u8 = 1;
const DEFAULT_AI_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_IDLE_MINUTES: u32 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("{0} must be set")]
  Missing(&'static str),
  #[error("{name} has invalid value {value:?}")]
  Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bot_token: String,
  pub ai: AiConfig,
  pub summary_max_tokens: u32,
  pub session_idle: chrono::Duration,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
  pub api_key: String,
  pub base_url: String,
  pub summary_model: String,
  pub transcription_model: String,
  pub candidates: u8,
  pub timeout: Duration,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    dotenv::dotenv().ok();
    let config = Self::from_lookup(|key| env::var(key).ok()).context("invalid configuration")?;
    Ok(config)
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let bot_token = first_present(&lookup, &["BOT_TOKEN", "TELOXIDE_TOKEN", "TELEGRAM_TOKEN"])
      .ok_or(ConfigError::Missing("BOT_TOKEN, TELOXIDE_TOKEN or TELEGRAM_TOKEN"))?;
    let api_key = first_present(&lookup, &["OPENAI_API_KEY", "CHATGPT_API"])
      .ok_or(ConfigError::Missing("OPENAI_API_KEY or CHATGPT_API"))?;

    let base_url = lookup("OPENAI_BASE_URL")
      .map(|value| value.trim().trim_end_matches('/').to_string())
      .filter(|value| !value.is_empty())
      .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let ai = AiConfig {
      api_key,
      base_url,
      summary_model: lookup("SUMMARY_MODEL").unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
      transcription_model: lookup("TRANSCRIPTION_MODEL").unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
      candidates: parse_var(&lookup, "SUMMARY_CANDIDATES", DEFAULT_SUMMARY_CANDIDATES)?.max(1),
      timeout: Duration::from_secs(parse_nonzero(&lookup, "AI_TIMEOUT_SECS", DEFAULT_AI_TIMEOUT_SECS)?),
    };

    let summary_max_tokens = parse_nonzero(&lookup, "SUMMARY_MAX_TOKENS", DEFAULT_SUMMARY_MAX_TOKENS)?;
    let idle_minutes = parse_nonzero(&lookup, "SESSION_IDLE_MINUTES", DEFAULT_SESSION_IDLE_MINUTES)?;
    let session_idle = chrono::Duration::try_minutes(i64::from(idle_minutes))
      .ok_or_else(|| invalid("SESSION_IDLE_MINUTES", idle_minutes.to_string()))?;

    Ok(Self {
      bot_token,
      ai,
      summary_max_tokens,
      session_idle,
    })
  }
}

fn first_present(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
  keys
    .iter()
    .filter_map(|key| lookup(key))
    .map(|value| value.trim().to_string())
    .find(|value| !value.is_empty())
}

fn parse_var<T: FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  name: &'static str,
  default: T,
) -> Result<T, ConfigError> {
  match lookup(name) {
    None => Ok(default),
    Some(raw) if raw.trim().is_empty() => Ok(default),
    Some(raw) => raw.trim().parse::<T>().map_err(|_| invalid(name, raw)),
  }
}

/// Like [`parse_var`], but zero is rejected.
fn parse_nonzero<T: FromStr + Default + PartialEq>(
  lookup: &impl Fn(&str) -> Option<String>,
  name: &'static str,
  default: T,
) -> Result<T, ConfigError> {
  let value = parse_var(lookup, name, default)?;
  if value == T::default() {
    return Err(invalid(name, lookup(name).unwrap_or_default()));
  }
  Ok(value)
}

fn invalid(name: &'static str, value: String) -> ConfigError {
  tracing::warn!(variable = name, value = %value, "invalid numeric configuration value");
  ConfigError::Invalid { name, value }
}
