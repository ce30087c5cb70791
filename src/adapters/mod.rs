//! Boundaries to the external services the conversation relies on.
//!
//! Handlers only see the [`Transcriber`] and [`Summarizer`] traits; the
//! production implementation of both lives in [`openai`].

use async_trait::async_trait;
use thiserror::Error;

pub mod openai;

pub use openai::OpenAiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
  Ogg,
  Mp3,
  Wav,
  M4a,
  Other(String),
}

impl AudioFormat {
  pub fn from_mime(mime: &str) -> Self {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
      "audio/ogg" | "audio/opus" | "audio/x-opus+ogg" => Self::Ogg,
      "audio/mpeg" | "audio/mp3" => Self::Mp3,
      "audio/wav" | "audio/x-wav" | "audio/wave" => Self::Wav,
      "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Self::M4a,
      _ => Self::Other(essence),
    }
  }

  /// File extension understood by the speech service, `None` when unsupported.
  pub fn extension(&self) -> Option<&'static str> {
    match self {
      Self::Ogg => Some("ogg"),
      Self::Mp3 => Some("mp3"),
      Self::Wav => Some("wav"),
      Self::M4a => Some("m4a"),
      Self::Other(_) => None,
    }
  }

  pub fn mime(&self) -> &str {
    match self {
      Self::Ogg => "audio/ogg",
      Self::Mp3 => "audio/mpeg",
      Self::Wav => "audio/wav",
      Self::M4a => "audio/mp4",
      Self::Other(mime) => mime,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
  pub bytes: Vec<u8>,
  pub format: AudioFormat,
}

impl AudioClip {
  pub fn new(bytes: Vec<u8>, format: AudioFormat) -> Self {
    Self { bytes, format }
  }
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
  #[error("audio clip is empty")]
  EmptyAudio,
  #[error("unsupported audio format {0}")]
  UnsupportedFormat(String),
  #[error("speech service did not answer in time")]
  Timeout,
  #[error("speech service returned {status}: {body}")]
  Service { status: u16, body: String },
  #[error("speech request failed: {0}")]
  Request(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SummarizationError {
  #[error("nothing to summarize")]
  EmptyInput,
  #[error("language model did not answer in time")]
  Timeout,
  #[error("language model returned {status}: {body}")]
  Service { status: u16, body: String },
  #[error("language model request failed: {0}")]
  Request(#[source] reqwest::Error),
  #[error("malformed completion response: {0}")]
  Malformed(String),
  #[error("language model returned no choices")]
  NoChoices,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
  async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscriptionError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
  async fn summarize(&self, text: &str, max_tokens: u32) -> Result<String, SummarizationError>;
}
