use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::Form;
use reqwest::multipart::Part;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::AudioClip;
use super::SummarizationError;
use super::Summarizer;
use super::TranscriptionError;
use super::Transcriber;
use crate::config::AiConfig;
use crate::util::preview;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  max_tokens: u32,
  n: u8,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role: &'static str,
  content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
  message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
  #[serde(default)]
  content: Option<String>,
}

/// Client for an OpenAI-compatible API covering chat completions and speech transcription.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
  http: Client,
  config: AiConfig,
}

impl OpenAiClient {
  pub fn new(config: AiConfig) -> anyhow::Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { http, config })
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.config.base_url, path)
  }
}

#[async_trait]
impl Summarizer for OpenAiClient {
  #[instrument(skip(self, text), fields(model = %self.config.summary_model, chars = text.len()))]
  async fn summarize(&self, text: &str, max_tokens: u32) -> Result<String, SummarizationError> {
    if text.trim().is_empty() {
      return Err(SummarizationError::EmptyInput);
    }

    let request = ChatRequest {
      model: &self.config.summary_model,
      messages: vec![ChatMessage { role: "user", content: text }],
      max_tokens,
      n: self.config.candidates,
    };

    let response = self
      .http
      .post(self.endpoint("chat/completions"))
      .bearer_auth(&self.config.api_key)
      .json(&request)
      .send()
      .await
      .map_err(summarization_transport_error)?;

    let status = response.status();
    let body = response.text().await.map_err(summarization_transport_error)?;
    if !status.is_success() {
      warn!(status = status.as_u16(), body = %preview(&body, 200), "completion request rejected");
      return Err(SummarizationError::Service {
        status: status.as_u16(),
        body,
      });
    }

    let summary = first_choice(&body)?;
    debug!(summary = %preview(&summary, 80), "completion received");
    Ok(summary)
  }
}

#[async_trait]
impl Transcriber for OpenAiClient {
  #[instrument(skip(self, clip), fields(model = %self.config.transcription_model, bytes = clip.bytes.len()))]
  async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscriptionError> {
    if clip.bytes.is_empty() {
      return Err(TranscriptionError::EmptyAudio);
    }
    let Some(extension) = clip.format.extension() else {
      return Err(TranscriptionError::UnsupportedFormat(clip.format.mime().to_string()));
    };

    let part = Part::bytes(clip.bytes.clone())
      .file_name(format!("question.{extension}"))
      .mime_str(clip.format.mime())
      .map_err(TranscriptionError::Request)?;
    let form = Form::new()
      .text("model", self.config.transcription_model.clone())
      .text("response_format", "text")
      .part("file", part);

    let response = self
      .http
      .post(self.endpoint("audio/transcriptions"))
      .bearer_auth(&self.config.api_key)
      .multipart(form)
      .send()
      .await
      .map_err(transcription_transport_error)?;

    let status = response.status();
    let body = response.text().await.map_err(transcription_transport_error)?;
    if !status.is_success() {
      warn!(status = status.as_u16(), body = %preview(&body, 200), "transcription request rejected");
      return Err(TranscriptionError::Service {
        status: status.as_u16(),
        body,
      });
    }

    let text = body.trim().to_string();
    debug!(text = %preview(&text, 80), "transcription received");
    Ok(text)
  }
}

fn first_choice(body: &str) -> Result<String, SummarizationError> {
  let parsed: ChatResponse =
    serde_json::from_str(body).map_err(|err| SummarizationError::Malformed(err.to_string()))?;
  parsed
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.message.content)
    .map(|content| content.trim().to_string())
    .ok_or(SummarizationError::NoChoices)
}

fn summarization_transport_error(err: reqwest::Error) -> SummarizationError {
  if err.is_timeout() {
    SummarizationError::Timeout
  } else {
    SummarizationError::Request(err)
  }
}

fn transcription_transport_error(err: reqwest::Error) -> TranscriptionError {
  if err.is_timeout() {
    TranscriptionError::Timeout
  } else {
    TranscriptionError::Request(err)
  }
}
