use std::sync::Arc;

use crate::adapters::Summarizer;
use crate::adapters::Transcriber;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
  pub summary_max_tokens: u32,
  pub session_idle: chrono::Duration,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      summary_max_tokens: 500,
      session_idle: chrono::Duration::hours(2),
    }
  }
}

/// Adapters and settings shared by every dispatch.
pub struct AppContext {
  transcriber: Arc<dyn Transcriber>,
  summarizer: Arc<dyn Summarizer>,
  settings: Settings,
}

impl AppContext {
  pub fn new(transcriber: Arc<dyn Transcriber>, summarizer: Arc<dyn Summarizer>, settings: Settings) -> Self {
    Self {
      transcriber,
      summarizer,
      settings,
    }
  }

  pub fn transcriber(&self) -> &dyn Transcriber {
    self.transcriber.as_ref()
  }

  pub fn summarizer(&self) -> &dyn Summarizer {
    self.summarizer.as_ref()
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }
}
