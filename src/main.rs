mod adapters;
mod app;
mod bot;
mod config;
mod telemetry;
mod util;

use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::Bot;
use tracing::info;

use crate::adapters::OpenAiClient;
use crate::bot::AppContext;
use crate::bot::Settings;

#[tokio::main]
async fn main() -> Result<()> {
  telemetry::init()?;
  let config = config::Config::from_env()?;
  info!(
    base_url = %config.ai.base_url,
    summary_model = %config.ai.summary_model,
    transcription_model = %config.ai.transcription_model,
    "starting bot"
  );

  let ai = Arc::new(OpenAiClient::new(config.ai.clone())?);
  let settings = Settings {
    summary_max_tokens: config.summary_max_tokens,
    session_idle: config.session_idle,
  };
  let context = AppContext::new(ai.clone(), ai, settings);

  let bot = Bot::new(config.bot_token.clone());
  let app = app::App::new(bot, context);
  app.run().await
}
