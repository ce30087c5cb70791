use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing::info;

use crate::bot;
use crate::bot::AppContext;
use crate::bot::SessionStorage;

pub struct App {
  bot: Bot,
  context: Arc<AppContext>,
  handler: UpdateHandler<anyhow::Error>,
}

impl App {
  pub fn new(bot: Bot, context: AppContext) -> Self {
    let handler = bot::build_schema();
    Self {
      bot,
      context: Arc::new(context),
      handler,
    }
  }

  pub async fn run(self) -> anyhow::Result<()> {
    let storage: Arc<SessionStorage> = InMemStorage::new();

    let me = self.bot.get_me().await?;
    info!(
      username = me.username(),
      session_idle_minutes = self.context.settings().session_idle.num_minutes(),
      "connected to telegram"
    );

    Dispatcher::builder(self.bot.clone(), self.handler)
      .dependencies(dptree::deps![self.context.clone(), storage.clone(), me])
      .enable_ctrlc_handler()
      .build()
      .dispatch()
      .await;

    Ok(())
  }
}
