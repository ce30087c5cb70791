use teloxide::utils::command::BotCommands;

use crate::bot::engine::ConversationCommand;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
  /// Show the greeting
  Start,
  /// Show the help text
  Help,
  /// Ask a question by text or voice
  Question,
  /// Stop the current conversation
  Stop,
}

impl Command {
  /// Commands routed through the conversation engine; the rest are answered directly.
  pub fn conversation(&self) -> Option<ConversationCommand> {
    match self {
      Self::Question => Some(ConversationCommand::Question),
      Self::Stop => Some(ConversationCommand::Stop),
      Self::Start | Self::Help => None,
    }
  }
}
