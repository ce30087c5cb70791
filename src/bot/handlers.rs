use std::sync::Arc;

use anyhow::Context;
use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::types::ChatAction;
use teloxide::types::ChatId;
use teloxide::types::FileId;
use teloxide::types::Message;
use teloxide::types::MessageId;
use teloxide::utils::command::BotCommands;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::adapters::AudioClip;
use crate::adapters::AudioFormat;
use crate::bot::Command;
use crate::bot::HandlerResult;
use crate::bot::SessionStorage;
use crate::bot::context::AppContext;
use crate::bot::engine;
use crate::bot::engine::Event;
use crate::bot::engine::Reply;
use crate::bot::menu;
use crate::bot::menu::Button;
use crate::bot::menu::Menu;
use crate::bot::session;
use crate::bot::session::SessionDialogue;
use crate::bot::state::Session;
use crate::bot::state::SessionData;

type SharedContext = Arc<AppContext>;

const DOWNLOAD_FAILED_TEXT: &str = "⚠️ I could not download that audio. Please try again.";
const UNKNOWN_BUTTON_TEXT: &str = "Unknown option.";
const HELP_FOOTER: &str =
  "\n\nSend /question, then a text or voice message. Use the buttons to view the transcript or a summary.";

pub fn build_schema() -> UpdateHandler<anyhow::Error> {
  let message_handler = Update::filter_message()
    .enter_dialogue::<Message, SessionStorage, Session>()
    .branch(command_branch())
    .branch(dptree::endpoint(handle_message));

  let callback_handler = Update::filter_callback_query()
    .enter_dialogue::<CallbackQuery, SessionStorage, Session>()
    .endpoint(handle_callback_query);

  dptree::entry().branch(message_handler).branch(callback_handler)
}

fn command_branch() -> UpdateHandler<anyhow::Error> {
  dptree::entry()
    .filter_command::<Command>()
    .branch(dptree::case![Command::Start].endpoint(handle_start))
    .branch(dptree::case![Command::Help].endpoint(handle_help))
    .branch(dptree::endpoint(handle_conversation_command))
}

#[instrument(skip(bot, msg))]
async fn handle_start(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /start command");
  bot.send_message(msg.chat.id, menu::START_MENU_TEXT).await?;
  Ok(())
}

#[instrument(skip(bot, msg))]
async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
  info!(chat_id = %msg.chat.id, "received /help command");
  let mut text = Command::descriptions().to_string();
  text.push_str(HELP_FOOTER);
  bot.send_message(msg.chat.id, text).await?;
  Ok(())
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_conversation_command(
  bot: Bot,
  dialogue: SessionDialogue,
  ctx: SharedContext,
  msg: Message,
  command: Command,
) -> HandlerResult {
  let Some(command) = command.conversation() else {
    return Ok(());
  };
  info!(chat_id = %msg.chat.id, ?command, "received conversation command");
  let session = session::load(&dialogue, ctx.settings().session_idle).await?;
  run_event(&bot, &dialogue, &ctx, None, session, Event::Command(command)).await
}

#[instrument(skip(bot, dialogue, ctx, msg))]
async fn handle_message(bot: Bot, dialogue: SessionDialogue, ctx: SharedContext, msg: Message) -> HandlerResult {
  let chat_id = msg.chat.id;
  let session = session::load(&dialogue, ctx.settings().session_idle).await?;

  let event = if let Some(text) = message_text(&msg) {
    if text.starts_with('/') {
      // unknown command, ignore to let telegram handle
      return Ok(());
    }
    Event::Text(text.to_string())
  } else if let Some((file_id, format)) = audio_attachment(&msg) {
    if !engine::accepts_voice(session.levels()) {
      info!(chat_id = %chat_id, "voice message not expected, skipping download");
      Event::Unsupported
    } else {
      bot.send_chat_action(chat_id, ChatAction::Typing).await?;
      match download_audio(&bot, file_id, format).await {
        Ok(clip) => Event::Voice(clip),
        Err(err) => {
          warn!(error = %err, chat_id = %chat_id, "failed to download audio");
          bot.send_message(chat_id, DOWNLOAD_FAILED_TEXT).await?;
          return Ok(());
        },
      }
    }
  } else {
    Event::Unsupported
  };

  info!(chat_id = %chat_id, kind = event.kind(), "handling message");
  run_event(&bot, &dialogue, &ctx, None, session, event).await
}

#[instrument(skip(bot, dialogue, ctx, query))]
async fn handle_callback_query(
  bot: Bot,
  dialogue: SessionDialogue,
  ctx: SharedContext,
  query: CallbackQuery,
) -> HandlerResult {
  let chat_id = dialogue.chat_id();
  let callback_data = query.data.as_deref().unwrap_or("<empty>");
  info!(chat_id = %chat_id, callback = callback_data, "handling callback query");

  match callback_data.parse::<Button>() {
    Ok(button) => {
      let session = session::load(&dialogue, ctx.settings().session_idle).await?;
      run_event(&bot, &dialogue, &ctx, Some(&query), session, Event::Button(button)).await
    },
    Err(err) => {
      warn!(error = %err, chat_id = %chat_id, "unrecognized callback payload");
      bot.answer_callback_query(query.id.clone()).text(UNKNOWN_BUTTON_TEXT).await?;
      Ok(())
    },
  }
}

/// Runs one event through the engine, renders the replies and stores the resulting session.
async fn run_event(
  bot: &Bot,
  dialogue: &SessionDialogue,
  ctx: &SharedContext,
  callback: Option<&CallbackQuery>,
  mut session: Session,
  event: Event,
) -> HandlerResult {
  let chat = dialogue.chat_id();
  let outcome = engine::dispatch(ctx, &mut session, &event).await;
  let delivered = deliver(bot, chat, callback, &mut session.data, &outcome.replies).await;

  if outcome.is_terminated() {
    info!(chat_id = %chat, status = ?outcome.status, "conversation finished");
  }
  session::save(dialogue, session, outcome.is_terminated()).await?;
  delivered
}

async fn deliver(
  bot: &Bot,
  chat: ChatId,
  callback: Option<&CallbackQuery>,
  data: &mut SessionData,
  replies: &[Reply],
) -> HandlerResult {
  let mut acknowledged = false;

  for reply in replies {
    match reply {
      Reply::Send { text, menu } => {
        send_text(bot, chat, text, menu.as_ref(), data).await?;
      },
      Reply::Edit { text, menu } => {
        let target = callback
          .and_then(|query| query.message.as_ref().map(|message| message.id()))
          .or(data.menu_message.map(MessageId));
        match target {
          Some(message_id) => {
            if !edit_text(bot, chat, message_id, text, menu.as_ref()).await? {
              send_text(bot, chat, text, menu.as_ref(), data).await?;
            } else if menu.is_some() {
              data.menu_message = Some(message_id.0);
            }
          },
          None => send_text(bot, chat, text, menu.as_ref(), data).await?,
        }
      },
      Reply::Acknowledge(text) => {
        if let Some(query) = callback {
          let request = bot.answer_callback_query(query.id.clone());
          match text {
            Some(text) => request.text(text.clone()).await?,
            None => request.await?,
          };
          acknowledged = true;
        }
      },
    }
  }

  if let Some(query) = callback.filter(|_| !acknowledged) {
    bot.answer_callback_query(query.id.clone()).await?;
  }
  Ok(())
}

async fn send_text(bot: &Bot, chat: ChatId, text: &str, menu: Option<&Menu>, data: &mut SessionData) -> HandlerResult {
  let sent = match menu {
    Some(menu) => bot.send_message(chat, text).reply_markup(menu.keyboard()).await?,
    None => bot.send_message(chat, text).await?,
  };
  if menu.is_some() {
    data.menu_message = Some(sent.id.0);
  }
  Ok(())
}

/// Returns `false` when the message is gone and the caller should send instead.
async fn edit_text(
  bot: &Bot,
  chat: ChatId,
  message_id: MessageId,
  text: &str,
  menu: Option<&Menu>,
) -> anyhow::Result<bool> {
  let mut request = bot.edit_message_text(chat, message_id, text);
  if let Some(menu) = menu {
    request = request.reply_markup(menu.keyboard());
  }
  match request.await {
    Ok(_) => info!(chat_id = %chat, message_id = message_id.0, "updated interactive message"),
    Err(RequestError::Api(ApiError::MessageNotModified)) => {
      info!(chat_id = %chat, message_id = message_id.0, "interactive message already current");
    },
    Err(RequestError::Api(ApiError::MessageToEditNotFound | ApiError::MessageCantBeEdited)) => {
      warn!(chat_id = %chat, message_id = message_id.0, "interactive message unavailable, sending a new one");
      return Ok(false);
    },
    Err(err) => return Err(err.into()),
  }
  Ok(true)
}

fn message_text(msg: &Message) -> Option<&str> {
  msg.text().or_else(|| msg.caption())
}

fn audio_attachment(msg: &Message) -> Option<(&FileId, AudioFormat)> {
  if let Some(voice) = msg.voice() {
    let format = voice
      .mime_type
      .as_ref()
      .map(|mime| AudioFormat::from_mime(mime.essence_str()))
      .unwrap_or(AudioFormat::Ogg);
    return Some((&voice.file.id, format));
  }
  msg.audio().map(|audio| {
    let format = audio
      .mime_type
      .as_ref()
      .map(|mime| AudioFormat::from_mime(mime.essence_str()))
      .unwrap_or(AudioFormat::Mp3);
    (&audio.file.id, format)
  })
}

async fn download_audio(bot: &Bot, file_id: &FileId, format: AudioFormat) -> anyhow::Result<AudioClip> {
  let file = bot.get_file(file_id.clone()).await.context("failed to resolve audio file")?;
  let mut bytes = Vec::new();
  bot
    .download_file(&file.path, &mut bytes)
    .await
    .context("failed to download audio file")?;
  info!(bytes = bytes.len(), format = format.mime(), "downloaded audio");
  Ok(AudioClip::new(bytes, format))
}
