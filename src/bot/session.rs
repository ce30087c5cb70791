use chrono::Utc;
use teloxide::dispatching::dialogue::Dialogue;
use tracing::info;

use crate::bot::SessionStorage;
use crate::bot::state::Session;

pub type SessionDialogue = Dialogue<Session, SessionStorage>;

/// Loads the chat's session, starting over when it has been idle for longer than `max_idle`.
pub async fn load(dialogue: &SessionDialogue, max_idle: chrono::Duration) -> anyhow::Result<Session> {
  let session = dialogue.get_or_default().await?;
  if session.is_active() && session.is_idle(max_idle, Utc::now()) {
    info!(chat_id = %dialogue.chat_id(), started = %session.created_at(), "idle session expired");
    return Ok(Session::default());
  }
  Ok(session)
}

/// Stores the session after a dispatch, or drops it once the conversation is over.
pub async fn save(dialogue: &SessionDialogue, session: Session, terminated: bool) -> anyhow::Result<()> {
  if terminated || !session.is_active() {
    if dialogue.get().await?.is_some() {
      dialogue.exit().await?;
      info!(chat_id = %dialogue.chat_id(), started = %session.created_at(), "session cleared");
    }
    return Ok(());
  }
  dialogue.update(session).await?;
  Ok(())
}
