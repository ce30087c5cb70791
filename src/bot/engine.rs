//! Nested conversation engine.
//!
//! A session carries a stack of [`Frame`]s, one per active level. Each level has an
//! ordered rule table per state followed by level-wide fallbacks; the first rule whose
//! [`Trigger`] matches the incoming [`Event`] wins. Handlers return a [`Step`] at their
//! own level, and exits are translated upward through the parent mapping tables in
//! [`crate::bot::state`].

use thiserror::Error;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::adapters::AudioClip;
use crate::adapters::AudioFormat;
use crate::adapters::SummarizationError;
use crate::adapters::TranscriptionError;
use crate::bot::context::AppContext;
use crate::bot::flows;
use crate::bot::menu::Button;
use crate::bot::menu::Menu;
use crate::bot::state::DescribeState;
use crate::bot::state::DescribeStep;
use crate::bot::state::Frame;
use crate::bot::state::Level;
use crate::bot::state::MemberState;
use crate::bot::state::MemberStep;
use crate::bot::state::Session;
use crate::bot::state::SessionData;
use crate::bot::state::Step;
use crate::bot::state::TopExit;
use crate::bot::state::TopState;
use crate::bot::state::TopStep;
use crate::bot::state::map_describe_to_member;
use crate::bot::state::map_describe_to_top;
use crate::bot::state::map_member_to_top;

const UNMATCHED_BUTTON_TEXT: &str = "This option is no longer available.";
const UNMATCHED_MESSAGE_TEXT: &str = "Sorry, I didn't get that. Please use the buttons above or send /stop.";
const INACTIVE_HINT_TEXT: &str = "Send /question to ask me something.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationCommand {
  Question,
  Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  Command(ConversationCommand),
  Button(Button),
  Text(String),
  Voice(AudioClip),
  /// A message that is neither text nor audio.
  Unsupported,
}

impl Event {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Command(_) => "command",
      Self::Button(_) => "button",
      Self::Text(_) => "text",
      Self::Voice(_) => "voice",
      Self::Unsupported => "unsupported",
    }
  }

  pub fn is_button(&self) -> bool {
    matches!(self, Self::Button(_))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  Command(ConversationCommand),
  Button(Button),
  Text,
  Voice,
  /// Any user message: text, voice or something unsupported.
  AnyMessage,
}

impl Trigger {
  pub fn matches(self, event: &Event) -> bool {
    match (self, event) {
      (Self::Command(expected), Event::Command(actual)) => expected == *actual,
      (Self::Button(expected), Event::Button(actual)) => expected == *actual,
      (Self::Text, Event::Text(_)) => true,
      (Self::Voice, Event::Voice(_)) => true,
      (Self::AnyMessage, Event::Text(_) | Event::Voice(_) | Event::Unsupported) => true,
      _ => false,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Rule<A> {
  pub trigger: Trigger,
  pub action: A,
}

const fn rule<A>(trigger: Trigger, action: A) -> Rule<A> {
  Rule { trigger, action }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopAction {
  Start,
  RecordQuestion,
  EnterMember,
  EnterDescribe,
  AddingSelf,
  ShowData,
  ShowTranscription,
  ShowTranscriptionSummary,
  ShowTranscriptionExecution,
  ShowTranscriptionGiveCommand,
  BackToQuestion,
  End,
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAction {
  SelectGender,
  EnterDescribe,
  ShowData,
  EndSecondLevel,
  StopNested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeAction {
  AskForInput,
  SaveInput,
  EndDescribing,
  StopNested,
}

static TOP_ENTRY: &[Rule<TopAction>] = &[rule(Trigger::Command(ConversationCommand::Question), TopAction::Start)];

static TOP_SELECTION: &[Rule<TopAction>] = &[
  rule(Trigger::Button(Button::AddingMember), TopAction::EnterMember),
  rule(Trigger::Button(Button::ShowData), TopAction::ShowData),
  rule(Trigger::Button(Button::ShowTranscription), TopAction::ShowTranscription),
  rule(
    Trigger::Button(Button::ShowTranscriptionSummary),
    TopAction::ShowTranscriptionSummary,
  ),
  rule(
    Trigger::Button(Button::ShowTranscriptionExecution),
    TopAction::ShowTranscriptionExecution,
  ),
  rule(
    Trigger::Button(Button::ShowTranscriptionGiveCommand),
    TopAction::ShowTranscriptionGiveCommand,
  ),
  rule(Trigger::Button(Button::AddingSelf), TopAction::AddingSelf),
  rule(Trigger::Button(Button::End), TopAction::End),
];

static TOP_QUESTION: &[Rule<TopAction>] = &[rule(Trigger::AnyMessage, TopAction::RecordQuestion)];

static TOP_ADDING_SELF: &[Rule<TopAction>] = &[rule(Trigger::Button(Button::Male), TopAction::EnterDescribe)];

static TOP_SHOWING_DATA: &[Rule<TopAction>] = &[rule(Trigger::Button(Button::End), TopAction::Start)];

static TOP_SHOWING_TRANSCRIPTION: &[Rule<TopAction>] =
  &[rule(Trigger::Button(Button::End), TopAction::BackToQuestion)];

static TOP_FALLBACKS: &[Rule<TopAction>] = &[
  rule(Trigger::Command(ConversationCommand::Stop), TopAction::Stop),
  rule(Trigger::Command(ConversationCommand::Question), TopAction::Start),
];

static MEMBER_SELECTING_LEVEL: &[Rule<MemberAction>] = &[
  rule(Trigger::Button(Button::Parents), MemberAction::SelectGender),
  rule(Trigger::Button(Button::Children), MemberAction::SelectGender),
];

static MEMBER_SELECTING_GENDER: &[Rule<MemberAction>] = &[
  rule(Trigger::Button(Button::Male), MemberAction::EnterDescribe),
  rule(Trigger::Button(Button::Female), MemberAction::EnterDescribe),
];

static MEMBER_FALLBACKS: &[Rule<MemberAction>] = &[
  rule(Trigger::Button(Button::ShowData), MemberAction::ShowData),
  rule(Trigger::Button(Button::End), MemberAction::EndSecondLevel),
  rule(Trigger::Command(ConversationCommand::Stop), MemberAction::StopNested),
];

static DESCRIBE_SELECTING_FEATURE: &[Rule<DescribeAction>] = &[
  rule(Trigger::Button(Button::Name), DescribeAction::AskForInput),
  rule(Trigger::Button(Button::Age), DescribeAction::AskForInput),
];

static DESCRIBE_TYPING: &[Rule<DescribeAction>] = &[rule(Trigger::Text, DescribeAction::SaveInput)];

static DESCRIBE_FALLBACKS: &[Rule<DescribeAction>] = &[
  rule(Trigger::Button(Button::End), DescribeAction::EndDescribing),
  rule(Trigger::Command(ConversationCommand::Stop), DescribeAction::StopNested),
];

fn top_rules(state: TopState) -> &'static [Rule<TopAction>] {
  match state {
    TopState::SelectingAction | TopState::SelectingLevel => TOP_SELECTION,
    TopState::QuestionAsked => TOP_QUESTION,
    TopState::AddingSelf => TOP_ADDING_SELF,
    TopState::ShowingData => TOP_SHOWING_DATA,
    TopState::ShowingTranscription
    | TopState::ShowingTranscriptionSummary
    | TopState::ShowingTranscriptionExecution
    | TopState::ShowingTranscriptionGiveCommand => TOP_SHOWING_TRANSCRIPTION,
    // A nested level owns the conversation while these are installed.
    TopState::AddingMember | TopState::DescribingSelf => &[],
  }
}

fn member_rules(state: MemberState) -> &'static [Rule<MemberAction>] {
  match state {
    MemberState::SelectingLevel => MEMBER_SELECTING_LEVEL,
    MemberState::SelectingGender => MEMBER_SELECTING_GENDER,
  }
}

fn describe_rules(state: DescribeState) -> &'static [Rule<DescribeAction>] {
  match state {
    DescribeState::SelectingFeature => DESCRIBE_SELECTING_FEATURE,
    DescribeState::Typing => DESCRIBE_TYPING,
  }
}

fn first_match<A: Copy>(tables: [&'static [Rule<A>]; 2], event: &Event) -> Option<A> {
  tables
    .into_iter()
    .flatten()
    .find(|rule| rule.trigger.matches(event))
    .map(|rule| rule.action)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matched {
  Top(TopAction),
  Member(MemberAction),
  Describe(DescribeAction),
}

/// Finds the innermost level with a rule for `event`, returning its depth and action.
pub fn resolve(levels: &[Frame], event: &Event) -> Option<(usize, Matched)> {
  if levels.is_empty() {
    return first_match([TOP_ENTRY, &[]], event).map(|action| (0, Matched::Top(action)));
  }

  levels.iter().enumerate().rev().find_map(|(depth, frame)| {
    let matched = match *frame {
      Frame::Top(state) => first_match([top_rules(state), TOP_FALLBACKS], event).map(Matched::Top),
      Frame::Member(state) => first_match([member_rules(state), MEMBER_FALLBACKS], event).map(Matched::Member),
      Frame::Describe(state) => {
        first_match([describe_rules(state), DESCRIBE_FALLBACKS], event).map(Matched::Describe)
      },
    };
    matched.map(|action| (depth, action))
  })
}

/// Whether some level would take a voice message now, so audio is worth downloading.
pub fn accepts_voice(levels: &[Frame]) -> bool {
  resolve(levels, &Event::Voice(AudioClip::new(Vec::new(), AudioFormat::Ogg))).is_some()
}

/// The result of a handler, expressed at the level that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
  Top(TopStep),
  Member(MemberStep),
  Describe(DescribeStep),
}

impl Effect {
  fn level(&self) -> Level {
    match self {
      Self::Top(_) => Level::Top,
      Self::Member(_) => Level::Member,
      Self::Describe(_) => Level::Describe,
    }
  }
}

/// Installs `effect` for the level at `depth`, bubbling exits through the parent maps.
/// Returns the top-level exit when the whole conversation ended.
fn apply(levels: &mut Vec<Frame>, mut depth: usize, mut effect: Effect) -> Option<TopExit> {
  loop {
    levels.truncate(depth);
    let parent_index = depth.checked_sub(1);
    let parent = parent_index.and_then(|index| levels.get(index).copied());

    match effect {
      Effect::Top(Step::Stay(state)) => {
        levels.push(Frame::Top(state));
        return None;
      },
      Effect::Top(Step::Exit(exit)) => {
        levels.clear();
        return Some(exit);
      },
      Effect::Member(step) => {
        let (Some(index), Some(Frame::Top(_))) = (parent_index, parent) else {
          error!(depth, "member level without a top-level parent");
          levels.clear();
          return Some(TopExit::End);
        };
        match step {
          Step::Stay(state) => {
            levels[index] = Frame::Top(TopState::AddingMember);
            levels.push(Frame::Member(state));
            return None;
          },
          Step::Exit(exit) => {
            effect = Effect::Top(map_member_to_top(exit));
            depth = index;
          },
        }
      },
      Effect::Describe(step) => {
        let Some(index) = parent_index else {
          error!(depth, "describe level without a parent");
          levels.clear();
          return Some(TopExit::End);
        };
        match (step, parent) {
          (Step::Stay(state), Some(Frame::Top(_))) => {
            levels[index] = Frame::Top(TopState::DescribingSelf);
            levels.push(Frame::Describe(state));
            return None;
          },
          (Step::Stay(state), Some(Frame::Member(_))) => {
            levels[index] = Frame::Member(MemberState::SelectingGender);
            levels.push(Frame::Describe(state));
            return None;
          },
          (Step::Exit(exit), Some(Frame::Member(_))) => {
            effect = Effect::Member(map_describe_to_member(exit));
            depth = index;
          },
          (Step::Exit(exit), Some(Frame::Top(_))) => {
            effect = Effect::Top(map_describe_to_top(exit));
            depth = index;
          },
          (_, other) => {
            error!(depth, parent = ?other, "describe level with an invalid parent");
            levels.clear();
            return Some(TopExit::End);
          },
        }
      },
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Send { text: String, menu: Option<Menu> },
  /// Replace the interactive message; the transport falls back to sending when none exists.
  Edit { text: String, menu: Option<Menu> },
  Acknowledge(Option<String>),
}

#[derive(Debug, Error)]
pub enum HandlerError {
  #[error(transparent)]
  Transcription(#[from] TranscriptionError),
  #[error(transparent)]
  Summarization(#[from] SummarizationError),
}

impl HandlerError {
  pub fn user_message(&self) -> String {
    match self {
      Self::Transcription(TranscriptionError::EmptyAudio) => {
        "⚠️ That voice message was empty. Please try again.".to_string()
      },
      Self::Transcription(TranscriptionError::UnsupportedFormat(format)) => {
        format!("⚠️ I can't transcribe {format} audio. Please send a voice message or text.")
      },
      Self::Transcription(err) => format!("⚠️ Transcription failed: {err}. Please try again."),
      Self::Summarization(err) => format!("⚠️ Summarization failed: {err}. Please try again."),
    }
  }
}

/// Per-dispatch view handed to handlers.
pub struct Turn<'a> {
  pub ctx: &'a AppContext,
  pub data: &'a mut SessionData,
  pub event: &'a Event,
  replies: &'a mut Vec<Reply>,
}

impl<'a> Turn<'a> {
  pub fn new(ctx: &'a AppContext, data: &'a mut SessionData, event: &'a Event, replies: &'a mut Vec<Reply>) -> Self {
    Self {
      ctx,
      data,
      event,
      replies,
    }
  }

  pub fn send(&mut self, text: impl Into<String>) {
    self.replies.push(Reply::Send {
      text: text.into(),
      menu: None,
    });
  }

  pub fn send_menu(&mut self, menu: Menu) {
    self.replies.push(Reply::Send {
      text: menu.prompt.clone(),
      menu: Some(menu),
    });
  }

  pub fn edit(&mut self, text: impl Into<String>) {
    self.replies.push(Reply::Edit {
      text: text.into(),
      menu: None,
    });
  }

  pub fn edit_menu(&mut self, menu: Menu) {
    self.replies.push(Reply::Edit {
      text: menu.prompt.clone(),
      menu: Some(menu),
    });
  }

  pub fn button(&self) -> Option<Button> {
    match self.event {
      Event::Button(button) => Some(*button),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Handled,
  Unmatched,
  Failed,
  Terminated(TopExit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
  pub replies: Vec<Reply>,
  pub status: Status,
}

impl Outcome {
  pub fn is_terminated(&self) -> bool {
    matches!(self.status, Status::Terminated(_))
  }
}

#[instrument(skip(ctx, session, event), fields(event = event.kind()))]
pub async fn dispatch(ctx: &AppContext, session: &mut Session, event: &Event) -> Outcome {
  session.touch();
  let mut replies = Vec::new();

  let Some((depth, matched)) = resolve(session.levels(), event) else {
    info!(state = ?session.current(), "event matched no rule");
    let reply = match event {
      Event::Button(_) => Reply::Acknowledge(Some(UNMATCHED_BUTTON_TEXT.to_string())),
      _ if !session.is_active() => Reply::Send {
        text: INACTIVE_HINT_TEXT.to_string(),
        menu: None,
      },
      _ => Reply::Send {
        text: UNMATCHED_MESSAGE_TEXT.to_string(),
        menu: None,
      },
    };
    replies.push(reply);
    return Outcome {
      replies,
      status: Status::Unmatched,
    };
  };

  if event.is_button() {
    replies.push(Reply::Acknowledge(None));
  }

  let rule_level = session.levels().get(depth).map(Frame::level).unwrap_or(Level::Top);
  debug!(depth, action = ?matched, "rule matched");

  let result = {
    let mut turn = Turn::new(ctx, &mut session.data, event, &mut replies);
    match matched {
      Matched::Top(action) => flows::run_top(action, &mut turn).await,
      Matched::Member(action) => flows::run_member(action, &mut turn).await,
      Matched::Describe(action) => flows::run_describe(action, &mut turn).await,
    }
  };

  let status = match result {
    Ok(effect) => {
      let target = if effect.level() == rule_level { depth } else { depth + 1 };
      let exit = apply(&mut session.levels, target, effect);
      debug_assert!(session.is_consistent(), "inconsistent level stack: {:?}", session.levels());
      match exit {
        Some(exit) => {
          info!(?exit, "conversation finished");
          Status::Terminated(exit)
        },
        None => {
          debug!(state = ?session.current(), "transition applied");
          Status::Handled
        },
      }
    },
    Err(err) => {
      warn!(error = %err, state = ?session.current(), "handler failed, state unchanged");
      replies.push(Reply::Send {
        text: err.user_message(),
        menu: None,
      });
      Status::Failed
    },
  };

  Outcome { replies, status }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::Mutex;

  use async_trait::async_trait;

  use super::*;
  use super::ConversationCommand::Question;
  use super::ConversationCommand::Stop;
  use crate::adapters::Summarizer;
  use crate::adapters::Transcriber;
  use crate::bot::context::Settings;
  use crate::bot::state::Category;
  use crate::bot::state::DescribeState;
  use crate::bot::state::Feature;
  use crate::bot::state::Gender;

  #[derive(Default)]
  struct FakeTranscriber {
    calls: Mutex<Vec<Vec<u8>>>,
    fail: bool,
  }

  #[async_trait]
  impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, TranscriptionError> {
      self.calls.lock().unwrap().push(clip.bytes.clone());
      if self.fail {
        return Err(TranscriptionError::Service {
          status: 500,
          body: "boom".to_string(),
        });
      }
      Ok("Transcribed question".to_string())
    }
  }

  #[derive(Default)]
  struct FakeSummarizer {
    calls: Mutex<Vec<(String, u32)>>,
    fail: bool,
  }

  #[async_trait]
  impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str, max_tokens: u32) -> Result<String, SummarizationError> {
      self.calls.lock().unwrap().push((text.to_string(), max_tokens));
      if self.fail {
        return Err(SummarizationError::Timeout);
      }
      Ok("Short summary".to_string())
    }
  }

  struct Harness {
    ctx: AppContext,
    transcriber: Arc<FakeTranscriber>,
    summarizer: Arc<FakeSummarizer>,
  }

  impl Harness {
    fn new() -> Self {
      Self::with(FakeTranscriber::default(), FakeSummarizer::default())
    }

    fn with(transcriber: FakeTranscriber, summarizer: FakeSummarizer) -> Self {
      let transcriber = Arc::new(transcriber);
      let summarizer = Arc::new(summarizer);
      let ctx = AppContext::new(transcriber.clone(), summarizer.clone(), Settings::default());
      Self {
        ctx,
        transcriber,
        summarizer,
      }
    }

    async fn send(&self, session: &mut Session, event: Event) -> Outcome {
      let outcome = dispatch(&self.ctx, session, &event).await;
      assert!(session.is_consistent(), "inconsistent stack {:?}", session.levels());
      outcome
    }
  }

  fn button(button: Button) -> Event {
    Event::Button(button)
  }

  fn command(command: ConversationCommand) -> Event {
    Event::Command(command)
  }

  fn text(value: &str) -> Event {
    Event::Text(value.to_string())
  }

  fn reply_texts(outcome: &Outcome) -> Vec<&str> {
    outcome
      .replies
      .iter()
      .filter_map(|reply| match reply {
        Reply::Send { text, .. } | Reply::Edit { text, .. } => Some(text.as_str()),
        Reply::Acknowledge(_) => None,
      })
      .collect()
  }

  async fn asked_session(harness: &Harness) -> Session {
    let mut session = Session::default();
    harness.send(&mut session, command(Question)).await;
    harness
      .send(&mut session, text("What is the capital of France?"))
      .await;
    session
  }

  #[tokio::test]
  async fn text_question_records_transcription() {
    let harness = Harness::new();
    let mut session = Session::default();

    let outcome = harness.send(&mut session, command(Question)).await;
    assert_eq!(outcome.status, Status::Handled);
    assert_eq!(session.current(), Some(Frame::Top(TopState::QuestionAsked)));
    assert_eq!(
      reply_texts(&outcome),
      vec!["How can I help you?", "We are waiting for your Questions\n\n\t/stop - Stop the bot."]
    );

    let outcome = harness
      .send(&mut session, text("What is the capital of France?"))
      .await;
    assert_eq!(outcome.status, Status::Handled);
    assert_eq!(session.current(), Some(Frame::Top(TopState::SelectingLevel)));
    assert_eq!(
      session.data.transcription.as_deref(),
      Some("What is the capital of France?")
    );
    assert!(matches!(
      outcome.replies.last(),
      Some(Reply::Send { menu: Some(_), .. })
    ));
    assert!(harness.transcriber.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn voice_question_is_transcribed_once() {
    let harness = Harness::new();
    let mut session = Session::default();
    harness.send(&mut session, command(Question)).await;

    let audio = vec![0x4f, 0x67, 0x67, 0x53];
    let clip = AudioClip::new(audio.clone(), AudioFormat::Ogg);
    harness.send(&mut session, Event::Voice(clip)).await;

    assert_eq!(*harness.transcriber.calls.lock().unwrap(), vec![audio]);
    assert_eq!(session.data.transcription.as_deref(), Some("Transcribed question"));
    assert_eq!(session.current(), Some(Frame::Top(TopState::SelectingLevel)));
  }

  #[tokio::test]
  async fn transcription_failure_keeps_state() {
    let harness = Harness::with(
      FakeTranscriber {
        fail: true,
        ..FakeTranscriber::default()
      },
      FakeSummarizer::default(),
    );
    let mut session = Session::default();
    harness.send(&mut session, command(Question)).await;

    let clip = AudioClip::new(vec![1, 2, 3], AudioFormat::Ogg);
    let outcome = harness.send(&mut session, Event::Voice(clip)).await;
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(session.current(), Some(Frame::Top(TopState::QuestionAsked)));
    assert!(session.data.transcription.is_none());
    assert!(reply_texts(&outcome)[0].contains("Transcription failed"));
  }

  #[tokio::test]
  async fn unsupported_message_reprompts() {
    let harness = Harness::new();
    let mut session = Session::default();
    harness.send(&mut session, command(Question)).await;

    let outcome = harness.send(&mut session, Event::Unsupported).await;
    assert_eq!(session.current(), Some(Frame::Top(TopState::QuestionAsked)));
    assert_eq!(
      reply_texts(&outcome),
      vec!["Please try to send a voice or a text question!!"]
    );
  }

  #[tokio::test]
  async fn summary_is_cached() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;

    let first = harness
      .send(&mut session, button(Button::ShowTranscriptionSummary))
      .await;
    assert_eq!(
      session.current(),
      Some(Frame::Top(TopState::ShowingTranscriptionSummary))
    );
    harness.send(&mut session, button(Button::End)).await;
    assert_eq!(session.current(), Some(Frame::Top(TopState::SelectingLevel)));
    let second = harness
      .send(&mut session, button(Button::ShowTranscriptionSummary))
      .await;

    let calls = harness.summarizer.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
      calls[0].0,
      "Please summarize the following text:\nYOUR TRANSCRIPTION IS :\n\tWhat is the capital of France?"
    );
    assert_eq!(calls[0].1, 500);
    assert_eq!(reply_texts(&first), reply_texts(&second));
    assert!(reply_texts(&second)[0].ends_with("SUMMARY :\n\tShort summary"));
  }

  #[tokio::test]
  async fn summarization_failure_is_not_cached() {
    let harness = Harness::with(
      FakeTranscriber::default(),
      FakeSummarizer {
        fail: true,
        ..FakeSummarizer::default()
      },
    );
    let mut session = asked_session(&harness).await;

    let outcome = harness
      .send(&mut session, button(Button::ShowTranscriptionSummary))
      .await;
    assert_eq!(outcome.status, Status::Failed);
    assert_eq!(session.current(), Some(Frame::Top(TopState::SelectingLevel)));
    assert!(session.data.summaries.is_empty());
    assert!(reply_texts(&outcome)[0].contains("Summarization failed"));
    assert_eq!(outcome.replies[0], Reply::Acknowledge(None));

    harness
      .send(&mut session, button(Button::ShowTranscriptionSummary))
      .await;
    assert_eq!(harness.summarizer.calls.lock().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn missing_transcription_renders_placeholder() {
    let harness = Harness::new();
    let mut session = Session::with_levels(vec![Frame::Top(TopState::SelectingAction)]);

    let outcome = harness
      .send(&mut session, button(Button::ShowTranscriptionSummary))
      .await;
    assert_eq!(outcome.status, Status::Handled);
    assert!(reply_texts(&outcome)[0].contains("No transcription yet"));
    assert!(harness.summarizer.calls.lock().unwrap().is_empty());

    let mut session = Session::with_levels(vec![Frame::Top(TopState::SelectingAction)]);
    let outcome = harness.send(&mut session, button(Button::ShowTranscription)).await;
    assert!(reply_texts(&outcome)[0].contains("No transcription yet"));
  }

  #[tokio::test]
  async fn repeated_button_does_not_advance_twice() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;

    harness.send(&mut session, button(Button::ShowTranscription)).await;
    let after_first = session.levels().to_vec();
    let outcome = harness.send(&mut session, button(Button::ShowTranscription)).await;
    assert_eq!(outcome.status, Status::Unmatched);
    assert_eq!(session.levels(), after_first.as_slice());
    assert_eq!(
      outcome.replies,
      vec![Reply::Acknowledge(Some(UNMATCHED_BUTTON_TEXT.to_string()))]
    );
  }

  #[tokio::test]
  async fn member_end_returns_to_selecting_action() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;

    harness.send(&mut session, button(Button::AddingMember)).await;
    assert_eq!(
      session.levels(),
      &[
        Frame::Top(TopState::AddingMember),
        Frame::Member(MemberState::SelectingLevel)
      ]
    );

    let outcome = harness.send(&mut session, button(Button::End)).await;
    assert_eq!(outcome.status, Status::Handled);
    assert_eq!(session.levels(), &[Frame::Top(TopState::SelectingAction)]);
    assert!(matches!(
      outcome.replies.last(),
      Some(Reply::Edit { menu: Some(_), .. })
    ));
  }

  #[tokio::test]
  async fn stop_from_third_level_terminates() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    harness.send(&mut session, button(Button::AddingMember)).await;
    harness.send(&mut session, button(Button::Children)).await;
    harness.send(&mut session, button(Button::Female)).await;
    harness.send(&mut session, button(Button::Name)).await;
    assert_eq!(session.levels().len(), 3);
    assert_eq!(session.current(), Some(Frame::Describe(DescribeState::Typing)));

    let outcome = harness.send(&mut session, command(Stop)).await;
    assert_eq!(outcome.status, Status::Terminated(TopExit::Stopping));
    assert!(!session.is_active());
    assert_eq!(reply_texts(&outcome), vec!["Okay, bye."]);
  }

  #[tokio::test]
  async fn describing_a_parent_collects_a_record() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    harness.send(&mut session, button(Button::AddingMember)).await;
    harness.send(&mut session, button(Button::Parents)).await;
    assert_eq!(session.data.current_category, Some(Category::Parents));
    harness.send(&mut session, button(Button::Female)).await;
    assert_eq!(
      session.current(),
      Some(Frame::Describe(DescribeState::SelectingFeature))
    );

    harness.send(&mut session, button(Button::Name)).await;
    assert_eq!(session.data.current_feature, Some(Feature::Name));
    let outcome = harness.send(&mut session, text("Anna")).await;
    assert_eq!(
      session.current(),
      Some(Frame::Describe(DescribeState::SelectingFeature))
    );
    assert!(matches!(
      outcome.replies.last(),
      Some(Reply::Send { menu: Some(_), .. })
    ));

    harness.send(&mut session, button(Button::Age)).await;
    let outcome = harness.send(&mut session, text("old")).await;
    assert_eq!(session.current(), Some(Frame::Describe(DescribeState::Typing)));
    assert!(reply_texts(&outcome)[0].contains("number"));
    harness.send(&mut session, text("61")).await;

    harness.send(&mut session, button(Button::End)).await;
    assert_eq!(
      session.levels(),
      &[
        Frame::Top(TopState::AddingMember),
        Frame::Member(MemberState::SelectingLevel)
      ]
    );
    let parents = session.data.people.records(Category::Parents);
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].gender, Some(Gender::Female));
    assert_eq!(parents[0].name.as_deref(), Some("Anna"));
    assert_eq!(parents[0].age, Some(61));

    let outcome = harness.send(&mut session, button(Button::ShowData)).await;
    assert_eq!(session.levels(), &[Frame::Top(TopState::ShowingData)]);
    assert!(reply_texts(&outcome)[0].contains("Mother: Name: Anna, Age: 61"));

    let outcome = harness.send(&mut session, button(Button::End)).await;
    assert_eq!(session.levels(), &[Frame::Top(TopState::QuestionAsked)]);
    assert_eq!(
      outcome.replies.last(),
      Some(&Reply::Edit {
        text: crate::bot::menu::QUESTION_PROMPT_TEXT.to_string(),
        menu: None,
      })
    );
    assert!(!session.data.start_over);
  }

  #[tokio::test]
  async fn describing_yourself_returns_to_actions() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    harness.send(&mut session, button(Button::AddingSelf)).await;
    assert_eq!(session.current(), Some(Frame::Top(TopState::AddingSelf)));

    harness.send(&mut session, button(Button::Male)).await;
    assert_eq!(
      session.levels(),
      &[
        Frame::Top(TopState::DescribingSelf),
        Frame::Describe(DescribeState::SelectingFeature)
      ]
    );
    harness.send(&mut session, button(Button::Name)).await;
    harness.send(&mut session, text("Sam")).await;
    let outcome = harness.send(&mut session, button(Button::End)).await;

    assert_eq!(session.levels(), &[Frame::Top(TopState::SelectingAction)]);
    assert_eq!(session.data.people.records(Category::Myself).len(), 1);
    assert!(matches!(
      outcome.replies.last(),
      Some(Reply::Edit { menu: Some(_), .. })
    ));
  }

  #[tokio::test]
  async fn end_button_finishes_conversation() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    let outcome = harness.send(&mut session, button(Button::End)).await;
    assert_eq!(outcome.status, Status::Terminated(TopExit::End));
    assert_eq!(reply_texts(&outcome), vec!["See you around!"]);
    assert!(!session.is_active());
  }

  #[tokio::test]
  async fn stop_at_top_level_reports_stopping() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    let outcome = harness.send(&mut session, command(Stop)).await;
    assert_eq!(outcome.status, Status::Terminated(TopExit::Stopping));
    assert_eq!(reply_texts(&outcome), vec!["Okay, bye."]);
    assert!(!session.is_active());
  }

  #[test]
  fn voice_is_accepted_only_while_a_question_is_pending() {
    assert!(!accepts_voice(&[]));
    assert!(accepts_voice(&[Frame::Top(TopState::QuestionAsked)]));
    assert!(!accepts_voice(&[Frame::Top(TopState::SelectingLevel)]));
    assert!(!accepts_voice(&[
      Frame::Top(TopState::AddingMember),
      Frame::Member(MemberState::SelectingGender),
      Frame::Describe(DescribeState::Typing),
    ]));
  }

  #[tokio::test]
  async fn restart_while_start_over_edits() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    harness.send(&mut session, button(Button::ShowTranscription)).await;
    assert!(session.data.start_over);

    let outcome = harness.send(&mut session, command(Question)).await;
    assert_eq!(session.levels(), &[Frame::Top(TopState::QuestionAsked)]);
    assert!(matches!(outcome.replies.as_slice(), [Reply::Edit { menu: None, .. }]));
    assert!(!session.data.start_over);
  }

  #[tokio::test]
  async fn restart_abandons_nested_levels() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    harness.send(&mut session, button(Button::AddingMember)).await;
    harness.send(&mut session, button(Button::Parents)).await;

    harness.send(&mut session, command(Question)).await;
    assert_eq!(session.levels(), &[Frame::Top(TopState::QuestionAsked)]);
  }

  #[tokio::test]
  async fn inactive_session_only_accepts_entry_point() {
    let harness = Harness::new();
    let mut session = Session::default();

    let outcome = harness.send(&mut session, text("hello")).await;
    assert_eq!(outcome.status, Status::Unmatched);
    assert_eq!(reply_texts(&outcome), vec![INACTIVE_HINT_TEXT]);
    assert!(!session.is_active());

    let outcome = harness.send(&mut session, command(Stop)).await;
    assert_eq!(outcome.status, Status::Unmatched);
  }

  #[tokio::test]
  async fn unmatched_text_keeps_state() {
    let harness = Harness::new();
    let mut session = asked_session(&harness).await;
    let outcome = harness.send(&mut session, text("another one")).await;
    assert_eq!(outcome.status, Status::Unmatched);
    assert_eq!(session.current(), Some(Frame::Top(TopState::SelectingLevel)));
    assert_eq!(reply_texts(&outcome), vec![UNMATCHED_MESSAGE_TEXT]);
  }

  #[tokio::test]
  async fn stack_stays_consistent_on_any_event() {
    let harness = Harness::new();
    let events: Vec<Event> = Button::ALL
      .into_iter()
      .map(Event::Button)
      .chain([
        command(Question),
        command(Stop),
        text("42"),
        Event::Unsupported,
        Event::Voice(AudioClip::new(vec![1], AudioFormat::Ogg)),
      ])
      .collect();

    // Walk every event from every reachable stack shape two steps deep.
    let starts = vec![
      vec![],
      vec![Frame::Top(TopState::QuestionAsked)],
      vec![Frame::Top(TopState::SelectingLevel)],
      vec![Frame::Top(TopState::AddingSelf)],
      vec![Frame::Top(TopState::ShowingData)],
      vec![
        Frame::Top(TopState::AddingMember),
        Frame::Member(MemberState::SelectingGender),
      ],
      vec![
        Frame::Top(TopState::AddingMember),
        Frame::Member(MemberState::SelectingGender),
        Frame::Describe(DescribeState::Typing),
      ],
      vec![
        Frame::Top(TopState::DescribingSelf),
        Frame::Describe(DescribeState::SelectingFeature),
      ],
    ];
    for start in starts {
      for first in &events {
        for second in &events {
          let mut session = Session::with_levels(start.clone());
          session.data.current_category = Some(Category::Children);
          session.data.current_feature = Some(Feature::Name);
          harness.send(&mut session, first.clone()).await;
          harness.send(&mut session, second.clone()).await;
        }
      }
    }
  }
}
