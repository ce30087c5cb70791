//! Handler bodies for every conversation level.

use tracing::info;
use tracing::warn;

use crate::bot::engine::DescribeAction;
use crate::bot::engine::Effect;
use crate::bot::engine::Event;
use crate::bot::engine::HandlerError;
use crate::bot::engine::MemberAction;
use crate::bot::engine::TopAction;
use crate::bot::engine::Turn;
use crate::bot::menu;
use crate::bot::menu::Menu;
use crate::bot::state::Category;
use crate::bot::state::DescribeExit;
use crate::bot::state::DescribeState;
use crate::bot::state::Family;
use crate::bot::state::Feature;
use crate::bot::state::Gender;
use crate::bot::state::MemberExit;
use crate::bot::state::MemberState;
use crate::bot::state::PersonRecord;
use crate::bot::state::SessionData;
use crate::bot::state::Step;
use crate::bot::state::TopExit;
use crate::bot::state::TopState;
use crate::util::AgeError;
use crate::util::MAX_AGE;
use crate::util::parse_age;
use crate::util::preview;

type HandlerResult = Result<Effect, HandlerError>;

const TRANSCRIPTION_HEADER: &str = "YOUR TRANSCRIPTION IS :";
const NO_TRANSCRIPTION_TEXT: &str = "YOUR TRANSCRIPTION IS :\n\n\tNo transcription yet";
const NOT_READY_TEXT: &str = "not working yet...";
const RETRY_QUESTION_TEXT: &str = "Please try to send a voice or a text question!!";
const BYE_TEXT: &str = "Okay, bye.";
const FAREWELL_TEXT: &str = "See you around!";
const ASK_INPUT_TEXT: &str = "Okay, tell me.";
const SUMMARY_INSTRUCTION: &str = "Please summarize the following text:";

pub async fn run_top(action: TopAction, turn: &mut Turn<'_>) -> HandlerResult {
  match action {
    TopAction::Start => Ok(start(turn)),
    TopAction::RecordQuestion => record_question(turn).await,
    TopAction::EnterMember => Ok(select_level(turn)),
    TopAction::EnterDescribe => Ok(select_feature(turn)),
    TopAction::AddingSelf => Ok(adding_self(turn)),
    TopAction::ShowData => {
      show_data(turn);
      Ok(Effect::Top(Step::Stay(TopState::ShowingData)))
    },
    TopAction::ShowTranscription => Ok(show_transcription(turn)),
    TopAction::ShowTranscriptionSummary => show_transcription_summary(turn).await,
    TopAction::ShowTranscriptionExecution => Ok(show_placeholder(turn, TopState::ShowingTranscriptionExecution)),
    TopAction::ShowTranscriptionGiveCommand => {
      Ok(show_placeholder(turn, TopState::ShowingTranscriptionGiveCommand))
    },
    TopAction::BackToQuestion => Ok(show_action_menu(turn, TopState::SelectingLevel)),
    TopAction::End => {
      turn.edit(FAREWELL_TEXT);
      Ok(Effect::Top(Step::Exit(TopExit::End)))
    },
    TopAction::Stop => {
      turn.send(BYE_TEXT);
      Ok(Effect::Top(Step::Exit(TopExit::Stopping)))
    },
  }
}

pub async fn run_member(action: MemberAction, turn: &mut Turn<'_>) -> HandlerResult {
  match action {
    MemberAction::SelectGender => Ok(select_gender(turn)),
    MemberAction::EnterDescribe => Ok(select_feature(turn)),
    MemberAction::ShowData => {
      show_data(turn);
      Ok(Effect::Member(Step::Exit(MemberExit::ShowingData)))
    },
    MemberAction::EndSecondLevel => {
      turn.data.start_over = true;
      show_action_menu(turn, TopState::SelectingAction);
      Ok(Effect::Member(Step::Exit(MemberExit::End)))
    },
    MemberAction::StopNested => {
      turn.send(BYE_TEXT);
      Ok(Effect::Member(Step::Exit(MemberExit::Stopping)))
    },
  }
}

pub async fn run_describe(action: DescribeAction, turn: &mut Turn<'_>) -> HandlerResult {
  match action {
    DescribeAction::AskForInput => Ok(ask_for_input(turn)),
    DescribeAction::SaveInput => Ok(save_input(turn)),
    DescribeAction::EndDescribing => Ok(end_describing(turn)),
    DescribeAction::StopNested => {
      turn.send(BYE_TEXT);
      Ok(Effect::Describe(Step::Exit(DescribeExit::Stopping)))
    },
  }
}

/// Edits the interactive message when `start_over` is set, sends a new one otherwise.
fn render(turn: &mut Turn<'_>, menu: Menu) {
  if turn.data.start_over {
    turn.edit_menu(menu);
  } else {
    turn.send_menu(menu);
  }
  turn.data.start_over = false;
}

fn start(turn: &mut Turn<'_>) -> Effect {
  if turn.data.start_over {
    turn.edit(menu::QUESTION_PROMPT_TEXT);
  } else {
    turn.send(menu::GREETING_TEXT);
    turn.send(menu::QUESTION_PROMPT_TEXT);
  }
  turn.data.start_over = false;
  Effect::Top(Step::Stay(TopState::QuestionAsked))
}

async fn record_question(turn: &mut Turn<'_>) -> HandlerResult {
  let ctx = turn.ctx;
  let event = turn.event;
  let transcription = match event {
    Event::Text(text) => text.clone(),
    Event::Voice(clip) => {
      info!(bytes = clip.bytes.len(), format = clip.format.mime(), "transcribing voice question");
      ctx.transcriber().transcribe(clip).await?
    },
    _ => {
      turn.send(RETRY_QUESTION_TEXT);
      return Ok(Effect::Top(Step::Stay(TopState::QuestionAsked)));
    },
  };

  info!(question = %preview(&transcription, 60), "question recorded");
  turn.data.transcription = Some(transcription);
  Ok(show_action_menu(turn, TopState::SelectingLevel))
}

fn show_action_menu(turn: &mut Turn<'_>, next: TopState) -> Effect {
  render(turn, menu::action_menu());
  Effect::Top(Step::Stay(next))
}

fn adding_self(turn: &mut Turn<'_>) -> Effect {
  turn.data.current_category = Some(Category::Myself);
  turn.edit_menu(menu::adding_self_menu());
  Effect::Top(Step::Stay(TopState::AddingSelf))
}

fn transcription_view(transcription: &str) -> String {
  format!("{TRANSCRIPTION_HEADER}\n\t{transcription}")
}

fn recorded_transcription(data: &SessionData) -> Option<String> {
  data
    .transcription
    .as_deref()
    .map(str::trim)
    .filter(|text| !text.is_empty())
    .map(str::to_string)
}

fn show_transcription(turn: &mut Turn<'_>) -> Effect {
  let text = match recorded_transcription(turn.data) {
    Some(transcription) => format!("{TRANSCRIPTION_HEADER}\n\n\t{transcription}"),
    None => NO_TRANSCRIPTION_TEXT.to_string(),
  };
  turn.edit_menu(menu::back_menu(text));
  turn.data.start_over = true;
  Effect::Top(Step::Stay(TopState::ShowingTranscription))
}

async fn show_transcription_summary(turn: &mut Turn<'_>) -> HandlerResult {
  let text = match recorded_transcription(turn.data) {
    Some(transcription) => {
      let view = transcription_view(&transcription);
      let summary = match turn.data.summaries.get(&transcription) {
        Some(cached) => cached.clone(),
        None => {
          let prompt = format!("{SUMMARY_INSTRUCTION}\n{view}");
          let max_tokens = turn.ctx.settings().summary_max_tokens;
          let summary = turn.ctx.summarizer().summarize(&prompt, max_tokens).await?;
          turn.data.summaries.insert(transcription, summary.clone());
          summary
        },
      };
      format!("{view}\n\nSUMMARY :\n\t{summary}")
    },
    None => NO_TRANSCRIPTION_TEXT.to_string(),
  };

  turn.edit_menu(menu::back_menu(text));
  turn.data.start_over = true;
  Ok(Effect::Top(Step::Stay(TopState::ShowingTranscriptionSummary)))
}

fn show_placeholder(turn: &mut Turn<'_>, state: TopState) -> Effect {
  turn.edit_menu(menu::back_menu(NOT_READY_TEXT));
  Effect::Top(Step::Stay(state))
}

fn render_people(family: &Family, category: Category) -> String {
  let people = family.records(category);
  if people.is_empty() {
    return "\nNo information yet.".to_string();
  }

  let (male, female) = category.labels();
  people
    .iter()
    .map(|person| {
      let name = person.name.as_deref().unwrap_or("-");
      let age = person.age.map(|age| age.to_string()).unwrap_or_else(|| "-".to_string());
      match category {
        Category::Myself => format!("\nName: {name}, Age: {age}"),
        Category::Parents | Category::Children => {
          let label = if person.gender == Some(Gender::Female) { female } else { male };
          format!("\n{label}: Name: {name}, Age: {age}")
        },
      }
    })
    .collect()
}

pub fn render_family(family: &Family) -> String {
  format!(
    "Yourself:{}\n\nParents:{}\n\nChildren:{}",
    render_people(family, Category::Myself),
    render_people(family, Category::Parents),
    render_people(family, Category::Children),
  )
}

fn show_data(turn: &mut Turn<'_>) {
  let text = render_family(&turn.data.people);
  turn.edit_menu(menu::back_menu(text));
  turn.data.start_over = true;
}

fn select_level(turn: &mut Turn<'_>) -> Effect {
  turn.edit_menu(menu::level_menu());
  Effect::Member(Step::Stay(MemberState::SelectingLevel))
}

fn select_gender(turn: &mut Turn<'_>) -> Effect {
  let Some(category) = turn.button().and_then(|button| button.category()) else {
    return Effect::Member(Step::Stay(MemberState::SelectingLevel));
  };
  turn.data.current_category = Some(category);
  turn.edit_menu(menu::gender_menu(category));
  Effect::Member(Step::Stay(MemberState::SelectingGender))
}

fn select_feature(turn: &mut Turn<'_>) -> Effect {
  if turn.data.start_over {
    turn.send_menu(menu::feature_menu(true));
  } else {
    let gender = turn.button().and_then(|button| button.gender()).unwrap_or(Gender::Male);
    turn.data.draft = Some(PersonRecord::with_gender(gender));
    turn.edit_menu(menu::feature_menu(false));
  }
  turn.data.start_over = false;
  Effect::Describe(Step::Stay(DescribeState::SelectingFeature))
}

fn ask_for_input(turn: &mut Turn<'_>) -> Effect {
  let Some(feature) = turn.button().and_then(|button| button.feature()) else {
    return Effect::Describe(Step::Stay(DescribeState::SelectingFeature));
  };
  turn.data.current_feature = Some(feature);
  turn.edit(ASK_INPUT_TEXT);
  Effect::Describe(Step::Stay(DescribeState::Typing))
}

fn save_input(turn: &mut Turn<'_>) -> Effect {
  let event = turn.event;
  let Event::Text(input) = event else {
    return Effect::Describe(Step::Stay(DescribeState::Typing));
  };
  let input = input.trim();
  let draft = turn.data.draft.get_or_insert_with(PersonRecord::default);

  match turn.data.current_feature {
    Some(Feature::Name) => draft.name = Some(input.to_string()),
    Some(Feature::Age) => match parse_age(input) {
      Ok(age) => draft.age = Some(age),
      Err(err) => {
        let hint = match err {
          AgeError::InvalidFormat => "Please send the age as a whole number, e.g. 42.".to_string(),
          AgeError::OutOfRange => format!("Please send an age between 0 and {MAX_AGE}."),
        };
        turn.send(hint);
        return Effect::Describe(Step::Stay(DescribeState::Typing));
      },
    },
    None => {
      warn!("typed input without a selected feature");
      return Effect::Describe(Step::Stay(DescribeState::SelectingFeature));
    },
  }

  turn.data.start_over = true;
  select_feature(turn)
}

fn end_describing(turn: &mut Turn<'_>) -> Effect {
  let category = turn.data.current_category.unwrap_or(Category::Myself);
  let record = turn.data.draft.take().unwrap_or_default();
  turn.data.people.push(category, record);
  turn.data.current_feature = None;
  info!(?category, "person record collected");

  if category == Category::Myself {
    turn.data.start_over = true;
    render(turn, menu::action_menu());
  } else {
    turn.edit_menu(menu::level_menu());
  }
  Effect::Describe(Step::Exit(DescribeExit::End))
}
