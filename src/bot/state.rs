use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;

/// States of the outermost conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopState {
  SelectingAction,
  SelectingLevel,
  AddingMember,
  AddingSelf,
  DescribingSelf,
  QuestionAsked,
  ShowingTranscription,
  ShowingTranscriptionSummary,
  ShowingTranscriptionExecution,
  ShowingTranscriptionGiveCommand,
  ShowingData,
}

/// Terminal tokens of the outermost conversation; either one ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopExit {
  End,
  Stopping,
}

/// States of the "add a family member" conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
  SelectingLevel,
  SelectingGender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberExit {
  End,
  ShowingData,
  Stopping,
}

/// States of the "describe a person" conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeState {
  SelectingFeature,
  Typing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeExit {
  End,
  Stopping,
}

/// What a handler at one level asks for: keep running at `S`, or leave with terminal `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<S, X> {
  Stay(S),
  Exit(X),
}

pub type TopStep = Step<TopState, TopExit>;
pub type MemberStep = Step<MemberState, MemberExit>;
pub type DescribeStep = Step<DescribeState, DescribeExit>;

pub fn map_describe_to_member(exit: DescribeExit) -> MemberStep {
  match exit {
    DescribeExit::End => Step::Stay(MemberState::SelectingLevel),
    DescribeExit::Stopping => Step::Exit(MemberExit::Stopping),
  }
}

pub fn map_describe_to_top(exit: DescribeExit) -> TopStep {
  match exit {
    DescribeExit::End => Step::Stay(TopState::SelectingAction),
    DescribeExit::Stopping => Step::Exit(TopExit::Stopping),
  }
}

pub fn map_member_to_top(exit: MemberExit) -> TopStep {
  match exit {
    MemberExit::End => Step::Stay(TopState::SelectingAction),
    MemberExit::ShowingData => Step::Stay(TopState::ShowingData),
    MemberExit::Stopping => Step::Exit(TopExit::Stopping),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Top,
  Member,
  Describe,
}

/// One active level on the session stack together with its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
  Top(TopState),
  Member(MemberState),
  Describe(DescribeState),
}

impl Frame {
  pub fn level(&self) -> Level {
    match self {
      Self::Top(_) => Level::Top,
      Self::Member(_) => Level::Member,
      Self::Describe(_) => Level::Describe,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
  Parents,
  Children,
  Myself,
}

impl Category {
  /// Labels for the male and female member of a category.
  pub fn labels(self) -> (&'static str, &'static str) {
    match self {
      Self::Parents => ("Father", "Mother"),
      Self::Children | Self::Myself => ("Brother", "Sister"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
  Male,
  Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
  Name,
  Age,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonRecord {
  pub gender: Option<Gender>,
  pub name: Option<String>,
  pub age: Option<u8>,
}

impl PersonRecord {
  pub fn with_gender(gender: Gender) -> Self {
    Self {
      gender: Some(gender),
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Family {
  pub myself: Vec<PersonRecord>,
  pub parents: Vec<PersonRecord>,
  pub children: Vec<PersonRecord>,
}

impl Family {
  pub fn records(&self, category: Category) -> &[PersonRecord] {
    match category {
      Category::Myself => &self.myself,
      Category::Parents => &self.parents,
      Category::Children => &self.children,
    }
  }

  pub fn push(&mut self, category: Category, record: PersonRecord) {
    match category {
      Category::Myself => self.myself.push(record),
      Category::Parents => self.parents.push(record),
      Category::Children => self.children.push(record),
    }
  }
}

/// Everything a user has entered during a session plus transient flags.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
  /// Set by handlers that expect the next render to edit the interactive message.
  pub start_over: bool,
  pub transcription: Option<String>,
  pub summaries: HashMap<String, String>,
  pub current_category: Option<Category>,
  pub current_feature: Option<Feature>,
  pub draft: Option<PersonRecord>,
  pub people: Family,
  /// Last message carrying buttons; edits target it when no callback message is at hand.
  pub menu_message: Option<i32>,
}

/// Per-chat dialogue state kept in the dispatcher's storage.
#[derive(Debug, Clone)]
pub struct Session {
  pub(super) levels: Vec<Frame>,
  pub data: SessionData,
  created_at: DateTime<Utc>,
  touched_at: DateTime<Utc>,
}

impl Default for Session {
  fn default() -> Self {
    let now = Utc::now();
    Self {
      levels: Vec::new(),
      data: SessionData::default(),
      created_at: now,
      touched_at: now,
    }
  }
}

impl Session {
  #[cfg(test)]
  pub(crate) fn with_levels(levels: Vec<Frame>) -> Self {
    Self {
      levels,
      ..Self::default()
    }
  }

  pub fn levels(&self) -> &[Frame] {
    &self.levels
  }

  pub fn current(&self) -> Option<Frame> {
    self.levels.last().copied()
  }

  pub fn is_active(&self) -> bool {
    !self.levels.is_empty()
  }

  pub fn created_at(&self) -> DateTime<Utc> {
    self.created_at
  }

  pub fn touch(&mut self) {
    self.touched_at = Utc::now();
  }

  /// True when the last event is more than `max_idle` before `now`.
  pub fn is_idle(&self, max_idle: chrono::Duration, now: DateTime<Utc>) -> bool {
    now - self.touched_at > max_idle
  }

  #[cfg(test)]
  pub(crate) fn set_touched_at(&mut self, at: DateTime<Utc>) {
    self.touched_at = at;
  }

  /// Checks the nesting rules of the level stack.
  pub fn is_consistent(&self) -> bool {
    let mut previous: Option<Frame> = None;
    for (depth, frame) in self.levels.iter().enumerate() {
      let allowed = match (depth, previous, frame) {
        (0, None, Frame::Top(_)) => true,
        (_, Some(Frame::Top(TopState::AddingMember)), Frame::Member(_)) => true,
        (_, Some(Frame::Top(TopState::DescribingSelf)), Frame::Describe(_)) => true,
        (_, Some(Frame::Member(MemberState::SelectingGender)), Frame::Describe(_)) => true,
        _ => false,
      };
      if !allowed {
        return false;
      }
      previous = Some(*frame);
    }
    true
  }
}
